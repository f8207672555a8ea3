/// Frigate MQTT topic layout.
///
/// Everything lives under a configurable root (`frigate` by default):
///   {root}/onConnect                 ← `poke` asks for a full activity report
///   {root}/camera_activity           → JSON snapshot of every camera
///   {root}/{camera}/detect/set|state
///   {root}/{camera}/motion/set|state
///   {root}/{camera}/ptz              ← `preset_{name}`

use std::fmt;
use std::str::FromStr;

pub const DEFAULT_ROOT: &str = "frigate";
pub const POKE_PAYLOAD: &str = "poke";

/// The two detection switches the coordinator toggles around a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Motion,
    Detect,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Motion => "motion",
            Channel::Detect => "detect",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `ON` / `OFF` token used on every `set` and `state` topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Toggle::On => "ON",
            Toggle::Off => "OFF",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Toggle::On)
    }
}

impl From<bool> for Toggle {
    fn from(on: bool) -> Self {
        if on {
            Toggle::On
        } else {
            Toggle::Off
        }
    }
}

impl fmt::Display for Toggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Toggle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ON" => Ok(Toggle::On),
            "OFF" => Ok(Toggle::Off),
            other => Err(format!("expected ON or OFF, got {:?}", other)),
        }
    }
}

/// What an inbound topic refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTopic {
    Activity,
    State { camera: String, channel: Channel },
}

#[derive(Debug, Clone)]
pub struct Topics {
    root: String,
}

impl Topics {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let root = root.trim_end_matches('/').to_string();
        Self { root }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn on_connect(&self) -> String {
        format!("{}/onConnect", self.root)
    }

    pub fn activity(&self) -> String {
        format!("{}/camera_activity", self.root)
    }

    pub fn set(&self, camera: &str, channel: Channel) -> String {
        format!("{}/{}/{}/set", self.root, camera, channel)
    }

    pub fn state(&self, camera: &str, channel: Channel) -> String {
        format!("{}/{}/{}/state", self.root, camera, channel)
    }

    pub fn ptz(&self, camera: &str) -> String {
        format!("{}/{}/ptz", self.root, camera)
    }

    pub fn preset_command(preset: &str) -> String {
        format!("preset_{}", preset)
    }

    /// Shared activity channel plus two state channels per camera.
    pub fn subscriptions<'a>(&self, cameras: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut topics = vec![self.activity()];
        for camera in cameras {
            topics.push(self.state(camera, Channel::Detect));
            topics.push(self.state(camera, Channel::Motion));
        }
        topics
    }

    pub fn classify(&self, topic: &str) -> Option<InboundTopic> {
        let rest = topic.strip_prefix(&self.root)?.strip_prefix('/')?;
        if rest == "camera_activity" {
            return Some(InboundTopic::Activity);
        }

        let mut parts = rest.split('/');
        let camera = parts.next()?;
        let channel = match parts.next()? {
            "detect" => Channel::Detect,
            "motion" => Channel::Motion,
            _ => return None,
        };
        if parts.next()? != "state" || parts.next().is_some() || camera.is_empty() {
            return None;
        }

        Some(InboundTopic::State {
            camera: camera.to_string(),
            channel,
        })
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        let topics = Topics::new("frigate/");
        assert_eq!(topics.on_connect(), "frigate/onConnect");
        assert_eq!(topics.activity(), "frigate/camera_activity");
        assert_eq!(topics.set("cam1", Channel::Detect), "frigate/cam1/detect/set");
        assert_eq!(topics.state("cam1", Channel::Motion), "frigate/cam1/motion/state");
        assert_eq!(topics.ptz("cam1"), "frigate/cam1/ptz");
        assert_eq!(Topics::preset_command("door"), "preset_door");
    }

    #[test]
    fn test_subscriptions_cover_every_camera() {
        let topics = Topics::default();
        let subs = topics.subscriptions(["cam1", "cam2"]);
        assert_eq!(
            subs,
            vec![
                "frigate/camera_activity",
                "frigate/cam1/detect/state",
                "frigate/cam1/motion/state",
                "frigate/cam2/detect/state",
                "frigate/cam2/motion/state",
            ]
        );
    }

    #[test]
    fn test_classify() {
        let topics = Topics::default();
        assert_eq!(topics.classify("frigate/camera_activity"), Some(InboundTopic::Activity));
        assert_eq!(
            topics.classify("frigate/yard/motion/state"),
            Some(InboundTopic::State {
                camera: "yard".into(),
                channel: Channel::Motion
            })
        );
        assert_eq!(topics.classify("frigate/yard/motion/set"), None);
        assert_eq!(topics.classify("frigate/yard/ptz"), None);
        assert_eq!(topics.classify("frigatex/camera_activity"), None);
        assert_eq!(topics.classify("other/yard/detect/state"), None);
    }

    #[test]
    fn test_toggle_tokens() {
        assert_eq!("ON".parse::<Toggle>(), Ok(Toggle::On));
        assert_eq!(" OFF\n".parse::<Toggle>(), Ok(Toggle::Off));
        assert!("on".parse::<Toggle>().is_err());
        assert_eq!(Toggle::from(true).to_string(), "ON");
    }
}
