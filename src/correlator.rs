//! Request/response on top of publish/subscribe.
//!
//! Frigate answers a `.../set` command by echoing the new value on the matching
//! `.../state` topic, and answers `onConnect` with a `camera_activity` report.
//! Neither carries a request id, so a response is simply the next live message
//! on the response topic from the session the request went out on. Retained
//! replays are stale state, never an answer. Requests
//! against the same response topic are queued behind each other so two callers
//! can never resolve on each other's response.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::BusError;
use crate::transport::ConnectionManager;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct Correlator {
    conn: Arc<ConnectionManager>,
    timeout: Duration,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Correlator {
    pub fn new(conn: Arc<ConnectionManager>, timeout: Duration) -> Self {
        Self {
            conn,
            timeout,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.conn
    }

    fn slot(&self, response_topic: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(in_flight.entry(response_topic.to_string()).or_default())
    }

    /// Publish `payload` and resolve with the next message on `response_topic`.
    pub async fn send_and_wait(
        &self,
        publish_topic: &str,
        response_topic: &str,
        payload: &str,
    ) -> Result<String, BusError> {
        let slot = self.slot(response_topic);
        let _turn = slot.lock().await;

        // Listen before publishing so a fast echo cannot slip past.
        let mut inbound = self.conn.subscribe_inbound();
        let deadline = Instant::now() + self.timeout;
        let timed_out = |epoch| BusError::Timeout {
            topic: response_topic.to_string(),
            timeout: self.timeout,
            epoch,
        };

        let epoch = match tokio::time::timeout_at(deadline, self.conn.publish(publish_topic, payload)).await {
            Ok(published) => published?,
            Err(_) => return Err(timed_out(self.conn.epoch())),
        };

        loop {
            match tokio::time::timeout_at(deadline, inbound.recv()).await {
                Err(_) => {
                    debug!(topic = response_topic, epoch, "response timed out");
                    return Err(timed_out(epoch));
                }
                Ok(Ok(msg)) if msg.epoch == epoch && msg.topic == response_topic && !msg.retained => {
                    return Ok(msg.payload);
                }
                Ok(Ok(_)) => continue,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!(topic = response_topic, skipped, "inbound backlog overflowed while waiting");
                }
                Ok(Err(RecvError::Closed)) => {
                    tokio::time::sleep_until(deadline).await;
                    return Err(timed_out(epoch));
                }
            }
        }
    }

    /// Round trip that must echo `expected`.
    pub async fn send_and_expect(
        &self,
        publish_topic: &str,
        response_topic: &str,
        payload: &str,
        expected: &str,
    ) -> Result<(), BusError> {
        let received = self.send_and_wait(publish_topic, response_topic, payload).await?;
        if received.trim() == expected {
            Ok(())
        } else {
            Err(BusError::UnexpectedResponse {
                topic: response_topic.to_string(),
                expected: expected.to_string(),
                received,
            })
        }
    }
}
