//! Frigate PTZ coordinator.
//!
//! Moves PTZ cameras between presets over Frigate's MQTT bus on patrol and
//! rehome schedules, switching motion/object detection off for the slew and
//! back on afterwards, and holding still while objects are tracked.

pub mod app;
pub mod camera_state;
pub mod config;
pub mod correlator;
pub mod error;
pub mod health;
pub mod logging;
pub mod patrol;
pub mod rehome;
pub mod safe_move;
pub mod schedule;
pub mod topics;
pub mod transport;

pub use error::{ActivityError, BusError, ConfigError};
