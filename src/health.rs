//! State refresh and the health-check poke.
//!
//! A refresh publishes `poke` on `{root}/onConnect` and waits for the
//! resulting `camera_activity` report; the transport applies the report to the
//! store before the waiter wakes. The poke loop runs the same round trip on a
//! fixed cadence so a connection that died silently is noticed, and any
//! refresh made for a patrol or rehome pushes the next poke back.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::correlator::Correlator;
use crate::error::BusError;
use crate::topics::POKE_PAYLOAD;

pub const DEFAULT_POKE_INTERVAL: Duration = Duration::from_secs(60);

pub struct StateRefresher {
    correlator: Arc<Correlator>,
    last_refresh: Mutex<Instant>,
}

impl StateRefresher {
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self {
            correlator,
            last_refresh: Mutex::new(Instant::now()),
        }
    }

    pub fn last_refresh(&self) -> Instant {
        *self.last_refresh.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn touch(&self) {
        *self.last_refresh.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    /// Ask the NVR for a full activity report and wait for it.
    ///
    /// A failed round trip replaces the bus session before returning.
    pub async fn refresh(&self) -> Result<(), BusError> {
        self.touch();
        let conn = self.correlator.connection();
        let topics = conn.topics();

        match self
            .correlator
            .send_and_wait(&topics.on_connect(), &topics.activity(), POKE_PAYLOAD)
            .await
        {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(topic = err.topic(), error = %err, "state refresh failed");
                conn.recover(&err);
                Err(err)
            }
        }
    }

    /// Poke every `interval` until `shutdown` flips, calling `after_poke`
    /// after each successful round trip.
    pub async fn run_health_check<F>(&self, interval: Duration, mut shutdown: watch::Receiver<bool>, after_poke: F)
    where
        F: Fn(),
    {
        loop {
            let due = self.last_refresh() + interval;
            if Instant::now() < due {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = shutdown.changed() => break,
                }
                // Another refresh may have happened while we slept.
                continue;
            }

            debug!("health-check poke");
            tokio::select! {
                result = self.refresh() => {
                    if result.is_ok() {
                        after_poke();
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
