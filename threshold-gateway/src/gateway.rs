//! The gateway evaluates every incoming log event against the configured thresholds.
//!
//! Events arrive on a channel from any number of producers. A single task owns the
//! detectors and consumes events one at a time, so each detector sees a totally ordered
//! stream and no locking is needed. Triggers are forwarded to an output channel.

use crate::{
    batching::BatchConfig,
    clock::SharedClock,
    error::ConfigError,
    log_event::LogEvent,
    threshold::{ThresholdRule, Trigger},
    threshold_set::ThresholdSet,
};
use conf::Conf;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Config options for the gateway: which thresholds to watch, and how to batch triggers.
#[derive(Clone, Conf, Debug)]
#[conf(serde)]
pub struct GatewayConfig {
    /// Threshold rules, as a JSON array.
    /// Example: `[{"threshold_name": "timeouts", "window_seconds": 60, "threshold": 5, "msg_contains": "timeout"}]`
    #[conf(long, env, value_parser = serde_json::from_str, default_value = "[]", serde(alias = "threshold"))]
    pub thresholds: Vec<ThresholdRule>,
    /// Batching of triggers before they are written out.
    #[conf(flatten)]
    pub output: BatchConfig,
}

/// Owns the threshold detectors and feeds them events.
pub struct Gateway {
    thresholds: ThresholdSet,
    events_rx: UnboundedReceiver<LogEvent>,
    triggers_tx: UnboundedSender<Trigger>,
}

impl Gateway {
    /// Build the detectors for every configured threshold.
    ///
    /// Fails if any threshold is invalid, before any event is processed.
    pub fn new(
        config: &GatewayConfig,
        clock: SharedClock,
        events_rx: UnboundedReceiver<LogEvent>,
        triggers_tx: UnboundedSender<Trigger>,
    ) -> Result<Self, ConfigError> {
        let thresholds = ThresholdSet::new(&config.thresholds, clock)?;
        Ok(Self {
            thresholds,
            events_rx,
            triggers_tx,
        })
    }

    pub fn thresholds(&self) -> &ThresholdSet {
        &self.thresholds
    }

    /// Process a single event, forwarding any triggers. Returns false if nobody is
    /// listening for triggers anymore.
    fn handle_event(&mut self, event: &LogEvent) -> bool {
        for trigger in self.thresholds.on_event(event) {
            if self.triggers_tx.send(trigger).is_err() {
                warn!("Trigger receiver is gone, stopping gateway");
                return false;
            }
        }
        true
    }

    /// Run until the token is cancelled or every event sender is dropped.
    pub async fn run(mut self, token: CancellationToken) {
        info!("Gateway watching {} thresholds", self.thresholds.len());
        let mut processed = 0u64;
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => {
                    info!("Gateway stop requested");
                    break;
                }
                maybe_event = self.events_rx.recv() => match maybe_event {
                    Some(event) => event,
                    None => {
                        info!("All event sources closed, gateway stopping");
                        break;
                    }
                },
            };

            processed += 1;
            if !self.handle_event(&event) {
                break;
            }
        }
        debug!("Gateway processed {processed} events");
    }
}
