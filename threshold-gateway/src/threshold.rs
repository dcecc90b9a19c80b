//! Threshold detection over a sliding window of log events.
//!
//! A [`ThresholdDetector`] counts events in a trailing window of whole seconds and
//! produces a [`Trigger`] when the count reaches the configured threshold. After a
//! trigger it stays quiet until the suppression time has passed. There is no timer
//! involved: whether we are still suppressed is worked out again on every event.

use crate::{
    clock::SharedClock,
    error::ConfigError,
    human_duration::HumanSecs,
    log_event::{LogEvent, LogFilter},
    window_buffer::WindowBuffer,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, trace};

/// Longest accepted window: one day.
pub const MAX_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Longest accepted suppression: one year.
pub const MAX_SUPPRESSION_SECS: i64 = 365 * 24 * 60 * 60;

/// A threshold rule, as written in configuration.
///
/// Numbers are signed so that bad values can be reported clearly by [`ThresholdRule::validate`]
/// rather than failing to parse.
#[derive(Clone, Debug, Deserialize)]
pub struct ThresholdRule {
    /// The name of this threshold; triggers are tagged with it.
    #[serde(alias = "name")]
    pub threshold_name: String,
    /// The number of seconds within which the count must reach the threshold.
    pub window_seconds: i64,
    /// The number of events that will trigger the threshold.
    pub threshold: i64,
    /// Once the threshold is reached, the time to wait before checking again.
    #[serde(default)]
    pub suppression_seconds: i64,
    /// Once the threshold is reached, reset the event count so that the threshold
    /// must be reached again before another trigger.
    #[serde(default)]
    pub reset_on_trigger: bool,
    /// Which events count towards this threshold.
    #[serde(flatten)]
    pub filter: LogFilter,
}

impl ThresholdRule {
    /// Check the numbers in this rule and convert them to detector settings.
    pub fn validate(&self) -> Result<ThresholdSettings, ConfigError> {
        let name = self.threshold_name.clone();
        if self.window_seconds <= 0 {
            return Err(ConfigError::NonPositiveWindow {
                name,
                value: self.window_seconds,
            });
        }
        let window_secs = usize::try_from(self.window_seconds)
            .ok()
            .filter(|_| self.window_seconds <= MAX_WINDOW_SECS);
        let Some(window_secs) = window_secs else {
            return Err(ConfigError::WindowTooLarge {
                name,
                value: self.window_seconds,
                max: MAX_WINDOW_SECS,
            });
        };
        if self.threshold <= 0 {
            return Err(ConfigError::NonPositiveThreshold {
                name,
                value: self.threshold,
            });
        }
        if self.suppression_seconds < 0 {
            return Err(ConfigError::NegativeSuppression {
                name,
                value: self.suppression_seconds,
            });
        }
        if self.suppression_seconds > MAX_SUPPRESSION_SECS {
            return Err(ConfigError::SuppressionTooLong {
                name,
                value: self.suppression_seconds,
                max: MAX_SUPPRESSION_SECS,
            });
        }
        Ok(ThresholdSettings {
            name,
            window_secs,
            threshold: self.threshold as u64,
            suppression_secs: self.suppression_seconds as u64,
            reset_on_trigger: self.reset_on_trigger,
        })
    }
}

/// Validated, immutable detector parameters. Only [`ThresholdRule::validate`] makes these.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThresholdSettings {
    name: String,
    window_secs: usize,
    threshold: u64,
    suppression_secs: u64,
    reset_on_trigger: bool,
}

impl ThresholdSettings {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window_secs(&self) -> usize {
        self.window_secs
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn suppression_secs(&self) -> u64 {
        self.suppression_secs
    }

    pub fn reset_on_trigger(&self) -> bool {
        self.reset_on_trigger
    }

    /// End of the suppression period for a trigger at `now`. Saturates at the
    /// latest representable time.
    fn suppress_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.suppression_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl fmt::Display for ThresholdSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: >= {} / {}, suppress {}",
            self.name,
            self.threshold,
            HumanSecs(self.window_secs as u64),
            HumanSecs(self.suppression_secs),
        )?;
        if self.reset_on_trigger {
            write!(f, ", reset on trigger")?;
        }
        Ok(())
    }
}

/// The notification produced when a threshold is reached.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Trigger {
    /// Name of the threshold that was reached.
    pub threshold_name: String,
    /// Number of events in the window when the threshold was reached.
    pub event_count: u64,
    /// Length of the window, in seconds.
    pub window_seconds: u64,
    /// How long further triggers are suppressed, in seconds.
    pub suppression_seconds: u64,
    /// When the trigger fired.
    pub triggered_at: DateTime<Utc>,
    /// Event type of the event that reached the threshold.
    pub event_type: u32,
    /// Rendered message of the event that reached the threshold.
    pub message: Box<str>,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Threshold {} reached: {} events observed within {} sec. (message suppressed for {} sec.)",
            self.threshold_name, self.event_count, self.window_seconds, self.suppression_seconds
        )
    }
}

/// Whether a detector can currently fire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DetectorState {
    /// A trigger will fire as soon as the count reaches the threshold.
    Idle,
    /// A trigger fired recently; nothing fires until after this time.
    Suppressed { until: DateTime<Utc> },
}

/// Counts events in a sliding window and fires when a threshold is reached.
///
/// Not internally synchronized: events must be delivered one at a time.
pub struct ThresholdDetector {
    settings: ThresholdSettings,
    window: WindowBuffer,
    suppress_until: Option<DateTime<Utc>>,
    clock: SharedClock,
}

impl fmt::Debug for ThresholdDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThresholdDetector")
            .field("settings", &self.settings)
            .field("window", &self.window)
            .field("suppress_until", &self.suppress_until)
            .finish_non_exhaustive()
    }
}

impl ThresholdDetector {
    /// Create a detector with an empty window starting at the clock's current time.
    fn new(settings: ThresholdSettings, clock: SharedClock) -> Self {
        let window = WindowBuffer::new(settings.window_secs, clock.now());
        Self {
            settings,
            window,
            suppress_until: None,
            clock,
        }
    }

    /// Validate a rule and create a detector for it.
    pub fn from_rule(rule: &ThresholdRule, clock: SharedClock) -> Result<Self, ConfigError> {
        Ok(Self::new(rule.validate()?, clock))
    }

    pub fn settings(&self) -> &ThresholdSettings {
        &self.settings
    }

    /// Number of events currently counted in the window.
    pub fn count(&self) -> u64 {
        self.window.sum()
    }

    pub fn window(&self) -> &WindowBuffer {
        &self.window
    }

    /// The current state, as of the clock's current time.
    pub fn state(&self) -> DetectorState {
        let now = self.clock.now();
        match self.suppress_until {
            Some(until) if now <= until => DetectorState::Suppressed { until },
            _ => DetectorState::Idle,
        }
    }

    /// Count an event, and return a trigger if this event reached the threshold.
    ///
    /// Events older than the window are silently ignored.
    pub fn on_event(&mut self, event: &LogEvent) -> Option<Trigger> {
        if !self.window.record(event.timestamp) {
            trace!(
                threshold = %self.settings.name,
                timestamp = %event.timestamp,
                "Dropping event older than the window"
            );
            return None;
        }

        if let DetectorState::Suppressed { .. } = self.state() {
            return None;
        }

        let count = self.window.sum();
        if count < self.settings.threshold {
            return None;
        }

        let now = self.clock.now();
        self.suppress_until = Some(self.settings.suppress_until(now));

        let trigger = Trigger {
            threshold_name: self.settings.name.clone(),
            event_count: count,
            window_seconds: self.settings.window_secs as u64,
            suppression_seconds: self.settings.suppression_secs,
            triggered_at: now,
            event_type: event.event_type,
            message: event.message.clone(),
        };
        info!(
            threshold = %trigger.threshold_name,
            count = trigger.event_count,
            window_secs = trigger.window_seconds,
            suppression_secs = trigger.suppression_seconds,
            "{trigger}"
        );

        if self.settings.reset_on_trigger {
            self.window.reset();
        }

        Some(trigger)
    }
}
