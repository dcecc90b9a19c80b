//! Errors raised while validating threshold configuration.

/// A threshold rule that can't be used. All of these are fatal at startup.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The detection window must be at least one second.
    #[error("threshold '{name}': window_seconds must be > 0, got {value}")]
    NonPositiveWindow { name: String, value: i64 },
    /// The window is held in memory one slot per second, so it has an upper bound.
    #[error("threshold '{name}': window_seconds must be <= {max}, got {value}")]
    WindowTooLarge { name: String, value: i64, max: i64 },
    /// The threshold count must be at least one.
    #[error("threshold '{name}': threshold must be > 0, got {value}")]
    NonPositiveThreshold { name: String, value: i64 },
    /// The suppression time can't be negative.
    #[error("threshold '{name}': suppression_seconds must be >= 0, got {value}")]
    NegativeSuppression { name: String, value: i64 },
    /// The suppression time must be representable as a point in time.
    #[error("threshold '{name}': suppression_seconds must be <= {max}, got {value}")]
    SuppressionTooLong { name: String, value: i64, max: i64 },
    /// Every threshold needs a name to tag its triggers with.
    #[error("threshold #{index} has an empty threshold_name")]
    EmptyName { index: usize },
    /// Two thresholds share a name, so their triggers couldn't be told apart.
    #[error("threshold name '{0}' is used more than once")]
    DuplicateName(String),
}
