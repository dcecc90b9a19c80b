//! Log event schema and filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, de};
use std::str::FromStr;

/// Severity of a log event, with syslog's numbering.
///
/// More severe levels compare as smaller, so "ERROR or worse" is `level <= Level::ERROR`.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Level {
    EMERGENCY = 0,
    ALERT = 1,
    CRITICAL = 2,
    ERROR = 3,
    WARNING = 4,
    NOTICE = 5,
    INFO = 6,
    DEBUG = 7,
    /// Also what .NET loggers call Verbose.
    TRACE = 8,
}

impl Level {
    /// Parse a level name, ignoring case. Syslog names and their short forms are
    /// accepted, as are the .NET names `Fatal`, `Information` and `Verbose`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EMERGENCY" | "EMERG" => Some(Self::EMERGENCY),
            "ALERT" => Some(Self::ALERT),
            "CRITICAL" | "CRIT" | "FATAL" => Some(Self::CRITICAL),
            "ERROR" | "ERR" => Some(Self::ERROR),
            "WARNING" | "WARN" => Some(Self::WARNING),
            "NOTICE" | "NOTE" => Some(Self::NOTICE),
            "INFO" | "INFORMATION" => Some(Self::INFO),
            "DEBUG" => Some(Self::DEBUG),
            "TRACE" | "VERBOSE" => Some(Self::TRACE),
            _ => None,
        }
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown log level '{s}'"))
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(<D::Error as de::Error>::custom)
    }
}

/// A structured log event, as seen by threshold detectors.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct LogEvent {
    /// Severity level of the event.
    pub level: Level,
    /// When the event happened, from the log source if it said so,
    /// otherwise when it was collected.
    pub timestamp: DateTime<Utc>,
    /// Opaque event type identifier (a hash of the message template, typically).
    pub event_type: u32,
    /// The rendered message text.
    pub message: Box<str>,
    /// Hostname where the event originated.
    pub hostname: Option<Box<str>>,
    /// Application name that generated the event.
    pub appname: Option<Box<str>>,
}

impl LogEvent {
    /// Create a builder for constructing a log event.
    pub fn builder(level: Level, message: impl Into<Box<str>>) -> LogEventBuilder {
        LogEventBuilder {
            level,
            message: message.into(),
            timestamp: None,
            event_type: 0,
            hostname: None,
            appname: None,
        }
    }
}

/// Builder for constructing [`LogEvent`] instances.
#[derive(Clone, Debug)]
pub struct LogEventBuilder {
    level: Level,
    message: Box<str>,
    timestamp: Option<DateTime<Utc>>,
    event_type: u32,
    hostname: Option<Box<str>>,
    appname: Option<Box<str>>,
}

impl LogEventBuilder {
    /// Set the source timestamp.
    pub fn timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Set the event type identifier.
    pub fn event_type(mut self, event_type: u32) -> Self {
        self.event_type = event_type;
        self
    }

    /// Set the hostname.
    pub fn hostname(mut self, hostname: impl Into<Box<str>>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the name of the program that logged the event.
    pub fn appname(mut self, appname: impl Into<Box<str>>) -> Self {
        self.appname = Some(appname.into());
        self
    }

    /// Build the log event. Without a source timestamp, the collection time is used.
    pub fn build(self) -> LogEvent {
        LogEvent {
            level: self.level,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            event_type: self.event_type,
            message: self.message,
            hostname: self.hostname,
            appname: self.appname,
        }
    }
}

/// Filter criteria selecting which events a threshold counts.
///
/// All set fields must match for the filter to pass. The default filter matches everything.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LogFilter {
    /// Substring the message must contain. Empty means any message.
    #[serde(default)]
    pub msg_contains: String,
    /// If set, the event type must equal this value.
    #[serde(default)]
    pub event_type: Option<u32>,
    /// If non-empty, the application name must equal this value exactly.
    #[serde(default)]
    pub app_equals: String,
    /// If non-empty, the hostname must equal this value exactly.
    #[serde(default)]
    pub host_equals: String,
    /// If set, the event must be at this severity or worse.
    #[serde(default)]
    pub min_level: Option<Level>,
}

impl LogFilter {
    /// Check if a log event matches this filter.
    pub fn matches(&self, event: &LogEvent) -> bool {
        if !self.msg_contains.is_empty() && !event.message.contains(&self.msg_contains) {
            return false;
        }

        if self.event_type.is_some_and(|t| t != event.event_type) {
            return false;
        }

        if !self.app_equals.is_empty() {
            match event.appname.as_deref() {
                Some(app) if app == self.app_equals.as_str() => {}
                _ => return false,
            }
        }

        if !self.host_equals.is_empty() {
            match event.hostname.as_deref() {
                Some(host) if host == self.host_equals.as_str() => {}
                _ => return false,
            }
        }

        if self.min_level.is_some_and(|min| event.level > min) {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> LogEvent {
        LogEvent::builder(Level::ERROR, "Hello, world")
            .event_type(5417)
            .appname("billing")
            .hostname("tokyo-1")
            .build()
    }

    #[test]
    fn test_default_filter_matches_everything() {
        assert!(LogFilter::default().matches(&event()));
    }

    #[test]
    fn test_filter_fields() {
        let filter = LogFilter {
            msg_contains: "world".into(),
            event_type: Some(5417),
            app_equals: "billing".into(),
            host_equals: "tokyo-1".into(),
            min_level: Some(Level::WARNING),
        };
        assert!(filter.matches(&event()));

        let other_type = LogFilter {
            event_type: Some(1),
            ..Default::default()
        };
        assert!(!other_type.matches(&event()));

        let other_app = LogFilter {
            app_equals: "bill".into(),
            ..Default::default()
        };
        assert!(!other_app.matches(&event()));

        let no_host = LogEvent::builder(Level::ERROR, "Hello, world").build();
        let needs_host = LogFilter {
            host_equals: "tokyo-1".into(),
            ..Default::default()
        };
        assert!(!needs_host.matches(&no_host));
    }

    #[test]
    fn test_min_level() {
        let filter = LogFilter {
            min_level: Some(Level::ERROR),
            ..Default::default()
        };
        assert!(filter.matches(&LogEvent::builder(Level::CRITICAL, "x").build()));
        assert!(filter.matches(&LogEvent::builder(Level::ERROR, "x").build()));
        assert!(!filter.matches(&LogEvent::builder(Level::WARNING, "x").build()));
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(Level::parse("fatal"), Some(Level::CRITICAL));
        assert_eq!(Level::parse("Information"), Some(Level::INFO));
        assert_eq!(Level::parse("verbose"), Some(Level::TRACE));
        assert_eq!(Level::parse("nope"), None);
        assert!("warn".parse::<Level>().is_ok());
    }

    #[test]
    fn test_filter_deserialize() {
        let filter: LogFilter =
            serde_json::from_str(r#"{"msg_contains": "timeout", "min_level": "warn"}"#).unwrap();
        assert_eq!(filter.msg_contains, "timeout");
        assert_eq!(filter.min_level, Some(Level::WARNING));
        assert_eq!(filter.event_type, None);
    }
}
