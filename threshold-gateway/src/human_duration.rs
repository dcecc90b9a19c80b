//! Display wrapper for formatting a whole number of seconds compactly

use std::{
    fmt::{self, Display},
    time::Duration,
};

/// A display wrapper that formats seconds as e.g. "2m" or "1h30m".
#[derive(Clone, Copy, Debug)]
pub struct HumanSecs(pub u64);

impl Display for HumanSecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0s");
        }
        // Remove spaces for compact format (e.g., "1m30s" not "1m 30s")
        let formatted = humantime::format_duration(Duration::from_secs(self.0))
            .to_string()
            .replace(' ', "");
        write!(f, "{formatted}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_secs() {
        assert_eq!(HumanSecs(0).to_string(), "0s");
        assert_eq!(HumanSecs(30).to_string(), "30s");
        assert_eq!(HumanSecs(120).to_string(), "2m");
        assert_eq!(HumanSecs(90).to_string(), "1m30s");
        assert_eq!(HumanSecs(5400).to_string(), "1h30m");
    }
}
