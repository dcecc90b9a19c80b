//! A set of threshold detectors, each counting the events that match its filter.
//! When an event is evaluated, every detector whose filter matches sees it,
//! without stopping early, and all the triggers produced are returned in rule order.

use crate::{
    clock::SharedClock,
    error::ConfigError,
    log_event::{LogEvent, LogFilter},
    threshold::{ThresholdDetector, ThresholdRule, Trigger},
};
use std::collections::HashSet;

/// Independently configured detectors sharing one clock.
#[derive(Debug)]
pub struct ThresholdSet(Vec<(LogFilter, ThresholdDetector)>);

impl ThresholdSet {
    /// Validate every rule and build a detector for each.
    ///
    /// Fails on the first invalid rule, or if two rules share a name.
    pub fn new(rules: &[ThresholdRule], clock: SharedClock) -> Result<Self, ConfigError> {
        let mut names = HashSet::new();
        let mut detectors = Vec::with_capacity(rules.len());
        for (index, rule) in rules.iter().enumerate() {
            if rule.threshold_name.trim().is_empty() {
                return Err(ConfigError::EmptyName { index });
            }
            if !names.insert(rule.threshold_name.as_str()) {
                return Err(ConfigError::DuplicateName(rule.threshold_name.clone()));
            }
            let detector = ThresholdDetector::from_rule(rule, clock.clone())?;
            detectors.push((rule.filter.clone(), detector));
        }
        Ok(Self(detectors))
    }

    /// Evaluate an event against every detector whose filter matches it.
    pub fn on_event(&mut self, event: &LogEvent) -> Vec<Trigger> {
        self.0
            .iter_mut()
            .filter(|(filter, _)| filter.matches(event))
            .filter_map(|(_, detector)| detector.on_event(event))
            .collect()
    }

    /// Look up a detector by threshold name.
    pub fn get(&self, name: &str) -> Option<&ThresholdDetector> {
        self.0
            .iter()
            .map(|(_, detector)| detector)
            .find(|detector| detector.settings().name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThresholdDetector> {
        self.0.iter().map(|(_, detector)| detector)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
