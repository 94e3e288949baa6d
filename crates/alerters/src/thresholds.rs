//! Threshold ladders and per-identity severity tracking.
//!
//! A ladder is a `{warning, critical}` pair with optional "above the
//! threshold for T seconds" qualifiers. The tracker remembers the last
//! severity emitted per alert identity, so crossings fire once, upgrades
//! fire on the way up, and INFO resolutions fire only after a non-INFO
//! alert was actually emitted.

use std::collections::BTreeMap;
use std::collections::HashMap;

use lookout_core::{MetricIdentity, Severity};

use crate::factory::{flat_bool, flat_f64, FactoryError};

/// One metric's threshold configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThresholdLadder {
    pub enabled: bool,
    pub warning: Option<f64>,
    pub critical: Option<f64>,
    /// Seconds the value must stay above the rung before alerting.
    pub warning_for: Option<f64>,
    pub critical_for: Option<f64>,
}

impl ThresholdLadder {
    /// Build from one flat sub-record
    /// (`warning_threshold`, `critical_threshold`, `*_time_window`, `enabled`).
    pub fn from_flat(record: &BTreeMap<String, String>) -> Result<Self, FactoryError> {
        Ok(Self {
            enabled: flat_bool(record, "enabled"),
            warning: flat_f64(record, "warning_threshold")?,
            critical: flat_f64(record, "critical_threshold")?,
            warning_for: flat_f64(record, "warning_time_window")?,
            critical_for: flat_f64(record, "critical_time_window")?,
        })
    }
}

/// What the tracker decided for one observation.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The value crossed (or held) a rung it had not alerted at yet.
    IncreasedAbove(Severity),
    /// The value left a rung it had alerted at; emitted at INFO.
    DecreasedBelow { resolved: Severity },
}

#[derive(Debug, Clone, Default)]
struct IdentityState {
    /// Chain the identity belongs to; lets a `ComponentReset` purge one
    /// chain's slice without touching the others.
    parent_id: String,
    last_severity: Option<Severity>,
    last_alert_timestamp: Option<f64>,
    /// When the value first went above each rung, for window qualifiers.
    above_warning_since: Option<f64>,
    above_critical_since: Option<f64>,
}

impl IdentityState {
    fn for_chain(parent_id: &str) -> Self {
        Self {
            parent_id: parent_id.to_string(),
            ..Self::default()
        }
    }
}

/// Per-identity dedup and window state for one alerter process.
#[derive(Debug, Default)]
pub struct LadderTracker {
    identities: HashMap<MetricIdentity, IdentityState>,
}

impl LadderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last severity emitted for an identity, if any.
    pub fn last_severity(&self, identity: &MetricIdentity) -> Option<Severity> {
        self.identities.get(identity).and_then(|s| s.last_severity)
    }

    /// Forget everything (e.g. after the chain's config was replaced).
    pub fn clear(&mut self) {
        self.identities.clear();
    }

    /// Forget every identity belonging to one chain (its component is
    /// being reset).
    pub fn clear_chain(&mut self, parent_id: &str) {
        self.identities.retain(|_, state| state.parent_id != parent_id);
    }

    /// Evaluate one observation against a ladder.
    ///
    /// Within a round an identity yields at most one decision, and an
    /// above-threshold decision always wins over a below-threshold one.
    pub fn evaluate(
        &mut self,
        parent_id: &str,
        identity: &MetricIdentity,
        ladder: &ThresholdLadder,
        value: f64,
        at: f64,
    ) -> Option<Decision> {
        if !ladder.enabled {
            return None;
        }
        let state = self
            .identities
            .entry(identity.clone())
            .or_insert_with(|| IdentityState::for_chain(parent_id));

        let above_critical = ladder.critical.map_or(false, |c| value >= c);
        let above_warning = ladder.warning.map_or(false, |w| value >= w);

        // Maintain the window anchors.
        if above_critical {
            state.above_critical_since.get_or_insert(at);
        } else {
            state.above_critical_since = None;
        }
        if above_warning {
            state.above_warning_since.get_or_insert(at);
        } else {
            state.above_warning_since = None;
        }

        let critical_armed = above_critical
            && window_satisfied(state.above_critical_since, ladder.critical_for, at);
        let warning_armed =
            above_warning && window_satisfied(state.above_warning_since, ladder.warning_for, at);

        // Above-threshold decisions take precedence.
        if critical_armed && state.last_severity != Some(Severity::Critical) {
            state.last_severity = Some(Severity::Critical);
            state.last_alert_timestamp = Some(at);
            return Some(Decision::IncreasedAbove(Severity::Critical));
        }
        if warning_armed && !above_critical && state.last_severity.is_none() {
            state.last_severity = Some(Severity::Warning);
            state.last_alert_timestamp = Some(at);
            return Some(Decision::IncreasedAbove(Severity::Warning));
        }

        // Below-threshold transitions.
        match state.last_severity {
            Some(Severity::Critical) if !above_critical => {
                state.last_alert_timestamp = Some(at);
                if above_warning {
                    // Still above warning: the critical rung resolved.
                    state.last_severity = Some(Severity::Warning);
                } else {
                    self.identities.remove(identity);
                }
                Some(Decision::DecreasedBelow {
                    resolved: Severity::Critical,
                })
            }
            Some(Severity::Warning) if !above_warning => {
                self.identities.remove(identity);
                Some(Decision::DecreasedBelow {
                    resolved: Severity::Warning,
                })
            }
            _ => None,
        }
    }
}

/// Latching error-condition flags for transition rules: the condition
/// fires once when it appears and resolves once when it clears, with the
/// resolution gated on the condition having actually fired.
///
/// Each active flag remembers its chain so a `ComponentReset` can purge
/// one chain's flags without touching the others.
#[derive(Debug, Default)]
pub struct TransitionFlags {
    active: HashMap<MetricIdentity, String>,
}

impl TransitionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the condition was not active yet (emit the alert).
    pub fn set(&mut self, parent_id: &str, identity: MetricIdentity) -> bool {
        self.active.insert(identity, parent_id.to_string()).is_none()
    }

    /// Returns true if the condition was active (emit the resolution).
    pub fn clear(&mut self, identity: &MetricIdentity) -> bool {
        self.active.remove(identity).is_some()
    }

    pub fn is_set(&self, identity: &MetricIdentity) -> bool {
        self.active.contains_key(identity)
    }

    /// Drop every flag belonging to one chain.
    pub fn clear_chain(&mut self, parent_id: &str) {
        self.active.retain(|_, parent| parent != parent_id);
    }
}

fn window_satisfied(since: Option<f64>, window: Option<f64>, at: f64) -> bool {
    match (since, window) {
        (_, None) => true,
        (Some(since), Some(window)) => at - since >= window,
        (None, Some(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> MetricIdentity {
        MetricIdentity {
            metric_code: 3001,
            state_args: vec!["sys_1".into()],
        }
    }

    fn ladder() -> ThresholdLadder {
        ThresholdLadder {
            enabled: true,
            warning: Some(85.0),
            critical: Some(95.0),
            warning_for: None,
            critical_for: None,
        }
    }

    #[test]
    fn crossing_fires_once_then_dedups() {
        let mut tracker = LadderTracker::new();
        let id = identity();
        assert_eq!(
            tracker.evaluate("chain_A", &id, &ladder(), 90.0, 1000.0),
            Some(Decision::IncreasedAbove(Severity::Warning))
        );
        // Staying above does not re-fire.
        assert_eq!(tracker.evaluate("chain_A", &id, &ladder(), 91.0, 1060.0), None);
    }

    #[test]
    fn upgrade_to_critical_and_resolution_chain() {
        let mut tracker = LadderTracker::new();
        let id = identity();
        tracker.evaluate("chain_A", &id, &ladder(), 90.0, 1000.0);
        assert_eq!(
            tracker.evaluate("chain_A", &id, &ladder(), 97.0, 1060.0),
            Some(Decision::IncreasedAbove(Severity::Critical))
        );
        // Back to between warning and critical: critical resolves, state
        // decays to warning.
        assert_eq!(
            tracker.evaluate("chain_A", &id, &ladder(), 90.0, 1120.0),
            Some(Decision::DecreasedBelow {
                resolved: Severity::Critical
            })
        );
        assert_eq!(tracker.last_severity(&id), Some(Severity::Warning));
        // Fully below warning: warning resolves and the identity is gone.
        assert_eq!(
            tracker.evaluate("chain_A", &id, &ladder(), 10.0, 1180.0),
            Some(Decision::DecreasedBelow {
                resolved: Severity::Warning
            })
        );
        assert_eq!(tracker.last_severity(&id), None);
    }

    #[test]
    fn no_resolution_without_a_prior_alert() {
        let mut tracker = LadderTracker::new();
        assert_eq!(tracker.evaluate("chain_A", &identity(), &ladder(), 10.0, 1000.0), None);
    }

    #[test]
    fn window_qualifier_delays_the_alert() {
        let mut tracker = LadderTracker::new();
        let id = identity();
        let windowed = ThresholdLadder {
            warning_for: Some(120.0),
            ..ladder()
        };
        // Above warning but the window has not elapsed yet.
        assert_eq!(tracker.evaluate("chain_A", &id, &windowed, 90.0, 1000.0), None);
        assert_eq!(tracker.evaluate("chain_A", &id, &windowed, 91.0, 1060.0), None);
        assert_eq!(
            tracker.evaluate("chain_A", &id, &windowed, 92.0, 1120.0),
            Some(Decision::IncreasedAbove(Severity::Warning))
        );
        // Dropping below resets the window anchor.
        tracker.evaluate("chain_A", &id, &windowed, 10.0, 1180.0);
        assert_eq!(tracker.evaluate("chain_A", &id, &windowed, 90.0, 1240.0), None);
    }

    #[test]
    fn jump_straight_to_critical_suppresses_the_warning_step() {
        let mut tracker = LadderTracker::new();
        let id = identity();
        assert_eq!(
            tracker.evaluate("chain_A", &id, &ladder(), 99.0, 1000.0),
            Some(Decision::IncreasedAbove(Severity::Critical))
        );
        assert_eq!(tracker.last_severity(&id), Some(Severity::Critical));
    }

    #[test]
    fn disabled_ladder_never_fires() {
        let mut tracker = LadderTracker::new();
        let disabled = ThresholdLadder {
            enabled: false,
            ..ladder()
        };
        assert_eq!(tracker.evaluate("chain_A", &identity(), &disabled, 99.0, 1000.0), None);
    }

    #[test]
    fn clear_chain_only_forgets_that_chain() {
        let mut tracker = LadderTracker::new();
        let id_a = identity();
        let id_b = MetricIdentity {
            metric_code: 3001,
            state_args: vec!["sys_2".into()],
        };
        tracker.evaluate("chain_A", &id_a, &ladder(), 90.0, 1000.0);
        tracker.evaluate("chain_B", &id_b, &ladder(), 90.0, 1000.0);

        tracker.clear_chain("chain_A");
        assert_eq!(tracker.last_severity(&id_a), None);
        assert_eq!(tracker.last_severity(&id_b), Some(Severity::Warning));

        // The purged identity alerts afresh, the other stays deduplicated.
        assert_eq!(
            tracker.evaluate("chain_A", &id_a, &ladder(), 91.0, 1060.0),
            Some(Decision::IncreasedAbove(Severity::Warning))
        );
        assert_eq!(tracker.evaluate("chain_B", &id_b, &ladder(), 91.0, 1060.0), None);
    }

    #[test]
    fn transition_flags_clear_by_chain() {
        let mut flags = TransitionFlags::new();
        let id_a = identity();
        let id_b = MetricIdentity {
            metric_code: 3006,
            state_args: vec!["sys_2".into()],
        };
        assert!(flags.set("chain_A", id_a.clone()));
        assert!(flags.set("chain_B", id_b.clone()));
        // Re-setting an active flag does not re-fire.
        assert!(!flags.set("chain_A", id_a.clone()));

        flags.clear_chain("chain_A");
        assert!(!flags.is_set(&id_a));
        assert!(flags.is_set(&id_b));
        // No resolution for a flag the reset already dropped.
        assert!(!flags.clear(&id_a));
        assert!(flags.clear(&id_b));
    }

    #[test]
    fn from_flat_parses_thresholds() {
        let mut record = BTreeMap::new();
        record.insert("enabled".to_string(), "true".to_string());
        record.insert("warning_threshold".to_string(), "85".to_string());
        record.insert("critical_threshold".to_string(), "95".to_string());
        record.insert("critical_time_window".to_string(), "300".to_string());
        let ladder = ThresholdLadder::from_flat(&record).unwrap();
        assert!(ladder.enabled);
        assert_eq!(ladder.warning, Some(85.0));
        assert_eq!(ladder.critical, Some(95.0));
        assert_eq!(ladder.warning_for, None);
        assert_eq!(ladder.critical_for, Some(300.0));

        record.insert("warning_threshold".to_string(), "oops".to_string());
        assert!(ThresholdLadder::from_flat(&record).is_err());
    }
}
