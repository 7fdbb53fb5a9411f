//! Readiness conditions reported on the cluster object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Network stages that report a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    VpcReady,
    SecondaryCidrsReady,
    SubnetsReady,
    InternetGatewayReady,
    CarrierGatewayReady,
    EgressOnlyInternetGatewayReady,
    NatGatewaysReady,
    RouteTablesReady,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::VpcReady => "VpcReady",
            ConditionType::SecondaryCidrsReady => "SecondaryCidrsReady",
            ConditionType::SubnetsReady => "SubnetsReady",
            ConditionType::InternetGatewayReady => "InternetGatewayReady",
            ConditionType::CarrierGatewayReady => "CarrierGatewayReady",
            ConditionType::EgressOnlyInternetGatewayReady => "EgressOnlyInternetGatewayReady",
            ConditionType::NatGatewaysReady => "NatGatewaysReady",
            ConditionType::RouteTablesReady => "RouteTablesReady",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a false condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub condition_type: ConditionType,
    pub status: bool,
    pub severity: Option<Severity>,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Set of conditions, at most one per type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.0.iter().find(|c| c.condition_type == condition_type)
    }

    pub fn has(&self, condition_type: ConditionType) -> bool {
        self.get(condition_type).is_some()
    }

    pub fn is_true(&self, condition_type: ConditionType) -> bool {
        self.get(condition_type).is_some_and(|c| c.status)
    }

    pub fn is_false(&self, condition_type: ConditionType) -> bool {
        self.get(condition_type).is_some_and(|c| !c.status)
    }

    /// Returns the reason of the condition, if set.
    pub fn reason(&self, condition_type: ConditionType) -> Option<&str> {
        self.get(condition_type).map(|c| c.reason.as_str())
    }

    pub fn mark_true(&mut self, condition_type: ConditionType) {
        self.set(Condition {
            condition_type,
            status: true,
            severity: None,
            reason: String::new(),
            message: String::new(),
            last_transition_time: Utc::now(),
        });
    }

    pub fn mark_false(
        &mut self,
        condition_type: ConditionType,
        reason: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) {
        self.set(Condition {
            condition_type,
            status: false,
            severity: Some(severity),
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        });
    }

    /// Replaces the condition of the same type.
    ///
    /// The transition time is kept when the status does not change.
    pub fn set(&mut self, mut condition: Condition) {
        match self
            .0
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => {
                self.0.push(condition);
                self.0.sort_by_key(|c| c.condition_type);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mark_and_query() {
        let mut conditions = Conditions::new();
        assert!(!conditions.has(ConditionType::VpcReady));

        conditions.mark_false(ConditionType::VpcReady, "VpcCreationStarted", Severity::Info, "");
        assert!(conditions.is_false(ConditionType::VpcReady));
        assert_eq!(conditions.reason(ConditionType::VpcReady), Some("VpcCreationStarted"));

        conditions.mark_true(ConditionType::VpcReady);
        assert!(conditions.is_true(ConditionType::VpcReady));
        assert_eq!(conditions.iter().count(), 1);
    }

    #[test]
    fn test_transition_time_kept_for_same_status() {
        let mut conditions = Conditions::new();
        conditions.mark_false(ConditionType::SubnetsReady, "Deleting", Severity::Info, "");
        let first = conditions.get(ConditionType::SubnetsReady).unwrap().last_transition_time;

        conditions.mark_false(ConditionType::SubnetsReady, "Deleted", Severity::Info, "");
        let second = conditions.get(ConditionType::SubnetsReady).unwrap();
        assert_eq!(second.last_transition_time, first);
        assert_eq!(second.reason, "Deleted");
    }

    #[test]
    fn test_sorted_by_type() {
        let mut conditions = Conditions::new();
        conditions.mark_true(ConditionType::RouteTablesReady);
        conditions.mark_true(ConditionType::VpcReady);
        let types: Vec<_> = conditions.iter().map(|c| c.condition_type).collect();
        assert_eq!(types, vec![ConditionType::VpcReady, ConditionType::RouteTablesReady]);
    }
}
