use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observation of a record's state, keyed by `condition_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
    #[serde(default)]
    pub observed_generation: u64,
}

impl Condition {
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type: condition_type.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: 0,
        }
    }
}

/// Insert or update a condition by type. The transition time is only
/// advanced when the status actually changes.
pub fn set_condition(conditions: &mut Vec<Condition>, mut new: Condition) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == new.condition_type)
    {
        if existing.status == new.status {
            new.last_transition_time = existing.last_transition_time;
        }
        *existing = new;
    } else {
        conditions.push(new);
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_preserves_transition_time() {
        let mut conditions = Vec::new();
        let first = Condition::new("Ready", ConditionStatus::True, "Healthy", "ok");
        let t0 = first.last_transition_time;
        set_condition(&mut conditions, first);

        let mut second = Condition::new("Ready", ConditionStatus::True, "Healthy", "still ok");
        second.last_transition_time = t0 + chrono::Duration::seconds(30);
        set_condition(&mut conditions, second);

        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, t0);
        assert_eq!(conditions[0].message, "still ok");
    }

    #[test]
    fn test_set_condition_advances_on_flip() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            Condition::new("Ready", ConditionStatus::True, "Healthy", "ok"),
        );
        let t0 = conditions[0].last_transition_time;

        let mut flipped = Condition::new("Ready", ConditionStatus::False, "Unhealthy", "down");
        flipped.last_transition_time = t0 + chrono::Duration::seconds(5);
        set_condition(&mut conditions, flipped);

        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].last_transition_time > t0);
    }
}
