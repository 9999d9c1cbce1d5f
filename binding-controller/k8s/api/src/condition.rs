use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A typed status record, shaped like `metav1.Condition`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: Status,
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[schemars(with = "String")]
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Status {
    True,
    False,
    Unknown,
}

// === impl Condition ===

impl Condition {
    pub fn new(
        type_: impl ToString,
        status: Status,
        reason: impl ToString,
        message: impl ToString,
    ) -> Self {
        Self {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == Status::True
    }
}

impl From<bool> for Status {
    fn from(b: bool) -> Self {
        if b {
            Self::True
        } else {
            Self::False
        }
    }
}

/// Returns the condition of the given type, if any.
pub fn find<'c>(conditions: &'c [Condition], type_: &str) -> Option<&'c Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Sets `condition`, replacing any existing condition of the same type.
///
/// The transition time of an existing condition is kept unless its status
/// changes. Returns true if the list was modified.
pub fn set(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            if *existing == condition {
                return false;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_appends_and_replaces_by_type() {
        let mut conditions = Vec::new();
        assert!(set(
            &mut conditions,
            Condition::new("Ready", Status::False, "NoMatchingServiceFound", "no match")
        ));
        assert!(set(
            &mut conditions,
            Condition::new("Valid", Status::True, "ValidationSucceeded", "")
        ));
        assert!(set(
            &mut conditions,
            Condition::new("Ready", Status::True, "Resolved", "")
        ));

        assert_eq!(conditions.len(), 2);
        let ready = find(&conditions, "Ready").unwrap();
        assert!(ready.is_true());
        assert_eq!(ready.reason, "Resolved");
    }

    #[test]
    fn transition_time_changes_only_with_status() {
        let mut first = Condition::new("Ready", Status::False, "A", "a");
        first.last_transition_time = DateTime::<Utc>::MIN_UTC;
        let mut conditions = vec![first];

        assert!(set(
            &mut conditions,
            Condition::new("Ready", Status::False, "B", "b")
        ));
        assert_eq!(conditions[0].last_transition_time, DateTime::<Utc>::MIN_UTC);
        assert_eq!(conditions[0].reason, "B");

        assert!(!set(
            &mut conditions,
            Condition::new("Ready", Status::False, "B", "b")
        ));

        assert!(set(&mut conditions, Condition::new("Ready", Status::True, "C", "")));
        assert_ne!(conditions[0].last_transition_time, DateTime::<Utc>::MIN_UTC);
    }
}
