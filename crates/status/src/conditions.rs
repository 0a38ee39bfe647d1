use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == condition_type)
}

/// Insert or replace the condition of the same type.
///
/// `last_transition_time` is set to now, or kept from the existing condition when the status is
/// unchanged. Returns whether the list changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    condition.last_transition_time = Time(Utc::now());
    let Some(idx) = conditions.iter().position(|c| c.type_ == condition.type_) else {
        conditions.push(condition);
        return true;
    };

    let old = &conditions[idx];
    if old.status == condition.status {
        condition.last_transition_time = old.last_transition_time.clone();
    }
    let unchanged = old.status == condition.status
        && old.reason == condition.reason
        && old.message == condition.message
        && old.observed_generation == condition.observed_generation
        && old.last_transition_time == condition.last_transition_time;
    conditions[idx] = condition;
    !unchanged
}
