//! Stagehand status helpers.
//!
//! [`ResourceCounter`] aggregates readiness over the objects an owner manages, [`set_condition`]
//! maintains a status condition list, and [`owner_reference`] builds the reference that ties a
//! staged object to its owner so the reconciler and the counter can find it.

#![forbid(unsafe_code)]

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use stagehand_core::prelude::Object;

mod conditions;
mod counter;

pub use conditions::{find_condition, set_condition};
pub use counter::{is_ready, CounterResults, ReadyRequirements, ResourceCounter};

/// Owner reference pointing at `owner`. `controller` marks it as the managing controller.
pub fn owner_reference<K: Object>(owner: &K, controller: bool) -> OwnerReference {
    let meta = owner.meta();
    OwnerReference {
        api_version: K::api_version(&()).into_owned(),
        kind: K::kind(&()).into_owned(),
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        controller: Some(controller),
        block_owner_deletion: Some(true),
    }
}
