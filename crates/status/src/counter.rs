use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use stagehand_core::{owner_uids, InstanceKey, ListOptions, ObjectStore, ResourceKind};
use tracing::debug;

/// Condition that marks an object ready.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyRequirements {
    pub condition_type: String,
    pub status: String,
}

impl ReadyRequirements {
    pub fn new(condition_type: impl Into<String>, status: impl Into<String>) -> Self {
        Self { condition_type: condition_type.into(), status: status.into() }
    }

    /// `Available=True`, what Deployments report.
    pub fn available() -> Self {
        Self::new("Available", "True")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterResults {
    pub managed: usize,
    pub ready: usize,
    /// `broken <kind>s: [name/namespace, ...]`, sorted; empty when nothing is broken.
    pub broken_message: String,
}

impl CounterResults {
    pub fn all_ready(&self) -> bool {
        self.managed == self.ready
    }
}

/// Counts objects of one kind owned by `owner_uid` across `namespaces`, and how many are ready.
/// An empty namespace list counts across all namespaces.
#[derive(Debug, Clone)]
pub struct ResourceCounter {
    pub kind: ResourceKind,
    pub namespaces: Vec<String>,
    pub owner_uid: String,
    pub ready: ReadyRequirements,
}

fn int_at(obj: &Json, section: &str, field: &str) -> i64 {
    obj.get(section).and_then(|s| s.get(field)).and_then(|v| v.as_i64()).unwrap_or(0)
}

/// A ready condition is present and the controller has observed the latest generation.
pub fn is_ready(obj: &Json, req: &ReadyRequirements) -> bool {
    if int_at(obj, "status", "observedGeneration") < int_at(obj, "metadata", "generation") {
        return false;
    }
    obj.get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array())
        .is_some_and(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(|v| v.as_str()) == Some(req.condition_type.as_str())
                    && c.get("status").and_then(|v| v.as_str()) == Some(req.status.as_str())
            })
        })
}

impl ResourceCounter {
    pub fn new(kind: ResourceKind, owner_uid: impl Into<String>) -> Self {
        Self { kind, namespaces: Vec::new(), owner_uid: owner_uid.into(), ready: ReadyRequirements::available() }
    }

    pub fn in_namespaces(mut self, namespaces: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    pub fn ready_when(mut self, ready: ReadyRequirements) -> Self {
        self.ready = ready;
        self
    }

    /// List the kind in every namespace and tally owned objects. The first list error is returned.
    pub async fn count(&self, store: &dyn ObjectStore) -> Result<CounterResults> {
        let scopes: Vec<ListOptions> = if self.namespaces.is_empty() {
            vec![ListOptions::default()]
        } else {
            self.namespaces.iter().map(ListOptions::in_namespace).collect()
        };

        let mut out = CounterResults::default();
        let mut broken: Vec<String> = Vec::new();
        for opts in &scopes {
            let listed = store
                .list(&self.kind, opts)
                .await
                .with_context(|| format!("counting {} in {:?}", self.kind.kind, opts.namespace))?;
            for obj in listed.iter().filter(|o| owner_uids(o).iter().any(|u| *u == self.owner_uid)) {
                out.managed += 1;
                if is_ready(obj, &self.ready) {
                    out.ready += 1;
                } else {
                    let key = InstanceKey::from_json(obj);
                    broken.push(format!("{}/{}", key.name, key.namespace));
                }
            }
        }

        if !broken.is_empty() {
            broken.sort();
            out.broken_message = format!("broken {}s: [{}]", self.kind.kind.to_lowercase(), broken.join(", "));
        }
        debug!(kind = %self.kind, managed = out.managed, ready = out.ready, "counted owned resources");
        Ok(out)
    }
}
