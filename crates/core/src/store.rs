//! The backing object store seam. Objects cross it as raw JSON.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use smallvec::SmallVec;

use crate::{InstanceKey, ResourceKind};

/// Scoping for list calls made by the reconciler and readiness counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Restrict to one namespace; `None` lists across all namespaces.
    pub namespace: Option<String>,
    /// Label selector in the usual `k=v,k2=v2` form.
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListOptions {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self { namespace: Some(namespace.into()), ..Default::default() }
    }

    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }
}

/// Read/write access to the system of record.
///
/// `get` returns `Ok(None)` for a missing object; every other failure is an error the cache
/// hands back to its caller unchanged.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, kind: &ResourceKind, key: &InstanceKey) -> Result<Option<Json>>;
    async fn create(&self, kind: &ResourceKind, obj: &Json) -> Result<Json>;
    async fn update(&self, kind: &ResourceKind, obj: &Json) -> Result<Json>;
    /// Write only the status subresource.
    async fn update_status(&self, kind: &ResourceKind, obj: &Json) -> Result<Json>;
    async fn delete(&self, kind: &ResourceKind, key: &InstanceKey) -> Result<()>;
    async fn list(&self, kind: &ResourceKind, opts: &ListOptions) -> Result<Vec<Json>>;
}

/// UIDs from `metadata.ownerReferences` of a raw object.
pub fn owner_uids(raw: &Json) -> SmallVec<[String; 2]> {
    raw.get("metadata")
        .and_then(|m| m.get("ownerReferences"))
        .and_then(|r| r.as_array())
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r.get("uid").and_then(|u| u.as_str()))
                .map(|u| u.to_string())
                .collect()
        })
        .unwrap_or_default()
}
