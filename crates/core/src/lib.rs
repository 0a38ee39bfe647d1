//! Stagehand core types: resource kinds, instance keys and staging identifiers.

#![forbid(unsafe_code)]

use std::any::TypeId;
use std::fmt;

use anyhow::{anyhow, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod scheme;
pub mod store;

pub use config::{CacheConfig, DebugOptions, Options, DEFAULT_ORDERING, WILDCARD};
pub use error::{CacheError, CacheResult};
pub use scheme::Scheme;
pub use store::{owner_uids, ListOptions, ObjectStore};

pub mod prelude {
    pub use super::{
        CacheConfig, CacheError, CacheResult, InstanceKey, ListOptions, Object, ObjectStore, Options,
        ResourceIdent, ResourceKind, Scheme, Variant,
    };
}

/// Anything that can be staged: a statically typed Kubernetes resource that round-trips through JSON.
pub trait Object: kube::Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<K> Object for K where K: kube::Resource<DynamicType = ()> + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Group/Version/Kind triple classifying resource instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceKind {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }

    /// Static kind of a typed resource.
    pub fn of<K: Object>() -> Self {
        Self::new(K::group(&()), K::version(&()), K::kind(&()))
    }

    /// `v1/Kind` for the core group, `group/v1/Kind` otherwise.
    pub fn key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    /// Parse a key produced by [`ResourceKind::key`].
    pub fn parse(key: &str) -> Result<Self> {
        let parts: Vec<_> = key.trim().split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new("", *version, *kind)),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new(*group, *version, *kind)),
            _ => Err(anyhow!("invalid kind key: {} (expect v1/Kind or group/v1/Kind)", key)),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    pub fn is_secret(&self) -> bool {
        self.group.is_empty() && self.kind == "Secret"
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Namespace/name identity of one instance within a kind. Cluster-scoped objects use an empty namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl InstanceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new("", name)
    }

    /// Key taken from a typed object's own metadata.
    pub fn of<K: Object>(obj: &K) -> Self {
        let meta = obj.meta();
        Self {
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    /// Key taken from a raw object's `metadata`.
    pub fn from_json(raw: &serde_json::Value) -> Self {
        let meta = raw.get("metadata");
        let field = |k: &str| {
            meta.and_then(|m| m.get(k)).and_then(|v| v.as_str()).unwrap_or("").to_string()
        };
        Self { namespace: field("namespace"), name: field("name") }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Marker naming the Rust type a [`ResourceIdent`] governs. Resolved to a kind through a [`Scheme`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeWitness {
    id: TypeId,
    name: &'static str,
}

impl TypeWitness {
    pub fn of<K: 'static>() -> Self {
        Self { id: TypeId::of::<K>(), name: std::any::type_name::<K>() }
    }

    pub fn type_id(&self) -> TypeId { self.id }
    pub fn type_name(&self) -> &'static str { self.name }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// At most one instance per identifier.
    Single,
    /// An unbounded collection of instances.
    Multi,
}

/// Cache key saying who wants a resource and why, and which type it governs.
///
/// Two identifiers are equal only when every field matches, including the variant and the
/// write-through flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdent {
    provider: String,
    purpose: String,
    witness: TypeWitness,
    write_now: bool,
    variant: Variant,
}

impl ResourceIdent {
    pub fn single<K: Object>(provider: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self::build::<K>(provider, purpose, Variant::Single)
    }

    pub fn multi<K: Object>(provider: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self::build::<K>(provider, purpose, Variant::Multi)
    }

    fn build<K: Object>(provider: impl Into<String>, purpose: impl Into<String>, variant: Variant) -> Self {
        Self {
            provider: provider.into(),
            purpose: purpose.into(),
            witness: TypeWitness::of::<K>(),
            write_now: false,
            variant,
        }
    }

    /// Updates through this identifier are written to the backing store immediately
    /// instead of waiting for the batch apply.
    pub fn write_now(mut self) -> Self {
        self.write_now = true;
        self
    }

    pub fn provider(&self) -> &str { &self.provider }
    pub fn purpose(&self) -> &str { &self.purpose }
    pub fn witness(&self) -> TypeWitness { self.witness }
    pub fn is_write_now(&self) -> bool { self.write_now }
    pub fn variant(&self) -> Variant { self.variant }
}

impl fmt::Display for ResourceIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.purpose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::{ConfigMap, Service};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn kind_keys_round_trip_through_parse() {
        let core = ResourceKind::of::<Service>();
        assert_eq!(core.key(), "v1/Service");
        assert_eq!(ResourceKind::parse("v1/Service").unwrap(), core);

        let apps = ResourceKind::of::<Deployment>();
        assert_eq!(apps.key(), "apps/v1/Deployment");
        assert_eq!(apps.api_version(), "apps/v1");
        assert_eq!(ResourceKind::parse(" apps/v1/Deployment ").unwrap(), apps);

        let e = ResourceKind::parse("Deployment").unwrap_err().to_string();
        assert!(e.contains("invalid kind key"), "e={}", e);
        assert!(ResourceKind::parse("apps//Deployment").is_err());
    }

    #[test]
    fn identifiers_compare_by_every_field() {
        let a = ResourceIdent::single::<Service>("web", "main");
        assert_eq!(a, ResourceIdent::single::<Service>("web", "main"));
        assert_ne!(a, ResourceIdent::multi::<Service>("web", "main"));
        assert_ne!(a, ResourceIdent::single::<ConfigMap>("web", "main"));
        assert_ne!(a, ResourceIdent::single::<Service>("web", "main").write_now());
        assert_ne!(a, ResourceIdent::single::<Service>("web", "other"));
        assert_eq!(a.to_string(), "web/main");
    }

    #[test]
    fn instance_keys_come_from_metadata() {
        let cm = ConfigMap {
            metadata: ObjectMeta { name: Some("cfg".into()), namespace: Some("ns".into()), ..Default::default() },
            ..Default::default()
        };
        let key = InstanceKey::of(&cm);
        assert_eq!(key, InstanceKey::new("ns", "cfg"));
        assert_eq!(InstanceKey::from_json(&serde_json::to_value(&cm).unwrap()), key);
        assert_eq!(key.to_string(), "ns/cfg");
        assert_eq!(InstanceKey::cluster("node-a").to_string(), "node-a");
    }
}
