//! Kind registry. Maps Rust types to the kind they serialize as.

use std::any::TypeId;

use rustc_hash::FxHashMap;

use crate::{CacheError, CacheResult, Object, ResourceKind, TypeWitness};

/// Registration table populated at start-up. Kinds are only resolvable for registered types.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    types: FxHashMap<TypeId, ResourceKind>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheme with the built-in kinds a controller usually stages.
    pub fn with_builtins() -> Self {
        use k8s_openapi::api::{
            apps::v1::{DaemonSet, Deployment, StatefulSet},
            autoscaling::v2::HorizontalPodAutoscaler,
            batch::v1::{CronJob, Job},
            core::v1::{ConfigMap, Namespace, PersistentVolumeClaim, Pod, Secret, Service, ServiceAccount},
            networking::v1::{Ingress, NetworkPolicy},
            policy::v1::PodDisruptionBudget,
            rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding},
        };

        let mut s = Self::new();
        s.register::<ConfigMap>();
        s.register::<Secret>();
        s.register::<Service>();
        s.register::<ServiceAccount>();
        s.register::<PersistentVolumeClaim>();
        s.register::<Namespace>();
        s.register::<Pod>();
        s.register::<Deployment>();
        s.register::<StatefulSet>();
        s.register::<DaemonSet>();
        s.register::<Job>();
        s.register::<CronJob>();
        s.register::<Ingress>();
        s.register::<NetworkPolicy>();
        s.register::<PodDisruptionBudget>();
        s.register::<HorizontalPodAutoscaler>();
        s.register::<Role>();
        s.register::<RoleBinding>();
        s.register::<ClusterRole>();
        s.register::<ClusterRoleBinding>();
        s
    }

    pub fn register<K: Object>(&mut self) -> ResourceKind {
        let kind = ResourceKind::of::<K>();
        self.types.insert(TypeId::of::<K>(), kind.clone());
        kind
    }

    pub fn len(&self) -> usize { self.types.len() }
    pub fn is_empty(&self) -> bool { self.types.is_empty() }

    pub fn kind_of<K: Object>(&self) -> CacheResult<ResourceKind> {
        self.resolve(TypeWitness::of::<K>())
    }

    pub fn resolve(&self, witness: TypeWitness) -> CacheResult<ResourceKind> {
        self.types
            .get(&witness.type_id())
            .cloned()
            .ok_or(CacheError::UnknownType(witness.type_name()))
    }
}
