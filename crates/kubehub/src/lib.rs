//! Stagehand kubehub: the cluster-backed [`ObjectStore`] and tracing setup.

#![forbid(unsafe_code)]

use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use stagehand_core::{InstanceKey, ListOptions, ObjectStore, ResourceKind};
use tokio::sync::RwLock;
use tracing::debug;

/// Install a fmt subscriber filtered by `STAGEHAND_LOG` (default `info`).
/// A second call is a no-op.
pub fn init_tracing() {
    let env = std::env::var("STAGEHAND_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init();
}

fn gvk_of(kind: &ResourceKind) -> GroupVersionKind {
    GroupVersionKind { group: kind.group.clone(), version: kind.version.clone(), kind: kind.kind.clone() }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<(ApiResource, bool)> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

fn list_params(opts: &ListOptions) -> ListParams {
    let mut lp = ListParams::default();
    if let Some(labels) = opts.label_selector.as_deref() {
        lp = lp.labels(labels);
    }
    if let Some(fields) = opts.field_selector.as_deref() {
        lp = lp.fields(fields);
    }
    lp
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn to_dynamic(obj: &Json) -> Result<DynamicObject> {
    serde_json::from_value(obj.clone()).context("decoding object as DynamicObject")
}

fn from_dynamic(obj: DynamicObject) -> Result<Json> {
    let mut raw = serde_json::to_value(obj).context("serializing DynamicObject")?;
    strip_managed_fields(&mut raw);
    Ok(raw)
}

fn named(obj: &Json) -> Result<InstanceKey> {
    let key = InstanceKey::from_json(obj);
    if key.name.is_empty() {
        return Err(anyhow!("object has no metadata.name"));
    }
    Ok(key)
}

/// [`ObjectStore`] talking to a live cluster through `Api<DynamicObject>`.
///
/// The API resource for each kind is looked up through discovery once and cached.
pub struct KubeStore {
    client: Client,
    resources: RwLock<FxHashMap<ResourceKind, (ApiResource, bool)>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client, resources: RwLock::new(FxHashMap::default()) }
    }

    /// Client from the local kubeconfig or in-cluster environment.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    async fn resource(&self, kind: &ResourceKind) -> Result<(ApiResource, bool)> {
        if let Some(found) = self.resources.read().await.get(kind) {
            return Ok(found.clone());
        }
        let found = find_api_resource(self.client.clone(), &gvk_of(kind)).await?;
        debug!(kind = %kind, namespaced = found.1, "api resource discovered");
        self.resources.write().await.insert(kind.clone(), found.clone());
        Ok(found)
    }

    async fn api_for(&self, kind: &ResourceKind, namespace: &str) -> Result<Api<DynamicObject>> {
        let (ar, namespaced) = self.resource(kind).await?;
        if !namespaced {
            return Ok(Api::all_with(self.client.clone(), &ar));
        }
        if namespace.is_empty() {
            return Err(anyhow!("namespace required for namespaced kind {}", kind));
        }
        Ok(Api::namespaced_with(self.client.clone(), namespace, &ar))
    }
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, kind: &ResourceKind, key: &InstanceKey) -> Result<Option<Json>> {
        let api = self.api_for(kind, &key.namespace).await?;
        let live = api
            .get_opt(&key.name)
            .await
            .with_context(|| format!("reading {} {}", kind.kind, key))?;
        live.map(from_dynamic).transpose()
    }

    async fn create(&self, kind: &ResourceKind, obj: &Json) -> Result<Json> {
        let key = named(obj)?;
        let api = self.api_for(kind, &key.namespace).await?;
        debug!(kind = %kind, key = %key, "create");
        let created = api
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await
            .with_context(|| format!("creating {} {}", kind.kind, key))?;
        from_dynamic(created)
    }

    async fn update(&self, kind: &ResourceKind, obj: &Json) -> Result<Json> {
        let key = named(obj)?;
        let api = self.api_for(kind, &key.namespace).await?;
        debug!(kind = %kind, key = %key, "replace");
        let replaced = api
            .replace(&key.name, &PostParams::default(), &to_dynamic(obj)?)
            .await
            .with_context(|| format!("updating {} {}", kind.kind, key))?;
        from_dynamic(replaced)
    }

    async fn update_status(&self, kind: &ResourceKind, obj: &Json) -> Result<Json> {
        let key = named(obj)?;
        let api = self.api_for(kind, &key.namespace).await?;
        debug!(kind = %kind, key = %key, "replace status");
        let body = serde_json::to_vec(obj).context("encoding status body")?;
        let replaced = api
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .with_context(|| format!("updating status of {} {}", kind.kind, key))?;
        from_dynamic(replaced)
    }

    async fn delete(&self, kind: &ResourceKind, key: &InstanceKey) -> Result<()> {
        let api = self.api_for(kind, &key.namespace).await?;
        let _ = api
            .delete(&key.name, &DeleteParams::default())
            .await
            .with_context(|| format!("deleting {} {}", kind.kind, key))?;
        Ok(())
    }

    async fn list(&self, kind: &ResourceKind, opts: &ListOptions) -> Result<Vec<Json>> {
        let (ar, namespaced) = self.resource(kind).await?;
        let api: Api<DynamicObject> = match (namespaced, opts.namespace.as_deref()) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        };
        let list = api
            .list(&list_params(opts))
            .await
            .with_context(|| format!("listing {}", kind))?;
        list.items.into_iter().map(from_dynamic).collect()
    }
}
