//! In-memory [`ObjectStore`] for tests and dry runs.
//!
//! Keeps objects per (kind, key), records every write in order, and assigns the metadata a real
//! API server would (uid, resourceVersion, creationTimestamp).

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{anyhow, Result};
use rustc_hash::FxHashSet;
use serde_json::Value as Json;
use stagehand_core::{InstanceKey, ListOptions, ObjectStore, ResourceKind};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub seq: u64,
    pub op: WriteOp,
    pub kind: ResourceKind,
    pub key: InstanceKey,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(ResourceKind, InstanceKey), Json>,
    writes: Vec<WriteRecord>,
    deletes: Vec<(ResourceKind, InstanceKey)>,
    reads: usize,
    seq: u64,
    fail_writes: FxHashSet<String>,
    fail_lists: bool,
    fail_reads: bool,
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn check_write(&self, kind: &ResourceKind) -> Result<()> {
        if self.fail_writes.contains(&kind.kind) {
            return Err(anyhow!("injected write failure for {}", kind));
        }
        Ok(())
    }

    fn record(&mut self, op: WriteOp, kind: &ResourceKind, key: &InstanceKey) -> u64 {
        let seq = self.next_seq();
        self.writes.push(WriteRecord { seq, op, kind: kind.clone(), key: key.clone() });
        seq
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

fn meta_mut(obj: &mut Json) -> Option<&mut serde_json::Map<String, Json>> {
    let root = obj.as_object_mut()?;
    root.entry("metadata")
        .or_insert_with(|| Json::Object(serde_json::Map::new()))
        .as_object_mut()
}

fn matches_labels(obj: &Json, selector: &str) -> bool {
    let labels = obj.get("metadata").and_then(|m| m.get("labels"));
    let label = |k: &str| labels.and_then(|l| l.get(k)).and_then(|v| v.as_str());
    selector.split(',').map(str::trim).filter(|t| !t.is_empty()).all(|term| {
        if let Some((k, v)) = term.split_once("!=") {
            label(k.trim()) != Some(v.trim())
        } else if let Some((k, v)) = term.split_once('=') {
            label(k.trim()) == Some(v.trim_start_matches('=').trim())
        } else {
            label(term).is_some()
        }
    })
}

fn matches_fields(key: &InstanceKey, selector: &str) -> bool {
    selector.split(',').map(str::trim).filter(|t| !t.is_empty()).all(|term| {
        match term.split_once('=') {
            Some(("metadata.name", v)) => key.name == v.trim_start_matches('='),
            Some(("metadata.namespace", v)) => key.namespace == v.trim_start_matches('='),
            _ => true,
        }
    })
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put an object in place without recording a write.
    pub fn seed(&self, kind: &ResourceKind, mut obj: Json) {
        let mut inner = self.lock();
        let seq = inner.next_seq();
        if let Some(meta) = meta_mut(&mut obj) {
            meta.entry("uid").or_insert_with(|| Json::String(Uuid::new_v4().to_string()));
            meta.insert("resourceVersion".into(), Json::String(seq.to_string()));
        }
        let key = InstanceKey::from_json(&obj);
        inner.objects.insert((kind.clone(), key), obj);
    }

    pub fn object(&self, kind: &ResourceKind, key: &InstanceKey) -> Option<Json> {
        self.lock().objects.get(&(kind.clone(), key.clone())).cloned()
    }

    pub fn len(&self) -> usize { self.lock().objects.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Every create/update/status write, oldest first.
    pub fn writes(&self) -> Vec<WriteRecord> { self.lock().writes.clone() }

    /// Create and update writes, excluding status writes.
    pub fn write_count(&self) -> usize {
        self.lock().writes.iter().filter(|w| w.op != WriteOp::Status).count()
    }

    pub fn status_writes(&self) -> usize {
        self.lock().writes.iter().filter(|w| w.op == WriteOp::Status).count()
    }

    pub fn deleted(&self) -> Vec<(ResourceKind, InstanceKey)> { self.lock().deletes.clone() }

    pub fn reads(&self) -> usize { self.lock().reads }

    /// Make writes of the named kind fail from now on.
    pub fn fail_writes_for(&self, kind: &str) {
        self.lock().fail_writes.insert(kind.to_string());
    }

    pub fn fail_lists(&self, on: bool) {
        self.lock().fail_lists = on;
    }

    pub fn fail_reads(&self, on: bool) {
        self.lock().fail_reads = on;
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: &ResourceKind, key: &InstanceKey) -> Result<Option<Json>> {
        let mut inner = self.lock();
        inner.reads += 1;
        if inner.fail_reads {
            return Err(anyhow!("injected read failure for {} {}", kind, key));
        }
        Ok(inner.objects.get(&(kind.clone(), key.clone())).cloned())
    }

    async fn create(&self, kind: &ResourceKind, obj: &Json) -> Result<Json> {
        let mut inner = self.lock();
        inner.check_write(kind)?;
        let key = InstanceKey::from_json(obj);
        let slot = (kind.clone(), key.clone());
        if inner.objects.contains_key(&slot) {
            return Err(anyhow!("{} {} already exists", kind.kind, key));
        }
        let seq = inner.record(WriteOp::Create, kind, &key);
        let mut stored = obj.clone();
        if let Some(meta) = meta_mut(&mut stored) {
            meta.insert("uid".into(), Json::String(Uuid::new_v4().to_string()));
            meta.insert("resourceVersion".into(), Json::String(seq.to_string()));
            meta.insert(
                "creationTimestamp".into(),
                Json::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            );
        }
        inner.objects.insert(slot, stored.clone());
        Ok(stored)
    }

    async fn update(&self, kind: &ResourceKind, obj: &Json) -> Result<Json> {
        let mut inner = self.lock();
        inner.check_write(kind)?;
        let key = InstanceKey::from_json(obj);
        let slot = (kind.clone(), key.clone());
        let Some(prev) = inner.objects.get(&slot).cloned() else {
            return Err(anyhow!("{} {} not found", kind.kind, key));
        };
        let seq = inner.record(WriteOp::Update, kind, &key);
        let mut stored = obj.clone();
        if let Some(meta) = meta_mut(&mut stored) {
            for k in ["uid", "creationTimestamp"] {
                if let Some(v) = prev.get("metadata").and_then(|m| m.get(k)) {
                    meta.insert(k.into(), v.clone());
                }
            }
            meta.insert("resourceVersion".into(), Json::String(seq.to_string()));
        }
        inner.objects.insert(slot, stored.clone());
        Ok(stored)
    }

    async fn update_status(&self, kind: &ResourceKind, obj: &Json) -> Result<Json> {
        let mut inner = self.lock();
        inner.check_write(kind)?;
        let key = InstanceKey::from_json(obj);
        let slot = (kind.clone(), key.clone());
        let Some(mut stored) = inner.objects.get(&slot).cloned() else {
            return Err(anyhow!("{} {} not found", kind.kind, key));
        };
        let seq = inner.record(WriteOp::Status, kind, &key);
        if let Some(root) = stored.as_object_mut() {
            match obj.get("status") {
                Some(status) => root.insert("status".into(), status.clone()),
                None => root.remove("status"),
            };
        }
        if let Some(meta) = meta_mut(&mut stored) {
            meta.insert("resourceVersion".into(), Json::String(seq.to_string()));
        }
        inner.objects.insert(slot, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, kind: &ResourceKind, key: &InstanceKey) -> Result<()> {
        let mut inner = self.lock();
        inner.check_write(kind)?;
        if inner.objects.remove(&(kind.clone(), key.clone())).is_none() {
            return Err(anyhow!("{} {} not found", kind.kind, key));
        }
        inner.deletes.push((kind.clone(), key.clone()));
        Ok(())
    }

    async fn list(&self, kind: &ResourceKind, opts: &ListOptions) -> Result<Vec<Json>> {
        let inner = self.lock();
        if inner.fail_lists {
            return Err(anyhow!("injected list failure for {}", kind));
        }
        Ok(inner
            .objects
            .iter()
            .filter(|((k, key), _)| k == kind && opts.namespace.as_deref().map_or(true, |ns| key.namespace == ns))
            .filter(|(_, obj)| opts.label_selector.as_deref().map_or(true, |s| matches_labels(obj, s)))
            .filter(|((_, key), _)| opts.field_selector.as_deref().map_or(true, |s| matches_fields(key, s)))
            .map(|(_, obj)| obj.clone())
            .collect())
    }
}
