//! Stagehand staging cache.
//!
//! Resources are staged through [`ObjectCache::create`] and [`ObjectCache::update`] during a
//! reconciliation pass, read back by any code path holding the same [`ResourceIdent`], written to
//! the backing store in dependency order by [`ObjectCache::apply_all`], and stale owned objects are
//! removed by [`ObjectCache::reconcile`]. A cache lives for exactly one pass.

#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value as Json;
use stagehand_core::prelude::*;
use tracing::{debug, info};

mod apply;
pub mod diff;
pub mod memory;
mod reconcile;

pub use apply::ordering_rank;
pub use memory::MemoryStore;

/// One staged instance.
#[derive(Clone)]
pub(crate) struct CachedEntry {
    pub(crate) kind: ResourceKind,
    /// Latest staged value. Callers only ever get copies.
    pub(crate) current: Json,
    /// Copy taken at staging time, used to suppress no-op writes.
    pub(crate) baseline: Json,
    /// The object was in the store when first staged; decides update vs create.
    pub(crate) existed: bool,
    pub(crate) needs_status: bool,
    /// Pretty JSON captured at create time when debug diffs are on.
    pub(crate) snapshot: Option<String>,
    pub(crate) seq: u64,
    /// Passes a raw value through the staged Rust type so store results compare like staged values.
    pub(crate) normalize: Normalize,
}

pub(crate) type Normalize = fn(&ResourceKind, &Json) -> CacheResult<Json>;

type Entries = FxHashMap<InstanceKey, CachedEntry>;

/// Per-pass staging cache in front of an [`ObjectStore`].
pub struct ObjectCache {
    store: Arc<dyn ObjectStore>,
    scheme: Arc<Scheme>,
    config: CacheConfig,
    data: FxHashMap<ResourceIdent, Entries>,
    /// Instance keys staged per kind; the reconciler's wanted set.
    tracker: FxHashMap<ResourceKind, FxHashSet<InstanceKey>>,
    next_seq: u64,
}

fn to_json<K: Object>(obj: &K, kind: &ResourceKind) -> CacheResult<Json> {
    serde_json::to_value(obj).map_err(|e| CacheError::Conversion {
        from: kind.clone(),
        into: "json".to_string(),
        reason: e.to_string(),
    })
}

fn pretty(v: &Json) -> String {
    serde_json::to_string_pretty(v).unwrap_or_default()
}

impl ObjectCache {
    pub fn new(store: Arc<dyn ObjectStore>, scheme: Arc<Scheme>, config: CacheConfig) -> Self {
        Self {
            store,
            scheme,
            config,
            data: FxHashMap::default(),
            tracker: FxHashMap::default(),
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig { &self.config }
    pub fn scheme(&self) -> &Scheme { &self.scheme }
    pub fn store(&self) -> &Arc<dyn ObjectStore> { &self.store }

    /// Number of staged instances across all identifiers.
    pub fn len(&self) -> usize { self.data.values().map(|m| m.len()).sum() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn register_kind(&mut self, kind: ResourceKind) {
        if self.config.possible.insert(kind.clone()) && self.config.options.debug.registration {
            info!(kind = %kind, "registered type");
        }
    }

    /// Make kinds known without staging anything: required in strict mode, and lets the
    /// reconciler sweep kinds that produce nothing this pass.
    pub fn add_allowed_kinds<'a>(&mut self, idents: impl IntoIterator<Item = &'a ResourceIdent>) -> CacheResult<()> {
        for ident in idents {
            let kind = self.scheme.resolve(ident.witness())?;
            self.register_kind(kind);
        }
        Ok(())
    }

    /// Stage `obj` under `ident` at `key`.
    ///
    /// The live object is read first; when it exists it replaces `obj` as the staged value.
    /// Returns a copy of whatever got staged so callers can keep building on it.
    ///
    /// Without strict kinds the kind is registered before validation, so a rejected create still
    /// makes it possible and the next reconcile sweeps it.
    pub async fn create<K: Object>(&mut self, ident: &ResourceIdent, key: &InstanceKey, obj: K) -> CacheResult<K> {
        let actual = self.scheme.kind_of::<K>()?;
        if self.config.options.strict_kinds {
            if !self.config.possible.contains(&actual) {
                return Err(CacheError::UnregisteredKind(actual));
            }
        } else {
            self.register_kind(actual.clone());
        }

        let live = self.store.get(&actual, key).await?;

        let expected = self.scheme.resolve(ident.witness())?;
        if expected != actual {
            return Err(CacheError::TypeMismatch { expected, actual, key: key.clone() });
        }
        if self.data.get(ident).is_some_and(|m| m.contains_key(key)) {
            return Err(CacheError::DuplicateEntry { ident: ident.to_string(), key: key.clone() });
        }

        let existed = live.is_some();
        let (value, staged) = match live {
            Some(live) => {
                let typed = from_json::<K>(&actual, &live)?;
                (to_json(&typed, &actual)?, typed)
            }
            None => (to_json(&obj, &actual)?, obj),
        };

        self.tracker.entry(actual.clone()).or_default().insert(key.clone());

        let debug = self.config.options.debug;
        let snapshot = debug.wants_snapshot().then(|| pretty(&value));
        if debug.create {
            let shown = if actual.is_secret() { "hidden" } else { snapshot.as_deref().unwrap_or("") };
            info!(
                namespace = %key.namespace,
                name = %key.name,
                provider = ident.provider(),
                purpose = ident.purpose(),
                kind = %actual.kind,
                diff = %shown,
                "CREATE resource"
            );
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.data.entry(ident.clone()).or_default().insert(
            key.clone(),
            CachedEntry {
                kind: actual,
                baseline: value.clone(),
                current: value,
                existed,
                needs_status: false,
                snapshot,
                seq,
                normalize: normalize::<K>,
            },
        );
        Ok(staged)
    }

    /// Replace the staged value of an instance previously created under `ident`.
    ///
    /// The instance key comes from `obj`'s own metadata. Write-now identifiers push the change to
    /// the store straight away; store errors come back as-is and the staged value stays updated.
    pub async fn update<K: Object>(&mut self, ident: &ResourceIdent, obj: &K) -> CacheResult<()> {
        let entries = self.data.get(ident).ok_or_else(|| CacheError::CacheMiss(ident.to_string()))?;
        let key = InstanceKey::of(obj);
        if !entries.contains_key(&key) {
            return Err(CacheError::EntryNotFound { ident: ident.to_string(), key });
        }

        let expected = self.scheme.resolve(ident.witness())?;
        let actual = self.scheme.kind_of::<K>()?;
        if expected != actual {
            return Err(CacheError::TypeMismatch { expected, actual, key });
        }
        let value = to_json(obj, &actual)?;

        let debug = self.config.options.debug;
        let Some(entry) = self.data.get_mut(ident).and_then(|m| m.get_mut(&key)) else {
            return Err(CacheError::EntryNotFound { ident: ident.to_string(), key });
        };
        entry.current = value;

        if debug.update {
            let shown = if actual.is_secret() { "hidden".to_string() } else { pretty(&entry.current) };
            info!(
                namespace = %key.namespace,
                name = %key.name,
                provider = ident.provider(),
                purpose = ident.purpose(),
                kind = %actual.kind,
                diff = %shown,
                "UPDATE resource"
            );
        }

        if ident.is_write_now() {
            apply::write_entry(self.store.as_ref(), ident, &key, entry, debug, "INSTANT APPLY").await?;
        }
        Ok(())
    }

    /// Copy of a staged value.
    ///
    /// Single identifiers resolve to their one entry when `key` is `None`; multi identifiers need a key.
    pub fn get<K: Object>(&self, ident: &ResourceIdent, key: Option<&InstanceKey>) -> CacheResult<K> {
        let entries = self
            .data
            .get(ident)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| CacheError::CacheMiss(ident.to_string()))?;
        let entry = match (key, ident.variant()) {
            (Some(key), _) => entries
                .get(key)
                .ok_or_else(|| CacheError::EntryNotFound { ident: ident.to_string(), key: key.clone() })?,
            (None, Variant::Single) => entries
                .values()
                .next()
                .ok_or_else(|| CacheError::CacheMiss(ident.to_string()))?,
            (None, Variant::Multi) => return Err(CacheError::InstanceKeyRequired(ident.to_string())),
        };
        convert(entry)
    }

    /// Copies of everything staged under a multi identifier, in staging order.
    /// An identifier with nothing staged yields an empty list.
    pub fn list<K: Object>(&self, ident: &ResourceIdent) -> CacheResult<Vec<K>> {
        if ident.variant() != Variant::Multi {
            return Err(CacheError::NotMulti(ident.to_string()));
        }
        let Some(entries) = self.data.get(ident) else { return Ok(Vec::new()) };
        let mut staged: Vec<&CachedEntry> = entries.values().collect();
        staged.sort_by_key(|e| e.seq);
        staged.into_iter().map(convert::<K>).collect()
    }

    /// Mark an instance for a status-subresource write when it is next written.
    pub fn status<K: Object>(&mut self, ident: &ResourceIdent, obj: &K) -> CacheResult<()> {
        let entries = self.data.get_mut(ident).ok_or_else(|| CacheError::CacheMiss(ident.to_string()))?;
        let key = InstanceKey::of(obj);
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.needs_status = true;
                Ok(())
            }
            None => Err(CacheError::EntryNotFound { ident: ident.to_string(), key }),
        }
    }

    /// Human-readable dump of the staged contents, also emitted at debug level.
    pub fn debug(&self) -> String {
        let mut idents: Vec<&ResourceIdent> = self.data.keys().collect();
        idents.sort_by_key(|i| (i.provider().to_string(), i.purpose().to_string()));
        let mut out = String::new();
        for ident in idents {
            let _ = writeln!(out, "{}-{} ({:?})", ident.provider(), ident.purpose(), ident.variant());
            let mut entries: Vec<(&InstanceKey, &CachedEntry)> = self.data[ident].iter().collect();
            entries.sort_by_key(|(_, e)| e.seq);
            for (key, e) in entries {
                let _ = writeln!(
                    out,
                    "  Object {} - update={} - {} - status={}",
                    key, e.existed, e.kind, e.needs_status
                );
            }
        }
        debug!(contents = %out, "object cache contents");
        out
    }
}

fn from_json<K: Object>(kind: &ResourceKind, raw: &Json) -> CacheResult<K> {
    serde_json::from_value(raw.clone()).map_err(|e| CacheError::Conversion {
        from: kind.clone(),
        into: std::any::type_name::<K>().to_string(),
        reason: e.to_string(),
    })
}

fn normalize<K: Object>(kind: &ResourceKind, raw: &Json) -> CacheResult<Json> {
    to_json(&from_json::<K>(kind, raw)?, kind)
}

fn convert<K: Object>(entry: &CachedEntry) -> CacheResult<K> {
    let into = ResourceKind::of::<K>();
    if into != entry.kind {
        return Err(CacheError::Conversion {
            from: entry.kind.clone(),
            into: std::any::type_name::<K>().to_string(),
            reason: format!("target kind is {}", into),
        });
    }
    from_json(&entry.kind, &entry.current)
}
