//! Ordered write-back of staged entries.

use metrics::counter;
use stagehand_core::{prelude::*, DebugOptions, WILDCARD};
use tracing::{debug, info};

use crate::{diff, CachedEntry, ObjectCache};

/// Position of `kind` in `ordering`. Unlisted or unresolved kinds take the wildcard slot; with no
/// wildcard in the list they sort ahead of every listed kind.
pub fn ordering_rank(ordering: &[String], kind: Option<&str>) -> i64 {
    let position = |name: &str| ordering.iter().position(|o| o == name).map(|p| p as i64);
    kind.and_then(|k| position(k))
        .or_else(|| position(WILDCARD))
        .unwrap_or(-1)
}

/// Write one entry if it changed since staging (or never existed), then its status if marked.
///
/// What the store returns becomes both the staged value and the baseline, so server-assigned
/// metadata (uid, resourceVersion) is visible to later reads and writes.
pub(crate) async fn write_entry(
    store: &dyn ObjectStore,
    ident: &ResourceIdent,
    key: &InstanceKey,
    entry: &mut CachedEntry,
    debug: DebugOptions,
    action: &'static str,
) -> CacheResult<()> {
    if debug.apply {
        log_diff(key, entry);
    }

    let unnamed = !entry.existed && InstanceKey::from_json(&entry.current).name.is_empty();
    let wanted = (entry.baseline != entry.current || !entry.existed) && !unnamed;
    info!(
        namespace = %key.namespace,
        name = %key.name,
        provider = ident.provider(),
        purpose = ident.purpose(),
        kind = %entry.kind.kind,
        update = entry.existed,
        skipped = !wanted,
        "{} resource{}",
        action,
        if wanted { "" } else { " (skipped)" }
    );

    if wanted {
        let written = if entry.existed {
            store.update(&entry.kind, &entry.current).await?
        } else {
            store.create(&entry.kind, &entry.current).await?
        };
        entry.existed = true;
        adopt(entry, &written)?;
        counter!("cache_apply_written_total", 1u64);
    } else {
        if unnamed {
            debug!(kind = %entry.kind, key = %key, "object has no name; create skipped");
        }
        counter!("cache_apply_skipped_total", 1u64);
    }

    if entry.needs_status {
        let written = store.update_status(&entry.kind, &entry.current).await?;
        adopt(entry, &written)?;
        counter!("cache_status_written_total", 1u64);
    }
    Ok(())
}

fn adopt(entry: &mut CachedEntry, written: &serde_json::Value) -> CacheResult<()> {
    let value = (entry.normalize)(&entry.kind, written)?;
    entry.baseline = value.clone();
    entry.current = value;
    Ok(())
}

fn log_diff(key: &InstanceKey, entry: &CachedEntry) {
    if entry.kind.is_secret() {
        info!(diff = "hidden", resType = %entry.kind.kind, name = %key.name, namespace = %key.namespace, "Update diff");
        return;
    }
    let now = serde_json::to_string_pretty(&entry.current).unwrap_or_default();
    let text = diff::unified(entry.snapshot.as_deref().unwrap_or(""), &now);
    let summary = diff::diff_summary(&entry.current, &entry.baseline);
    info!(
        diff = %text,
        adds = summary.adds,
        updates = summary.updates,
        removes = summary.removes,
        resType = %entry.kind.kind,
        name = %key.name,
        namespace = %key.namespace,
        "Update diff"
    );
}

impl ObjectCache {
    /// Staged (identifier, key) pairs in write order: by ordering rank, then staging order.
    /// Write-now identifiers are left out; their updates were written already.
    pub fn apply_order(&self) -> Vec<(ResourceIdent, InstanceKey)> {
        let ordering = &self.config.options.ordering;
        let mut batch: Vec<(i64, u64, &ResourceIdent, &InstanceKey)> = Vec::with_capacity(self.len());
        for (ident, entries) in self.data.iter().filter(|(i, _)| !i.is_write_now()) {
            let kind = self.scheme.resolve(ident.witness()).ok();
            let rank = ordering_rank(ordering, kind.as_ref().map(|k| k.kind.as_str()));
            for (key, entry) in entries {
                batch.push((rank, entry.seq, ident, key));
            }
        }
        batch.sort_by_key(|(rank, seq, _, _)| (*rank, *seq));
        batch.into_iter().map(|(_, _, i, k)| (i.clone(), k.clone())).collect()
    }

    /// Write every staged entry to the store in dependency order.
    ///
    /// Unchanged entries that already existed are skipped. The first store error stops the batch
    /// and is returned; writes made before it stay in place.
    pub async fn apply_all(&mut self) -> CacheResult<()> {
        let order = self.apply_order();
        debug!(count = order.len(), "applying staged resources");
        let dbg = self.config.options.debug;
        for (ident, key) in order {
            let Some(entry) = self.data.get_mut(&ident).and_then(|m| m.get_mut(&key)) else { continue };
            write_entry(self.store.as_ref(), &ident, &key, entry, dbg, "APPLY").await?;
        }
        Ok(())
    }
}
