//! Owner-scoped garbage collection of instances no longer staged.

use metrics::counter;
use rustc_hash::FxHashSet;
use stagehand_core::{owner_uids, prelude::*};
use tracing::{debug, info};

use crate::ObjectCache;

impl ObjectCache {
    /// Delete objects owned by `owner_uid` that this pass did not stage.
    ///
    /// Every possible kind outside the protected set is listed with `opts`. A kind with nothing
    /// staged has an empty wanted set, so all its owned objects go. The first list or delete error
    /// ends the sweep. Returns how many objects were deleted.
    pub async fn reconcile(&self, owner_uid: &str, opts: &ListOptions) -> CacheResult<usize> {
        let empty = FxHashSet::default();
        let mut deleted = 0usize;
        for kind in &self.config.possible {
            if self.config.is_protected(kind) {
                debug!(kind = %kind, "protected kind; not reconciled");
                continue;
            }
            let wanted = self.tracker.get(kind).unwrap_or(&empty);
            let listed = self.store.list(kind, opts).await?;
            for obj in listed {
                if !owner_uids(&obj).iter().any(|uid| uid == owner_uid) {
                    continue;
                }
                let key = InstanceKey::from_json(&obj);
                if wanted.contains(&key) {
                    continue;
                }
                info!(namespace = %key.namespace, name = %key.name, kind = %kind.kind, "DELETE resource");
                self.store.delete(kind, &key).await?;
                counter!("cache_reconcile_deleted_total", 1u64);
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
