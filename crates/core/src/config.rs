//! Cache configuration: possible/protected kinds, apply ordering, strict mode and debug toggles.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ResourceKind;

/// Ordering entry standing for every kind not listed explicitly.
pub const WILDCARD: &str = "*";

/// Kinds that start workloads go last, after the config/secret/service objects they consume.
pub const DEFAULT_ORDERING: [&str; 4] = [WILDCARD, "Deployment", "Job", "CronJob"];

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|s| {
        s.split(',')
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|p| p.to_string())
            .collect()
    })
}

/// Which diagnostics to emit while staging and applying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugOptions {
    pub create: bool,
    pub update: bool,
    pub apply: bool,
    pub registration: bool,
}

impl DebugOptions {
    pub fn all() -> Self {
        Self { create: true, update: true, apply: true, registration: true }
    }

    /// Parse a comma list such as `create,apply`; `all` turns everything on.
    pub fn parse(list: &[String]) -> Self {
        let mut d = Self::default();
        for item in list {
            match item.to_ascii_lowercase().as_str() {
                "all" => d = Self::all(),
                "create" => d.create = true,
                "update" => d.update = true,
                "apply" => d.apply = true,
                "registration" => d.registration = true,
                other => warn!(option = %other, "unknown debug option ignored"),
            }
        }
        d
    }

    /// A JSON snapshot is captured at create time when any diff output is wanted.
    pub fn wants_snapshot(&self) -> bool {
        self.create || self.apply
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Refuse to stage kinds that were not registered up front.
    pub strict_kinds: bool,
    /// Kind names in apply order; [`WILDCARD`] stands for everything else.
    pub ordering: Vec<String>,
    pub debug: DebugOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            strict_kinds: false,
            ordering: DEFAULT_ORDERING.iter().map(|s| s.to_string()).collect(),
            debug: DebugOptions::default(),
        }
    }
}

impl Options {
    /// Defaults overridden by `STAGEHAND_STRICT_KINDS`, `STAGEHAND_ORDERING` and `STAGEHAND_DEBUG`.
    pub fn from_env() -> Self {
        let mut o = Self::default();
        if let Some(strict) = env_flag("STAGEHAND_STRICT_KINDS") {
            o.strict_kinds = strict;
        }
        if let Some(ordering) = env_list("STAGEHAND_ORDERING") {
            o.ordering = ordering;
        }
        if let Some(debug) = env_list("STAGEHAND_DEBUG") {
            o.debug = DebugOptions::parse(&debug);
        }
        o.normalized()
    }

    fn normalized(mut self) -> Self {
        if self.ordering.is_empty() {
            self.ordering = DEFAULT_ORDERING.iter().map(|s| s.to_string()).collect();
        }
        self
    }
}

/// Per-cache settings handed to the cache constructor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// Kinds the cache may stage and the reconciler will sweep.
    pub possible: BTreeSet<ResourceKind>,
    /// Kinds the reconciler never deletes.
    pub protected: BTreeSet<ResourceKind>,
    pub options: Options,
}

impl CacheConfig {
    pub fn new(options: Options) -> Self {
        Self { possible: BTreeSet::new(), protected: BTreeSet::new(), options: options.normalized() }
    }

    pub fn with_possible(mut self, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        self.possible.extend(kinds);
        self
    }

    pub fn with_protected(mut self, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        self.protected.extend(kinds);
        self
    }

    /// Add protected kinds listed in `STAGEHAND_PROTECTED_KINDS`. Unparseable keys are logged and skipped.
    pub fn with_protected_env(self) -> Self {
        let kinds = env_list("STAGEHAND_PROTECTED_KINDS")
            .unwrap_or_default()
            .into_iter()
            .filter_map(|key| match ResourceKind::parse(&key) {
                Ok(k) => Some(k),
                Err(e) => {
                    warn!(error = %e, "ignoring protected kind");
                    None
                }
            })
            .collect::<Vec<_>>();
        self.with_protected(kinds)
    }

    pub fn is_protected(&self, kind: &ResourceKind) -> bool {
        self.protected.contains(kind)
    }
}
