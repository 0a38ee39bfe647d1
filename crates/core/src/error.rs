use crate::{InstanceKey, ResourceKind};

/// Errors returned by cache operations. Backing-store failures pass through untouched.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("kind [{0}] has not been added to the possible kinds of this cache")]
    UnregisteredKind(ResourceKind),
    #[error("type [{0}] is not registered in the scheme")]
    UnknownType(&'static str),
    #[error("identifier kind [{expected}] does not match object kind [{actual}] for [{key}]")]
    TypeMismatch { expected: ResourceKind, actual: ResourceKind, key: InstanceKey },
    #[error("cannot create: identifier [{ident}] already has an item named [{key}]")]
    DuplicateEntry { ident: String, key: InstanceKey },
    #[error("nothing staged for identifier [{0}]")]
    CacheMiss(String),
    #[error("[{key}] was never created under identifier [{ident}]")]
    EntryNotFound { ident: String, key: InstanceKey },
    #[error("identifier [{0}] holds many items; an instance key is required, or use list")]
    InstanceKeyRequired(String),
    #[error("list needs a multi identifier, [{0}] is single")]
    NotMulti(String),
    #[error("converting cached [{from}] into [{into}]: {reason}")]
    Conversion { from: ResourceKind, into: String, reason: String },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    /// True when the error came from the backing store rather than cache validation.
    pub fn is_store(&self) -> bool {
        matches!(self, CacheError::Store(_))
    }
}
