//! Remote API abstraction.

use crate::entity::{Entity, EntityId};
use thiserror::Error;

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The server could not be reached.
    #[error("network unavailable: {0}")]
    Network(String),

    /// The call did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The server failed (5xx).
    #[error("server error (status {status})")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The base version did not match the server's current version.
    #[error("version conflict: {message}")]
    Conflict {
        /// Server-provided detail.
        message: String,
    },

    /// The entity does not exist on the server.
    #[error("entity not found")]
    NotFound,

    /// The caller does not own the entity.
    #[error("forbidden")]
    Forbidden,

    /// The credential was missing or rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// Any other client error (4xx).
    #[error("request rejected (status {status})")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RemoteError {
    /// Returns true if the operation should stay queued and be retried on a
    /// later pass.
    ///
    /// Only a conflict (resolved by adopting the server copy) and a missing
    /// entity (the target is gone) are terminal.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, RemoteError::Conflict { .. } | RemoteError::NotFound)
    }
}

/// Parameters of a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Number of items to skip.
    pub skip: u64,
    /// Page size. `None` lets the server pick.
    pub limit: Option<u64>,
    /// Free-text search.
    pub q: Option<String>,
    /// Server-defined filter expression.
    pub filter: Option<String>,
}

impl ListQuery {
    /// Creates a query for one page.
    #[must_use]
    pub fn page(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Sets the free-text search.
    #[must_use]
    pub fn with_search(mut self, q: impl Into<String>) -> Self {
        self.q = Some(q.into());
        self
    }

    /// Sets the filter expression.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// One page of a list response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Entities in this page.
    pub items: Vec<Entity>,
    /// Total number of matching entities on the server.
    pub total: u64,
}

/// The server's REST surface, as consumed by the sync engine.
///
/// Every call carries the session's bearer token. Implementations block
/// the calling thread; the engine runs them on a blocking worker.
///
/// There is deliberately no delete call: local deletes are not propagated.
pub trait RemoteApi: Send + Sync {
    /// Creates an entity. The server assigns id and version 1.
    fn create(&self, token: &str, entity: &Entity) -> RemoteResult<Entity>;

    /// Replaces an entity if its current version equals `base_version`.
    fn update(
        &self,
        token: &str,
        id: &EntityId,
        entity: &Entity,
        base_version: u64,
    ) -> RemoteResult<Entity>;

    /// Fetches the authoritative copy of an entity.
    fn read(&self, token: &str, id: &EntityId) -> RemoteResult<Entity>;

    /// Lists entities visible to the caller.
    fn list(&self, token: &str, query: &ListQuery) -> RemoteResult<Page>;
}

impl<T: RemoteApi + ?Sized> RemoteApi for std::sync::Arc<T> {
    fn create(&self, token: &str, entity: &Entity) -> RemoteResult<Entity> {
        (**self).create(token, entity)
    }

    fn update(
        &self,
        token: &str,
        id: &EntityId,
        entity: &Entity,
        base_version: u64,
    ) -> RemoteResult<Entity> {
        (**self).update(token, id, entity, base_version)
    }

    fn read(&self, token: &str, id: &EntityId) -> RemoteResult<Entity> {
        (**self).read(token, id)
    }

    fn list(&self, token: &str, query: &ListQuery) -> RemoteResult<Page> {
        (**self).list(token, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RemoteError::Network("refused".into()).is_transient());
        assert!(RemoteError::Timeout.is_transient());
        assert!(RemoteError::Server { status: 503 }.is_transient());
        assert!(RemoteError::Forbidden.is_transient());
        assert!(RemoteError::Unauthorized.is_transient());
        assert!(RemoteError::Rejected { status: 422 }.is_transient());
        assert!(RemoteError::Malformed("eof".into()).is_transient());
        assert!(!RemoteError::NotFound.is_transient());
        assert!(!RemoteError::Conflict {
            message: "stale".into()
        }
        .is_transient());
    }

    #[test]
    fn list_query_builder() {
        let query = ListQuery::page(20, 10).with_search("half").with_filter("cracked");
        assert_eq!(query.skip, 20);
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.q.as_deref(), Some("half"));
        assert_eq!(query.filter.as_deref(), Some("cracked"));
    }

    #[test]
    fn error_display() {
        assert_eq!(
            RemoteError::Server { status: 502 }.to_string(),
            "server error (status 502)"
        );
        assert_eq!(RemoteError::NotFound.to_string(), "entity not found");
    }
}
