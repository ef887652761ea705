//! Error types for `folk-core`.

use thiserror::Error;

use crate::{
  department::DepartmentId, membership::RoleId, principal::PrincipalId,
  query::QueryId,
};

#[derive(Debug, Error)]
pub enum Error {
  #[error("department not found: {0}")]
  DepartmentNotFound(DepartmentId),

  #[error("principal not found: {0}")]
  PrincipalNotFound(PrincipalId),

  #[error("query not found: {0}")]
  QueryNotFound(QueryId),

  #[error("role not found: {0}")]
  RoleNotFound(RoleId),

  #[error("moving department {id} under {parent} would create a cycle")]
  Cycle {
    id:     DepartmentId,
    parent: DepartmentId,
  },

  #[error("department {0} still has child departments")]
  HasChildren(DepartmentId),

  #[error("unknown permission: {0:?}")]
  UnknownPermission(String),

  #[error("invalid filter: {0}")]
  InvalidFilter(String),

  #[error("invalid sort: {0}")]
  InvalidSort(String),

  #[error("invalid group-by field: {0:?}")]
  InvalidGroupBy(String),

  #[error("invalid column: {0:?}")]
  InvalidColumn(String),

  #[error("invalid record: {0}")]
  InvalidRecord(String),

  #[error("unauthorized")]
  Unauthorized,

  #[error("conflict: {0}")]
  Conflict(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Lift a backend's error; used as `.map_err(Error::from_store)`.
  pub fn from_store<E: Into<Error>>(e: E) -> Self { e.into() }

  /// Malformed caller input; the caller may fix it and retry.
  pub fn is_validation(&self) -> bool {
    matches!(
      self,
      Self::UnknownPermission(_)
        | Self::InvalidFilter(_)
        | Self::InvalidSort(_)
        | Self::InvalidGroupBy(_)
        | Self::InvalidColumn(_)
        | Self::InvalidRecord(_)
    )
  }

  pub fn is_not_found(&self) -> bool {
    matches!(
      self,
      Self::DepartmentNotFound(_)
        | Self::PrincipalNotFound(_)
        | Self::QueryNotFound(_)
        | Self::RoleNotFound(_)
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
