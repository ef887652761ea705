//! Error type for `folk-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] folk_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A stored enum value this build does not recognise.
  #[error("cannot decode {column}: {value:?}")]
  Decode {
    column: &'static str,
    value:  String,
  },
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self { Self::Database(e.into()) }
}

// Domain errors raised inside the store surface unchanged; everything else
// is wrapped as an opaque store failure.
impl From<Error> for folk_core::Error {
  fn from(e: Error) -> Self {
    match e {
      Error::Core(core) => core,
      other => folk_core::Error::Store(Box::new(other)),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
