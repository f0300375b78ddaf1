use std::io;

use serde::Serialize;

/// Counts returned by a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub imported: usize,
    pub enriched: usize,
}

/// Errors emitted by the reconciliation pipeline. Parse failures are not
/// errors; malformed lines and dates are skipped where they occur.
#[derive(Debug)]
pub enum ReconcileError {
    Io(io::Error),
    Db(plexback_db::DbError),
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {}", err),
            Self::Db(err) => write!(f, "db error: {}", err),
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<io::Error> for ReconcileError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<plexback_db::DbError> for ReconcileError {
    fn from(err: plexback_db::DbError) -> Self {
        Self::Db(err)
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
