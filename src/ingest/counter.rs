use std::sync::atomic::{AtomicI64, Ordering};

use crate::db::Database;
use crate::error::DbError;

/// Hands out synthetic annotation identifiers for one load run.
///
/// Each file claims a contiguous block with a single fetch-add, so blocks
/// never overlap no matter how many workers claim at once.
#[derive(Debug)]
pub struct AnnotationCounter {
    next: AtomicI64,
}

impl AnnotationCounter {
    pub fn new(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }

    /// Start after the largest identifier already in `table`, or at 0.
    pub fn seeded(db: &Database, table: &str, column: &str) -> Result<Self, DbError> {
        let start = db.max_integer(table, column)?.map(|max| max + 1).unwrap_or(0);
        tracing::debug!("Annotation ids for {} start at {}", table, start);
        Ok(Self::new(start))
    }

    /// Reserve `n` identifiers; returns the first.
    pub fn claim(&self, n: usize) -> i64 {
        self.next.fetch_add(n as i64, Ordering::SeqCst)
    }

    /// The identifier the next claim will start at.
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }
}
