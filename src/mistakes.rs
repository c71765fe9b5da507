use chrono::Utc;
use rusqlite::params;
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::models::Mistake;

/// Append-only history of incorrect submissions. Repeated misses on the same
/// question are kept as separate rows.
pub struct MistakeLog<'a> {
    db: &'a Database,
}

impl<'a> MistakeLog<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn record(
        &self,
        source_key: &str,
        question_number: i64,
        picked_position: i64,
    ) -> Result<i64> {
        self.db.execute(
            r#"
            INSERT INTO mistakes (created_at, source_key, question_number, picked_position)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![Utc::now().to_rfc3339(), source_key, question_number, picked_position],
        )?;
        let id = self.db.last_insert_rowid();
        debug!(id, source_key, question_number, picked_position, "mistake recorded");
        Ok(id)
    }

    /// All rows, most recent first.
    pub fn list(&self) -> Result<Vec<Mistake>> {
        self.db.query(
            r#"
            SELECT id, created_at, source_key, question_number, picked_position
            FROM mistakes
            ORDER BY id DESC
            "#,
            [],
            |row| {
                Ok(Mistake {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    source_key: row.get(2)?,
                    question_number: row.get(3)?,
                    picked_position: row.get(4)?,
                })
            },
        )
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = self.db.execute("DELETE FROM mistakes", [])?;
        debug!(removed, "mistake log cleared");
        Ok(removed)
    }

    pub fn count(&self) -> Result<i64> {
        Ok(self
            .db
            .query_row("SELECT COUNT(*) FROM mistakes", [], |row| row.get(0))?
            .unwrap_or(0))
    }
}
