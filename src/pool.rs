use rusqlite::{params, Row, ToSql};
use std::collections::HashSet;
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::filter::PracticeFilter;
use crate::models::{PoolChoice, PoolQuestion, Section};

/// Assembles practice pools from the local mirror.
pub struct PoolBuilder<'a> {
    db: &'a Database,
}

impl<'a> PoolBuilder<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Questions matching `filter`, choices merged in position order. An
    /// empty pool is a valid answer; the filter is never widened.
    pub fn build(&self, filter: &PracticeFilter) -> Result<Vec<PoolQuestion>> {
        self.build_many(std::slice::from_ref(filter))
    }

    /// Union of several filters (e.g. one per kind for a whole paper), each
    /// question appearing once.
    pub fn build_many(&self, filters: &[PracticeFilter]) -> Result<Vec<PoolQuestion>> {
        let mut seen = HashSet::new();
        let mut pool = Vec::new();

        for filter in filters {
            for question in self.query_filter(filter)? {
                if seen.insert((question.exam_key.clone(), question.question_number)) {
                    pool.push(question);
                }
            }
        }

        pool.sort_by(|a, b| {
            a.exam_key
                .cmp(&b.exam_key)
                .then(a.question_number.cmp(&b.question_number))
        });
        debug!(filters = filters.len(), size = pool.len(), "built pool");
        Ok(pool)
    }

    fn query_filter(&self, filter: &PracticeFilter) -> Result<Vec<PoolQuestion>> {
        let sections = filter.kind.sections();
        if sections.is_empty() {
            debug!(%filter, "kind has no practicable sections");
            return Ok(Vec::new());
        }

        let levels = filter.levels.levels();
        let mut clauses = Vec::new();
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        clauses.push(format!("e.level IN ({})", placeholders(params_vec.len(), levels.len())));
        for level in &levels {
            params_vec.push(Box::new(level.as_str()));
        }

        clauses.push(format!(
            "q.section IN ({})",
            placeholders(params_vec.len(), sections.len())
        ));
        for section in sections {
            params_vec.push(Box::new(section.as_str()));
        }

        if let Some(year) = filter.year {
            params_vec.push(Box::new(year));
            clauses.push(format!("e.year = ?{}", params_vec.len()));
        }
        if let Some(month) = filter.month {
            params_vec.push(Box::new(month.as_str()));
            clauses.push(format!("e.month = ?{}", params_vec.len()));
        }

        let query = format!(
            r#"
            SELECT q.exam_key, q.question_number, q.section, q.stem, q.passage,
                   c.position, c.content, c.is_correct, c.explanation
            FROM questions q
            JOIN exams e ON e.exam_key = q.exam_key
            JOIN choices c ON c.exam_key = q.exam_key AND c.question_number = q.question_number
            WHERE {}
            ORDER BY q.exam_key, q.question_number, c.position
            "#,
            clauses.join(" AND ")
        );

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let rows = self.db.query(&query, params_refs.as_slice(), JoinedRow::from_row)?;
        let pool = merge_rows(rows);
        debug!(%filter, size = pool.len(), "filter resolved");
        Ok(pool)
    }

    /// Every question of one daily set, by question number.
    pub fn daily(&self, daily_key: &str) -> Result<Vec<PoolQuestion>> {
        let rows = self.db.query(
            r#"
            SELECT q.daily_key, q.question_number, q.section, q.stem, q.passage,
                   c.position, c.content, c.is_correct, c.explanation
            FROM daily_questions q
            JOIN daily_choices c ON c.daily_key = q.daily_key AND c.question_number = q.question_number
            WHERE q.daily_key = ?1
            ORDER BY q.question_number, c.position
            "#,
            params![daily_key],
            JoinedRow::from_row,
        )?;
        let pool = merge_rows(rows);
        debug!(daily_key, size = pool.len(), "built daily pool");
        Ok(pool)
    }

    /// Recently missed questions, newest miss first, each at most once.
    /// Misses whose question has since left the mirror are skipped.
    pub fn mistakes(&self, limit: usize) -> Result<Vec<PoolQuestion>> {
        let missed: Vec<(String, i64)> = self.db.query(
            r#"
            SELECT source_key, question_number
            FROM mistakes
            GROUP BY source_key, question_number
            ORDER BY MAX(id) DESC
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut pool = Vec::new();
        for (key, number) in missed {
            if pool.len() >= limit {
                break;
            }
            if let Some(question) = self.lookup(&key, number)? {
                pool.push(question);
            }
        }
        debug!(size = pool.len(), "built mistake pool");
        Ok(pool)
    }

    fn lookup(&self, key: &str, number: i64) -> Result<Option<PoolQuestion>> {
        let exam_rows = self.db.query(
            r#"
            SELECT q.exam_key, q.question_number, q.section, q.stem, q.passage,
                   c.position, c.content, c.is_correct, c.explanation
            FROM questions q
            JOIN choices c ON c.exam_key = q.exam_key AND c.question_number = q.question_number
            WHERE q.exam_key = ?1 AND q.question_number = ?2
            ORDER BY c.position
            "#,
            params![key, number],
            JoinedRow::from_row,
        )?;
        if let Some(question) = merge_rows(exam_rows).pop() {
            return Ok(Some(question));
        }

        let daily_rows = self.db.query(
            r#"
            SELECT q.daily_key, q.question_number, q.section, q.stem, q.passage,
                   c.position, c.content, c.is_correct, c.explanation
            FROM daily_questions q
            JOIN daily_choices c ON c.daily_key = q.daily_key AND c.question_number = q.question_number
            WHERE q.daily_key = ?1 AND q.question_number = ?2
            ORDER BY c.position
            "#,
            params![key, number],
            JoinedRow::from_row,
        )?;
        Ok(merge_rows(daily_rows).pop())
    }
}

fn placeholders(offset: usize, count: usize) -> String {
    (offset + 1..=offset + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

// One question/choice pair from the join
struct JoinedRow {
    key: String,
    question_number: i64,
    section: Option<Section>,
    stem: String,
    passage: Option<String>,
    choice: PoolChoice,
}

impl JoinedRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let section: String = row.get(2)?;
        Ok(Self {
            key: row.get(0)?,
            question_number: row.get(1)?,
            section: Section::from_str(&section),
            stem: row.get(3)?,
            passage: row.get(4)?,
            choice: PoolChoice {
                position: row.get(5)?,
                content: row.get(6)?,
                is_correct: row.get(7)?,
                explanation: row.get(8)?,
            },
        })
    }
}

// Rows arrive grouped by question, so consecutive rows fold into one entry
fn merge_rows(rows: Vec<JoinedRow>) -> Vec<PoolQuestion> {
    let mut pool: Vec<PoolQuestion> = Vec::new();
    for row in rows {
        let Some(section) = row.section else {
            continue;
        };
        let continues_last = pool.last().is_some_and(|last| {
            last.exam_key == row.key && last.question_number == row.question_number
        });

        if let (true, Some(last)) = (continues_last, pool.last_mut()) {
            last.choices.push(row.choice);
            continue;
        }
        pool.push(PoolQuestion {
            exam_key: row.key,
            question_number: row.question_number,
            section,
            stem: row.stem,
            passage: row.passage,
            choices: vec![row.choice],
        });
    }
    pool
}
