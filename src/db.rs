use rusqlite::{Connection, Params, Row};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (creating if absent) the store and turns on foreign key enforcement.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS exams (
                exam_key TEXT PRIMARY KEY,
                level TEXT NOT NULL,
                year INTEGER NOT NULL,
                month TEXT NOT NULL CHECK(month IN ('07', '12')),
                title TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS questions (
                exam_key TEXT NOT NULL,
                question_number INTEGER NOT NULL,
                section TEXT NOT NULL CHECK(section IN ('vocabulary', 'grammar', 'reading', 'listening')),
                stem TEXT NOT NULL,
                passage TEXT,
                PRIMARY KEY (exam_key, question_number),
                FOREIGN KEY (exam_key) REFERENCES exams(exam_key) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS choices (
                exam_key TEXT NOT NULL,
                question_number INTEGER NOT NULL,
                position INTEGER NOT NULL,
                content TEXT NOT NULL,
                is_correct INTEGER NOT NULL DEFAULT 0 CHECK(is_correct IN (0, 1)),
                explanation TEXT,
                PRIMARY KEY (exam_key, question_number, position),
                FOREIGN KEY (exam_key, question_number)
                    REFERENCES questions(exam_key, question_number) ON DELETE CASCADE
            );

            -- Daily micro-lesson sets mirror the exam hierarchy
            CREATE TABLE IF NOT EXISTS daily_sets (
                daily_key TEXT PRIMARY KEY,
                level TEXT NOT NULL,
                category TEXT NOT NULL,
                week INTEGER NOT NULL,
                day INTEGER NOT NULL,
                title TEXT NOT NULL DEFAULT ''
            );

            CREATE TABLE IF NOT EXISTS daily_questions (
                daily_key TEXT NOT NULL,
                question_number INTEGER NOT NULL,
                section TEXT NOT NULL CHECK(section IN ('vocabulary', 'grammar', 'reading', 'listening')),
                stem TEXT NOT NULL,
                passage TEXT,
                PRIMARY KEY (daily_key, question_number),
                FOREIGN KEY (daily_key) REFERENCES daily_sets(daily_key) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS daily_choices (
                daily_key TEXT NOT NULL,
                question_number INTEGER NOT NULL,
                position INTEGER NOT NULL,
                content TEXT NOT NULL,
                is_correct INTEGER NOT NULL DEFAULT 0 CHECK(is_correct IN (0, 1)),
                explanation TEXT,
                PRIMARY KEY (daily_key, question_number, position),
                FOREIGN KEY (daily_key, question_number)
                    REFERENCES daily_questions(daily_key, question_number) ON DELETE CASCADE
            );

            -- Append-only; no foreign key so history outlives re-syncs
            CREATE TABLE IF NOT EXISTS mistakes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                source_key TEXT NOT NULL,
                question_number INTEGER NOT NULL,
                picked_position INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_exams_level_year_month ON exams(level, year, month);
            CREATE INDEX IF NOT EXISTS idx_questions_section ON questions(section);
            CREATE INDEX IF NOT EXISTS idx_daily_sets_level ON daily_sets(level);
            CREATE INDEX IF NOT EXISTS idx_mistakes_source ON mistakes(source_key, question_number);
            "#,
        )?;
        debug!("schema ready");
        Ok(())
    }

    pub fn query<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, f)?;
        let items = rows.collect::<rusqlite::Result<Vec<T>>>()?;
        Ok(items)
    }

    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> Result<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        match self.conn.query_row(sql, params, f) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Runs `f` inside one transaction. `Ok` commits; `Err` rolls back every
    /// statement `f` issued.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }

    pub fn table_counts(&self) -> Result<TableCounts> {
        let count = |table: &str| -> Result<i64> {
            let sql = format!("SELECT COUNT(*) FROM {}", table);
            Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
        };

        Ok(TableCounts {
            exams: count("exams")?,
            questions: count("questions")?,
            choices: count("choices")?,
            daily_sets: count("daily_sets")?,
            daily_questions: count("daily_questions")?,
            daily_choices: count("daily_choices")?,
            mistakes: count("mistakes")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    pub exams: i64,
    pub questions: i64,
    pub choices: i64,
    pub daily_sets: i64,
    pub daily_questions: i64,
    pub daily_choices: i64,
    pub mistakes: i64,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use rusqlite::params;

    pub fn setup_db() -> Database {
        let db = Database::open(":memory:").expect("Failed to create in-memory database");
        db.init().expect("Failed to initialize database");
        db
    }

    pub fn insert_exam(db: &Database, key: &str, level: &str, year: i32, month: &str) {
        db.execute(
            "INSERT INTO exams (exam_key, level, year, month, title) VALUES (?1, ?2, ?3, ?4, ?1)",
            params![key, level, year, month],
        )
        .unwrap();
    }

    /// Inserts a question with four choices; `correct` is the right position.
    pub fn insert_question(db: &Database, key: &str, number: i64, section: &str, correct: i64) {
        db.execute(
            "INSERT INTO questions (exam_key, question_number, section, stem) VALUES (?1, ?2, ?3, ?4)",
            params![key, number, section, format!("{} q{}", key, number)],
        )
        .unwrap();
        for position in 1..=4 {
            db.execute(
                "INSERT INTO choices (exam_key, question_number, position, content, is_correct)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key,
                    number,
                    position,
                    format!("option {}", position),
                    position == correct
                ],
            )
            .unwrap();
        }
    }

    pub fn insert_daily_set(db: &Database, key: &str, level: &str, category: &str) {
        db.execute(
            "INSERT INTO daily_sets (daily_key, level, category, week, day, title)
             VALUES (?1, ?2, ?3, 1, 1, ?1)",
            params![key, level, category],
        )
        .unwrap();
    }

    pub fn insert_daily_question(db: &Database, key: &str, number: i64, correct: i64) {
        db.execute(
            "INSERT INTO daily_questions (daily_key, question_number, section, stem)
             VALUES (?1, ?2, 'vocabulary', ?3)",
            params![key, number, format!("{} q{}", key, number)],
        )
        .unwrap();
        for position in 1..=4 {
            db.execute(
                "INSERT INTO daily_choices (daily_key, question_number, position, content, is_correct)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key, number, position, format!("option {}", position), position == correct],
            )
            .unwrap();
        }
    }

    /// The N3 July 2022 paper: two vocabulary and two grammar questions.
    pub fn seed_n3_2022_07(db: &Database) {
        insert_exam(db, "N3-2022-07", "N3", 2022, "07");
        insert_question(db, "N3-2022-07", 1, "vocabulary", 1);
        insert_question(db, "N3-2022-07", 2, "vocabulary", 2);
        insert_question(db, "N3-2022-07", 3, "grammar", 3);
        insert_question(db, "N3-2022-07", 4, "grammar", 4);
    }
}
