//! Natural key parsing and the browsable exam/daily catalog.

use rusqlite::params;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::models::{Level, Month};

/// Parsed form of an exam key, `LEVEL-YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExamKey {
    pub level: Level,
    pub year: i32,
    pub month: Month,
}

impl ExamKey {
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.trim().split('-');
        let (level, year, month) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || year.len() != 4 || month.len() != 2 {
            return None;
        }
        if !level.to_uppercase().starts_with('N') {
            return None;
        }

        Some(Self {
            level: Level::from_str(level)?,
            year: year.parse().ok()?,
            month: Month::from_str(month)?,
        })
    }

    pub fn format(&self) -> String {
        format!("{}-{}-{}", self.level.as_str(), self.year, self.month.as_str())
    }
}

/// Parsed form of a daily key, `LEVEL-CATEGORY-NNNN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyKey {
    pub level: Level,
    pub category: String,
    pub index: u32,
}

impl DailyKey {
    /// Builds the key for a set scheduled on `day` (1..=7) of `week` (1-based).
    pub fn derive(level: Level, category: &str, week: i64, day: i64) -> Option<Self> {
        if week < 1 || !(1..=7).contains(&day) || category.trim().is_empty() {
            return None;
        }
        let index = u32::try_from((week - 1) * 7 + day).ok()?;
        if index > 9999 {
            return None;
        }
        Some(Self {
            level,
            category: category.trim().to_uppercase(),
            index,
        })
    }

    pub fn parse(key: &str) -> Option<Self> {
        let (head, index) = key.trim().rsplit_once('-')?;
        let (level, category) = head.split_once('-')?;
        if index.len() != 4 || category.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            level: Level::from_str(level)?,
            category: category.to_uppercase(),
            index: index.parse().ok()?,
        })
    }

    pub fn format(&self) -> String {
        format!("{}-{}-{:04}", self.level.as_str(), self.category, self.index)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Sitting {
    pub month: Month,
    pub exam_key: String,
    pub title: String,
    pub question_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearGroup {
    pub year: i32,
    pub sittings: Vec<Sitting>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelGroup {
    pub level: Level,
    pub years: Vec<YearGroup>,
}

/// Exams grouped by level, then year (newest first), then sitting. Groupings
/// come from the key; rows whose key does not parse are left out.
pub fn exam_catalog(db: &Database) -> Result<Vec<LevelGroup>> {
    let rows: Vec<(String, String, i64)> = db.query(
        r#"
        SELECT e.exam_key, e.title, COUNT(q.question_number)
        FROM exams e
        LEFT JOIN questions q ON q.exam_key = e.exam_key
        GROUP BY e.exam_key, e.title
        ORDER BY e.exam_key
        "#,
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let mut grouped: BTreeMap<Level, BTreeMap<i32, Vec<Sitting>>> = BTreeMap::new();
    for (exam_key, title, question_count) in rows {
        let Some(parsed) = ExamKey::parse(&exam_key) else {
            debug!(exam_key = %exam_key, "skipping exam with malformed key");
            continue;
        };
        grouped
            .entry(parsed.level)
            .or_default()
            .entry(parsed.year)
            .or_default()
            .push(Sitting {
                month: parsed.month,
                exam_key,
                title,
                question_count,
            });
    }

    Ok(grouped
        .into_iter()
        .map(|(level, years)| LevelGroup {
            level,
            years: years
                .into_iter()
                .rev()
                .map(|(year, mut sittings)| {
                    sittings.sort_by_key(|s| s.month);
                    YearGroup { year, sittings }
                })
                .collect(),
        })
        .collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct DailySetSummary {
    pub daily_key: String,
    pub level: String,
    pub category: String,
    pub week: i64,
    pub day: i64,
    pub title: String,
    pub question_count: i64,
}

pub fn list_daily_sets(db: &Database, level: Option<Level>) -> Result<Vec<DailySetSummary>> {
    let level_filter = level.map(|l| l.as_str());
    db.query(
        r#"
        SELECT d.daily_key, d.level, d.category, d.week, d.day, d.title,
               COUNT(q.question_number)
        FROM daily_sets d
        LEFT JOIN daily_questions q ON q.daily_key = d.daily_key
        WHERE ?1 IS NULL OR d.level = ?1
        GROUP BY d.daily_key
        ORDER BY d.level, d.category, d.week, d.day
        "#,
        params![level_filter],
        |row| {
            Ok(DailySetSummary {
                daily_key: row.get(0)?,
                level: row.get(1)?,
                category: row.get(2)?,
                week: row.get(3)?,
                day: row.get(4)?,
                title: row.get(5)?,
                question_count: row.get(6)?,
            })
        },
    )
}
