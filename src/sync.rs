//! Mirrors the remote question bank into the local store.
//!
//! The remote source is authoritative. A run fetches all six tables, checks
//! them, then replaces the local copies inside a single transaction: either
//! every table matches the snapshot afterwards or nothing changed.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::catalog::{DailyKey, ExamKey};
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::filter::Loose;
use crate::models::{Level, Month, Section};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteExam {
    pub exam_key: String,
    pub level: String,
    #[serde(deserialize_with = "de_int")]
    pub year: i64,
    #[serde(deserialize_with = "de_month")]
    pub month: Month,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteQuestion {
    pub exam_key: String,
    #[serde(deserialize_with = "de_int")]
    pub question_number: i64,
    pub section: String,
    pub stem: String,
    #[serde(default)]
    pub passage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChoice {
    pub exam_key: String,
    #[serde(deserialize_with = "de_int")]
    pub question_number: i64,
    #[serde(deserialize_with = "de_int")]
    pub position: i64,
    pub content: String,
    #[serde(deserialize_with = "de_flag")]
    pub is_correct: bool,
    #[serde(default)]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDailySet {
    /// Derived from level/category/week/day when the remote leaves it out.
    #[serde(default)]
    pub daily_key: Option<String>,
    pub level: String,
    pub category: String,
    #[serde(deserialize_with = "de_int")]
    pub week: i64,
    #[serde(deserialize_with = "de_int")]
    pub day: i64,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDailyQuestion {
    pub daily_key: String,
    #[serde(deserialize_with = "de_int")]
    pub question_number: i64,
    pub section: String,
    pub stem: String,
    #[serde(default)]
    pub passage: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteDailyChoice {
    pub daily_key: String,
    #[serde(deserialize_with = "de_int")]
    pub question_number: i64,
    #[serde(deserialize_with = "de_int")]
    pub position: i64,
    pub content: String,
    #[serde(deserialize_with = "de_flag")]
    pub is_correct: bool,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Full contents of the six remote tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub exams: Vec<RemoteExam>,
    pub questions: Vec<RemoteQuestion>,
    pub choices: Vec<RemoteChoice>,
    pub daily_sets: Vec<RemoteDailySet>,
    pub daily_questions: Vec<RemoteDailyQuestion>,
    pub daily_choices: Vec<RemoteDailyChoice>,
}

fn de_int<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
    match Loose::deserialize(d)? {
        Loose::Number(n) => Ok(n),
        Loose::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected integer, got '{}'", s))),
    }
}

fn de_month<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Month, D::Error> {
    let raw = Loose::deserialize(d)?;
    let month = match &raw {
        Loose::Number(n) => Month::from_number(*n),
        Loose::Text(s) => Month::from_str(s),
    };
    month.ok_or_else(|| serde::de::Error::custom(format!("unsupported month {:?}", raw)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Number(i64),
    Text(String),
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    match Flag::deserialize(d)? {
        Flag::Bool(b) => Ok(b),
        Flag::Number(0) => Ok(false),
        Flag::Number(1) => Ok(true),
        Flag::Text(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!("expected flag, got '{}'", other))),
        },
        Flag::Number(n) => Err(serde::de::Error::custom(format!("expected 0 or 1, got {}", n))),
    }
}

pub trait RemoteSource {
    /// Fetches and decodes every table before returning.
    fn fetch_snapshot(&self) -> Result<Snapshot>;

    fn describe(&self) -> String;
}

/// Remote bank over HTTP: `GET {base_url}/{table}` returns a JSON array.
pub struct HttpSource {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shiken/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Http(format!("build client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn fetch_table<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.base_url, table);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| AppError::Http(format!("{}: {}", table, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Http(format!("{}: HTTP {}", table, response.status())));
        }

        let body = response
            .text()
            .map_err(|e| AppError::Http(format!("{}: {}", table, e)))?;
        serde_json::from_str(&body)
            .map_err(|e| AppError::MalformedSnapshot(format!("{}: {}", table, e)))
    }
}

impl RemoteSource for HttpSource {
    fn fetch_snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            exams: self.fetch_table("exams")?,
            questions: self.fetch_table("questions")?,
            choices: self.fetch_table("choices")?,
            daily_sets: self.fetch_table("daily_sets")?,
            daily_questions: self.fetch_table("daily_questions")?,
            daily_choices: self.fetch_table("daily_choices")?,
        })
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

/// A snapshot exported as one JSON document keyed by table name.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RemoteSource for FileSource {
    fn fetch_snapshot(&self) -> Result<Snapshot> {
        let raw = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&raw)
            .map_err(|e| AppError::MalformedSnapshot(format!("{}: {}", self.path.display(), e)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A question left out of the mirror because it cannot be practiced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejected {
    pub key: String,
    pub question_number: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub exams: usize,
    pub questions: usize,
    pub choices: usize,
    pub daily_sets: usize,
    pub daily_questions: usize,
    pub daily_choices: usize,
    pub rejected: Vec<Rejected>,
    pub synced_at: String,
}

impl SyncReport {
    fn empty() -> Self {
        Self {
            exams: 0,
            questions: 0,
            choices: 0,
            daily_sets: 0,
            daily_questions: 0,
            daily_choices: 0,
            rejected: Vec::new(),
            synced_at: Utc::now().to_rfc3339(),
        }
    }
}

pub struct Synchronizer<'a> {
    db: &'a Database,
}

impl<'a> Synchronizer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Runs a sync and reports only whether it succeeded. On failure the
    /// previous mirror is untouched and still usable.
    pub fn sync(&self, source: &dyn RemoteSource) -> bool {
        match self.run(source) {
            Ok(_) => true,
            Err(e) => {
                warn!(source = %source.describe(), error = %e, "sync failed, keeping cached bank");
                false
            }
        }
    }

    /// Not re-entrant: callers must not overlap two runs on the same store.
    pub fn run(&self, source: &dyn RemoteSource) -> Result<SyncReport> {
        let snapshot = source.fetch_snapshot()?;
        let exam_levels = resolve_exam_levels(&snapshot.exams)?;
        let daily_keys = resolve_daily_keys(&snapshot.daily_sets)?;

        let rejected_exam = rejected_questions(
            snapshot
                .questions
                .iter()
                .map(|q| (q.exam_key.as_str(), q.question_number, q.section.as_str())),
            snapshot
                .choices
                .iter()
                .map(|c| (c.exam_key.as_str(), c.question_number, c.is_correct)),
        );
        let rejected_daily = rejected_questions(
            snapshot
                .daily_questions
                .iter()
                .map(|q| (q.daily_key.as_str(), q.question_number, q.section.as_str())),
            snapshot
                .daily_choices
                .iter()
                .map(|c| (c.daily_key.as_str(), c.question_number, c.is_correct)),
        );

        for r in rejected_exam.iter().chain(rejected_daily.iter()) {
            warn!(
                key = %r.key,
                question_number = r.question_number,
                reason = %r.reason,
                "rejecting question"
            );
        }

        let skip_exam: HashSet<(&str, i64)> = rejected_exam
            .iter()
            .map(|r| (r.key.as_str(), r.question_number))
            .collect();
        let skip_daily: HashSet<(&str, i64)> = rejected_daily
            .iter()
            .map(|r| (r.key.as_str(), r.question_number))
            .collect();

        let mut report = self.db.with_transaction(|conn| {
            let mut report = SyncReport::empty();
            clear_mirror(conn)?;
            write_exams(conn, &snapshot, &exam_levels, &skip_exam, &mut report)?;
            write_daily(conn, &snapshot, &daily_keys, &skip_daily, &mut report)?;
            Ok(report)
        })?;

        report.rejected = rejected_exam.into_iter().chain(rejected_daily).collect();
        info!(
            source = %source.describe(),
            exams = report.exams,
            questions = report.questions,
            daily_sets = report.daily_sets,
            daily_questions = report.daily_questions,
            rejected = report.rejected.len(),
            "sync complete"
        );
        Ok(report)
    }
}

fn unknown_level(what: &str, key: &str, level: &str) -> AppError {
    AppError::MalformedSnapshot(format!("{} {} has unknown level '{}'", what, key, level))
}

// Every exam names one of the five grades; a well-formed key must agree with its columns
fn resolve_exam_levels(exams: &[RemoteExam]) -> Result<Vec<Level>> {
    exams
        .iter()
        .map(|exam| {
            let level = Level::from_str(&exam.level)
                .ok_or_else(|| unknown_level("exam", &exam.exam_key, &exam.level))?;
            let Some(parsed) = ExamKey::parse(&exam.exam_key) else {
                return Ok(level);
            };
            let columns = i32::try_from(exam.year).ok().map(|year| ExamKey {
                level,
                year,
                month: exam.month,
            });
            if columns != Some(parsed) {
                return Err(AppError::MalformedSnapshot(format!(
                    "exam key {} disagrees with its columns ({} {} {})",
                    parsed.format(),
                    level.as_str(),
                    exam.year,
                    exam.month.as_str()
                )));
            }
            Ok(level)
        })
        .collect()
}

fn resolve_daily_keys(sets: &[RemoteDailySet]) -> Result<Vec<(Level, String)>> {
    sets.iter()
        .map(|set| {
            let given = set.daily_key.as_deref().map(str::trim).filter(|k| !k.is_empty());
            let level = Level::from_str(&set.level).ok_or_else(|| {
                unknown_level("daily set", given.unwrap_or(&set.category), &set.level)
            })?;
            if let Some(key) = given {
                return Ok((level, key.to_string()));
            }
            DailyKey::derive(level, &set.category, set.week, set.day)
                .map(|key| (level, key.format()))
                .ok_or_else(|| {
                    AppError::MalformedSnapshot(format!(
                        "daily set {}/{} week {} day {} has no usable key",
                        set.level, set.category, set.week, set.day
                    ))
                })
        })
        .collect()
}

// A question needs a known section and exactly one correct choice
fn rejected_questions<'s>(
    questions: impl Iterator<Item = (&'s str, i64, &'s str)>,
    choices: impl Iterator<Item = (&'s str, i64, bool)>,
) -> Vec<Rejected> {
    let mut correct_counts: HashMap<(&str, i64), usize> = HashMap::new();
    for (key, number, is_correct) in choices {
        let count = correct_counts.entry((key, number)).or_default();
        if is_correct {
            *count += 1;
        }
    }

    questions
        .filter_map(|(key, number, section)| {
            let reason = if Section::from_str(section).is_none() {
                format!("unknown section '{}'", section)
            } else {
                match correct_counts.get(&(key, number)).copied().unwrap_or(0) {
                    1 => return None,
                    n => format!("{} correct choices", n),
                }
            };
            Some(Rejected {
                key: key.to_string(),
                question_number: number,
                reason,
            })
        })
        .collect()
}

fn clear_mirror(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DELETE FROM choices;
        DELETE FROM questions;
        DELETE FROM exams;
        DELETE FROM daily_choices;
        DELETE FROM daily_questions;
        DELETE FROM daily_sets;
        "#,
    )?;
    Ok(())
}

fn section_str(raw: &str) -> &'static str {
    Section::from_str(raw).map_or("", |s| s.as_str())
}

fn write_exams(
    conn: &Connection,
    snapshot: &Snapshot,
    levels: &[Level],
    skip: &HashSet<(&str, i64)>,
    report: &mut SyncReport,
) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO exams (exam_key, level, year, month, title) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (exam, level) in snapshot.exams.iter().zip(levels) {
        stmt.execute(params![
            exam.exam_key.trim(),
            level.as_str(),
            exam.year,
            exam.month.as_str(),
            exam.title
        ])?;
        report.exams += 1;
    }

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO questions (exam_key, question_number, section, stem, passage)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )?;
    for q in &snapshot.questions {
        if skip.contains(&(q.exam_key.as_str(), q.question_number)) {
            continue;
        }
        stmt.execute(params![
            q.exam_key.trim(),
            q.question_number,
            section_str(&q.section),
            q.stem,
            q.passage
        ])?;
        report.questions += 1;
    }

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO choices (exam_key, question_number, position, content, is_correct, explanation)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )?;
    for c in &snapshot.choices {
        if skip.contains(&(c.exam_key.as_str(), c.question_number)) {
            continue;
        }
        stmt.execute(params![
            c.exam_key.trim(),
            c.question_number,
            c.position,
            c.content,
            c.is_correct,
            c.explanation
        ])?;
        report.choices += 1;
    }

    Ok(())
}

fn write_daily(
    conn: &Connection,
    snapshot: &Snapshot,
    daily_keys: &[(Level, String)],
    skip: &HashSet<(&str, i64)>,
    report: &mut SyncReport,
) -> Result<()> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO daily_sets (daily_key, level, category, week, day, title)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )?;
    for (set, (level, key)) in snapshot.daily_sets.iter().zip(daily_keys) {
        stmt.execute(params![
            key,
            level.as_str(),
            set.category.trim(),
            set.week,
            set.day,
            set.title
        ])?;
        report.daily_sets += 1;
    }

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO daily_questions (daily_key, question_number, section, stem, passage)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )?;
    for q in &snapshot.daily_questions {
        if skip.contains(&(q.daily_key.as_str(), q.question_number)) {
            continue;
        }
        stmt.execute(params![
            q.daily_key.trim(),
            q.question_number,
            section_str(&q.section),
            q.stem,
            q.passage
        ])?;
        report.daily_questions += 1;
    }

    let mut stmt = conn.prepare(
        r#"
        INSERT INTO daily_choices (daily_key, question_number, position, content, is_correct, explanation)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )?;
    for c in &snapshot.daily_choices {
        if skip.contains(&(c.daily_key.as_str(), c.question_number)) {
            continue;
        }
        stmt.execute(params![
            c.daily_key.trim(),
            c.question_number,
            c.position,
            c.content,
            c.is_correct,
            c.explanation
        ])?;
        report.daily_choices += 1;
    }

    Ok(())
}
