use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};
use crate::models::{Level, Month, Section};

/// A number-or-string field as older clients send it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Loose {
    Number(i64),
    Text(String),
}

impl From<&str> for Loose {
    fn from(s: &str) -> Self {
        Loose::Text(s.to_string())
    }
}

impl From<i64> for Loose {
    fn from(n: i64) -> Self {
        Loose::Number(n)
    }
}

impl From<i32> for Loose {
    fn from(n: i32) -> Self {
        Loose::Number(i64::from(n))
    }
}

/// Practice filter in the shape callers hand it over, legacy aliases included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFilter {
    pub level: String,
    pub kind: String,
    #[serde(default)]
    pub year: Option<Loose>,
    #[serde(default)]
    pub month: Option<Loose>,
    /// Legacy alias for `month`: `July`, `December` or `random`.
    #[serde(default)]
    pub session: Option<String>,
}

impl RawFilter {
    pub fn new(level: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn with_year(mut self, year: impl Into<Loose>) -> Self {
        self.year = Some(year.into());
        self
    }

    pub fn with_month(mut self, month: impl Into<Loose>) -> Self {
        self.month = Some(month.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Closes the filter over concrete variants. Only `level` and `kind` can
    /// fail; a year or month that does not parse means "no constraint".
    pub fn normalize(&self) -> Result<PracticeFilter> {
        let levels = LevelSelection::from_str(&self.level).ok_or_else(|| {
            AppError::InvalidFilter(format!("unknown level '{}'", self.level))
        })?;
        let kind = Kind::from_str(&self.kind)
            .ok_or_else(|| AppError::InvalidFilter(format!("unknown kind '{}'", self.kind)))?;

        let year = self.year.as_ref().and_then(parse_year);
        let month = match self.month.as_ref() {
            Some(m) => parse_month(m),
            None => self.session.as_deref().and_then(Month::from_str),
        };

        Ok(PracticeFilter {
            levels,
            kind,
            year,
            month,
        })
    }
}

fn parse_year(value: &Loose) -> Option<i32> {
    let year = match value {
        Loose::Number(n) => i32::try_from(*n).ok()?,
        Loose::Text(s) => s.trim().parse::<i32>().ok()?,
    };
    (1000..=9999).contains(&year).then_some(year)
}

fn parse_month(value: &Loose) -> Option<Month> {
    match value {
        Loose::Number(n) => Month::from_number(*n),
        Loose::Text(s) => Month::from_str(s),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSelection {
    Single(Level),
    /// Two adjacent grades drawn together, e.g. `N2-N3-random`.
    Pair(Level, Level),
    All,
}

impl LevelSelection {
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Some(LevelSelection::All);
        }
        if let Some(level) = Level::from_str(s) {
            return Some(LevelSelection::Single(level));
        }

        let lower = s.to_lowercase();
        let pair = lower.strip_suffix("-random").unwrap_or(&lower);
        let (a, b) = pair.split_once('-')?;
        let (a, b) = (Level::from_str(a)?, Level::from_str(b)?);
        a.is_adjacent(b)
            .then(|| LevelSelection::Pair(a.min(b), a.max(b)))
    }

    pub fn levels(&self) -> Vec<Level> {
        match self {
            LevelSelection::Single(level) => vec![*level],
            LevelSelection::Pair(a, b) => vec![*a, *b],
            LevelSelection::All => Level::ALL.to_vec(),
        }
    }
}

impl fmt::Display for LevelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelSelection::Single(level) => write!(f, "{}", level.as_str()),
            LevelSelection::Pair(a, b) => write!(f, "{}-{}-random", a.as_str(), b.as_str()),
            LevelSelection::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Language,
    Reading,
    Listening,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Language => "language",
            Kind::Reading => "reading",
            Kind::Listening => "listening",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "language" | "lang" => Some(Kind::Language),
            "reading" => Some(Kind::Reading),
            "listening" => Some(Kind::Listening),
            _ => None,
        }
    }

    /// Listening has no playable source in the bank yet, so it maps to nothing.
    pub fn sections(&self) -> &'static [Section] {
        match self {
            Kind::Language => &[Section::Vocabulary, Section::Grammar],
            Kind::Reading => &[Section::Reading],
            Kind::Listening => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PracticeFilter {
    pub levels: LevelSelection,
    pub kind: Kind,
    pub year: Option<i32>,
    pub month: Option<Month>,
}

impl PracticeFilter {
    #[cfg(test)]
    pub fn matches(&self, level: Level, year: i32, month: Month, section: Section) -> bool {
        self.levels.levels().contains(&level)
            && self.kind.sections().contains(&section)
            && self.year.map_or(true, |y| y == year)
            && self.month.map_or(true, |m| m == month)
    }
}

impl fmt::Display for PracticeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level={} kind={}", self.levels, self.kind.as_str())?;
        if let Some(year) = self.year {
            write!(f, " year={}", year)?;
        }
        if let Some(month) = self.month {
            write!(f, " month={}", month.as_str())?;
        }
        Ok(())
    }
}
