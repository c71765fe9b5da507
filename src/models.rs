use serde::{Deserialize, Serialize};

// Proficiency grades, N1 hardest through N5 easiest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    N1 = 1,
    N2 = 2,
    N3 = 3,
    N4 = 4,
    N5 = 5,
}

impl Level {
    pub const ALL: [Level; 5] = [Level::N1, Level::N2, Level::N3, Level::N4, Level::N5];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::N1 => "N1",
            Level::N2 => "N2",
            Level::N3 => "N3",
            Level::N4 => "N4",
            Level::N5 => "N5",
        }
    }

    pub fn ordinal(&self) -> i32 {
        *self as i32
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "N1" | "1" => Some(Level::N1),
            "N2" | "2" => Some(Level::N2),
            "N3" | "3" => Some(Level::N3),
            "N4" | "4" => Some(Level::N4),
            "N5" | "5" => Some(Level::N5),
            _ => None,
        }
    }

    pub fn is_adjacent(&self, other: Level) -> bool {
        (self.ordinal() - other.ordinal()).abs() == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Vocabulary,
    Grammar,
    Reading,
    Listening,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Vocabulary => "vocabulary",
            Section::Grammar => "grammar",
            Section::Reading => "reading",
            Section::Listening => "listening",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "vocabulary" | "vocab" => Some(Section::Vocabulary),
            "grammar" => Some(Section::Grammar),
            "reading" => Some(Section::Reading),
            "listening" => Some(Section::Listening),
            _ => None,
        }
    }
}

// The two annual sittings
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Month {
    July,
    December,
}

impl Month {
    pub fn as_str(&self) -> &'static str {
        match self {
            Month::July => "07",
            Month::December => "12",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Month::July => "July",
            Month::December => "December",
        }
    }

    /// Accepts `7`, `07`, `12`, and the legacy session names.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "7" | "07" | "july" | "jul" => Some(Month::July),
            "12" | "december" | "dec" => Some(Month::December),
            _ => None,
        }
    }

    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            7 => Some(Month::July),
            12 => Some(Month::December),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolChoice {
    pub position: i64,
    pub content: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

/// A question merged with its ordered choices. `exam_key` holds the daily key
/// for questions drawn from a daily set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolQuestion {
    pub exam_key: String,
    pub question_number: i64,
    pub section: Section,
    pub stem: String,
    pub passage: Option<String>,
    pub choices: Vec<PoolChoice>,
}

impl PoolQuestion {
    pub fn identity(&self) -> (&str, i64) {
        (&self.exam_key, self.question_number)
    }

    pub fn choice(&self, position: i64) -> Option<&PoolChoice> {
        self.choices.iter().find(|c| c.position == position)
    }

    pub fn correct_position(&self) -> Option<i64> {
        self.choices.iter().find(|c| c.is_correct).map(|c| c.position)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mistake {
    pub id: i64,
    pub created_at: String,
    pub source_key: String,
    pub question_number: i64,
    pub picked_position: i64,
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
