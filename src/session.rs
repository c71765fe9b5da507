//! Practice session state machine.
//!
//! A session owns a pool, a pointer into it and one answer slot per index.
//! Each slot moves `Ready -> AnswerPending -> Answered` independently, so
//! moving the pointer around never loses or re-prompts an answer. Calls that do
//! not fit the current state are no-ops rather than errors.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::filter::PracticeFilter;
use crate::mistakes::MistakeLog;
use crate::models::PoolQuestion;
use crate::pool::PoolBuilder;

const DEFAULT_MISTAKE_REVIEW_SIZE: usize = 50;

/// Where incorrect submissions are reported.
pub trait MistakeSink {
    fn record_mistake(
        &self,
        source_key: &str,
        question_number: i64,
        picked_position: i64,
    ) -> Result<()>;
}

impl MistakeSink for MistakeLog<'_> {
    fn record_mistake(
        &self,
        source_key: &str,
        question_number: i64,
        picked_position: i64,
    ) -> Result<()> {
        self.record(source_key, question_number, picked_position)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PoolSource {
    Filter(PracticeFilter),
    /// Several filters merged into one pool, e.g. a whole paper.
    Paper(Vec<PracticeFilter>),
    Daily(String),
    Mistakes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub min_questions: usize,
    pub max_questions: Option<usize>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            min_questions: 1,
            max_questions: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InitOutcome {
    Ready { size: usize },
    NotEnoughQuestions { found: usize, required: usize },
}

impl InitOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, InitOutcome::Ready { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Empty,
    Ready,
    AnswerPending,
    Answered,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Slot {
    selected: Option<i64>,
    correct: Option<bool>,
}

impl Slot {
    fn state(&self) -> SessionState {
        match (self.selected, self.correct) {
            (_, Some(_)) => SessionState::Answered,
            (Some(_), None) => SessionState::AnswerPending,
            (None, None) => SessionState::Ready,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub correct: bool,
    pub picked_position: i64,
    pub correct_position: Option<i64>,
}

/// Plain view handed to the UI layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot<'a> {
    pub index: usize,
    pub len: usize,
    pub state: SessionState,
    pub question: Option<&'a PoolQuestion>,
    pub selected: Option<i64>,
    pub last_correct: Option<bool>,
    pub score: usize,
    pub total: usize,
    pub complete: bool,
}

#[derive(Debug, Default)]
pub struct Session {
    pool: Vec<PoolQuestion>,
    slots: Vec<Slot>,
    index: usize,
    score: usize,
    total: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the session and loads a pool from `source`. A pool below
    /// `min_questions` leaves the session empty and reports it.
    pub fn init<R: Rng + ?Sized>(
        &mut self,
        db: &Database,
        source: &PoolSource,
        options: SessionOptions,
        rng: &mut R,
    ) -> Result<InitOutcome> {
        self.reset();

        let builder = PoolBuilder::new(db);
        let pool = match source {
            PoolSource::Filter(filter) => builder.build(filter)?,
            PoolSource::Paper(filters) => builder.build_many(filters)?,
            PoolSource::Daily(daily_key) => builder.daily(daily_key)?,
            PoolSource::Mistakes => {
                let limit = options.max_questions.unwrap_or(DEFAULT_MISTAKE_REVIEW_SIZE);
                // Replayed newest miss first
                return Ok(self.load_in_order(builder.mistakes(limit)?, options, None::<&mut R>));
            }
        };

        Ok(self.load(pool, options, rng))
    }

    /// Loads an already assembled pool. Pools spanning more than one exam are
    /// shuffled; single-exam pools keep question order.
    pub fn load<R: Rng + ?Sized>(
        &mut self,
        pool: Vec<PoolQuestion>,
        options: SessionOptions,
        rng: &mut R,
    ) -> InitOutcome {
        let mixed = pool.windows(2).any(|w| w[0].exam_key != w[1].exam_key);
        self.load_in_order(pool, options, mixed.then_some(rng))
    }

    fn load_in_order<R: Rng + ?Sized>(
        &mut self,
        mut pool: Vec<PoolQuestion>,
        options: SessionOptions,
        shuffle_with: Option<&mut R>,
    ) -> InitOutcome {
        self.reset();

        let found = pool.len();
        let required = options.min_questions.max(1);
        if found < required {
            debug!(found, required, "not enough questions for a session");
            return InitOutcome::NotEnoughQuestions { found, required };
        }

        if let Some(rng) = shuffle_with {
            pool.shuffle(rng);
        }
        if let Some(max) = options.max_questions {
            pool.truncate(max.max(required));
        }

        self.slots = vec![Slot::default(); pool.len()];
        self.pool = pool;
        debug!(size = self.pool.len(), "session ready");
        InitOutcome::Ready {
            size: self.pool.len(),
        }
    }

    fn reset(&mut self) {
        self.pool.clear();
        self.slots.clear();
        self.index = 0;
        self.score = 0;
        self.total = 0;
    }

    pub fn state(&self) -> SessionState {
        match self.slots.get(self.index) {
            Some(slot) => slot.state(),
            None => SessionState::Empty,
        }
    }

    pub fn state_at(&self, index: usize) -> Option<SessionState> {
        self.slots.get(index).map(Slot::state)
    }

    pub fn current(&self) -> Option<&PoolQuestion> {
        self.pool.get(self.index)
    }

    pub fn pool(&self) -> &[PoolQuestion] {
        &self.pool
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_complete(&self) -> bool {
        !self.pool.is_empty() && self.total == self.pool.len()
    }

    /// Tentatively selects the choice at `position`. Returns false when the
    /// index is already answered, no pool is loaded, or the position does not
    /// exist on the current question.
    pub fn pick(&mut self, position: i64) -> bool {
        let Some(question) = self.pool.get(self.index) else {
            return false;
        };
        if question.choice(position).is_none() {
            return false;
        }
        let slot = &mut self.slots[self.index];
        if slot.correct.is_some() {
            return false;
        }
        slot.selected = Some(position);
        true
    }

    /// Commits the pending pick on the current index. Returns `None` when there
    /// is nothing to submit or the index was already answered.
    pub fn submit(&mut self, sink: &dyn MistakeSink) -> Result<Option<Submission>> {
        let Some(question) = self.pool.get(self.index) else {
            return Ok(None);
        };
        let slot = self.slots[self.index];
        let (Some(picked), None) = (slot.selected, slot.correct) else {
            return Ok(None);
        };

        let correct = question.choice(picked).is_some_and(|c| c.is_correct);
        if !correct {
            sink.record_mistake(&question.exam_key, question.question_number, picked)?;
        }

        let submission = Submission {
            correct,
            picked_position: picked,
            correct_position: question.correct_position(),
        };
        debug!(
            exam_key = %question.exam_key,
            question_number = question.question_number,
            picked,
            correct,
            "answer submitted"
        );

        self.slots[self.index].correct = Some(correct);
        self.total += 1;
        if correct {
            self.score += 1;
        }
        Ok(Some(submission))
    }

    pub fn next(&mut self) -> usize {
        self.jump_to(self.index.saturating_add(1))
    }

    pub fn prev(&mut self) -> usize {
        self.jump_to(self.index.saturating_sub(1))
    }

    /// Moves the pointer, clamped to the pool bounds.
    pub fn jump_to(&mut self, index: usize) -> usize {
        if !self.pool.is_empty() {
            self.index = index.min(self.pool.len() - 1);
        }
        self.index
    }

    pub fn snapshot(&self) -> SessionSnapshot<'_> {
        let slot = self.slots.get(self.index).copied().unwrap_or_default();
        SessionSnapshot {
            index: self.index,
            len: self.pool.len(),
            state: self.state(),
            question: self.current(),
            selected: slot.selected,
            last_correct: slot.correct,
            score: self.score,
            total: self.total,
            complete: self.is_complete(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use crate::filter::RawFilter;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSink {
        rows: RefCell<Vec<(String, i64, i64)>>,
    }

    impl MistakeSink for RecordingSink {
        fn record_mistake(&self, key: &str, number: i64, position: i64) -> Result<()> {
            self.rows.borrow_mut().push((key.to_string(), number, position));
            Ok(())
        }
    }

    struct FailingSink;

    impl MistakeSink for FailingSink {
        fn record_mistake(&self, _: &str, _: i64, _: i64) -> Result<()> {
            Err(crate::error::AppError::Config("log unavailable".to_string()))
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn n3_filter() -> PoolSource {
        PoolSource::Filter(
            RawFilter::new("N3", "language")
                .with_year(2022)
                .with_month("07")
                .normalize()
                .unwrap(),
        )
    }

    fn ready_session(db: &Database) -> Session {
        let mut session = Session::new();
        let outcome = session
            .init(db, &n3_filter(), SessionOptions::default(), &mut rng())
            .unwrap();
        assert_eq!(outcome, InitOutcome::Ready { size: 4 });
        session
    }

    mod init_tests {
        use super::*;

        #[test]
        fn new_session_is_empty() {
            let session = Session::new();
            assert_eq!(session.state(), SessionState::Empty);
            assert!(session.current().is_none());
            assert!(!session.is_complete());
        }

        #[test]
        fn init_loads_single_exam_in_order() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let session = ready_session(&db);

            assert_eq!(session.state(), SessionState::Ready);
            assert_eq!(session.index(), 0);
            let numbers: Vec<i64> = session.pool().iter().map(|q| q.question_number).collect();
            assert_eq!(numbers, vec![1, 2, 3, 4]);
        }

        #[test]
        fn empty_pool_reports_not_enough() {
            let db = setup_db();
            let mut session = Session::new();
            let outcome = session
                .init(&db, &n3_filter(), SessionOptions::default(), &mut rng())
                .unwrap();
            assert_eq!(
                outcome,
                InitOutcome::NotEnoughQuestions {
                    found: 0,
                    required: 1
                }
            );
            assert!(!outcome.is_ready());
            assert_eq!(session.state(), SessionState::Empty);
        }

        #[test]
        fn below_minimum_reports_not_enough() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let mut session = Session::new();
            let options = SessionOptions {
                min_questions: 10,
                max_questions: None,
            };
            let outcome = session.init(&db, &n3_filter(), options, &mut rng()).unwrap();
            assert_eq!(
                outcome,
                InitOutcome::NotEnoughQuestions {
                    found: 4,
                    required: 10
                }
            );
            assert!(session.is_empty());
        }

        #[test]
        fn init_resets_previous_progress() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let mut session = ready_session(&db);
            session.pick(1);
            session.submit(&RecordingSink::default()).unwrap();
            session.next();

            session
                .init(&db, &n3_filter(), SessionOptions::default(), &mut rng())
                .unwrap();
            assert_eq!(session.score(), 0);
            assert_eq!(session.total(), 0);
            assert_eq!(session.index(), 0);
            assert_eq!(session.state(), SessionState::Ready);
        }

        #[test]
        fn multi_exam_pool_is_shuffled_and_capped() {
            let db = setup_db();
            for year in 2010..2020 {
                let key = format!("N2-{}-12", year);
                insert_exam(&db, &key, "N2", year, "12");
                for n in 1..=3 {
                    insert_question(&db, &key, n, "grammar", 1);
                }
            }
            let source = PoolSource::Filter(RawFilter::new("N2", "language").normalize().unwrap());
            let ordered = PoolBuilder::new(&db)
                .build(&RawFilter::new("N2", "language").normalize().unwrap())
                .unwrap();

            let mut session = Session::new();
            session
                .init(&db, &source, SessionOptions::default(), &mut rng())
                .unwrap();
            assert_eq!(session.len(), 30);
            assert_ne!(session.pool(), ordered.as_slice());

            let options = SessionOptions {
                min_questions: 1,
                max_questions: Some(5),
            };
            let outcome = session.init(&db, &source, options, &mut rng()).unwrap();
            assert_eq!(outcome, InitOutcome::Ready { size: 5 });
        }

        #[test]
        fn daily_source_loads_one_set() {
            let db = setup_db();
            insert_daily_set(&db, "N5-VOCAB-0002", "N5", "VOCAB");
            insert_daily_question(&db, "N5-VOCAB-0002", 1, 2);
            insert_daily_question(&db, "N5-VOCAB-0002", 2, 3);

            let mut session = Session::new();
            let outcome = session
                .init(
                    &db,
                    &PoolSource::Daily("N5-VOCAB-0002".to_string()),
                    SessionOptions::default(),
                    &mut rng(),
                )
                .unwrap();
            assert_eq!(outcome, InitOutcome::Ready { size: 2 });
            assert_eq!(session.current().unwrap().exam_key, "N5-VOCAB-0002");
        }

        #[test]
        fn paper_source_merges_kinds() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            insert_question(&db, "N3-2022-07", 5, "reading", 1);

            let paper = ["language", "reading", "listening"]
                .iter()
                .map(|kind| {
                    RawFilter::new("N3", *kind)
                        .with_year(2022)
                        .with_month("07")
                        .normalize()
                        .unwrap()
                })
                .collect();

            let mut session = Session::new();
            let outcome = session
                .init(&db, &PoolSource::Paper(paper), SessionOptions::default(), &mut rng())
                .unwrap();
            assert_eq!(outcome, InitOutcome::Ready { size: 5 });
            let numbers: Vec<i64> = session.pool().iter().map(|q| q.question_number).collect();
            assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        }

        #[test]
        fn mistakes_source_replays_misses() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let log = MistakeLog::new(&db);
            log.record("N3-2022-07", 3, 1).unwrap();

            let mut session = Session::new();
            let outcome = session
                .init(&db, &PoolSource::Mistakes, SessionOptions::default(), &mut rng())
                .unwrap();
            assert_eq!(outcome, InitOutcome::Ready { size: 1 });
            assert_eq!(session.current().unwrap().question_number, 3);
        }

        #[test]
        fn mistakes_across_exams_keep_newest_first() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            insert_exam(&db, "N2-2021-12", "N2", 2021, "12");
            insert_question(&db, "N2-2021-12", 1, "reading", 1);

            let log = MistakeLog::new(&db);
            log.record("N3-2022-07", 1, 2).unwrap();
            log.record("N2-2021-12", 1, 3).unwrap();
            log.record("N3-2022-07", 4, 1).unwrap();

            let mut session = Session::new();
            session
                .init(&db, &PoolSource::Mistakes, SessionOptions::default(), &mut rng())
                .unwrap();
            let order: Vec<(&str, i64)> = session
                .pool()
                .iter()
                .map(|q| (q.exam_key.as_str(), q.question_number))
                .collect();
            assert_eq!(
                order,
                vec![("N3-2022-07", 4), ("N2-2021-12", 1), ("N3-2022-07", 1)]
            );
        }
    }

    mod answer_tests {
        use super::*;

        #[test]
        fn scenario_correct_then_incorrect() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let log = MistakeLog::new(&db);
            let mut session = ready_session(&db);

            // Question 1: position 1 is correct
            assert!(session.pick(1));
            let first = session.submit(&log).unwrap().unwrap();
            assert!(first.correct);
            assert_eq!((session.score(), session.total()), (1, 1));

            // Question 2: position 2 is correct, pick 3
            session.next();
            assert!(session.pick(3));
            let second = session.submit(&log).unwrap().unwrap();
            assert!(!second.correct);
            assert_eq!(second.correct_position, Some(2));
            assert_eq!((session.score(), session.total()), (1, 2));

            let mistakes = log.list().unwrap();
            assert_eq!(mistakes.len(), 1);
            assert_eq!(mistakes[0].source_key, "N3-2022-07");
            assert_eq!(mistakes[0].question_number, 2);
            assert_eq!(mistakes[0].picked_position, 3);
        }

        #[test]
        fn pick_moves_to_answer_pending() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let mut session = ready_session(&db);
            assert!(session.pick(2));
            assert_eq!(session.state(), SessionState::AnswerPending);
            assert!(session.pick(4));
            assert_eq!(session.snapshot().selected, Some(4));
            assert_eq!(session.total(), 0);
        }

        #[test]
        fn pick_unknown_position_is_ignored() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let mut session = ready_session(&db);
            assert!(!session.pick(9));
            assert_eq!(session.state(), SessionState::Ready);
        }

        #[test]
        fn pick_without_pool_is_noop() {
            let mut session = Session::new();
            assert!(!session.pick(1));
            assert!(session.submit(&RecordingSink::default()).unwrap().is_none());
            assert_eq!(session.state(), SessionState::Empty);
        }

        #[test]
        fn submit_without_pick_is_noop() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let mut session = ready_session(&db);
            assert!(session.submit(&RecordingSink::default()).unwrap().is_none());
            assert_eq!(session.total(), 0);
        }

        #[test]
        fn resubmit_is_not_double_counted() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let sink = RecordingSink::default();
            let mut session = ready_session(&db);
            session.pick(4);
            session.submit(&sink).unwrap();

            assert!(!session.pick(1));
            assert!(session.submit(&sink).unwrap().is_none());
            assert_eq!((session.score(), session.total()), (0, 1));
            assert_eq!(sink.rows.borrow().len(), 1);
            assert_eq!(session.state(), SessionState::Answered);
        }

        #[test]
        fn mistake_logged_only_for_incorrect() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let sink = RecordingSink::default();
            let mut session = ready_session(&db);

            // Correct answers are 1, 2, 3, 4 for questions 1..4
            for (i, pick) in [1, 3, 3, 1].into_iter().enumerate() {
                session.jump_to(i);
                session.pick(pick);
                session.submit(&sink).unwrap();
            }

            let rows = sink.rows.borrow();
            assert_eq!(
                *rows,
                vec![
                    ("N3-2022-07".to_string(), 2, 3),
                    ("N3-2022-07".to_string(), 4, 1)
                ]
            );
            assert_eq!((session.score(), session.total()), (2, 4));
            assert!(session.is_complete());
        }

        #[test]
        fn failed_mistake_write_leaves_index_open() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let mut session = ready_session(&db);
            session.pick(2);

            assert!(session.submit(&FailingSink).is_err());
            assert_eq!(session.total(), 0);
            assert_eq!(session.state(), SessionState::AnswerPending);
        }
    }

    mod navigation_tests {
        use super::*;

        #[test]
        fn navigation_is_clamped() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let mut session = ready_session(&db);

            assert_eq!(session.prev(), 0);
            assert_eq!(session.jump_to(99), 3);
            assert_eq!(session.next(), 3);
            assert_eq!(session.jump_to(1), 1);
        }

        #[test]
        fn navigation_on_empty_session_stays_at_zero() {
            let mut session = Session::new();
            assert_eq!(session.next(), 0);
            assert_eq!(session.jump_to(5), 0);
            assert_eq!(session.state(), SessionState::Empty);
        }

        #[test]
        fn navigation_preserves_answers() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let mut session = ready_session(&db);
            let sink = RecordingSink::default();

            session.pick(4);
            session.submit(&sink).unwrap();
            let after_submit = session.snapshot();
            let (selected, last_correct) = (after_submit.selected, after_submit.last_correct);

            session.next();
            assert_eq!(session.snapshot().selected, None);
            assert_eq!(session.state(), SessionState::Ready);
            session.prev();

            let back = session.snapshot();
            assert_eq!(back.selected, selected);
            assert_eq!(back.last_correct, last_correct);
            assert_eq!(back.last_correct, Some(false));
            assert_eq!(back.state, SessionState::Answered);
        }

        #[test]
        fn pending_pick_survives_navigation() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let mut session = ready_session(&db);
            session.jump_to(2);
            session.pick(3);
            session.jump_to(0);
            session.jump_to(2);

            assert_eq!(session.state(), SessionState::AnswerPending);
            assert_eq!(session.snapshot().selected, Some(3));
            assert_eq!(session.state_at(0), Some(SessionState::Ready));
        }

        #[test]
        fn random_operation_sequences_never_double_count() {
            let db = setup_db();
            seed_n3_2022_07(&db);
            let sink = RecordingSink::default();
            let mut ops = StdRng::seed_from_u64(42);

            for _ in 0..50 {
                let mut session = ready_session(&db);
                let mut submitted = std::collections::HashSet::new();
                for _ in 0..40 {
                    match ops.gen_range(0..5) {
                        0 => {
                            session.pick(ops.gen_range(0..6));
                        }
                        1 => {
                            if session.submit(&sink).unwrap().is_some() {
                                assert!(submitted.insert(session.index()));
                            }
                        }
                        2 => {
                            session.next();
                        }
                        3 => {
                            session.prev();
                        }
                        _ => {
                            session.jump_to(ops.gen_range(0..6));
                        }
                    }
                    assert_eq!(session.total(), submitted.len());
                    assert!(session.score() <= session.total());
                    assert!(session.total() <= session.len());
                }
            }
        }
    }
}
