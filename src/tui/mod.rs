mod ui;
mod widgets;

use std::io;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing::warn;

use crate::db::Database;
use crate::error::Result;
use crate::mistakes::MistakeLog;
use crate::models::Mistake;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Practice,
    Mistakes,
}

impl View {
    fn toggle(&self) -> Self {
        match self {
            View::Practice => View::Mistakes,
            View::Mistakes => View::Practice,
        }
    }
}

pub struct StatefulList<T> {
    pub items: Vec<T>,
    pub selected: Option<usize>,
}

impl<T> StatefulList<T> {
    fn with_items(items: Vec<T>) -> Self {
        let selected = if items.is_empty() { None } else { Some(0) };
        Self { items, selected }
    }

    fn next(&mut self) {
        if self.items.is_empty() {
            return;
        }
        self.selected = Some(match self.selected {
            Some(i) if i + 1 < self.items.len() => i + 1,
            _ => 0,
        });
    }

    fn previous(&mut self) {
        if self.items.is_empty() {
            return;
        }
        self.selected = Some(match self.selected {
            Some(0) | None => self.items.len() - 1,
            Some(i) => i - 1,
        });
    }
}

pub struct App {
    db: Database,
    pub view: View,
    pub session: Session,
    pub mistakes: StatefulList<Mistake>,
    /// One-line feedback shown above the help bar.
    pub status: Option<String>,
    pub should_quit: bool,
}

impl App {
    pub fn new(db: Database, session: Session) -> Result<Self> {
        let mistakes = MistakeLog::new(&db).list()?;
        Ok(Self {
            db,
            view: View::Practice,
            session,
            mistakes: StatefulList::with_items(mistakes),
            status: None,
            should_quit: false,
        })
    }

    pub fn refresh_mistakes(&mut self) -> Result<()> {
        self.mistakes = StatefulList::with_items(MistakeLog::new(&self.db).list()?);
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        let log = MistakeLog::new(&self.db);
        match self.session.submit(&log) {
            Ok(Some(submission)) => {
                self.status = Some(if submission.correct {
                    "Correct".to_string()
                } else {
                    match submission.correct_position {
                        Some(pos) => format!("Incorrect, the answer was {}", pos),
                        None => "Incorrect".to_string(),
                    }
                });
                if !submission.correct {
                    self.refresh_mistakes()?;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "could not record submission");
                self.status = Some(format!("Not submitted: {}", e));
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyCode, modifiers: KeyModifiers) -> Result<()> {
        match key {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Tab | KeyCode::BackTab => self.view = self.view.toggle(),
            KeyCode::Char('r') if modifiers.contains(KeyModifiers::CONTROL) => {
                self.refresh_mistakes()?;
            }
            _ => match self.view {
                View::Practice => self.handle_practice_key(key)?,
                View::Mistakes => self.handle_mistakes_key(key),
            },
        }
        Ok(())
    }

    fn handle_practice_key(&mut self, key: KeyCode) -> Result<()> {
        match key {
            KeyCode::Char(c @ '1'..='9') => {
                let position = i64::from(c as u8 - b'0');
                if self.session.pick(position) {
                    self.status = None;
                }
            }
            KeyCode::Enter => self.submit()?,
            KeyCode::Char('l') | KeyCode::Right => {
                self.session.next();
                self.status = None;
            }
            KeyCode::Char('h') | KeyCode::Left => {
                self.session.prev();
                self.status = None;
            }
            KeyCode::Char('g') => {
                self.session.jump_to(0);
                self.status = None;
            }
            KeyCode::Char('G') => {
                self.session.jump_to(self.session.len().saturating_sub(1));
                self.status = None;
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_mistakes_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char('j') | KeyCode::Down => self.mistakes.next(),
            KeyCode::Char('k') | KeyCode::Up => self.mistakes.previous(),
            KeyCode::Char('g') if !self.mistakes.items.is_empty() => {
                self.mistakes.selected = Some(0);
            }
            KeyCode::Char('G') if !self.mistakes.items.is_empty() => {
                self.mistakes.selected = Some(self.mistakes.items.len() - 1);
            }
            _ => {}
        }
    }
}

pub fn run(db: Database, session: Session) -> Result<()> {
    let mut app = App::new(db, session)?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    loop {
        terminal.draw(|f| ui::draw(f, app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key.code, key.modifiers)?;
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}
