mod catalog;
mod config;
mod db;
mod error;
mod filter;
mod mistakes;
mod models;
mod pool;
mod session;
mod sync;
mod tui;

use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Database;
use error::{AppError, Result};
use filter::RawFilter;
use mistakes::MistakeLog;
use models::{JsonOutput, Level};
use pool::PoolBuilder;
use session::{InitOutcome, PoolSource, Session};
use sync::{FileSource, HttpSource, RemoteSource, Synchronizer};

const PAPER_KINDS: [&str; 2] = ["language", "reading"];

#[derive(Parser)]
#[command(name = "shiken")]
#[command(about = "Offline exam-bank mirror and practice sessions for proficiency tests")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (defaults to $SHIKEN_CONFIG or the per-user config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Mirror the remote question bank into the local store
    Sync {
        /// Remote base URL (overrides config)
        #[arg(long, conflicts_with = "file")]
        url: Option<String>,

        /// Load a JSON snapshot file instead of fetching
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Browse cached exams by level and year
    Exams,

    /// List daily practice sets
    Daily {
        #[arg(long, short)]
        level: Option<String>,
    },

    /// Show the questions a filter resolves to
    Pool {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Start a practice session
    Practice {
        #[command(flatten)]
        filter: FilterArgs,

        /// Practice every kind of the selected exam(s)
        #[arg(long, conflicts_with_all = ["daily", "mistakes"])]
        paper: bool,

        /// Practice one daily set
        #[arg(long, conflicts_with = "mistakes")]
        daily: Option<String>,

        /// Review recently missed questions
        #[arg(long)]
        mistakes: bool,

        /// Cap the number of questions
        #[arg(long)]
        max: Option<usize>,

        /// Seed for the question shuffle
        #[arg(long)]
        seed: Option<u64>,

        /// Sync from the configured remote first, falling back to the cache
        #[arg(long)]
        refresh: bool,
    },

    /// Manage the mistake log
    #[command(subcommand)]
    Mistakes(MistakeCommands),

    /// Show store statistics
    Stats,
}

#[derive(Subcommand)]
enum MistakeCommands {
    /// List recorded mistakes, newest first
    List,

    /// Delete every recorded mistake
    Clear,
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// N1..N5, "all", or an adjacent pair like "N2-N3-random"
    #[arg(long, short)]
    level: Option<String>,

    /// language, reading or listening
    #[arg(long, short)]
    kind: Option<String>,

    /// Four-digit year or "random"
    #[arg(long)]
    year: Option<String>,

    /// 07, 12 or "random"
    #[arg(long)]
    month: Option<String>,

    /// Legacy session name (July or December)
    #[arg(long)]
    session: Option<String>,
}

impl FilterArgs {
    fn to_raw(&self, kind: Option<&str>) -> Result<RawFilter> {
        let level = self
            .level
            .as_deref()
            .ok_or_else(|| AppError::InvalidFilter("--level is required".to_string()))?;
        let kind = kind
            .or(self.kind.as_deref())
            .ok_or_else(|| AppError::InvalidFilter("--kind is required".to_string()))?;

        let mut raw = RawFilter::new(level, kind);
        if let Some(year) = &self.year {
            raw = raw.with_year(year.as_str());
        }
        if let Some(month) = &self.month {
            raw = raw.with_month(month.as_str());
        }
        if let Some(session) = &self.session {
            raw = raw.with_session(session.as_str());
        }
        Ok(raw)
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn,shiken=info",
        1 => "info,shiken=debug",
        _ => "debug,shiken=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            match serde_json::to_string(&JsonOutput::<()>::err(e.to_string())) {
                Ok(line) => println!("{}", line),
                Err(_) => eprintln!("Error: {}", e),
            }
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn print_json<T: Serialize>(data: T) -> Result<()> {
    println!("{}", serde_json::to_string(&JsonOutput::ok(data))?);
    Ok(())
}

fn open_store(config: &Config) -> Result<(Database, PathBuf)> {
    let path = config.db_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    debug!(path = %path.display(), "opening store");
    let db = Database::open(&path)?;
    db.init()?;
    Ok((db, path))
}

fn remote_source(
    config: &Config,
    url: Option<String>,
    file: Option<PathBuf>,
) -> Result<Box<dyn RemoteSource>> {
    if let Some(file) = file {
        return Ok(Box::new(FileSource::new(file)));
    }
    let base_url = url.or_else(|| config.remote.base_url.clone()).ok_or_else(|| {
        AppError::Config("no remote configured; pass --url or set remote.base_url".to_string())
    })?;
    Ok(Box::new(HttpSource::new(&base_url, config.remote.timeout())?))
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let (db, db_path) = open_store(&config)?;

    match cli.command {
        Commands::Init => {
            if cli.json {
                print_json(())?;
            } else {
                println!("Database initialized at: {}", db_path.display());
            }
        }

        Commands::Sync { url, file } => {
            let source = remote_source(&config, url, file)?;
            let report = Synchronizer::new(&db).run(source.as_ref())?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!("Synced from {}", source.describe());
                println!(
                    "  exams: {}  questions: {}  choices: {}",
                    report.exams, report.questions, report.choices
                );
                println!(
                    "  daily sets: {}  questions: {}  choices: {}",
                    report.daily_sets, report.daily_questions, report.daily_choices
                );
                if !report.rejected.is_empty() {
                    println!("  rejected {} question(s):", report.rejected.len());
                    for r in &report.rejected {
                        println!("    {} #{}: {}", r.key, r.question_number, r.reason);
                    }
                }
            }
        }

        Commands::Exams => {
            let catalog = catalog::exam_catalog(&db)?;
            if cli.json {
                print_json(&catalog)?;
            } else if catalog.is_empty() {
                println!("No exams cached. Run `shiken sync` first.");
            } else {
                for level in catalog {
                    println!("{}", level.level.as_str());
                    for year in level.years {
                        let sittings: Vec<String> = year
                            .sittings
                            .iter()
                            .map(|s| format!("{} ({} q)", s.month.label(), s.question_count))
                            .collect();
                        println!("  {}  {}", year.year, sittings.join(", "));
                    }
                }
            }
        }

        Commands::Daily { level } => {
            let level = match level {
                Some(raw) => Some(Level::from_str(&raw).ok_or_else(|| {
                    AppError::InvalidFilter(format!("unknown level '{}'", raw))
                })?),
                None => None,
            };
            let sets = catalog::list_daily_sets(&db, level)?;
            if cli.json {
                print_json(&sets)?;
            } else if sets.is_empty() {
                println!("No daily sets found.");
            } else {
                println!("{:<20} {:<6} {:<6} {:<40} QUESTIONS", "KEY", "WEEK", "DAY", "TITLE");
                println!("{}", "-".repeat(84));
                for set in sets {
                    println!(
                        "{:<20} {:<6} {:<6} {:<40} {}",
                        set.daily_key,
                        set.week,
                        set.day,
                        truncate(&set.title, 38),
                        set.question_count
                    );
                }
            }
        }

        Commands::Pool { filter } => {
            let practice_filter = filter.to_raw(None)?.normalize()?;
            let pool = PoolBuilder::new(&db).build(&practice_filter)?;
            if cli.json {
                print_json(&pool)?;
            } else if pool.is_empty() {
                println!("No questions match {}.", practice_filter);
            } else {
                println!("{} question(s) for {}", pool.len(), practice_filter);
                println!("{:<14} {:<4} {:<11} STEM", "EXAM", "#", "SECTION");
                println!("{}", "-".repeat(70));
                for q in &pool {
                    println!(
                        "{:<14} {:<4} {:<11} {}",
                        q.exam_key,
                        q.question_number,
                        q.section.as_str(),
                        truncate(&q.stem, 38)
                    );
                }
            }
        }

        Commands::Practice {
            filter,
            paper,
            daily,
            mistakes,
            max,
            seed,
            refresh,
        } => {
            if refresh {
                let remote = remote_source(&config, None, None)?;
                if !Synchronizer::new(&db).sync(remote.as_ref()) && !cli.json {
                    eprintln!("Sync failed; practicing from the cached bank.");
                }
            }

            let source = if mistakes {
                PoolSource::Mistakes
            } else if let Some(key) = daily {
                let parsed = catalog::DailyKey::parse(&key).ok_or_else(|| {
                    AppError::InvalidFilter(format!("malformed daily key '{}'", key))
                })?;
                PoolSource::Daily(parsed.format())
            } else if paper {
                let filters = PAPER_KINDS
                    .iter()
                    .map(|kind| filter.to_raw(Some(*kind))?.normalize())
                    .collect::<Result<Vec<_>>>()?;
                PoolSource::Paper(filters)
            } else {
                PoolSource::Filter(filter.to_raw(None)?.normalize()?)
            };

            let mut options = config.session_options();
            if max.is_some() {
                options.max_questions = max;
            }

            let mut rng: rand::rngs::StdRng = match seed {
                Some(seed) => rand::SeedableRng::seed_from_u64(seed),
                None => rand::SeedableRng::from_entropy(),
            };

            let mut session = Session::new();
            let outcome = session.init(&db, &source, options, &mut rng)?;

            if cli.json {
                print_json(serde_json::json!({
                    "outcome": outcome,
                    "session": session.snapshot(),
                }))?;
                return Ok(());
            }

            match outcome {
                InitOutcome::Ready { .. } => tui::run(db, session)?,
                InitOutcome::NotEnoughQuestions { found, required } => {
                    println!(
                        "Not enough questions: found {}, need at least {}.",
                        found, required
                    );
                }
            }
        }

        Commands::Mistakes(cmd) => {
            let log = MistakeLog::new(&db);
            match cmd {
                MistakeCommands::List => {
                    let rows = log.list()?;
                    if cli.json {
                        print_json(&rows)?;
                    } else if rows.is_empty() {
                        println!("No mistakes recorded.");
                    } else {
                        println!("{:<20} {:<4} {:<7} WHEN", "SOURCE", "#", "PICKED");
                        println!("{}", "-".repeat(60));
                        for m in rows {
                            println!(
                                "{:<20} {:<4} {:<7} {}",
                                m.source_key, m.question_number, m.picked_position, m.created_at
                            );
                        }
                    }
                }
                MistakeCommands::Clear => {
                    let removed = log.clear()?;
                    if cli.json {
                        print_json(serde_json::json!({ "removed": removed }))?;
                    } else {
                        println!("Cleared {} mistake(s).", removed);
                    }
                }
            }
        }

        Commands::Stats => {
            let counts = db.table_counts()?;
            if cli.json {
                print_json(&counts)?;
            } else {
                println!("=== Store Statistics ===");
                println!("Exams: {}", counts.exams);
                println!("Questions: {} ({} choices)", counts.questions, counts.choices);
                println!("Daily sets: {}", counts.daily_sets);
                println!(
                    "Daily questions: {} ({} choices)",
                    counts.daily_questions, counts.daily_choices
                );
                println!("Mistakes logged: {}", counts.mistakes);
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
