use std::fmt;
use std::sync::Arc;

use quiz_core::model::{ChoiceLabel, Student, TagName};
use services::{
    CycleOutcome, PendingResponse, PracticeConfig, PracticeService, Presenter, PresenterError,
    QuestionPrompt,
};
use storage::repository::Storage;
use storage::sqlite::{DEFAULT_DATABASE_URL, normalize_url};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidStudent { raw: String },
    InvalidTag { raw: String },
    InvalidRounds { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidStudent { raw } => write!(f, "invalid --student value: {raw}"),
            ArgsError::InvalidTag { raw } => write!(f, "invalid --tag value: {raw}"),
            ArgsError::InvalidRounds { raw } => write!(f, "invalid --rounds value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

struct Args {
    db_url: String,
    student: String,
    tag: TagName,
    rounds: u32,
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- [--db <sqlite_url>] [--student <ref>] [--tag <topic>] [--rounds <n>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db {DEFAULT_DATABASE_URL}");
    eprintln!("  --student demo");
    eprintln!("  --tag agile");
    eprintln!("  --rounds 5");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_STUDENT, QUIZ_TAG, QUIZ_RESPONSE_TIMEOUT_SECS, RUST_LOG");
}

fn parse_tag(raw: String) -> Result<TagName, ArgsError> {
    TagName::new(raw.clone()).map_err(|_| ArgsError::InvalidTag { raw })
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut db_url = normalize_url(
            &std::env::var("QUIZ_DB_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),
        );
        let mut student = std::env::var("QUIZ_STUDENT").unwrap_or_else(|_| "demo".into());
        let mut tag = parse_tag(std::env::var("QUIZ_TAG").unwrap_or_else(|_| "agile".into()))?;
        let mut rounds = 5;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_url(&value);
                }
                "--student" => {
                    let value = require_value(args, "--student")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidStudent { raw: value });
                    }
                    student = value.trim().to_owned();
                }
                "--tag" => {
                    tag = parse_tag(require_value(args, "--tag")?)?;
                }
                "--rounds" => {
                    let value = require_value(args, "--rounds")?;
                    rounds = value
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| ArgsError::InvalidRounds { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            student,
            tag,
            rounds,
        })
    }
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

//
// ─── TERMINAL PRESENTER ────────────────────────────────────────────────────────
//

/// Prints questions to stdout and takes the first valid label typed on stdin.
struct TerminalPresenter {
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl TerminalPresenter {
    /// Stdin is read by one long-lived task so a line typed after a timeout
    /// is not lost mid-read.
    fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        Self {
            lines: Arc::new(Mutex::new(rx)),
        }
    }
}

fn render(student: &Student, prompt: &QuestionPrompt) {
    println!();
    println!("{}, question #{}:", student.display_name, prompt.question_id);
    if let Some(directions) = &prompt.directions {
        println!("  {directions}");
    }
    println!("  {}", prompt.text);
    if let Some(image) = &prompt.image {
        println!("  (image: {image})");
    }
    for (label, choice) in prompt.choices.iter() {
        println!("    {label}) {choice}");
    }
    println!("Your answer [A-D]:");
}

#[async_trait::async_trait]
impl Presenter for TerminalPresenter {
    async fn present(
        &self,
        student: &Student,
        prompt: QuestionPrompt,
    ) -> Result<PendingResponse, PresenterError> {
        render(student, &prompt);

        let (mut sender, pending) = PendingResponse::channel();
        let lines = Arc::clone(&self.lines);
        tokio::spawn(async move {
            let mut lines = lines.lock().await;
            loop {
                let next = tokio::select! {
                    () = sender.closed() => return,
                    line = lines.recv() => line,
                };
                let Some(raw) = next else {
                    return;
                };
                match raw.parse::<ChoiceLabel>() {
                    Ok(choice) => {
                        sender.respond(choice);
                        return;
                    }
                    Err(err) => println!("{err}; answer with A, B, C or D"),
                }
            }
        });

        Ok(pending)
    }
}

//
// ─── RUN ───────────────────────────────────────────────────────────────────────
//

fn report(outcome: &CycleOutcome, tag: &TagName) -> bool {
    match outcome {
        CycleOutcome::Graded(cycle) => {
            if cycle.is_correct() {
                println!("Correct!");
            } else {
                println!("Not quite, the answer was {}.", cycle.correct_answer);
            }
            println!(
                "I'll ask you again on {}.",
                cycle.next_up.format("%Y-%m-%d %H:%M UTC")
            );
            true
        }
        CycleOutcome::TimedOut { .. } => {
            println!("Out of time. This one stays open.");
            false
        }
        CycleOutcome::Exhausted { next_due, .. } => {
            println!(
                "You've seen every {tag} question. Your next review is due {}.",
                next_due.format("%Y-%m-%d %H:%M UTC")
            );
            false
        }
        CycleOutcome::Empty => {
            println!("There is nothing to practice for {tag} yet.");
            false
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .try_init()
        .ok();

    let mut argv = std::env::args().skip(1);
    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite at startup. Keep this in the binary glue so core/services stay pure.
    prepare_sqlite_file(&args.db_url)?;
    let storage = Storage::sqlite(&args.db_url).await?;

    let config = PracticeConfig::from_env();
    tracing::info!(
        db = %args.db_url,
        student = %args.student,
        tag = %args.tag,
        timeout_secs = config.response_timeout.as_secs(),
        "starting practice"
    );
    let practice = PracticeService::new(&storage, Arc::new(TerminalPresenter::spawn()), config)?;

    for _ in 0..args.rounds {
        let outcome = practice.run_cycle(&args.student, &args.tag).await?;
        if !report(&outcome, &args.tag) {
            break;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}
