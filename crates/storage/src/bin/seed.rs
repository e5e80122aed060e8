use std::fmt;

use quiz_core::model::{
    ChoiceLabel, Choices, QuestionDraft, QuestionId, Student, StudentId, TagName,
};
use storage::repository::Storage;
use storage::sqlite::{DEFAULT_DATABASE_URL, normalize_url};

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    student_ref: String,
    student_name: String,
    tag: TagName,
    questions: u32,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidStudent { raw: String },
    InvalidTag { raw: String },
    InvalidQuestions { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidStudent { raw } => write!(f, "invalid --student value: {raw}"),
            ArgsError::InvalidTag { raw } => write!(f, "invalid --tag value: {raw}"),
            ArgsError::InvalidQuestions { raw } => write!(f, "invalid --questions value: {raw}"),
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

fn parse_tag(raw: String) -> Result<TagName, ArgsError> {
    TagName::new(raw.clone()).map_err(|_| ArgsError::InvalidTag { raw })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url = normalize_url(
            &std::env::var("QUIZ_DB_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),
        );
        let mut student_ref = std::env::var("QUIZ_STUDENT").unwrap_or_else(|_| "demo".into());
        let mut student_name =
            std::env::var("QUIZ_STUDENT_NAME").unwrap_or_else(|_| "Demo Learner".into());
        let mut tag = parse_tag(std::env::var("QUIZ_TAG").unwrap_or_else(|_| "agile".into()))?;
        let mut questions = std::env::var("QUIZ_QUESTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(8);

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_url(&value);
                }
                "--student" => {
                    let value = require_value(&mut args, "--student")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidStudent { raw: value });
                    }
                    student_ref = value.trim().to_owned();
                }
                "--name" => {
                    student_name = require_value(&mut args, "--name")?;
                }
                "--tag" => {
                    tag = parse_tag(require_value(&mut args, "--tag")?)?;
                }
                "--questions" => {
                    let value = require_value(&mut args, "--questions")?;
                    questions = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidQuestions { raw: value.clone() })?;
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
            student_ref,
            student_name,
            tag,
            questions,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: {DEFAULT_DATABASE_URL})");
    eprintln!("  --student <ref>           External reference of the learner (default: demo)");
    eprintln!("  --name <text>             Learner display name (default: Demo Learner)");
    eprintln!("  --tag <topic>             Topic tag for the seeded questions (default: agile)");
    eprintln!("  --questions <n>           Number of sample questions to upsert (default: 8)");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  QUIZ_DB_URL, QUIZ_STUDENT, QUIZ_STUDENT_NAME, QUIZ_TAG, QUIZ_QUESTIONS");
}

const SAMPLES: [(&str, [&str; 4], ChoiceLabel); 8] = [
    (
        "Which artifact orders the work a Scrum team may take on?",
        ["Sprint goal", "Product backlog", "Burndown chart", "Definition of done"],
        ChoiceLabel::B,
    ),
    (
        "Who is accountable for maximizing the value of the product?",
        ["Scrum master", "Developers", "Product owner", "Stakeholders"],
        ChoiceLabel::C,
    ),
    (
        "What is the recommended maximum length of a sprint?",
        ["One week", "Two weeks", "One month", "One quarter"],
        ChoiceLabel::C,
    ),
    (
        "Which event inspects the increment with stakeholders?",
        ["Sprint review", "Daily scrum", "Retrospective", "Sprint planning"],
        ChoiceLabel::A,
    ),
    (
        "What limits work in progress on a kanban board?",
        ["Story points", "Swimlanes", "Velocity", "WIP limits"],
        ChoiceLabel::D,
    ),
    (
        "Which value is listed first in the agile manifesto?",
        [
            "Individuals and interactions",
            "Working software",
            "Customer collaboration",
            "Responding to change",
        ],
        ChoiceLabel::A,
    ),
    (
        "What does a team use to estimate relative effort?",
        ["Lead time", "Story points", "Cycle time", "Throughput"],
        ChoiceLabel::B,
    ),
    (
        "Which event is time-boxed to fifteen minutes?",
        ["Sprint review", "Backlog refinement", "Daily scrum", "Retrospective"],
        ChoiceLabel::C,
    ),
];

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;

    let student = match storage.students.find_student(&args.student_ref).await? {
        Some(existing) => Student::new(existing.id, existing.external_ref, args.student_name),
        None => Student::new(StudentId::new(1), args.student_ref.clone(), args.student_name),
    };
    storage.students.upsert_student(&student).await?;

    for i in 0..args.questions {
        let (text, [a, b, c, d], answer) = SAMPLES[(i as usize) % SAMPLES.len()];
        let question = QuestionDraft {
            text: text.to_owned(),
            choices: Choices::new(a, b, c, d),
            answer,
            directions: Some("Choose the single best answer.".into()),
            image: None,
            tags: vec![args.tag.as_str().to_owned()],
        }
        .validate(QuestionId::new(u64::from(i + 1)))?;
        storage.questions.upsert_question(&question).await?;
    }

    println!(
        "Seeded learner {} and {} questions tagged {} into {}",
        student.external_ref, args.questions, args.tag, args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
