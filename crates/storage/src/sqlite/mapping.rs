use std::collections::BTreeSet;

use quiz_core::model::{
    Attempt, AttemptId, AttemptResult, ChoiceLabel, Choices, Outcome, Question, QuestionId,
    Student, StudentId, TagName,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) const ATTEMPT_COLUMNS: &str = "id, student_id, question_id, created_at, reattempted, \
     graded, answered, latency_secs, ease, easiness, win_streak, loss_streak, interval_days, \
     next_up, graded_at";

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn(e: sqlx::Error) -> StorageError {
    let unique = e
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation());
    if unique {
        StorageError::Conflict
    } else {
        StorageError::Connection(e.to_string())
    }
}

pub(crate) fn id_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn parse_choice(s: &str) -> Result<ChoiceLabel, StorageError> {
    s.parse::<ChoiceLabel>().map_err(ser)
}

pub(crate) fn map_student_row(row: &SqliteRow) -> Result<Student, StorageError> {
    Ok(Student::new(
        StudentId::new(i64_to_u64("student_id", row.try_get("id").map_err(ser)?)?),
        row.try_get::<String, _>("external_ref").map_err(ser)?,
        row.try_get::<String, _>("display_name").map_err(ser)?,
    ))
}

/// Maps the scalar columns of a `questions` row. Tags and the attempted-by
/// set live in side tables and are attached by the caller.
pub(crate) fn map_question_row(
    row: &SqliteRow,
    tags: BTreeSet<TagName>,
    attempted_by: BTreeSet<StudentId>,
) -> Result<Question, StorageError> {
    let answer: String = row.try_get("answer").map_err(ser)?;
    let image = row
        .try_get::<Option<String>, _>("image")
        .map_err(ser)?
        .map(|raw| url::Url::parse(&raw).map_err(ser))
        .transpose()?;

    Ok(Question {
        id: QuestionId::new(i64_to_u64("question_id", row.try_get("id").map_err(ser)?)?),
        text: row.try_get("text").map_err(ser)?,
        choices: Choices::new(
            row.try_get::<String, _>("choice_a").map_err(ser)?,
            row.try_get::<String, _>("choice_b").map_err(ser)?,
            row.try_get::<String, _>("choice_c").map_err(ser)?,
            row.try_get::<String, _>("choice_d").map_err(ser)?,
        ),
        answer: parse_choice(&answer)?,
        directions: row.try_get("directions").map_err(ser)?,
        image,
        tags,
        total_attempts: i64_to_u64(
            "total_attempts",
            row.try_get("total_attempts").map_err(ser)?,
        )?,
        attempted_by,
    })
}

pub(crate) fn map_attempt_row(row: &SqliteRow) -> Result<Attempt, StorageError> {
    let graded: bool = row.try_get("graded").map_err(ser)?;

    let result = if graded {
        let required = |field: &'static str| StorageError::Serialization(format!("missing {field}"));
        let answered: bool = row
            .try_get::<Option<bool>, _>("answered")
            .map_err(ser)?
            .ok_or_else(|| required("answered"))?;

        Some(AttemptResult {
            outcome: Outcome::from_correct(answered),
            latency_secs: row
                .try_get::<Option<f64>, _>("latency_secs")
                .map_err(ser)?
                .ok_or_else(|| required("latency_secs"))?,
            ease: row
                .try_get::<Option<f64>, _>("ease")
                .map_err(ser)?
                .ok_or_else(|| required("ease"))?,
            easiness: row
                .try_get::<Option<f64>, _>("easiness")
                .map_err(ser)?
                .ok_or_else(|| required("easiness"))?,
            win_streak: i64_to_u32(
                "win_streak",
                row.try_get::<Option<i64>, _>("win_streak")
                    .map_err(ser)?
                    .ok_or_else(|| required("win_streak"))?,
            )?,
            loss_streak: i64_to_u32(
                "loss_streak",
                row.try_get::<Option<i64>, _>("loss_streak")
                    .map_err(ser)?
                    .ok_or_else(|| required("loss_streak"))?,
            )?,
            interval_days: i64_to_u32(
                "interval_days",
                row.try_get::<Option<i64>, _>("interval_days")
                    .map_err(ser)?
                    .ok_or_else(|| required("interval_days"))?,
            )?,
            next_up: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("next_up")
                .map_err(ser)?
                .ok_or_else(|| required("next_up"))?,
            graded_at: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("graded_at")
                .map_err(ser)?
                .ok_or_else(|| required("graded_at"))?,
        })
    } else {
        None
    };

    Ok(Attempt {
        id: AttemptId::new(i64_to_u64("attempt_id", row.try_get("id").map_err(ser)?)?),
        student_id: StudentId::new(i64_to_u64(
            "student_id",
            row.try_get("student_id").map_err(ser)?,
        )?),
        question_id: QuestionId::new(i64_to_u64(
            "question_id",
            row.try_get("question_id").map_err(ser)?,
        )?),
        created_at: row.try_get("created_at").map_err(ser)?,
        reattempted: row.try_get("reattempted").map_err(ser)?,
        result,
    })
}
