use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS students (
            id INTEGER PRIMARY KEY,
            external_ref TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS questions (
            id INTEGER PRIMARY KEY,
            text TEXT NOT NULL,
            choice_a TEXT NOT NULL,
            choice_b TEXT NOT NULL,
            choice_c TEXT NOT NULL,
            choice_d TEXT NOT NULL,
            answer TEXT NOT NULL CHECK (answer IN ('a', 'b', 'c', 'd')),
            directions TEXT,
            image TEXT,
            total_attempts INTEGER NOT NULL DEFAULT 0 CHECK (total_attempts >= 0)
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS question_tags (
            question_id INTEGER NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (question_id, tag),
            FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS question_attempted_by (
            question_id INTEGER NOT NULL,
            student_id INTEGER NOT NULL,
            PRIMARY KEY (question_id, student_id),
            FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE,
            FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            reattempted INTEGER NOT NULL DEFAULT 0 CHECK (reattempted IN (0, 1)),
            graded INTEGER NOT NULL DEFAULT 0 CHECK (graded IN (0, 1)),
            answered INTEGER CHECK (answered IN (0, 1)),
            latency_secs REAL,
            ease REAL,
            easiness REAL,
            win_streak INTEGER CHECK (win_streak IS NULL OR win_streak >= 0),
            loss_streak INTEGER CHECK (loss_streak IS NULL OR loss_streak >= 0),
            interval_days INTEGER CHECK (interval_days IS NULL OR interval_days >= 0),
            next_up TEXT,
            graded_at TEXT,
            CHECK (graded = 0 OR (answered IS NOT NULL AND next_up IS NOT NULL)),
            FOREIGN KEY (student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY (question_id) REFERENCES questions(id) ON DELETE CASCADE
        );
    ",
    // At most one live attempt per (student, question).
    r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_attempts_one_live
            ON attempts (student_id, question_id)
            WHERE graded = 0 AND reattempted = 0;
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_attempts_student_due
            ON attempts (student_id, reattempted, next_up);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_attempts_pair_created
            ON attempts (student_id, question_id, created_at);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_question_tags_tag
            ON question_tags (tag, question_id);
    ",
];

/// Runs versioned migrations for the practice schema.
///
/// Creates students, questions with their tags and attempted-by sets, and
/// attempts, plus the indexes the due queue and sampler rely on.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
