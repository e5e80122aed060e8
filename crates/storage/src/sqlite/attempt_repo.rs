use chrono::{DateTime, Utc};
use quiz_core::model::{
    Attempt, AttemptId, AttemptResult, NewAttempt, QuestionId, StudentId, TagName,
};

use super::{
    SqliteRepository,
    mapping::{ATTEMPT_COLUMNS, conn, id_i64, map_attempt_row},
};
use crate::repository::{AttemptRepository, StorageError};

#[async_trait::async_trait]
impl AttemptRepository for SqliteRepository {
    async fn insert_attempt(&self, new: NewAttempt) -> Result<Attempt, StorageError> {
        // The partial unique index on live attempts turns a duplicate into Conflict.
        let sql = format!(
            r"
            INSERT INTO attempts (student_id, question_id, created_at)
            VALUES (?1, ?2, ?3)
            RETURNING {ATTEMPT_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("student_id", new.student_id.value())?)
            .bind(id_i64("question_id", new.question_id.value())?)
            .bind(new.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?;

        map_attempt_row(&row)
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<Attempt, StorageError> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(id_i64("attempt_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        let Some(row) = row else {
            return Err(StorageError::NotFound);
        };
        map_attempt_row(&row)
    }

    async fn claim_due(
        &self,
        student: StudentId,
        tag: &TagName,
        now: DateTime<Utc>,
    ) -> Result<Option<Attempt>, StorageError> {
        // Select and flip in one statement; SQLite serializes writers, so two
        // callers can never both see reattempted = 0 for the same row.
        let sql = format!(
            r"
            UPDATE attempts
            SET reattempted = 1
            WHERE id = (
                SELECT a.id
                FROM attempts a
                WHERE a.student_id = ?1
                  AND a.reattempted = 0
                  AND a.graded = 1
                  AND a.next_up <= ?3
                  AND EXISTS (
                      SELECT 1 FROM question_tags t
                      WHERE t.question_id = a.question_id AND t.tag = ?2
                  )
                ORDER BY a.next_up ASC, a.id ASC
                LIMIT 1
            )
            AND reattempted = 0
            RETURNING {ATTEMPT_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("student_id", student.value())?)
            .bind(tag.as_str())
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_attempt_row).transpose()
    }

    async fn supersede_latest(
        &self,
        student: StudentId,
        question: QuestionId,
    ) -> Result<Option<Attempt>, StorageError> {
        let mut tx = self.begin_write().await.map_err(conn)?;

        let sql = format!(
            r"
            SELECT {ATTEMPT_COLUMNS}
            FROM attempts
            WHERE student_id = ?1 AND question_id = ?2
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("student_id", student.value())?)
            .bind(id_i64("question_id", question.value())?)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let before = map_attempt_row(&row)?;

        sqlx::query("UPDATE attempts SET reattempted = 1 WHERE id = ?1")
            .bind(id_i64("attempt_id", before.id.value())?)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(Some(before))
    }

    async fn latest_graded(
        &self,
        student: StudentId,
        question: QuestionId,
    ) -> Result<Option<Attempt>, StorageError> {
        let sql = format!(
            r"
            SELECT {ATTEMPT_COLUMNS}
            FROM attempts
            WHERE student_id = ?1 AND question_id = ?2 AND graded = 1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("student_id", student.value())?)
            .bind(id_i64("question_id", question.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_attempt_row).transpose()
    }

    async fn record_result(
        &self,
        id: AttemptId,
        result: &AttemptResult,
    ) -> Result<Attempt, StorageError> {
        let sql = format!(
            r"
            UPDATE attempts
            SET graded = 1,
                answered = ?2,
                latency_secs = ?3,
                ease = ?4,
                easiness = ?5,
                win_streak = ?6,
                loss_streak = ?7,
                interval_days = ?8,
                next_up = ?9,
                graded_at = ?10
            WHERE id = ?1 AND graded = 0
            RETURNING {ATTEMPT_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("attempt_id", id.value())?)
            .bind(result.outcome.is_correct())
            .bind(result.latency_secs)
            .bind(result.ease)
            .bind(result.easiness)
            .bind(i64::from(result.win_streak))
            .bind(i64::from(result.loss_streak))
            .bind(i64::from(result.interval_days))
            .bind(result.next_up)
            .bind(result.graded_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        match row {
            Some(row) => map_attempt_row(&row),
            // Either the id is unknown or it was graded first by someone else.
            None => {
                self.get_attempt(id).await?;
                Err(StorageError::Conflict)
            }
        }
    }

    async fn next_due(&self, student: StudentId) -> Result<Option<Attempt>, StorageError> {
        let sql = format!(
            r"
            SELECT {ATTEMPT_COLUMNS}
            FROM attempts
            WHERE student_id = ?1 AND reattempted = 0 AND next_up IS NOT NULL
            ORDER BY next_up ASC, id ASC
            LIMIT 1
            "
        );
        let row = sqlx::query(&sql)
            .bind(id_i64("student_id", student.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_attempt_row).transpose()
    }
}
