use std::collections::BTreeSet;

use quiz_core::model::{Question, QuestionId, StudentId, TagName};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{conn, id_i64, map_question_row, ser},
};
use crate::repository::{QuestionRepository, StorageError};

// Shared by count and fetch so both see the same candidate set.
const UNATTEMPTED_FILTER: &str = r"
    FROM questions q
    WHERE EXISTS (
        SELECT 1 FROM question_tags t
        WHERE t.question_id = q.id AND t.tag = ?1
    )
    AND NOT EXISTS (
        SELECT 1 FROM question_attempted_by b
        WHERE b.question_id = q.id AND b.student_id = ?2
    )
";

impl SqliteRepository {
    async fn load_question(&self, id: i64) -> Result<Option<Question>, StorageError> {
        let Some(row) = sqlx::query(
            r"
            SELECT
                id, text, choice_a, choice_b, choice_c, choice_d, answer,
                directions, image, total_attempts
            FROM questions
            WHERE id = ?1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        else {
            return Ok(None);
        };

        let tag_rows = sqlx::query("SELECT tag FROM question_tags WHERE question_id = ?1")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;
        let mut tags = BTreeSet::new();
        for r in tag_rows {
            let raw: String = r.try_get("tag").map_err(ser)?;
            tags.insert(TagName::new(raw).map_err(ser)?);
        }

        let seen_rows =
            sqlx::query("SELECT student_id FROM question_attempted_by WHERE question_id = ?1")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(conn)?;
        let mut attempted_by = BTreeSet::new();
        for r in seen_rows {
            let sid: i64 = r.try_get("student_id").map_err(ser)?;
            let sid = u64::try_from(sid)
                .map_err(|_| StorageError::Serialization("student_id sign overflow".into()))?;
            attempted_by.insert(StudentId::new(sid));
        }

        map_question_row(&row, tags, attempted_by).map(Some)
    }
}

#[async_trait::async_trait]
impl QuestionRepository for SqliteRepository {
    async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let id = id_i64("question_id", question.id.value())?;
        let mut tx = self.begin_write().await.map_err(conn)?;

        sqlx::query(
            r"
            INSERT INTO questions (
                id, text, choice_a, choice_b, choice_c, choice_d, answer, directions, image
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                -- counters and attempted-by are owned by delivery, not authoring
                text = excluded.text,
                choice_a = excluded.choice_a,
                choice_b = excluded.choice_b,
                choice_c = excluded.choice_c,
                choice_d = excluded.choice_d,
                answer = excluded.answer,
                directions = excluded.directions,
                image = excluded.image
            ",
        )
        .bind(id)
        .bind(question.text.as_str())
        .bind(question.choices.a.as_str())
        .bind(question.choices.b.as_str())
        .bind(question.choices.c.as_str())
        .bind(question.choices.d.as_str())
        .bind(question.answer.as_str())
        .bind(question.directions.as_deref())
        .bind(question.image.as_ref().map(url::Url::as_str))
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        sqlx::query("DELETE FROM question_tags WHERE question_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        for tag in &question.tags {
            sqlx::query("INSERT INTO question_tags (question_id, tag) VALUES (?1, ?2)")
                .bind(id)
                .bind(tag.as_str())
                .execute(&mut *tx)
                .await
                .map_err(conn)?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_question(&self, id: QuestionId) -> Result<Question, StorageError> {
        self.load_question(id_i64("question_id", id.value())?)
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn count_unattempted(
        &self,
        student: StudentId,
        tag: &TagName,
    ) -> Result<u64, StorageError> {
        let sql = format!("SELECT COUNT(*) AS n {UNATTEMPTED_FILTER}");
        let row = sqlx::query(&sql)
            .bind(tag.as_str())
            .bind(id_i64("student_id", student.value())?)
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?;

        let n: i64 = row.try_get("n").map_err(ser)?;
        u64::try_from(n).map_err(|_| StorageError::Serialization(format!("invalid count: {n}")))
    }

    async fn nth_unattempted(
        &self,
        student: StudentId,
        tag: &TagName,
        offset: u64,
    ) -> Result<Option<Question>, StorageError> {
        let sql = format!("SELECT q.id AS id {UNATTEMPTED_FILTER} ORDER BY q.id ASC LIMIT 1 OFFSET ?3");
        let row = sqlx::query(&sql)
            .bind(tag.as_str())
            .bind(id_i64("student_id", student.value())?)
            .bind(id_i64("offset", offset)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        match row {
            Some(row) => self.load_question(row.try_get("id").map_err(ser)?).await,
            None => Ok(None),
        }
    }

    async fn mark_attempted(
        &self,
        question: QuestionId,
        student: StudentId,
    ) -> Result<(), StorageError> {
        let qid = id_i64("question_id", question.value())?;
        let mut tx = self.begin_write().await.map_err(conn)?;

        let updated = sqlx::query(
            "UPDATE questions SET total_attempts = total_attempts + 1 WHERE id = ?1",
        )
        .bind(qid)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;
        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        sqlx::query(
            r"
            INSERT INTO question_attempted_by (question_id, student_id)
            VALUES (?1, ?2)
            ON CONFLICT(question_id, student_id) DO NOTHING
            ",
        )
        .bind(qid)
        .bind(id_i64("student_id", student.value())?)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn increment_attempts(&self, question: QuestionId) -> Result<(), StorageError> {
        let updated = sqlx::query(
            "UPDATE questions SET total_attempts = total_attempts + 1 WHERE id = ?1",
        )
        .bind(id_i64("question_id", question.value())?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
