use quiz_core::model::Student;

use super::{
    SqliteRepository,
    mapping::{conn, id_i64, map_student_row},
};
use crate::repository::{StorageError, StudentRepository};

#[async_trait::async_trait]
impl StudentRepository for SqliteRepository {
    async fn upsert_student(&self, student: &Student) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO students (id, external_ref, display_name)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                external_ref = excluded.external_ref,
                display_name = excluded.display_name
            ",
        )
        .bind(id_i64("student_id", student.id.value())?)
        .bind(&student.external_ref)
        .bind(&student.display_name)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn find_student(&self, external_ref: &str) -> Result<Option<Student>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, external_ref, display_name
            FROM students
            WHERE external_ref = ?1
            ",
        )
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_student_row).transpose()
    }
}
