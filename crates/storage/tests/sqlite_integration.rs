use chrono::{DateTime, Duration, Utc};
use quiz_core::model::{
    AttemptId, AttemptResult, ChoiceLabel, Choices, NewAttempt, Outcome, Question, QuestionDraft,
    QuestionId, Student, StudentId, TagName,
};
use quiz_core::time::fixed_now;
use storage::repository::{
    AttemptRepository, QuestionRepository, StorageError, StudentRepository,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn build_question(id: u64, tags: &[&str]) -> Question {
    QuestionDraft {
        text: format!("Question {id}"),
        choices: Choices::new("one", "two", "three", "four"),
        answer: ChoiceLabel::C,
        directions: Some("Pick one".into()),
        image: Some("https://example.com/q.png".into()),
        tags: tags.iter().map(|t| (*t).to_owned()).collect(),
    }
    .validate(QuestionId::new(id))
    .unwrap()
}

fn graded(next_up: DateTime<Utc>, streak: u32) -> AttemptResult {
    AttemptResult {
        outcome: Outcome::Correct,
        latency_secs: 4.5,
        ease: 0.93,
        easiness: 2.6,
        win_streak: streak,
        loss_streak: 0,
        interval_days: 1,
        next_up,
        graded_at: fixed_now(),
    }
}

fn new_attempt(student: u64, question: u64, created_at: DateTime<Utc>) -> NewAttempt {
    NewAttempt {
        student_id: StudentId::new(student),
        question_id: QuestionId::new(question),
        created_at,
    }
}

async fn seed_students(repo: &SqliteRepository, ids: &[u64]) {
    for id in ids {
        repo.upsert_student(&Student::new(
            StudentId::new(*id),
            format!("ext-{id}"),
            format!("Learner {id}"),
        ))
        .await
        .unwrap();
    }
}

#[tokio::test]
async fn sqlite_roundtrip_persists_questions_and_students() {
    let repo = connect("memdb_roundtrip").await;
    seed_students(&repo, &[1]).await;

    let question = build_question(1, &["Agile", "scrum"]);
    repo.upsert_question(&question).await.unwrap();
    repo.mark_attempted(question.id, StudentId::new(1)).await.unwrap();

    // Re-authoring the content must not reset delivery counters.
    let mut edited = build_question(1, &["agile"]);
    edited.text = "Edited".into();
    repo.upsert_question(&edited).await.unwrap();

    let fetched = repo.get_question(question.id).await.unwrap();
    assert_eq!(fetched.text, "Edited");
    assert_eq!(fetched.answer, ChoiceLabel::C);
    assert_eq!(fetched.choices.get(ChoiceLabel::D), "four");
    assert_eq!(fetched.directions.as_deref(), Some("Pick one"));
    assert!(fetched.image.is_some());
    assert_eq!(fetched.tags.len(), 1);
    assert_eq!(fetched.total_attempts, 1);
    assert!(fetched.was_attempted_by(StudentId::new(1)));

    let student = repo.find_student("ext-1").await.unwrap().unwrap();
    assert_eq!(student.display_name, "Learner 1");
    assert!(repo.find_student("ext-404").await.unwrap().is_none());

    let err = repo
        .upsert_student(&Student::new(StudentId::new(2), "ext-1", "Impostor"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let missing = repo.get_question(QuestionId::new(77)).await.unwrap_err();
    assert!(matches!(missing, StorageError::NotFound));
}

#[tokio::test]
async fn sqlite_unattempted_pool_is_ordered_and_filtered() {
    let repo = connect("memdb_pool").await;
    seed_students(&repo, &[1, 2]).await;
    for id in [5, 2, 9] {
        repo.upsert_question(&build_question(id, &["agile"])).await.unwrap();
    }
    repo.upsert_question(&build_question(4, &["kanban"])).await.unwrap();

    let agile = TagName::new("agile").unwrap();
    let student = StudentId::new(1);
    assert_eq!(repo.count_unattempted(student, &agile).await.unwrap(), 3);

    let ids: Vec<u64> = {
        let mut out = Vec::new();
        for offset in 0..3 {
            let q = repo.nth_unattempted(student, &agile, offset).await.unwrap().unwrap();
            out.push(q.id.value());
        }
        out
    };
    assert_eq!(ids, vec![2, 5, 9]);
    assert!(repo.nth_unattempted(student, &agile, 3).await.unwrap().is_none());

    repo.mark_attempted(QuestionId::new(5), student).await.unwrap();
    assert_eq!(repo.count_unattempted(student, &agile).await.unwrap(), 2);
    assert_eq!(
        repo.count_unattempted(StudentId::new(2), &agile).await.unwrap(),
        3
    );

    repo.increment_attempts(QuestionId::new(5)).await.unwrap();
    assert_eq!(
        repo.get_question(QuestionId::new(5)).await.unwrap().total_attempts,
        2
    );
    let err = repo.increment_attempts(QuestionId::new(404)).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound));
}

#[tokio::test]
async fn sqlite_claim_due_is_earliest_tagged_and_single_use() {
    let repo = connect("memdb_claim").await;
    seed_students(&repo, &[1]).await;
    repo.upsert_question(&build_question(1, &["agile"])).await.unwrap();
    repo.upsert_question(&build_question(2, &["agile"])).await.unwrap();
    repo.upsert_question(&build_question(3, &["kanban"])).await.unwrap();

    let now = fixed_now();
    for (q, hours_ago) in [(1, 1), (2, 6), (3, 12)] {
        let a = repo.insert_attempt(new_attempt(1, q, now - Duration::days(2))).await.unwrap();
        repo.record_result(a.id, &graded(now - Duration::hours(hours_ago), 1))
            .await
            .unwrap();
    }
    // Ungraded attempts never enter the queue.
    repo.insert_attempt(new_attempt(1, 1, now)).await.unwrap();

    let agile = TagName::new("agile").unwrap();
    let first = repo
        .claim_due(StudentId::new(1), &agile, now)
        .await
        .unwrap()
        .expect("due");
    assert_eq!(first.question_id, QuestionId::new(2));
    assert!(first.reattempted);

    let second = repo
        .claim_due(StudentId::new(1), &agile, now)
        .await
        .unwrap()
        .expect("due");
    assert_eq!(second.question_id, QuestionId::new(1));

    assert!(repo.claim_due(StudentId::new(1), &agile, now).await.unwrap().is_none());
}

async fn connect_file(dir: &tempfile::TempDir) -> SqliteRepository {
    let url = format!("sqlite://{}", dir.path().join("quiz.sqlite3").display());
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_concurrent_claims_never_share_an_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let repo = connect_file(&dir).await;
    seed_students(&repo, &[1]).await;
    repo.upsert_question(&build_question(1, &["agile"])).await.unwrap();

    let now = fixed_now();
    let a = repo.insert_attempt(new_attempt(1, 1, now - Duration::days(1))).await.unwrap();
    repo.record_result(a.id, &graded(now - Duration::minutes(1), 1))
        .await
        .unwrap();

    let agile = TagName::new("agile").unwrap();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let repo = repo.clone();
            let agile = agile.clone();
            tokio::spawn(async move { repo.claim_due(StudentId::new(1), &agile, now).await })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        if let Some(attempt) = handle.await.unwrap().unwrap() {
            claimed.push(attempt.id);
        }
    }
    assert_eq!(claimed, vec![a.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_independent_learners_supersede_without_locking_each_other_out() {
    let dir = tempfile::tempdir().unwrap();
    let repo = connect_file(&dir).await;
    let learners: Vec<u64> = (1..=16).collect();
    seed_students(&repo, &learners).await;
    for q in 1..=4 {
        repo.upsert_question(&build_question(q, &["agile"])).await.unwrap();
    }

    let handles: Vec<_> = learners
        .iter()
        .map(|&student| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let question = QuestionId::new(student % 4 + 1);
                let mut superseded = 0;
                for round in 0..3_i64 {
                    let at = fixed_now() + Duration::seconds(round);
                    if repo
                        .supersede_latest(StudentId::new(student), question)
                        .await?
                        .is_some()
                    {
                        superseded += 1;
                    }
                    let opened = repo
                        .insert_attempt(new_attempt(student, question.value(), at))
                        .await?;
                    repo.record_result(opened.id, &graded(at + Duration::days(1), 1))
                        .await?;
                }
                Ok::<_, StorageError>(superseded)
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 2);
    }
    for &student in &learners {
        let due = repo.next_due(StudentId::new(student)).await.unwrap().unwrap();
        assert_eq!(due.next_up(), Some(fixed_now() + Duration::seconds(2) + Duration::days(1)));
    }
}

#[tokio::test]
async fn sqlite_attempt_lifecycle_enforces_single_live_and_single_grade() {
    let repo = connect("memdb_lifecycle").await;
    seed_students(&repo, &[1]).await;
    repo.upsert_question(&build_question(1, &["agile"])).await.unwrap();

    let now = fixed_now();
    let first = repo.insert_attempt(new_attempt(1, 1, now)).await.unwrap();
    assert!(first.is_live());

    let dup = repo.insert_attempt(new_attempt(1, 1, now)).await.unwrap_err();
    assert!(matches!(dup, StorageError::Conflict));

    let result = graded(now + Duration::days(1), 1);
    let stored = repo.record_result(first.id, &result).await.unwrap();
    assert_eq!(stored.result.as_ref(), Some(&result));

    let again = repo
        .record_result(first.id, &graded(now, 9))
        .await
        .unwrap_err();
    assert!(matches!(again, StorageError::Conflict));
    assert_eq!(repo.get_attempt(first.id).await.unwrap().result, Some(result));

    let unknown = repo
        .record_result(AttemptId::new(999), &graded(now, 1))
        .await
        .unwrap_err();
    assert!(matches!(unknown, StorageError::NotFound));

    let second = repo
        .insert_attempt(new_attempt(1, 1, now + Duration::seconds(5)))
        .await
        .unwrap();
    let latest = repo
        .latest_graded(StudentId::new(1), QuestionId::new(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, first.id);

    let superseded = repo
        .supersede_latest(StudentId::new(1), QuestionId::new(1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(superseded.id, second.id);
    assert!(!superseded.reattempted);
    assert!(repo.get_attempt(second.id).await.unwrap().reattempted);
}

#[tokio::test]
async fn sqlite_next_due_skips_superseded_and_ungraded() {
    let repo = connect("memdb_next_due").await;
    seed_students(&repo, &[1, 2]).await;
    for id in 1..=3 {
        repo.upsert_question(&build_question(id, &["agile"])).await.unwrap();
    }

    let now = fixed_now();
    let early = repo.insert_attempt(new_attempt(1, 1, now)).await.unwrap();
    repo.record_result(early.id, &graded(now + Duration::hours(1), 1))
        .await
        .unwrap();
    repo.supersede_latest(StudentId::new(1), QuestionId::new(1))
        .await
        .unwrap();

    let later = repo.insert_attempt(new_attempt(1, 2, now)).await.unwrap();
    repo.record_result(later.id, &graded(now + Duration::days(3), 2))
        .await
        .unwrap();
    repo.insert_attempt(new_attempt(1, 3, now)).await.unwrap();

    let next = repo.next_due(StudentId::new(1)).await.unwrap().unwrap();
    assert_eq!(next.id, later.id);
    assert_eq!(next.next_up(), Some(now + Duration::days(3)));
    assert!(repo.next_due(StudentId::new(2)).await.unwrap().is_none());
}
