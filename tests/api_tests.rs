// tests/api_tests.rs

use std::sync::Arc;

use async_trait::async_trait;
use paper_valuation::{
    config::Config,
    routes,
    services::evaluator::{
        EvaluatedAnswer, EvaluationRequest, EvaluationResult, Evaluator, EvaluatorError,
    },
    state::AppState,
};
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use sqlx::{PgPool, postgres::PgPoolOptions};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-scan";

/// Grader stand-in: `fail*` files are rejected, everything else receives
/// the same marks (Q1=4, Q2=5, Q3 unmarked, Q4=6, Q5=8 and an unknown Q9).
/// `renamed*` papers are read as roll number R900, `clash*` papers as R001.
struct StubEvaluator;

#[async_trait]
impl Evaluator for StubEvaluator {
    async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<EvaluationResult, EvaluatorError> {
        if request.file_name.starts_with("fail") {
            return Err(EvaluatorError::Rejected {
                status: 422,
                message: "unreadable scan".to_string(),
            });
        }

        let answer = |n: i32, marks: Option<f64>| EvaluatedAnswer {
            question_number: n,
            answer_text: format!("answer {}", n),
            marks_obtained: marks,
            feedback: None,
        };

        let roll_no = if request.file_name.starts_with("renamed") {
            Some("R900".to_string())
        } else if request.file_name.starts_with("clash") {
            Some("R001".to_string())
        } else {
            None
        };

        Ok(EvaluationResult {
            roll_no,
            student_name: Some("Asha".to_string()),
            answers: vec![
                answer(1, Some(4.0)),
                answer(2, Some(5.0)),
                answer(3, None),
                answer(4, Some(6.0)),
                answer(5, Some(8.0)),
                answer(9, Some(2.0)),
            ],
        })
    }
}

struct TestApp {
    address: String,
    pool: PgPool,
}

/// Helper function to spawn the app on a random port for testing.
/// Returns `None` when no database is configured.
async fn spawn_app() -> Option<TestApp> {
    // Note: For Postgres, you must have a running database.
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping database-backed test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing. Make sure DATABASE_URL is set.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    let config = Config {
        database_url: database_url.clone(),
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        rust_log: "error".to_string(),
        evaluator_url: "http://127.0.0.1:9/evaluate".parse().unwrap(),
        evaluator_timeout_secs: 5,
        max_upload_bytes: 1024,
        max_batch_files: 5,
        port: 0,
        admin_username: None,
        admin_password: None,
        admin_email: None,
    };

    let state = AppState {
        pool: pool.clone(),
        config,
        evaluator: Arc::new(StubEvaluator),
    };
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let address = format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Some(TestApp { address, pool })
}

/// Registers a fresh teacher and returns its bearer token.
async fn register_and_login(client: &reqwest::Client, address: &str) -> String {
    let username = format!("t{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
    let password = "password123";

    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&json!({
            "username": username,
            "email": format!("{}@school.test", username),
            "password": password
        }))
        .send()
        .await
        .expect("Register failed");
    assert_eq!(response.status().as_u16(), 201);

    let login: Value = client
        .post(format!("{}/api/auth/login", address))
        .json(&json!({ "username": username, "password": password }))
        .send()
        .await
        .expect("Login failed")
        .json()
        .await
        .expect("Failed to parse login json");

    login["token"].as_str().expect("Token not found").to_string()
}

async fn create_exam(client: &reqwest::Client, address: &str, token: &str) -> Value {
    let response = client
        .post(format!("{}/api/exams", address))
        .bearer_auth(token)
        .json(&json!({
            "exam_name": "Unit <b>2</b>",
            "class": "9B",
            "subject": "Biology",
            "sections": [{
                "range": "1-3",
                "marks": "5",
                "question_type": "short",
                "answers": ["cell", "nucleus", "ribosome"]
            }],
            "questions": [
                { "question_number": 4, "question_type": "long", "max_marks": 10, "teacher_answer": "mitosis" },
                { "question_number": 5, "question_type": "long", "max_marks": 10, "teacher_answer": "meiosis" }
            ],
            "or_groups": [{ "group_type": "single", "option_a": [4], "option_b": [5] }]
        }))
        .send()
        .await
        .expect("Create exam failed");
    assert_eq!(response.status().as_u16(), 201);
    response.json().await.unwrap()
}

fn paper(file_name: &str, mime: &str) -> Part {
    Part::bytes(PNG_BYTES.to_vec())
        .file_name(file_name.to_string())
        .mime_str(mime)
        .unwrap()
}

#[tokio::test]
async fn unknown_path_returns_404() {
    let Some(TestApp { address, .. }) = spawn_app().await else { return };
    let response = reqwest::Client::new()
        .get(format!("{}/random_path_that_does_not_exist", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn register_rejects_invalid_payload_and_duplicates() {
    let Some(TestApp { address, .. }) = spawn_app().await else { return };
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/auth/register", address))
        .json(&json!({ "username": "yo", "email": "yo@school.test", "password": "password123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let username = format!("t{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
    let body = json!({
        "username": username,
        "email": format!("{}@school.test", username),
        "password": "password123"
    });
    let first = client
        .post(format!("{}/api/auth/register", address))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status().as_u16(), 201);
    let created: Value = first.json().await.unwrap();
    assert!(created.get("password").is_none());

    let second = client
        .post(format!("{}/api/auth/register", address))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);
}

#[tokio::test]
async fn exam_creation_expands_sections_and_counts_or_groups_once() {
    let Some(TestApp { address, .. }) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &address).await;

    let exam = create_exam(&client, &address, &token).await;
    let exam_id = exam["exam_id"].as_str().unwrap();

    assert!(exam_id.starts_with("Biology_9B_Unit_2_"));
    assert_eq!(exam["exam_name"], "Unit 2");
    assert_eq!(exam["total_marks"], 25);
    assert_eq!(exam["questions"].as_array().unwrap().len(), 5);
    assert_eq!(exam["or_groups"][0]["option_b"], json!([5]));

    let listed: Vec<Value> = client
        .get(format!("{}/api/exams", address))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["submission_count"], 0);

    // Another teacher cannot see it.
    let other = register_and_login(&client, &address).await;
    let response = client
        .get(format!("{}/api/exams/{}", address, exam_id))
        .bearer_auth(&other)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn single_upload_batch_report_and_override_flow() {
    let Some(TestApp { address, .. }) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &address).await;
    let exam = create_exam(&client, &address, &token).await;
    let exam_id = exam["exam_id"].as_str().unwrap().to_string();

    // 1. Single paper
    let form = Form::new()
        .text("roll_no", "R001")
        .part("paper_image", paper("scan.png", "image/png"));
    let response = client
        .post(format!("{}/api/exams/{}/submissions", address, exam_id))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 201);
    let graded: Value = response.json().await.unwrap();
    assert_eq!(graded["valuation_status"], "completed");
    assert_eq!(graded["student_name"], "Asha");
    // OR group picks Q5 (8) over Q4 (6): 4 + 5 + 8
    assert_eq!(graded["total_marks_obtained"], 17.0);
    assert_eq!(graded["percentage"], 68.0);
    assert_eq!(graded["unmatched_questions"], json!([9]));
    assert_eq!(graded["answers"].as_array().unwrap().len(), 5);
    let submission_id = graded["id"].as_i64().unwrap();

    // 2. Same roll number again is a conflict
    let form = Form::new()
        .text("roll_no", "R001")
        .part("paper_image", paper("scan.png", "image/png"));
    let response = client
        .post(format!("{}/api/exams/{}/submissions", address, exam_id))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    // 3. Batch with one good paper and two failures
    let form = Form::new()
        .part("papers", paper("R002.png", "image/png"))
        .part("papers", paper("fail_R003.png", "image/png"))
        .part("papers", paper("notes.txt", "text/plain"));
    let response = client
        .post(format!("{}/api/exams/{}/submissions/batch", address, exam_id))
        .bearer_auth(&token)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let batch: Value = response.json().await.unwrap();
    assert_eq!(batch["total"], 3);
    assert_eq!(batch["succeeded"], 1);
    assert_eq!(batch["failed"], 2);
    assert_eq!(batch["items"][0]["roll_no"], "R002");
    assert_eq!(batch["items"][0]["status"], "completed");
    assert_eq!(batch["items"][1]["status"], "error");
    assert!(batch["items"][1]["submission_id"].is_i64());
    assert!(batch["items"][2]["submission_id"].is_null());

    // 4. Only the rejected paper is left in error
    let errored: Vec<Value> = client
        .get(format!("{}/api/exams/{}/submissions?status=error", address, exam_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(errored.len(), 1);
    assert_eq!(errored[0]["roll_no"], "fail_R003");
    assert!(errored[0]["error_message"].as_str().unwrap().contains("unreadable scan"));

    // 5. Report
    let report: Value = client
        .get(format!("{}/api/exams/{}/report", address, exam_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["status_counts"], json!({ "pending": 0, "completed": 2, "error": 1 }));
    assert_eq!(report["statistics"]["average_total"], 17.0);
    assert_eq!(report["ranking"][0]["rank"], 1);
    assert_eq!(report["ranking"][1]["rank"], 1);

    // 6. Override: Q4 now beats Q5, so the OR choice flips to option a
    let response = client
        .patch(format!("{}/api/submissions/{}/answers/4", address, submission_id))
        .bearer_auth(&token)
        .json(&json!({ "marks_obtained": 9.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["total_marks_obtained"], 18.0);
    let q4 = updated["answers"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["question_number"] == 4)
        .unwrap();
    assert_eq!(q4["or_option_chosen"], "a");

    let response = client
        .patch(format!("{}/api/submissions/{}/answers/4", address, submission_id))
        .bearer_auth(&token)
        .json(&json!({ "marks_obtained": 11.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // 7. The answer key is frozen once papers exist
    let response = client
        .put(format!("{}/api/exams/{}/answer-key", address, exam_id))
        .bearer_auth(&token)
        .json(&json!({
            "questions": [{ "question_number": 1, "question_type": "short", "max_marks": 5, "teacher_answer": "x" }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    // 8. Delete a submission
    let response = client
        .delete(format!("{}/api/submissions/{}", address, submission_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);
}

async fn upload_single(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    exam_id: &str,
    roll_no: &str,
) -> reqwest::Response {
    let form = Form::new()
        .text("roll_no", roll_no.to_string())
        .part("paper_image", paper("scan.png", "image/png"));
    client
        .post(format!("{}/api/exams/{}/submissions", address, exam_id))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .unwrap()
}

async fn upload_batch(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    exam_id: &str,
    files: &[&str],
) -> reqwest::Response {
    let form = files
        .iter()
        .fold(Form::new(), |form, name| form.part("papers", paper(name, "image/png")));
    client
        .post(format!("{}/api/exams/{}/submissions/batch", address, exam_id))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .unwrap()
}

async fn answer_numbers(pool: &PgPool, submission_id: i64) -> Vec<i32> {
    sqlx::query_scalar(
        "SELECT question_number FROM student_answers WHERE submission_id = $1 ORDER BY question_number",
    )
    .bind(submission_id)
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn reupload_reclaims_the_errored_row() {
    let Some(TestApp { address, pool }) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &address).await;
    let exam = create_exam(&client, &address, &token).await;
    let exam_id = exam["exam_id"].as_str().unwrap();

    let batch: Value = upload_batch(&client, &address, &token, exam_id, &["fail_R010.png"])
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(batch["items"][0]["status"], "error");
    let errored_id = batch["items"][0]["submission_id"].as_i64().unwrap();

    // A leftover answer from an earlier attempt must not survive the reclaim.
    sqlx::query(
        "INSERT INTO student_answers (submission_id, question_number, answer_text) VALUES ($1, 7, 'stale')",
    )
    .bind(errored_id)
    .execute(&pool)
    .await
    .unwrap();

    let response = upload_single(&client, &address, &token, exam_id, "fail_R010").await;
    assert_eq!(response.status().as_u16(), 201);
    let graded: Value = response.json().await.unwrap();
    assert_eq!(graded["id"].as_i64(), Some(errored_id));
    assert_eq!(graded["valuation_status"], "completed");
    assert!(graded["error_message"].is_null());
    assert_eq!(answer_numbers(&pool, errored_id).await, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn fresh_pending_row_blocks_reupload_until_stale() {
    let Some(TestApp { address, pool }) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &address).await;
    let exam = create_exam(&client, &address, &token).await;
    let exam_id = exam["exam_id"].as_str().unwrap();

    let pending_id: i64 = sqlx::query_scalar(
        "INSERT INTO submissions (exam_id, roll_no, valuation_status) VALUES ($1, 'R050', 'pending') RETURNING id",
    )
    .bind(exam_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    let response = upload_single(&client, &address, &token, exam_id, "R050").await;
    assert_eq!(response.status().as_u16(), 409);

    sqlx::query("UPDATE submissions SET updated_at = CURRENT_TIMESTAMP - INTERVAL '1 hour' WHERE id = $1")
        .bind(pending_id)
        .execute(&pool)
        .await
        .unwrap();

    let response = upload_single(&client, &address, &token, exam_id, "R050").await;
    assert_eq!(response.status().as_u16(), 201);
    let graded: Value = response.json().await.unwrap();
    assert_eq!(graded["id"].as_i64(), Some(pending_id));
}

#[tokio::test]
async fn batch_adopts_grader_roll_number_and_isolates_clashes() {
    let Some(TestApp { address, .. }) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &address).await;
    let exam = create_exam(&client, &address, &token).await;
    let exam_id = exam["exam_id"].as_str().unwrap();

    let response = upload_single(&client, &address, &token, exam_id, "R001").await;
    assert_eq!(response.status().as_u16(), 201);

    let response = upload_batch(
        &client,
        &address,
        &token,
        exam_id,
        &["renamed_scan.png", "clash_scan.png", "R002.png"],
    )
    .await;
    assert_eq!(response.status().as_u16(), 200);
    let batch: Value = response.json().await.unwrap();
    assert_eq!(batch["succeeded"], 2);
    assert_eq!(batch["failed"], 1);

    assert_eq!(batch["items"][0]["roll_no"], "R900");
    assert_eq!(batch["items"][0]["status"], "completed");

    assert_eq!(batch["items"][1]["status"], "error");
    assert_eq!(batch["items"][1]["roll_no"], "clash_scan");
    assert!(batch["items"][1]["error"].as_str().unwrap().contains("R001"));

    assert_eq!(batch["items"][2]["roll_no"], "R002");
    assert_eq!(batch["items"][2]["status"], "completed");

    let listed: Vec<Value> = client
        .get(format!("{}/api/exams/{}/submissions", address, exam_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let mut rolls: Vec<(&str, &str)> = listed
        .iter()
        .map(|s| (s["roll_no"].as_str().unwrap(), s["valuation_status"].as_str().unwrap()))
        .collect();
    rolls.sort();
    assert_eq!(
        rolls,
        vec![
            ("R001", "completed"),
            ("R002", "completed"),
            ("R900", "completed"),
            ("clash_scan", "error"),
        ]
    );
}

#[tokio::test]
async fn batch_over_file_limit_is_rejected() {
    let Some(TestApp { address, .. }) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &address).await;
    let exam = create_exam(&client, &address, &token).await;
    let exam_id = exam["exam_id"].as_str().unwrap();

    // spawn_app allows five papers per batch.
    let files = ["1.png", "2.png", "3.png", "4.png", "5.png", "6.png"];
    let response = upload_batch(&client, &address, &token, exam_id, &files).await;
    assert_eq!(response.status().as_u16(), 400);

    let listed: Vec<Value> = client
        .get(format!("{}/api/exams/{}/submissions", address, exam_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn deleting_an_exam_removes_submissions_and_answers() {
    let Some(TestApp { address, pool }) = spawn_app().await else { return };
    let client = reqwest::Client::new();
    let token = register_and_login(&client, &address).await;
    let exam = create_exam(&client, &address, &token).await;
    let exam_id = exam["exam_id"].as_str().unwrap();

    let graded: Value = upload_single(&client, &address, &token, exam_id, "R001")
        .await
        .json()
        .await
        .unwrap();
    let submission_id = graded["id"].as_i64().unwrap();
    assert!(!answer_numbers(&pool, submission_id).await.is_empty());

    let response = client
        .delete(format!("{}/api/exams/{}", address, exam_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let response = client
        .get(format!("{}/api/submissions/{}", address, submission_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE exam_id = $1")
        .bind(exam_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(answer_numbers(&pool, submission_id).await.is_empty());
}
