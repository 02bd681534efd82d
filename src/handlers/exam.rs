// src/handlers/exam.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction, types::Json as SqlJson};
use validator::Validate;

use crate::{
    error::{AppError, unique_violation},
    models::exam::{AnswerKeyRequest, CreateExamRequest, Exam, ExamDetail, ExamSummary},
    services::{
        answer_key::{ValidatedAnswerKey, build_answer_key},
        grading::AnswerKey,
        ingestion::{load_or_groups, load_questions},
    },
    utils::{exam_helpers::generate_exam_id, html::strip_tags, jwt::Claims},
};

const EXAM_COLUMNS: &str =
    "exam_id, user_id, exam_name, class, subject, total_marks, created_at, updated_at";

/// Loads an exam and checks that the caller owns it.
///
/// 404 when the exam does not exist, 403 when it belongs to someone else.
pub async fn fetch_owned_exam(
    pool: &PgPool,
    exam_id: &str,
    claims: &Claims,
) -> Result<Exam, AppError> {
    let exam = sqlx::query_as::<_, Exam>(&format!(
        "SELECT {} FROM exams WHERE exam_id = $1",
        EXAM_COLUMNS
    ))
    .bind(exam_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Exam not found".to_string()))?;

    let user_id = claims.user_id()?;
    if exam.user_id != user_id {
        tracing::warn!(user_id, exam_id, "Access denied to exam owned by another user");
        return Err(AppError::Forbidden(
            "Access denied. You do not have permission to access this exam.".to_string(),
        ));
    }

    Ok(exam)
}

async fn exam_detail(pool: &PgPool, exam: Exam) -> Result<ExamDetail, AppError> {
    let questions = load_questions(pool, &exam.exam_id).await?;
    let or_groups = load_or_groups(pool, &exam.exam_id).await?;
    Ok(ExamDetail {
        exam,
        questions,
        or_groups,
    })
}

/// Writes the questions and OR groups of `key` for `exam_id`.
async fn insert_answer_key(
    tx: &mut Transaction<'_, Postgres>,
    exam_id: &str,
    key: &ValidatedAnswerKey,
) -> Result<(), AppError> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO questions (exam_id, question_number, question_type, max_marks, teacher_answer) ",
    );
    builder.push_values(&key.questions, |mut row, q| {
        row.push_bind(exam_id.to_string())
            .push_bind(q.question_number)
            .push_bind(q.question_type.clone())
            .push_bind(q.max_marks)
            .push_bind(q.teacher_answer.clone());
    });
    builder.build().execute(&mut **tx).await?;

    if !key.or_groups.is_empty() {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO or_groups (exam_id, group_type, option_a, option_b) ");
        builder.push_values(&key.or_groups, |mut row, g| {
            row.push_bind(exam_id.to_string())
                .push_bind(g.group_type.clone())
                .push_bind(SqlJson(g.option_a.clone()))
                .push_bind(SqlJson(g.option_b.clone()));
        });
        builder.build().execute(&mut **tx).await?;
    }

    Ok(())
}

fn clean_required(field: &str, value: &str) -> Result<String, AppError> {
    let cleaned = strip_tags(value);
    if cleaned.is_empty() {
        return Err(AppError::BadRequest(format!("{} cannot be empty", field)));
    }
    Ok(cleaned)
}

/// Creates an exam together with its answer key.
///
/// * Expands compact sections and validates OR rules.
/// * Computes total marks counting each OR group once.
/// * Inserts exam, questions and OR groups in a single transaction.
pub async fn create_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let user_id = claims.user_id()?;
    let exam_name = clean_required("Exam name", &payload.exam_name)?;
    let class = clean_required("Class", &payload.class)?;
    let subject = clean_required("Subject", &payload.subject)?;

    let key = build_answer_key(payload.answer_key)?;
    let total_marks = AnswerKey::from_inputs(&key.questions, &key.or_groups).total_marks();
    let exam_id = generate_exam_id(&exam_name, &class, &subject);

    let mut tx = pool.begin().await?;

    let exam = sqlx::query_as::<_, Exam>(&format!(
        r#"
        INSERT INTO exams (exam_id, user_id, exam_name, class, subject, total_marks)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {}
        "#,
        EXAM_COLUMNS
    ))
    .bind(&exam_id)
    .bind(user_id)
    .bind(&exam_name)
    .bind(&class)
    .bind(&subject)
    .bind(total_marks)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if unique_violation(&e).is_some() {
            AppError::Conflict("Exam ID collision, please retry".to_string())
        } else {
            tracing::error!("Failed to create exam: {:?}", e);
            AppError::from(e)
        }
    })?;

    insert_answer_key(&mut tx, &exam_id, &key).await?;
    tx.commit().await?;

    tracing::info!(
        exam_id = %exam.exam_id,
        questions = key.questions.len(),
        or_groups = key.or_groups.len(),
        total_marks,
        "Exam created"
    );

    Ok((StatusCode::CREATED, Json(exam_detail(&pool, exam).await?)))
}

/// Lists the caller's exams with submission counts per status.
pub async fn list_exams(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let exams = sqlx::query_as::<_, ExamSummary>(
        r#"
        SELECT
            e.exam_id, e.exam_name, e.class, e.subject, e.total_marks, e.created_at,
            COUNT(s.id) AS submission_count,
            COUNT(s.id) FILTER (WHERE s.valuation_status = 'completed') AS completed_count,
            COUNT(s.id) FILTER (WHERE s.valuation_status = 'pending') AS pending_count,
            COUNT(s.id) FILTER (WHERE s.valuation_status = 'error') AS error_count
        FROM exams e
        LEFT JOIN submissions s ON s.exam_id = e.exam_id
        WHERE e.user_id = $1
        GROUP BY e.exam_id
        ORDER BY e.created_at DESC
        "#,
    )
    .bind(claims.user_id()?)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list exams: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(exams))
}

/// Retrieves one exam with its answer key.
pub async fn get_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_owned_exam(&pool, &exam_id, &claims).await?;
    Ok(Json(exam_detail(&pool, exam).await?))
}

/// Replaces the answer key of an exam that has no submissions yet.
pub async fn replace_answer_key(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<String>,
    Json(payload): Json<AnswerKeyRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let exam = fetch_owned_exam(&pool, &exam_id, &claims).await?;

    let submissions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions WHERE exam_id = $1")
        .bind(&exam.exam_id)
        .fetch_one(&pool)
        .await?;
    if submissions > 0 {
        return Err(AppError::Conflict(
            "Answer key cannot change once papers have been submitted".to_string(),
        ));
    }

    let key = build_answer_key(payload)?;
    let total_marks = AnswerKey::from_inputs(&key.questions, &key.or_groups).total_marks();

    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM questions WHERE exam_id = $1")
        .bind(&exam.exam_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM or_groups WHERE exam_id = $1")
        .bind(&exam.exam_id)
        .execute(&mut *tx)
        .await?;

    insert_answer_key(&mut tx, &exam.exam_id, &key).await?;

    let exam = sqlx::query_as::<_, Exam>(&format!(
        r#"
        UPDATE exams SET total_marks = $2, updated_at = CURRENT_TIMESTAMP
        WHERE exam_id = $1
        RETURNING {}
        "#,
        EXAM_COLUMNS
    ))
    .bind(&exam.exam_id)
    .bind(total_marks)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(exam_id = %exam.exam_id, total_marks, "Answer key replaced");

    Ok(Json(exam_detail(&pool, exam).await?))
}

/// Deletes an exam; questions, OR groups, submissions and answers cascade.
pub async fn delete_exam(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_owned_exam(&pool, &exam_id, &claims).await?;

    sqlx::query("DELETE FROM exams WHERE exam_id = $1")
        .bind(&exam.exam_id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete exam: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    tracing::info!(exam_id = %exam.exam_id, "Exam deleted");

    Ok(StatusCode::NO_CONTENT)
}
