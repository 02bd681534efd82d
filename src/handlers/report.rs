// src/handlers/report.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::PgPool;

use crate::{
    error::AppError,
    handlers::exam::fetch_owned_exam,
    models::{report::AnswerMarkRow, submission::Submission},
    services::{
        ingestion::{load_or_groups, load_questions},
        report::build_report,
    },
    utils::jwt::Claims,
};

/// Aggregate results of an exam: status counts, score statistics,
/// per-question averages and the ranking.
pub async fn exam_report(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_owned_exam(&pool, &exam_id, &claims).await?;
    let questions = load_questions(&pool, &exam.exam_id).await?;
    let or_groups = load_or_groups(&pool, &exam.exam_id).await?;

    let submissions = sqlx::query_as::<_, Submission>(
        r#"
        SELECT id, exam_id, roll_no, student_name, valuation_status,
               total_marks_obtained, percentage, error_message, created_at, updated_at
        FROM submissions
        WHERE exam_id = $1
        "#,
    )
    .bind(&exam.exam_id)
    .fetch_all(&pool)
    .await?;

    let answers = sqlx::query_as::<_, AnswerMarkRow>(
        r#"
        SELECT sa.submission_id, sa.question_number, sa.marks_obtained, sa.or_option_chosen
        FROM student_answers sa
        JOIN submissions s ON s.id = sa.submission_id
        WHERE s.exam_id = $1 AND s.valuation_status = 'completed'
        "#,
    )
    .bind(&exam.exam_id)
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to load answers for report: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    tracing::debug!(
        exam_id = %exam.exam_id,
        submissions = submissions.len(),
        answers = answers.len(),
        "Building exam report"
    );

    Ok(Json(build_report(exam, &questions, &or_groups, &submissions, &answers)))
}
