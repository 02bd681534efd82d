// src/handlers/submission.rs

use std::{path::Path as FsPath, sync::Arc};

use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::StatusCode,
    response::IntoResponse,
};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    handlers::exam::fetch_owned_exam,
    models::{
        exam::Exam,
        submission::{
            GradedSubmission, OverrideMarksRequest, StudentAnswer, Submission, SubmissionDetail,
            SubmissionListParams, ValuationStatus,
        },
    },
    services::{
        evaluator::{EvaluatedAnswer, Evaluator},
        grading::reconcile,
        ingestion::{
            ExamContext, IngestLimits, PaperUpload, RollNoSource, ingest_batch, ingest_paper,
            normalize_roll_no, save_reconciliation,
        },
    },
    utils::jwt::Claims,
};

const SUBMISSION_COLUMNS: &str = "id, exam_id, roll_no, student_name, valuation_status, \
     total_marks_obtained, percentage, error_message, created_at, updated_at";

const ANSWER_COLUMNS: &str = "id, submission_id, question_number, answer_text, marks_obtained, \
     feedback, is_or_question, or_option_chosen";

fn guess_content_type(file_name: &str) -> String {
    let extension = FsPath::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Reads one file part. At most `max_bytes + 1` bytes are kept so the size
/// check can still tell an oversized file apart; the rest is drained.
async fn read_file_field(mut field: Field<'_>, max_bytes: usize) -> Result<PaperUpload, AppError> {
    let file_name = field.file_name().unwrap_or("paper").to_string();
    let content_type = field
        .content_type()
        .map(|s| s.to_string())
        .unwrap_or_else(|| guess_content_type(&file_name));

    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|_| AppError::BadRequest(format!("Failed to read file '{}'", file_name)))?
    {
        let room = (max_bytes + 1).saturating_sub(bytes.len());
        bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    Ok(PaperUpload {
        file_name,
        content_type,
        bytes,
    })
}

async fn read_text_field(field: Field<'_>) -> Result<String, AppError> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|_| AppError::BadRequest(format!("Invalid value for '{}'", name)))
}

async fn load_answers(pool: &PgPool, submission_id: i64) -> Result<Vec<StudentAnswer>, AppError> {
    let answers = sqlx::query_as::<_, StudentAnswer>(&format!(
        "SELECT {} FROM student_answers WHERE submission_id = $1 ORDER BY question_number",
        ANSWER_COLUMNS
    ))
    .bind(submission_id)
    .fetch_all(pool)
    .await?;

    Ok(answers)
}

/// Loads a submission and checks ownership through its exam.
async fn fetch_owned_submission(
    pool: &PgPool,
    id: i64,
    claims: &Claims,
) -> Result<(Submission, Exam), AppError> {
    let submission = sqlx::query_as::<_, Submission>(&format!(
        "SELECT {} FROM submissions WHERE id = $1",
        SUBMISSION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Submission not found".to_string()))?;

    let exam = fetch_owned_exam(pool, &submission.exam_id, claims).await?;
    Ok((submission, exam))
}

/// Uploads and grades a single paper.
///
/// Multipart fields: `roll_no`, optional `student_name`, `paper_image`.
pub async fn create_submission(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(evaluator): State<Arc<dyn Evaluator>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_owned_exam(&pool, &exam_id, &claims).await?;

    let mut roll_no: Option<String> = None;
    let mut student_name: Option<String> = None;
    let mut upload: Option<PaperUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::BadRequest("Invalid multipart data".to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "roll_no" => roll_no = Some(read_text_field(field).await?),
            "student_name" => student_name = Some(read_text_field(field).await?),
            "paper_image" => upload = Some(read_file_field(field, config.max_upload_bytes).await?),
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let upload = upload.ok_or(AppError::BadRequest("paper_image is required".to_string()))?;
    let roll_no = normalize_roll_no(
        roll_no
            .as_deref()
            .ok_or(AppError::BadRequest("roll_no is required".to_string()))?,
    )?;

    let ctx = ExamContext::load(&pool, exam).await?;
    let outcome = ingest_paper(
        &pool,
        evaluator.as_ref(),
        &ctx,
        roll_no,
        RollNoSource::Provided,
        student_name,
        upload,
        IngestLimits::from_config(&config),
    )
    .await?;

    let answers = load_answers(&pool, outcome.submission.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(GradedSubmission {
            detail: SubmissionDetail {
                submission: outcome.submission,
                answers,
            },
            unmatched_questions: outcome.unmatched,
        }),
    ))
}

/// Uploads a batch of papers (`papers` fields) and grades them one by one.
///
/// Returns the per-file outcome; individual failures do not fail the request.
pub async fn batch_submissions(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    State(evaluator): State<Arc<dyn Evaluator>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<String>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let exam = fetch_owned_exam(&pool, &exam_id, &claims).await?;

    let mut uploads = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::BadRequest("Invalid multipart data".to_string()))?
    {
        if field.name() != Some("papers") {
            continue;
        }
        if uploads.len() == config.max_batch_files {
            return Err(AppError::BadRequest(format!(
                "A batch may contain at most {} papers",
                config.max_batch_files
            )));
        }
        uploads.push(read_file_field(field, config.max_upload_bytes).await?);
    }

    if uploads.is_empty() {
        return Err(AppError::BadRequest(
            "At least one file is required in 'papers'".to_string(),
        ));
    }

    tracing::info!(exam_id = %exam.exam_id, files = uploads.len(), "Batch upload received");

    let ctx = ExamContext::load(&pool, exam).await?;
    let report = ingest_batch(
        &pool,
        evaluator.as_ref(),
        &ctx,
        uploads,
        IngestLimits::from_config(&config),
    )
    .await;

    Ok(Json(report))
}

/// Lists an exam's submissions, optionally filtered by `?status=`.
pub async fn list_submissions(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<String>,
    Query(params): Query<SubmissionListParams>,
) -> Result<impl IntoResponse, AppError> {
    let status = match params.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(ValuationStatus::parse(raw).ok_or(AppError::BadRequest(format!(
            "Unknown status '{}'. Expected pending, completed or error.",
            raw
        )))?),
    };

    let exam = fetch_owned_exam(&pool, &exam_id, &claims).await?;

    let submissions = sqlx::query_as::<_, Submission>(&format!(
        r#"
        SELECT {} FROM submissions
        WHERE exam_id = $1
          AND ($2::TEXT IS NULL OR valuation_status = $2)
        ORDER BY roll_no
        "#,
        SUBMISSION_COLUMNS
    ))
    .bind(&exam.exam_id)
    .bind(status.map(|s| s.as_str()))
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list submissions: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    Ok(Json(submissions))
}

/// Retrieves a submission with its answers.
pub async fn get_submission(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let (submission, _) = fetch_owned_submission(&pool, id, &claims).await?;
    let answers = load_answers(&pool, submission.id).await?;

    Ok(Json(SubmissionDetail {
        submission,
        answers,
    }))
}

/// Teacher override of one answer's marks.
///
/// The submission's totals and OR choices are recomputed from the stored
/// answers and written back in one transaction.
pub async fn override_marks(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path((id, question_number)): Path<(i64, i32)>,
    Json(payload): Json<OverrideMarksRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let (submission, exam) = fetch_owned_submission(&pool, id, &claims).await?;
    if submission.status() != Some(ValuationStatus::Completed) {
        return Err(AppError::Conflict(
            "Marks can only be changed on completed submissions".to_string(),
        ));
    }

    let ctx = ExamContext::load(&pool, exam).await?;
    let key = ctx.answer_key();
    let max = key.max_marks(question_number).ok_or(AppError::NotFound(format!(
        "Question {} is not part of this exam",
        question_number
    )))?;
    if payload.marks_obtained > f64::from(max) {
        return Err(AppError::BadRequest(format!(
            "Marks for question {} cannot exceed {}",
            question_number, max
        )));
    }

    let stored = load_answers(&pool, submission.id).await?;
    if !stored.iter().any(|a| a.question_number == question_number) {
        return Err(AppError::NotFound(format!(
            "No answer recorded for question {}",
            question_number
        )));
    }

    let answers: Vec<EvaluatedAnswer> = stored
        .into_iter()
        .map(|a| EvaluatedAnswer {
            marks_obtained: if a.question_number == question_number {
                Some(payload.marks_obtained)
            } else {
                a.marks_obtained
            },
            question_number: a.question_number,
            answer_text: a.answer_text,
            feedback: a.feedback,
        })
        .collect();
    let reconciliation = reconcile(&key, answers, ctx.exam.total_marks);

    let mut tx = pool.begin().await?;
    save_reconciliation(&mut tx, submission.id, &reconciliation).await?;
    tx.commit().await?;

    tracing::info!(
        submission_id = submission.id,
        question_number,
        marks = payload.marks_obtained,
        total = reconciliation.total_marks_obtained,
        "Marks overridden"
    );

    let (submission, _) = fetch_owned_submission(&pool, id, &claims).await?;
    let answers = load_answers(&pool, submission.id).await?;
    Ok(Json(SubmissionDetail {
        submission,
        answers,
    }))
}

/// Deletes a submission and its answers.
pub async fn delete_submission(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let (submission, _) = fetch_owned_submission(&pool, id, &claims).await?;

    sqlx::query("DELETE FROM submissions WHERE id = $1")
        .bind(submission.id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete submission: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    tracing::info!(submission_id = submission.id, "Submission deleted");

    Ok(StatusCode::NO_CONTENT)
}
