// src/services/ingestion.rs

//! Submission pipeline: upload check -> claim row -> grader call -> persist.
//!
//! Each paper either ends `completed` or is left in `error` with the reason,
//! so a failed paper can be uploaded again and its row reclaimed.

use std::{path::Path, time::Duration};

use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::Instrument;

use crate::{
    config::Config,
    error::{AppError, unique_violation},
    models::{
        exam::Exam,
        question::{OrGroup, Question},
        submission::{BatchItemResult, BatchReport, Submission, ValuationStatus},
    },
    services::{
        evaluator::{AnswerKeyPayload, EvaluationRequest, Evaluator},
        grading::{AnswerKey, Reconciliation, reconcile},
    },
    utils::html::{clean_optional, strip_tags},
};

const ACCEPTED_TYPES: [&str; 2] = ["image/jpeg", "image/png"];
const MAX_ROLL_NO_LEN: usize = 50;
const MAX_NAME_LEN: usize = 100;

/// Extra time a `pending` row gets beyond the grader timeout before another
/// upload may take it over.
const PENDING_GRACE: Duration = Duration::from_secs(60);

/// Per-paper limits of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    pub max_bytes: usize,
    /// A `pending` row untouched for this long is treated as abandoned.
    pub stale_pending_after: Duration,
}

impl IngestLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_bytes: config.max_upload_bytes,
            stale_pending_after: Duration::from_secs(config.evaluator_timeout_secs) + PENDING_GRACE,
        }
    }
}

/// One uploaded image as received from the multipart body.
#[derive(Debug, Clone)]
pub struct PaperUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl PaperUpload {
    /// File name without directories or extension, used as a fallback roll number.
    pub fn stem(&self) -> Option<String> {
        Path::new(&self.file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(strip_tags)
            .filter(|s| !s.is_empty() && s.len() <= MAX_ROLL_NO_LEN)
    }
}

/// Rejects anything that is not a non-empty JPEG/PNG within the size limit.
pub fn check_upload(upload: &PaperUpload, max_bytes: usize) -> Result<(), AppError> {
    if !ACCEPTED_TYPES.contains(&upload.content_type.as_str()) {
        return Err(AppError::UnsupportedMediaType(
            "Invalid file type. Only JPEG and PNG are allowed.".to_string(),
        ));
    }
    if upload.bytes.is_empty() {
        return Err(AppError::BadRequest(format!("File '{}' is empty", upload.file_name)));
    }
    if upload.bytes.len() > max_bytes {
        return Err(AppError::PayloadTooLarge(format!(
            "File '{}' exceeds the {} byte limit",
            upload.file_name, max_bytes
        )));
    }
    Ok(())
}

/// Validates a roll number coming from a form field or the grader.
pub fn normalize_roll_no(raw: &str) -> Result<String, AppError> {
    let roll_no = strip_tags(raw);
    if roll_no.is_empty() || roll_no.len() > MAX_ROLL_NO_LEN {
        return Err(AppError::BadRequest(format!(
            "Roll number must be 1-{} characters",
            MAX_ROLL_NO_LEN
        )));
    }
    Ok(roll_no)
}

fn normalize_name(raw: Option<&str>) -> Option<String> {
    clean_optional(raw).map(|name| name.chars().take(MAX_NAME_LEN).collect())
}

/// An exam together with its answer key, loaded once per request.
#[derive(Debug, Clone)]
pub struct ExamContext {
    pub exam: Exam,
    pub questions: Vec<Question>,
    pub or_groups: Vec<OrGroup>,
}

impl ExamContext {
    pub async fn load(pool: &PgPool, exam: Exam) -> Result<Self, AppError> {
        let questions = load_questions(pool, &exam.exam_id).await?;
        let or_groups = load_or_groups(pool, &exam.exam_id).await?;
        Ok(Self {
            exam,
            questions,
            or_groups,
        })
    }

    pub fn answer_key(&self) -> AnswerKey {
        AnswerKey::from_rows(&self.questions, &self.or_groups)
    }

    fn payload(&self) -> AnswerKeyPayload {
        AnswerKeyPayload {
            questions: self.questions.iter().map(Into::into).collect(),
            or_groups: self.or_groups.iter().map(Into::into).collect(),
        }
    }
}

pub async fn load_questions(pool: &PgPool, exam_id: &str) -> Result<Vec<Question>, AppError> {
    let questions = sqlx::query_as::<_, Question>(
        r#"
        SELECT id, exam_id, question_number, question_type, max_marks, teacher_answer
        FROM questions
        WHERE exam_id = $1
        ORDER BY question_number
        "#,
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    Ok(questions)
}

pub async fn load_or_groups(pool: &PgPool, exam_id: &str) -> Result<Vec<OrGroup>, AppError> {
    let groups = sqlx::query_as::<_, OrGroup>(
        r#"
        SELECT id, exam_id, group_type, option_a, option_b
        FROM or_groups
        WHERE exam_id = $1
        ORDER BY id
        "#,
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await?;

    Ok(groups)
}

/// How the roll number of a paper is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollNoSource {
    /// The teacher typed it; the grader's reading is ignored.
    Provided,
    /// Taken from the file name; replaced by the grader's reading when present.
    FileName,
}

/// A paper that made it through the pipeline.
#[derive(Debug)]
pub struct IngestOutcome {
    pub submission: Submission,
    pub unmatched: Vec<i32>,
}

/// A paper that failed; `submission_id` is set when a row was claimed and
/// left in the `error` state.
#[derive(Debug)]
pub struct IngestError {
    pub submission_id: Option<i64>,
    pub error: AppError,
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        err.error
    }
}

/// Runs one paper through the whole pipeline.
#[allow(clippy::too_many_arguments)]
pub async fn ingest_paper(
    pool: &PgPool,
    evaluator: &dyn Evaluator,
    ctx: &ExamContext,
    roll_no: String,
    roll_no_source: RollNoSource,
    student_name: Option<String>,
    upload: PaperUpload,
    limits: IngestLimits,
) -> Result<IngestOutcome, IngestError> {
    let span = tracing::info_span!("ingest", exam_id = %ctx.exam.exam_id, roll_no = %roll_no);

    async move {
        check_upload(&upload, limits.max_bytes).map_err(|error| IngestError {
            submission_id: None,
            error,
        })?;

        let student_name = normalize_name(student_name.as_deref());
        let submission_id = claim_submission(
            pool,
            &ctx.exam.exam_id,
            &roll_no,
            student_name.as_deref(),
            limits.stale_pending_after,
        )
        .await
            .map_err(|error| IngestError {
                submission_id: None,
                error,
            })?;

        let request = EvaluationRequest {
            exam_id: ctx.exam.exam_id.clone(),
            file_name: upload.file_name,
            content_type: upload.content_type,
            image: upload.bytes,
            answer_key: ctx.payload(),
        };

        let result = match evaluator.evaluate(request).await {
            Ok(result) => result,
            Err(e) => {
                let error = AppError::from(e);
                mark_error(pool, submission_id, &error.to_string()).await;
                return Err(IngestError {
                    submission_id: Some(submission_id),
                    error,
                });
            }
        };

        let reconciliation = reconcile(&ctx.answer_key(), result.answers, ctx.exam.total_marks);
        if !reconciliation.unmatched.is_empty() {
            tracing::warn!(
                unmatched = ?reconciliation.unmatched,
                "Grader returned answers for questions outside the answer key"
            );
        }

        let reported_roll_no = match roll_no_source {
            RollNoSource::FileName => result
                .roll_no
                .as_deref()
                .and_then(|r| normalize_roll_no(r).ok())
                .filter(|r| *r != roll_no),
            RollNoSource::Provided => None,
        };
        let ocr_name = normalize_name(result.student_name.as_deref());

        let persisted = persist_result(
            pool,
            submission_id,
            &reconciliation,
            ocr_name.as_deref(),
            reported_roll_no.as_deref(),
        )
        .await;

        match persisted {
            Ok(submission) => {
                tracing::info!(
                    submission_id,
                    total = submission.total_marks_obtained,
                    "Paper evaluated"
                );
                Ok(IngestOutcome {
                    submission,
                    unmatched: reconciliation.unmatched,
                })
            }
            Err(error) => {
                mark_error(pool, submission_id, &error.to_string()).await;
                Err(IngestError {
                    submission_id: Some(submission_id),
                    error,
                })
            }
        }
    }
    .instrument(span)
    .await
}

/// Processes papers one after another; a failed paper never stops the batch.
pub async fn ingest_batch(
    pool: &PgPool,
    evaluator: &dyn Evaluator,
    ctx: &ExamContext,
    uploads: Vec<PaperUpload>,
    limits: IngestLimits,
) -> BatchReport {
    let mut items = Vec::with_capacity(uploads.len());

    for upload in uploads {
        let file_name = upload.file_name.clone();

        let Some(roll_no) = upload.stem() else {
            tracing::warn!(file_name = %file_name, "Cannot derive a roll number from file name");
            items.push(failed_item(
                file_name,
                None,
                None,
                "Cannot derive a roll number from the file name".to_string(),
            ));
            continue;
        };

        let outcome = ingest_paper(
            pool,
            evaluator,
            ctx,
            roll_no.clone(),
            RollNoSource::FileName,
            None,
            upload,
            limits,
        )
        .await;

        match outcome {
            Ok(outcome) => items.push(BatchItemResult {
                file_name,
                roll_no: Some(outcome.submission.roll_no),
                submission_id: Some(outcome.submission.id),
                status: ValuationStatus::Completed,
                total_marks_obtained: outcome.submission.total_marks_obtained,
                percentage: outcome.submission.percentage,
                unmatched_questions: outcome.unmatched,
                error: None,
            }),
            Err(failure) => {
                tracing::warn!(
                    file_name = %file_name,
                    roll_no = %roll_no,
                    error = %failure.error,
                    "Paper failed, continuing with batch"
                );
                items.push(failed_item(
                    file_name,
                    Some(roll_no),
                    failure.submission_id,
                    failure.error.to_string(),
                ));
            }
        }
    }

    let report = BatchReport::new(ctx.exam.exam_id.clone(), items);
    tracing::info!(
        exam_id = %report.exam_id,
        total = report.total,
        succeeded = report.succeeded,
        failed = report.failed,
        "Batch finished"
    );
    report
}

fn failed_item(
    file_name: String,
    roll_no: Option<String>,
    submission_id: Option<i64>,
    error: String,
) -> BatchItemResult {
    BatchItemResult {
        file_name,
        roll_no,
        submission_id,
        status: ValuationStatus::Error,
        total_marks_obtained: None,
        percentage: None,
        unmatched_questions: Vec::new(),
        error: Some(error),
    }
}

/// Creates the `pending` row for a paper, or reclaims one left in `error`
/// or abandoned in `pending` for longer than `stale_after`. A `completed`
/// paper, or one still being evaluated, is a conflict.
async fn claim_submission(
    pool: &PgPool,
    exam_id: &str,
    roll_no: &str,
    student_name: Option<&str>,
    stale_after: Duration,
) -> Result<i64, AppError> {
    let mut tx = pool.begin().await?;

    let claimed: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO submissions (exam_id, roll_no, student_name, valuation_status)
        VALUES ($1, $2, $3, 'pending')
        ON CONFLICT (exam_id, roll_no) DO UPDATE SET
            valuation_status = 'pending',
            student_name = COALESCE(EXCLUDED.student_name, submissions.student_name),
            total_marks_obtained = NULL,
            percentage = NULL,
            error_message = NULL,
            updated_at = CURRENT_TIMESTAMP
        WHERE submissions.valuation_status = 'error'
           OR (submissions.valuation_status = 'pending'
               AND submissions.updated_at < CURRENT_TIMESTAMP - make_interval(secs => $4))
        RETURNING id
        "#,
    )
    .bind(exam_id)
    .bind(roll_no)
    .bind(student_name)
    .bind(stale_after.as_secs_f64())
    .fetch_optional(&mut *tx)
    .await?;

    let Some(submission_id) = claimed else {
        return Err(AppError::Conflict(format!(
            "Roll number '{}' already has an evaluated or in-progress submission for this exam",
            roll_no
        )));
    };

    sqlx::query("DELETE FROM student_answers WHERE submission_id = $1")
        .bind(submission_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(submission_id)
}

/// Stores the grader's answers and completes the submission, atomically.
async fn persist_result(
    pool: &PgPool,
    submission_id: i64,
    reconciliation: &Reconciliation,
    student_name: Option<&str>,
    roll_no: Option<&str>,
) -> Result<Submission, AppError> {
    let mut tx = pool.begin().await?;

    save_reconciliation(&mut tx, submission_id, reconciliation).await?;

    let submission = sqlx::query_as::<_, Submission>(
        r#"
        UPDATE submissions SET
            valuation_status = 'completed',
            student_name = COALESCE(student_name, $2),
            roll_no = COALESCE($3, roll_no),
            error_message = NULL,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $1
        RETURNING id, exam_id, roll_no, student_name, valuation_status,
                  total_marks_obtained, percentage, error_message, created_at, updated_at
        "#,
    )
    .bind(submission_id)
    .bind(student_name)
    .bind(roll_no)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some(_) => AppError::Conflict(format!(
            "Roll number '{}' read from the paper already has a submission for this exam",
            roll_no.unwrap_or_default()
        )),
        None => AppError::from(e),
    })?;

    tx.commit().await?;
    Ok(submission)
}

/// Replaces a submission's answers and totals with `reconciliation`.
pub async fn save_reconciliation(
    tx: &mut Transaction<'_, Postgres>,
    submission_id: i64,
    reconciliation: &Reconciliation,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM student_answers WHERE submission_id = $1")
        .bind(submission_id)
        .execute(&mut **tx)
        .await?;

    if !reconciliation.answers.is_empty() {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO student_answers \
             (submission_id, question_number, answer_text, marks_obtained, feedback, is_or_question, or_option_chosen) ",
        );
        builder.push_values(&reconciliation.answers, |mut row, answer| {
            row.push_bind(submission_id)
                .push_bind(answer.question_number)
                .push_bind(answer.answer_text.clone())
                .push_bind(answer.marks_obtained)
                .push_bind(answer.feedback.clone())
                .push_bind(answer.is_or_question)
                .push_bind(answer.or_option_chosen.map(|o| o.as_str()));
        });
        builder.build().execute(&mut **tx).await?;
    }

    sqlx::query(
        r#"
        UPDATE submissions
        SET total_marks_obtained = $2, percentage = $3, updated_at = CURRENT_TIMESTAMP
        WHERE id = $1
        "#,
    )
    .bind(submission_id)
    .bind(reconciliation.total_marks_obtained)
    .bind(reconciliation.percentage)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Moves a submission to `error`. Failures here are logged only: the
/// original error is what the caller reports.
async fn mark_error(pool: &PgPool, submission_id: i64, message: &str) {
    let result = sqlx::query(
        r#"
        UPDATE submissions
        SET valuation_status = $2, error_message = $3, updated_at = CURRENT_TIMESTAMP
        WHERE id = $1
        "#,
    )
    .bind(submission_id)
    .bind(ValuationStatus::Error.as_str())
    .bind(message)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!(submission_id, error = %e, "Failed to mark submission as error");
    }
}
