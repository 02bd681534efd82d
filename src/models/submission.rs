// src/models/submission.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Lifecycle of a paper: `pending` until the grader answers, then
/// `completed` or `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationStatus {
    Pending,
    Completed,
    Error,
}

impl ValuationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValuationStatus::Pending => "pending",
            ValuationStatus::Completed => "completed",
            ValuationStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(ValuationStatus::Pending),
            "completed" => Some(ValuationStatus::Completed),
            "error" => Some(ValuationStatus::Error),
            _ => None,
        }
    }
}

impl fmt::Display for ValuationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents the 'submissions' table: one student's paper for one exam.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub exam_id: String,
    pub roll_no: String,

    /// Filled from the form or from OCR; may stay unknown.
    pub student_name: Option<String>,

    /// 'pending', 'completed' or 'error'.
    pub valuation_status: String,

    /// Null until evaluation completes.
    pub total_marks_obtained: Option<f64>,
    pub percentage: Option<f64>,

    /// Why the pipeline failed, for 'error' rows.
    pub error_message: Option<String>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Submission {
    pub fn status(&self) -> Option<ValuationStatus> {
        ValuationStatus::parse(&self.valuation_status)
    }
}

/// Represents the 'student_answers' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StudentAnswer {
    pub id: i64,
    pub submission_id: i64,
    pub question_number: i32,

    /// Raw text extracted by OCR.
    pub answer_text: String,

    pub marks_obtained: Option<f64>,
    pub feedback: Option<String>,
    pub is_or_question: bool,

    /// 'a' or 'b': the option of the OR group that was scored.
    pub or_option_chosen: Option<String>,
}

/// Submission with its answers, ordered by question number.
#[derive(Debug, Serialize)]
pub struct SubmissionDetail {
    #[serde(flatten)]
    pub submission: Submission,
    pub answers: Vec<StudentAnswer>,
}

/// Response of a single-paper upload.
#[derive(Debug, Serialize)]
pub struct GradedSubmission {
    #[serde(flatten)]
    pub detail: SubmissionDetail,
    /// Question numbers the grader returned that the answer key lacks.
    pub unmatched_questions: Vec<i32>,
}

/// Query parameters for listing an exam's submissions.
#[derive(Debug, Deserialize)]
pub struct SubmissionListParams {
    pub status: Option<String>,
}

/// DTO for a teacher overriding the marks of one answer.
#[derive(Debug, Deserialize, Validate)]
pub struct OverrideMarksRequest {
    #[validate(range(min = 0.0, message = "Marks cannot be negative"))]
    pub marks_obtained: f64,
}

/// Outcome of one paper within a batch upload.
#[derive(Debug, Serialize)]
pub struct BatchItemResult {
    pub file_name: String,
    pub roll_no: Option<String>,
    pub submission_id: Option<i64>,
    pub status: ValuationStatus,
    pub total_marks_obtained: Option<f64>,
    pub percentage: Option<f64>,
    pub unmatched_questions: Vec<i32>,
    pub error: Option<String>,
}

/// Aggregate outcome of a batch upload.
#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub exam_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchItemResult>,
}

impl BatchReport {
    pub fn new(exam_id: String, items: Vec<BatchItemResult>) -> Self {
        let succeeded = items
            .iter()
            .filter(|item| item.status == ValuationStatus::Completed)
            .count();
        Self {
            exam_id,
            total: items.len(),
            succeeded,
            failed: items.len() - succeeded,
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: ValuationStatus) -> BatchItemResult {
        BatchItemResult {
            file_name: "p.png".to_string(),
            roll_no: None,
            submission_id: None,
            status,
            total_marks_obtained: None,
            percentage: None,
            unmatched_questions: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ValuationStatus::Pending,
            ValuationStatus::Completed,
            ValuationStatus::Error,
        ] {
            assert_eq!(ValuationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ValuationStatus::parse("graded"), None);
    }

    #[test]
    fn batch_report_counts_outcomes() {
        let report = BatchReport::new(
            "EX".to_string(),
            vec![
                item(ValuationStatus::Completed),
                item(ValuationStatus::Error),
                item(ValuationStatus::Completed),
            ],
        );
        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
    }
}
