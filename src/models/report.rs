// src/models/report.rs

use serde::Serialize;
use sqlx::FromRow;

/// Number of submissions in each valuation state.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub completed: usize,
    pub error: usize,
}

/// Score statistics over completed submissions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreStatistics {
    pub average_total: f64,
    pub highest_total: f64,
    pub lowest_total: f64,
    pub average_percentage: f64,
    pub pass_percentage_threshold: f64,
    pub pass_count: usize,
}

/// Per-question averages over completed submissions.
///
/// Only answers that count toward a total are included: for an OR group,
/// the option that was not chosen is left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionStatistics {
    pub question_number: i32,
    pub max_marks: i32,
    pub attempts: usize,
    pub average_marks: f64,
}

/// One row of the ranked result list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub roll_no: String,
    pub student_name: Option<String>,
    pub total_marks_obtained: f64,
    pub percentage: f64,
}

/// Data consumed by the export generators (PDF/Excel).
#[derive(Debug, Serialize)]
pub struct ExamReport {
    pub exam_id: String,
    pub exam_name: String,
    pub class: String,
    pub subject: String,
    pub total_marks: i32,
    pub status_counts: StatusCounts,
    /// Absent when no submission has completed yet.
    pub statistics: Option<ScoreStatistics>,
    pub questions: Vec<QuestionStatistics>,
    pub ranking: Vec<RankingEntry>,
}

/// An answer row joined with its submission, as loaded for aggregation.
#[derive(Debug, Clone, FromRow)]
pub struct AnswerMarkRow {
    pub submission_id: i64,
    pub question_number: i32,
    pub marks_obtained: Option<f64>,
    /// Chosen option of the question's OR group, `None` outside groups.
    pub or_option_chosen: Option<String>,
}
