// src/models/exam.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::question::{AnswerKeySection, OrGroup, OrGroupInput, Question, QuestionInput};

/// Represents the 'exams' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    /// Generated readable ID, e.g. `Maths_10A_Mid_Term_3F9A1C2B`.
    pub exam_id: String,

    /// Owning teacher.
    pub user_id: i64,

    pub exam_name: String,
    pub class: String,
    pub subject: String,

    /// Maximum attainable marks, counting each OR group once.
    pub total_marks: i32,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Exam row joined with per-status submission counts, for listings.
#[derive(Debug, Serialize, FromRow)]
pub struct ExamSummary {
    pub exam_id: String,
    pub exam_name: String,
    pub class: String,
    pub subject: String,
    pub total_marks: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub submission_count: i64,
    pub completed_count: i64,
    pub pending_count: i64,
    pub error_count: i64,
}

/// Full exam view including its answer key.
#[derive(Debug, Serialize)]
pub struct ExamDetail {
    #[serde(flatten)]
    pub exam: Exam,
    pub questions: Vec<Question>,
    pub or_groups: Vec<OrGroup>,
}

/// DTO for creating an exam together with its answer key.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 200))]
    pub exam_name: String,
    #[validate(length(min = 1, max = 50))]
    pub class: String,
    #[validate(length(min = 1, max = 100))]
    pub subject: String,

    #[serde(flatten)]
    #[validate(nested)]
    pub answer_key: AnswerKeyRequest,
}

/// DTO describing an answer key, either as explicit questions, compact
/// sections, or both.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct AnswerKeyRequest {
    #[serde(default)]
    #[validate(nested)]
    pub questions: Vec<QuestionInput>,

    #[serde(default)]
    #[validate(nested)]
    pub sections: Vec<AnswerKeySection>,

    #[serde(default)]
    #[validate(nested)]
    pub or_groups: Vec<OrGroupInput>,
}
