// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

/// Represents the 'questions' table: one entry of an exam's answer key.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub exam_id: String,
    pub question_number: i32,

    /// 'short' or 'long'.
    pub question_type: String,

    pub max_marks: i32,

    /// The reference answer the grader compares against.
    pub teacher_answer: String,
}

/// Represents the 'or_groups' table.
///
/// A student answers either every question of `option_a` or every question
/// of `option_b`; the better option is scored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OrGroup {
    pub id: i64,
    pub exam_id: String,

    /// 'single' (Q5 OR Q6) or 'pair' (Q5+Q6 OR Q7+Q8).
    pub group_type: String,

    pub option_a: Json<Vec<i32>>,
    pub option_b: Json<Vec<i32>>,
}

/// DTO for one explicit answer-key entry.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuestionInput {
    #[validate(range(min = 1, max = 1000))]
    pub question_number: i32,
    #[validate(custom(function = validate_question_type))]
    pub question_type: String,
    #[validate(range(min = 1, max = 1000))]
    pub max_marks: i32,
    #[validate(length(min = 1, max = 20000))]
    pub teacher_answer: String,
}

/// DTO for a compact block of answer-key entries sharing one question type.
///
/// `range` uses the `"1-5, 7"` notation, `marks` is either one value for all
/// questions or one value per question.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AnswerKeySection {
    #[validate(length(min = 1, max = 200))]
    pub range: String,
    #[validate(length(min = 1, max = 500))]
    pub marks: String,
    #[validate(custom(function = validate_question_type))]
    pub question_type: String,
    pub answers: Vec<String>,
}

/// DTO for an OR rule.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OrGroupInput {
    #[validate(custom(function = validate_group_type))]
    pub group_type: String,
    pub option_a: Vec<i32>,
    pub option_b: Vec<i32>,
}

impl OrGroupInput {
    /// Number of questions each option must contain.
    pub fn option_size(&self) -> usize {
        if self.group_type == "pair" { 2 } else { 1 }
    }
}

impl From<&OrGroup> for OrGroupInput {
    fn from(group: &OrGroup) -> Self {
        Self {
            group_type: group.group_type.clone(),
            option_a: group.option_a.0.clone(),
            option_b: group.option_b.0.clone(),
        }
    }
}

impl From<&Question> for QuestionInput {
    fn from(q: &Question) -> Self {
        Self {
            question_number: q.question_number,
            question_type: q.question_type.clone(),
            max_marks: q.max_marks,
            teacher_answer: q.teacher_answer.clone(),
        }
    }
}

fn validate_question_type(q_type: &str) -> Result<(), validator::ValidationError> {
    if q_type != "short" && q_type != "long" {
        return Err(validator::ValidationError::new("invalid_question_type"));
    }
    Ok(())
}

fn validate_group_type(g_type: &str) -> Result<(), validator::ValidationError> {
    if g_type != "single" && g_type != "pair" {
        return Err(validator::ValidationError::new("invalid_or_group_type"));
    }
    Ok(())
}
