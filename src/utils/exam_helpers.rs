// src/utils/exam_helpers.rs

use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Highest question number and highest per-question mark an answer key may use.
pub const MAX_QUESTION_NUMBER: i32 = 1000;
pub const MAX_QUESTION_MARKS: i32 = 1000;

/// Length of the `exams.exam_id` column.
pub const MAX_EXAM_ID_LEN: usize = 100;

// Character budget of each ID part; with three separators and the 8-char
// suffix the ID stays within MAX_EXAM_ID_LEN.
const SUBJECT_BUDGET: usize = 30;
const CLASS_BUDGET: usize = 20;
const NAME_BUDGET: usize = 39;

fn id_part(raw: &str, budget: usize) -> String {
    WHITESPACE
        .replace_all(raw.trim(), "_")
        .chars()
        .take(budget)
        .collect()
}

/// Builds a readable, collision-resistant exam ID such as
/// `Maths_10A_Mid_Term_3F9A1C2B`.
///
/// Long parts are truncated so the ID fits the `exam_id` column.
pub fn generate_exam_id(exam_name: &str, class: &str, subject: &str) -> String {
    let name = id_part(exam_name, NAME_BUDGET);
    let class = id_part(class, CLASS_BUDGET);
    let subject = id_part(subject, SUBJECT_BUDGET);
    let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase();

    format!("{}_{}_{}_{}", subject, class, name, suffix)
}

/// Expands a question range such as `"1-5, 7, 9-10"`.
///
/// Blank input yields an empty list. Question numbers must lie in
/// `1..=MAX_QUESTION_NUMBER`, which also bounds the expanded length.
pub fn parse_question_range(range: &str) -> Result<Vec<i32>, AppError> {
    if range.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut questions = Vec::new();
    for part in range.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            let start = parse_question_number(start)?;
            let end = parse_question_number(end)?;
            if start > end {
                return Err(AppError::BadRequest(format!(
                    "Invalid question range '{}': start is after end",
                    part
                )));
            }
            questions.extend(start..=end);
        } else {
            questions.push(parse_question_number(part)?);
        }
    }

    Ok(questions)
}

fn parse_question_number(raw: &str) -> Result<i32, AppError> {
    match raw.trim().parse::<i32>() {
        Ok(n) if (1..=MAX_QUESTION_NUMBER).contains(&n) => Ok(n),
        _ => Err(AppError::BadRequest(format!(
            "Invalid question number '{}': expected 1-{}",
            raw.trim(),
            MAX_QUESTION_NUMBER
        ))),
    }
}

/// Parses a marks allocation for `question_count` questions.
///
/// A single value applies to every question; a comma separated list must
/// provide exactly one positive mark per question.
pub fn parse_marks(marks: &str, question_count: usize) -> Result<Vec<i32>, AppError> {
    let trimmed = marks.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("Marks string cannot be empty".to_string()));
    }

    if !trimmed.contains(',') {
        let mark = parse_mark(trimmed)?;
        return Ok(vec![mark; question_count]);
    }

    let marks = trimmed
        .split(',')
        .map(parse_mark)
        .collect::<Result<Vec<_>, _>>()?;

    if marks.len() != question_count {
        return Err(AppError::BadRequest(format!(
            "Marks count mismatch: provided {} marks but have {} questions",
            marks.len(),
            question_count
        )));
    }

    Ok(marks)
}

fn parse_mark(raw: &str) -> Result<i32, AppError> {
    match raw.trim().parse::<i32>() {
        Ok(m) if (1..=MAX_QUESTION_MARKS).contains(&m) => Ok(m),
        _ => Err(AppError::BadRequest(format!(
            "Marks must be integers from 1 to {}, got '{}'",
            MAX_QUESTION_MARKS,
            raw.trim()
        ))),
    }
}
