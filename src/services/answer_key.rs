// src/services/answer_key.rs

use std::collections::{BTreeSet, HashSet};

use validator::Validate;

use crate::{
    error::AppError,
    models::{
        exam::AnswerKeyRequest,
        question::{OrGroupInput, QuestionInput},
    },
    utils::exam_helpers::{parse_marks, parse_question_range},
};

/// A validated answer key, questions ordered by number.
#[derive(Debug, Clone)]
pub struct ValidatedAnswerKey {
    pub questions: Vec<QuestionInput>,
    pub or_groups: Vec<OrGroupInput>,
}

/// Expands sections, merges explicit questions, and checks the OR rules.
pub fn build_answer_key(request: AnswerKeyRequest) -> Result<ValidatedAnswerKey, AppError> {
    let mut questions = request.questions;

    for section in request.sections {
        let numbers = parse_question_range(&section.range)?;
        if numbers.is_empty() {
            return Err(AppError::BadRequest("Section range cannot be empty".to_string()));
        }
        let marks = parse_marks(&section.marks, numbers.len())?;
        if section.answers.len() != numbers.len() {
            return Err(AppError::BadRequest(format!(
                "Section '{}' has {} questions but {} answers",
                section.range,
                numbers.len(),
                section.answers.len()
            )));
        }

        for ((question_number, max_marks), teacher_answer) in
            numbers.into_iter().zip(marks).zip(section.answers)
        {
            questions.push(QuestionInput {
                question_number,
                question_type: section.question_type.clone(),
                max_marks,
                teacher_answer,
            });
        }
    }

    if questions.is_empty() {
        return Err(AppError::BadRequest(
            "Answer key must contain at least one question".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for q in &questions {
        q.validate().map_err(|e| {
            AppError::BadRequest(format!("Question {}: {}", q.question_number, e))
        })?;
        if !seen.insert(q.question_number) {
            return Err(AppError::BadRequest(format!(
                "Question {} appears more than once in the answer key",
                q.question_number
            )));
        }
        if q.teacher_answer.trim().is_empty() {
            return Err(AppError::BadRequest(format!(
                "Question {} has an empty answer",
                q.question_number
            )));
        }
    }

    validate_or_groups(&request.or_groups, &seen)?;

    questions.sort_by_key(|q| q.question_number);

    Ok(ValidatedAnswerKey {
        questions,
        or_groups: request.or_groups,
    })
}

fn validate_or_groups(groups: &[OrGroupInput], known: &HashSet<i32>) -> Result<(), AppError> {
    let mut grouped = HashSet::new();

    for (index, group) in groups.iter().enumerate() {
        let label = index + 1;
        let size = group.option_size();

        if group.option_a.len() != size || group.option_b.len() != size {
            return Err(AppError::BadRequest(format!(
                "OR group {} ('{}') needs {} question(s) per option",
                label, group.group_type, size
            )));
        }

        let members: BTreeSet<i32> = group.option_a.iter().chain(&group.option_b).copied().collect();
        if members.len() != size * 2 {
            return Err(AppError::BadRequest(format!(
                "OR group {} repeats a question",
                label
            )));
        }

        for n in members {
            if !known.contains(&n) {
                return Err(AppError::BadRequest(format!(
                    "OR group {} references unknown question {}",
                    label, n
                )));
            }
            if !grouped.insert(n) {
                return Err(AppError::BadRequest(format!(
                    "Question {} belongs to more than one OR group",
                    n
                )));
            }
        }
    }

    Ok(())
}
