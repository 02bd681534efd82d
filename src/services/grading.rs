// src/services/grading.rs

//! Reconciles grader output with an exam's answer key.
//!
//! Everything here is pure: rows are loaded by the caller and the result is
//! written back by the caller.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::{
    models::question::{OrGroup, OrGroupInput, Question, QuestionInput},
    services::evaluator::EvaluatedAnswer,
};

/// Which side of an OR group was scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrOption {
    A,
    B,
}

impl OrOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrOption::A => "a",
            OrOption::B => "b",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct OrRule {
    option_a: Vec<i32>,
    option_b: Vec<i32>,
}

/// Max marks per question plus the exam's OR rules.
#[derive(Debug, Clone, Default)]
pub struct AnswerKey {
    max_marks: BTreeMap<i32, i32>,
    rules: Vec<OrRule>,
}

impl AnswerKey {
    pub fn from_rows(questions: &[Question], or_groups: &[OrGroup]) -> Self {
        Self {
            max_marks: questions
                .iter()
                .map(|q| (q.question_number, q.max_marks))
                .collect(),
            rules: or_groups
                .iter()
                .map(|g| OrRule {
                    option_a: g.option_a.0.clone(),
                    option_b: g.option_b.0.clone(),
                })
                .collect(),
        }
    }

    pub fn from_inputs(questions: &[QuestionInput], or_groups: &[OrGroupInput]) -> Self {
        Self {
            max_marks: questions
                .iter()
                .map(|q| (q.question_number, q.max_marks))
                .collect(),
            rules: or_groups
                .iter()
                .map(|g| OrRule {
                    option_a: g.option_a.clone(),
                    option_b: g.option_b.clone(),
                })
                .collect(),
        }
    }

    pub fn max_marks(&self, question_number: i32) -> Option<i32> {
        self.max_marks.get(&question_number).copied()
    }

    /// Maximum attainable marks: every OR group counts its larger option once.
    ///
    /// Summed as `i64` and saturated, so an oversized key cannot overflow.
    pub fn total_marks(&self) -> i32 {
        let mut in_group = std::collections::HashSet::new();
        let mut total: i64 = 0;

        for rule in &self.rules {
            let sum = |option: &[i32]| -> i64 {
                option
                    .iter()
                    .filter_map(|n| self.max_marks(*n))
                    .map(i64::from)
                    .sum()
            };
            total += sum(&rule.option_a).max(sum(&rule.option_b));
            in_group.extend(rule.option_a.iter().chain(&rule.option_b).copied());
        }

        total += self
            .max_marks
            .iter()
            .filter(|(n, _)| !in_group.contains(*n))
            .map(|(_, m)| i64::from(*m))
            .sum::<i64>();

        i32::try_from(total).unwrap_or(i32::MAX)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledAnswer {
    pub question_number: i32,
    pub answer_text: String,
    pub marks_obtained: Option<f64>,
    pub feedback: Option<String>,
    pub is_or_question: bool,
    pub or_option_chosen: Option<OrOption>,
    /// Whether these marks contribute to the total.
    pub counted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Ordered by question number.
    pub answers: Vec<ReconciledAnswer>,
    /// Question numbers reported by the grader that the exam does not have.
    pub unmatched: Vec<i32>,
    pub total_marks_obtained: f64,
    pub percentage: f64,
}

/// Links grader answers to the answer key and computes the totals.
///
/// `exam_total` is the exam's stored maximum; a zero total yields 0%.
pub fn reconcile(key: &AnswerKey, answers: Vec<EvaluatedAnswer>, exam_total: i32) -> Reconciliation {
    let mut unmatched = Vec::new();
    let mut by_question: BTreeMap<i32, ReconciledAnswer> = BTreeMap::new();

    for answer in answers {
        let Some(max) = key.max_marks(answer.question_number) else {
            if !unmatched.contains(&answer.question_number) {
                unmatched.push(answer.question_number);
            }
            continue;
        };

        let marks = answer
            .marks_obtained
            .filter(|m| m.is_finite())
            .map(|m| m.clamp(0.0, f64::from(max)));

        let candidate = ReconciledAnswer {
            question_number: answer.question_number,
            answer_text: answer.answer_text,
            marks_obtained: marks,
            feedback: answer.feedback,
            is_or_question: false,
            or_option_chosen: None,
            counted: true,
        };

        // Duplicate reads of one question keep the better-marked one.
        match by_question.get(&candidate.question_number) {
            Some(existing) if existing.marks_obtained.unwrap_or(0.0) >= marks.unwrap_or(0.0) => {}
            _ => {
                by_question.insert(candidate.question_number, candidate);
            }
        }
    }
    unmatched.sort_unstable();

    let marks_of = |by_question: &BTreeMap<i32, ReconciledAnswer>, option: &[i32]| -> f64 {
        option
            .iter()
            .filter_map(|n| by_question.get(n))
            .map(|a| a.marks_obtained.unwrap_or(0.0))
            .sum()
    };

    let mut choices: HashMap<i32, (OrOption, OrOption)> = HashMap::new();
    for rule in &key.rules {
        let chosen = if marks_of(&by_question, &rule.option_b) > marks_of(&by_question, &rule.option_a) {
            OrOption::B
        } else {
            OrOption::A
        };
        for n in &rule.option_a {
            choices.insert(*n, (OrOption::A, chosen));
        }
        for n in &rule.option_b {
            choices.insert(*n, (OrOption::B, chosen));
        }
    }

    let mut total = 0.0;
    for answer in by_question.values_mut() {
        if let Some((own, chosen)) = choices.get(&answer.question_number) {
            answer.is_or_question = true;
            answer.or_option_chosen = Some(*chosen);
            answer.counted = own == chosen;
        }
        if answer.counted {
            total += answer.marks_obtained.unwrap_or(0.0);
        }
    }

    let percentage = if exam_total > 0 {
        round2(total / f64::from(exam_total) * 100.0)
    } else {
        0.0
    };

    Reconciliation {
        answers: by_question.into_values().collect(),
        unmatched,
        total_marks_obtained: round2(total),
        percentage,
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
