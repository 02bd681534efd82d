// src/services/report.rs

use std::collections::{HashMap, HashSet};

use crate::{
    config::PASS_PERCENTAGE,
    models::{
        exam::Exam,
        question::{OrGroup, Question},
        report::{
            AnswerMarkRow, ExamReport, QuestionStatistics, RankingEntry, ScoreStatistics,
            StatusCounts,
        },
        submission::{Submission, ValuationStatus},
    },
    services::grading::round2,
};

/// Aggregates loaded rows into the exam report.
///
/// Only `completed` submissions contribute to statistics and ranking;
/// `answers` rows of other submissions are ignored, as are answers to the
/// OR option that was not chosen.
pub fn build_report(
    exam: Exam,
    questions: &[Question],
    or_groups: &[OrGroup],
    submissions: &[Submission],
    answers: &[AnswerMarkRow],
) -> ExamReport {
    let mut status_counts = StatusCounts::default();
    for submission in submissions {
        match submission.status() {
            Some(ValuationStatus::Pending) => status_counts.pending += 1,
            Some(ValuationStatus::Completed) => status_counts.completed += 1,
            Some(ValuationStatus::Error) => status_counts.error += 1,
            None => tracing::warn!(
                submission_id = submission.id,
                status = %submission.valuation_status,
                "Unknown valuation status"
            ),
        }
    }

    let completed: Vec<&Submission> = submissions
        .iter()
        .filter(|s| s.status() == Some(ValuationStatus::Completed))
        .collect();

    ExamReport {
        statistics: score_statistics(&completed),
        questions: question_statistics(questions, or_groups, &completed, answers),
        ranking: ranking(&completed),
        status_counts,
        exam_id: exam.exam_id,
        exam_name: exam.exam_name,
        class: exam.class,
        subject: exam.subject,
        total_marks: exam.total_marks,
    }
}

fn score_statistics(completed: &[&Submission]) -> Option<ScoreStatistics> {
    if completed.is_empty() {
        return None;
    }

    let totals: Vec<f64> = completed
        .iter()
        .map(|s| s.total_marks_obtained.unwrap_or(0.0))
        .collect();
    let percentages: Vec<f64> = completed.iter().map(|s| s.percentage.unwrap_or(0.0)).collect();
    let count = completed.len() as f64;

    Some(ScoreStatistics {
        average_total: round2(totals.iter().sum::<f64>() / count),
        highest_total: totals.iter().copied().fold(f64::MIN, f64::max),
        lowest_total: totals.iter().copied().fold(f64::MAX, f64::min),
        average_percentage: round2(percentages.iter().sum::<f64>() / count),
        pass_percentage_threshold: PASS_PERCENTAGE,
        pass_count: percentages.iter().filter(|p| **p >= PASS_PERCENTAGE).count(),
    })
}

/// Maps each grouped question to the OR option (`"a"`/`"b"`) it belongs to.
fn own_options(or_groups: &[OrGroup]) -> HashMap<i32, &'static str> {
    let mut options = HashMap::new();
    for group in or_groups {
        options.extend(group.option_a.0.iter().map(|n| (*n, "a")));
        options.extend(group.option_b.0.iter().map(|n| (*n, "b")));
    }
    options
}

fn question_statistics(
    questions: &[Question],
    or_groups: &[OrGroup],
    completed: &[&Submission],
    answers: &[AnswerMarkRow],
) -> Vec<QuestionStatistics> {
    let completed_ids: HashSet<i64> = completed.iter().map(|s| s.id).collect();
    let own_options = own_options(or_groups);

    let mut marks: HashMap<i32, Vec<f64>> = HashMap::new();
    for answer in answers {
        let counted = match (
            own_options.get(&answer.question_number),
            answer.or_option_chosen.as_deref(),
        ) {
            (Some(own), Some(chosen)) => *own == chosen,
            _ => true,
        };
        if counted && completed_ids.contains(&answer.submission_id) {
            marks
                .entry(answer.question_number)
                .or_default()
                .push(answer.marks_obtained.unwrap_or(0.0));
        }
    }

    questions
        .iter()
        .map(|q| {
            let attempts = marks.get(&q.question_number).map(Vec::as_slice).unwrap_or(&[]);
            let average_marks = if attempts.is_empty() {
                0.0
            } else {
                round2(attempts.iter().sum::<f64>() / attempts.len() as f64)
            };
            QuestionStatistics {
                question_number: q.question_number,
                max_marks: q.max_marks,
                attempts: attempts.len(),
                average_marks,
            }
        })
        .collect()
}

/// Orders by total, highest first; equal totals share a rank ("1, 2, 2, 4").
fn ranking(completed: &[&Submission]) -> Vec<RankingEntry> {
    let mut sorted: Vec<&Submission> = completed.to_vec();
    sorted.sort_by(|a, b| {
        let (ta, tb) = (a.total_marks_obtained.unwrap_or(0.0), b.total_marks_obtained.unwrap_or(0.0));
        tb.total_cmp(&ta).then_with(|| a.roll_no.cmp(&b.roll_no))
    });

    let mut entries: Vec<RankingEntry> = Vec::with_capacity(sorted.len());
    for (index, submission) in sorted.into_iter().enumerate() {
        let total = submission.total_marks_obtained.unwrap_or(0.0);
        let rank = match entries.last() {
            Some(prev) if prev.total_marks_obtained == total => prev.rank,
            _ => index + 1,
        };
        entries.push(RankingEntry {
            rank,
            roll_no: submission.roll_no.clone(),
            student_name: submission.student_name.clone(),
            total_marks_obtained: total,
            percentage: submission.percentage.unwrap_or(0.0),
        });
    }
    entries
}
