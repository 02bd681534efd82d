// src/services/mod.rs

pub mod answer_key;
pub mod evaluator;
pub mod grading;
pub mod ingestion;
pub mod report;
