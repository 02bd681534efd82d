// src/services/evaluator.rs

//! Client for the external OCR / grading service.
//!
//! The service receives a scanned paper together with the exam's answer key
//! and replies with the recognised answers, already marked.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::Config,
    models::question::{OrGroupInput, QuestionInput},
};

const FALLBACK_MESSAGE: &str = "evaluation service communication failed";

/// Answer key as sent to the grader.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerKeyPayload {
    pub questions: Vec<QuestionInput>,
    pub or_groups: Vec<OrGroupInput>,
}

/// One scanned paper to evaluate.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub exam_id: String,
    pub file_name: String,
    pub content_type: String,
    pub image: Vec<u8>,
    pub answer_key: AnswerKeyPayload,
}

/// One answer as recognised and marked by the grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedAnswer {
    pub question_number: i32,
    #[serde(default)]
    pub answer_text: String,
    #[serde(default)]
    pub marks_obtained: Option<f64>,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// The grader's reply for one paper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(default)]
    pub roll_no: Option<String>,
    #[serde(default)]
    pub student_name: Option<String>,
    pub answers: Vec<EvaluatedAnswer>,
}

#[derive(Debug)]
pub enum EvaluatorError {
    /// Transport failure or timeout.
    Unavailable(String),
    /// The service answered with a non-success status.
    Rejected { status: u16, message: String },
    /// The body was not a valid evaluation result.
    InvalidResponse(String),
}

impl fmt::Display for EvaluatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvaluatorError::Unavailable(msg) => {
                write!(f, "Evaluation service unavailable: {}", msg)
            }
            EvaluatorError::Rejected { status, message } => {
                write!(f, "Evaluation service rejected the paper ({}): {}", status, message)
            }
            EvaluatorError::InvalidResponse(msg) => {
                write!(f, "Evaluation service returned an invalid response: {}", msg)
            }
        }
    }
}

impl std::error::Error for EvaluatorError {}

/// Seam over the grading service so the pipeline can run against a stub.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<EvaluationResult, EvaluatorError>;
}

/// `Evaluator` backed by the HTTP grading service.
pub struct HttpEvaluator {
    http: reqwest::Client,
    url: Url,
}

impl HttpEvaluator {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, EvaluatorError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvaluatorError::Unavailable(e.to_string()))?;

        Ok(Self { http, url })
    }

    pub fn from_config(config: &Config) -> Result<Self, EvaluatorError> {
        Self::new(
            config.evaluator_url.clone(),
            Duration::from_secs(config.evaluator_timeout_secs),
        )
    }

    fn build_form(request: EvaluationRequest) -> Result<Form, EvaluatorError> {
        let answer_key = serde_json::to_string(&request.answer_key)
            .map_err(|e| EvaluatorError::InvalidResponse(e.to_string()))?;

        let image = Part::bytes(request.image)
            .file_name(request.file_name)
            .mime_str(&request.content_type)
            .map_err(|e| EvaluatorError::Unavailable(e.to_string()))?;

        Ok(Form::new()
            .text("exam_id", request.exam_id)
            .text("answer_key", answer_key)
            .part("paper_image", image))
    }
}

#[async_trait]
impl Evaluator for HttpEvaluator {
    async fn evaluate(
        &self,
        request: EvaluationRequest,
    ) -> Result<EvaluationResult, EvaluatorError> {
        let exam_id = request.exam_id.clone();
        let form = Self::build_form(request)?;

        let response = self
            .http
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(exam_id = %exam_id, error = %e, "Error communicating with evaluation service");
                EvaluatorError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EvaluatorError::Unavailable(e.to_string()))?;

        if !status.is_success() {
            return Err(EvaluatorError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| EvaluatorError::InvalidResponse(e.to_string()))
    }
}

/// Extracts the service's own error text from a failure body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["error", "detail"]
                .iter()
                .find_map(|key| value.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| FALLBACK_MESSAGE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn request() -> EvaluationRequest {
        EvaluationRequest {
            exam_id: "Maths_10A_Unit_1_ABCDEF01".to_string(),
            file_name: "21CS045.png".to_string(),
            content_type: "image/png".to_string(),
            image: b"fake-png-bytes".to_vec(),
            answer_key: AnswerKeyPayload {
                questions: vec![QuestionInput {
                    question_number: 1,
                    question_type: "short".to_string(),
                    max_marks: 2,
                    teacher_answer: "Photosynthesis".to_string(),
                }],
                or_groups: Vec::new(),
            },
        }
    }

    fn evaluator(server: &mockito::ServerGuard) -> HttpEvaluator {
        let url = Url::parse(&format!("{}/evaluate", server.url())).unwrap();
        HttpEvaluator::new(url, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn posts_multipart_and_parses_result() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/evaluate")
            .match_header(
                "content-type",
                Matcher::Regex("multipart/form-data".to_string()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("name=\"paper_image\"".to_string()),
                Matcher::Regex("name=\"answer_key\"".to_string()),
                Matcher::Regex("Photosynthesis".to_string()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"roll_no":"21CS045","student_name":"Asha","answers":[
                    {"question_number":1,"answer_text":"photosynthesis","marks_obtained":2.0}
                ]}"#,
            )
            .create_async()
            .await;

        let result = evaluator(&server).evaluate(request()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(result.roll_no.as_deref(), Some("21CS045"));
        assert_eq!(result.answers.len(), 1);
        assert_eq!(result.answers[0].marks_obtained, Some(2.0));
        assert_eq!(result.answers[0].feedback, None);
    }

    #[tokio::test]
    async fn surfaces_service_error_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/evaluate")
            .with_status(422)
            .with_body(r#"{"error":"Image is too blurry"}"#)
            .create_async()
            .await;

        let err = evaluator(&server).evaluate(request()).await.unwrap_err();

        match err {
            EvaluatorError::Rejected { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Image is too blurry");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn falls_back_when_error_body_is_not_json() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/evaluate")
            .with_status(500)
            .with_body("Internal Server Error")
            .create_async()
            .await;

        let err = evaluator(&server).evaluate(request()).await.unwrap_err();

        assert!(matches!(
            err,
            EvaluatorError::Rejected { status: 500, ref message } if message == FALLBACK_MESSAGE
        ));
    }

    #[tokio::test]
    async fn rejects_unexpected_success_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/evaluate")
            .with_status(200)
            .with_body(r#"{"status":"ok"}"#)
            .create_async()
            .await;

        let err = evaluator(&server).evaluate(request()).await.unwrap_err();

        assert!(matches!(err, EvaluatorError::InvalidResponse(_)));
    }

    #[test]
    fn error_message_reads_detail_field() {
        assert_eq!(error_message(r#"{"detail":"bad key"}"#), "bad key");
        assert_eq!(error_message(""), FALLBACK_MESSAGE);
    }
}
