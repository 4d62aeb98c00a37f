use std::collections::BTreeMap;
use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use exam_core::model::{
    AnswerValue, AssignmentId, ExamId, ExamMembership, ExamTestRef, QuestionId, StudentId, TestId,
    TestType,
};

use crate::error::BackendError;

/// One question as served by the backend. The session core only interprets
/// the id; everything else is opaque renderer input.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub body: serde_json::Value,
}

/// Server-granted retest signal, embedded per test in the active-tests
/// listing. The client never invents eligibility; it only caches what the
/// server granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetestSignal {
    pub available: bool,
    pub attempts_left: Option<u32>,
    pub assignment_id: Option<AssignmentId>,
}

/// One entry of the active-tests listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTestEntry {
    pub test_id: TestId,
    pub test_type: TestType,
    pub test_name: String,
    pub retest: RetestSignal,
}

/// Finalized submission payload. Field names follow the wire contract.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRequest {
    pub test_id: TestId,
    pub test_type: String,
    pub student_id: StudentId,
    pub academic_period_id: Option<u64>,
    pub answers: Vec<AnswerValue>,
    pub score: Option<f64>,
    pub max_score: u32,
    pub time_taken: u32,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub caught_cheating: bool,
    pub visibility_change_times: Vec<DateTime<Utc>>,
    pub answers_by_id: BTreeMap<QuestionId, AnswerValue>,
    pub question_order: Vec<QuestionId>,
    pub retest_assignment_id: Option<AssignmentId>,
    pub parent_test_id: Option<TestId>,
}

/// Server verdict for a submission. The server response is the system of
/// record; any score the client computed is provisional UI feedback only.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubmissionOutcome {
    pub success: bool,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

// ─── Collaborator Traits ───────────────────────────────────────────────────────

/// Source of the ordered question list for one test.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Load the questions for `(test_type, test_id)`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport failure or a malformed response.
    async fn load_questions(
        &self,
        test_type: TestType,
        test_id: TestId,
    ) -> Result<Vec<Question>, BackendError>;
}

/// Boundary the session core hands its finalized payload to.
#[async_trait]
pub trait SubmissionPipeline: Send + Sync {
    /// Submit a finalized attempt.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport failure or server rejection; the
    /// caller must preserve local answer/timer state in that case.
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionOutcome, BackendError>;
}

/// Source of exam membership and the per-student active-tests listing.
#[async_trait]
pub trait ExamListing: Send + Sync {
    /// Load the ordered member-test list for an exam.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport failure or a malformed response.
    async fn load_exam(&self, exam_id: ExamId) -> Result<ExamMembership, BackendError>;

    /// Load the student's active tests, including retest signals.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport failure or a malformed response.
    async fn active_tests(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<ActiveTestEntry>, BackendError>;
}

// ─── HTTP Implementation ───────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
}

impl BackendConfig {
    /// Read the backend endpoint from the environment.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::InvalidResponse` if `EXAM_API_BASE_URL` is not
    /// set; a client without an endpoint cannot do anything useful.
    pub fn from_env() -> Result<Self, BackendError> {
        let base_url = env::var("EXAM_API_BASE_URL")
            .map_err(|_| BackendError::InvalidResponse("EXAM_API_BASE_URL is not set".into()))?;
        let auth_token = env::var("EXAM_API_TOKEN").ok().filter(|t| !t.trim().is_empty());
        Ok(Self {
            base_url,
            auth_token,
        })
    }
}

/// reqwest-backed implementation of all backend collaborator traits.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    config: BackendConfig,
}

impl HttpBackend {
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuestionsResponse {
    success: bool,
    #[serde(default)]
    questions: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ExamResponse {
    exam_name: String,
    total_time_minutes: u32,
    tests: Vec<ExamTestDto>,
}

#[derive(Debug, Deserialize)]
struct ExamTestDto {
    test_id: TestId,
    test_name: String,
    test_type: String,
}

#[derive(Debug, Deserialize)]
struct ActiveTestDto {
    test_id: TestId,
    #[serde(default)]
    test_name: String,
    test_type: String,
    #[serde(default)]
    retest_available: bool,
    #[serde(default)]
    retest_attempts_left: Option<u32>,
    #[serde(default)]
    retest_assignment_id: Option<AssignmentId>,
}

fn parse_question(raw: serde_json::Value) -> Result<Question, BackendError> {
    let id = raw
        .get("id")
        .or_else(|| raw.get("question_id"))
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            BackendError::InvalidResponse("question without id/question_id".into())
        })?;
    Ok(Question {
        id: QuestionId::new(id),
        body: raw,
    })
}

fn parse_test_type(code: &str) -> Result<TestType, BackendError> {
    code.parse()
        .map_err(|_| BackendError::InvalidResponse(format!("unknown test type: {code}")))
}

#[async_trait]
impl QuestionSource for HttpBackend {
    async fn load_questions(
        &self,
        test_type: TestType,
        test_id: TestId,
    ) -> Result<Vec<Question>, BackendError> {
        let url = self.url(&format!("tests/{}/{test_id}/questions", test_type.code()));
        let response = self.request(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::HttpStatus(response.status()));
        }

        let body: QuestionsResponse = response.json().await?;
        if !body.success {
            return Err(BackendError::Rejected("question load failed".into()));
        }
        body.questions.into_iter().map(parse_question).collect()
    }
}

#[async_trait]
impl SubmissionPipeline for HttpBackend {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionOutcome, BackendError> {
        let url = self.url("submissions");
        let response = self
            .request(self.client.post(url))
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(BackendError::HttpStatus(response.status()));
        }

        let outcome: SubmissionOutcome = response.json().await?;
        if !outcome.success {
            let message = outcome
                .message
                .unwrap_or_else(|| "submission rejected".into());
            return Err(BackendError::Rejected(message));
        }
        Ok(outcome)
    }
}

#[async_trait]
impl ExamListing for HttpBackend {
    async fn load_exam(&self, exam_id: ExamId) -> Result<ExamMembership, BackendError> {
        let url = self.url(&format!("exams/{exam_id}"));
        let response = self.request(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::HttpStatus(response.status()));
        }

        let body: ExamResponse = response.json().await?;
        let tests = body
            .tests
            .into_iter()
            .map(|t| {
                Ok(ExamTestRef {
                    test_id: t.test_id,
                    test_type: parse_test_type(&t.test_type)?,
                    test_name: t.test_name,
                })
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        Ok(ExamMembership::new(
            exam_id,
            body.exam_name,
            body.total_time_minutes,
            tests,
        ))
    }

    async fn active_tests(
        &self,
        student_id: StudentId,
    ) -> Result<Vec<ActiveTestEntry>, BackendError> {
        let url = self.url(&format!("students/{student_id}/active-tests"));
        let response = self.request(self.client.get(url)).send().await?;
        if !response.status().is_success() {
            return Err(BackendError::HttpStatus(response.status()));
        }

        let body: Vec<ActiveTestDto> = response.json().await?;
        body.into_iter()
            .map(|t| {
                Ok(ActiveTestEntry {
                    test_id: t.test_id,
                    test_type: parse_test_type(&t.test_type)?,
                    test_name: t.test_name,
                    retest: RetestSignal {
                        available: t.retest_available,
                        attempts_left: t.retest_attempts_left,
                        assignment_id: t.retest_assignment_id,
                    },
                })
            })
            .collect()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_question_with_either_id_field() {
        let q = parse_question(json!({"id": 5, "prompt": "2+2?"})).unwrap();
        assert_eq!(q.id, QuestionId::new(5));

        let q = parse_question(json!({"question_id": 9, "prompt": "cat?"})).unwrap();
        assert_eq!(q.id, QuestionId::new(9));
    }

    #[test]
    fn question_without_id_is_rejected() {
        assert!(parse_question(json!({"prompt": "?"})).is_err());
    }

    #[test]
    fn submission_request_serializes_wire_fields() {
        let request = SubmissionRequest {
            test_id: TestId::new(7),
            test_type: TestType::MultipleChoice.code().to_string(),
            student_id: StudentId::new(42),
            academic_period_id: Some(3),
            answers: vec![],
            score: None,
            max_score: 10,
            time_taken: 120,
            started_at: exam_core::time::fixed_now(),
            submitted_at: exam_core::time::fixed_now(),
            caught_cheating: false,
            visibility_change_times: vec![],
            answers_by_id: BTreeMap::new(),
            question_order: vec![QuestionId::new(1)],
            retest_assignment_id: Some(AssignmentId::new(55)),
            parent_test_id: None,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["test_id"], 7);
        assert_eq!(value["test_type"], "mc");
        assert_eq!(value["retest_assignment_id"], 55);
        assert_eq!(value["question_order"][0], 1);
    }

    #[test]
    fn unknown_type_code_is_invalid_response() {
        assert!(matches!(
            parse_test_type("essay"),
            Err(BackendError::InvalidResponse(_))
        ));
    }
}
