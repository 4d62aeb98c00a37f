#![forbid(unsafe_code)]

pub mod app_services;
pub mod attempt_service;
pub mod autosave_service;
pub mod backend;
pub mod error;
pub mod exam_navigator;
pub mod order_service;
pub mod session_runner;
pub mod timer_service;

pub use exam_core::Clock;

pub use app_services::{AppServices, BackendHandles};
pub use attempt_service::{AccessDecision, AccessDenied, AttemptStatusService};
pub use autosave_service::AnswerAutosaveService;
pub use backend::{
    ActiveTestEntry, BackendConfig, ExamListing, HttpBackend, Question, QuestionSource,
    RetestSignal, SubmissionOutcome, SubmissionPipeline, SubmissionRequest,
};
pub use error::{AppServicesError, AttemptError, BackendError, ExamError, SessionError};
pub use exam_navigator::ExamNavigator;
pub use order_service::QuestionOrderService;
pub use session_runner::{
    AUTOSAVE_INTERVAL_SECS, CHEAT_SWITCH_THRESHOLD, MountOutcome, SessionConfig, TestSession,
    TestSessionService, TickOutcome,
};
pub use timer_service::{SessionTimerService, TimerInit};
