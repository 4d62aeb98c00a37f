use std::sync::Arc;

use exam_core::Clock;
use storage::repository::Storage;

use crate::attempt_service::AttemptStatusService;
use crate::autosave_service::AnswerAutosaveService;
use crate::backend::{BackendConfig, ExamListing, HttpBackend, QuestionSource, SubmissionPipeline};
use crate::error::AppServicesError;
use crate::exam_navigator::ExamNavigator;
use crate::order_service::QuestionOrderService;
use crate::session_runner::TestSessionService;
use crate::timer_service::SessionTimerService;

/// Backend collaborators the session services call out to.
#[derive(Clone)]
pub struct BackendHandles {
    pub questions: Arc<dyn QuestionSource>,
    pub pipeline: Arc<dyn SubmissionPipeline>,
    pub listing: Arc<dyn ExamListing>,
}

impl BackendHandles {
    /// One HTTP client serving all three collaborator roles.
    #[must_use]
    pub fn http(config: BackendConfig) -> Self {
        let backend = Arc::new(HttpBackend::new(config));
        Self {
            questions: backend.clone(),
            pipeline: backend.clone(),
            listing: backend,
        }
    }
}

/// Assembles the app-facing services over one store and one backend.
#[derive(Clone)]
pub struct AppServices {
    timer: Arc<SessionTimerService>,
    autosave: Arc<AnswerAutosaveService>,
    attempts: Arc<AttemptStatusService>,
    orders: Arc<QuestionOrderService>,
    sessions: Arc<TestSessionService>,
    navigator: Arc<ExamNavigator>,
}

impl AppServices {
    #[must_use]
    pub fn new(clock: Clock, storage: &Storage, backend: BackendHandles) -> Self {
        let timer = Arc::new(SessionTimerService::new(clock, Arc::clone(&storage.kv)));
        let autosave = Arc::new(AnswerAutosaveService::new(Arc::clone(&storage.kv)));
        let attempts = Arc::new(AttemptStatusService::new(Arc::clone(&storage.kv)));
        let orders = Arc::new(QuestionOrderService::new(Arc::clone(&storage.kv)));
        let sessions = Arc::new(TestSessionService::new(
            clock,
            Arc::clone(&timer),
            Arc::clone(&autosave),
            Arc::clone(&attempts),
            Arc::clone(&orders),
            backend.questions,
            backend.pipeline,
        ));
        let navigator = Arc::new(ExamNavigator::new(
            clock,
            Arc::clone(&storage.kv),
            backend.listing,
        ));

        Self {
            timer,
            autosave,
            attempts,
            orders,
            sessions,
            navigator,
        }
    }

    /// Build services backed by `SQLite` storage and the HTTP backend from
    /// the environment.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails or the
    /// backend endpoint is not configured.
    pub async fn new_sqlite(db_url: &str, clock: Clock) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        let config = BackendConfig::from_env()?;
        Ok(Self::new(clock, &storage, BackendHandles::http(config)))
    }

    #[must_use]
    pub fn timer(&self) -> Arc<SessionTimerService> {
        Arc::clone(&self.timer)
    }

    #[must_use]
    pub fn autosave(&self) -> Arc<AnswerAutosaveService> {
        Arc::clone(&self.autosave)
    }

    #[must_use]
    pub fn attempts(&self) -> Arc<AttemptStatusService> {
        Arc::clone(&self.attempts)
    }

    #[must_use]
    pub fn orders(&self) -> Arc<QuestionOrderService> {
        Arc::clone(&self.orders)
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<TestSessionService> {
        Arc::clone(&self.sessions)
    }

    #[must_use]
    pub fn navigator(&self) -> Arc<ExamNavigator> {
        Arc::clone(&self.navigator)
    }
}
