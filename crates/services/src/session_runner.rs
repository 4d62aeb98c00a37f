use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use exam_core::Clock;
use exam_core::model::{
    AnswerSnapshot, AnswerValue, AssignmentId, AttemptKey, ExamId, QuestionId, TestId,
};

use crate::attempt_service::{AccessDenied, AttemptStatusService};
use crate::autosave_service::AnswerAutosaveService;
use crate::backend::{Question, QuestionSource, SubmissionOutcome, SubmissionPipeline, SubmissionRequest};
use crate::error::SessionError;
use crate::order_service::QuestionOrderService;
use crate::timer_service::{SessionTimerService, TimerInit};

/// Autosave cadence while answers are non-empty.
pub const AUTOSAVE_INTERVAL_SECS: i64 = 5;

/// Visibility changes at or above this count flag the attempt.
pub const CHEAT_SWITCH_THRESHOLD: usize = 3;

/// Static context for one test entry.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Total allowed seconds; 0 means untimed.
    pub allowed_seconds: u32,
    /// Present when the test is entered through an exam.
    pub exam_id: Option<ExamId>,
    pub parent_test_id: Option<TestId>,
    pub academic_period_id: Option<u64>,
}

/// Live state of one mounted test screen.
///
/// The service owns all effects; this struct is plain data the screen holds
/// between events. Questions are already in the student's shuffled order.
pub struct TestSession {
    key: AttemptKey,
    config: SessionConfig,
    questions: Vec<Question>,
    order: Vec<QuestionId>,
    snapshot: AnswerSnapshot,
    retest_assignment: Option<AssignmentId>,
    visibility_changes: Vec<DateTime<Utc>>,
    last_saved_at: Option<DateTime<Utc>>,
    timed: bool,
    // In-memory re-entrancy guards; persistence writes are asynchronous, so
    // the same conceptual event could otherwise fire a mutating effect twice.
    submit_in_flight: bool,
    submitted: bool,
}

impl TestSession {
    #[must_use]
    pub fn key(&self) -> &AttemptKey {
        &self.key
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[must_use]
    pub fn question_order(&self) -> &[QuestionId] {
        &self.order
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.snapshot.current_index
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.snapshot.current_index)
    }

    #[must_use]
    pub fn answer(&self, question_id: QuestionId) -> Option<&AnswerValue> {
        self.snapshot.answers.get(&question_id)
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.snapshot.answered_count()
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    #[must_use]
    pub fn caught_cheating(&self) -> bool {
        self.visibility_changes.len() >= CHEAT_SWITCH_THRESHOLD
    }

    #[must_use]
    pub fn visibility_changes(&self) -> &[DateTime<Utc>] {
        &self.visibility_changes
    }

    /// Record the renderer's current value for a question.
    pub fn record_answer(&mut self, question_id: QuestionId, value: AnswerValue) {
        self.snapshot.answers.insert(question_id, value);
    }

    /// Move to another question position (clamped to the question count).
    pub fn set_current_index(&mut self, index: usize) {
        self.snapshot.current_index = index.min(self.questions.len().saturating_sub(1));
    }
}

/// What the screen should do after mounting.
pub enum MountOutcome {
    /// Session is live; start ticking and rendering.
    Ready(Box<TestSession>),
    /// Entry refused (already completed, no retest granted).
    Denied(AccessDenied),
    /// The timer had already run out while the app was away; the attempt was
    /// auto-submitted before handing control back.
    Expired(SubmissionOutcome),
}

/// Result of one 1-second tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No countdown for this test.
    Untimed,
    Remaining(u32),
    /// The countdown hit zero and the attempt was auto-submitted.
    Expired(SubmissionOutcome),
}

/// Orchestrates the full lifecycle of one test attempt: mount, autosave,
/// countdown, app-switch tracking, and submission.
pub struct TestSessionService {
    clock: Clock,
    timer: Arc<SessionTimerService>,
    autosave: Arc<AnswerAutosaveService>,
    attempts: Arc<AttemptStatusService>,
    orders: Arc<QuestionOrderService>,
    questions: Arc<dyn QuestionSource>,
    pipeline: Arc<dyn SubmissionPipeline>,
    mounting: Mutex<HashSet<String>>,
}

impl TestSessionService {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Clock,
        timer: Arc<SessionTimerService>,
        autosave: Arc<AnswerAutosaveService>,
        attempts: Arc<AttemptStatusService>,
        orders: Arc<QuestionOrderService>,
        questions: Arc<dyn QuestionSource>,
        pipeline: Arc<dyn SubmissionPipeline>,
    ) -> Self {
        Self {
            clock,
            timer,
            autosave,
            attempts,
            orders,
            questions,
            pipeline,
            mounting: Mutex::new(HashSet::new()),
        }
    }

    /// Enter a test: access check, question load, cached order, snapshot
    /// restore, and timer resume — in that sequence.
    ///
    /// A second mount for the same attempt while one is in flight is refused;
    /// the guard is set before the first asynchronous step.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Backend` when the question load fails (blocks
    /// entry, retryable) or when an expiry-triggered auto-submit fails (local
    /// state is preserved for retry).
    pub async fn mount(
        &self,
        key: AttemptKey,
        config: SessionConfig,
    ) -> Result<MountOutcome, SessionError> {
        let guard_key = key.answers_key();
        {
            let mut mounting = self
                .mounting
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if !mounting.insert(guard_key.clone()) {
                return Err(SessionError::MountInFlight);
            }
        }

        let result = self.mount_inner(key, config).await;

        let mut mounting = self
            .mounting
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        mounting.remove(&guard_key);

        result
    }

    async fn mount_inner(
        &self,
        key: AttemptKey,
        config: SessionConfig,
    ) -> Result<MountOutcome, SessionError> {
        let access = self.attempts.check_access(&key).await;
        if !access.allowed {
            let reason = access.reason.unwrap_or(AccessDenied::AlreadyCompleted);
            return Ok(MountOutcome::Denied(reason));
        }

        let live = self
            .questions
            .load_questions(key.test_type(), key.test_id())
            .await?;
        let live_ids: Vec<QuestionId> = live.iter().map(|q| q.id).collect();

        // Order always comes from the live list, never from the snapshot, so
        // it stays consistent with server-side changes.
        let order = self.orders.order_for(&key, &live_ids).await;
        let mut by_id: BTreeMap<QuestionId, Question> =
            live.into_iter().map(|q| (q.id, q)).collect();
        let questions: Vec<Question> = order.iter().filter_map(|id| by_id.remove(id)).collect();

        let now = self.clock.now();
        let snapshot = match self.autosave.restore(&key).await {
            Some(mut snapshot) => {
                snapshot.current_index = snapshot.current_index.min(questions.len().saturating_sub(1));
                snapshot
            }
            None => AnswerSnapshot::empty(now),
        };

        let retest_assignment = self.attempts.retest_assignment(&key).await;

        let mut session = TestSession {
            key,
            config: config.clone(),
            questions,
            order,
            snapshot,
            retest_assignment,
            visibility_changes: Vec::new(),
            last_saved_at: None,
            timed: config.allowed_seconds > 0,
            submit_in_flight: false,
            submitted: false,
        };

        match self.timer.init(&key, config.allowed_seconds).await {
            TimerInit::Untimed => {
                session.timed = false;
                Ok(MountOutcome::Ready(Box::new(session)))
            }
            TimerInit::Running(_) => Ok(MountOutcome::Ready(Box::new(session))),
            TimerInit::ExpiredOnResume => {
                // Expired while the app was away: a normal expiry, routed
                // straight into auto-submit. No new interval is started.
                let outcome = self.submit(&mut session).await?;
                Ok(MountOutcome::Expired(outcome))
            }
        }
    }

    /// Drive the countdown by one second. On reaching zero the attempt is
    /// auto-submitted exactly once.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Backend` if the expiry auto-submit fails; local
    /// answers and timer state remain for retry.
    pub async fn tick(&self, session: &mut TestSession) -> Result<TickOutcome, SessionError> {
        if !session.timed {
            return Ok(TickOutcome::Untimed);
        }
        if session.submitted || session.submit_in_flight {
            return Ok(TickOutcome::Remaining(0));
        }

        let remaining = self.timer.tick(&session.key).await;
        session.snapshot.elapsed_seconds = self
            .timer
            .elapsed(&session.key, session.config.allowed_seconds);

        if remaining == 0 {
            let outcome = self.submit(session).await?;
            return Ok(TickOutcome::Expired(outcome));
        }
        Ok(TickOutcome::Remaining(remaining))
    }

    /// Note an app-switch (visibility change) at the current instant.
    pub fn record_visibility_change(&self, session: &mut TestSession) {
        session.visibility_changes.push(self.clock.now());
    }

    /// Autosave if the interval elapsed and there is anything to save.
    pub async fn maybe_autosave(&self, session: &mut TestSession) {
        if session.snapshot.is_empty() {
            return;
        }
        let now = self.clock.now();
        let due = match session.last_saved_at {
            Some(last) => (now - last).num_seconds() >= AUTOSAVE_INTERVAL_SECS,
            None => true,
        };
        if due {
            self.save_now(session).await;
        }
    }

    /// Unconditional snapshot write: used before navigation that could
    /// unmount the screen, and immediately before submission.
    pub async fn save_now(&self, session: &mut TestSession) {
        let now = self.clock.now();
        session.snapshot.seq += 1;
        session.snapshot.timestamp = now;
        self.autosave.save(&session.key, &session.snapshot).await;
        if let Some(exam_id) = session.config.exam_id {
            self.autosave
                .save_exam_mirror(&session.key, exam_id, &session.snapshot)
                .await;
        }
        session.last_saved_at = Some(now);
    }

    /// Finalize and submit the attempt.
    ///
    /// On success the completion state machine commits and the attempt's
    /// timer/answer keys are purged. On failure nothing local is cleared —
    /// the user's answers must survive for retry.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::AlreadySubmitted` / `SubmissionInFlight` for
    /// duplicate triggers, or `SessionError::Backend` when the pipeline
    /// rejects or transport fails.
    pub async fn submit(&self, session: &mut TestSession) -> Result<SubmissionOutcome, SessionError> {
        if session.submitted {
            return Err(SessionError::AlreadySubmitted);
        }
        if session.submit_in_flight {
            return Err(SessionError::SubmissionInFlight);
        }
        session.submit_in_flight = true;

        let result = self.submit_inner(session).await;
        session.submit_in_flight = false;

        match result {
            Ok(outcome) => {
                session.submitted = true;
                Ok(outcome)
            }
            Err(err) => Err(err),
        }
    }

    async fn submit_inner(
        &self,
        session: &mut TestSession,
    ) -> Result<SubmissionOutcome, SessionError> {
        self.save_now(session).await;

        let now = self.clock.now();
        let time_taken = if session.timed {
            self.timer
                .elapsed(&session.key, session.config.allowed_seconds)
        } else {
            let elapsed = (now - session.snapshot.started_at).num_seconds().max(0);
            u32::try_from(elapsed).unwrap_or(u32::MAX)
        };

        let answers: Vec<AnswerValue> = session
            .order
            .iter()
            .filter_map(|id| session.snapshot.answers.get(id).cloned())
            .collect();

        let request = SubmissionRequest {
            test_id: session.key.test_id(),
            test_type: session.key.test_type().code().to_string(),
            student_id: session.key.student_id(),
            academic_period_id: session.config.academic_period_id,
            answers,
            score: None,
            max_score: u32::try_from(session.questions.len()).unwrap_or(u32::MAX),
            time_taken,
            started_at: session.snapshot.started_at,
            submitted_at: now,
            caught_cheating: session.caught_cheating(),
            visibility_change_times: session.visibility_changes.clone(),
            answers_by_id: session.snapshot.answers.clone(),
            question_order: session.order.clone(),
            retest_assignment_id: session.retest_assignment,
            parent_test_id: session.config.parent_test_id,
        };

        let outcome = self.pipeline.submit(&request).await?;

        // Server accepted: commit locally. A failed marker write degrades to
        // a log line; the server remains the system of record.
        if let Err(err) = self.attempts.mark_completed(&session.key).await {
            tracing::warn!(error = %err, "completion commit failed after accepted submission");
        }
        self.timer.clear(&session.key).await;

        Ok(outcome)
    }
}
