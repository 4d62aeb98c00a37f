use serde::{Deserialize, Serialize};

use crate::model::{ExamId, StudentId, TestId, TestType};

/// One member test inside an exam, in server order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamTestRef {
    pub test_id: TestId,
    pub test_type: TestType,
    pub test_name: String,
}

/// Ordered member-test list for one exam, loaded once per navigation session.
///
/// The order is server-authoritative: it is never re-sorted client-side, and
/// it is stable for the duration of the exam session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamMembership {
    exam_id: ExamId,
    exam_name: String,
    total_minutes: u32,
    tests: Vec<ExamTestRef>,
}

impl ExamMembership {
    #[must_use]
    pub fn new(
        exam_id: ExamId,
        exam_name: impl Into<String>,
        total_minutes: u32,
        tests: Vec<ExamTestRef>,
    ) -> Self {
        Self {
            exam_id,
            exam_name: exam_name.into(),
            total_minutes,
            tests,
        }
    }

    #[must_use]
    pub fn exam_id(&self) -> ExamId {
        self.exam_id
    }

    #[must_use]
    pub fn exam_name(&self) -> &str {
        &self.exam_name
    }

    #[must_use]
    pub fn total_minutes(&self) -> u32 {
        self.total_minutes
    }

    #[must_use]
    pub fn tests(&self) -> &[ExamTestRef] {
        &self.tests
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Index of the member test matching `(test_id, test_type)`, if any.
    ///
    /// `None` means the active screen is not part of this exam; navigation
    /// controls degrade to disabled rather than erroring.
    #[must_use]
    pub fn position_of(&self, test_id: TestId, test_type: TestType) -> Option<usize> {
        self.tests
            .iter()
            .position(|t| t.test_id == test_id && t.test_type == test_type)
    }

    /// Store key for the persisted exam-level start time.
    #[must_use]
    pub fn start_key(&self, student_id: StudentId) -> String {
        format!("examStart:{student_id}:{}", self.exam_id)
    }
}

/// Navigation affordances for one position inside an exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavState {
    pub index: Option<usize>,
    pub has_prev: bool,
    pub has_next: bool,
    pub can_review: bool,
}

impl NavState {
    /// Derive the affordances for the member test at `index` out of `total`.
    ///
    /// A `None` index (test not found in the membership) disables everything.
    #[must_use]
    pub fn at(index: Option<usize>, total: usize) -> Self {
        match index {
            Some(i) if i < total => Self {
                index: Some(i),
                has_prev: i > 0,
                has_next: i + 1 < total,
                can_review: i + 1 == total,
            },
            _ => Self {
                index: None,
                has_prev: false,
                has_next: false,
                can_review: false,
            },
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
