use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::model::{ExamId, StudentId, TestId};

/// Question family of a test. The code string is stable: it is baked into
/// persisted store keys and into the shuffle seed, so renaming a variant must
/// never change its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    MultipleChoice,
    FillBlanks,
    Matching,
    Drawing,
    Speaking,
    WordMatching,
}

impl TestType {
    /// Stable short code used in store keys, shuffle seeds, and the wire payload.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            TestType::MultipleChoice => "mc",
            TestType::FillBlanks => "fill",
            TestType::Matching => "match",
            TestType::Drawing => "draw",
            TestType::Speaking => "speak",
            TestType::WordMatching => "word",
        }
    }

    /// All test types, in dashboard order.
    #[must_use]
    pub fn all() -> [TestType; 6] {
        [
            TestType::MultipleChoice,
            TestType::FillBlanks,
            TestType::Matching,
            TestType::Drawing,
            TestType::Speaking,
            TestType::WordMatching,
        ]
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Error type for parsing a `TestType` code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown test type code: {code}")]
pub struct ParseTestTypeError {
    code: String,
}

impl FromStr for TestType {
    type Err = ParseTestTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mc" => Ok(TestType::MultipleChoice),
            "fill" => Ok(TestType::FillBlanks),
            "match" => Ok(TestType::Matching),
            "draw" => Ok(TestType::Drawing),
            "speak" => Ok(TestType::Speaking),
            "word" => Ok(TestType::WordMatching),
            other => Err(ParseTestTypeError {
                code: other.to_string(),
            }),
        }
    }
}

// ─── Attempt Key ───────────────────────────────────────────────────────────────

/// Composite identity of one attempt lifecycle: `(student, test type, test)`.
///
/// Every persisted key for an attempt is derived through one of the typed
/// accessors below. Components never build raw key strings themselves, so each
/// concern owns exactly one namespace and cannot trample a sibling's keys.
/// Retests reuse the same key; the granted assignment id lives under its own
/// namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptKey {
    student_id: StudentId,
    test_type: TestType,
    test_id: TestId,
}

impl AttemptKey {
    #[must_use]
    pub fn new(student_id: StudentId, test_type: TestType, test_id: TestId) -> Self {
        Self {
            student_id,
            test_type,
            test_id,
        }
    }

    #[must_use]
    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    #[must_use]
    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    #[must_use]
    pub fn test_id(&self) -> TestId {
        self.test_id
    }

    fn scoped(&self, prefix: &str) -> String {
        format!(
            "{prefix}:{}:{}:{}",
            self.student_id,
            self.test_type.code(),
            self.test_id
        )
    }

    /// Store key for the persisted countdown state.
    #[must_use]
    pub fn timer_key(&self) -> String {
        self.scoped("timer")
    }

    /// Store key for the in-progress answer snapshot.
    #[must_use]
    pub fn answers_key(&self) -> String {
        self.scoped("answers")
    }

    /// Store key for the drawing submission document mirrored on each save.
    #[must_use]
    pub fn drawing_doc_key(&self) -> String {
        self.scoped("drawingDoc")
    }

    /// Store key for the completion marker.
    #[must_use]
    pub fn completed_key(&self) -> String {
        self.scoped("completed")
    }

    /// Store key for the retest-eligibility marker.
    #[must_use]
    pub fn retest_key(&self) -> String {
        self.scoped("retest")
    }

    /// Store key for the backend-granted retest assignment id.
    #[must_use]
    pub fn retest_assignment_key(&self) -> String {
        self.scoped("retestAssignment")
    }

    /// Store key for the cached question permutation.
    #[must_use]
    pub fn order_key(&self) -> String {
        self.scoped("shuffleOrder")
    }

    /// Store key for this attempt's answers mirrored into an exam context.
    #[must_use]
    pub fn exam_answer_key(&self, exam_id: ExamId) -> String {
        format!(
            "examAnswer:{}:{exam_id}:{}:{}",
            self.student_id,
            self.test_id,
            self.test_type.code()
        )
    }

    /// Seed string for the per-student deterministic question order.
    #[must_use]
    pub fn shuffle_seed(&self) -> String {
        format!(
            "{}:{}:{}",
            self.student_id,
            self.test_type.code(),
            self.test_id
        )
    }
}

// ─── Attempt Status ────────────────────────────────────────────────────────────

/// Raw marker-key reads for one attempt, gathered in a single batched probe.
///
/// Building the status from one `AttemptMarkers` value (rather than probing
/// keys one by one at each call site) means every caller observes a single
/// point in time, which removes the read-skew class of bugs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttemptMarkers {
    pub completed: bool,
    pub retest_eligible: bool,
    pub has_local_progress: bool,
}

/// Explicit lifecycle state of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Completed,
    RetestEligible,
    RetestInProgress,
}

impl AttemptStatus {
    /// Single authoritative transition function from persisted markers.
    ///
    /// The retest marker outranks the completion marker: a granted retest
    /// keeps the stale completion flag readable but never lets it block
    /// access. That ordering is deliberate and must not be "simplified" into
    /// deleting the completion key on grant.
    #[must_use]
    pub fn from_markers(markers: AttemptMarkers) -> Self {
        if markers.retest_eligible {
            if markers.has_local_progress {
                AttemptStatus::RetestInProgress
            } else {
                AttemptStatus::RetestEligible
            }
        } else if markers.completed {
            AttemptStatus::Completed
        } else if markers.has_local_progress {
            AttemptStatus::InProgress
        } else {
            AttemptStatus::NotStarted
        }
    }

    /// Whether a student may enter the test in this state.
    #[must_use]
    pub fn allows_entry(&self) -> bool {
        !matches!(self, AttemptStatus::Completed)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> AttemptKey {
        AttemptKey::new(StudentId::new(42), TestType::MultipleChoice, TestId::new(7))
    }

    #[test]
    fn key_namespaces_are_distinct() {
        let k = key();
        let keys = [
            k.timer_key(),
            k.answers_key(),
            k.drawing_doc_key(),
            k.completed_key(),
            k.retest_key(),
            k.retest_assignment_key(),
            k.order_key(),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn timer_key_shape() {
        assert_eq!(key().timer_key(), "timer:42:mc:7");
    }

    #[test]
    fn exam_answer_key_shape() {
        assert_eq!(
            key().exam_answer_key(ExamId::new(3)),
            "examAnswer:42:3:7:mc"
        );
    }

    #[test]
    fn shuffle_seed_shape() {
        assert_eq!(key().shuffle_seed(), "42:mc:7");
    }

    #[test]
    fn test_type_codes_roundtrip() {
        for tt in TestType::all() {
            let parsed: TestType = tt.code().parse().unwrap();
            assert_eq!(parsed, tt);
        }
    }

    #[test]
    fn unknown_test_type_code_is_rejected() {
        assert!("essay".parse::<TestType>().is_err());
    }

    #[test]
    fn retest_marker_outranks_completion() {
        let status = AttemptStatus::from_markers(AttemptMarkers {
            completed: true,
            retest_eligible: true,
            has_local_progress: false,
        });
        assert_eq!(status, AttemptStatus::RetestEligible);
        assert!(status.allows_entry());
    }

    #[test]
    fn completed_without_retest_blocks_entry() {
        let status = AttemptStatus::from_markers(AttemptMarkers {
            completed: true,
            retest_eligible: false,
            has_local_progress: false,
        });
        assert_eq!(status, AttemptStatus::Completed);
        assert!(!status.allows_entry());
    }

    #[test]
    fn local_progress_marks_in_progress() {
        let status = AttemptStatus::from_markers(AttemptMarkers {
            completed: false,
            retest_eligible: false,
            has_local_progress: true,
        });
        assert_eq!(status, AttemptStatus::InProgress);
    }

    #[test]
    fn retest_with_progress_is_retest_in_progress() {
        let status = AttemptStatus::from_markers(AttemptMarkers {
            completed: true,
            retest_eligible: true,
            has_local_progress: true,
        });
        assert_eq!(status, AttemptStatus::RetestInProgress);
        assert!(status.allows_entry());
    }

    #[test]
    fn empty_markers_are_not_started() {
        let status = AttemptStatus::from_markers(AttemptMarkers::default());
        assert_eq!(status, AttemptStatus::NotStarted);
    }
}
