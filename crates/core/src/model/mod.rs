mod answer;
mod attempt;
mod exam;
mod ids;
mod timer;

pub use ids::{AssignmentId, ExamId, ParseIdError, QuestionId, StudentId, TestId};

pub use answer::{AnswerSnapshot, AnswerValue, DrawingDocument, DrawnPath};
pub use attempt::{AttemptKey, AttemptMarkers, AttemptStatus, ParseTestTypeError, TestType};
pub use exam::{ExamMembership, ExamTestRef, NavState};
pub use timer::{TimerResume, TimerState};
