use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::QuestionId;

/// One stroke of a drawing answer: an ordered list of canvas points plus the
/// stroke attributes the renderer captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawnPath {
    pub points: Vec<(f64, f64)>,
    pub color: String,
    pub stroke_width: f64,
}

/// In-progress answer for a single question, one variant per question family.
///
/// The renderer produces these values and the session core treats them as
/// opaque apart from `is_answered`, which gates progress display and the
/// "unanswered questions" warning before submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnswerValue {
    /// Selected option for a multiple-choice question.
    Choice { selected: String },
    /// True/false style flag.
    Flag { value: bool },
    /// Fill-in-the-blanks entries, one per blank, in blank order.
    Blanks { entries: Vec<String> },
    /// Matching pairs, left item to chosen right item.
    Matches { pairs: BTreeMap<String, String> },
    /// Raw strokes captured from the drawing canvas.
    Drawing { paths: Vec<DrawnPath> },
    /// Recorded audio reference and the recognized transcript.
    Speaking {
        audio_ref: String,
        transcript: String,
    },
}

impl AnswerValue {
    /// Whether this value counts as an answer for progress purposes.
    #[must_use]
    pub fn is_answered(&self) -> bool {
        match self {
            AnswerValue::Choice { selected } => !selected.is_empty(),
            AnswerValue::Flag { .. } => true,
            AnswerValue::Blanks { entries } => entries.iter().any(|e| !e.trim().is_empty()),
            AnswerValue::Matches { pairs } => !pairs.is_empty(),
            AnswerValue::Drawing { paths } => paths.iter().any(|p| !p.points.is_empty()),
            AnswerValue::Speaking {
                audio_ref,
                transcript,
            } => !audio_ref.is_empty() || !transcript.trim().is_empty(),
        }
    }
}

/// Point-in-time copy of a session's in-progress answers.
///
/// Snapshots are whole-value replacements: the latest write fully supersedes
/// the previous one, with no merge. A single device/session writes each key,
/// so last-write-wins is safe; `seq` is a monotonic write counter that lets
/// the store discard a stale write racing past a fresher one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSnapshot {
    pub answers: BTreeMap<QuestionId, AnswerValue>,
    pub current_index: usize,
    pub elapsed_seconds: u32,
    pub started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub seq: u64,
}

impl AnswerSnapshot {
    /// Empty snapshot for a session starting at `started_at`.
    #[must_use]
    pub fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            answers: BTreeMap::new(),
            current_index: 0,
            elapsed_seconds: 0,
            started_at,
            timestamp: started_at,
            seq: 0,
        }
    }

    /// Number of questions with a non-empty answer.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|v| v.is_answered()).count()
    }

    /// Whether there is anything worth autosaving.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    /// Drawing strokes grouped per question, in the structured shape the
    /// submission payload expects. Empty map for non-drawing snapshots.
    #[must_use]
    pub fn drawing_document(&self) -> DrawingDocument {
        let shapes = self
            .answers
            .iter()
            .filter_map(|(qid, value)| match value {
                AnswerValue::Drawing { paths } if !paths.is_empty() => {
                    Some((*qid, paths.clone()))
                }
                _ => None,
            })
            .collect();
        DrawingDocument { shapes }
    }
}

/// Structured document shape for drawing answers, mirrored alongside the raw
/// snapshot on every save so restore and submission read consistent state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawingDocument {
    pub shapes: BTreeMap<QuestionId, Vec<DrawnPath>>,
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn empty_choice_is_unanswered() {
        let v = AnswerValue::Choice {
            selected: String::new(),
        };
        assert!(!v.is_answered());
    }

    #[test]
    fn whitespace_blanks_are_unanswered() {
        let v = AnswerValue::Blanks {
            entries: vec!["  ".into(), String::new()],
        };
        assert!(!v.is_answered());
        let v = AnswerValue::Blanks {
            entries: vec![String::new(), "cat".into()],
        };
        assert!(v.is_answered());
    }

    #[test]
    fn flag_always_counts() {
        assert!(AnswerValue::Flag { value: false }.is_answered());
    }

    #[test]
    fn speaking_counts_with_audio_or_transcript() {
        let v = AnswerValue::Speaking {
            audio_ref: String::new(),
            transcript: " hello ".into(),
        };
        assert!(v.is_answered());
        let v = AnswerValue::Speaking {
            audio_ref: String::new(),
            transcript: "  ".into(),
        };
        assert!(!v.is_answered());
    }

    #[test]
    fn snapshot_counts_only_answered() {
        let mut snapshot = AnswerSnapshot::empty(fixed_now());
        snapshot.answers.insert(
            QuestionId::new(1),
            AnswerValue::Choice {
                selected: "A".into(),
            },
        );
        snapshot.answers.insert(
            QuestionId::new(2),
            AnswerValue::Choice {
                selected: String::new(),
            },
        );
        assert_eq!(snapshot.answered_count(), 1);
    }

    #[test]
    fn drawing_document_collects_only_drawing_answers() {
        let mut snapshot = AnswerSnapshot::empty(fixed_now());
        snapshot.answers.insert(
            QuestionId::new(1),
            AnswerValue::Drawing {
                paths: vec![DrawnPath {
                    points: vec![(0.0, 0.0), (1.0, 1.0)],
                    color: "#000".into(),
                    stroke_width: 2.0,
                }],
            },
        );
        snapshot.answers.insert(
            QuestionId::new(2),
            AnswerValue::Choice {
                selected: "B".into(),
            },
        );

        let doc = snapshot.drawing_document();
        assert_eq!(doc.shapes.len(), 1);
        assert!(doc.shapes.contains_key(&QuestionId::new(1)));
    }

    #[test]
    fn snapshot_serde_roundtrip() {
        let mut snapshot = AnswerSnapshot::empty(fixed_now());
        snapshot.answers.insert(
            QuestionId::new(3),
            AnswerValue::Matches {
                pairs: BTreeMap::from([("dog".to_string(), "Hund".to_string())]),
            },
        );
        snapshot.current_index = 2;
        snapshot.elapsed_seconds = 17;
        snapshot.seq = 4;

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: AnswerSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
