use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::{Keystroke, Latency, Submission, Timestamps};
use crate::clock::Millis;
use crate::condition::{Condition, ConditionOrder};
use crate::util::{mean, median, std_dev};

/// An accepted answer to an input turn, with its timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub state: String,
    pub bot_prompt: Option<String>,
    /// When the prompt was presented, on the session clock.
    pub prompt_shown_at: Option<Millis>,
    pub user_response: String,
    pub timing: Latency,
    pub timestamps: Timestamps,
    pub keystroke_count: usize,
    pub keystroke_sequence: Vec<Keystroke>,
}

impl TurnResponse {
    pub fn new(prompt: Option<(String, Millis)>, submission: Submission) -> Self {
        let (bot_prompt, prompt_shown_at) = match prompt {
            Some((text, at)) => (Some(text), Some(at)),
            None => (None, None),
        };
        Self {
            state: submission.state,
            bot_prompt,
            prompt_shown_at,
            user_response: submission.text,
            timing: submission.timestamps.latency(),
            timestamps: submission.timestamps,
            keystroke_count: submission.keystrokes.len(),
            keystroke_sequence: submission.keystrokes,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageStyle {
    NoEmojis,
    FewEmojis,
    ManyEmojis,
    NoPreference,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionComplete {
    Yes,
    No,
    Unsure,
}

/// Answers to the post-session questionnaire. Likert items are 1..=7.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyResponse {
    pub competent: u8,
    pub knowledgeable: u8,
    pub reliable: u8,
    pub professional: u8,
    pub appropriate_tone: u8,
    pub appropriate_formality: u8,
    pub appropriate_context: u8,
    pub message_style: Option<MessageStyle>,
    pub transaction_complete: Option<TransactionComplete>,
}

impl Default for SurveyResponse {
    fn default() -> Self {
        Self {
            competent: 4,
            knowledgeable: 4,
            reliable: 4,
            professional: 4,
            appropriate_tone: 4,
            appropriate_formality: 4,
            appropriate_context: 4,
            message_style: None,
            transaction_complete: None,
        }
    }
}

impl SurveyResponse {
    /// `(field, value)` pairs in questionnaire order, as written to exports.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("competent", self.competent.to_string()),
            ("knowledgeable", self.knowledgeable.to_string()),
            ("reliable", self.reliable.to_string()),
            ("professional", self.professional.to_string()),
            ("appropriate_tone", self.appropriate_tone.to_string()),
            ("appropriate_formality", self.appropriate_formality.to_string()),
            ("appropriate_context", self.appropriate_context.to_string()),
            (
                "message_style",
                self.message_style.map(|m| m.to_string()).unwrap_or_default(),
            ),
            (
                "transaction_complete",
                self.transaction_complete
                    .map(|t| t.to_string())
                    .unwrap_or_default(),
            ),
        ]
    }
}

/// Who is being run, under which condition, and in which slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub participant_id: String,
    pub condition: Condition,
    pub condition_order: ConditionOrder,
    /// 1-based position of this session in `condition_order`.
    pub session_number: usize,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    MessageRender,
    InputAvailable,
    ValidationError,
    ResponseSubmitted,
}

/// Audit trail entry. Events are never counted as turn responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub state: String,
    pub event_type: EventKind,
    pub timestamp: Millis,
    pub time_since_session_start: Millis,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Everything persisted for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTranscript {
    #[serde(flatten)]
    pub info: SessionInfo,
    pub session_start: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub session_duration_ms: Option<Millis>,
    pub user_responses: Vec<TurnResponse>,
    pub survey_responses: Option<SurveyResponse>,
    #[serde(default)]
    pub events: Vec<SessionEvent>,
}

impl SessionTranscript {
    pub fn summary(&self) -> SessionSummary {
        SessionSummary::from_responses(&self.user_responses)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSummary {
    pub turns: usize,
    pub keystrokes: usize,
    pub mean_first_keystroke_ms: Option<f64>,
    pub std_dev_first_keystroke_ms: Option<f64>,
    pub median_first_keystroke_ms: Option<f64>,
    pub mean_input_latency_ms: Option<f64>,
}

impl SessionSummary {
    pub fn from_responses(responses: &[TurnResponse]) -> Self {
        let first_keys: Vec<f64> = responses
            .iter()
            .filter_map(|r| r.timing.time_to_first_keystroke_ms)
            .collect();
        let latencies: Vec<f64> = responses
            .iter()
            .filter_map(|r| r.timing.input_latency_ms)
            .collect();

        Self {
            turns: responses.len(),
            keystrokes: responses.iter().map(|r| r.keystroke_count).sum(),
            mean_first_keystroke_ms: mean(&first_keys),
            std_dev_first_keystroke_ms: std_dev(&first_keys),
            median_first_keystroke_ms: median(&first_keys),
            mean_input_latency_ms: mean(&latencies),
        }
    }
}
