use crate::transcript::{MessageStyle, SurveyResponse, TransactionComplete};

pub const LIKERT_MIN: u8 = 1;
pub const LIKERT_MAX: u8 = 7;

const MESSAGE_STYLES: [(MessageStyle, &str); 4] = [
    (MessageStyle::NoEmojis, "No emojis"),
    (MessageStyle::FewEmojis, "A few emojis"),
    (MessageStyle::ManyEmojis, "Many emojis"),
    (MessageStyle::NoPreference, "No preference"),
];

const TRANSACTION: [(TransactionComplete, &str); 3] = [
    (TransactionComplete::Yes, "Yes"),
    (TransactionComplete::No, "No"),
    (TransactionComplete::Unsure, "Unsure"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionKind {
    Likert {
        low: &'static str,
        high: &'static str,
    },
    MessageStyle,
    TransactionComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question {
    pub field: &'static str,
    pub section: &'static str,
    pub label: &'static str,
    pub kind: QuestionKind,
}

const fn likert(
    field: &'static str,
    section: &'static str,
    label: &'static str,
    low: &'static str,
    high: &'static str,
) -> Question {
    Question {
        field,
        section,
        label,
        kind: QuestionKind::Likert { low, high },
    }
}

pub const QUESTIONS: [Question; 9] = [
    likert(
        "competent",
        "Competence",
        "The chatbot seemed:",
        "Not at all competent",
        "Very competent",
    ),
    likert(
        "knowledgeable",
        "Competence",
        "The chatbot appeared:",
        "Not knowledgeable",
        "Very knowledgeable",
    ),
    likert("reliable", "Competence", "The chatbot felt:", "Unreliable", "Very reliable"),
    likert("professional", "Competence", "The chatbot was:", "Unprofessional", "Very professional"),
    likert(
        "appropriate_tone",
        "Appropriateness",
        "The tone of the messages was:",
        "Inappropriate",
        "Appropriate",
    ),
    likert(
        "appropriate_formality",
        "Appropriateness",
        "The level of formality was:",
        "Inappropriate",
        "Appropriate",
    ),
    likert(
        "appropriate_context",
        "Appropriateness",
        "For a banking context, the style was:",
        "Inappropriate",
        "Appropriate",
    ),
    Question {
        field: "message_style",
        section: "Message Style",
        label: "Which message style did you prefer overall?",
        kind: QuestionKind::MessageStyle,
    },
    Question {
        field: "transaction_complete",
        section: "Transaction Understanding",
        label: "Did the chatbot successfully complete the transaction?",
        kind: QuestionKind::TransactionComplete,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("please answer: {}", .0.join(", "))]
pub struct SurveyIncomplete(pub Vec<&'static str>);

/// Keyboard-driven questionnaire shown after each conversation.
#[derive(Debug, Clone, Default)]
pub struct SurveyForm {
    cursor: usize,
    response: SurveyResponse,
}

impl SurveyForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn questions(&self) -> &'static [Question] {
        &QUESTIONS
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> &'static Question {
        &QUESTIONS[self.cursor]
    }

    pub fn up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn down(&mut self) {
        self.cursor = (self.cursor + 1).min(QUESTIONS.len() - 1);
    }

    pub fn left(&mut self) {
        self.step(-1);
    }

    pub fn right(&mut self) {
        self.step(1);
    }

    /// Pick option `n` (1-based) on the current question. Out of range is ignored.
    pub fn choose(&mut self, n: u8) {
        let field = self.current().field;
        match self.current().kind {
            QuestionKind::Likert { .. } => {
                if (LIKERT_MIN..=LIKERT_MAX).contains(&n) {
                    if let Some(v) = self.likert_mut(field) {
                        *v = n;
                    }
                }
            }
            QuestionKind::MessageStyle => {
                if let Some((style, _)) = option_at(&MESSAGE_STYLES, n) {
                    self.response.message_style = Some(style);
                }
            }
            QuestionKind::TransactionComplete => {
                if let Some((answer, _)) = option_at(&TRANSACTION, n) {
                    self.response.transaction_complete = Some(answer);
                }
            }
        }
    }

    fn step(&mut self, delta: i8) {
        let field = self.current().field;
        match self.current().kind {
            QuestionKind::Likert { .. } => {
                if let Some(v) = self.likert_mut(field) {
                    *v = v.saturating_add_signed(delta).clamp(LIKERT_MIN, LIKERT_MAX);
                }
            }
            QuestionKind::MessageStyle => {
                let idx = self
                    .response
                    .message_style
                    .and_then(|s| MESSAGE_STYLES.iter().position(|(m, _)| *m == s));
                let next = cycle(idx, delta, MESSAGE_STYLES.len());
                self.response.message_style = Some(MESSAGE_STYLES[next].0);
            }
            QuestionKind::TransactionComplete => {
                let idx = self
                    .response
                    .transaction_complete
                    .and_then(|t| TRANSACTION.iter().position(|(m, _)| *m == t));
                let next = cycle(idx, delta, TRANSACTION.len());
                self.response.transaction_complete = Some(TRANSACTION[next].0);
            }
        }
    }

    fn likert_mut(&mut self, field: &str) -> Option<&mut u8> {
        let r = &mut self.response;
        Some(match field {
            "competent" => &mut r.competent,
            "knowledgeable" => &mut r.knowledgeable,
            "reliable" => &mut r.reliable,
            "professional" => &mut r.professional,
            "appropriate_tone" => &mut r.appropriate_tone,
            "appropriate_formality" => &mut r.appropriate_formality,
            "appropriate_context" => &mut r.appropriate_context,
            _ => return None,
        })
    }

    /// Display text for the answer to question `idx`.
    pub fn answer_label(&self, idx: usize) -> String {
        let Some(q) = QUESTIONS.get(idx) else {
            return String::new();
        };
        let r = &self.response;
        match q.kind {
            QuestionKind::Likert { .. } => r
                .fields()
                .into_iter()
                .find(|(f, _)| *f == q.field)
                .map(|(_, v)| v)
                .unwrap_or_default(),
            QuestionKind::MessageStyle => label_of(&MESSAGE_STYLES, r.message_style),
            QuestionKind::TransactionComplete => label_of(&TRANSACTION, r.transaction_complete),
        }
    }

    /// Option labels for a choice question, empty for Likert items.
    pub fn options(kind: QuestionKind) -> Vec<&'static str> {
        match kind {
            QuestionKind::Likert { .. } => Vec::new(),
            QuestionKind::MessageStyle => MESSAGE_STYLES.iter().map(|(_, l)| *l).collect(),
            QuestionKind::TransactionComplete => TRANSACTION.iter().map(|(_, l)| *l).collect(),
        }
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.response.message_style.is_none() {
            missing.push("message_style");
        }
        if self.response.transaction_complete.is_none() {
            missing.push("transaction_complete");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    pub fn response(&self) -> &SurveyResponse {
        &self.response
    }

    pub fn submit(&self) -> Result<SurveyResponse, SurveyIncomplete> {
        match self.missing() {
            missing if missing.is_empty() => Ok(self.response.clone()),
            missing => Err(SurveyIncomplete(missing)),
        }
    }
}

fn option_at<T: Copy>(options: &[(T, &'static str)], n: u8) -> Option<(T, &'static str)> {
    (n as usize)
        .checked_sub(1)
        .and_then(|i| options.get(i))
        .copied()
}

fn cycle(idx: Option<usize>, delta: i8, len: usize) -> usize {
    match idx {
        None if delta < 0 => len - 1,
        None => 0,
        Some(i) if delta < 0 => (i + len - 1) % len,
        Some(i) => (i + 1) % len,
    }
}

fn label_of<T: PartialEq + Copy>(options: &[(T, &'static str)], value: Option<T>) -> String {
    value
        .and_then(|v| options.iter().find(|(o, _)| *o == v))
        .map(|(_, l)| l.to_string())
        .unwrap_or_else(|| "-".to_string())
}
