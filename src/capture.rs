use serde::{Deserialize, Serialize};

use crate::clock::Millis;

/// One physical key event during an open input turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keystroke {
    pub key: String,
    #[serde(rename = "timestamp")]
    pub timestamp_ms: Millis,
    #[serde(rename = "time_since_input_available")]
    pub since_input_available_ms: Option<Millis>,
    #[serde(rename = "time_since_first_keystroke")]
    pub since_first_keystroke_ms: Millis,
}

/// Latencies derived from a submission's raw timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Latency {
    /// input available -> submit
    pub input_latency_ms: Option<Millis>,
    /// input available -> first keystroke
    pub time_to_first_keystroke_ms: Option<Millis>,
    /// first keystroke -> submit
    pub typing_duration_ms: Option<Millis>,
}

/// Raw timestamps a [`Latency`] is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Timestamps {
    pub input_available: Option<Millis>,
    pub first_keystroke: Option<Millis>,
    pub submit: Millis,
}

impl Timestamps {
    pub fn latency(&self) -> Latency {
        Latency {
            input_latency_ms: self.input_available.map(|a| self.submit - a),
            time_to_first_keystroke_ms: self
                .input_available
                .zip(self.first_keystroke)
                .map(|(a, f)| f - a),
            typing_duration_ms: self.first_keystroke.map(|f| self.submit - f),
        }
    }
}

/// Text and timing of one submit attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub state: String,
    pub text: String,
    pub keystrokes: Vec<Keystroke>,
    pub timestamps: Timestamps,
}

impl Submission {
    pub fn latency(&self) -> Latency {
        self.timestamps.latency()
    }

    pub fn keystroke_count(&self) -> usize {
        self.keystrokes.len()
    }
}

/// Key identities as they are written to the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
    Char(char),
    Backspace,
    Enter,
    Other(String),
}

impl KeyInput {
    pub fn name(&self) -> String {
        match self {
            KeyInput::Char(c) => c.to_string(),
            KeyInput::Backspace => "Backspace".to_string(),
            KeyInput::Enter => "Enter".to_string(),
            KeyInput::Other(name) => name.clone(),
        }
    }
}

/// Keystrokes and edited text for the input turn that is currently open.
///
/// The buffer spans every attempt on the turn; it is only dropped when a
/// submission is accepted.
#[derive(Debug, Clone)]
pub struct InputCapture {
    state: String,
    available_at: Option<Millis>,
    first_keystroke_at: Option<Millis>,
    keystrokes: Vec<Keystroke>,
    text: String,
}

impl InputCapture {
    pub fn new(state: impl Into<String>, available_at: Option<Millis>) -> Self {
        Self {
            state: state.into(),
            available_at,
            first_keystroke_at: None,
            keystrokes: Vec::new(),
            text: String::new(),
        }
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn keystrokes(&self) -> &[Keystroke] {
        &self.keystrokes
    }

    pub fn available_at(&self) -> Option<Millis> {
        self.available_at
    }

    pub fn first_keystroke_at(&self) -> Option<Millis> {
        self.first_keystroke_at
    }

    /// Record a key event without touching the text.
    pub fn press(&mut self, key: &KeyInput, at: Millis) -> &Keystroke {
        let first = *self.first_keystroke_at.get_or_insert(at);
        self.keystrokes.push(Keystroke {
            key: key.name(),
            timestamp_ms: at,
            since_input_available_ms: self.available_at.map(|a| at - a),
            since_first_keystroke_ms: (at - first).max(0.0),
        });
        &self.keystrokes[self.keystrokes.len() - 1]
    }

    /// Record the key and apply it to the text buffer.
    pub fn apply(&mut self, key: &KeyInput, at: Millis) {
        self.press(key, at);
        match key {
            KeyInput::Char(c) => self.text.push(*c),
            KeyInput::Backspace => {
                self.text.pop();
            }
            KeyInput::Enter | KeyInput::Other(_) => {}
        }
    }

    /// Snapshot the current attempt, keeping the buffer for further edits.
    pub fn snapshot(&self, at: Millis) -> Submission {
        Submission {
            state: self.state.clone(),
            text: self.text.clone(),
            keystrokes: self.keystrokes.clone(),
            timestamps: self.timestamps(at),
        }
    }

    /// Close the turn, handing over everything captured.
    pub fn into_submission(self, at: Millis) -> Submission {
        let timestamps = self.timestamps(at);
        Submission {
            state: self.state,
            text: self.text,
            keystrokes: self.keystrokes,
            timestamps,
        }
    }

    fn timestamps(&self, at: Millis) -> Timestamps {
        Timestamps {
            input_available: self.available_at,
            first_keystroke: self.first_keystroke_at,
            submit: at,
        }
    }
}
