use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How the conversation proceeds once a turn has been displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TurnKind {
    /// Advance on its own after the message is shown.
    Message,
    /// Block until the participant submits a valid response.
    Input,
    /// Advance on its own after `duration_ms`.
    Wait,
    /// End of the script.
    Final,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub state: String,
    #[serde(rename = "type")]
    pub kind: TurnKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "duration")]
    pub duration_ms: Option<u64>,
}

impl Turn {
    pub fn new(state: impl Into<String>, kind: TurnKind, message: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            kind,
            message: message.into(),
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn wait_duration(&self, default_ms: u64) -> u64 {
        self.duration_ms.unwrap_or(default_ms)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScriptError {
    #[error("script has no turns")]
    Empty,

    #[error("state `{0}` appears more than once")]
    DuplicateState(String),

    #[error("script has no final turn")]
    MissingFinal,

    #[error("script has more than one final turn: `{0}` and `{1}`")]
    MultipleFinals(String, String),

    #[error("final turn `{0}` must be the last turn")]
    FinalNotLast(String),

    #[error("invalid script json: {0}")]
    Json(String),
}

/// An immutable, ordered conversation script.
///
/// Turns are kept in declaration order; the name index is only used for
/// lookups, never to decide what comes next.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    turns: Vec<Turn>,
    index: HashMap<String, usize>,
}

impl Script {
    pub fn new(turns: Vec<Turn>) -> Result<Self, ScriptError> {
        if turns.is_empty() {
            return Err(ScriptError::Empty);
        }

        let mut index = HashMap::with_capacity(turns.len());
        let mut final_state: Option<&str> = None;
        for (i, turn) in turns.iter().enumerate() {
            if index.insert(turn.state.clone(), i).is_some() {
                return Err(ScriptError::DuplicateState(turn.state.clone()));
            }
            if turn.kind == TurnKind::Final {
                if let Some(first) = final_state {
                    return Err(ScriptError::MultipleFinals(
                        first.to_string(),
                        turn.state.clone(),
                    ));
                }
                final_state = Some(&turn.state);
            }
        }

        match final_state {
            None => return Err(ScriptError::MissingFinal),
            Some(name) if index[name] != turns.len() - 1 => {
                return Err(ScriptError::FinalNotLast(name.to_string()))
            }
            Some(_) => {}
        }

        Ok(Self { turns, index })
    }

    /// Parse a script from its JSON record list.
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        let turns: Vec<Turn> =
            serde_json::from_str(json).map_err(|e| ScriptError::Json(e.to_string()))?;
        Self::new(turns)
    }

    pub fn first(&self) -> &Turn {
        &self.turns[0]
    }

    pub fn at(&self, idx: usize) -> Option<&Turn> {
        self.turns.get(idx)
    }

    pub fn get(&self, state: &str) -> Option<&Turn> {
        self.index_of(state).map(|i| &self.turns[i])
    }

    pub fn contains(&self, state: &str) -> bool {
        self.index.contains_key(state)
    }

    pub fn index_of(&self, state: &str) -> Option<usize> {
        self.index.get(state).copied()
    }

    pub fn next_after(&self, state: &str) -> Option<&Turn> {
        self.index_of(state).and_then(|i| self.turns.get(i + 1))
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn input_turns(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| t.kind == TurnKind::Input)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> Vec<Turn> {
        vec![
            Turn::new("a", TurnKind::Message, "hi"),
            Turn::new("b", TurnKind::Input, "what is 6 + 7?"),
            Turn::new("c", TurnKind::Final, "bye"),
        ]
    }

    #[test]
    fn keeps_declared_order() {
        let script = Script::new(abc()).unwrap();
        let names: Vec<_> = script.iter().map(|t| t.state.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(script.first().state, "a");
        assert_eq!(script.next_after("a").unwrap().state, "b");
        assert!(script.next_after("c").is_none());
        assert!(script.next_after("zzz").is_none());
        assert_eq!(script.input_turns(), 1);
    }

    #[test]
    fn rejects_empty_script() {
        assert_eq!(Script::new(vec![]), Err(ScriptError::Empty));
    }

    #[test]
    fn rejects_duplicate_states() {
        let mut turns = abc();
        turns.insert(1, Turn::new("a", TurnKind::Message, "again"));
        assert_eq!(
            Script::new(turns),
            Err(ScriptError::DuplicateState("a".into()))
        );
    }

    #[test]
    fn requires_single_trailing_final() {
        let mut turns = abc();
        turns.pop();
        assert_eq!(Script::new(turns), Err(ScriptError::MissingFinal));

        let mut turns = abc();
        turns.push(Turn::new("d", TurnKind::Final, "really bye"));
        assert_eq!(
            Script::new(turns),
            Err(ScriptError::MultipleFinals("c".into(), "d".into()))
        );

        let mut turns = abc();
        turns.push(Turn::new("d", TurnKind::Message, "after the end"));
        assert_eq!(
            Script::new(turns),
            Err(ScriptError::FinalNotLast("c".into()))
        );
    }

    #[test]
    fn parses_json_records() {
        let json = r#"[
            {"state": "hello", "type": "message", "message": "Hello"},
            {"state": "hold", "type": "wait", "message": "One moment", "duration": 1500},
            {"state": "done", "type": "final", "message": "Bye"}
        ]"#;
        let script = Script::from_json(json).unwrap();
        assert_eq!(script.len(), 3);
        let hold = script.get("hold").unwrap();
        assert_eq!(hold.kind, TurnKind::Wait);
        assert_eq!(hold.wait_duration(3000), 1500);
        assert_eq!(script.get("hello").unwrap().wait_duration(3000), 3000);
    }

    #[test]
    fn reports_bad_json() {
        let err = Script::from_json(r#"[{"state": "x", "type": "shout"}]"#).unwrap_err();
        assert!(matches!(err, ScriptError::Json(_)));
    }
}
