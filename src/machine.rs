use tracing::debug;

use crate::script::{Script, Turn, TurnKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no state named `{0}` in the script")]
pub struct InvalidTransition(pub String);

/// Walks a [`Script`] one turn at a time.
#[derive(Debug, Clone)]
pub struct StateMachine {
    script: Script,
    current: usize,
    history: Vec<String>,
}

impl StateMachine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            current: 0,
            history: Vec::new(),
        }
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn current_state(&self) -> &str {
        &self.current_turn().state
    }

    pub fn current_turn(&self) -> &Turn {
        self.script
            .at(self.current)
            .unwrap_or_else(|| self.script.first())
    }

    /// Jump to `target`. Unknown targets leave the machine untouched.
    pub fn transition(&mut self, target: &str) -> Result<(), InvalidTransition> {
        let Some(idx) = self.script.index_of(target) else {
            debug!(from = self.current_state(), to = target, "rejected transition");
            return Err(InvalidTransition(target.to_string()));
        };

        let previous = self.current_state().to_string();
        debug!(from = %previous, to = target, "transition");
        self.history.push(previous);
        self.current = idx;
        Ok(())
    }

    /// The state after the current one in script order.
    pub fn next_state(&self) -> Option<&str> {
        self.script
            .next_after(self.current_state())
            .map(|t| t.state.as_str())
    }

    /// Move to the next state in script order, returning its turn.
    pub fn advance(&mut self) -> Option<&Turn> {
        let next = self.next_state()?.to_string();
        self.transition(&next).ok()?;
        Some(self.current_turn())
    }

    pub fn reset(&mut self) {
        self.current = 0;
        self.history.clear();
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn is_finished(&self) -> bool {
        self.current_turn().kind == TurnKind::Final
    }
}
