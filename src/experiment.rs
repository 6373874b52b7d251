use std::time::Duration;

use tracing::{debug, info};

use crate::capture::{InputCapture, KeyInput};
use crate::clock::{Clock, Millis};
use crate::condition::{Condition, ConditionOrder};
use crate::config::Config;
use crate::logger::InteractionLogger;
use crate::machine::StateMachine;
use crate::script::{Script, TurnKind};
use crate::transcript::SessionInfo;
use crate::validation::RuleSet;

/// Delays that pace a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timings {
    pub reveal: Duration,
    pub settle: Duration,
    pub default_wait: Duration,
    pub final_hold: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for Timings {
    fn from(cfg: &Config) -> Self {
        Self {
            reveal: Duration::from_millis(cfg.reveal_delay_ms),
            settle: Duration::from_millis(cfg.settle_delay_ms),
            default_wait: Duration::from_millis(cfg.default_wait_ms),
            final_hold: Duration::from_millis(cfg.final_hold_ms),
        }
    }
}

fn after(now: Millis, delay: Duration) -> Millis {
    now + delay.as_secs_f64() * 1000.0
}

/// Where the session is between two deadlines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    /// The current turn's message appears at `until`.
    Revealing { until: Millis },
    /// The prompt is up; input opens at `until`.
    Settling { until: Millis },
    AwaitingInput,
    /// A wait turn; the conversation resumes at `until`.
    Waiting { until: Millis },
    /// The final message is up; the session ends at `until`.
    Closing { until: Millis },
    Finished,
}

impl Phase {
    fn deadline(&self) -> Option<Millis> {
        match *self {
            Phase::Revealing { until }
            | Phase::Settling { until }
            | Phase::Waiting { until }
            | Phase::Closing { until } => Some(until),
            Phase::AwaitingInput | Phase::Finished => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Bot,
    Participant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub speaker: Speaker,
    pub text: String,
}

/// What a key press did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Input is closed, nothing was recorded.
    Ignored,
    Edited,
    /// Enter on an empty buffer.
    Empty,
    /// Validation failed with this reason; the turn stays open.
    Rejected(String),
    Accepted,
}

/// One participant working through one scripted conversation.
pub struct Experiment<C: Clock> {
    machine: StateMachine,
    logger: InteractionLogger<C>,
    rules: RuleSet,
    timings: Timings,
    chat: Vec<ChatLine>,
    capture: Option<InputCapture>,
    error: Option<String>,
    phase: Phase,
}

impl<C: Clock> Experiment<C> {
    /// Start a session. The first message is revealed on the first tick.
    pub fn new(
        script: Script,
        info: SessionInfo,
        rules: RuleSet,
        timings: Timings,
        clock: C,
    ) -> Self {
        let logger = InteractionLogger::new(info, clock);
        let phase = Phase::Revealing {
            until: logger.now(),
        };
        Self {
            machine: StateMachine::new(script),
            logger,
            rules,
            timings,
            chat: Vec::new(),
            capture: None,
            error: None,
            phase,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Finished
    }

    pub fn current_state(&self) -> &str {
        self.machine.current_state()
    }

    pub fn machine(&self) -> &StateMachine {
        &self.machine
    }

    pub fn logger(&self) -> &InteractionLogger<C> {
        &self.logger
    }

    pub fn info(&self) -> &SessionInfo {
        self.logger.info()
    }

    pub fn chat(&self) -> &[ChatLine] {
        &self.chat
    }

    /// Text typed so far on the open turn.
    pub fn draft(&self) -> Option<&str> {
        self.capture.as_ref().map(|c| c.text())
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn input_open(&self) -> bool {
        self.phase == Phase::AwaitingInput
    }

    /// Hand the session record on once the conversation is over.
    pub fn into_logger(self) -> InteractionLogger<C> {
        self.logger
    }

    /// Fire every deadline that has passed on the session clock.
    pub fn on_tick(&mut self) {
        while let Some(until) = self.phase.deadline() {
            let now = self.logger.now();
            if until > now {
                break;
            }
            self.fire(now);
        }
    }

    fn fire(&mut self, now: Millis) {
        match self.phase {
            Phase::Revealing { .. } => self.reveal(now),
            Phase::Settling { .. } => {
                let state = self.machine.current_state().to_string();
                let at = self.logger.record_input_available(&state);
                debug!(%state, "input open");
                self.capture = Some(InputCapture::new(state, Some(at)));
                self.phase = Phase::AwaitingInput;
            }
            Phase::Waiting { .. } => self.advance(now),
            Phase::Closing { .. } => {
                info!(state = self.machine.current_state(), "conversation finished");
                self.phase = Phase::Finished;
            }
            Phase::AwaitingInput | Phase::Finished => {}
        }
    }

    fn reveal(&mut self, now: Millis) {
        let turn = self.machine.current_turn().clone();
        self.chat.push(ChatLine {
            speaker: Speaker::Bot,
            text: turn.message.clone(),
        });
        self.logger.record_message(&turn.state, &turn.message);

        self.phase = match turn.kind {
            TurnKind::Message => {
                self.advance(now);
                return;
            }
            TurnKind::Input => {
                self.logger.record_prompt(&turn.state, &turn.message);
                Phase::Settling {
                    until: after(now, self.timings.settle),
                }
            }
            TurnKind::Wait => {
                let default_ms = self.timings.default_wait.as_millis() as u64;
                Phase::Waiting {
                    until: after(now, Duration::from_millis(turn.wait_duration(default_ms))),
                }
            }
            TurnKind::Final => Phase::Closing {
                until: after(now, self.timings.final_hold),
            },
        };
    }

    fn advance(&mut self, now: Millis) {
        self.phase = match self.machine.advance() {
            Some(_) => Phase::Revealing {
                until: after(now, self.timings.reveal),
            },
            None => Phase::Finished,
        };
    }

    pub fn on_key(&mut self, key: KeyInput) -> KeyOutcome {
        if self.phase != Phase::AwaitingInput {
            return KeyOutcome::Ignored;
        }
        let now = self.logger.now();
        match key {
            KeyInput::Enter => self.submit(now),
            key => {
                if let Some(capture) = self.capture.as_mut() {
                    capture.apply(&key, now);
                }
                self.error = None;
                KeyOutcome::Edited
            }
        }
    }

    fn submit(&mut self, now: Millis) -> KeyOutcome {
        let Some(capture) = self.capture.as_ref() else {
            return KeyOutcome::Ignored;
        };
        if capture.text().trim().is_empty() {
            return KeyOutcome::Empty;
        }

        let attempt = capture.snapshot(now);
        if let Err(failure) = self.rules.check(&attempt.state, &attempt.text) {
            self.logger.record_validation_failure(&failure, &attempt);
            self.error = Some(failure.reason.clone());
            return KeyOutcome::Rejected(failure.reason);
        }

        let Some(capture) = self.capture.take() else {
            return KeyOutcome::Ignored;
        };
        let submission = capture.into_submission(now);
        let state = submission.state.clone();
        let text = submission.text.trim().to_string();
        self.logger.record_response(&state, submission);
        self.chat.push(ChatLine {
            speaker: Speaker::Participant,
            text,
        });
        self.error = None;
        self.advance(now);
        KeyOutcome::Accepted
    }
}

/// The sessions one participant runs, in counterbalanced order.
#[derive(Debug, Clone)]
pub struct Study {
    participant_id: String,
    order: ConditionOrder,
    next: usize,
}

impl Study {
    /// `start_from` is the 1-based session to begin with.
    pub fn new(
        participant_id: impl Into<String>,
        order: ConditionOrder,
        start_from: usize,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            order,
            next: start_from.saturating_sub(1),
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn order(&self) -> &ConditionOrder {
        &self.order
    }

    pub fn remaining(&self) -> usize {
        self.order.len().saturating_sub(self.next)
    }

    /// Identity of the next session, if any are left.
    pub fn next_session(&mut self) -> Option<SessionInfo> {
        let condition: Condition = self.order.get(self.next)?;
        self.next += 1;
        Some(SessionInfo {
            participant_id: self.participant_id.clone(),
            condition,
            condition_order: self.order.clone(),
            session_number: self.next,
        })
    }
}
