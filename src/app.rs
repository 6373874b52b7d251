use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent};
use tracing::{error, info, warn};

use crate::clock::{Clock, Millis};
use crate::condition::ConditionOrder;
use crate::error::{Error, Result};
use crate::experiment::{Experiment, Study, Timings};
use crate::logger::InteractionLogger;
use crate::persistence::{DocumentId, DocumentSink};
use crate::runtime::key_input;
use crate::script::Script;
use crate::survey::SurveyForm;
use crate::transcript::{SessionInfo, SessionSummary, SurveyResponse};
use crate::validation::RuleSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Asking for a participant id.
    Welcome,
    Chat,
    Survey,
    /// Survey submitted; the save runs on the next tick.
    Saving,
    SaveFailed,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Quit,
}

/// A session that made it to the store.
#[derive(Debug, Clone)]
pub struct CompletedSession {
    pub info: SessionInfo,
    pub summary: SessionSummary,
    pub duration_ms: Millis,
    pub document_id: DocumentId,
}

/// Everything an [`App`] needs besides the participant.
pub struct AppSettings {
    pub order: ConditionOrder,
    pub start_from: usize,
    pub timings: Timings,
    pub rules: RuleSet,
    /// Used for every session instead of the condition's bundled script.
    pub script: Option<Script>,
    pub sink: Arc<dyn DocumentSink>,
    pub persist_timeout: Duration,
}

/// Screen flow for a participant: welcome, then chat and survey per session.
pub struct App<C: Clock + Clone> {
    settings: AppSettings,
    clock: C,
    pub state: AppState,
    name_input: String,
    study: Option<Study>,
    experiment: Option<Experiment<C>>,
    finished: Option<InteractionLogger<C>>,
    survey: SurveyForm,
    submitted: Option<SurveyResponse>,
    notice: Option<String>,
    completed: Vec<CompletedSession>,
}

impl<C: Clock + Clone> App<C> {
    /// Start at the welcome screen, or go straight to the first session when
    /// the participant is already known.
    pub fn new(settings: AppSettings, participant: Option<String>, clock: C) -> Result<Self> {
        let mut app = Self {
            settings,
            clock,
            state: AppState::Welcome,
            name_input: String::new(),
            study: None,
            experiment: None,
            finished: None,
            survey: SurveyForm::new(),
            submitted: None,
            notice: None,
            completed: Vec::new(),
        };
        if let Some(id) = participant.filter(|p| !p.trim().is_empty()) {
            app.begin(id.trim().to_string())?;
        }
        Ok(app)
    }

    pub fn name_input(&self) -> &str {
        &self.name_input
    }

    pub fn study(&self) -> Option<&Study> {
        self.study.as_ref()
    }

    pub fn experiment(&self) -> Option<&Experiment<C>> {
        self.experiment.as_ref()
    }

    pub fn survey(&self) -> &SurveyForm {
        &self.survey
    }

    /// Message shown under the current screen, e.g. a save error.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn completed(&self) -> &[CompletedSession] {
        &self.completed
    }

    /// Session identity of the conversation or survey on screen.
    pub fn current_session(&self) -> Option<&SessionInfo> {
        self.experiment
            .as_ref()
            .map(|e| e.info())
            .or_else(|| self.finished.as_ref().map(|l| l.info()))
    }

    /// A finished conversation that has not been saved.
    pub fn has_unsaved_session(&self) -> bool {
        self.finished.as_ref().is_some_and(|l| !l.is_saved())
    }

    fn begin(&mut self, participant_id: String) -> Result<()> {
        info!(
            participant = %participant_id,
            order = %self.settings.order,
            "participant registered"
        );
        self.study = Some(Study::new(
            participant_id,
            self.settings.order.clone(),
            self.settings.start_from,
        ));
        self.start_next_session()
    }

    fn start_next_session(&mut self) -> Result<()> {
        let Some(info) = self.study.as_mut().and_then(|s| s.next_session()) else {
            info!(sessions = self.completed.len(), "study complete");
            self.state = AppState::Complete;
            return Ok(());
        };
        let script = match &self.settings.script {
            Some(script) => script.clone(),
            None => info.condition.script()?,
        };
        self.experiment = Some(Experiment::new(
            script,
            info,
            self.settings.rules.clone(),
            self.settings.timings,
            self.clock.clone(),
        ));
        self.survey = SurveyForm::new();
        self.submitted = None;
        self.notice = None;
        self.state = AppState::Chat;
        Ok(())
    }

    pub fn on_tick(&mut self) {
        match self.state {
            AppState::Chat => {
                let Some(experiment) = self.experiment.as_mut() else {
                    return;
                };
                experiment.on_tick();
                if experiment.is_finished() {
                    if let Some(experiment) = self.experiment.take() {
                        self.finished = Some(experiment.into_logger());
                        self.state = AppState::Survey;
                    }
                }
            }
            AppState::Saving => self.save(),
            _ => {}
        }
    }

    pub fn on_key(&mut self, key: &KeyEvent) -> Result<Control> {
        match self.state {
            AppState::Welcome => match key.code {
                KeyCode::Enter if !self.name_input.trim().is_empty() => {
                    let id = self.name_input.trim().to_string();
                    self.begin(id)?;
                }
                KeyCode::Char(c) => self.name_input.push(c),
                KeyCode::Backspace => {
                    self.name_input.pop();
                }
                KeyCode::Esc => return Ok(Control::Quit),
                _ => {}
            },
            AppState::Chat => {
                if let (Some(experiment), Some(input)) =
                    (self.experiment.as_mut(), key_input(key))
                {
                    experiment.on_key(input);
                }
            }
            AppState::Survey => self.on_survey_key(key),
            AppState::Saving => {}
            AppState::SaveFailed => match key.code {
                KeyCode::Char('r') | KeyCode::Enter => self.state = AppState::Saving,
                KeyCode::Esc => return Ok(Control::Quit),
                _ => {}
            },
            AppState::Complete => match key.code {
                KeyCode::Char('q') | KeyCode::Esc | KeyCode::Enter => return Ok(Control::Quit),
                _ => {}
            },
        }
        Ok(Control::Continue)
    }

    fn on_survey_key(&mut self, key: &KeyEvent) {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => self.survey.up(),
            KeyCode::Down | KeyCode::Tab | KeyCode::Char('j') => self.survey.down(),
            KeyCode::Left | KeyCode::Char('h') => self.survey.left(),
            KeyCode::Right | KeyCode::Char('l') => self.survey.right(),
            KeyCode::Char(c) if c.is_ascii_digit() => {
                self.survey.choose(c as u8 - b'0');
            }
            KeyCode::Enter => match self.survey.submit() {
                Ok(response) => {
                    self.submitted = Some(response);
                    self.notice = None;
                    self.state = AppState::Saving;
                }
                Err(incomplete) => self.notice = Some(incomplete.to_string()),
            },
            _ => {}
        }
    }

    fn save(&mut self) {
        let (Some(logger), Some(survey)) = (self.finished.as_mut(), self.submitted.clone()) else {
            warn!("nothing to save");
            self.state = AppState::Survey;
            return;
        };

        let result = logger.finalize_session(
            survey,
            self.settings.sink.clone(),
            self.settings.persist_timeout,
        );
        match result {
            Ok(id) | Err(Error::AlreadyFinalized(id)) => {
                let transcript = logger.transcript();
                self.completed.push(CompletedSession {
                    info: logger.info().clone(),
                    summary: transcript.summary(),
                    duration_ms: logger.elapsed_ms(),
                    document_id: id,
                });
                self.finished = None;
                if let Err(e) = self.start_next_session() {
                    error!(error = %e, "could not start next session");
                    self.notice = Some(e.to_string());
                    self.state = AppState::Complete;
                }
            }
            Err(e) => {
                self.notice = Some(e.to_string());
                self.state = AppState::SaveFailed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::MemorySink;
    use crossterm::event::KeyModifiers;
    use std::rc::Rc;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn settings(sink: Arc<MemorySink>) -> AppSettings {
        AppSettings {
            order: "emoji-none".parse().unwrap(),
            start_from: 1,
            timings: Timings::default(),
            rules: RuleSet::banking(),
            script: None,
            sink,
            persist_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn welcome_collects_participant_id() {
        let clock = Rc::new(ManualClock::default());
        let mut app = App::new(settings(Arc::new(MemorySink::new())), None, clock).unwrap();
        assert_eq!(app.state, AppState::Welcome);

        app.on_key(&key(KeyCode::Enter)).unwrap();
        assert_eq!(app.state, AppState::Welcome);

        for c in "p-42".chars() {
            app.on_key(&key(KeyCode::Char(c))).unwrap();
        }
        app.on_key(&key(KeyCode::Enter)).unwrap();
        assert_eq!(app.state, AppState::Chat);
        let info = app.current_session().unwrap();
        assert_eq!(info.participant_id, "p-42");
        assert_eq!(info.session_number, 1);
        assert_eq!(info.condition.to_string(), "emoji");
    }

    #[test]
    fn known_participant_skips_welcome() {
        let clock = Rc::new(ManualClock::default());
        let app = App::new(
            settings(Arc::new(MemorySink::new())),
            Some("p-1".into()),
            clock,
        )
        .unwrap();
        assert_eq!(app.state, AppState::Chat);
    }

    #[test]
    fn esc_on_welcome_quits() {
        let clock = Rc::new(ManualClock::default());
        let mut app = App::new(settings(Arc::new(MemorySink::new())), None, clock).unwrap();
        assert_eq!(app.on_key(&key(KeyCode::Esc)).unwrap(), Control::Quit);
    }
}
