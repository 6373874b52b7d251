use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use parley::app::{App, AppSettings, AppState};
use parley::capture::KeyInput;
use parley::clock::ManualClock;
use parley::condition::Condition;
use parley::experiment::{Experiment, KeyOutcome, Phase, Timings};
use parley::machine::StateMachine;
use parley::persistence::{DocumentId, DocumentSink, MemorySink, StoreError};
use parley::script::{Script, Turn, TurnKind};
use parley::transcript::{SessionInfo, SurveyResponse};
use parley::validation::{Rule, RuleSet};
use parley::Error;
use serde_json::Value;

fn abc_script() -> Script {
    Script::new(vec![
        Turn::new("A", TurnKind::Message, "hi"),
        Turn::new("B", TurnKind::Input, "what is 6 + 7?"),
        Turn::new("C", TurnKind::Final, "bye"),
    ])
    .unwrap()
}

fn info() -> SessionInfo {
    SessionInfo {
        participant_id: "p-8".into(),
        condition: Condition::Plain,
        condition_order: "none".parse().unwrap(),
        session_number: 1,
    }
}

#[test]
fn machine_walks_every_state_once_in_order() {
    let script = Condition::Plain.script().unwrap();
    let expected: Vec<String> = script.iter().map(|t| t.state.clone()).collect();
    let mut machine = StateMachine::new(script);
    machine.advance();
    machine.reset();

    let mut visited = vec![machine.current_state().to_string()];
    while let Some(next) = machine.next_state().map(str::to_string) {
        machine.transition(&next).unwrap();
        visited.push(next);
    }
    assert_eq!(visited, expected);
    assert!(machine.is_finished());

    assert!(machine.transition("nowhere").is_err());
    assert_eq!(machine.current_state(), "farewell");
}

#[test]
fn rejected_then_accepted_answer_produces_one_record() {
    let clock = Rc::new(ManualClock::default());
    let rules = RuleSet::new().with("B", Rule::one_of(["13"]), "Incorrect answer.");
    let mut exp = Experiment::new(abc_script(), info(), rules, Timings::default(), clock.clone());

    exp.on_tick();
    clock.advance_ms(500);
    exp.on_tick();
    clock.advance_ms(550);
    exp.on_tick();
    assert_eq!(exp.phase(), Phase::AwaitingInput);
    assert_eq!(exp.current_state(), "B");

    for c in "12".chars() {
        clock.advance_ms(120);
        exp.on_key(KeyInput::Char(c));
    }
    assert_matches!(exp.on_key(KeyInput::Enter), KeyOutcome::Rejected(_));
    assert_eq!(exp.current_state(), "B");
    assert!(exp.logger().responses().is_empty());

    exp.on_key(KeyInput::Backspace);
    clock.advance_ms(120);
    exp.on_key(KeyInput::Char('3'));
    assert_eq!(exp.on_key(KeyInput::Enter), KeyOutcome::Accepted);
    assert_eq!(exp.current_state(), "C");

    clock.advance_ms(500);
    exp.on_tick();
    clock.advance_ms(2000);
    exp.on_tick();
    assert!(exp.is_finished());

    let mut logger = exp.into_logger();
    let responses = logger.responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].user_response, "13");
    assert_eq!(responses[0].keystroke_count, 4);

    let sink = Arc::new(MemorySink::new());
    let survey = SurveyResponse::default();
    logger
        .finalize_session(survey.clone(), sink.clone(), Duration::from_secs(1))
        .unwrap();
    assert_matches!(
        logger.finalize_session(survey, sink.clone(), Duration::from_secs(1)),
        Err(Error::AlreadyFinalized(_))
    );
    assert_eq!(sink.len(), 1);
}

/// Stalls and then fails until opened; once open it stores into the wrapped sink.
struct GatedSink {
    open: AtomicBool,
    inner: MemorySink,
}

impl DocumentSink for GatedSink {
    fn append(&self, collection: &str, document: &Value) -> Result<DocumentId, StoreError> {
        if !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(300));
            return Err(StoreError::Unavailable("too late".into()));
        }
        self.inner.append(collection, document)
    }
}

/// Always stores, but only after a delay longer than the save timeout.
struct LateSink {
    inner: MemorySink,
}

impl DocumentSink for LateSink {
    fn append(&self, collection: &str, document: &Value) -> Result<DocumentId, StoreError> {
        std::thread::sleep(Duration::from_millis(100));
        self.inner.append(collection, document)
    }
}

fn press(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

fn app_with_sink(sink: Arc<dyn DocumentSink>, clock: &Rc<ManualClock>) -> App<Rc<ManualClock>> {
    let settings = AppSettings {
        order: "none".parse().unwrap(),
        start_from: 1,
        timings: Timings::default(),
        rules: RuleSet::new().with("B", Rule::one_of(["13"]), "Incorrect answer."),
        script: Some(abc_script()),
        sink,
        persist_timeout: Duration::from_millis(50),
    };
    App::new(settings, Some("p-9".into()), clock.clone()).unwrap()
}

/// Answer the single question and the survey, then run the first save.
fn finish_and_save(app: &mut App<Rc<ManualClock>>, clock: &Rc<ManualClock>) {
    while !app.experiment().is_some_and(|e| e.input_open()) {
        clock.advance_ms(100);
        app.on_tick();
    }
    app.on_key(&press(KeyCode::Char('1'))).unwrap();
    app.on_key(&press(KeyCode::Char('3'))).unwrap();
    app.on_key(&press(KeyCode::Enter)).unwrap();
    while app.state != AppState::Survey {
        clock.advance_ms(100);
        app.on_tick();
    }

    for _ in 0..7 {
        app.on_key(&press(KeyCode::Down)).unwrap();
    }
    app.on_key(&press(KeyCode::Char('4'))).unwrap();
    app.on_key(&press(KeyCode::Down)).unwrap();
    app.on_key(&press(KeyCode::Char('2'))).unwrap();
    app.on_key(&press(KeyCode::Enter)).unwrap();
    app.on_tick();
}

#[test]
fn save_timeout_offers_retry_and_keeps_transcript() {
    let clock = Rc::new(ManualClock::default());
    let sink = Arc::new(GatedSink {
        open: AtomicBool::new(false),
        inner: MemorySink::new(),
    });
    let mut app = app_with_sink(sink.clone(), &clock);
    finish_and_save(&mut app, &clock);

    assert_eq!(app.state, AppState::SaveFailed);
    assert!(app.notice().unwrap().contains("did not complete"));
    assert!(app.has_unsaved_session());

    // Let the stalled attempt fail for good before retrying.
    sink.open.store(true, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(400));
    app.on_key(&press(KeyCode::Char('r'))).unwrap();
    app.on_tick();
    assert_eq!(app.state, AppState::Complete);
    assert!(!app.has_unsaved_session());

    let docs = sink.inner.documents();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].1["user_responses"][0]["user_response"], "13");
    assert_eq!(docs[0].1["survey_responses"]["transaction_complete"], "no");
}

#[test]
fn retry_after_late_save_stores_one_document() {
    let clock = Rc::new(ManualClock::default());
    let sink = Arc::new(LateSink {
        inner: MemorySink::new(),
    });
    let mut app = app_with_sink(sink.clone(), &clock);
    finish_and_save(&mut app, &clock);
    assert_eq!(app.state, AppState::SaveFailed);

    std::thread::sleep(Duration::from_millis(200));
    app.on_key(&press(KeyCode::Char('r'))).unwrap();
    app.on_tick();

    assert_eq!(app.state, AppState::Complete);
    assert_eq!(sink.inner.len(), 1);
    assert_eq!(app.completed()[0].document_id, "mem-1");
}
