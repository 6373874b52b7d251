use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, error, info};

use crate::capture::Submission;
use crate::clock::{Clock, Millis};
use crate::error::{Error, Result};
use crate::persistence::{DocumentId, DocumentSink, PendingAppend, SESSIONS_COLLECTION};
use crate::transcript::{
    EventKind, SessionEvent, SessionInfo, SessionTranscript, SurveyResponse, TurnResponse,
};
use crate::validation::ValidationFailure;

#[derive(Debug, Clone)]
struct PendingPrompt {
    state: String,
    text: String,
    shown_at: Millis,
}

/// Collects the timing record of one session and saves it once at the end.
pub struct InteractionLogger<C: Clock> {
    clock: C,
    info: SessionInfo,
    started_mono: Millis,
    started_wall: DateTime<Utc>,
    prompt: Option<PendingPrompt>,
    responses: Vec<TurnResponse>,
    events: Vec<SessionEvent>,
    saved_as: Option<DocumentId>,
    in_flight: Option<PendingAppend>,
}

impl<C: Clock> InteractionLogger<C> {
    pub fn new(info: SessionInfo, clock: C) -> Self {
        let started_mono = clock.now();
        let started_wall = clock.wall();
        info!(
            participant = %info.participant_id,
            condition = %info.condition,
            session = info.session_number,
            "session started"
        );
        Self {
            clock,
            info,
            started_mono,
            started_wall,
            prompt: None,
            responses: Vec::new(),
            events: Vec::new(),
            saved_as: None,
            in_flight: None,
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn now(&self) -> Millis {
        self.clock.now()
    }

    /// Milliseconds since the session started.
    pub fn elapsed_ms(&self) -> Millis {
        self.clock.now() - self.started_mono
    }

    pub fn responses(&self) -> &[TurnResponse] {
        &self.responses
    }

    pub fn events(&self) -> &[SessionEvent] {
        &self.events
    }

    pub fn pending_prompt(&self) -> Option<(&str, &str)> {
        self.prompt
            .as_ref()
            .map(|p| (p.state.as_str(), p.text.as_str()))
    }

    pub fn is_saved(&self) -> bool {
        self.saved_as.is_some()
    }

    pub fn saved_as(&self) -> Option<&DocumentId> {
        self.saved_as.as_ref()
    }

    fn push_event(&mut self, state: &str, kind: EventKind, payload: serde_json::Value) {
        let timestamp = self.clock.now();
        self.events.push(SessionEvent {
            state: state.to_string(),
            event_type: kind,
            timestamp,
            time_since_session_start: timestamp - self.started_mono,
            payload,
        });
    }

    /// Remember the bot prompt awaiting an answer, replacing any unanswered one.
    pub fn record_prompt(&mut self, state: &str, text: &str) {
        if let Some(stale) = &self.prompt {
            debug!(state = %stale.state, "replacing unanswered prompt");
        }
        self.prompt = Some(PendingPrompt {
            state: state.to_string(),
            text: text.to_string(),
            shown_at: self.clock.now(),
        });
    }

    pub fn record_message(&mut self, state: &str, text: &str) {
        self.push_event(state, EventKind::MessageRender, json!({ "message": text }));
    }

    pub fn record_input_available(&mut self, state: &str) -> Millis {
        let at = self.clock.now();
        self.push_event(state, EventKind::InputAvailable, json!({ "timestamp": at }));
        at
    }

    pub fn record_validation_failure(&mut self, failure: &ValidationFailure, attempt: &Submission) {
        info!(state = %failure.state, reason = %failure.reason, "validation failed");
        self.push_event(
            &failure.state,
            EventKind::ValidationError,
            json!({
                "value": failure.input,
                "error": failure.reason,
                "keystroke_count": attempt.keystroke_count(),
                "keystrokes": attempt.keystrokes,
            }),
        );
    }

    /// Turn an accepted submission into a [`TurnResponse`] and append it.
    ///
    /// Without a preceding [`record_prompt`](Self::record_prompt) the prompt
    /// fields are left empty.
    pub fn record_response(&mut self, state: &str, submission: Submission) -> &TurnResponse {
        let prompt = self.prompt.take().map(|p| (p.text, p.shown_at));
        let mut response = TurnResponse::new(prompt, submission);
        response.state = state.to_string();

        let timing = response.timing;
        info!(
            state,
            keystrokes = response.keystroke_count,
            input_latency_ms = ?timing.input_latency_ms,
            time_to_first_keystroke_ms = ?timing.time_to_first_keystroke_ms,
            typing_duration_ms = ?timing.typing_duration_ms,
            "response submitted"
        );
        self.push_event(
            state,
            EventKind::ResponseSubmitted,
            json!({
                "response": response.user_response,
                "keystroke_count": response.keystroke_count,
            }),
        );

        self.responses.push(response);
        &self.responses[self.responses.len() - 1]
    }

    /// The transcript as it stands, without survey or completion time.
    pub fn transcript(&self) -> SessionTranscript {
        SessionTranscript {
            info: self.info.clone(),
            session_start: self.started_wall,
            completed_at: None,
            session_duration_ms: None,
            user_responses: self.responses.clone(),
            survey_responses: None,
            events: self.events.clone(),
        }
    }

    /// Assemble the full transcript and append it to `sink`.
    ///
    /// On failure nothing is marked saved and the call may be retried. A save
    /// that timed out is awaited again on retry instead of being appended a
    /// second time. After a successful save every further call fails with
    /// [`Error::AlreadyFinalized`] without touching the sink.
    pub fn finalize_session(
        &mut self,
        survey: SurveyResponse,
        sink: Arc<dyn DocumentSink>,
        timeout: Duration,
    ) -> Result<DocumentId> {
        if let Some(id) = &self.saved_as {
            return Err(Error::AlreadyFinalized(id.clone()));
        }

        let pending = match self.in_flight.take() {
            Some(earlier) => match earlier.wait(timeout) {
                Ok(id) => return Ok(self.mark_saved(id)),
                Err(e @ Error::PersistenceTimeout(_)) => {
                    error!(error = %e, "earlier save still in flight");
                    self.in_flight = Some(earlier);
                    return Err(e);
                }
                Err(e) => {
                    debug!(error = %e, "earlier save did not land, appending again");
                    self.spawn_save(survey, sink)?
                }
            },
            None => self.spawn_save(survey, sink)?,
        };

        match pending.wait(timeout) {
            Ok(id) => Ok(self.mark_saved(id)),
            Err(e) => {
                error!(error = %e, "failed to save session");
                if matches!(e, Error::PersistenceTimeout(_)) {
                    self.in_flight = Some(pending);
                }
                Err(e)
            }
        }
    }

    fn spawn_save(
        &self,
        survey: SurveyResponse,
        sink: Arc<dyn DocumentSink>,
    ) -> Result<PendingAppend> {
        let mut transcript = self.transcript();
        transcript.completed_at = Some(self.clock.wall());
        transcript.session_duration_ms = Some(self.elapsed_ms());
        transcript.survey_responses = Some(survey);
        let document = serde_json::to_value(&transcript)?;
        Ok(PendingAppend::spawn(sink, SESSIONS_COLLECTION, document))
    }

    fn mark_saved(&mut self, id: DocumentId) -> DocumentId {
        info!(%id, responses = self.responses.len(), "session saved");
        self.saved_as = Some(id.clone());
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{InputCapture, KeyInput};
    use crate::clock::ManualClock;
    use crate::condition::{Condition, ConditionOrder};
    use crate::persistence::{MemorySink, StoreError};
    use assert_matches::assert_matches;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info() -> SessionInfo {
        SessionInfo {
            participant_id: "p-17".into(),
            condition: Condition::Emoji,
            condition_order: "emoji-none".parse::<ConditionOrder>().unwrap(),
            session_number: 1,
        }
    }

    fn typed(state: &str, text: &str, clock: &ManualClock) -> Submission {
        let mut capture = InputCapture::new(state, Some(clock.now()));
        for c in text.chars() {
            clock.advance_ms(90);
            capture.apply(&KeyInput::Char(c), clock.now());
        }
        clock.advance_ms(200);
        capture.into_submission(clock.now())
    }

    #[test]
    fn response_pairs_with_prompt() {
        let clock = Rc::new(ManualClock::default());
        let mut logger = InteractionLogger::new(info(), clock.clone());

        logger.record_prompt("math_verification", "6 + 7 = ?");
        clock.advance_ms(550);
        let submission = typed("math_verification", "13", &clock);
        let r = logger.record_response("math_verification", submission);

        assert_eq!(r.bot_prompt.as_deref(), Some("6 + 7 = ?"));
        assert_eq!(r.prompt_shown_at, Some(0.0));
        assert_eq!(r.user_response, "13");
        assert_eq!(r.keystroke_count, 2);
        assert!(logger.pending_prompt().is_none());
        assert_eq!(logger.responses().len(), 1);
    }

    #[test]
    fn response_without_prompt_is_not_an_error() {
        let clock = Rc::new(ManualClock::default());
        let mut logger = InteractionLogger::new(info(), clock.clone());
        let r = logger.record_response("free", typed("free", "hi", &clock));
        assert!(r.bot_prompt.is_none());
        assert!(r.prompt_shown_at.is_none());
    }

    #[test]
    fn newer_prompt_overwrites_unanswered_one() {
        let clock = Rc::new(ManualClock::default());
        let mut logger = InteractionLogger::new(info(), clock.clone());
        logger.record_prompt("a", "first");
        logger.record_prompt("b", "second");
        assert_eq!(logger.pending_prompt(), Some(("b", "second")));
    }

    #[test]
    fn validation_failures_are_events_only() {
        let clock = Rc::new(ManualClock::default());
        let mut logger = InteractionLogger::new(info(), clock.clone());
        let attempt = typed("math_verification", "12", &clock);
        let failure = ValidationFailure {
            state: "math_verification".into(),
            input: "12".into(),
            reason: "Incorrect answer. Please try again.".into(),
        };
        logger.record_validation_failure(&failure, &attempt);

        assert!(logger.responses().is_empty());
        assert_eq!(logger.events().len(), 1);
        assert_eq!(logger.events()[0].event_type, EventKind::ValidationError);
        assert_eq!(logger.events()[0].payload["keystroke_count"], 2);
    }

    #[test]
    fn finalize_packages_responses_and_survey() {
        let clock = Rc::new(ManualClock::default());
        let mut logger = InteractionLogger::new(info(), clock.clone());
        for (state, text) in [("a", "one"), ("b", "two"), ("c", "three")] {
            logger.record_prompt(state, "?");
            let submission = typed(state, text, &clock);
            logger.record_response(state, submission);
        }
        clock.advance_ms(1000);

        let sink = Arc::new(MemorySink::new());
        let survey = SurveyResponse {
            competent: 6,
            ..Default::default()
        };
        let id = logger
            .finalize_session(survey.clone(), sink.clone(), Duration::from_secs(10))
            .unwrap();
        assert_eq!(id, "mem-1");
        assert!(logger.is_saved());

        let docs = sink.documents();
        assert_eq!(docs.len(), 1);
        let saved: SessionTranscript = serde_json::from_value(docs[0].1.clone()).unwrap();
        let answers: Vec<_> = saved
            .user_responses
            .iter()
            .map(|r| r.user_response.as_str())
            .collect();
        assert_eq!(answers, ["one", "two", "three"]);
        assert_eq!(saved.survey_responses, Some(survey));
        assert_eq!(saved.info.participant_id, "p-17");
        assert!(saved.completed_at.is_some());
        assert!(saved.session_duration_ms.unwrap() > 1000.0);
        assert_eq!(docs[0].1["condition_order"], "emoji-none");
    }

    #[test]
    fn finalize_twice_does_not_duplicate() {
        let clock = Rc::new(ManualClock::default());
        let mut logger = InteractionLogger::new(info(), clock);
        let sink = Arc::new(MemorySink::new());
        logger
            .finalize_session(SurveyResponse::default(), sink.clone(), Duration::from_secs(1))
            .unwrap();
        let err = logger
            .finalize_session(SurveyResponse::default(), sink.clone(), Duration::from_secs(1))
            .unwrap_err();
        assert_matches!(err, Error::AlreadyFinalized(id) if id == "mem-1");
        assert_eq!(sink.len(), 1);
    }

    struct FlakySink {
        calls: AtomicUsize,
        inner: MemorySink,
    }

    impl DocumentSink for FlakySink {
        fn append(
            &self,
            collection: &str,
            document: &serde_json::Value,
        ) -> std::result::Result<DocumentId, StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Unavailable("first call fails".into()))
            } else {
                self.inner.append(collection, document)
            }
        }
    }

    #[test]
    fn failed_save_keeps_transcript_for_retry() {
        let clock = Rc::new(ManualClock::default());
        let mut logger = InteractionLogger::new(info(), clock.clone());
        logger.record_response("a", typed("a", "kept", &clock));

        let sink = Arc::new(FlakySink {
            calls: AtomicUsize::new(0),
            inner: MemorySink::new(),
        });
        let err = logger
            .finalize_session(SurveyResponse::default(), sink.clone(), Duration::from_secs(1))
            .unwrap_err();
        assert_matches!(err, Error::Store(_));
        assert!(!logger.is_saved());
        assert_eq!(logger.responses().len(), 1);

        logger
            .finalize_session(SurveyResponse::default(), sink.clone(), Duration::from_secs(1))
            .unwrap();
        assert!(logger.is_saved());
        assert_eq!(sink.inner.len(), 1);
    }

    /// Appends after a delay, so the first wait gives up before it lands.
    struct LateSink {
        delay: Duration,
        inner: MemorySink,
    }

    impl DocumentSink for LateSink {
        fn append(
            &self,
            collection: &str,
            document: &serde_json::Value,
        ) -> std::result::Result<DocumentId, StoreError> {
            std::thread::sleep(self.delay);
            self.inner.append(collection, document)
        }
    }

    #[test]
    fn retry_after_timeout_adopts_late_write() {
        let clock = Rc::new(ManualClock::default());
        let mut logger = InteractionLogger::new(info(), clock.clone());
        logger.record_response("a", typed("a", "once", &clock));

        let sink = Arc::new(LateSink {
            delay: Duration::from_millis(100),
            inner: MemorySink::new(),
        });
        let err = logger
            .finalize_session(SurveyResponse::default(), sink.clone(), Duration::from_millis(20))
            .unwrap_err();
        assert_matches!(err, Error::PersistenceTimeout(_));
        assert!(!logger.is_saved());

        std::thread::sleep(Duration::from_millis(200));
        let id = logger
            .finalize_session(SurveyResponse::default(), sink.clone(), Duration::from_millis(20))
            .unwrap();
        assert_eq!(id, "mem-1");
        assert!(logger.is_saved());
        assert_eq!(sink.inner.len(), 1);

        let again = logger.finalize_session(
            SurveyResponse::default(),
            sink.clone(),
            Duration::from_secs(1),
        );
        assert_matches!(again, Err(Error::AlreadyFinalized(_)));
        assert_eq!(sink.inner.len(), 1);
    }

    #[test]
    fn retry_while_still_in_flight_keeps_waiting() {
        let clock = Rc::new(ManualClock::default());
        let mut logger = InteractionLogger::new(info(), clock);
        let sink = Arc::new(LateSink {
            delay: Duration::from_millis(150),
            inner: MemorySink::new(),
        });

        for _ in 0..2 {
            assert_matches!(
                logger.finalize_session(
                    SurveyResponse::default(),
                    sink.clone(),
                    Duration::from_millis(10)
                ),
                Err(Error::PersistenceTimeout(_))
            );
        }
        logger
            .finalize_session(SurveyResponse::default(), sink.clone(), Duration::from_secs(5))
            .unwrap();
        assert_eq!(sink.inner.len(), 1);
    }
}
