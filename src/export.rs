use std::io::Write;

use clap::ValueEnum;
use itertools::Itertools;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::Result;
use crate::persistence::{SqliteStore, SESSIONS_COLLECTION};
use crate::transcript::{SessionTranscript, SurveyResponse};

pub const BASE_COLUMNS: [&str; 11] = [
    "participant_id",
    "condition_order",
    "test_condition",
    "session_number",
    "question_number",
    "question_state",
    "bot_prompt",
    "time_to_first_keystroke_ms",
    "total_input_duration_ms",
    "keystroke_sequence",
    "submitted_answer",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

/// Column names: the per-turn columns, then one `survey_*` column per item.
pub fn header() -> Vec<String> {
    BASE_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(
            SurveyResponse::default()
                .fields()
                .into_iter()
                .map(|(field, _)| format!("survey_{field}")),
        )
        .collect()
}

fn ms(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.0}")).unwrap_or_default()
}

/// Flatten sessions into rows aligned with [`header`].
pub fn rows(sessions: &[SessionTranscript]) -> Vec<Vec<String>> {
    let survey_width = SurveyResponse::default().fields().len();
    let mut out = Vec::new();

    for session in sessions {
        let info = &session.info;
        let lead = [
            info.participant_id.clone(),
            info.condition_order.to_string(),
            info.condition.to_string(),
            info.session_number.to_string(),
        ];

        for (n, response) in session.user_responses.iter().enumerate() {
            let mut row = lead.to_vec();
            row.extend([
                (n + 1).to_string(),
                response.state.clone(),
                response.bot_prompt.clone().unwrap_or_default(),
                ms(response.timing.time_to_first_keystroke_ms),
                ms(response.timing.input_latency_ms),
                response.keystroke_sequence.iter().map(|k| &k.key).join("-"),
                response.user_response.clone(),
            ]);
            row.extend(std::iter::repeat(String::new()).take(survey_width));
            out.push(row);
        }

        if let Some(survey) = &session.survey_responses {
            let mut row = lead.to_vec();
            row.extend([
                "SURVEY".to_string(),
                "post_survey".to_string(),
                "Post-Experiment Survey".to_string(),
                String::new(),
                String::new(),
                String::new(),
                String::new(),
            ]);
            row.extend(survey.fields().into_iter().map(|(_, v)| v));
            out.push(row);
        }
    }
    out
}

pub fn write_csv<W: Write>(sessions: &[SessionTranscript], writer: W) -> Result<usize> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(header())?;
    let rows = rows(sessions);
    for row in &rows {
        csv.write_record(row)?;
    }
    csv.flush()?;
    Ok(rows.len())
}

/// One JSON object per row, keyed by column name.
pub fn write_json<W: Write>(sessions: &[SessionTranscript], writer: W) -> Result<usize> {
    let header = header();
    let records: Vec<Value> = rows(sessions)
        .into_iter()
        .map(|row| {
            Value::Object(
                header
                    .iter()
                    .cloned()
                    .zip(row.into_iter().map(Value::String))
                    .collect::<Map<_, _>>(),
            )
        })
        .collect();
    serde_json::to_writer_pretty(writer, &records)?;
    Ok(records.len())
}

pub fn write<W: Write>(
    format: ExportFormat,
    sessions: &[SessionTranscript],
    writer: W,
) -> Result<usize> {
    match format {
        ExportFormat::Csv => write_csv(sessions, writer),
        ExportFormat::Json => write_json(sessions, writer),
    }
}

/// Every stored session transcript, oldest first. Undecodable documents are skipped.
pub fn load_sessions(store: &SqliteStore) -> Result<Vec<SessionTranscript>> {
    let documents = store.documents(SESSIONS_COLLECTION)?;
    let total = documents.len();
    let sessions: Vec<SessionTranscript> = documents
        .into_iter()
        .enumerate()
        .filter_map(|(i, doc)| match serde_json::from_value(doc) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(index = i, error = %e, "skipping malformed session document");
                None
            }
        })
        .collect();
    info!(loaded = sessions.len(), total, "sessions loaded for export");
    Ok(sessions)
}
