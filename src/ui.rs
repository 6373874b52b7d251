use std::time::Duration;

use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, Widget, Wrap},
};
use time_humanize::{Accuracy, HumanTime, Tense};
use unicode_width::UnicodeWidthStr;

use crate::app::{App, AppState};
use crate::clock::Clock;
use crate::experiment::{Experiment, Phase, Speaker};
use crate::survey::{QuestionKind, SurveyForm, LIKERT_MAX, LIKERT_MIN};
use crate::util::fmt_ms;
use crate::validation::placeholder;

const HORIZONTAL_MARGIN: u16 = 2;
const VERTICAL_MARGIN: u16 = 1;
const TITLE: &str = "SafeBank Support";

impl<C: Clock + Clone> Widget for &App<C> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match self.state {
            AppState::Welcome => render_welcome(self.name_input(), area, buf),
            AppState::Chat => {
                if let Some(experiment) = self.experiment() {
                    render_chat(experiment, session_label(self).as_deref(), area, buf);
                }
            }
            AppState::Survey => render_survey(
                self.survey(),
                self.notice(),
                session_label(self).as_deref(),
                area,
                buf,
            ),
            AppState::Saving => centered_message(
                vec![Line::from(Span::styled(
                    "Saving your responses...",
                    Style::default().add_modifier(Modifier::BOLD | Modifier::ITALIC),
                ))],
                area,
                buf,
            ),
            AppState::SaveFailed => render_save_failed(self.notice(), area, buf),
            AppState::Complete => render_complete(self, area, buf),
        }
    }
}

fn session_label<C: Clock + Clone>(app: &App<C>) -> Option<String> {
    let info = app.current_session()?;
    Some(format!(
        "Session {} of {}",
        info.session_number,
        info.condition_order.len()
    ))
}

fn bold() -> Style {
    Style::default().add_modifier(Modifier::BOLD)
}

fn dim() -> Style {
    Style::default().add_modifier(Modifier::DIM)
}

fn centered_message(lines: Vec<Line>, area: Rect, buf: &mut Buffer) {
    let height = lines.len() as u16;
    let top = area.height.saturating_sub(height) / 2;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Length(top),
            Constraint::Length(height),
            Constraint::Min(0),
        ])
        .split(area);
    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .render(chunks[1], buf);
}

fn render_welcome(name: &str, area: Rect, buf: &mut Buffer) {
    centered_message(
        vec![
            Line::from(Span::styled(format!("Welcome to {TITLE}"), bold().fg(Color::Cyan))),
            Line::default(),
            Line::from("You will chat with a banking assistant, then answer a short survey."),
            Line::default(),
            Line::from(vec![
                Span::raw("Participant ID: "),
                Span::styled(name.to_string(), bold()),
                Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
            ]),
            Line::default(),
            Line::from(Span::styled(
                "(enter) start  (esc) quit",
                dim().add_modifier(Modifier::ITALIC),
            )),
        ],
        area,
        buf,
    );
}

/// Rows a line of `text` occupies when wrapped to `width` columns.
fn wrapped_height(text: &str, width: u16) -> u16 {
    let width = width.max(1) as usize;
    text.lines()
        .map(|l| l.width().max(1).div_ceil(width) as u16)
        .sum::<u16>()
        .max(1)
}

fn render_chat<C: Clock>(
    experiment: &Experiment<C>,
    label: Option<&str>,
    area: Rect,
    buf: &mut Buffer,
) {
    let input_height = if experiment.error().is_some() { 4 } else { 3 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(input_height),
        ])
        .split(area);

    let header = Line::from(vec![
        Span::styled(TITLE, bold().fg(Color::Cyan)),
        Span::styled(label.map(|l| format!("  {l}")).unwrap_or_default(), dim()),
    ]);
    Paragraph::new(header).render(chunks[0], buf);

    let history = chunks[1];
    let text_width = history.width.saturating_sub(2);
    let mut lines: Vec<Line> = Vec::new();
    let mut height = 0u16;
    for line in experiment.chat() {
        let (who, style, alignment) = match line.speaker {
            Speaker::Bot => ("Bank", Style::default().fg(Color::Cyan), Alignment::Left),
            Speaker::Participant => ("You", Style::default().fg(Color::Green), Alignment::Right),
        };
        lines.push(
            Line::from(Span::styled(who, style.add_modifier(Modifier::BOLD))).alignment(alignment),
        );
        for text in line.text.lines() {
            lines.push(Line::from(Span::styled(text.to_string(), style)).alignment(alignment));
        }
        lines.push(Line::default());
        height += 2 + wrapped_height(&line.text, text_width);
    }
    if matches!(experiment.phase(), Phase::Revealing { .. } | Phase::Waiting { .. }) {
        lines.push(Line::from(Span::styled(
            "Bank is typing...",
            dim().add_modifier(Modifier::ITALIC),
        )));
        height += 1;
    }

    let visible = history.height.saturating_sub(2);
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL))
        .wrap(Wrap { trim: false })
        .scroll((height.saturating_sub(visible), 0))
        .render(history, buf);

    let state = experiment.current_state();
    let mut input_lines = vec![match experiment.draft() {
        Some(draft) if !draft.is_empty() => Line::from(vec![
            Span::styled(draft.to_string(), bold()),
            Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
        ]),
        Some(_) => Line::from(Span::styled(
            placeholder(state),
            dim().add_modifier(Modifier::ITALIC),
        )),
        None => Line::from(Span::styled("...", dim())),
    }];
    if let Some(error) = experiment.error() {
        input_lines.push(Line::from(Span::styled(error.to_string(), bold().fg(Color::Red))));
    }
    let border = if experiment.input_open() {
        Style::default().fg(Color::Green)
    } else {
        dim()
    };
    Paragraph::new(input_lines)
        .block(Block::default().borders(Borders::ALL).border_style(border))
        .render(chunks[2], buf);
}

fn render_survey(
    form: &SurveyForm,
    notice: Option<&str>,
    label: Option<&str>,
    area: Rect,
    buf: &mut Buffer,
) {
    let mut lines = vec![
        Line::from(vec![
            Span::styled("Post-Experiment Survey", bold().fg(Color::Cyan)),
            Span::styled(label.map(|l| format!("  {l}")).unwrap_or_default(), dim()),
        ]),
        Line::from(Span::styled(
            "Please answer the following questions about the chatbot you just used.",
            dim(),
        )),
    ];

    let mut section = "";
    for (idx, question) in form.questions().iter().enumerate() {
        if question.section != section {
            section = question.section;
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                section,
                bold().add_modifier(Modifier::UNDERLINED),
            )));
        }
        let selected = idx == form.cursor();
        let marker = if selected { "> " } else { "  " };
        let label_style = if selected { bold().fg(Color::Yellow) } else { Style::default() };
        lines.push(Line::from(vec![
            Span::styled(marker, label_style),
            Span::styled(question.label, label_style),
        ]));

        let answer = match question.kind {
            QuestionKind::Likert { low, high } => {
                let value = form.answer_label(idx);
                let scale = (LIKERT_MIN..=LIKERT_MAX)
                    .map(|n| {
                        let n = n.to_string();
                        let style = if n == value { bold().fg(Color::Green) } else { dim() };
                        Span::styled(format!(" {n} "), style)
                    })
                    .collect::<Vec<_>>();
                let mut spans = vec![Span::styled(format!("    {low} "), dim())];
                spans.extend(scale);
                spans.push(Span::styled(format!(" {high}"), dim()));
                Line::from(spans)
            }
            kind => {
                let chosen = form.answer_label(idx);
                let spans = SurveyForm::options(kind)
                    .into_iter()
                    .enumerate()
                    .map(|(i, option)| {
                        let style = if option == chosen { bold().fg(Color::Green) } else { dim() };
                        Span::styled(format!("    ({}) {option}", i + 1), style)
                    })
                    .collect::<Vec<_>>();
                Line::from(spans)
            }
        };
        lines.push(answer);
    }

    lines.push(Line::default());
    if let Some(notice) = notice {
        lines.push(Line::from(Span::styled(notice.to_string(), bold().fg(Color::Red))));
    }
    lines.push(Line::from(Span::styled(
        "(up/down) question  (left/right or 1-7) answer  (enter) submit",
        dim().add_modifier(Modifier::ITALIC),
    )));

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([Constraint::Min(0)])
        .split(area);
    Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .render(chunks[0], buf);
}

fn render_save_failed(notice: Option<&str>, area: Rect, buf: &mut Buffer) {
    centered_message(
        vec![
            Line::from(Span::styled("Your responses could not be saved.", bold().fg(Color::Red))),
            Line::from(notice.unwrap_or_default().to_string()),
            Line::default(),
            Line::from(Span::styled(
                "(r) retry  (esc) quit without saving",
                dim().add_modifier(Modifier::ITALIC),
            )),
        ],
        area,
        buf,
    );
}

fn render_complete<C: Clock + Clone>(app: &App<C>, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(3),
            Constraint::Length(2),
        ])
        .split(area);

    Paragraph::new(vec![
        Line::from(Span::styled("Thank you for participating!", bold().fg(Color::Green))),
        Line::from(
            app.study()
                .map(|s| format!("Participant {}", s.participant_id()))
                .unwrap_or_default(),
        ),
    ])
    .alignment(Alignment::Center)
    .render(chunks[0], buf);

    let rows = app.completed().iter().map(|done| {
        let duration = HumanTime::from(Duration::from_millis(done.duration_ms.max(0.0) as u64))
            .to_text_en(Accuracy::Rough, Tense::Present);
        Row::new(vec![
            Cell::from(done.info.session_number.to_string()),
            Cell::from(done.summary.turns.to_string()),
            Cell::from(done.summary.keystrokes.to_string()),
            Cell::from(fmt_ms(done.summary.mean_first_keystroke_ms)),
            Cell::from(fmt_ms(done.summary.median_first_keystroke_ms)),
            Cell::from(duration),
        ])
    });
    Table::new(
        rows,
        [
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(12),
            Constraint::Length(15),
            Constraint::Length(15),
            Constraint::Min(10),
        ],
    )
    .header(
        Row::new(vec![
            "session",
            "answers",
            "keystrokes",
            "mean 1st key",
            "median 1st key",
            "duration",
        ])
        .style(bold()),
    )
    .block(Block::default().borders(Borders::ALL))
    .render(chunks[1], buf);

    let mut footer = Vec::new();
    if let Some(notice) = app.notice() {
        footer.push(Line::from(Span::styled(notice.to_string(), Style::default().fg(Color::Red))));
    }
    footer.push(Line::from(Span::styled("(q) quit", dim().add_modifier(Modifier::ITALIC))));
    Paragraph::new(footer)
        .alignment(Alignment::Center)
        .render(chunks[2], buf);
}
