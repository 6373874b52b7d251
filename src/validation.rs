use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

static NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").expect("valid regex"));

/// Acceptance predicate for an input turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// Trimmed input must equal one of `accepted`.
    OneOf {
        accepted: Vec<String>,
        #[serde(default)]
        case_insensitive: bool,
    },
    /// Case-insensitive phrase match, tolerating trailing periods.
    Phrase { phrase: String },
    /// Exactly `count` ASCII digits.
    Digits { count: usize },
    Email,
    /// At least `min` words, not purely numeric.
    MinWords {
        min: usize,
        #[serde(default)]
        require_letters: bool,
    },
    /// At least two characters, some letters, not purely numeric.
    Name,
}

fn strip_trailing_periods(s: &str) -> &str {
    s.trim_end_matches('.')
}

fn has_letters(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_alphabetic())
}

fn is_only_digits(s: &str) -> bool {
    NUMERIC.is_match(s)
}

impl Rule {
    pub fn one_of<I, S>(accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Rule::OneOf {
            accepted: accepted.into_iter().map(Into::into).collect(),
            case_insensitive: false,
        }
    }

    pub fn one_of_ignore_case<I, S>(accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Rule::OneOf {
            accepted: accepted.into_iter().map(Into::into).collect(),
            case_insensitive: true,
        }
    }

    pub fn phrase(phrase: impl Into<String>) -> Self {
        Rule::Phrase {
            phrase: phrase.into(),
        }
    }

    /// Whether already-trimmed `input` satisfies the rule.
    pub fn accepts(&self, input: &str) -> bool {
        match self {
            Rule::OneOf {
                accepted,
                case_insensitive,
            } => accepted.iter().any(|a| {
                if *case_insensitive {
                    a.eq_ignore_ascii_case(input)
                } else {
                    a == input
                }
            }),
            Rule::Phrase { phrase } => {
                strip_trailing_periods(input).to_lowercase()
                    == strip_trailing_periods(phrase).to_lowercase()
            }
            Rule::Digits { count } => {
                input.chars().count() == *count && input.chars().all(|c| c.is_ascii_digit())
            }
            Rule::Email => EMAIL.is_match(input),
            Rule::MinWords {
                min,
                require_letters,
            } => {
                let words = input.split_whitespace().count();
                let squashed: String = input.split_whitespace().collect();
                words >= *min
                    && !is_only_digits(&squashed)
                    && (!require_letters || has_letters(input))
            }
            Rule::Name => {
                input.chars().count() >= 2 && has_letters(input) && !is_only_digits(input)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    pub rule: Rule,
    pub message: String,
}

impl Validator {
    pub fn new(rule: Rule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{reason}")]
pub struct ValidationFailure {
    pub state: String,
    pub input: String,
    pub reason: String,
}

/// Per-state validators. States without an entry accept any non-blank input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    rules: HashMap<String, Validator>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        state: impl Into<String>,
        rule: Rule,
        message: impl Into<String>,
    ) -> Self {
        self.insert(state, Validator::new(rule, message));
        self
    }

    pub fn insert(&mut self, state: impl Into<String>, validator: Validator) {
        self.rules.insert(state.into(), validator);
    }

    pub fn get(&self, state: &str) -> Option<&Validator> {
        self.rules.get(state)
    }

    pub fn check(&self, state: &str, input: &str) -> Result<(), ValidationFailure> {
        let Some(validator) = self.rules.get(state) else {
            return Ok(());
        };

        if validator.rule.accepts(input.trim()) {
            Ok(())
        } else {
            Err(ValidationFailure {
                state: state.to_string(),
                input: input.to_string(),
                reason: validator.message.clone(),
            })
        }
    }

    /// The acceptance table used by the banking support scripts.
    pub fn banking() -> Self {
        const CODE: &str = "Incorrect security code. Please try again.";
        const ANSWER: &str = "Incorrect answer. Please try again.";
        const PHRASE: &str = "Incorrect phrase. Please type the exact phrase shown above.";
        const NAME: &str = "Please enter a valid name.";

        Self::new()
            .with("greeting", Rule::one_of(["X9J2P", "x9j2p"]), CODE)
            .with("welcome", Rule::one_of(["A4W9C", "a4w9c"]), CODE)
            .with(
                "phone_verification",
                Rule::Digits { count: 4 },
                "Please enter exactly 4 digits.",
            )
            .with("math_verification", Rule::one_of(["13"]), ANSWER)
            .with(
                "secret_question",
                Rule::one_of(["Paris", "paris", "PARIS"]),
                ANSWER,
            )
            .with(
                "protocol_authorization",
                Rule::phrase("i authorize this investigation"),
                PHRASE,
            )
            .with(
                "timeout",
                Rule::one_of(["Continue", "continue", "CONTINUE"]),
                "Please type 'Continue' to reconnect.",
            )
            .with("result", Rule::phrase("i approve this request"), PHRASE)
            .with(
                "identification",
                Rule::Email,
                "Please enter a valid email address.",
            )
            .with(
                "issue_identification",
                Rule::MinWords {
                    min: 3,
                    require_letters: false,
                },
                "Please provide a detailed description (at least 3 words).",
            )
            .with(
                "issue_categorization",
                Rule::MinWords {
                    min: 2,
                    require_letters: false,
                },
                "Please provide a brief description (at least 2 words).",
            )
            .with("recipient_name", Rule::Name, NAME)
            .with("recipient", Rule::Name, NAME)
            .with(
                "relationship_declaration",
                Rule::MinWords {
                    min: 5,
                    require_letters: true,
                },
                "Please provide a complete sentence describing your relationship and reason (at least 5 words).",
            )
    }
}

/// Hint shown in the empty input box.
pub fn placeholder(state: &str) -> &'static str {
    match state {
        "amount_confirmation" => "Enter amount...",
        "greeting" | "welcome" => "Type the security code...",
        "identification" => "Enter your email...",
        "phone_verification" => "Last 4 digits...",
        "math_verification" | "secret_question" => "Type your answer...",
        "protocol_authorization" => "Type the exact phrase...",
        "timeout" => "Type 'Continue' to reconnect",
        "result" => "Type 'I approve this request' to confirm",
        "issue_identification" => "Briefly describe the issue...",
        "recipient_name" => "Recipient name...",
        "relationship_declaration" => "Describe relationship and reason...",
        "service_feedback" => "Any other questions?",
        _ => "Type here...",
    }
}
