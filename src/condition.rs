use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use include_dir::{include_dir, Dir};
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::script::{Script, ScriptError};

static CONDITION_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/assets/conditions");

/// A scripted variant of the support conversation.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    ValueEnum,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Condition {
    /// Plain text messages.
    #[serde(rename = "none")]
    #[strum(serialize = "none")]
    #[value(name = "none")]
    Plain,
    /// The same conversation with emoji-rich messages.
    Emoji,
}

impl Condition {
    pub const ALL: [Condition; 2] = [Condition::Plain, Condition::Emoji];

    /// Load the bundled script for this condition.
    pub fn script(&self) -> Result<Script, ScriptError> {
        let name = format!("condition_{self}.json");
        let file = CONDITION_DIR
            .get_file(&name)
            .ok_or_else(|| ScriptError::Json(format!("missing bundled script {name}")))?;
        let json = file
            .contents_utf8()
            .ok_or_else(|| ScriptError::Json(format!("{name} is not utf-8")))?;
        Script::from_json(json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionOrderError {
    #[error("unknown condition `{0}`")]
    Unknown(String),
    #[error("condition order is empty")]
    Empty,
    #[error("condition `{0}` appears more than once")]
    Repeated(Condition),
}

/// The sequence of conditions one participant runs through, e.g. `none-emoji`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ConditionOrder(Vec<Condition>);

impl ConditionOrder {
    pub fn new(conditions: Vec<Condition>) -> Result<Self, ConditionOrderError> {
        if conditions.is_empty() {
            return Err(ConditionOrderError::Empty);
        }
        if let Some(dup) = conditions.iter().duplicates().next() {
            return Err(ConditionOrderError::Repeated(*dup));
        }
        Ok(Self(conditions))
    }

    /// Counterbalanced order: every condition once, shuffled.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut conditions = Condition::ALL.to_vec();
        conditions.shuffle(rng);
        Self(conditions)
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }

    pub fn get(&self, idx: usize) -> Option<Condition> {
        self.0.get(idx).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConditionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().join("-"))
    }
}

impl FromStr for ConditionOrder {
    type Err = ConditionOrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let conditions = s
            .split('-')
            .filter(|part| !part.is_empty())
            .map(|part| {
                <Condition as ValueEnum>::from_str(part.trim(), true)
                    .map_err(|_| ConditionOrderError::Unknown(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(conditions)
    }
}

impl From<ConditionOrder> for String {
    fn from(order: ConditionOrder) -> Self {
        order.to_string()
    }
}

impl TryFrom<String> for ConditionOrder {
    type Error = ConditionOrderError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::TurnKind;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn bundled_scripts_load() {
        for condition in Condition::ALL {
            let script = condition.script().unwrap();
            assert!(script.input_turns() > 0);
            assert_eq!(script.iter().last().unwrap().kind, TurnKind::Final);
        }
    }

    #[test]
    fn conditions_share_state_names() {
        let plain: Vec<_> = Condition::Plain
            .script()
            .unwrap()
            .iter()
            .map(|t| t.state.clone())
            .collect();
        let emoji: Vec<_> = Condition::Emoji
            .script()
            .unwrap()
            .iter()
            .map(|t| t.state.clone())
            .collect();
        assert_eq!(plain, emoji);
    }

    #[test]
    fn order_roundtrips_through_text() {
        let order: ConditionOrder = "none-emoji".parse().unwrap();
        assert_eq!(order.conditions(), [Condition::Plain, Condition::Emoji]);
        assert_eq!(order.to_string(), "none-emoji");
        assert_eq!(order.get(1), Some(Condition::Emoji));
        assert_eq!(order.get(2), None);
    }

    #[test]
    fn order_rejects_bad_input() {
        assert_eq!(
            "none-low".parse::<ConditionOrder>(),
            Err(ConditionOrderError::Unknown("low".into()))
        );
        assert_eq!("".parse::<ConditionOrder>(), Err(ConditionOrderError::Empty));
        assert_eq!(
            "emoji-emoji".parse::<ConditionOrder>(),
            Err(ConditionOrderError::Repeated(Condition::Emoji))
        );
    }

    #[test]
    fn random_order_covers_every_condition() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let order = ConditionOrder::random(&mut rng);
            assert_eq!(order.len(), 2);
            assert!(order.conditions().contains(&Condition::Plain));
            assert!(order.conditions().contains(&Condition::Emoji));
        }
    }

    #[test]
    fn order_serializes_as_string() {
        let order: ConditionOrder = "emoji-none".parse().unwrap();
        assert_eq!(serde_json::to_string(&order).unwrap(), "\"emoji-none\"");
        let back: ConditionOrder = serde_json::from_str("\"emoji-none\"").unwrap();
        assert_eq!(back, order);
    }
}
