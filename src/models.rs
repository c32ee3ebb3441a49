use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::TASK_SEED_LENGTH;

pub type TaskId = i32;
pub type GroupId = i32;

/// Sentinel id of the tree root. The root is never stored as a record.
pub const ROOT_GROUP: GroupId = 0;

/// A generation seed: either a 16-hex-character literal or `inherit`,
/// which defers to the owning group chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seed {
    Literal(String),
    Inherit,
}

pub fn is_seed_literal(s: &str) -> bool {
    s.len() == TASK_SEED_LENGTH
        && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl Seed {
    pub fn parse(s: &str) -> Option<Seed> {
        if s == "inherit" {
            Some(Seed::Inherit)
        } else if is_seed_literal(s) {
            Some(Seed::Literal(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Seed::Literal(s) => s,
            Seed::Inherit => "inherit",
        }
    }
}

impl Serialize for Seed {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Seed {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Seed::parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "seed must be \"inherit\" or {TASK_SEED_LENGTH} lowercase hex characters, got {raw:?}"
            ))
        })
    }
}

/// One flag checker. Checkers are evaluated in declaration order and the
/// first match wins. Unknown checker types fail deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum FlagSpec {
    String(String),
    Regex(String),
    Program(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub hexid: String,
    pub text: String,
    pub cost: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub text: String,
    pub value: i64,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub flags: Vec<FlagSpec>,
    #[serde(default)]
    pub group: GroupId,
    #[serde(default)]
    pub order: i32,
    pub seed: Seed,
    #[serde(default)]
    pub hints: Vec<Hint>,
}

impl Task {
    pub fn hint(&self, hexid: &str) -> Option<&Hint> {
        self.hints.iter().find(|h| h.hexid == hexid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub parent: GroupId,
    pub seed: Seed,
    #[serde(default)]
    pub generation_config: String,
}

/// A competing team as far as the engine cares: a stable name and the seed
/// its generation tokens are derived from. Issued once, never reissued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub seed: String,
}

/// One row of the append-only submission ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub team: String,
    pub task: TaskId,
    pub flag: String,
    pub correct: bool,
    pub points: i64,
    pub time: DateTime<Utc>,
}

/// One row of the append-only hint purchase ledger. Presence of a row is
/// the capability "this team has this hint".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintPurchase {
    pub team: String,
    pub task: TaskId,
    pub hexid: String,
    pub cost: i64,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_parses_literal_and_inherit() {
        assert_eq!(
            Seed::parse("0123456789abcdef"),
            Some(Seed::Literal("0123456789abcdef".into()))
        );
        assert_eq!(Seed::parse("inherit"), Some(Seed::Inherit));
        assert_eq!(Seed::parse("0123456789ABCDEF"), None);
        assert_eq!(Seed::parse("abcd"), None);
        assert_eq!(Seed::parse(""), None);
    }

    #[test]
    fn seed_round_trips_through_json() {
        let literal: Seed = serde_json::from_str("\"00ff00ff00ff00ff\"").unwrap();
        assert_eq!(literal, Seed::Literal("00ff00ff00ff00ff".into()));
        assert_eq!(
            serde_json::to_string(&literal).unwrap(),
            "\"00ff00ff00ff00ff\""
        );

        let inherit: Seed = serde_json::from_str("\"inherit\"").unwrap();
        assert_eq!(inherit, Seed::Inherit);

        assert!(serde_json::from_str::<Seed>("\"not-a-seed\"").is_err());
    }

    #[test]
    fn flag_spec_uses_type_and_data_fields() {
        let spec: FlagSpec =
            serde_json::from_str(r#"{"type":"string","data":"FLAG{x}"}"#).unwrap();
        assert_eq!(spec, FlagSpec::String("FLAG{x}".into()));

        let spec: FlagSpec = serde_json::from_str(r#"{"type":"regex","data":"F.*"}"#).unwrap();
        assert_eq!(spec, FlagSpec::Regex("F.*".into()));

        assert!(serde_json::from_str::<FlagSpec>(r#"{"type":"magic","data":"x"}"#).is_err());
    }
}
