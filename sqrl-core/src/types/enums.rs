//! Closed sum types for the memory data model (§3, §9 "tagged variants").
//!
//! Every enum here has an explicit lowercase wire representation via
//! `Display`/`FromStr`, so serde (de)serialization and any hand-rolled JSON
//! parsing in the IPC layer reject unknown values instead of silently
//! coercing them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a memory applies to every project (`global`) or one (`project`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Project,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Global => "global",
            Scope::Project => "project",
        })
    }
}

impl FromStr for Scope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Scope::Global),
            "project" => Ok(Scope::Project),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// Who a memory's `owner_id` identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    User,
    Team,
    Org,
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OwnerType::User => "user",
            OwnerType::Team => "team",
            OwnerType::Org => "org",
        })
    }
}

impl FromStr for OwnerType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(OwnerType::User),
            "team" => Ok(OwnerType::Team),
            "org" => Ok(OwnerType::Org),
            other => Err(format!("unknown owner_type: {other}")),
        }
    }
}

/// What kind of behavioral rule a memory asserts. Drives both the CR-Memory
/// policy lookup (§4.C) and the retrieval kind boost (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Preference,
    Invariant,
    Pattern,
    Guard,
    Note,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryKind::Preference => "preference",
            MemoryKind::Invariant => "invariant",
            MemoryKind::Pattern => "pattern",
            MemoryKind::Guard => "guard",
            MemoryKind::Note => "note",
        })
    }
}

impl FromStr for MemoryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(MemoryKind::Preference),
            "invariant" => Ok(MemoryKind::Invariant),
            "pattern" => Ok(MemoryKind::Pattern),
            "guard" => Ok(MemoryKind::Guard),
            "note" => Ok(MemoryKind::Note),
            other => Err(format!("unknown memory kind: {other}")),
        }
    }
}

/// Lifetime bucket for a memory. Governs default TTL and the retrieval tier
/// boost (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    LongTerm,
    Emergency,
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::LongTerm => "long_term",
            MemoryTier::Emergency => "emergency",
        })
    }
}

impl FromStr for MemoryTier {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" => Ok(MemoryTier::ShortTerm),
            "long_term" => Ok(MemoryTier::LongTerm),
            "emergency" => Ok(MemoryTier::Emergency),
            other => Err(format!("unknown memory tier: {other}")),
        }
    }
}

/// Three-stage lifecycle (§3 Lifecycle, §8 monotonicity invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Provisional,
    Active,
    Deprecated,
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MemoryStatus::Provisional => "provisional",
            MemoryStatus::Active => "active",
            MemoryStatus::Deprecated => "deprecated",
        })
    }
}

impl FromStr for MemoryStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provisional" => Ok(MemoryStatus::Provisional),
            "active" => Ok(MemoryStatus::Active),
            "deprecated" => Ok(MemoryStatus::Deprecated),
            other => Err(format!("unknown memory status: {other}")),
        }
    }
}

/// `-1` ("do not do X") or `+1` ("do X"). Modeled as an enum rather than a
/// bare integer so invalid polarities are rejected at the parse boundary.
/// Wire representation is the `i8` itself (§3 pins the domain to
/// `{-1, +1}`), not the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Polarity {
    Negative = -1,
    Positive = 1,
}

impl Polarity {
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    pub fn from_i8(v: i8) -> Option<Self> {
        match v {
            -1 => Some(Polarity::Negative),
            1 => Some(Polarity::Positive),
            _ => None,
        }
    }
}

impl From<Polarity> for i8 {
    fn from(value: Polarity) -> Self {
        value.as_i8()
    }
}

impl TryFrom<i8> for Polarity {
    type Error = String;

    fn try_from(value: i8) -> std::result::Result<Self, Self::Error> {
        Polarity::from_i8(value).ok_or_else(|| format!("invalid polarity: {value}"))
    }
}

/// Why an evidence row exists (§3 Evidence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    FailureThenSuccess,
    UserCorrection,
    ExplicitStatement,
    RepeatedPattern,
}

impl fmt::Display for EvidenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvidenceSource::FailureThenSuccess => "failure_then_success",
            EvidenceSource::UserCorrection => "user_correction",
            EvidenceSource::ExplicitStatement => "explicit_statement",
            EvidenceSource::RepeatedPattern => "repeated_pattern",
        })
    }
}

impl FromStr for EvidenceSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "failure_then_success" => Ok(EvidenceSource::FailureThenSuccess),
            "user_correction" => Ok(EvidenceSource::UserCorrection),
            "explicit_statement" => Ok(EvidenceSource::ExplicitStatement),
            "repeated_pattern" => Ok(EvidenceSource::RepeatedPattern),
            other => Err(format!("unknown evidence source: {other}")),
        }
    }
}

/// User frustration level detected in an episode (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frustration {
    None,
    Mild,
    Moderate,
    Severe,
}

impl fmt::Display for Frustration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frustration::None => "none",
            Frustration::Mild => "mild",
            Frustration::Moderate => "moderate",
            Frustration::Severe => "severe",
        })
    }
}

impl FromStr for Frustration {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Frustration::None),
            "mild" => Ok(Frustration::Mild),
            "moderate" => Ok(Frustration::Moderate),
            "severe" => Ok(Frustration::Severe),
            other => Err(format!("unknown frustration level: {other}")),
        }
    }
}

/// Speaker of a normalized session event (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        })
    }
}

impl FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Shape of a normalized session event (§4.F).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    ToolCall,
    ToolResult,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Message => "message",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
        })
    }
}

impl FromStr for EventKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(EventKind::Message),
            "tool_call" => Ok(EventKind::ToolCall),
            "tool_result" => Ok(EventKind::ToolResult),
            other => Err(format!("unknown event kind: {other}")),
        }
    }
}

/// The kind of `MemoryOp` an extractor emitted (§4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    Add,
    Update,
    Deprecate,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpType::Add => "add",
            OpType::Update => "update",
            OpType::Deprecate => "deprecate",
        })
    }
}

impl FromStr for OpType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(OpType::Add),
            "update" => Ok(OpType::Update),
            "deprecate" => Ok(OpType::Deprecate),
            other => Err(format!("unknown op type: {other}")),
        }
    }
}

/// Outcome of a single CR-Memory evaluation (§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalResult {
    NoChange,
    Promote,
    Deprecate,
}

impl fmt::Display for EvalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EvalResult::NoChange => "no_change",
            EvalResult::Promote => "promote",
            EvalResult::Deprecate => "deprecate",
        })
    }
}

impl FromStr for EvalResult {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_change" => Ok(EvalResult::NoChange),
            "promote" => Ok(EvalResult::Promote),
            "deprecate" => Ok(EvalResult::Deprecate),
            other => Err(format!("unknown eval result: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        assert_eq!(MemoryKind::from_str("guard").unwrap(), MemoryKind::Guard);
        assert_eq!(MemoryKind::Guard.to_string(), "guard");
        assert_eq!(MemoryTier::from_str("long_term").unwrap(), MemoryTier::LongTerm);
        assert_eq!(EvalResult::from_str("no_change").unwrap(), EvalResult::NoChange);
    }

    #[test]
    fn rejects_unknown_variants() {
        assert!(MemoryKind::from_str("bogus").is_err());
        assert!(Role::from_str("narrator").is_err());
    }

    #[test]
    fn polarity_round_trips() {
        assert_eq!(Polarity::from_i8(-1), Some(Polarity::Negative));
        assert_eq!(Polarity::from_i8(1), Some(Polarity::Positive));
        assert_eq!(Polarity::from_i8(0), None);
        assert_eq!(Polarity::Negative.as_i8(), -1);
    }
}
