use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{ActorRef, LedgerError, Result, ScopeId};
use crate::ident::EntityId;

/// Well-known event sources.
pub mod source {
    /// Audit events written by the ledger itself.
    pub const LEDGER: &str = "ledger";
    pub const POLL: &str = "poll";
    pub const TMUX_APPLY: &str = "tmux-apply";
    pub const DEPLOY_GLUE: &str = "deploy-glue";
    pub const WORKBENCH: &str = "workbench";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(AuditAction::Create),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            other => Err(LedgerError::InvalidArgument(format!("unknown audit action '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            other => Err(LedgerError::InvalidArgument(format!("unknown level '{}'", other))),
        }
    }
}

/// Before/after values of one field touched by an update.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldChange {
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl FieldChange {
    pub fn new(
        field_name: impl Into<String>,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            old_value: non_empty(old_value.into()),
            new_value: non_empty(new_value.into()),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// One observed mutation. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEventRecord {
    pub id: EntityId,
    pub scope_id: Option<ScopeId>,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Option<ActorRef>,
    pub source: String,
    pub version: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: AuditAction,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Set by the store on insert; `None` on records not yet persisted.
    pub created_at: Option<DateTime<Utc>>,
}

/// One system-level occurrence. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationalEventRecord {
    pub id: EntityId,
    pub scope_id: Option<ScopeId>,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Option<ActorRef>,
    pub source: String,
    pub version: String,
    pub level: Level,
    pub message: String,
    /// Compact JSON object, or `""` when the event carried no payload.
    pub data_json: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl OperationalEventRecord {
    /// Decode the payload. An empty payload decodes to an empty map.
    pub fn data(&self) -> Result<BTreeMap<String, String>> {
        if self.data_json.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&self.data_json)?)
    }
}

/// Encode a payload; empty maps encode to `""`.
pub fn encode_data(data: &BTreeMap<String, String>) -> Result<String> {
    if data.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_json::to_string(data)?)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditEventFilters {
    pub scope_id: Option<ScopeId>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub actor_id: Option<ActorRef>,
    pub action: Option<AuditAction>,
    pub source: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationalEventFilters {
    pub scope_id: Option<ScopeId>,
    pub actor_id: Option<ActorRef>,
    pub source: Option<String>,
    pub level: Option<Level>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_and_level_parse() {
        assert_eq!("update".parse::<AuditAction>().unwrap(), AuditAction::Update);
        assert!("rename".parse::<AuditAction>().is_err());
        assert_eq!("warn".parse::<Level>().unwrap(), Level::Warn);
        assert!("WARN".parse::<Level>().is_err());
        assert!(Level::Debug < Level::Error);
    }

    #[test]
    fn test_encode_data() {
        assert_eq!(encode_data(&BTreeMap::new()).unwrap(), "");

        let mut data = BTreeMap::new();
        data.insert("session".to_string(), "orc-7".to_string());
        data.insert("bench".to_string(), "BENCH-014".to_string());
        assert_eq!(
            encode_data(&data).unwrap(),
            r#"{"bench":"BENCH-014","session":"orc-7"}"#
        );
    }

    #[test]
    fn test_field_change_drops_empty_values() {
        let change = FieldChange::new("status", "", "active");
        assert_eq!(change.old_value, None);
        assert_eq!(change.new_value.as_deref(), Some("active"));
    }
}
