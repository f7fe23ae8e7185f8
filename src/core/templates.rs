//! Named command templates.
//!
//! Commands are loaded from a JSON document mapping command names to payload
//! trees. Every integer `-1` inside a payload is a timestamp placeholder,
//! replaced with the Unix time of "now" when the command is resolved.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::fs;

use crate::core::bluetooth::TIMESTAMP_SENTINEL;
use crate::error::{SessionError, SessionResult};
use crate::logging::ActivityLog;

/// Field reported when the document itself is not valid JSON.
pub const DOCUMENT_FIELD: &str = "<document>";
/// Field reported when the document is valid JSON but not an object.
pub const ROOT_FIELD: &str = "<root>";

/// A command payload tree. Object keys keep their source order.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandValue {
    Null,
    Bool(bool),
    Integer(i64),
    /// Integers above `i64::MAX`
    Unsigned(u64),
    Float(f64),
    String(String),
    Array(Vec<CommandValue>),
    Object(Vec<(String, CommandValue)>),
}

impl CommandValue {
    /// Replaces every timestamp placeholder with `now`. `self` is left untouched.
    pub fn resolve(&self, now: DateTime<Utc>) -> CommandValue {
        let timestamp = now.timestamp();
        self.substitute(timestamp)
    }

    fn substitute(&self, timestamp: i64) -> CommandValue {
        match self {
            Self::Integer(TIMESTAMP_SENTINEL) => Self::Integer(timestamp),
            Self::Array(items) => Self::Array(items.iter().map(|v| v.substitute(timestamp)).collect()),
            Self::Object(fields) => Self::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.substitute(timestamp)))
                    .collect(),
            ),
            Self::Null
            | Self::Bool(_)
            | Self::Integer(_)
            | Self::Unsigned(_)
            | Self::Float(_)
            | Self::String(_) => self.clone(),
        }
    }

    /// Number of timestamp placeholders in the tree.
    pub fn placeholder_count(&self) -> usize {
        match self {
            Self::Integer(TIMESTAMP_SENTINEL) => 1,
            Self::Array(items) => items.iter().map(Self::placeholder_count).sum(),
            Self::Object(fields) => fields.iter().map(|(_, v)| v.placeholder_count()).sum(),
            Self::Null
            | Self::Bool(_)
            | Self::Integer(_)
            | Self::Unsigned(_)
            | Self::Float(_)
            | Self::String(_) => 0,
        }
    }

    /// Compact JSON text as sent on the wire.
    pub fn to_json(&self) -> String {
        serde_json::Value::from(self).to_string()
    }
}

impl From<serde_json::Value> for CommandValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Self::Unsigned(u)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&CommandValue> for serde_json::Value {
    fn from(value: &CommandValue) -> Self {
        use serde_json::{Map, Number, Value};
        match value {
            CommandValue::Null => Value::Null,
            CommandValue::Bool(b) => Value::Bool(*b),
            CommandValue::Integer(i) => Value::Number((*i).into()),
            CommandValue::Unsigned(u) => Value::Number((*u).into()),
            CommandValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            CommandValue::String(s) => Value::String(s.clone()),
            CommandValue::Array(items) => Value::Array(items.iter().map(Value::from).collect()),
            CommandValue::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

impl Serialize for CommandValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Unsigned(u) => serializer.serialize_u64(*u),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for CommandValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(CommandValue::from)
    }
}

pub type CommandSet = BTreeMap<String, CommandValue>;

/// Parses a command definition document.
pub fn parse_commands(source: &str) -> SessionResult<CommandSet> {
    let document: serde_json::Value =
        serde_json::from_str(source).map_err(|e| SessionError::MalformedSource {
            field: DOCUMENT_FIELD.to_string(),
            message: format!("invalid JSON at line {} column {}", e.line(), e.column()),
        })?;

    let serde_json::Value::Object(entries) = document else {
        return Err(SessionError::MalformedSource {
            field: ROOT_FIELD.to_string(),
            message: "expected an object mapping command names to payloads".to_string(),
        });
    };

    let mut commands = CommandSet::new();
    for (name, payload) in entries {
        if name.trim().is_empty() {
            return Err(SessionError::MalformedSource {
                field: name,
                message: "command name is empty".to_string(),
            });
        }
        if !payload.is_object() {
            return Err(SessionError::MalformedSource {
                field: name,
                message: "command payload must be an object".to_string(),
            });
        }
        commands.insert(name, CommandValue::from(payload));
    }
    Ok(commands)
}

/// Command file status as exposed to the surrounding application
#[derive(Debug, Clone, Serialize)]
pub struct CommandFileStatus {
    pub found: bool,
    pub path: PathBuf,
    pub last_modified: Option<DateTime<Utc>>,
    pub names: Vec<String>,
}

#[derive(Debug, Default)]
struct LibraryState {
    commands: CommandSet,
    loaded_modified: Option<DateTime<Utc>>,
}

/// The loaded command set, backed by a file that may come and go.
#[derive(Debug)]
pub struct CommandLibrary {
    path: PathBuf,
    state: RwLock<LibraryState>,
    activity: Arc<ActivityLog>,
}

impl CommandLibrary {
    pub fn new(path: impl Into<PathBuf>, activity: Arc<ActivityLog>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(LibraryState::default()),
            activity,
        }
    }

    async fn modified_time(&self) -> Option<DateTime<Utc>> {
        let metadata = fs::metadata(&self.path).await.ok()?;
        metadata.modified().ok().map(DateTime::<Utc>::from)
    }

    /// (Re)reads the command file and returns the number of commands.
    ///
    /// A missing file yields an empty set. A malformed file also yields an
    /// empty set, and the error names the field that failed.
    pub async fn load(&self) -> SessionResult<usize> {
        let modified = self.modified_time().await;
        let parsed = match fs::read_to_string(&self.path).await {
            Ok(source) => parse_commands(&source),
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    warn!("Command file not found at {:?}, no commands loaded", self.path);
                } else {
                    warn!("Failed to read command file {:?}: {}", self.path, e);
                }
                Ok(CommandSet::new())
            }
        };

        let (commands, result) = match parsed {
            Ok(commands) => {
                let count = commands.len();
                (commands, Ok(count))
            }
            Err(e) => {
                self.activity
                    .warning(format!("Command file ignored: {}", e), None);
                (CommandSet::new(), Err(e))
            }
        };

        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.commands = commands;
            state.loaded_modified = modified;
        }
        if let Ok(count) = result {
            info!("Loaded {} commands from {:?}", count, self.path);
        }
        result
    }

    /// Reloads the file and reports `(old_count, new_count)`.
    pub async fn reload(&self) -> SessionResult<(usize, usize)> {
        let old_count = self.len();
        let new_count = self.load().await?;
        self.activity.info(
            format!("Commands reloaded ({} -> {})", old_count, new_count),
            None,
        );
        Ok((old_count, new_count))
    }

    /// Reloads if the file's modification time changed since the last load.
    pub async fn refresh_if_modified(&self) -> SessionResult<bool> {
        let current = self.modified_time().await;
        let loaded = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .loaded_modified;
        if current == loaded {
            return Ok(false);
        }
        self.reload().await?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .keys()
            .cloned()
            .collect()
    }

    pub fn templates(&self) -> CommandSet {
        self.state.read().unwrap_or_else(PoisonError::into_inner).commands.clone()
    }

    pub fn get(&self, name: &str) -> SessionResult<CommandValue> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .commands
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::UnknownCommand(name.to_string()))
    }

    pub fn resolve_named(&self, name: &str, now: DateTime<Utc>) -> SessionResult<CommandValue> {
        Ok(self.get(name)?.resolve(now))
    }

    pub async fn status(&self) -> CommandFileStatus {
        let last_modified = self.modified_time().await;
        CommandFileStatus {
            found: last_modified.is_some() || self.path.exists(),
            path: self.path.clone(),
            last_modified,
            names: self.names(),
        }
    }
}
