use std::fmt::Display;

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

/// Wire value of the `session` field that asks the engine for a fresh session.
pub const NEW_SESSION: &str = "new";

/// Function invoked when a request does not name one.
pub const DEFAULT_FUNCTION: &str = "run";

/// Session binding of a single run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionRef {
    /// Create a session; the engine returns its id in `RunResponse::session_id`.
    New,
    /// Continue a session created by an earlier run.
    Existing(String),
}

impl SessionRef {
    pub fn existing(id: impl Into<String>) -> Self {
        Self::Existing(id.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::New => NEW_SESSION,
            Self::Existing(id) => id,
        }
    }
}

impl From<&str> for SessionRef {
    fn from(value: &str) -> Self {
        if value == NEW_SESSION {
            Self::New
        } else {
            Self::Existing(value.to_string())
        }
    }
}

impl From<String> for SessionRef {
    fn from(value: String) -> Self {
        if value == NEW_SESSION {
            Self::New
        } else {
            Self::Existing(value)
        }
    }
}

impl Display for SessionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SessionRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SessionRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        if value.is_empty() {
            return Err(serde::de::Error::custom("session must not be empty"));
        }
        Ok(Self::from(value))
    }
}

impl JsonSchema for SessionRef {
    fn schema_name() -> String {
        "SessionRef".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        String::json_schema(generator)
    }
}

/// Request envelope handed to the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunRequest {
    pub app: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionRef>,
}

impl RunRequest {
    pub fn new(app: impl Into<String>, input: Value) -> Self {
        Self {
            app: app.into(),
            function: None,
            input,
            session: None,
        }
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    pub fn with_session(mut self, session: impl Into<SessionRef>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// The function this request targets, falling back to [`DEFAULT_FUNCTION`].
    pub fn function_name(&self) -> &str {
        self.function.as_deref().unwrap_or(DEFAULT_FUNCTION)
    }
}

/// Lifecycle status reported for a task.
///
/// Values the client does not know are preserved verbatim in `Unknown` and
/// serialized back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Received,
    Queued,
    Scheduled,
    Preparing,
    Serving,
    SettingUp,
    Running,
    Uploading,
    Completed,
    Failed,
    Cancelled,
    Unknown(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Received => "RECEIVED",
            Self::Queued => "QUEUED",
            Self::Scheduled => "SCHEDULED",
            Self::Preparing => "PREPARING",
            Self::Serving => "SERVING",
            Self::SettingUp => "SETTING_UP",
            Self::Running => "RUNNING",
            Self::Uploading => "UPLOADING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "RECEIVED" => Self::Received,
            "QUEUED" => Self::Queued,
            "SCHEDULED" => Self::Scheduled,
            "PREPARING" => Self::Preparing,
            "SERVING" => Self::Serving,
            "SETTING_UP" => Self::SettingUp,
            "RUNNING" => Self::Running,
            "UPLOADING" => Self::Uploading,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}

impl JsonSchema for TaskStatus {
    fn schema_name() -> String {
        "TaskStatus".to_string()
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        String::json_schema(generator)
    }
}

/// Result envelope returned by the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Fields the engine sends that this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RunResponse {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Looks up `key` in the output object.
    pub fn output_field(&self, key: &str) -> Option<&Value> {
        self.output.as_ref().and_then(|output| output.get(key))
    }
}
