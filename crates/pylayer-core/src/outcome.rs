use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

impl CommandStatus {
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            CommandStatus::Ok => 0,
            CommandStatus::UserError => 1,
            CommandStatus::Failure => 2,
        }
    }
}

/// `{status, message, details}` envelope emitted under `--json`.
#[must_use]
pub fn to_json_response(command: &str, outcome: &ExecutionOutcome) -> Value {
    json!({
        "command": command,
        "status": outcome.status,
        "code": outcome.exit_code(),
        "message": outcome.message,
        "details": outcome.details,
    })
}
