use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    ConnectionInvalid,
    CredentialsMissing,

    RemoteCommandFailed,
    TaskFailed,

    GitCommandFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::ConnectionInvalid => "connection.invalid",
            ErrorCode::CredentialsMissing => "credentials.missing",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",
            ErrorCode::TaskFailed => "task.failed",

            ErrorCode::GitCommandFailed => "git.command_failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInvalidDetails {
    pub rejected: Vec<String>,
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsMissingDetails {
    pub target: String,
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub handle: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    /// No usable connection remained after filtering the requested names.
    pub fn connection_invalid(rejected: Vec<String>, available: Vec<String>) -> Self {
        let message = if rejected.is_empty() {
            "No connection selected".to_string()
        } else {
            format!("Invalid connection(s): {}", rejected.join(", "))
        };
        let hint = if available.is_empty() {
            "No connections are configured. Add one under 'connections' in .dockhand.json"
                .to_string()
        } else {
            format!("Available connections: {}", available.join(", "))
        };

        Self::new(
            ErrorCode::ConnectionInvalid,
            message,
            to_details(ConnectionInvalidDetails {
                rejected,
                available,
            }),
        )
        .with_hint(hint)
    }

    pub fn credentials_missing(target: impl Into<String>, missing_fields: Vec<String>) -> Self {
        let target = target.into();
        let message = format!(
            "Missing credentials for '{}': {}",
            target,
            missing_fields.join(", ")
        );

        Self::new(
            ErrorCode::CredentialsMissing,
            message,
            to_details(CredentialsMissingDetails {
                target,
                missing_fields,
            }),
        )
        .with_hint("Run 'dockhand credentials set <connection> -- --<field> <value>' to store them")
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        Self::new(
            ErrorCode::RemoteCommandFailed,
            format!("Remote command failed on {}", details.handle),
            to_details(details),
        )
    }

    pub fn task_failed(task: impl Into<String>, handle: impl Into<String>, reason: impl Into<String>) -> Self {
        let task = task.into();
        let handle = handle.into();
        let reason = reason.into();
        let message = format!("Task '{}' failed on {}: {}", task, handle, reason);

        Self::new(
            ErrorCode::TaskFailed,
            message,
            serde_json::json!({
                "task": task,
                "handle": handle,
                "reason": reason,
            }),
        )
    }

    pub fn git_command_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::GitCommandFailed,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigInvalidJsonDetails {
                path: path.into(),
                error: error.into(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem: problem.into(),
            }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalIoError,
            error.clone(),
            to_details(InternalIoErrorDetails { error, context }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalJsonError,
            error.clone(),
            to_details(InternalIoErrorDetails { error, context }),
        )
    }

    pub fn internal_unexpected(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            message,
            Value::Object(serde_json::Map::new()),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_invalid_lists_every_rejected_name() {
        let err = Error::connection_invalid(
            vec!["bogus".to_string(), "other".to_string()],
            vec!["production".to_string()],
        );

        assert_eq!(err.code, ErrorCode::ConnectionInvalid);
        assert_eq!(err.message, "Invalid connection(s): bogus, other");
        assert_eq!(err.details["rejected"][1], "other");
        assert_eq!(err.hints.len(), 1);
    }

    #[test]
    fn credentials_missing_names_fields() {
        let err = Error::credentials_missing("production/0", vec!["host".to_string()]);
        assert_eq!(err.code.as_str(), "credentials.missing");
        assert!(err.message.contains("production/0"));
        assert_eq!(err.details["missingFields"][0], "host");
    }
}
