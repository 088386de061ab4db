//! Inbound task requests and their validation.
//!
//! The HTTP layer decides the round (build vs revise) and hands it to
//! [`validate`]; callers never get to choose it.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Longest repository name the hosting provider accepts.
const MAX_REPO_NAME: usize = 100;

/// Pipeline round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Round {
    Build,
    Revise,
}

impl Round {
    pub fn number(self) -> u8 {
        match self {
            Round::Build => 1,
            Round::Revise => 2,
        }
    }
}

impl std::fmt::Display for Round {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Round::Build => write!(f, "build"),
            Round::Revise => write!(f, "revise"),
        }
    }
}

/// An auxiliary input shipped with the request, usually a `data:` URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

impl Attachment {
    /// Decode a base64 `data:` URI payload. `None` for anything else.
    pub fn decode_data_uri(&self) -> Option<Vec<u8>> {
        use base64::Engine;
        let rest = self.url.strip_prefix("data:")?;
        let (meta, data) = rest.split_once(',')?;
        if !meta.ends_with(";base64") {
            return None;
        }
        base64::engine::general_purpose::STANDARD
            .decode(data.trim())
            .ok()
    }

    /// Relative path to publish this attachment under, if the name is safe.
    pub fn publish_path(&self) -> Option<String> {
        let trimmed = self.name.trim().trim_start_matches('/');
        if trimmed.is_empty()
            || trimmed
                .split('/')
                .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return None;
        }
        Some(trimmed.to_string())
    }
}

/// A validated task request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub email: String,
    pub secret: String,
    pub task: String,
    pub nonce: String,
    pub brief: String,
    pub checks: Vec<String>,
    pub evaluation_url: String,
    pub attachments: Vec<Attachment>,
    pub round: Round,
}

impl TaskRequest {
    /// Repository name this task deploys to.
    pub fn repo_name(&self) -> String {
        repo_name(&self.task)
    }
}

/// Derive the repository name for a task.
///
/// Pure and deterministic: `app-` prefix, lowercased, anything outside
/// `[a-z0-9-_]` replaced by `-`, truncated to the provider limit.
pub fn repo_name(task: &str) -> String {
    format!("app-{task}")
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .take(MAX_REPO_NAME)
        .collect()
}

/// Check a raw request payload and build a [`TaskRequest`] for `round`.
///
/// Required strings: `email`, `secret`, `task`, `nonce`, `brief`,
/// `evaluation_url`. `checks` and `attachments` default to empty.
pub fn validate(raw: &Value, round: Round) -> Result<TaskRequest, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let email = required_str(obj, "email")?;
    let secret = required_str(obj, "secret")?;
    let task = required_str(obj, "task")?;
    let nonce = required_str(obj, "nonce")?;
    let brief = required_str(obj, "brief")?;
    let evaluation_url = required_str(obj, "evaluation_url")?;

    match url::Url::parse(evaluation_url.trim()) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
        Ok(u) => {
            return Err(ValidationError::Invalid {
                field: "evaluation_url",
                reason: format!("unsupported scheme `{}`", u.scheme()),
            });
        }
        Err(e) => {
            return Err(ValidationError::Invalid {
                field: "evaluation_url",
                reason: e.to_string(),
            });
        }
    }

    let checks = match obj.get("checks") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or(ValidationError::WrongType {
                field: "checks",
                expected: "an array of strings",
            })?,
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "checks",
                expected: "an array of strings",
            });
        }
    };

    let attachments = match obj.get("attachments") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(attachment)
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ValidationError::WrongType {
                field: "attachments",
                expected: "an array of {name, url} objects",
            });
        }
    };

    Ok(TaskRequest {
        email,
        secret,
        task,
        nonce,
        brief,
        checks,
        evaluation_url: evaluation_url.trim().to_string(),
        attachments,
        round,
    })
}

fn required_str(obj: &Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::Missing(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::Missing(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::WrongType {
            field,
            expected: "a string",
        }),
    }
}

fn attachment(v: &Value) -> Result<Attachment, ValidationError> {
    let wrong = ValidationError::WrongType {
        field: "attachments",
        expected: "an array of {name, url} objects",
    };
    let obj = v.as_object().ok_or_else(|| wrong.clone())?;
    match (obj.get("name"), obj.get("url")) {
        (Some(Value::String(name)), Some(Value::String(url))) => Ok(Attachment {
            name: name.clone(),
            url: url.clone(),
        }),
        _ => Err(wrong),
    }
}
