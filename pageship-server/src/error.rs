//! Error taxonomy for the deployment pipeline.
//!
//! Only [`ValidationError`] and [`PipelineError::Unauthorized`] ever reach an
//! HTTP caller. Everything raised after the acknowledgment is logged by the
//! pipeline and dropped.

/// A malformed or incomplete task request. Carries the first offending field.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("request body must be a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("field `{field}` is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ValidationError {
    /// Name of the field that failed, if the failure is field-specific.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::NotAnObject => None,
            ValidationError::Missing(field)
            | ValidationError::WrongType { field, .. }
            | ValidationError::Invalid { field, .. } => Some(field),
        }
    }
}

/// The artifact generator failed to produce usable source.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generator request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("generator API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("generator returned no content")]
    Empty,
}

/// Failures talking to the source-hosting API.
///
/// Conflict statuses that mean "already in the target state" never show up
/// here; the hosting client reports them as tagged outcomes instead.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("repository {0} not found")]
    RepositoryNotFound(String),
    #[error("{path} already exists in {repo}")]
    FileExists { repo: String, path: String },
    #[error("{path} does not exist in {repo}")]
    FileMissing { repo: String, path: String },
    #[error("stale write to {path} in {repo}: version {sha} was rejected")]
    StaleWrite {
        repo: String,
        path: String,
        sha: String,
    },
    #[error("hosting API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("hosting API request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected hosting API response: {0}")]
    Decode(String),
    #[error("invalid hosting API URL {0}")]
    InvalidApiUrl(String),
}

/// Why a single delivery attempt to the evaluation callback failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("callback responded {status}")]
    Status { status: u16, body: String },
    #[error("callback unreachable: {0}")]
    Transport(String),
}

/// Terminal failure of one pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid secret")]
    Unauthorized,
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Provisioning(#[from] ProvisionError),
    #[error("enabling pages for {repo} failed: {source}")]
    HostingActivation {
        repo: String,
        #[source]
        source: ProvisionError,
    },
}
