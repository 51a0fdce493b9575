//! Failure taxonomy shared by the gateway, generator, store and orchestrator

use serde::Serialize;
use thiserror::Error;

/// Every failure the orchestrator can surface to a caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    /// Deadline exceeded while waiting on the proxy.
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The relational store rejected or failed the query. Proxy fields are kept verbatim.
    #[error("{message}")]
    Upstream {
        message: String,
        details: Option<String>,
        code: Option<String>,
    },

    /// Network-level failure before a proxy answer was received.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No language-model credential is configured.
    #[error("language model credential is not configured")]
    GenerationUnavailable,

    /// The language-model service failed.
    #[error("language model failure: {0}")]
    Generation(String),

    /// Local persistence failure.
    #[error("storage failure: {0}")]
    Storage(String),

    /// Backup payload rejected before anything was written.
    #[error("invalid backup format: {0}")]
    InvalidBackupFormat(String),

    /// A newer submission replaced this one before it finished.
    #[error("superseded by a newer submission")]
    Superseded,
}

/// Stable tag for each failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Upstream,
    Transport,
    GenerationUnavailable,
    Generation,
    Storage,
    InvalidBackupFormat,
    Superseded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Upstream => "upstream",
            ErrorKind::Transport => "transport",
            ErrorKind::GenerationUnavailable => "generation_unavailable",
            ErrorKind::Generation => "generation",
            ErrorKind::Storage => "storage",
            ErrorKind::InvalidBackupFormat => "invalid_backup_format",
            ErrorKind::Superseded => "superseded",
        }
    }
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QueryError::Timeout(_) => ErrorKind::Timeout,
            QueryError::Upstream { .. } => ErrorKind::Upstream,
            QueryError::Transport(_) => ErrorKind::Transport,
            QueryError::GenerationUnavailable => ErrorKind::GenerationUnavailable,
            QueryError::Generation(_) => ErrorKind::Generation,
            QueryError::Storage(_) => ErrorKind::Storage,
            QueryError::InvalidBackupFormat(_) => ErrorKind::InvalidBackupFormat,
            QueryError::Superseded => ErrorKind::Superseded,
        }
    }

    /// Short user-facing string; each class points at a different remediation.
    pub fn diagnostic(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Timeout => "Request timed out. Check the network or firewall.",
            ErrorKind::Upstream => "The server/store rejected the query.",
            ErrorKind::Transport => "Network unreachable. The query proxy could not be contacted.",
            ErrorKind::GenerationUnavailable | ErrorKind::Generation => "AI service unavailable.",
            ErrorKind::Storage => "Local storage problem. Retry the save.",
            ErrorKind::InvalidBackupFormat => "Invalid backup file. Pick a valid backup.",
            ErrorKind::Superseded => "Replaced by a newer request.",
        }
    }

    /// Engine-provided code, when the proxy reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            QueryError::Upstream { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Diagnostic plus the original message, for display next to a failed query.
    pub fn display_message(&self) -> String {
        match self {
            QueryError::Upstream { message, details, code } => {
                let mut text = format!("{} {}", self.diagnostic(), message);
                if let Some(details) = details.as_deref().filter(|d| *d != message) {
                    text.push_str(&format!(": {}", details));
                }
                if let Some(code) = code {
                    text.push_str(&format!(" [{}]", code));
                }
                text
            }
            other => format!("{} ({})", other.diagnostic(), other),
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(err: rusqlite::Error) -> Self {
        QueryError::Storage(err.to_string())
    }
}

impl From<r2d2::Error> for QueryError {
    fn from(err: r2d2::Error) -> Self {
        QueryError::Storage(format!("connection pool: {}", err))
    }
}

pub type QueryResult<T> = Result<T, QueryError>;

/// Serializable view of a failure for API bodies and stored outcomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    /// Short diagnostic naming the remediation.
    pub error: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&QueryError> for ErrorReport {
    fn from(err: &QueryError) -> Self {
        let (message, details) = match err {
            QueryError::Upstream { message, details, .. } => (message.clone(), details.clone()),
            other => (other.to_string(), None),
        };
        Self {
            error: err.diagnostic(),
            kind: err.kind(),
            message,
            details,
            code: err.code().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_failure_class_has_distinct_diagnostic() {
        let errors = [
            QueryError::Timeout(50),
            QueryError::Upstream { message: "Database Error".into(), details: None, code: None },
            QueryError::Transport("connection refused".into()),
            QueryError::GenerationUnavailable,
            QueryError::Storage("disk full".into()),
            QueryError::InvalidBackupFormat("missing fields".into()),
        ];
        let mut seen: Vec<&str> = errors.iter().map(|e| e.diagnostic()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), errors.len());
    }

    #[test]
    fn test_upstream_display_keeps_proxy_fields() {
        let err = QueryError::Upstream {
            message: "Database Error".into(),
            details: Some("Invalid object name 'outm_2613'.".into()),
            code: Some("EREQUEST".into()),
        };
        let text = err.display_message();
        assert!(text.contains("Database Error"));
        assert!(text.contains("Invalid object name 'outm_2613'."));
        assert!(text.contains("[EREQUEST]"));
        assert_eq!(err.code(), Some("EREQUEST"));
    }

    #[test]
    fn test_report_serializes_kind_and_code() {
        let err = QueryError::Upstream {
            message: "Database Error".into(),
            details: None,
            code: Some("ELOGIN".into()),
        };
        let json = serde_json::to_value(ErrorReport::from(&err)).unwrap();
        assert_eq!(json["kind"], "upstream");
        assert_eq!(json["code"], "ELOGIN");
        assert_eq!(json["message"], "Database Error");
        assert!(json.get("details").is_none());

        let json = serde_json::to_value(ErrorReport::from(&QueryError::Timeout(50))).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert!(json.get("code").is_none());
    }

    #[test]
    fn test_rusqlite_error_becomes_storage() {
        let err: QueryError = rusqlite::Error::QueryReturnedNoRows.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
