/// Core error type shared by the bot crates.
///
/// Adapter crates map their specific failures into this type so callers can
/// tell a misconfiguration apart from a remote refusal or a flaky network.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid configuration (bot token, unknown bot name, ...).
    /// Never retried.
    #[error("config error: {0}")]
    Config(String),

    /// The Bot API answered with `ok: false`. Not transient, never retried.
    #[error("{method} rejected by remote api ({}): {description}", .code.map(|c| c.to_string()).unwrap_or_else(|| "no code".to_string()))]
    RemoteRejected {
        method: String,
        code: Option<i64>,
        description: String,
    },

    /// Connection, timeout or HTTP-status failure that outlived every attempt.
    #[error("{method} failed after {attempts} attempt(s): {last_error}")]
    TransportExhausted {
        method: String,
        attempts: u32,
        last_error: String,
    },

    /// Admission denied. An expected condition, not a system fault.
    #[error("rate limit exceeded ({scope})")]
    RateLimited { scope: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// True for failures worth retrying later from the caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransportExhausted { .. } | Error::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_rejection_message_includes_code() {
        let e = Error::RemoteRejected {
            method: "sendMessage".to_string(),
            code: Some(400),
            description: "Bad Request: chat not found".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "sendMessage rejected by remote api (400): Bad Request: chat not found"
        );
        assert!(!e.is_transient());
    }

    #[test]
    fn exhausted_is_transient() {
        let e = Error::TransportExhausted {
            method: "getMe".to_string(),
            attempts: 3,
            last_error: "timed out".to_string(),
        };
        assert!(e.is_transient());
        assert!(e.to_string().contains("3 attempt(s)"));
    }
}
