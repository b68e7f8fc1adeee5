//! Transport error shared by the API client and the blob store client

/// Error from a single HTTP exchange.
///
/// Carries just enough information to decide whether the request may be
/// retried and whether the failure is a credential problem.
#[derive(Debug)]
pub enum HttpError {
    /// HTTP error with optional status code (`None` = no response received)
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Connect or request timeout elapsed
    Timeout(String),
    /// Local I/O error (e.g. reading an upload body)
    Io(std::io::Error),
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<std::io::Error> for HttpError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl HttpError {
    /// Create an error from a reqwest error
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout(e.to_string());
        }
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    /// Create an error from a non-success status and response body
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status: Some(status),
            message: body.into(),
        }
    }

    /// HTTP status code, if a response was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => *status,
            _ => None,
        }
    }

    /// 401/403: credentials are missing, invalid or expired
    pub fn is_auth(&self) -> bool {
        matches!(self.status_code(), Some(401 | 403))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // No status = connection refused/reset before a response
            Self::Http { status: None, .. } => true,
            Self::Http {
                status: Some(s), ..
            } => matches!(s, 408 | 429 | 500..=599),
            Self::Timeout(_) => true,
            Self::Io(e) => e.kind() != std::io::ErrorKind::StorageFull,
        }
    }
}
