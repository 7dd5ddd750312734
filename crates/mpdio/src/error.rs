use reqwest::StatusCode;

/// Transport-internal failure. Consumer-facing results never carry this
/// directly; the loop records it as a [`ManifestStatus`] on the response.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("download cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("operation timed out: {reason}")]
    Timeout { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// True for failures where the live refresh loop should collapse to the
    /// minimum refresh interval (timeout or connect-level failure).
    pub fn is_timeout_class(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Network { source } => source.is_timeout() || source.is_connect(),
            _ => false,
        }
    }
}

/// Classification of one manifest acquisition attempt, carried on every
/// [`ManifestResponse`](crate::ManifestResponse) so callers branch on status
/// uniformly instead of handling nulls or panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManifestStatus {
    /// Downloaded and parsed.
    #[default]
    Ok,
    /// Transport or HTTP failure; no usable document.
    DownloadError,
    /// Document received but the XML failed to parse.
    ParseError,
    /// Document parsed but its root carries no usable content.
    ContentError,
    /// No manifest became available within the requested wait.
    Timeout,
    /// The downloader was released while the caller was waiting.
    Aborted,
}

impl ManifestStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for ManifestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Ok => "manifest downloaded and parsed",
            Self::DownloadError => "manifest download failed",
            Self::ParseError => "manifest parse failed",
            Self::ContentError => "manifest content unusable",
            Self::Timeout => "no manifest available within the requested wait",
            Self::Aborted => "downloader released while waiting",
        };
        f.write_str(text)
    }
}
