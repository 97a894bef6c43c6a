use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("feature server returned {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },
    #[error("feature server error {code}: {message}")]
    Server { code: i64, message: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid feature collection: {0}")]
    Parse(#[from] serde_json::Error),
}
