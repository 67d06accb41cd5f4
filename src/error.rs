use std::path::PathBuf;
use thiserror::Error;

use crate::parse::ParseError;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("{trace}: there is no main function in this trace")]
    NoRootFunction { trace: String },
    #[error("invalid measurement kind {0:?}, expected Time or Memory")]
    InvalidKind(String),
    #[error("invalid caller prefix {prefix:?}: {source}")]
    InvalidPattern {
        prefix: String,
        #[source]
        source: regex::Error,
    },
    #[error("cannot open trace {}: {source}", path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },
    #[error("graph store: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store answered {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("{code}: {message}")]
    Store { code: String, message: String },
    #[error("unexpected response: {0}")]
    Response(String),
}
