use std::io;

/// Errors from the coordinate transforms
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("invalid sphere radius {0}: must be positive and finite")]
    InvalidRadius(f64),
}

/// Errors from the area-analysis and weather glue
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis response was empty")]
    EmptyResponse,

    #[error("analysis response is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("analysis field `{field}` out of range: {reason}")]
    Schema { field: &'static str, reason: String },

    #[error("network error: {0}")]
    Network(String),
}

/// Errors that stop the relay process itself
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("relay server failed: {0}")]
    Serve(#[from] io::Error),
}
