use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats server answered {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("malformed stats payload from {origin}: {message}")]
    Malformed { origin: String, message: String },
    #[error("{metric} was still processing after {attempts} attempts")]
    FetchTimedOut { metric: String, attempts: u32 },
    #[error("no cached data for {0}")]
    NotCached(String),
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<StatsError> for AppError {
    fn from(err: StatsError) -> Self {
        let status = match &err {
            StatsError::Status { .. }
            | StatsError::Transport { .. }
            | StatsError::Malformed { .. } => StatusCode::BAD_GATEWAY,
            StatsError::FetchTimedOut { .. } => StatusCode::GATEWAY_TIMEOUT,
            StatsError::NotCached(_) => StatusCode::NOT_FOUND,
            StatsError::Storage(_) | StatsError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, self.message).into_response()
    }
}
