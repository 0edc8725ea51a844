use actix_web::{HttpResponse, ResponseError};

pub type Result<T> = std::result::Result<T, RecoError>;

#[derive(Debug, thiserror::Error)]
pub enum RecoError {
    #[error("Insufficient data for training: {users} users, {items} items, {interactions} interactions")]
    DataInsufficient {
        users: usize,
        items: usize,
        interactions: usize,
    },

    #[error("Model unavailable")]
    ModelUnavailable,

    #[error("Scoring fault: {0}")]
    ScoringFault(String),

    #[error("Training loss failed to decrease")]
    TrainingDivergence,

    #[error("A training run is already active")]
    TrainingInProgress,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for RecoError {
    fn from(err: anyhow::Error) -> Self {
        RecoError::Internal(err.to_string())
    }
}

impl ResponseError for RecoError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            RecoError::DataInsufficient { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RecoError::TrainingInProgress => StatusCode::CONFLICT,
            RecoError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            RecoError::DataInsufficient { .. } => {
                HttpResponse::UnprocessableEntity().json(serde_json::json!({
                    "error": "data_insufficient",
                    "error_description": self.to_string()
                }))
            }
            RecoError::TrainingInProgress => HttpResponse::Conflict().json(serde_json::json!({
                "error": "training_in_progress",
                "error_description": self.to_string()
            })),
            RecoError::ModelUnavailable => {
                HttpResponse::ServiceUnavailable().json(serde_json::json!({
                    "error": "model_unavailable",
                    "error_description": self.to_string()
                }))
            }
            _ => HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "internal_error",
                "error_description": self.to_string()
            })),
        }
    }
}
