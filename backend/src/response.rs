use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use shared::{ApiResponse, ErrorCode};

use crate::inference::service::{ClassifyError, PredictError};

pub fn success<T: Serialize>(data: T, message: &str) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::ok(data, message))
}

/// Failures as seen by API clients. Internal details stay in the logs.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No 'image' field was found in the request")]
    MissingImageField,
    #[error("Malformed multipart form: {0}")]
    MalformedForm(String),
    #[error("Invalid image file: {0}")]
    InvalidImage(String),
    #[error("Classification model unavailable")]
    ModelUnavailable,
    #[error("Prediction failed: {0}")]
    Prediction(String),
    #[error("Model info failed: {0}")]
    ModelInfo(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("No route for {0}")]
    NotFound(String),
    #[error("Method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::MissingImageField | ApiError::MalformedForm(_) => {
                ErrorCode::MissingImageField
            }
            ApiError::InvalidImage(_) => ErrorCode::InvalidImageFile,
            ApiError::ModelUnavailable => ErrorCode::ModelUnavailable,
            ApiError::Prediction(_) => ErrorCode::PredictionServiceError,
            ApiError::ModelInfo(_) => ErrorCode::ModelInfoError,
            ApiError::Internal(_) => ErrorCode::InternalServerError,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::MethodNotAllowed { .. } => ErrorCode::MethodNotAllowed,
        }
    }

    fn client_message(&self) -> String {
        match self {
            ApiError::MissingImageField => {
                "No 'image' field was found in the request".into()
            }
            ApiError::MalformedForm(_) => {
                "The request is not a valid multipart form with an 'image' field".into()
            }
            ApiError::InvalidImage(reason) => format!(
                "Error processing the image. Verify that it is a valid image file. {}",
                reason
            ),
            ApiError::ModelUnavailable => {
                "The classification model is not available. Please try again later.".into()
            }
            ApiError::Prediction(_) => "Error in the prediction service".into(),
            ApiError::ModelInfo(_) => "Error retrieving model information".into(),
            ApiError::Internal(_) => "General service error".into(),
            ApiError::NotFound(path) => format!("Resource not found: {}", path),
            ApiError::MethodNotAllowed { method, path } => {
                format!("Method {} is not allowed on {}", method, path)
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingImageField
            | ApiError::MalformedForm(_)
            | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Prediction(_) | ApiError::ModelInfo(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{} ({})", self, self.code());
        } else {
            log::warn!("{} ({})", self, self.code());
        }
        let body = ApiResponse::<()>::error(self.code(), self.client_message());
        HttpResponse::build(status).json(body)
    }
}

impl From<ClassifyError> for ApiError {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::InvalidImage(e) => ApiError::InvalidImage(e.to_string()),
            ClassifyError::Predict(PredictError::ModelUnavailable) => ApiError::ModelUnavailable,
            ClassifyError::Predict(e) => ApiError::Prediction(e.to_string()),
        }
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
