use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::fmt::Display;

#[derive(Debug, PartialEq)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
// We box `ErrorDetails` per the `clippy::result_large_err` lint
pub struct Error(Box<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Box::new(details))
    }

    pub fn new_without_logging(details: ErrorDetails) -> Self {
        Error(Box::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    pub fn log(&self) {
        self.0.log();
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, PartialEq)]
pub enum ErrorDetails {
    AccountExists {
        email: String,
    },
    Config {
        message: String,
    },
    InternalError {
        message: String,
    },
    InvalidCredentials,
    InvalidRequest {
        message: String,
    },
    Observability {
        message: String,
    },
    Serialization {
        message: String,
    },
    Store {
        message: String,
    },
    StoreContention {
        key: String,
    },
    UnknownPrice {
        price_id: String,
    },
}

impl ErrorDetails {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::AccountExists { .. } => StatusCode::CONFLICT,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ErrorDetails::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::Observability { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Serialization { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::StoreContention { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ErrorDetails::UnknownPrice { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        if self.status_code().is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::warn!("{self}");
        }
    }
}

impl Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorDetails::AccountExists { email } => {
                write!(f, "An account already exists for {email}")
            }
            ErrorDetails::Config { message } => write!(f, "Config error: {message}"),
            ErrorDetails::InternalError { message } => write!(f, "Internal error: {message}"),
            ErrorDetails::InvalidCredentials => write!(f, "Invalid email or password"),
            ErrorDetails::InvalidRequest { message } => write!(f, "{message}"),
            ErrorDetails::Observability { message } => {
                write!(f, "Observability setup error: {message}")
            }
            ErrorDetails::Serialization { message } => {
                write!(f, "Serialization error: {message}")
            }
            ErrorDetails::Store { message } => write!(f, "Store error: {message}"),
            ErrorDetails::StoreContention { key } => {
                write!(f, "Gave up on contended store key: {key}")
            }
            ErrorDetails::UnknownPrice { price_id } => {
                write!(f, "Unknown price identifier: {price_id}")
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "message": self.to_string(),
                "code": status.as_u16(),
            }
        });
        (status, Json(body)).into_response()
    }
}
