use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Call not found: {0}")]
    CallNotFound(Uuid),

    #[error("Invalid phone number '{number}': {reason}")]
    InvalidPhoneNumber { number: String, reason: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
