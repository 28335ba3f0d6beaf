use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid video code: {0}")]
    InvalidCode(String),

    #[error("Invalid quality label: {0}")]
    InvalidQuality(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
