use thiserror::Error;

use crate::lifecycle::TransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed for `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error(transparent)]
    Guard(#[from] TransitionError),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("permit {permit_id} was modified concurrently; re-fetch and retry")]
    ConcurrentModification { permit_id: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<TransitionError> for ServiceError {
    fn from(value: TransitionError) -> Self {
        Self::Domain(DomainError::Guard(value))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("guard violation: {message}")]
    GuardViolation { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message, .. } | Self::GuardViolation { message, .. } => {
                message.clone()
            }
            Self::NotFound { message, .. } => message.clone(),
            Self::Conflict { .. } => {
                "The permit changed while you were working. Refresh and try again.".to_string()
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly.".to_string()
            }
        }
    }
}

impl ServiceError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        match self {
            Self::Domain(DomainError::Validation { .. }) => {
                InterfaceError::BadRequest { message: self.to_string(), correlation_id }
            }
            Self::Domain(DomainError::Guard(_)) => {
                InterfaceError::GuardViolation { message: self.to_string(), correlation_id }
            }
            Self::NotFound { .. } => {
                InterfaceError::NotFound { message: self.to_string(), correlation_id }
            }
            Self::ConcurrentModification { .. } => {
                InterfaceError::Conflict { message: self.to_string(), correlation_id }
            }
            Self::Persistence(message) => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}
