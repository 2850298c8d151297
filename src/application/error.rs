use std::borrow::Cow;
use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{catalog::CatalogError, repos::RepoError},
    cache::CacheError,
    domain::error::DomainError,
    infra::error::InfraError,
};

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Plain-text error response paired with the report the logging middleware consumes.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: Cow<'static, str>,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<Cow<'static, str>>,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message: public_message.into(),
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<Cow<'static, str>>,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message: public_message.into(),
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message.into_owned()).into_response();
        self.report.attach(&mut response);
        response
    }
}

impl From<CacheError> for HttpError {
    fn from(error: CacheError) -> Self {
        const SOURCE: &str = "application::error::cache_error_to_http_error";
        match &error {
            // The validation message is the public contract for a bad query.
            CacheError::InvalidQuery(message) => HttpError::new(
                SOURCE,
                StatusCode::BAD_REQUEST,
                message.clone(),
                message.clone(),
            ),
            CacheError::StrategyUnavailable(_) => HttpError::from_error(
                SOURCE,
                StatusCode::NOT_FOUND,
                "Unknown caching strategy",
                &error,
            ),
            CacheError::BackendUnavailable(_) => HttpError::from_error(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
                &error,
            ),
            CacheError::Cancelled => HttpError::from_error(
                SOURCE,
                StatusCode::REQUEST_TIMEOUT,
                "Request cancelled",
                &error,
            ),
            CacheError::Store { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                &error,
            ),
        }
    }
}

impl From<CatalogError> for HttpError {
    fn from(error: CatalogError) -> Self {
        const SOURCE: &str = "application::error::catalog_error_to_http_error";
        match error {
            CatalogError::Cache(err) => HttpError::from(err),
            CatalogError::Domain(DomainError::NotFound { .. })
            | CatalogError::Repo(RepoError::NotFound) => HttpError::from_error(
                SOURCE,
                StatusCode::NOT_FOUND,
                "Product not found",
                &error,
            ),
            CatalogError::Domain(DomainError::Validation { .. }) => {
                let message = error.to_string();
                HttpError::new(SOURCE, StatusCode::BAD_REQUEST, message.clone(), message)
            }
            CatalogError::Repo(RepoError::InvalidInput { .. }) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Request could not be processed",
                &error,
            ),
            CatalogError::Repo(RepoError::Timeout) => HttpError::from_error(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service temporarily unavailable",
                &error,
            ),
            CatalogError::Repo(RepoError::Persistence(_) | RepoError::Integrity { .. }) => {
                HttpError::from_error(
                    SOURCE,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    &error,
                )
            }
            CatalogError::Eviction(_) => {
                let message = error.to_string();
                HttpError::new(SOURCE, StatusCode::BAD_REQUEST, message.clone(), message)
            }
        }
    }
}

/// Failure that ends the process; reported once by the binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
