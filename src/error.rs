/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/error.rs
*
* This file defines the single error type shared by the reconcilers, the step
* chain and the Keycloak adapter.
*
* Architecture:
* - Every variant maps onto one of three stable kinds (`ErrorKind`):
*   an expected absence that drives create-versus-update branching, a
*   validation failure raised before any remote mutation, or an unexpected
*   failure coming from the Kubernetes or Keycloak APIs.
* - Errors bubble up through `Error::wrap`, which prefixes the operation or
*   step that failed. The rendered chain is what ends up in `status.value`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use thiserror::Error;

/// Stable classification of an [`Error`], independent of how deeply it was wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ExpectedAbsence,
    Validation,
    Unexpected,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Keycloak request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Keycloak returned {status} for {url}: {body}")]
    KeycloakApi {
        status: u16,
        url: String,
        body: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("parent kind {0} is not supported")]
    UnsupportedParentKind(String),

    #[error("scope {0} not found in permissions")]
    UnknownScope(String),

    #[error("service account can not be configured with public client")]
    ServiceAccountOnPublicClient,

    #[error("{0}")]
    Validation(String),

    #[error("Resource is missing metadata field '{0}'")]
    MissingMetadata(&'static str),

    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Prefixes the error with the operation that was being attempted.
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Error::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Wrapped { source, .. } => source.kind(),
            Error::NotFound(_) => ErrorKind::ExpectedAbsence,
            Error::KeycloakApi { status: 404, .. } => ErrorKind::ExpectedAbsence,
            Error::UnsupportedParentKind(_)
            | Error::UnknownScope(_)
            | Error::ServiceAccountOnPublicClient
            | Error::Validation(_) => ErrorKind::Validation,
            Error::KubeError(_)
            | Error::HttpError(_)
            | Error::KeycloakApi { .. }
            | Error::MissingMetadata(_) => ErrorKind::Unexpected,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::ExpectedAbsence
    }
}
