// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the model migration coordinator
//!
//! For HTTP-level error handling, see Dropshot.

use crate::api::external::ResourceType;
use dropshot::ClientErrorStatusCode;
use dropshot::HttpError;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use uuid::Uuid;

/// An error that can be generated by the migration coordinator
///
/// These are returned verbatim to whoever invoked the coordinator: the
/// migration-master loop, worker agents submitting reports, or the facade
/// layer serving status queries.  When generated as part of an HTTP request,
/// an `Error` will be converted into an HTTP error as one of the last steps
/// in processing the request.
///
/// The variants fall into a few groups that callers treat differently:
///
/// * [`Error::InvalidValue`] describes malformed input and names the
///   offending field.
/// * [`Error::Conflict`] means the operation can never succeed against the
///   current state (a migration is already in progress, the model is not
///   alive, ...).  It must not be retried.
/// * [`Error::PhaseAlreadyChanged`] means another writer won a race.  The
///   caller may refresh its view and decide whether to try again.
/// * [`Error::IllegalPhaseTransition`] and [`Error::ConflictingReport`]
///   indicate a bug in the caller and are always fatal to the request.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// An object needed as part of this operation was not found.
    #[error("{type_name} not found ({lookup_type})")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// The specified input field is not valid.
    #[error("Invalid Value: {label}, {message}")]
    InvalidValue { label: String, message: String },
    /// The operation conflicts with the current state and will not succeed
    /// if retried.
    #[error("{message}")]
    Conflict { message: String },
    /// A concurrent writer changed the phase of the migration after the
    /// caller last read it.
    #[error("phase already changed (migration {migration_id})")]
    PhaseAlreadyChanged { migration_id: String },
    /// The requested phase is not reachable from the current one.
    #[error("illegal phase change: {from} -> {to}")]
    IllegalPhaseTransition { from: String, to: String },
    /// An agent reported twice for the same phase with differing outcomes.
    #[error("conflicting reports received for {migration_id}/{phase}/{agent}")]
    ConflictingReport { migration_id: String, phase: String, agent: String },

    /// The system encountered an unhandled operational error.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
    /// The system (or part of it) is unavailable.
    #[error("Service Unavailable: {internal_message}")]
    ServiceUnavailable { internal_message: String },
}

/// Indicates how an object was looked up (for an `ObjectNotFound` error)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    /// a specific id was requested
    ById(Uuid),
    /// a specific id was requested with some composite type
    /// (caller summarizes it)
    ByCompositeId(String),
    /// the most recent object owned by the given parent was requested
    LatestFor(Uuid),
}

impl LookupType {
    /// Returns an ObjectNotFound error appropriate for the case where this
    /// lookup failed
    pub fn into_not_found(self, type_name: ResourceType) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: self }
    }
}

impl From<Uuid> for LookupType {
    fn from(uuid: Uuid) -> Self {
        LookupType::ById(uuid)
    }
}

impl Display for LookupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupType::ById(id) => write!(f, "id \"{}\"", id),
            LookupType::ByCompositeId(label) => write!(f, "id \"{}\"", label),
            LookupType::LatestFor(parent) => write!(f, "latest for \"{}\"", parent),
        }
    }
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably be
    /// retried
    ///
    /// [`Error::PhaseAlreadyChanged`] is included: it is only worth retrying
    /// after the caller has refreshed its view of the migration.
    pub fn retryable(&self) -> bool {
        match self {
            Error::ServiceUnavailable { .. }
            | Error::PhaseAlreadyChanged { .. } => true,

            Error::ObjectNotFound { .. }
            | Error::InvalidValue { .. }
            | Error::Conflict { .. }
            | Error::IllegalPhaseTransition { .. }
            | Error::ConflictingReport { .. }
            | Error::InternalError { .. } => false,
        }
    }

    /// Returns true if this error reports a lost optimistic-concurrency race
    pub fn is_race(&self) -> bool {
        matches!(self, Error::PhaseAlreadyChanged { .. })
    }

    /// Returns true if this is an [`Error::ObjectNotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ObjectNotFound { .. })
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by object id.
    pub fn not_found_by_id(type_name: ResourceType, id: &Uuid) -> Error {
        LookupType::ById(*id).into_not_found(type_name)
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by a
    /// composite (non-uuid) id.
    pub fn not_found_by_composite_id(
        type_name: ResourceType,
        id: &str,
    ) -> Error {
        LookupType::ByCompositeId(id.to_owned()).into_not_found(type_name)
    }

    /// Generates an [`Error::InternalError`] error with the specific message
    ///
    /// InternalError should be used for operational conditions that should not
    /// happen but that we cannot reasonably handle at runtime (e.g.,
    /// deserializing a stored document, or finding two records for something
    /// that is supposed to be unique).
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    /// Generates an [`Error::InvalidValue`] error naming the offending field
    pub fn invalid_value(label: &str, message: &str) -> Error {
        Error::InvalidValue {
            label: label.to_owned(),
            message: message.to_owned(),
        }
    }

    /// Generates an [`Error::Conflict`] error with the specific message
    pub fn conflict(message: &str) -> Error {
        Error::Conflict { message: message.to_owned() }
    }

    /// Generates an [`Error::ServiceUnavailable`] error with the specific
    /// message
    ///
    /// This should be used for transient failures where the caller might be
    /// expected to retry.  Logic errors or other problems indicating that a
    /// retry would not work should probably be an InternalError or a Conflict
    /// instead.
    pub fn unavail(message: &str) -> Error {
        Error::ServiceUnavailable { internal_message: message.to_owned() }
    }

    /// Given an [`Error`] with an internal message, return the same error with
    /// `context` prepended to it to provide more context
    ///
    /// [`Error::Conflict`] messages are prefixed as well, since they are
    /// displayed directly to the operator.  Other errors are returned
    /// unchanged.
    pub fn internal_context<C>(self, context: C) -> Error
    where
        C: Display + Send + Sync + 'static,
    {
        match self {
            Error::ObjectNotFound { .. }
            | Error::InvalidValue { .. }
            | Error::PhaseAlreadyChanged { .. }
            | Error::IllegalPhaseTransition { .. }
            | Error::ConflictingReport { .. } => self,
            Error::Conflict { message } => {
                Error::Conflict { message: format!("{}: {}", context, message) }
            }
            Error::InternalError { internal_message } => Error::InternalError {
                internal_message: format!("{}: {}", context, internal_message),
            },
            Error::ServiceUnavailable { internal_message } => {
                Error::ServiceUnavailable {
                    internal_message: format!(
                        "{}: {}",
                        context, internal_message
                    ),
                }
            }
        }
    }
}

impl From<Error> for HttpError {
    /// Converts an `Error` error into an `HttpError`.  This defines how
    /// errors that are represented internally using `Error` are ultimately
    /// exposed to clients over HTTP.
    fn from(error: Error) -> HttpError {
        match error {
            Error::ObjectNotFound { .. } => HttpError::for_not_found(
                Some(String::from("ObjectNotFound")),
                error.to_string(),
            ),

            Error::InvalidValue { label, message } => {
                let message =
                    format!("unsupported value for \"{}\": {}", label, message);
                HttpError::for_bad_request(
                    Some(String::from("InvalidValue")),
                    message,
                )
            }

            Error::IllegalPhaseTransition { .. } => {
                HttpError::for_bad_request(
                    Some(String::from("IllegalPhaseTransition")),
                    error.to_string(),
                )
            }

            Error::Conflict { message } => HttpError::for_client_error(
                Some(String::from("Conflict")),
                ClientErrorStatusCode::CONFLICT,
                message,
            ),

            Error::PhaseAlreadyChanged { .. } => HttpError::for_client_error(
                Some(String::from("PhaseAlreadyChanged")),
                ClientErrorStatusCode::CONFLICT,
                error.to_string(),
            ),

            Error::ConflictingReport { .. } => HttpError::for_client_error(
                Some(String::from("ConflictingReport")),
                ClientErrorStatusCode::CONFLICT,
                error.to_string(),
            ),

            Error::InternalError { internal_message } => {
                HttpError::for_internal_error(internal_message)
            }

            Error::ServiceUnavailable { internal_message } => {
                HttpError::for_unavail(
                    Some(String::from("ServiceNotAvailable")),
                    internal_message,
                )
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal_error(&e.to_string())
    }
}

/// Like [`assert!`], except that instead of panicking, this function returns an
/// `Err(Error::InternalError)` with an appropriate message if the given
/// condition is not true.
#[macro_export]
macro_rules! bail_unless {
    ($cond:expr $(,)?) => {
        $crate::bail_unless!($cond, "failed runtime check: {:?}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            Err($crate::api::external::Error::internal_error(&format!(
                $($arg)*)))?;
        }
    };
}

/// Implements a pattern similar to [`anyhow::Context`] for providing extra
/// context for internal error messages
///
/// Unlike `anyhow::Context`, this does not add a new Error to the cause chain.
/// It replaces the given Error with one that has the modified message.
///
/// ## Example
///
/// ```
/// use migration_common::api::external::Error;
/// use migration_common::api::external::InternalContext;
///
/// let error: Result<(), Error> = Err(Error::internal_error("boom"));
/// assert_eq!(
///     error.internal_context("uh-oh").unwrap_err().to_string(),
///     "Internal Error: uh-oh: boom"
/// );
/// ```
pub trait InternalContext<T> {
    fn internal_context<C>(self, s: C) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static;

    fn with_internal_context<C, F>(self, f: F) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> InternalContext<T> for Result<T, Error> {
    fn internal_context<C>(self, context: C) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
    {
        self.map_err(|error| error.internal_context(context))
    }

    fn with_internal_context<C, F>(self, make_context: F) -> Result<T, Error>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| error.internal_context(make_context()))
    }
}
