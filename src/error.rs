//! Error taxonomy for the session manager.
//!
//! Every operation exposed to the surrounding application reports failures as
//! an [`OperationResult`] carrying an [`ErrorKind`] and a human message.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::bluetooth::{AdapterError, ConnectionStatus};

/// Machine-readable error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AdapterUnavailable,
    AlreadyScanning,
    UnknownAddress,
    NotFound,
    AlreadyConnected,
    ConnectionInProgress,
    InvalidTransition,
    ConnectTimeout,
    ConnectFailed,
    ServiceNotFound,
    NotConnected,
    ReadTimeout,
    ReadFailed,
    WriteTimeout,
    WriteRejected,
    WriteFailed,
    PayloadTooLarge,
    MalformedSource,
    UnknownCommand,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Scanner is already running")]
    AlreadyScanning,

    #[error("Device not found: {0}")]
    UnknownAddress(String),

    #[error("No record for address {0}")]
    NotFound(String),

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Another connection attempt is in progress")]
    ConnectionInProgress,

    #[error("Invalid transition for {address}: {from} -> {to}")]
    InvalidTransition {
        address: String,
        from: ConnectionStatus,
        to: ConnectionStatus,
    },

    #[error("Connecting to {address} timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("Connecting to {address} failed: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("Hublink service not found on {0}")]
    ServiceNotFound(String),

    #[error("Device not connected: {0}")]
    NotConnected(String),

    #[error("Status read timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("Status read failed: {0}")]
    ReadFailed(String),

    #[error("Command write timed out at byte {offset}")]
    WriteTimeout { offset: usize },

    #[error("Command write rejected at byte {offset}: {reason}")]
    WriteRejected { offset: usize, reason: String },

    #[error("Command write failed at byte {offset}: {reason}")]
    WriteFailed { offset: usize, reason: String },

    #[error("Payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Command file is malformed at field '{field}': {message}")]
    MalformedSource { field: String, message: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AdapterUnavailable(_) => ErrorKind::AdapterUnavailable,
            Self::AlreadyScanning => ErrorKind::AlreadyScanning,
            Self::UnknownAddress(_) => ErrorKind::UnknownAddress,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyConnected(_) => ErrorKind::AlreadyConnected,
            Self::ConnectionInProgress => ErrorKind::ConnectionInProgress,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            Self::NotConnected(_) => ErrorKind::NotConnected,
            Self::ReadTimeout(_) => ErrorKind::ReadTimeout,
            Self::ReadFailed(_) => ErrorKind::ReadFailed,
            Self::WriteTimeout { .. } => ErrorKind::WriteTimeout,
            Self::WriteRejected { .. } => ErrorKind::WriteRejected,
            Self::WriteFailed { .. } => ErrorKind::WriteFailed,
            Self::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            Self::MalformedSource { .. } => ErrorKind::MalformedSource,
            Self::UnknownCommand(_) => ErrorKind::UnknownCommand,
        }
    }

    pub(crate) fn from_adapter(address: &str, err: AdapterError) -> Self {
        match err {
            AdapterError::Unavailable(reason) => Self::AdapterUnavailable(reason),
            AdapterError::UnknownDevice(address) => Self::UnknownAddress(address),
            AdapterError::ServiceNotFound => Self::ServiceNotFound(address.to_string()),
            other => Self::ConnectFailed {
                address: address.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Structured result of an operation: success flag, payload or error.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> OperationResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: &SessionError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                kind: error.kind(),
                message: error.to_string(),
            }),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn into_result(self) -> Result<T, ErrorBody> {
        match (self.data, self.error) {
            (Some(data), None) => Ok(data),
            (_, Some(error)) => Err(error),
            (None, None) => Err(ErrorBody {
                kind: ErrorKind::NotFound,
                message: "empty result".to_string(),
            }),
        }
    }
}

impl<T> From<SessionResult<T>> for OperationResult<T> {
    fn from(result: SessionResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(&e),
        }
    }
}
