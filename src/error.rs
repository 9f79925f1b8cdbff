//! Error types for the volume provisioning engine
//!
//! Errors fall into four classes: conflicts with existing on-disk state,
//! missing resources, failed external commands and invalid input. Every
//! layer wraps lower-level errors with context (device, volume id,
//! operation) through [`ResultExt`], and [`Error::kind`] looks through
//! those layers to classify the root cause.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("{0}")]
    DriveNotFound(String),

    // =========================================================================
    // Conflicts
    // =========================================================================
    #[error("partition {partition} on device {device} has already exist but have another UUID - {actual} (expected {expected})")]
    PartitionConflict {
        device: String,
        partition: String,
        expected: String,
        actual: String,
    },

    #[error("device {device} already has file system {actual}, refusing to create {expected}")]
    FilesystemConflict {
        device: String,
        expected: String,
        actual: String,
    },

    // =========================================================================
    // Device Errors
    // =========================================================================
    #[error("unable to find drive path by SN {serial}")]
    DevicePathNotFound { serial: String },

    #[error("unable to find partition name by UUID {uuid} for device {device}")]
    PartitionNameNotFound { device: String, uuid: String },

    #[error("unable to create partition table for device {device} unsupported partition table type: {table_type:?}")]
    UnsupportedPartitionTable { device: String, table_type: String },

    #[error("unsupported file system {0}")]
    UnsupportedFilesystem(String),

    // =========================================================================
    // Command Errors
    // =========================================================================
    #[error("failed to execute {command}: {source}")]
    CommandSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command {command} failed with code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("unexpected output of {command}: {reason}")]
    UnexpectedOutput { command: String, reason: String },

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Root-cause classification of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Existing state contradicts the desired state; needs an operator
    Conflict,
    /// Something expected to exist could not be located
    NotFound,
    /// An external command or API call failed
    Transient,
    /// The request itself is unusable
    Invalid,
    /// Anything else
    Internal,
}

/// Action the caller should take before re-invoking the same call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Wrap this error with a context message
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error below any context layers
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Error::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Classify the root cause of this error
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::PartitionConflict { .. } | Error::FilesystemConflict { .. } => {
                ErrorKind::Conflict
            }

            Error::ResourceNotFound { .. }
            | Error::DriveNotFound(_)
            | Error::DevicePathNotFound { .. }
            | Error::PartitionNameNotFound { .. } => ErrorKind::NotFound,

            Error::Kube(_)
            | Error::CommandSpawn { .. }
            | Error::CommandFailed { .. }
            | Error::UnexpectedOutput { .. }
            | Error::Io(_) => ErrorKind::Transient,

            Error::UnsupportedPartitionTable { .. }
            | Error::UnsupportedFilesystem(_)
            | Error::InvalidVolume(_)
            | Error::Configuration(_)
            | Error::CapacityParse(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorKind::Invalid,

            _ => ErrorKind::Internal,
        }
    }

    /// Determine what the caller should do with this error
    pub fn action(&self) -> ErrorAction {
        match self.kind() {
            ErrorKind::Transient | ErrorKind::Internal => ErrorAction::RequeueWithBackoff,
            // device nodes show up late after hotplug or reboot
            ErrorKind::NotFound => ErrorAction::RequeueAfter(Duration::from_secs(30)),
            ErrorKind::Conflict | ErrorKind::Invalid => ErrorAction::NoRequeue,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if the root cause is a conflict with existing state
    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Check if the root cause is a missing resource
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Captured stderr of a failed command, if that is the root cause
    pub fn stderr(&self) -> Option<&str> {
        match self.root() {
            Error::CommandFailed { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

/// Context wrapping for results
pub trait ResultExt<T> {
    /// Wrap the error with a fixed message
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error with a lazily built message
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
