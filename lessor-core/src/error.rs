//! Error types for the lease manager.
//!
//! Each collaborator has its own error enum; [`ManagerError`] is what the
//! request path and the scheduler report, one variant per failure class.

use thiserror::Error;

/// Failures surfaced by a [`crate::infrastructure::LeaseStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("duplicate entry: {0}")]
    Duplicate(String),

    #[error("event '{id}' cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: crate::types::EventStatus,
        to: crate::types::EventStatus,
    },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound { kind, id: id.into() }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }
}

/// Failures raised by resource plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The external resource does not exist (any more)
    #[error("resource '{0}' not found")]
    ResourceNotFound(String),

    #[error("plugin '{plugin}' does not support action '{action}'")]
    NotSupported { plugin: String, action: String },

    #[error("invalid plugin configuration: {0}")]
    InvalidConfig(String),

    #[error("resource provider error: {0}")]
    Provider(String),
}

/// Failures from the identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("trust '{0}' not found")]
    TrustNotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("identity backend failure: {0}")]
    Backend(String),
}

/// Startup configuration failures. The service refuses to start on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("plugin(s) not installed: {}", .0.join(", "))]
    MissingPlugins(Vec<String>),

    #[error("plugins '{first}' and '{second}' both provide resource type '{resource_type}'")]
    DuplicateResourceType {
        resource_type: String,
        first: String,
        second: String,
    },

    #[error("no action '{action}' implemented in plugin '{plugin}'")]
    UnknownAction { plugin: String, action: String },

    #[error("actions configured for resource type '{0}' but no plugin provides it")]
    UnknownResourceType(String),

    #[error("event type '{0}' is not supported")]
    UnsupportedEventType(String),

    #[error("plugin '{plugin}' requires option '{option}'")]
    MissingOption { plugin: String, option: String },

    #[error("plugin '{plugin}' rejected its configuration: {source}")]
    Setup {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Reading the execution context outside a bound task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("context isn't available here")]
    Unavailable,
}

/// Failures crossing the messaging boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("nobody is listening on topic '{0}'")]
    UnknownTopic(String),

    #[error("topic '{0}' already has a listener")]
    TopicTaken(String),

    #[error("listener on topic '{0}' went away")]
    Disconnected(String),

    #[error("unexpected reply to '{0}'")]
    UnexpectedReply(&'static str),
}

/// Error taxonomy of the manager service.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("handler failure: {0}")]
    HandlerFailure(String),

    #[error(transparent)]
    ContextUnavailable(#[from] ContextError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("messaging error: {0}")]
    Messaging(#[from] RpcError),
}

impl From<StoreError> for ManagerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { kind, id } => ManagerError::NotFound { kind, id },
            StoreError::Duplicate(msg) => ManagerError::DuplicateEntry(msg),
            other => ManagerError::Store(other),
        }
    }
}

impl From<PluginError> for ManagerError {
    fn from(e: PluginError) -> Self {
        ManagerError::HandlerFailure(e.to_string())
    }
}

impl ManagerError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ManagerError::NotFound { kind, id: id.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ManagerError::Validation(msg.into())
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
