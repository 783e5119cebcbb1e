//! Error taxonomy shared by both halves of the bridge.
//!
//! Registration faults abort `add_interface`; everything that happens while a
//! call is in flight is turned into an error [`Answer`](super::wire::Answer)
//! by the dispatch engine and never escapes it.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// No interface registered under this name
    #[error("Unable to find interface {0}!")]
    NoSuchInterface(String),

    /// Interface exists but does not expose the function
    #[error("Unable to find function {function} of interface {interface}!")]
    NoSuchFunction {
        /// Interface name from the call
        interface: String,
        /// Function name from the call
        function: String,
    },

    /// Wrong number of positional arguments
    #[error("Argument count mismatch: expected {expected}, got {got}")]
    ArgumentCountMismatch {
        /// Declared parameter count
        expected: usize,
        /// Number of arguments on the wire
        got: usize,
    },

    /// Declared type incompatible with the supplied JSON shape
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeDecodeFailure {
        /// Declared type
        expected: String,
        /// What was actually supplied
        got: String,
    },

    /// A native value cannot be written as the declared type
    #[error("Cannot encode {value} as {expected}")]
    EncodeFailure {
        /// Declared type
        expected: String,
        /// Offending value
        value: String,
    },

    /// A type projection other than invariant was found
    #[error("Unsupported variance {variance} in {context}")]
    UnsupportedVariance {
        /// Function or type the projection was found in
        context: String,
        /// The rejected variance
        variance: String,
    },

    /// The same function name is exposed more than once
    #[error("Duplicate function definitions found {0:?}")]
    DuplicateFunctionName(Vec<String>),

    /// Return type does not fit the call type
    #[error("Function {function} with call type {call_type} has the wrong return type {found}")]
    InvalidReturnType {
        /// Function name
        function: String,
        /// Declared call type
        call_type: String,
        /// Declared return type
        found: String,
    },

    /// Promise resolved or rejected twice
    #[error("Promise already settled")]
    AlreadySettled,

    /// `close()` called on a closed handle
    #[error("Function handle {0} is already closed")]
    HandleAlreadyClosed(u64),

    /// Handle used after `close()`
    #[error("Function handle {0} used after close")]
    UseAfterClose(u64),

    /// No live handle with this ID
    #[error("Function handle {0} not found")]
    NoSuchHandle(u64),

    /// A live handle with this ID already exists
    #[error("Function handle {0} is already registered")]
    DuplicateHandle(u64),

    /// No pending call with this correlation ID
    #[error("No pending call with correlation id {0}")]
    NoSuchCorrelation(u64),

    /// Full-promise call without the completion handle
    #[error("Call to {0} carries no promiseFunctionBinding")]
    MissingPromiseBinding(String),

    /// Error answer received from the script side
    #[error("{message}")]
    RemoteFault {
        /// Remote message
        message: String,
        /// Remote stack trace, kept as data
        stack_trace: String,
    },

    /// Error answer received from the host side, seen from the script side
    #[error(transparent)]
    Native(#[from] NativeError),

    /// The invoked function failed or panicked
    #[error("{message}")]
    Invocation {
        /// Error message
        message: String,
        /// Debug rendering and backtrace if one was captured
        stack_trace: String,
    },

    /// Message text is not a valid envelope
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// No completion arrived in time
    #[error("Call timed out after {0}ms")]
    Timeout(u64),

    /// The peer is gone
    #[error("Script channel closed")]
    ChannelClosed,

    /// Bootstrap script could not be loaded
    #[error("Failed to load bootstrap script: {0}")]
    Bootstrap(String),

    /// Depth or size limit exceeded while decoding
    #[error("{0}")]
    LimitExceeded(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A bridge thread could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl BridgeError {
    /// Stable name of the error category, sent as `error.kind` on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::NoSuchInterface(_) => "NoSuchInterface",
            BridgeError::NoSuchFunction { .. } => "NoSuchFunction",
            BridgeError::ArgumentCountMismatch { .. } => "ArgumentCountMismatch",
            BridgeError::TypeDecodeFailure { .. } => "TypeDecodeFailure",
            BridgeError::EncodeFailure { .. } => "EncodeFailure",
            BridgeError::UnsupportedVariance { .. } => "UnsupportedVariance",
            BridgeError::DuplicateFunctionName(_) => "DuplicateFunctionName",
            BridgeError::InvalidReturnType { .. } => "InvalidReturnType",
            BridgeError::AlreadySettled => "AlreadySettled",
            BridgeError::HandleAlreadyClosed(_) => "HandleAlreadyClosed",
            BridgeError::UseAfterClose(_) => "UseAfterClose",
            BridgeError::NoSuchHandle(_) => "NoSuchHandle",
            BridgeError::DuplicateHandle(_) => "DuplicateHandle",
            BridgeError::NoSuchCorrelation(_) => "NoSuchCorrelation",
            BridgeError::MissingPromiseBinding(_) => "MissingPromiseBinding",
            BridgeError::RemoteFault { .. } => "RemoteFault",
            BridgeError::Native(_) => "NativeError",
            BridgeError::Invocation { .. } => "Invocation",
            BridgeError::MalformedMessage(_) => "MalformedMessage",
            BridgeError::Timeout(_) => "Timeout",
            BridgeError::ChannelClosed => "ChannelClosed",
            BridgeError::Bootstrap(_) => "Bootstrap",
            BridgeError::LimitExceeded(_) => "LimitExceeded",
            BridgeError::Config(_) => "Config",
            BridgeError::Runtime(_) => "Runtime",
        }
    }

    /// Text sent as `error.stackTrace`.
    pub fn stack_trace(&self) -> String {
        match self {
            BridgeError::RemoteFault { stack_trace, .. }
            | BridgeError::Invocation { stack_trace, .. } => stack_trace.clone(),
            BridgeError::Native(native) => native.native_stack_trace.clone(),
            other => format!("{}: {}", other.kind(), other),
        }
    }

    /// Wrap an error returned by an exposed function.
    pub fn invocation<E: fmt::Display + ?Sized>(error: &E) -> Self {
        let message = error.to_string();
        let backtrace = Backtrace::capture();
        let stack_trace = match backtrace.status() {
            BacktraceStatus::Captured => format!("{}\n{}", message, backtrace),
            _ => message.clone(),
        };
        BridgeError::Invocation {
            message,
            stack_trace,
        }
    }

    /// Convert a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "function panicked".to_string()
        };
        BridgeError::Invocation {
            stack_trace: format!("panic: {}", message),
            message,
        }
    }

    pub(crate) fn mismatch(expected: impl fmt::Display, got: impl fmt::Display) -> Self {
        BridgeError::TypeDecodeFailure {
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

/// A host-side failure as seen by script code.
///
/// `message` is the local message; `native_message` and `native_stack_trace`
/// carry what the host reported, kept apart from the local error's own text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}{native_message}")]
pub struct NativeError {
    /// Local message
    pub message: String,
    /// Message reported by the host
    pub native_message: String,
    /// Stack trace reported by the host
    pub native_stack_trace: String,
}

impl NativeError {
    /// Prefix used for every error raised from an error answer.
    pub const PREFIX: &'static str = "Error in Native Layer: ";

    pub fn new(native_message: impl Into<String>, native_stack_trace: impl Into<String>) -> Self {
        Self {
            message: Self::PREFIX.to_string(),
            native_message: native_message.into(),
            native_stack_trace: native_stack_trace.into(),
        }
    }

    /// Render like the script-side `toString`, with the host trace appended.
    pub fn with_cause(&self) -> String {
        format!("{}\nCaused by: {}", self, self.native_stack_trace)
    }
}
