//! Error types for the Soniq runtime

use thiserror::Error;

/// Runtime error type
///
/// Most runtime conditions (missing definitions, pool exhaustion,
/// unknown control-plane names) are reported and recovered, not
/// returned as errors; this type covers the cases callers must see.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Event {0} not found")]
    EventNotFound(u32),

    #[error("Container {0} not found")]
    ContainerNotFound(u32),

    #[error("Bus {0} not found")]
    BusNotFound(u32),

    #[error("State {0} not found")]
    StateNotFound(u32),

    #[error("Bus graph cycle at bus {0}")]
    BusCycle(u32),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Command queue full")]
    QueueFull,

    #[error("Engine already shut down")]
    ShutDown,
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;
