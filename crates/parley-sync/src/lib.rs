use std::fmt;
use thiserror::Error;

pub mod config;
pub mod engine;
pub mod log;
mod reconnect;
pub mod status;
pub mod transport;

pub use config::EngineConfig;
pub use engine::{start, EngineHandle, EngineSnapshot};
pub use log::{Delivery, EntryKey, LogEntry, MessageOrigin};
pub use transport::{Transport, TransportError, TransportEvent, WsTransport};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("message text is empty")]
    EmptyMessage,
    #[error("engine is shut down")]
    Terminated,
}

/// Non-fatal condition reported on the published snapshot. Faults describe the
/// most recent hiccup; the engine keeps running through all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncFault {
    NotConnected,
    SendFailed { local_id: Option<u64> },
    ConfirmationTimeout { local_id: Option<u64> },
    ServerError { message: String },
    RetriesExhausted { attempts: u32 },
}

impl fmt::Display for SyncFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncFault::NotConnected => write!(f, "not connected"),
            SyncFault::SendFailed {
                local_id: Some(local_id),
            } => {
                write!(f, "message {local_id} could not be sent")
            }
            SyncFault::SendFailed { local_id: None } => {
                write!(f, "history clear request could not be sent")
            }
            SyncFault::ConfirmationTimeout {
                local_id: Some(local_id),
            } => {
                write!(f, "message {local_id} was not confirmed in time")
            }
            SyncFault::ConfirmationTimeout { local_id: None } => {
                write!(f, "history clear was not confirmed in time")
            }
            SyncFault::ServerError { message } => write!(f, "server error: {message}"),
            SyncFault::RetriesExhausted { attempts } => {
                write!(f, "gave up reconnecting after {attempts} attempts")
            }
        }
    }
}
