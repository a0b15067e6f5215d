//! modapto-invocation: calls smart services hosted by the external execution
//! environment.
//!
//! Provides:
//! - client-credentials bearer token acquisition ([`credentials`])
//! - (module, smart service) → address resolution ([`registry`])
//! - the [`SmartServiceClient`] performing `invoke/$value` calls in sync or
//!   async mode
//! - [`ResponseProcessor`] strategies turning a raw response into a typed,
//!   persisted result

pub mod client;
pub mod credentials;
pub mod processor;
pub mod registry;

pub use client::SmartServiceClient;
pub use credentials::{ClientCredentialsProvider, CredentialProvider};
pub use processor::{NoOpProcessor, ResponseProcessor, ThresholdMaintenanceProcessor};
pub use registry::{HttpModuleRegistry, ModuleRegistry};

use modapto_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Smart service not found: {0}")]
    ServiceNotFound(String),
    #[error("Smart service rejected the request ({status}): {body}")]
    ClientInvocation { status: u16, body: String },
    #[error("Smart service execution failed ({status}): {body}")]
    ServerInvocation { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Remote execution failed: {}", .0.join("; "))]
    RemoteExecutionFailed(Vec<String>),
    #[error("Failed to decode smart service output: {0}")]
    Decode(String),
    #[error("Failed to persist result: {0}")]
    Persistence(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, InvocationError>;
