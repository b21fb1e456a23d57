//! Core types of the connection subsystem. No I/O lives here.

pub mod auth;
pub mod connection;
pub mod log;
pub mod outcome;
pub mod permissions;
pub mod templates;

pub use connection::{
    Connection, ConnectionDraft, ConnectionFilter, ConnectionPatch, ConnectionStatus,
    ConnectionType, CredentialMap, HealthCheckConfig, Page,
};
pub use log::{ConnectionAlert, ConnectionLog, LogLevel, NewConnectionLog};
pub use outcome::{columns_of, elapsed_ms, ConnectionTestResult, ProviderInfo, QueryResult};
pub use permissions::{ConnectionAction, Role};
