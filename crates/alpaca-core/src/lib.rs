// src/lib.rs
pub mod buffer;
pub mod config;
pub mod conn;
pub mod error;
pub mod extension;
pub mod hooks;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod slab;
pub mod staging;
pub mod syscalls;
pub mod timeout;
pub mod waker;

// Re-exports for users
pub use buffer::GrowBuf;
pub use config::ServerConfig;
pub use conn::{ConnFlags, Connection, Endpoints, PeerAddr};
pub use error::{AlpacaError, AlpacaResult};
pub use hooks::ServerHooks;
pub use metrics::MetricsSnapshot;
pub use server::{Server, ServerGuard};
pub use slab::ConnId;
pub use staging::{OutputWindow, WriteState};
pub use waker::Waker;
