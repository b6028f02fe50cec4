// Zenon Connect Library
// Pairing/session reconciliation between a dApp and the Syrius wallet

pub mod cli;
pub mod client;
pub mod connection;
pub mod core;
pub mod utils;

// Re-export commonly used types
pub use client::{MemoryClient, SignClient};
pub use connection::{ConnectionManagerHandle, ReconcilePath, Reconciler};
pub use crate::core::{Config, ConnectError, Connection, Pairing, Session};

// Error handling
pub use anyhow::{Error, Result};
