//! The sign client seam.
//!
//! Pairing transport, relay and session cryptography live behind
//! [`SignClient`]. This crate only sequences calls against it.

pub mod memory;
pub mod store;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::core::{Pairing, Reason, RequiredNamespaces, Session, SessionEvent};

pub use memory::MemoryClient;
pub use store::{StoreSnapshot, StoreWatcher, WcStore};

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Reuse this pairing instead of creating a new one.
    pub pairing_topic: Option<String>,
    pub required_namespaces: RequiredNamespaces,
}

/// Resolves once the wallet approves (or rejects) a session proposal.
pub struct Approval(BoxFuture<'static, Result<Session>>);

impl Approval {
    pub fn new<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = Result<Session>> + Send + 'static,
    {
        Approval(Box::pin(fut))
    }

    pub async fn wait(self) -> Result<Session> {
        self.0.await
    }
}

impl std::fmt::Debug for Approval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Approval(..)")
    }
}

#[derive(Debug)]
pub struct ConnectResponse {
    /// Present when a fresh pairing was created and must be shown to the user.
    pub uri: Option<String>,
    pub approval: Approval,
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub topic: String,
    pub chain_id: String,
    pub method: String,
    pub params: Value,
}

/// Notifications the client pushes to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotification {
    Disconnect { topic: Option<String> },
    SessionDeleted { topic: String },
    SessionEvent {
        topic: String,
        chain_id: String,
        event: SessionEvent,
    },
    ProposalExpired { id: u64 },
}

#[async_trait]
pub trait SignClient: Send + Sync {
    async fn get_all_pairings(&self) -> Result<Vec<Pairing>>;

    /// Sessions whose granted namespaces satisfy `required`, in store order.
    async fn find_sessions(&self, required: &RequiredNamespaces) -> Result<Vec<Session>>;

    async fn connect(&self, options: ConnectOptions) -> Result<ConnectResponse>;

    async fn request(&self, request: SessionRequest) -> Result<Value>;

    async fn delete_session(&self, topic: &str, reason: Reason) -> Result<()>;

    async fn disconnect_pairing(&self, topic: &str) -> Result<()>;

    /// Disconnect by topic, which may name either a session or a pairing.
    async fn disconnect(&self, topic: &str, reason: Reason) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<ClientNotification>;
}
