use serde::{Deserialize, Serialize};

use super::namespace::Namespaces;

/// Metadata a peer advertises about itself during pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

/// A long-lived trust relationship between this dApp and a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pairing {
    pub topic: String,
    pub active: bool,
    #[serde(default)]
    pub expiry: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_metadata: Option<PeerMetadata>,
}

/// A capability-scoped, time-bounded channel on top of a pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub topic: String,
    pub pairing_topic: String,
    /// Absolute expiry in unix seconds.
    pub expiry: u64,
    pub acknowledged: bool,
    #[serde(default)]
    pub namespaces: Namespaces,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

impl Session {
    /// A session is usable only while its expiry is strictly in the future.
    pub fn is_active_at(&self, now_secs: u64) -> bool {
        self.expiry > now_secs
    }
}

/// The resolved pair returned by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub pairing: Pairing,
    pub session: Session,
}

/// An event pushed by the wallet over an established session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Answer to `znn_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    pub address: String,
    pub chain_id: u64,
    pub node_url: String,
}

/// Reason attached to session deletes and pairing disconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: i64,
    pub message: String,
    pub data: String,
}

impl Default for Reason {
    fn default() -> Self {
        Self {
            code: 1,
            message: "Default Message".to_string(),
            data: "Default Data".to_string(),
        }
    }
}

impl Reason {
    pub fn with_message(message: Option<String>, data: Option<String>) -> Self {
        let default = Self::default();
        Self {
            code: default.code,
            message: message.unwrap_or(default.message),
            data: data.unwrap_or(default.data),
        }
    }
}

/// Current unix time in whole seconds.
pub fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
