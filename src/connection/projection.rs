//! Local view of the wallet connection, driven by client notifications.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::client::{ClientNotification, SignClient};
use crate::core::namespace::{EVENT_ADDRESS_CHANGE, EVENT_CHAIN_ID_CHANGE};
use crate::core::{ConnectError, Pairing, RequiredNamespaces, Session, SessionEvent, WalletInfo};

#[derive(Debug, Clone, Serialize)]
pub struct ObservedEvent {
    pub received_at: DateTime<Utc>,
    pub topic: String,
    pub event: SessionEvent,
}

/// What the caller has to re-read after applying a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUp {
    None,
    RefreshSessions,
    RefreshAll,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionState {
    pub current_pairing: Option<Pairing>,
    pub current_session: Option<Session>,
    pub pairings: Vec<Pairing>,
    pub sessions: Vec<Session>,
    pub address: String,
    pub chain_id: Option<u64>,
    pub node_url: String,
    /// Newest first.
    pub events: Vec<ObservedEvent>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        (self.current_pairing.is_some() && self.current_session.is_some())
            || !self.sessions.is_empty()
            || !self.pairings.is_empty()
    }

    pub fn apply_wallet_info(&mut self, info: &WalletInfo) {
        self.address = info.address.clone();
        self.chain_id = Some(info.chain_id);
        self.node_url = info.node_url.clone();
    }

    /// Apply a notification. Pure: any re-reads are left to the caller.
    pub fn apply(&mut self, notification: &ClientNotification) -> FollowUp {
        match notification {
            ClientNotification::Disconnect { topic } => {
                tracing::info!("Disconnect notification for {:?}", topic);
                FollowUp::RefreshAll
            }
            ClientNotification::SessionDeleted { topic } => {
                tracing::info!("Session {} deleted", topic);
                FollowUp::RefreshSessions
            }
            ClientNotification::SessionEvent { topic, event, .. } => {
                self.record_event(topic, event);
                FollowUp::None
            }
            ClientNotification::ProposalExpired { id } => {
                tracing::info!("Proposal {} expired", id);
                FollowUp::None
            }
        }
    }

    fn record_event(&mut self, topic: &str, event: &SessionEvent) {
        tracing::debug!("Session event on {}: {:?}", topic, event);
        self.events.insert(
            0,
            ObservedEvent {
                received_at: Utc::now(),
                topic: topic.to_string(),
                event: event.clone(),
            },
        );

        match event.name.as_str() {
            EVENT_ADDRESS_CHANGE => match event.data.as_str() {
                Some(address) => {
                    tracing::info!("Address changed to {}", address);
                    self.address = address.to_string();
                }
                None => tracing::warn!("addressChange without a string address: {}", event.data),
            },
            EVENT_CHAIN_ID_CHANGE => match parse_chain_id(&event.data) {
                Some(chain_id) => {
                    tracing::info!("Chain id changed to {}", chain_id);
                    self.chain_id = Some(chain_id);
                }
                None => tracing::warn!("chainIdChange with unusable data: {}", event.data),
            },
            other => tracing::info!("Unhandled session event: {}", other),
        }
    }

    /// Forget cached references that no longer appear in the listed state.
    fn prune_current(&mut self) {
        if let Some(current) = &self.current_pairing {
            if !self.pairings.iter().any(|p| p.topic == current.topic) {
                self.current_pairing = None;
            }
        }
        if let Some(current) = &self.current_session {
            if !self.sessions.iter().any(|s| s.topic == current.topic) {
                self.current_session = None;
            }
        }
    }

    pub async fn refresh_pairings(&mut self, client: &dyn SignClient) -> Result<(), ConnectError> {
        self.pairings = client
            .get_all_pairings()
            .await
            .map_err(ConnectError::Client)?;
        self.prune_current();
        Ok(())
    }

    pub async fn refresh_sessions(
        &mut self,
        client: &dyn SignClient,
        required: &RequiredNamespaces,
    ) -> Result<(), ConnectError> {
        self.sessions = client
            .find_sessions(required)
            .await
            .map_err(ConnectError::Client)?;
        self.prune_current();
        Ok(())
    }

    pub async fn refresh_all(
        &mut self,
        client: &dyn SignClient,
        required: &RequiredNamespaces,
    ) -> Result<(), ConnectError> {
        self.refresh_pairings(client).await?;
        self.refresh_sessions(client, required).await
    }
}

fn parse_chain_id(data: &Value) -> Option<u64> {
    match data {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A live listener on a client's notifications. Dropping it, or calling
/// [`Subscription::unsubscribe`], stops forwarding.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    /// Forward every notification from `client` into `sink`.
    pub fn forward(
        client: &dyn SignClient,
        sink: mpsc::UnboundedSender<ClientNotification>,
    ) -> Self {
        let mut rx = client.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => {
                        if sink.send(notification).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Dropped {} client notifications", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Notification listener stopped");
        });
        Self { task }
    }

    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(name: &str, data: Value) -> ClientNotification {
        ClientNotification::SessionEvent {
            topic: "s".to_string(),
            chain_id: "zenon:1".to_string(),
            event: SessionEvent {
                name: name.to_string(),
                data,
            },
        }
    }

    #[test]
    fn test_address_change_updates_address_and_log() {
        let mut state = ConnectionState::default();
        let follow_up = state.apply(&event("addressChange", json!("z1qxyz")));

        assert_eq!(follow_up, FollowUp::None);
        assert_eq!(state.address, "z1qxyz");
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.events[0].event.name, "addressChange");
    }

    #[test]
    fn test_unknown_event_is_logged_only() {
        let mut state = ConnectionState::default();
        state.address = "z1before".to_string();
        state.apply(&event("somethingElse", json!(42)));

        assert_eq!(state.address, "z1before");
        assert_eq!(state.chain_id, None);
        assert_eq!(state.events.len(), 1);
    }

    #[test]
    fn test_chain_id_accepts_numbers_and_numeric_strings() {
        let mut state = ConnectionState::default();
        state.apply(&event("chainIdChange", json!(3)));
        assert_eq!(state.chain_id, Some(3));

        state.apply(&event("chainIdChange", json!("7")));
        assert_eq!(state.chain_id, Some(7));

        state.apply(&event("chainIdChange", json!("not a number")));
        assert_eq!(state.chain_id, Some(7));
    }

    #[test]
    fn test_event_log_is_newest_first() {
        let mut state = ConnectionState::default();
        state.apply(&event("addressChange", json!("z1first")));
        state.apply(&event("chainIdChange", json!(2)));

        let names: Vec<_> = state.events.iter().map(|e| e.event.name.as_str()).collect();
        assert_eq!(names, vec!["chainIdChange", "addressChange"]);
    }

    #[test]
    fn test_lifecycle_notifications_request_refresh() {
        let mut state = ConnectionState::default();
        assert_eq!(
            state.apply(&ClientNotification::Disconnect { topic: None }),
            FollowUp::RefreshAll
        );
        assert_eq!(
            state.apply(&ClientNotification::SessionDeleted {
                topic: "s".to_string()
            }),
            FollowUp::RefreshSessions
        );
        assert_eq!(
            state.apply(&ClientNotification::ProposalExpired { id: 1 }),
            FollowUp::None
        );
        assert!(state.events.is_empty());
    }
}
