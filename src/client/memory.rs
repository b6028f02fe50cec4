//! In-process sign client with a simulated Syrius wallet on the other end.
//!
//! Handshakes complete in memory immediately, while the persisted view that
//! `get_all_pairings`/`find_sessions` read from only catches up after
//! `persist_lag`. This mirrors the lag real clients show between a finished
//! approval and their local storage.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::{StoreSnapshot, WcStore};
use super::{
    Approval, ClientNotification, ConnectOptions, ConnectResponse, SessionRequest, SignClient,
};
use crate::core::config::{DemoWalletConfig, ProjectConfig};
use crate::core::namespace::{
    Namespaces, METHOD_INFO, METHOD_SEND, METHOD_SIGN, ZENON_MAINNET,
};
use crate::core::{now_secs, Pairing, PeerMetadata, Reason, RequiredNamespaces, Session, SessionEvent};

const NOTIFICATION_CAPACITY: usize = 64;

struct Inner {
    /// What the handshake layer knows right now.
    live: StoreSnapshot,
    /// What readers see; trails `live` by the persistence lag.
    persisted: StoreSnapshot,
    next_proposal_id: u64,
}

#[derive(Clone)]
pub struct MemoryClient {
    inner: Arc<Mutex<Inner>>,
    store: Option<WcStore>,
    wallet: DemoWalletConfig,
    /// The dApp this client proposes sessions for.
    project: ProjectConfig,
    notifications: broadcast::Sender<ClientNotification>,
}

impl MemoryClient {
    /// A client whose persisted view only lives in memory.
    pub fn new(wallet: DemoWalletConfig) -> Self {
        Self::with_snapshot(wallet, StoreSnapshot::default(), None)
    }

    /// A client backed by a JSON store on disk, seeded from its current contents.
    pub async fn open(wallet: DemoWalletConfig, store: WcStore) -> Result<Self> {
        let snapshot = store.load().await?;
        info!(
            "Opened sign client store {:?} with {} pairings and {} sessions",
            store.path(),
            snapshot.pairings.len(),
            snapshot.sessions.len()
        );
        Ok(Self::with_snapshot(wallet, snapshot, Some(store)))
    }

    /// A client pre-populated with `snapshot`, already persisted.
    pub fn with_snapshot(
        wallet: DemoWalletConfig,
        snapshot: StoreSnapshot,
        store: Option<WcStore>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                live: snapshot.clone(),
                persisted: snapshot,
                next_proposal_id: 1,
            })),
            store,
            wallet,
            project: ProjectConfig::default(),
            notifications,
        }
    }

    pub fn with_project(mut self, project: ProjectConfig) -> Self {
        self.project = project;
        self
    }

    fn persist_lag(&self) -> Duration {
        Duration::from_millis(self.wallet.persist_lag_ms)
    }

    /// Simulate the wallet pushing an event on `topic`.
    pub fn emit_event(&self, topic: &str, event: SessionEvent) {
        let _ = self.notifications.send(ClientNotification::SessionEvent {
            topic: topic.to_string(),
            chain_id: ZENON_MAINNET.to_string(),
            event,
        });
    }

    async fn read_persisted(&self) -> Result<StoreSnapshot> {
        match &self.store {
            Some(store) => store.load().await,
            None => Ok(self.inner.lock().await.persisted.clone()),
        }
    }

    /// Drop an unapproved placeholder pairing left by a failed proposal.
    async fn discard_pairing(&self, topic: &str) {
        let removed = {
            let mut inner = self.inner.lock().await;
            let before = inner.live.pairings.len();
            inner.live.pairings.retain(|p| p.topic != topic || p.active);
            inner.live.pairings.len() != before
        };
        if removed {
            debug!("Discarded unapproved pairing {}", topic);
            self.schedule_persist();
        }
    }

    fn schedule_persist(&self) {
        persist_later(self.inner.clone(), self.store.clone(), self.persist_lag());
    }

    async fn active_session(&self, topic: &str) -> Result<Session> {
        let inner = self.inner.lock().await;
        let session = inner
            .live
            .sessions
            .iter()
            .find(|s| s.topic == topic)
            .cloned()
            .ok_or_else(|| anyhow!("No session found for topic {}", topic))?;
        if !session.is_active_at(now_secs()) {
            bail!("Session {} has expired", topic);
        }
        Ok(session)
    }

    fn wallet_metadata() -> PeerMetadata {
        PeerMetadata {
            name: "Syrius desktop".to_string(),
            description: "Zenon Network wallet".to_string(),
            url: "syrius:".to_string(),
            icons: Vec::new(),
        }
    }

    fn answer(&self, request: &SessionRequest) -> Result<Value> {
        match request.method.as_str() {
            METHOD_INFO => Ok(json!({
                "address": self.wallet.address,
                "chainId": self.wallet.chain_id,
                "nodeUrl": self.wallet.node_url,
            })),
            METHOD_SIGN => {
                let encoded = request
                    .params
                    .as_str()
                    .ok_or_else(|| anyhow!("znn_sign expects a JSON-encoded account block"))?;
                let block: Value = serde_json::from_str(encoded)?;
                // The simulated wallet holds no keys; it echoes a placeholder signature.
                Ok(json!({
                    "accountBlock": block,
                    "signature": Uuid::new_v4().simple().to_string(),
                }))
            }
            METHOD_SEND => {
                let from = request
                    .params
                    .get("fromAddress")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow!("znn_send requires fromAddress"))?;
                if from != self.wallet.address {
                    bail!("Address {} is not managed by this wallet", from);
                }
                let mut block = request
                    .params
                    .get("accountBlock")
                    .cloned()
                    .ok_or_else(|| anyhow!("znn_send requires accountBlock"))?;
                if let Some(obj) = block.as_object_mut() {
                    obj.insert("address".to_string(), json!(from));
                    obj.insert(
                        "hash".to_string(),
                        json!(Uuid::new_v4().simple().to_string()),
                    );
                }
                Ok(block)
            }
            other => bail!("Unsupported method: {}", other),
        }
    }
}

fn persist_later(inner: Arc<Mutex<Inner>>, store: Option<WcStore>, lag: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(lag).await;
        let mut guard = inner.lock().await;
        guard.persisted = guard.live.clone();
        if let Some(store) = store {
            if let Err(e) = store.save(&guard.persisted).await {
                warn!("Failed to persist sign client state: {}", e);
            }
        }
    });
}

/// Removes a proposal's placeholder pairing unless the wallet approved it,
/// including when the approval future is dropped unanswered.
struct PendingPairing {
    client: MemoryClient,
    topic: Option<String>,
}

impl PendingPairing {
    fn approved(mut self) {
        self.topic = None;
    }
}

impl Drop for PendingPairing {
    fn drop(&mut self) {
        let Some(topic) = self.topic.take() else {
            return;
        };
        let client = self.client.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { client.discard_pairing(&topic).await });
            }
            Err(_) => warn!("Unapproved pairing {} left behind", topic),
        }
    }
}

fn pairing_uri(topic: &str) -> String {
    format!(
        "wc:{}@2?relay-protocol=irn&symKey={}{}",
        topic,
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

#[async_trait]
impl SignClient for MemoryClient {
    async fn get_all_pairings(&self) -> Result<Vec<Pairing>> {
        Ok(self.read_persisted().await?.pairings)
    }

    async fn find_sessions(&self, required: &RequiredNamespaces) -> Result<Vec<Session>> {
        Ok(self.read_persisted().await?.sessions_matching(required))
    }

    async fn connect(&self, options: ConnectOptions) -> Result<ConnectResponse> {
        if self.project.project_id.trim().is_empty() {
            bail!("A project id is required to reach the relay");
        }
        let now = now_secs();
        let (pairing_topic, uri, proposal_id) = {
            let mut inner = self.inner.lock().await;
            let proposal_id = inner.next_proposal_id;
            inner.next_proposal_id += 1;

            match options.pairing_topic {
                Some(topic) => {
                    let known = inner
                        .live
                        .pairings
                        .iter()
                        .any(|p| p.topic == topic && p.active);
                    if !known {
                        bail!("No active pairing for topic {}", topic);
                    }
                    (topic, None, proposal_id)
                }
                None => {
                    let topic = Uuid::new_v4().simple().to_string();
                    let uri = pairing_uri(&topic);
                    // Inactive until the wallet approves.
                    inner.live.pairings.push(Pairing {
                        topic: topic.clone(),
                        active: false,
                        expiry: now + self.wallet.pairing_ttl_secs,
                        created_at: Some(now),
                        peer_metadata: None,
                    });
                    (topic, Some(uri), proposal_id)
                }
            }
        };
        debug!(
            "Proposal {} from {} sent on pairing {} (new pairing: {})",
            proposal_id,
            self.project.metadata.name,
            pairing_topic,
            uri.is_some()
        );

        let pending = PendingPairing {
            client: self.clone(),
            topic: uri.as_ref().map(|_| pairing_topic.clone()),
        };
        let client = self.clone();
        let required = options.required_namespaces;
        let approval = Approval::new(async move {
            if !client.wallet.auto_approve {
                let _ = client
                    .notifications
                    .send(ClientNotification::ProposalExpired { id: proposal_id });
                bail!("User rejected the session proposal");
            }
            if !Namespaces::zenon().satisfies(&required) {
                bail!("Wallet does not support the requested namespaces");
            }

            let now = now_secs();
            let session = Session {
                topic: Uuid::new_v4().simple().to_string(),
                pairing_topic: pairing_topic.clone(),
                expiry: now + client.wallet.session_ttl_secs,
                acknowledged: true,
                namespaces: required,
                created_at: Some(now),
            };

            {
                let mut inner = client.inner.lock().await;
                if let Some(pairing) = inner
                    .live
                    .pairings
                    .iter_mut()
                    .find(|p| p.topic == pairing_topic)
                {
                    pairing.active = true;
                    pairing.peer_metadata = Some(MemoryClient::wallet_metadata());
                }
                inner.live.sessions.push(session.clone());
            }
            pending.approved();
            client.schedule_persist();
            info!("Wallet approved session {}", session.topic);
            Ok(session)
        });

        Ok(ConnectResponse { uri, approval })
    }

    async fn request(&self, request: SessionRequest) -> Result<Value> {
        let session = self.active_session(&request.topic).await?;
        let granted = session.namespaces.0.values().any(|ns| {
            ns.chains.contains(&request.chain_id) && ns.methods.contains(&request.method)
        });
        if !granted {
            bail!(
                "Method {} on {} is not granted by session {}",
                request.method,
                request.chain_id,
                request.topic
            );
        }
        self.answer(&request)
    }

    async fn delete_session(&self, topic: &str, reason: Reason) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            let before = inner.live.sessions.len();
            inner.live.sessions.retain(|s| s.topic != topic);
            if inner.live.sessions.len() == before {
                bail!("No session found for topic {}", topic);
            }
        }
        debug!("Deleted session {} ({})", topic, reason.message);
        self.schedule_persist();
        let _ = self.notifications.send(ClientNotification::SessionDeleted {
            topic: topic.to_string(),
        });
        Ok(())
    }

    async fn disconnect_pairing(&self, topic: &str) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            let before = inner.live.pairings.len();
            inner.live.pairings.retain(|p| p.topic != topic);
            if inner.live.pairings.len() == before {
                bail!("No pairing found for topic {}", topic);
            }
            inner.live.sessions.retain(|s| s.pairing_topic != topic);
        }
        debug!("Disconnected pairing {}", topic);
        self.schedule_persist();
        let _ = self.notifications.send(ClientNotification::Disconnect {
            topic: Some(topic.to_string()),
        });
        Ok(())
    }

    async fn disconnect(&self, topic: &str, reason: Reason) -> Result<()> {
        let is_session = {
            let inner = self.inner.lock().await;
            inner.live.sessions.iter().any(|s| s.topic == topic)
        };
        if is_session {
            self.delete_session(topic, reason).await
        } else {
            self.disconnect_pairing(topic).await
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<ClientNotification> {
        self.notifications.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(lag_ms: u64) -> DemoWalletConfig {
        DemoWalletConfig {
            persist_lag_ms: lag_ms,
            ..DemoWalletConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_pairing_is_only_visible_after_lag() {
        let client = MemoryClient::new(wallet(1000));
        let response = client
            .connect(ConnectOptions {
                pairing_topic: None,
                required_namespaces: Namespaces::zenon(),
            })
            .await
            .unwrap();

        let uri = response.uri.clone().unwrap();
        assert!(uri.starts_with("wc:"));

        let session = response.approval.wait().await.unwrap();
        assert!(client.get_all_pairings().await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let pairings = client.get_all_pairings().await.unwrap();
        assert_eq!(pairings.len(), 1);
        assert!(pairings[0].active);
        assert_eq!(pairings[0].topic, session.pairing_topic);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_on_unknown_pairing_fails() {
        let client = MemoryClient::new(wallet(0));
        let err = client
            .connect(ConnectOptions {
                pairing_topic: Some("missing".to_string()),
                required_namespaces: Namespaces::zenon(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_emits_proposal_expired() {
        let client = MemoryClient::new(DemoWalletConfig {
            auto_approve: false,
            ..wallet(0)
        });
        let mut rx = client.subscribe();
        let response = client
            .connect(ConnectOptions {
                pairing_topic: None,
                required_namespaces: Namespaces::zenon(),
            })
            .await
            .unwrap();

        assert!(response.approval.wait().await.is_err());
        assert!(matches!(
            rx.recv().await.unwrap(),
            ClientNotification::ProposalExpired { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unapproved_pairing_is_discarded() {
        let client = MemoryClient::new(DemoWalletConfig {
            auto_approve: false,
            ..wallet(100)
        });
        let options = ConnectOptions {
            pairing_topic: None,
            required_namespaces: Namespaces::zenon(),
        };

        let rejected = client.connect(options.clone()).await.unwrap();
        assert_eq!(client.inner.lock().await.live.pairings.len(), 1);
        assert!(rejected.approval.wait().await.is_err());

        // Never answered at all
        let abandoned = client.connect(options).await.unwrap();
        drop(abandoned);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(client.inner.lock().await.live.pairings.is_empty());
        assert!(client.get_all_pairings().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_project_id_is_refused() {
        let client = MemoryClient::new(wallet(0)).with_project(ProjectConfig {
            project_id: "  ".to_string(),
            ..ProjectConfig::default()
        });
        let err = client
            .connect(ConnectOptions {
                pairing_topic: None,
                required_namespaces: Namespaces::zenon(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("project id"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_requires_granted_method() {
        let client = MemoryClient::new(wallet(0));
        let response = client
            .connect(ConnectOptions {
                pairing_topic: None,
                required_namespaces: Namespaces::zenon(),
            })
            .await
            .unwrap();
        let session = response.approval.wait().await.unwrap();

        let info = client
            .request(SessionRequest {
                topic: session.topic.clone(),
                chain_id: ZENON_MAINNET.to_string(),
                method: METHOD_INFO.to_string(),
                params: Value::Null,
            })
            .await
            .unwrap();
        assert_eq!(info["chainId"], json!(1));

        let err = client
            .request(SessionRequest {
                topic: session.topic,
                chain_id: ZENON_MAINNET.to_string(),
                method: "znn_burn".to_string(),
                params: Value::Null,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not granted"));
    }
}
