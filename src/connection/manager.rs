use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

use super::projection::{ConnectionState, FollowUp, Subscription};
use super::reconciler::{ReconcilePath, Reconciler, UriPresenter};
use super::requests;
use super::settle::{wait_until, SettlePolicy};
use crate::client::{ClientNotification, SignClient, StoreWatcher, WcStore};
use crate::core::namespace::ZENON_MAINNET;
use crate::core::{Config, Connection, ConnectError, Reason, RequiredNamespaces, Session, WalletInfo};

type Reply<T> = oneshot::Sender<Result<T, ConnectError>>;

// Commands that can be sent to the ConnectionManager actor
pub enum ConnectionCommand {
    Connect {
        response_tx: Reply<(Connection, ReconcilePath)>,
    },
    Refresh {
        response_tx: Reply<()>,
    },
    GetInfo {
        response_tx: Reply<WalletInfo>,
    },
    Sign {
        account_block: Value,
        response_tx: Reply<Value>,
    },
    Send {
        from_address: String,
        account_block: Value,
        response_tx: Reply<Value>,
    },
    SendDummy {
        response_tx: Reply<Value>,
    },
    SignDummy {
        response_tx: Reply<Value>,
    },
    DisconnectSession {
        topic: Option<String>,
        reason: Reason,
        response_tx: Reply<()>,
    },
    DisconnectPairing {
        topic: Option<String>,
        response_tx: Reply<()>,
    },
    DisconnectAll {
        reason: Reason,
        response_tx: Reply<usize>,
    },
    Snapshot {
        response_tx: oneshot::Sender<ConnectionState>,
    },
}

#[derive(Debug, Clone, Copy)]
enum RefreshScope {
    Sessions,
    All,
}

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub required: RequiredNamespaces,
    pub settle: SettlePolicy,
    pub approval_timeout: Duration,
    /// Re-read everything whenever this store changes on disk.
    pub watch_store: Option<WcStore>,
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            required: config.namespaces.clone(),
            settle: SettlePolicy::from(&config.settle),
            approval_timeout: config.settle.approval_timeout(),
            watch_store: None,
        }
    }
}

// Actor handle for communicating with the ConnectionManager
#[derive(Clone)]
pub struct ConnectionManagerHandle {
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
}

// Internal manager state (runs in its own task)
struct ConnectionManagerActor {
    reconciler: Reconciler,
    chain_id: String,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    notification_rx: mpsc::UnboundedReceiver<ClientNotification>,
    refresh_rx: mpsc::UnboundedReceiver<RefreshScope>,
    refresh_tx: mpsc::UnboundedSender<RefreshScope>,
    store_rx: Option<mpsc::UnboundedReceiver<()>>,
    _subscription: Subscription,
    _store_watcher: Option<StoreWatcher>,
}

impl ConnectionManagerHandle {
    pub fn new(
        client: Arc<dyn SignClient>,
        presenter: Arc<dyn UriPresenter>,
        options: ManagerOptions,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notification_tx, notification_rx) = mpsc::unbounded_channel();
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());

        let subscription = Subscription::forward(client.as_ref(), notification_tx);

        let (store_watcher, store_rx) = match options.watch_store.as_ref().map(StoreWatcher::spawn) {
            Some(Ok((watcher, rx))) => (Some(watcher), Some(rx)),
            Some(Err(e)) => {
                tracing::warn!("Failed to watch sign client store: {}", e);
                (None, None)
            }
            None => (None, None),
        };

        let chain_id = options
            .required
            .primary_chain()
            .unwrap_or(ZENON_MAINNET)
            .to_string();

        let actor = ConnectionManagerActor {
            reconciler: Reconciler::new(
                client,
                options.required,
                options.settle,
                options.approval_timeout,
                presenter,
            ),
            chain_id,
            state: ConnectionState::default(),
            state_tx,
            command_rx,
            notification_rx,
            refresh_rx,
            refresh_tx,
            store_rx,
            _subscription: subscription,
            _store_watcher: store_watcher,
        };

        // Spawn the actor task
        tokio::spawn(actor.run());

        Self {
            command_tx,
            state_rx,
        }
    }

    async fn send<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> ConnectionCommand,
    ) -> Result<T, ConnectError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(command(response_tx))
            .map_err(|_| ConnectError::ManagerUnavailable)?;
        response_rx
            .await
            .map_err(|_| ConnectError::ManagerUnavailable)?
    }

    /// Reuse or negotiate a pairing and session. Calls queue behind any
    /// reconciliation already in flight on this handle.
    pub async fn connect(&self) -> Result<(Connection, ReconcilePath), ConnectError> {
        self.send(|response_tx| ConnectionCommand::Connect { response_tx })
            .await
    }

    pub async fn refresh(&self) -> Result<(), ConnectError> {
        self.send(|response_tx| ConnectionCommand::Refresh { response_tx })
            .await
    }

    pub async fn get_info(&self) -> Result<WalletInfo, ConnectError> {
        self.send(|response_tx| ConnectionCommand::GetInfo { response_tx })
            .await
    }

    pub async fn sign_transaction(&self, account_block: Value) -> Result<Value, ConnectError> {
        self.send(|response_tx| ConnectionCommand::Sign {
            account_block,
            response_tx,
        })
        .await
    }

    pub async fn send_transaction(
        &self,
        from_address: String,
        account_block: Value,
    ) -> Result<Value, ConnectError> {
        self.send(|response_tx| ConnectionCommand::Send {
            from_address,
            account_block,
            response_tx,
        })
        .await
    }

    pub async fn send_dummy_transaction(&self) -> Result<Value, ConnectError> {
        self.send(|response_tx| ConnectionCommand::SendDummy { response_tx })
            .await
    }

    /// Ask the wallet to sign, without sending, a 1.1 ZNN self-send.
    pub async fn sign_dummy_transaction(&self) -> Result<Value, ConnectError> {
        self.send(|response_tx| ConnectionCommand::SignDummy { response_tx })
            .await
    }

    /// Delete `topic`, or the current session when `None`.
    pub async fn disconnect_session(
        &self,
        topic: Option<String>,
        reason: Reason,
    ) -> Result<(), ConnectError> {
        self.send(|response_tx| ConnectionCommand::DisconnectSession {
            topic,
            reason,
            response_tx,
        })
        .await
    }

    /// Disconnect `topic`, or the current pairing when `None`.
    pub async fn disconnect_pairing(&self, topic: Option<String>) -> Result<(), ConnectError> {
        self.send(|response_tx| ConnectionCommand::DisconnectPairing { topic, response_tx })
            .await
    }

    /// Disconnect every known pairing. Returns how many were disconnected.
    pub async fn disconnect_all(&self, reason: Reason) -> Result<usize, ConnectError> {
        self.send(|response_tx| ConnectionCommand::DisconnectAll {
            reason,
            response_tx,
        })
        .await
    }

    /// State as seen by the actor once every earlier command has been handled.
    pub async fn snapshot(&self) -> Result<ConnectionState, ConnectError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(ConnectionCommand::Snapshot { response_tx })
            .map_err(|_| ConnectError::ManagerUnavailable)?;
        response_rx.await.map_err(|_| ConnectError::ManagerUnavailable)
    }

    /// Last published state, without waiting on the actor.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Observe every state change the actor publishes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

/// True once neither a pairing nor a matching session carries `topic`.
async fn topic_removed(
    client: &dyn SignClient,
    required: &RequiredNamespaces,
    topic: &str,
) -> Result<bool, ConnectError> {
    let pairings = client
        .get_all_pairings()
        .await
        .map_err(ConnectError::Client)?;
    if pairings.iter().any(|p| p.topic == topic) {
        return Ok(false);
    }
    let sessions = client
        .find_sessions(required)
        .await
        .map_err(ConnectError::Client)?;
    Ok(!sessions.iter().any(|s| s.topic == topic))
}

async fn recv_or_pending<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl ConnectionManagerActor {
    fn client(&self) -> &dyn SignClient {
        self.reconciler.client().as_ref()
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    async fn run(mut self) {
        // Initial read of whatever the client already knows
        if let Err(e) = self.refresh(RefreshScope::All).await {
            tracing::warn!("Initial refresh failed: {}", e);
        }

        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            tracing::info!("ConnectionManager shutting down");
                            break;
                        }
                    }
                }
                Some(notification) = self.notification_rx.recv() => {
                    self.handle_notification(notification);
                }
                Some(scope) = self.refresh_rx.recv() => {
                    if let Err(e) = self.refresh(scope).await {
                        tracing::warn!("Refresh after notification failed: {}", e);
                    }
                }
                Some(()) = recv_or_pending(&mut self.store_rx) => {
                    tracing::debug!("Sign client store changed on disk");
                    if let Err(e) = self.refresh(RefreshScope::All).await {
                        tracing::warn!("Refresh after store change failed: {}", e);
                    }
                }
            }
        }
    }

    async fn refresh(&mut self, scope: RefreshScope) -> Result<(), ConnectError> {
        let client = self.reconciler.client().clone();
        let required = self.reconciler.required().clone();
        let result = match scope {
            RefreshScope::All => self.state.refresh_all(client.as_ref(), &required).await,
            RefreshScope::Sessions => {
                self.state
                    .refresh_sessions(client.as_ref(), &required)
                    .await
            }
        };
        self.publish();
        result
    }

    fn handle_notification(&mut self, notification: ClientNotification) {
        let scope = match self.state.apply(&notification) {
            FollowUp::None => None,
            FollowUp::RefreshSessions => Some(RefreshScope::Sessions),
            FollowUp::RefreshAll => Some(RefreshScope::All),
        };
        self.publish();

        if let Some(scope) = scope {
            let removed = match notification {
                ClientNotification::Disconnect { topic } => topic,
                ClientNotification::SessionDeleted { topic } => Some(topic),
                _ => None,
            };
            self.schedule_refresh(scope, removed);
        }
    }

    /// The client can announce a removal before it has persisted it. Poll
    /// until `removed` is gone from the store, then re-read. Without a topic
    /// there is nothing to poll for, so re-read once after the first delay
    /// and again when the settle timeout ends.
    fn schedule_refresh(&self, scope: RefreshScope, removed: Option<String>) {
        let client = self.reconciler.client().clone();
        let required = self.reconciler.required().clone();
        let settle = self.reconciler.settle().clone();
        let refresh_tx = self.refresh_tx.clone();

        tokio::spawn(async move {
            match removed {
                Some(topic) => {
                    let client = client.as_ref();
                    let required = &required;
                    let topic = topic.as_str();
                    let what = match scope {
                        RefreshScope::Sessions => "session removal",
                        RefreshScope::All => "pairing removal",
                    };
                    let settled = wait_until(&settle, what, || async move {
                        let gone = topic_removed(client, required, topic).await?;
                        Ok(gone.then_some(()))
                    })
                    .await;
                    if let Err(e) = settled {
                        tracing::warn!("{}, refreshing anyway", e);
                    }
                    let _ = refresh_tx.send(scope);
                }
                None => {
                    tokio::time::sleep(settle.initial_delay).await;
                    if refresh_tx.send(scope).is_err() {
                        return;
                    }
                    tokio::time::sleep(settle.timeout.saturating_sub(settle.initial_delay)).await;
                    let _ = refresh_tx.send(scope);
                }
            }
        });
    }

    async fn handle_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect { response_tx } => {
                let result = self.connect().await;
                let _ = response_tx.send(result);
            }
            ConnectionCommand::Refresh { response_tx } => {
                let result = self.refresh(RefreshScope::All).await;
                let _ = response_tx.send(result);
            }
            ConnectionCommand::GetInfo { response_tx } => {
                let result = self.get_info().await;
                let _ = response_tx.send(result);
            }
            ConnectionCommand::Sign {
                account_block,
                response_tx,
            } => {
                let result = self.sign_transaction(&account_block).await;
                let _ = response_tx.send(result);
            }
            ConnectionCommand::Send {
                from_address,
                account_block,
                response_tx,
            } => {
                let result = self.send_transaction(&from_address, account_block).await;
                let _ = response_tx.send(result);
            }
            ConnectionCommand::SendDummy { response_tx } => {
                let result = match self.dummy_block(requests::DUMMY_SEND_AMOUNT) {
                    Ok(block) => {
                        let from_address = self.state.address.clone();
                        self.send_transaction(&from_address, block).await
                    }
                    Err(e) => Err(e),
                };
                let _ = response_tx.send(result);
            }
            ConnectionCommand::SignDummy { response_tx } => {
                let result = match self.dummy_block(requests::DUMMY_SIGN_AMOUNT) {
                    Ok(block) => self.sign_transaction(&block).await,
                    Err(e) => Err(e),
                };
                let _ = response_tx.send(result);
            }
            ConnectionCommand::DisconnectSession {
                topic,
                reason,
                response_tx,
            } => {
                let result = self.disconnect_session(topic, reason).await;
                let _ = response_tx.send(result);
            }
            ConnectionCommand::DisconnectPairing { topic, response_tx } => {
                let result = self.disconnect_pairing(topic).await;
                let _ = response_tx.send(result);
            }
            ConnectionCommand::DisconnectAll {
                reason,
                response_tx,
            } => {
                let result = self.disconnect_all(reason).await;
                let _ = response_tx.send(result);
            }
            ConnectionCommand::Snapshot { response_tx } => {
                let _ = response_tx.send(self.state.clone());
            }
        }
    }

    fn current_session(&self) -> Result<Session, ConnectError> {
        self.state
            .current_session
            .clone()
            .ok_or(ConnectError::NotConnected("no current session, connect first"))
    }

    async fn connect(&mut self) -> Result<(Connection, ReconcilePath), ConnectError> {
        let (connection, path) = self.reconciler.reconcile().await?;
        // The resolved pair is already confirmed; a failed listing only leaves
        // the lists stale.
        if let Err(e) = self.refresh(RefreshScope::All).await {
            tracing::warn!("Refresh after connect failed: {}", e);
        }
        self.state.current_pairing = Some(connection.pairing.clone());
        self.state.current_session = Some(connection.session.clone());
        self.publish();
        Ok((connection, path))
    }

    async fn get_info(&mut self) -> Result<WalletInfo, ConnectError> {
        let session = self.current_session()?;
        let info = requests::get_info(self.client(), &session, &self.chain_id).await?;
        self.state.apply_wallet_info(&info);
        self.publish();
        Ok(info)
    }

    fn dummy_block(&self, amount: &str) -> Result<Value, ConnectError> {
        requests::dummy_send_block(&self.state.address, self.state.chain_id, amount)
    }

    async fn sign_transaction(&self, account_block: &Value) -> Result<Value, ConnectError> {
        let session = self.current_session()?;
        requests::sign_transaction(self.client(), &session, &self.chain_id, account_block).await
    }

    async fn send_transaction(
        &self,
        from_address: &str,
        account_block: Value,
    ) -> Result<Value, ConnectError> {
        let session = self.current_session()?;
        requests::send_transaction(
            self.client(),
            &session,
            &self.chain_id,
            from_address,
            account_block,
        )
        .await
    }

    async fn disconnect_session(
        &mut self,
        topic: Option<String>,
        reason: Reason,
    ) -> Result<(), ConnectError> {
        let topic = match topic {
            Some(topic) => topic,
            None => self.current_session()?.topic,
        };
        tracing::info!("Disconnecting session {}", topic);

        self.client()
            .delete_session(&topic, reason)
            .await
            .map_err(ConnectError::Client)?;
        if self.state.current_session.as_ref().map(|s| &s.topic) == Some(&topic) {
            self.state.current_session = None;
            self.publish();
        }

        let client = self.reconciler.client().clone();
        let required = self.reconciler.required().clone();
        let topic_ref = topic.as_str();
        let client_ref = client.as_ref();
        let required_ref = &required;
        wait_until(self.reconciler.settle(), "session removal", || async move {
            let sessions = client_ref
                .find_sessions(required_ref)
                .await
                .map_err(ConnectError::Client)?;
            Ok((!sessions.iter().any(|s| s.topic == topic_ref)).then_some(()))
        })
        .await?;

        self.refresh(RefreshScope::Sessions).await
    }

    async fn disconnect_pairing(&mut self, topic: Option<String>) -> Result<(), ConnectError> {
        let topic = match topic {
            Some(topic) => topic,
            None => self
                .state
                .current_pairing
                .as_ref()
                .map(|p| p.topic.clone())
                .ok_or(ConnectError::NotConnected("no current pairing, connect first"))?,
        };
        tracing::info!("Disconnecting pairing {}", topic);

        self.client()
            .disconnect_pairing(&topic)
            .await
            .map_err(ConnectError::Client)?;
        if self.state.current_pairing.as_ref().map(|p| &p.topic) == Some(&topic) {
            self.state.current_pairing = None;
            self.publish();
        }

        let client = self.reconciler.client().clone();
        let client_ref = client.as_ref();
        let topic_ref = topic.as_str();
        wait_until(self.reconciler.settle(), "pairing removal", || async move {
            let pairings = client_ref
                .get_all_pairings()
                .await
                .map_err(ConnectError::Client)?;
            Ok((!pairings.iter().any(|p| p.topic == topic_ref)).then_some(()))
        })
        .await?;

        self.refresh(RefreshScope::All).await
    }

    async fn disconnect_all(&mut self, reason: Reason) -> Result<usize, ConnectError> {
        let client = self.reconciler.client().clone();
        let pairings = client
            .get_all_pairings()
            .await
            .map_err(ConnectError::Client)?;
        tracing::info!("Disconnecting all {} pairings", pairings.len());

        let results = futures::future::join_all(
            pairings
                .iter()
                .map(|pairing| client.disconnect(&pairing.topic, reason.clone())),
        )
        .await;
        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();

        self.state.current_pairing = None;
        self.state.current_session = None;

        if !failures.is_empty() {
            let _ = self.refresh(RefreshScope::All).await;
            return Err(ConnectError::Client(anyhow::anyhow!(
                "Failed to disconnect {} pairings: {}",
                failures.len(),
                failures.join("; ")
            )));
        }

        let client_ref = client.as_ref();
        wait_until(self.reconciler.settle(), "pairing removal", || async move {
            let remaining = client_ref
                .get_all_pairings()
                .await
                .map_err(ConnectError::Client)?;
            Ok(remaining.is_empty().then_some(()))
        })
        .await?;

        self.refresh(RefreshScope::All).await?;
        Ok(pairings.len())
    }
}
