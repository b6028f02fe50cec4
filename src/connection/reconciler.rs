//! Decide whether an existing pairing and session can be reused, or which of
//! them must be negotiated with the wallet.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::settle::{wait_until, SettlePolicy};
use crate::client::{Approval, ClientNotification, ConnectOptions, SignClient};
use crate::core::{now_secs, Connection, ConnectError, Pairing, RequiredNamespaces, Session};

/// Shows a freshly generated pairing URI to the user for out-of-band approval.
pub trait UriPresenter: Send + Sync {
    fn present(&self, uri: &str) -> anyhow::Result<()>;

    /// Called once the proposal is answered, rejected or expired.
    fn dismiss(&self) {}
}

/// Which branch `reconcile` took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePath {
    /// No active pairing: a new pairing and session were negotiated.
    NewPairing,
    /// Active pairing without a live session: a new session was negotiated on it.
    NewSession,
    /// Both were already live; nothing was sent to the wallet.
    Reused,
}

/// Pick the latest candidate. When every candidate carries a creation
/// timestamp the newest wins and list position breaks ties; otherwise the
/// last element in client order wins.
fn pick_latest<T, F>(candidates: Vec<T>, created_at: F) -> Option<T>
where
    F: Fn(&T) -> Option<u64>,
{
    if candidates.iter().all(|c| created_at(c).is_some()) {
        candidates
            .into_iter()
            .enumerate()
            .max_by_key(|(index, c)| (created_at(c), *index))
            .map(|(_, c)| c)
    } else {
        candidates.into_iter().last()
    }
}

pub fn latest_active_pairing(pairings: &[Pairing]) -> Option<Pairing> {
    let active: Vec<Pairing> = pairings.iter().filter(|p| p.active).cloned().collect();
    pick_latest(active, |p| p.created_at)
}

pub fn latest_active_session(sessions: &[Session], now: u64) -> Option<Session> {
    let active: Vec<Session> = sessions
        .iter()
        .filter(|s| s.is_active_at(now))
        .cloned()
        .collect();
    pick_latest(active, |s| s.created_at)
}

pub async fn select_latest_active_pairing(
    client: &dyn SignClient,
) -> Result<Option<Pairing>, ConnectError> {
    let pairings = client
        .get_all_pairings()
        .await
        .map_err(ConnectError::Client)?;
    let latest = latest_active_pairing(&pairings);
    tracing::debug!(
        "{} pairings known, latest active: {:?}",
        pairings.len(),
        latest.as_ref().map(|p| &p.topic)
    );
    Ok(latest)
}

pub async fn select_latest_active_session(
    client: &dyn SignClient,
    required: &RequiredNamespaces,
) -> Result<Option<Session>, ConnectError> {
    let sessions = client
        .find_sessions(required)
        .await
        .map_err(ConnectError::Client)?;
    let latest = latest_active_session(&sessions, now_secs());
    tracing::debug!(
        "{} matching sessions, latest active: {:?}",
        sessions.len(),
        latest.as_ref().map(|s| &s.topic)
    );
    Ok(latest)
}

/// An outstanding session proposal.
struct Proposal {
    uri: Option<String>,
    approval: Approval,
    notifications: broadcast::Receiver<ClientNotification>,
}

/// Resolves with the id of the first expired proposal. Stays pending if the
/// client stops publishing notifications.
async fn proposal_expired(notifications: &mut broadcast::Receiver<ClientNotification>) -> u64 {
    loop {
        match notifications.recv().await {
            Ok(ClientNotification::ProposalExpired { id }) => return id,
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return std::future::pending().await,
        }
    }
}

pub struct Reconciler {
    client: Arc<dyn SignClient>,
    required: RequiredNamespaces,
    settle: SettlePolicy,
    approval_timeout: Duration,
    presenter: Arc<dyn UriPresenter>,
}

impl Reconciler {
    pub fn new(
        client: Arc<dyn SignClient>,
        required: RequiredNamespaces,
        settle: SettlePolicy,
        approval_timeout: Duration,
        presenter: Arc<dyn UriPresenter>,
    ) -> Self {
        Self {
            client,
            required,
            settle,
            approval_timeout,
            presenter,
        }
    }

    pub fn client(&self) -> &Arc<dyn SignClient> {
        &self.client
    }

    pub fn required(&self) -> &RequiredNamespaces {
        &self.required
    }

    pub fn settle(&self) -> &SettlePolicy {
        &self.settle
    }

    /// Resolve a usable pairing and session, negotiating whatever is missing.
    ///
    /// Client failures propagate unchanged in kind; nothing is retried here.
    pub async fn reconcile(&self) -> Result<(Connection, ReconcilePath), ConnectError> {
        let Some(pairing) = select_latest_active_pairing(self.client.as_ref()).await? else {
            tracing::info!("No active pairing, creating new pairing and session");
            let connection = self.negotiate_pairing().await?;
            return Ok((connection, ReconcilePath::NewPairing));
        };

        match select_latest_active_session(self.client.as_ref(), &self.required).await? {
            Some(session) => {
                tracing::info!(
                    "Found pairing {} and session {}, already connected",
                    pairing.topic,
                    session.topic
                );
                Ok((Connection { pairing, session }, ReconcilePath::Reused))
            }
            None => {
                tracing::info!("Creating new session on pairing {}", pairing.topic);
                let session = self.negotiate_session(&pairing).await?;
                Ok((Connection { pairing, session }, ReconcilePath::NewSession))
            }
        }
    }

    async fn propose(&self, options: ConnectOptions) -> Result<Proposal, ConnectError> {
        // Subscribe first so an expiry raised while connecting is not missed
        let notifications = self.client.subscribe();
        let response = self
            .client
            .connect(options)
            .await
            .map_err(|e| ConnectError::Negotiation(e.to_string()))?;
        Ok(Proposal {
            uri: response.uri,
            approval: response.approval,
            notifications,
        })
    }

    async fn wait_for_approval(&self, proposal: Proposal) -> Result<Session, ConnectError> {
        let Proposal {
            approval,
            mut notifications,
            ..
        } = proposal;

        let answered = tokio::select! {
            answered = tokio::time::timeout(self.approval_timeout, approval.wait()) => answered,
            id = proposal_expired(&mut notifications) => {
                tracing::info!("Proposal {} expired before the wallet answered", id);
                return Err(ConnectError::Negotiation(
                    "Session proposal expired".to_string(),
                ));
            }
        };

        match answered {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => {
                tracing::error!("Error approving: {}", e);
                Err(ConnectError::Negotiation(e.to_string()))
            }
            Err(_) => Err(ConnectError::Negotiation(format!(
                "Wallet did not answer within {:?}",
                self.approval_timeout
            ))),
        }
    }

    async fn negotiate_pairing(&self) -> Result<Connection, ConnectError> {
        let mut proposal = self
            .propose(ConnectOptions {
                pairing_topic: None,
                required_namespaces: self.required.clone(),
            })
            .await?;

        let Some(uri) = proposal.uri.take() else {
            return Err(ConnectError::Negotiation(
                "Couldn't generate URI on new session or topic".to_string(),
            ));
        };
        tracing::info!("Generated uri {}", uri);

        self.presenter
            .present(&uri)
            .map_err(|e| ConnectError::Negotiation(format!("Could not present URI: {}", e)))?;
        let approved = self.wait_for_approval(proposal).await;
        self.presenter.dismiss();
        let session = approved?;
        tracing::info!("Session {} approved", session.topic);

        let client = self.client.as_ref();
        let pairing_topic = session.pairing_topic.as_str();
        let pairing = wait_until(&self.settle, "pairing", || async move {
            Ok(select_latest_active_pairing(client)
                .await?
                .filter(|p| p.topic == pairing_topic))
        })
        .await?;

        Ok(Connection { pairing, session })
    }

    async fn negotiate_session(&self, pairing: &Pairing) -> Result<Session, ConnectError> {
        let proposal = self
            .propose(ConnectOptions {
                pairing_topic: Some(pairing.topic.clone()),
                required_namespaces: self.required.clone(),
            })
            .await?;
        let approved = self.wait_for_approval(proposal).await?;

        let client = self.client.as_ref();
        let required = &self.required;
        let topic = approved.topic.as_str();
        let session = wait_until(&self.settle, "session", || async move {
            Ok(select_latest_active_session(client, required)
                .await?
                .filter(|s| s.topic == topic))
        })
        .await?;

        tracing::info!("New session {}", session.topic);
        Ok(session)
    }
}
