use anyhow::{anyhow, Context};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::cli::presenter::TerminalPresenter;
use crate::client::{MemoryClient, WcStore};
use crate::connection::{
    latest_active_pairing, latest_active_session, ConnectionManagerHandle, ConnectionState,
    ManagerOptions, ReconcilePath,
};
use crate::core::{now_secs, Config, Reason, WalletInfo};
use crate::utils::Notice;
use crate::Result;

async fn start_manager(config: &Config, open: bool, watch: bool) -> Result<ConnectionManagerHandle> {
    let store = WcStore::new(config.store_file());
    let client = MemoryClient::open(config.demo.clone(), store.clone())
        .await?
        .with_project(config.project.clone());
    let presenter = TerminalPresenter::new(config.wallet.clone(), open);

    let mut options = ManagerOptions::from_config(config);
    if watch {
        options.watch_store = Some(store);
    }

    Ok(ConnectionManagerHandle::new(
        Arc::new(client),
        Arc::new(presenter),
        options,
    ))
}

async fn connect_quietly(manager: &ConnectionManagerHandle) -> Result<()> {
    let (connection, path) = manager.connect().await?;
    tracing::info!(
        "Using pairing {} and session {} ({:?})",
        connection.pairing.topic,
        connection.session.topic,
        path
    );
    Ok(())
}

fn print_wallet_info(info: &WalletInfo) {
    println!("👛 Address:   {}", info.address);
    println!("⛓️  Chain id:  {}", info.chain_id);
    println!("🌐 Node URL:  {}", info.node_url);
}

fn format_expiry(expiry: u64) -> String {
    chrono::DateTime::from_timestamp(expiry as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| expiry.to_string())
}

pub async fn connect(config: Config, open: bool) -> Result<()> {
    let manager = start_manager(&config, open, false).await?;

    let (connection, path) = manager.connect().await?;
    match path {
        ReconcilePath::Reused => println!("✅ Already connected"),
        ReconcilePath::NewSession => println!("✅ New session on existing pairing"),
        ReconcilePath::NewPairing => println!("✅ Paired with wallet"),
    }
    println!("📋 Pairing: {}", connection.pairing.topic);
    println!(
        "📋 Session: {} (expires {})",
        connection.session.topic,
        format_expiry(connection.session.expiry)
    );

    // Most dApps need the wallet info right after connecting
    let info = manager.get_info().await?;
    print_wallet_info(&info);
    Ok(())
}

pub async fn info(config: Config) -> Result<()> {
    let manager = start_manager(&config, false, false).await?;
    connect_quietly(&manager).await?;

    let info = manager.get_info().await?;
    print_wallet_info(&info);
    Ok(())
}

fn read_block(block: &str) -> Result<Value> {
    let text = match block.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("Failed to read account block from {}", path))?,
        None => block.to_string(),
    };
    serde_json::from_str(&text).context("Account block is not valid JSON")
}

pub async fn sign(config: Config, block: String) -> Result<()> {
    let account_block = read_block(&block)?;
    let manager = start_manager(&config, false, false).await?;
    connect_quietly(&manager).await?;

    let signature = manager.sign_transaction(account_block).await?;
    println!("{}", serde_json::to_string_pretty(&signature)?);
    Ok(())
}

pub async fn send_dummy(config: Config) -> Result<()> {
    let manager = start_manager(&config, false, false).await?;
    connect_quietly(&manager).await?;
    manager.get_info().await?;

    let account_block = manager.send_dummy_transaction().await?;
    Notice::success(format!("Sent! AccountBlock: {}", account_block)).show();
    Ok(())
}

pub async fn sign_dummy(config: Config) -> Result<()> {
    let manager = start_manager(&config, false, false).await?;
    connect_quietly(&manager).await?;
    manager.get_info().await?;

    let signature = manager.sign_dummy_transaction().await?;
    Notice::success(format!("Signed! Signature: {}", signature)).show();
    Ok(())
}

/// Reads the persisted store directly; no client is started.
pub async fn status(config: Config) -> Result<()> {
    let store = WcStore::new(config.store_file());
    let snapshot = store.load().await?;
    let sessions = snapshot.sessions_matching(&config.namespaces);
    let now = now_secs();

    let current_pairing = latest_active_pairing(&snapshot.pairings).map(|p| p.topic);
    let current_session = latest_active_session(&sessions, now).map(|s| s.topic);

    println!("📁 Store: {}", store.path().display());
    println!("\nPairings ({}):", snapshot.pairings.len());
    for pairing in &snapshot.pairings {
        let marker = if Some(&pairing.topic) == current_pairing.as_ref() { "*" } else { " " };
        let peer = pairing
            .peer_metadata
            .as_ref()
            .map(|m| m.name.as_str())
            .unwrap_or("-");
        println!(
            " {} {}  active={}  peer={}",
            marker, pairing.topic, pairing.active, peer
        );
    }

    println!("\nSessions ({}):", sessions.len());
    for session in &sessions {
        let marker = if Some(&session.topic) == current_session.as_ref() { "*" } else { " " };
        let state = if session.is_active_at(now) { "live" } else { "expired" };
        println!(
            " {} {}  {}  expires {}",
            marker,
            session.topic,
            state,
            format_expiry(session.expiry)
        );
    }

    let connected = !snapshot.pairings.is_empty() || !sessions.is_empty();
    println!(
        "\n{}",
        if connected { "🟢 Wallet connected" } else { "⚪ Wallet not connected" }
    );
    Ok(())
}

fn print_state_change(previous: &ConnectionState, current: &ConnectionState) {
    if previous.pairings.len() != current.pairings.len()
        || previous.sessions.len() != current.sessions.len()
    {
        println!(
            "🔄 {} pairings, {} sessions",
            current.pairings.len(),
            current.sessions.len()
        );
    }
    let new_events = current.events.len().saturating_sub(previous.events.len());
    for observed in current.events.iter().take(new_events).rev() {
        println!(
            "📨 [{}] {} {}",
            observed.received_at.format("%H:%M:%S"),
            observed.event.name,
            observed.event.data
        );
    }
    if previous.address != current.address && !current.address.is_empty() {
        println!("👛 Address: {}", current.address);
    }
    if previous.chain_id != current.chain_id {
        if let Some(chain_id) = current.chain_id {
            println!("⛓️  Chain id: {}", chain_id);
        }
    }
}

pub async fn watch(config: Config) -> Result<()> {
    let manager = start_manager(&config, false, true).await?;
    let mut state_rx = manager.watch_state();
    let mut previous = ConnectionState::default();

    println!("👀 Watching {} (Ctrl+C to stop)", config.store_file().display());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                Notice::info("Stopped watching").show();
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state_rx.borrow_and_update().clone();
                print_state_change(&previous, &current);
                previous = current;
            }
        }
    }
    Ok(())
}

pub async fn disconnect_session(
    config: Config,
    topic: Option<String>,
    message: Option<String>,
    data: Option<String>,
) -> Result<()> {
    let manager = start_manager(&config, false, false).await?;
    manager.refresh().await?;

    let topic = match topic {
        Some(topic) => topic,
        None => latest_active_session(&manager.snapshot().await?.sessions, now_secs())
            .map(|s| s.topic)
            .ok_or_else(|| anyhow!("No active session to disconnect"))?,
    };

    manager
        .disconnect_session(Some(topic.clone()), Reason::with_message(message, data))
        .await?;
    Notice::success(format!("Session {} disconnected", topic)).show();
    Ok(())
}

pub async fn disconnect_pairing(config: Config, topic: Option<String>) -> Result<()> {
    let manager = start_manager(&config, false, false).await?;
    manager.refresh().await?;

    let topic = match topic {
        Some(topic) => topic,
        None => latest_active_pairing(&manager.snapshot().await?.pairings)
            .map(|p| p.topic)
            .ok_or_else(|| anyhow!("No active pairing to disconnect"))?,
    };

    manager.disconnect_pairing(Some(topic.clone())).await?;
    Notice::success(format!("Pairing {} disconnected", topic)).show();
    Ok(())
}

pub async fn disconnect_all(
    config: Config,
    message: Option<String>,
    data: Option<String>,
) -> Result<()> {
    let manager = start_manager(&config, false, false).await?;
    let count = manager
        .disconnect_all(Reason::with_message(message, data))
        .await?;
    Notice::success(format!("Disconnected {} pairings", count)).show();
    Ok(())
}

pub fn show_config(config: &Config, init: bool) -> Result<()> {
    if init {
        config.save()?;
    }
    match Config::config_file() {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config directory available"),
    }
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
