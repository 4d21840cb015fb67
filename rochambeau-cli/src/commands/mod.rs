pub mod admin;
pub mod balance;
pub mod wager;

pub use admin::{handle_admin_command, init_escrow, AdminCommands, InitOptions};
pub use balance::{list_wagers, show_balance, show_status, show_wager, withdraw};
pub use wager::{
    commit_choice, counter_wager, place_wager, reclaim_wager, verify_wager, ReclaimCommands,
};

use crate::config::CliConfig;
use anyhow::Context;
use async_trait::async_trait;
use rochambeau_core::{Address, Amount, Clock, LedgerStore, ManualClock, Storage, SystemClock};
use rochambeau_escrow::{
    Collaborators, EventSink, OwnerGate, ValueTransfer, WagerEscrow, WagerEvent,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub(crate) const DB_FILE: &str = "rochambeau.db";

/// Parse a party: a 40-hex-digit address, or any other label hashed into one.
pub fn parse_party(input: &str) -> anyhow::Result<Address> {
    let raw = input.strip_prefix("0x").unwrap_or(input);
    if raw.len() == 40 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(raw.parse()?);
    }

    let label = input.trim();
    if label.is_empty() {
        anyhow::bail!("party must not be empty");
    }

    let digest = Sha256::new()
        .chain_update(b"rochambeau/party/")
        .chain_update(label.as_bytes())
        .finalize();
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest[..20]);
    Ok(Address::new(bytes))
}

/// Local play has no external rail: value leaving the escrow is reported.
pub struct ConsoleTransfer;

#[async_trait]
impl ValueTransfer for ConsoleTransfer {
    async fn transfer(&self, to: &Address, amount: Amount) -> rochambeau_escrow::Result<()> {
        tracing::info!("Paying {} sats to {}", amount.to_sat(), to);
        println!("Paid {} sats to {}", amount.to_sat(), to);
        Ok(())
    }
}

/// Mirrors escrow events to the log as JSON.
pub struct LoggedEvents;

impl EventSink for LoggedEvents {
    fn emit(&self, event: WagerEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => tracing::debug!("event {}", json),
            Err(e) => tracing::warn!("Failed to encode event: {}", e),
        }
    }
}

/// An opened escrow bound to one data directory.
pub struct Session {
    pub escrow: WagerEscrow,
    pub gate: Arc<OwnerGate>,
    pub config: CliConfig,
    pub data_dir: PathBuf,
}

impl Session {
    pub async fn open(data_dir: &Path, at: Option<u64>) -> anyhow::Result<Self> {
        let config = CliConfig::load(data_dir)?;
        Self::with_config(data_dir, config, at).await
    }

    pub async fn with_config(
        data_dir: &Path,
        config: CliConfig,
        at: Option<u64>,
    ) -> anyhow::Result<Self> {
        let db_path = data_dir.join(DB_FILE);
        let store: Arc<dyn LedgerStore> = Arc::new(
            Storage::new(&db_path)
                .await
                .with_context(|| format!("failed to open {}", db_path.display()))?,
        );

        let clock: Arc<dyn Clock> = match at {
            Some(now) => Arc::new(ManualClock::new(now)),
            None => Arc::new(SystemClock),
        };

        let gate = Arc::new(if config.paused {
            OwnerGate::paused(config.owner)
        } else {
            OwnerGate::new(config.owner)
        });

        let escrow = WagerEscrow::new(
            config.escrow.clone(),
            Collaborators {
                store,
                clock,
                gate: gate.clone(),
                rail: Arc::new(ConsoleTransfer),
                events: Arc::new(LoggedEvents),
            },
        )
        .await?;

        Ok(Self {
            escrow,
            gate,
            config,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn save_config(&self) -> anyhow::Result<()> {
        self.config.save(&self.data_dir)
    }
}

pub fn format_time(unix: u64) -> String {
    i64::try_from(unix)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| unix.to_string())
}
