use super::{parse_party, Session, DB_FILE};
use crate::config::CliConfig;
use clap::Subcommand;
use rochambeau_core::{Amount, LedgerStore, Storage};
use rochambeau_escrow::{CommitmentBinding, EscrowConfig, PayoutMode};
use std::path::Path;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Show or change the commission charged on every deposit
    Commission {
        /// Caller (must be the owner when changing)
        caller: String,
        /// New commission in satoshis
        sats: Option<u64>,
    },
    /// Stop accepting mutating operations
    Pause {
        /// Caller (must be the owner)
        caller: String,
    },
    /// Accept mutating operations again
    Resume {
        /// Caller (must be the owner)
        caller: String,
    },
}

pub struct InitOptions {
    pub owner: String,
    pub instance: Option<String>,
    pub commission: u64,
    pub max_expiry: u64,
    pub binding: CommitmentBinding,
    pub payout: PayoutMode,
    pub no_reveal_window: bool,
    pub force: bool,
}

/// Count wagers that still hold funds in the ledger under `data_dir`.
async fn live_wagers(data_dir: &Path) -> anyhow::Result<usize> {
    let db_path = data_dir.join(DB_FILE);
    if !db_path.exists() {
        return Ok(0);
    }
    let storage = Storage::new(&db_path).await?;
    let wagers = storage.list().await?;
    Ok(wagers.iter().filter(|(_, wager)| wager.is_live()).count())
}

pub async fn init_escrow(data_dir: &Path, opts: InitOptions) -> anyhow::Result<()> {
    if CliConfig::exists(data_dir) {
        if !opts.force {
            anyhow::bail!(
                "escrow already initialized at {} (use --force to overwrite)",
                data_dir.display()
            );
        }
        // a new instance or binding would strand their stakes
        let live = live_wagers(data_dir).await?;
        if live > 0 {
            anyhow::bail!(
                "refusing to reinitialize {}: {} live wager(s) still hold funds",
                data_dir.display(),
                live
            );
        }
    }

    let owner = parse_party(&opts.owner)?;
    let instance = match &opts.instance {
        Some(label) => parse_party(label)?,
        None => EscrowConfig::default().instance,
    };

    let base = if opts.no_reveal_window {
        EscrowConfig::without_reveal_window(instance)
    } else {
        EscrowConfig::new(instance)
    };
    let escrow = base
        .with_commission(Amount::from_sat(opts.commission))
        .with_max_expiry_delta(opts.max_expiry)
        .with_binding(opts.binding)
        .with_payout(opts.payout);
    escrow.validate()?;

    let config = CliConfig::new(escrow, owner);
    let mut session = Session::with_config(data_dir, config, None).await?;

    // the ledger keeps the commission from an earlier init
    let commission = Amount::from_sat(opts.commission);
    if session.escrow.commission().await? != commission {
        session.escrow.change_commission(&owner, commission).await?;
    }
    session.save_config()?;

    tracing::info!("Initialized escrow {} in {}", instance, data_dir.display());
    println!("Escrow initialized!");
    println!("Instance: {}", instance);
    println!("Owner: {}", owner);
    println!(
        "Commission: {} sats",
        session.escrow.commission().await?.to_sat()
    );
    println!("Max expiry: {} seconds", opts.max_expiry);
    println!("Payout: {:?}", session.escrow.payout_mode());

    Ok(())
}

pub async fn handle_admin_command(cmd: AdminCommands, session: &mut Session) -> anyhow::Result<()> {
    match cmd {
        AdminCommands::Commission { caller, sats } => {
            let caller = parse_party(&caller)?;
            match sats {
                Some(sats) => {
                    let old = session.escrow.commission().await?;
                    session
                        .escrow
                        .change_commission(&caller, Amount::from_sat(sats))
                        .await?;
                    println!("Commission changed: {} -> {} sats", old.to_sat(), sats);
                }
                None => {
                    println!(
                        "Commission: {} sats",
                        session.escrow.commission().await?.to_sat()
                    );
                }
            }
        }

        AdminCommands::Pause { caller } => {
            let caller = parse_party(&caller)?;
            session.gate.pause(&caller)?;
            session.config.paused = true;
            session.save_config()?;
            println!("Escrow paused");
        }

        AdminCommands::Resume { caller } => {
            let caller = parse_party(&caller)?;
            session.gate.resume(&caller)?;
            session.config.paused = false;
            session.save_config()?;
            println!("Escrow resumed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(owner: &str) -> InitOptions {
        InitOptions {
            owner: owner.to_string(),
            instance: None,
            commission: 10_000,
            max_expiry: 600,
            binding: CommitmentBinding::Bettor,
            payout: PayoutMode::Pull,
            no_reveal_window: false,
            force: false,
        }
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite() {
        let temp_dir = tempdir().unwrap();
        init_escrow(temp_dir.path(), options("house")).await.unwrap();
        assert!(init_escrow(temp_dir.path(), options("house")).await.is_err());

        let mut forced = options("house");
        forced.force = true;
        init_escrow(temp_dir.path(), forced).await.unwrap();
    }

    #[tokio::test]
    async fn test_forced_init_applies_new_commission() {
        let temp_dir = tempdir().unwrap();
        init_escrow(temp_dir.path(), options("house")).await.unwrap();

        let mut forced = options("house");
        forced.commission = 2_500;
        forced.force = true;
        init_escrow(temp_dir.path(), forced).await.unwrap();

        let session = Session::open(temp_dir.path(), None).await.unwrap();
        assert_eq!(
            session.escrow.commission().await.unwrap(),
            Amount::from_sat(2_500)
        );
    }

    #[tokio::test]
    async fn test_forced_init_refused_while_wagers_are_live() {
        let temp_dir = tempdir().unwrap();
        init_escrow(temp_dir.path(), options("house")).await.unwrap();

        let mut session = Session::open(temp_dir.path(), None).await.unwrap();
        let alice = parse_party("alice").unwrap();
        let bob = parse_party("bob").unwrap();
        let secret = rochambeau_escrow::generate_secret();
        let id = session
            .escrow
            .commit(rochambeau_core::Choice::Rock, &secret, &alice);
        session
            .escrow
            .place(&alice, &id, 60, &bob, Amount::from_sat(11_000))
            .await
            .unwrap();
        drop(session);

        let mut forced = options("house");
        forced.force = true;
        let err = init_escrow(temp_dir.path(), forced).await.unwrap_err();
        assert!(err.to_string().contains("live wager"));

        let session = Session::open(temp_dir.path(), None).await.unwrap();
        assert!(session.escrow.wager(&id).await.unwrap().unwrap().is_live());
    }

    #[tokio::test]
    async fn test_pause_persists_across_sessions() {
        let temp_dir = tempdir().unwrap();
        init_escrow(temp_dir.path(), options("house")).await.unwrap();

        let mut session = Session::open(temp_dir.path(), None).await.unwrap();
        let err = handle_admin_command(
            AdminCommands::Pause {
                caller: "mallory".to_string(),
            },
            &mut session,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not authorized"));

        handle_admin_command(
            AdminCommands::Pause {
                caller: "house".to_string(),
            },
            &mut session,
        )
        .await
        .unwrap();

        let session = Session::open(temp_dir.path(), None).await.unwrap();
        assert!(session.config.paused);
        assert!(!rochambeau_escrow::AccessGate::is_active(session.gate.as_ref()));
    }
}
