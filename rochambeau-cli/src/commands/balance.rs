use super::{format_time, parse_party, Session};
use comfy_table::{presets::UTF8_FULL, Table};
use rochambeau_core::{Amount, Wager, WagerId};
use rochambeau_escrow::reclaim::{reclaim_right, ReclaimRight};

fn wager_state(wager: &Wager, now: u64) -> &'static str {
    if !wager.is_live() {
        return "finished";
    }
    match (reclaim_right(wager), wager.is_expired(now)) {
        (ReclaimRight::Bettor, false) => "open",
        (ReclaimRight::Bettor, true) => "expired, bettor may reclaim",
        (ReclaimRight::Opponent, false) => "countered, awaiting reveal",
        (ReclaimRight::Opponent, true) => "expired, opponent may reclaim",
    }
}

pub async fn withdraw(session: &mut Session, party: &str, sats: Option<u64>) -> anyhow::Result<()> {
    let who = parse_party(party)?;
    let amount = match sats {
        Some(sats) => Amount::from_sat(sats),
        None => session.escrow.balance_of(&who).await?,
    };

    session.escrow.withdraw(&who, amount).await?;

    println!("Withdrew {} sats for {}", amount.to_sat(), who);
    println!(
        "Remaining balance: {} sats",
        session.escrow.balance_of(&who).await?.to_sat()
    );
    Ok(())
}

pub async fn show_balance(session: &Session, party: &str) -> anyhow::Result<()> {
    let who = parse_party(party)?;
    let balance = session.escrow.balance_of(&who).await?;

    println!("Balance for {}:", who);
    println!(
        "  Withdrawable: {} sats ({:.8} BTC)",
        balance.to_sat(),
        balance.to_btc()
    );
    Ok(())
}

pub async fn show_wager(session: &Session, id: &str, now: u64) -> anyhow::Result<()> {
    let id: WagerId = id.parse()?;
    let wager = session
        .escrow
        .wager(&id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no wager with id {}", id))?;

    println!("Wager: {}", id);
    println!("═══════════════════════════════════");
    println!("State: {}", wager_state(&wager, now));
    println!("Bettor: {}", wager.bettor);
    if wager.is_live() {
        println!("Opponent: {}", wager.opponent);
        println!("Stake: {} sats", wager.amount.to_sat());
    }
    if let Some(choice) = wager.counter_choice {
        println!("Counter choice: {}", choice);
    }
    println!("Expires: {}", format_time(wager.expiry_at));
    Ok(())
}

pub async fn list_wagers(session: &Session, now: u64, all: bool) -> anyhow::Result<()> {
    let wagers = session.escrow.wagers().await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["ID", "Bettor", "Opponent", "Stake (sats)", "Expires", "State"]);

    let mut shown = 0;
    for (id, wager) in wagers.iter().filter(|(_, w)| all || w.is_live()) {
        table.add_row(vec![
            id.short(),
            wager.bettor.to_string(),
            wager.opponent.to_string(),
            wager.amount.to_sat().to_string(),
            format_time(wager.expiry_at),
            wager_state(wager, now).to_string(),
        ]);
        shown += 1;
    }

    if shown == 0 {
        println!("No wagers found");
    } else {
        println!("{}", table);
    }
    Ok(())
}

pub async fn show_status(session: &Session, now: u64) -> anyhow::Result<()> {
    let config = session.escrow.config();
    let wagers = session.escrow.wagers().await?;
    let live = wagers.iter().filter(|(_, w)| w.is_live()).count();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Setting", "Value"]);
    table.add_row(vec!["Instance".to_string(), session.escrow.instance().to_string()]);
    table.add_row(vec!["Owner".to_string(), session.config.owner.to_string()]);
    table.add_row(vec![
        "State".to_string(),
        if session.config.paused { "paused" } else { "active" }.to_string(),
    ]);
    table.add_row(vec![
        "Commission".to_string(),
        format!("{} sats", session.escrow.commission().await?.to_sat()),
    ]);
    table.add_row(vec![
        "Max expiry".to_string(),
        format!("{} s", session.escrow.max_expiry_delta()),
    ]);
    table.add_row(vec![
        "Binding".to_string(),
        format!("{:?}", session.escrow.binding()),
    ]);
    table.add_row(vec![
        "Reveal window".to_string(),
        (config.extend_on_counter && config.reject_expired_counter).to_string(),
    ]);
    table.add_row(vec![
        "Payout".to_string(),
        format!("{:?}", session.escrow.payout_mode()),
    ]);
    table.add_row(vec![
        "House balance".to_string(),
        format!("{} sats", session.escrow.house_balance().await?.to_sat()),
    ]);
    table.add_row(vec!["Live wagers".to_string(), live.to_string()]);
    table.add_row(vec!["Clock".to_string(), format_time(now)]);

    println!("{}", table);
    Ok(())
}
