use super::{format_time, parse_party, Session};
use clap::Subcommand;
use rochambeau_core::{Amount, Choice, WagerId};
use rochambeau_escrow::{generate_secret, Outcome, Secret};

#[derive(Subcommand)]
pub enum ReclaimCommands {
    /// Recover an expired wager nobody countered
    Bettor {
        /// Bettor (address or label)
        bettor: String,
        /// Hand committed to
        #[arg(required_unless_present = "id")]
        choice: Option<String>,
        /// Secret (hex encoded)
        #[arg(required_unless_present = "id")]
        secret: Option<String>,
        /// Wager ID, for a wager the bettor placed but cannot reopen
        #[arg(long, conflicts_with_all = ["choice", "secret"])]
        id: Option<String>,
    },
    /// Collect a countered wager whose bettor never revealed
    Opponent {
        /// Opponent (address or label)
        opponent: String,
        /// Wager ID
        id: String,
    },
}

fn parse_choice(input: &str) -> anyhow::Result<Choice> {
    Ok(input.parse()?)
}

pub fn commit_choice(
    session: &Session,
    party: &str,
    choice: &str,
    secret: Option<String>,
) -> anyhow::Result<()> {
    let bettor = parse_party(party)?;
    let choice = parse_choice(choice)?;
    let secret = match secret {
        Some(hex) => hex.parse::<Secret>()?,
        None => generate_secret(),
    };

    let id = session.escrow.commit(choice, &secret, &bettor);

    println!("Commitment created for {}", bettor);
    println!("Wager ID: {}", id);
    println!("Secret:   {}", secret);
    println!();
    println!("Keep the secret and your choice private until you reveal.");
    println!("Place the wager with:");
    println!("rochambeau place {} {} <opponent> <deposit-sats>", party, id);

    Ok(())
}

pub async fn place_wager(
    session: &mut Session,
    party: &str,
    id: &str,
    opponent: &str,
    deposit: u64,
    expiry: u64,
) -> anyhow::Result<()> {
    let bettor = parse_party(party)?;
    let opponent = parse_party(opponent)?;
    let id: WagerId = id.parse()?;

    let wager = session
        .escrow
        .place(&bettor, &id, expiry, &opponent, Amount::from_sat(deposit))
        .await?;
    let price = wager.amount + session.escrow.commission().await?;

    println!("Wager placed!");
    println!("Wager ID: {}", id);
    println!("Stake: {} sats", wager.amount.to_sat());
    println!("Expires: {}", format_time(wager.expiry_at));
    println!();
    println!("The opponent counters with a deposit of {} sats:", price.to_sat());
    println!("rochambeau counter <opponent> {} <choice>", id);

    Ok(())
}

pub async fn counter_wager(
    session: &mut Session,
    party: &str,
    id: &str,
    choice: &str,
    deposit: Option<u64>,
) -> anyhow::Result<()> {
    let opponent = parse_party(party)?;
    let id: WagerId = id.parse()?;
    let choice = parse_choice(choice)?;

    let deposit = match deposit {
        Some(sats) => Amount::from_sat(sats),
        None => {
            let stake = session
                .escrow
                .wager(&id)
                .await?
                .map(|w| w.amount)
                .unwrap_or(Amount::ZERO);
            stake + session.escrow.commission().await?
        }
    };

    let wager = session.escrow.counter(&opponent, &id, choice, deposit).await?;

    println!("Countered wager {} with {}", id, choice);
    println!("Deposit: {} sats", deposit.to_sat());
    println!("Bettor must reveal before {}", format_time(wager.expiry_at));

    Ok(())
}

pub async fn verify_wager(
    session: &mut Session,
    party: &str,
    choice: &str,
    secret: &str,
) -> anyhow::Result<()> {
    let bettor = parse_party(party)?;
    let choice = parse_choice(choice)?;
    let secret: Secret = secret.parse()?;

    let settlement = session.escrow.verify(&bettor, choice, &secret).await?;

    println!("------ WAGER SETTLED ------");
    println!("Bettor:   {} played {}", settlement.bettor, settlement.bettor_choice);
    println!(
        "Opponent: {} played {}",
        settlement.opponent, settlement.opponent_choice
    );
    match settlement.outcome {
        Outcome::Tie => {
            println!("Tie! {} sats returned to each side", settlement.amount.to_sat());
        }
        Outcome::BettorWins | Outcome::OpponentWins => {
            let prize: u64 = settlement.credits.iter().map(|c| c.amount.to_sat()).sum();
            if let Some(winner) = settlement.winner() {
                println!("Winner: {}", winner);
            }
            println!("Prize: {} sats", prize);
        }
    }

    Ok(())
}

pub async fn reclaim_wager(session: &mut Session, cmd: ReclaimCommands) -> anyhow::Result<()> {
    let (claimant, amount) = match cmd {
        ReclaimCommands::Bettor {
            bettor,
            choice,
            secret,
            id,
        } => {
            let bettor = parse_party(&bettor)?;
            let amount = match (id, choice, secret) {
                (Some(id), _, _) => {
                    let id: WagerId = id.parse()?;
                    session.escrow.bettor_reclaim_by_id(&bettor, &id).await?
                }
                (None, Some(choice), Some(secret)) => {
                    let choice = parse_choice(&choice)?;
                    let secret: Secret = secret.parse()?;
                    session.escrow.bettor_reclaim(&bettor, choice, &secret).await?
                }
                _ => anyhow::bail!("give either --id or both the choice and the secret"),
            };
            (bettor, amount)
        }
        ReclaimCommands::Opponent { opponent, id } => {
            let opponent = parse_party(&opponent)?;
            let id: WagerId = id.parse()?;
            let amount = session.escrow.opponent_reclaim(&opponent, &id).await?;
            (opponent, amount)
        }
    };

    println!("Reclaimed {} sats for {}", amount.to_sat(), claimant);
    Ok(())
}
