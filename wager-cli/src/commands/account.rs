use anyhow::{bail, Result};
use clap::Subcommand;
use wager_core::{from_nano, to_nano, Balance, Player, SqliteLedger};

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Credit an account
    Deposit {
        /// Account identifier
        account: String,
        /// Amount in whole units
        amount: f64,
    },
    /// Show an account's balance
    Balance {
        /// Account identifier
        account: String,
    },
}

pub async fn handle_account_command(cmd: AccountCommands, ledger: &SqliteLedger) -> Result<()> {
    match cmd {
        AccountCommands::Deposit { account, amount } => {
            let nano = to_nano(amount);
            if nano == 0 {
                bail!("Deposit amount must be positive, got {}", amount);
            }

            let account = Player::new(account);
            let balance = ledger.deposit(&account, nano).await?;

            println!("Deposited {} to '{}'", amount, account);
            print_balance(&account, &balance);
        }

        AccountCommands::Balance { account } => {
            let account = Player::new(account);
            let balance = ledger.balance(&account).await?;
            print_balance(&account, &balance);
        }
    }

    Ok(())
}

fn print_balance(account: &Player, balance: &Balance) {
    println!("Balance of '{}':", account);
    println!("  Total: {}", from_nano(balance.total));
    println!("  Locked: {}", from_nano(balance.locked as i64));
    println!("  Available: {}", from_nano(balance.available));
}
