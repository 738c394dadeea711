//! CLI auth command handlers for login and listing.

use std::time::Duration;

use chrono::Utc;

use crate::auth::{AccountManager, DeviceFlowOutcome};
use crate::config::GraphConfig;

/// Handle `graphkit auth login`.
pub async fn handle_login(config: &GraphConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manager = AccountManager::from_config(config)?;
    let mut flow = manager.begin_device_flow().await?;

    match &flow.message {
        Some(message) => println!("{message}"),
        None => {
            println!("Visit: {}", flow.verification_uri);
            println!("Enter code: {}", flow.user_code);
        }
    }
    println!("Waiting for authorization...");

    loop {
        tokio::time::sleep(Duration::from_secs(flow.interval_secs)).await;
        if flow.is_expired(Utc::now()) {
            return Err("device code expired, please try again".into());
        }
        match manager.complete_device_flow(&flow).await? {
            DeviceFlowOutcome::Authenticated(account) => {
                println!("Signed in as {} ({})", account.username, account.account_id);
                return Ok(());
            }
            // A slowed-down interval applies to every later poll.
            DeviceFlowOutcome::Pending { retry_after } => {
                flow.interval_secs = retry_after.as_secs();
            }
        }
    }
}

/// Handle `graphkit auth list`.
pub async fn handle_list(config: &GraphConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manager = AccountManager::from_config(config)?;
    let accounts = manager.list_accounts();
    if accounts.is_empty() {
        println!("No accounts signed in. Run `graphkit auth login`.");
        return Ok(());
    }
    for account in accounts {
        println!("{}\t{}", account.account_id, account.username);
    }
    Ok(())
}
