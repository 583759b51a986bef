use anyhow::Context;
use clearnode::core::config::ConfigError;
use clearnode::{ClientBuilder, ClientConfig, ClientEvent};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // CLEARNODE_URL, CLEARNODE_WALLET_KEY, CLEARNODE_COUNTERPARTY, ...
    let config = ClientConfig::from_env_auto("CLEARNODE").context("loading configuration")?;
    if !config.has_wallet_key() {
        let missing = ConfigError::MissingEnvironmentVariable("CLEARNODE_WALLET_KEY".to_string());
        return Err(missing.into());
    }

    let endpoint = config.endpoint.clone();
    let mut client = ClientBuilder::new(config)
        .build()
        .context("building client")?;
    let mut events = client.subscribe();
    let (handle, task) = client.spawn();

    println!("Connecting to {}...", endpoint);
    handle.connect().await.context("connecting")?;

    let wait = tokio::time::sleep(Duration::from_secs(30));
    tokio::pin!(wait);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Authenticated) => {
                    println!("Authenticated");
                    handle.fetch_balances(None).await.context("requesting balances")?;
                }
                Some(ClientEvent::BalanceUpdated(balance)) => {
                    println!("Balance: {} {}", balance.amount, balance.asset);
                    break;
                }
                Some(ClientEvent::AuthFailed(reason)) => {
                    println!("Authentication failed: {}", reason);
                    break;
                }
                Some(other) => println!("Event: {:?}", other),
                None => break,
            },
            () = &mut wait => {
                println!("Timed out waiting for the ClearNode");
                break;
            }
        }
    }

    if let Ok(Some(id)) = handle.app_session_id().await {
        println!("Tracked application session: {}", id);
    }

    handle.shutdown().await.ok();
    task.await.context("client task")?;
    Ok(())
}
