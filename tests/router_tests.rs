mod common;

use clearnode::clearnode::{ClientEvent, Dispatch};
use clearnode::core::errors::ClearNodeError;
use clearnode::core::kernel::{ChannelState, ReconnectPolicy};
use clearnode::core::storage::MemoryStore;
use clearnode::core::types::Balance;
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn balance(asset: &str, amount: &str) -> Balance {
    Balance {
        asset: asset.to_string(),
        amount: amount.to_string(),
    }
}

#[cfg(test)]
mod router_tests {
    use super::*;

    #[tokio::test]
    async fn test_balances_project_configured_asset() {
        let mut h = harness();
        let mut events = h.client.subscribe();

        let listing = response(
            "get_ledger_balances",
            json!([[{ "asset": "usdc", "amount": "12.5" }, { "asset": "eth", "amount": "1" }]]),
        );
        assert!(h.client.handle_message(&listing.to_string()).await.is_handled());
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::BalanceUpdated(balance("usdc", "12.5")))
        );

        let without_usdc = response(
            "get_ledger_balances",
            json!([{ "asset": "eth", "amount": "1" }]),
        );
        h.client.handle_message(&without_usdc.to_string()).await;
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::BalanceUpdated(balance("usdc", "0")))
        );
    }

    #[tokio::test]
    async fn test_balance_request_is_signed_for_wallet() {
        let mut h = harness();
        authenticate(&mut h).await;

        h.client.fetch_balances(None).await.unwrap();
        let frame = h.network.last_sent();
        assert_eq!(frame["req"][1], "get_ledger_balances");
        assert_eq!(frame["req"][2], json!([{ "account": WALLET_ADDRESS }]));
        assert_eq!(frame["sig"].as_array().unwrap().len(), 1);

        h.client.fetch_balances(Some(COUNTERPARTY)).await.unwrap();
        assert_eq!(
            h.network.last_sent()["req"][2][0]["account"],
            COUNTERPARTY
        );
    }

    #[tokio::test]
    async fn test_malformed_frames_do_not_stop_routing() {
        let mut h = harness();
        h.client.connect().await.unwrap();

        for garbage in [
            "not json at all",
            r#"{"unexpected": true}"#,
            r#"{"res": [1, "auth_challenge"]}"#,
            r#"{"res": [1, "auth_challenge", [{"wrong": "shape"}], 0]}"#,
        ] {
            let dispatch = h.client.handle_message(garbage).await;
            assert!(
                matches!(dispatch, Dispatch::Dropped(ClearNodeError::MalformedFrame(_))),
                "{} should be dropped",
                garbage
            );
        }

        let dispatch = h
            .client
            .handle_message(&challenge("still-alive").to_string())
            .await;
        assert!(dispatch.is_handled());
        assert_eq!(h.network.last_sent()["req"][1], "auth_verify");
    }

    #[tokio::test]
    async fn test_pong_and_unknown_methods_are_ignored() {
        let mut h = harness();
        h.client.connect().await.unwrap();

        for method in ["pong", "ping", "assets", "bu"] {
            let frame = response(method, json!([]));
            assert!(matches!(
                h.client.handle_message(&frame.to_string()).await,
                Dispatch::Ignored
            ));
        }
        assert_eq!(h.network.sent_methods(), vec!["auth_request"]);
    }

    #[tokio::test]
    async fn test_server_error_after_auth_is_forwarded() {
        let mut h = harness();
        let mut events = h.client.subscribe();
        authenticate(&mut h).await;

        let frame = response("error", json!({ "error": "insufficient funds" }));
        assert!(h.client.handle_message(&frame.to_string()).await.is_handled());

        assert!(h.client.is_authenticated());
        assert_eq!(events.recv().await, Some(ClientEvent::Authenticated));
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::ServerError("insufficient funds".to_string()))
        );
    }

    #[tokio::test]
    async fn test_event_loop_drives_handshake_and_releases_channel() {
        let h = harness();
        let network = h.network.clone();
        let mut client = h.client;
        let mut events = client.subscribe();
        let (handle, task) = client.spawn();

        handle.connect().await.unwrap();
        assert_eq!(network.sent_methods(), vec!["auth_request"]);

        network.push(challenge("loop-challenge"));
        network.push(response("not_a_method", json!([])));
        network.push(verify_success("loop-token"));

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no event from the event loop");
        assert_eq!(event, Some(ClientEvent::Authenticated));
        assert!(handle.is_authenticated().await.unwrap());

        handle.fetch_balances(None).await.unwrap();
        network.push(response(
            "get_ledger_balances",
            json!([{ "asset": "usdc", "amount": "3" }]),
        ));
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no balance event");
        assert_eq!(event, Some(ClientEvent::BalanceUpdated(balance("usdc", "3"))));

        handle.shutdown().await.unwrap();
        timeout(Duration::from_secs(5), task)
            .await
            .expect("event loop did not stop")
            .unwrap();
        assert_eq!(network.closes(), 1);

        assert!(matches!(
            handle.connect().await,
            Err(ClearNodeError::ClientStopped)
        ));
    }

    #[tokio::test]
    async fn test_event_loop_reconnects_dead_channel_with_policy() {
        let mut config = test_config();
        config.ws.keepalive_interval_ms = 20;
        config.reconnect = ReconnectPolicy::default()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(10));

        let h = harness_from(config, Arc::new(MemoryStore::new()), true);
        let network = h.network.clone();
        let mut client = h.client;
        let mut events = client.subscribe();
        let (handle, task) = client.spawn();

        handle.connect().await.unwrap();
        network.set_state(ChannelState::Closed);

        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("channel loss was not noticed");
        assert_eq!(event, Some(ClientEvent::ChannelLost));

        timeout(Duration::from_secs(5), async {
            while network.connects() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no reconnect attempt");

        // Unauthenticated before the drop, so the full handshake starts over
        let handshakes = network
            .sent_methods()
            .into_iter()
            .filter(|method| method == "auth_request")
            .count();
        assert_eq!(handshakes, 2);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_are_served_during_reconnect_backoff() {
        let mut config = test_config();
        config.ws.keepalive_interval_ms = 20;
        config.reconnect = ReconnectPolicy::default()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_secs(3));

        let h = harness_from(config, Arc::new(MemoryStore::new()), true);
        let network = h.network.clone();
        let mut client = h.client;
        let mut events = client.subscribe();
        let (handle, task) = client.spawn();

        handle.connect().await.unwrap();
        network.set_state(ChannelState::Closed);
        let event = timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("channel loss was not noticed");
        assert_eq!(event, Some(ClientEvent::ChannelLost));

        let answer = timeout(Duration::from_millis(500), handle.is_authenticated())
            .await
            .expect("event loop blocked while waiting to reconnect");
        assert!(!answer.unwrap());

        handle.shutdown().await.unwrap();
        timeout(Duration::from_millis(500), task)
            .await
            .expect("shutdown waited for the reconnect schedule")
            .unwrap();
        assert_eq!(network.connects(), 1);
    }
}
