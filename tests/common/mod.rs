#![allow(dead_code)]

use async_trait::async_trait;
use clearnode::clearnode::{ChannelFactory, ClearNodeClient, ClientBuilder, RpcCodec};
use clearnode::core::config::ClientConfig;
use clearnode::core::errors::ClearNodeError;
use clearnode::core::kernel::{
    ChannelState, LocalWallet, SessionKeySigner, TypedData, WalletSigner, WsSession,
};
use clearnode::core::storage::{DurableStore, MemoryStore};
use clearnode::core::types::Allowance;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

// First two Hardhat development accounts
pub const WALLET_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const WALLET_ADDRESS: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const SESSION_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const COUNTERPARTY: &str = "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc";

#[derive(Default)]
struct ChannelLog {
    sent: Vec<Value>,
    state: Option<ChannelState>,
    connects: usize,
    closes: usize,
    fail_connect: bool,
}

/// Test-side view of every channel the client opens
#[derive(Clone)]
pub struct MockNetwork {
    log: Arc<Mutex<ChannelLog>>,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            log: Arc::new(Mutex::new(ChannelLog::default())),
            inbound_tx,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        }
    }

    pub fn factory(&self) -> ChannelFactory<MockChannel> {
        let network = self.clone();
        Box::new(move |_endpoint: &str| MockChannel {
            network: network.clone(),
            codec: RpcCodec::new(),
        })
    }

    pub fn sent(&self) -> Vec<Value> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|frame| frame["req"][1].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn last_sent(&self) -> Value {
        self.sent().last().cloned().expect("nothing was sent")
    }

    pub fn set_state(&self, state: ChannelState) {
        self.log.lock().unwrap().state = Some(state);
    }

    pub fn connects(&self) -> usize {
        self.log.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }

    pub fn fail_next_connect(&self) {
        self.log.lock().unwrap().fail_connect = true;
    }

    /// Queue a frame for the client's read loop
    pub fn push(&self, frame: Value) {
        self.inbound_tx
            .send(Message::Text(frame.to_string()))
            .expect("inbound receiver dropped");
    }
}

pub struct MockChannel {
    network: MockNetwork,
    codec: RpcCodec,
}

#[async_trait]
impl WsSession<RpcCodec> for MockChannel {
    async fn connect(&mut self) -> Result<(), ClearNodeError> {
        let mut log = self.network.log.lock().unwrap();
        if log.fail_connect {
            log.fail_connect = false;
            log.state = Some(ChannelState::Closed);
            return Err(ClearNodeError::NetworkError("refused".to_string()));
        }
        log.connects += 1;
        log.state = Some(ChannelState::Open);
        Ok(())
    }

    async fn send_raw(&mut self, msg: Message) -> Result<(), ClearNodeError> {
        let mut log = self.network.log.lock().unwrap();
        if log.state != Some(ChannelState::Open) {
            return Err(ClearNodeError::ChannelNotReady);
        }
        if let Message::Text(text) = msg {
            log.sent.push(serde_json::from_str(&text)?);
        }
        Ok(())
    }

    async fn next_raw(&mut self) -> Option<Result<Message, ClearNodeError>> {
        let mut inbound = self.network.inbound_rx.lock().await;
        inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ClearNodeError> {
        let mut log = self.network.log.lock().unwrap();
        log.closes += 1;
        log.state = Some(ChannelState::Closed);
        Ok(())
    }

    fn state(&self) -> ChannelState {
        self.network
            .log
            .lock()
            .unwrap()
            .state
            .unwrap_or(ChannelState::Closed)
    }

    fn codec(&self) -> &RpcCodec {
        &self.codec
    }
}

/// Wallet that remembers every typed-data payload it signed
pub struct RecordingWallet {
    inner: LocalWallet,
    pub signed: Mutex<Vec<TypedData>>,
}

impl RecordingWallet {
    pub fn new() -> Self {
        Self {
            inner: LocalWallet::with_private_key(WALLET_KEY).unwrap(),
            signed: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl WalletSigner for RecordingWallet {
    fn address(&self) -> &str {
        self.inner.address()
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<String, ClearNodeError> {
        self.signed.lock().unwrap().push(data.clone());
        self.inner.sign_typed_data(data).await
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new("wss://clearnode.test/ws")
        .counterparty(COUNTERPARTY)
        .allowances(vec![Allowance::new("usdc", "100")])
}

pub struct Harness {
    pub client: ClearNodeClient<MockChannel>,
    pub network: MockNetwork,
    pub store: Arc<dyn DurableStore>,
    pub wallet: Option<Arc<RecordingWallet>>,
}

pub fn harness_with(store: Arc<dyn DurableStore>, with_wallet: bool) -> Harness {
    harness_from(test_config(), store, with_wallet)
}

pub fn harness_from(
    config: ClientConfig,
    store: Arc<dyn DurableStore>,
    with_wallet: bool,
) -> Harness {
    let network = MockNetwork::new();
    let mut builder = ClientBuilder::new(config)
        .with_session_signer(SessionKeySigner::with_private_key(SESSION_KEY).unwrap())
        .with_store(store.clone());

    let wallet = with_wallet.then(|| Arc::new(RecordingWallet::new()));
    if let Some(wallet) = &wallet {
        builder = builder.with_wallet(wallet.clone());
    }

    let client = builder.build_with_channel(network.factory()).unwrap();
    Harness {
        client,
        network,
        store,
        wallet,
    }
}

pub fn harness() -> Harness {
    harness_with(Arc::new(MemoryStore::new()), true)
}

pub fn response(method: &str, params: Value) -> Value {
    response_to(1, method, params)
}

/// Response echoing the id of the request it answers
pub fn response_to(request_id: u64, method: &str, params: Value) -> Value {
    json!({ "res": [request_id, method, params, 1_700_000_000_000u64], "sig": [] })
}

pub fn challenge(message: &str) -> Value {
    response("auth_challenge", json!([{ "challenge_message": message }]))
}

pub fn verify_success(token: &str) -> Value {
    response(
        "auth_verify",
        json!([{ "success": true, "jwtToken": token, "address": WALLET_ADDRESS }]),
    )
}

/// Connect and complete the full handshake
pub async fn authenticate(harness: &mut Harness) {
    harness.client.connect().await.unwrap();
    harness
        .client
        .handle_message(&challenge("a9d5b4fd").to_string())
        .await;
    harness
        .client
        .handle_message(&verify_success("header.payload.sig").to_string())
        .await;
    assert!(harness.client.is_authenticated());
}
