use crate::clearnode::app_session::AppSessionProtocol;
use crate::clearnode::auth::AuthProtocol;
use crate::clearnode::client::{ClearNodeClient, ClientCore, SessionTerms};
use crate::clearnode::codec::RpcCodec;
use crate::clearnode::connection::{ChannelFactory, ConnectionManager};
use crate::clearnode::types::RequestIds;
use crate::core::config::ClientConfig;
use crate::core::errors::ClearNodeError;
use crate::core::kernel::signer::{LocalWallet, MessageSigner, SessionKeySigner, WalletSigner};
use crate::core::kernel::ws::{TungsteniteWs, WsSession};
use crate::core::storage::{DurableStore, FileStore, MemoryStore};
use crate::core::types::AuthRequest;
use std::sync::Arc;
use tracing::info;

/// Assembles a [`ClearNodeClient`] from a [`ClientConfig`]
///
/// Anything not supplied explicitly is derived from the config: the session
/// key (generated when absent), the wallet and the durable store.
pub struct ClientBuilder {
    config: ClientConfig,
    session_signer: Option<SessionKeySigner>,
    wallet: Option<Arc<dyn WalletSigner>>,
    store: Option<Arc<dyn DurableStore>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            session_signer: None,
            wallet: None,
            store: None,
        }
    }

    pub fn with_session_signer(mut self, signer: SessionKeySigner) -> Self {
        self.session_signer = Some(signer);
        self
    }

    pub fn with_wallet(mut self, wallet: Arc<dyn WalletSigner>) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Client over a real WebSocket
    pub fn build(self) -> Result<ClearNodeClient<TungsteniteWs<RpcCodec>>, ClearNodeError> {
        let ws_config = self.config.ws.clone();
        self.build_with_channel(Box::new(move |endpoint: &str| {
            TungsteniteWs::new(endpoint.to_string(), RpcCodec::new()).with_config(ws_config.clone())
        }))
    }

    /// Client over channels produced by `factory`
    pub fn build_with_channel<S>(
        self,
        factory: ChannelFactory<S>,
    ) -> Result<ClearNodeClient<S>, ClearNodeError>
    where
        S: WsSession<RpcCodec> + 'static,
    {
        let config = self.config;

        let session_signer = match (self.session_signer, config.session_key_hex()) {
            (Some(signer), _) => signer,
            (None, Some(key)) => SessionKeySigner::with_private_key(key)?,
            (None, None) => {
                let signer = SessionKeySigner::generate();
                info!(
                    participant = signer.address().unwrap_or_default(),
                    "generated session key"
                );
                signer
            }
        };
        let participant = session_signer
            .address()
            .ok_or_else(|| ClearNodeError::signing("session key has no address"))?
            .to_string();

        let wallet: Option<Arc<dyn WalletSigner>> = match (self.wallet, config.wallet_key_hex()) {
            (Some(wallet), _) => Some(wallet),
            (None, Some(key)) => Some(Arc::new(LocalWallet::with_private_key(key)?)),
            (None, None) => None,
        };

        let store: Arc<dyn DurableStore> = match (self.store, config.store_path.as_ref()) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileStore::open(path)?),
            (None, None) => Arc::new(MemoryStore::new()),
        };

        let request = AuthRequest {
            wallet: wallet
                .as_ref()
                .map(|wallet| wallet.address().to_string())
                .unwrap_or_default(),
            participant,
            app_name: config.app_name.clone(),
            expire: String::new(),
            scope: config.scope.clone(),
            application: config.application.clone(),
            allowances: config.allowances.clone(),
        };

        let ids = Arc::new(RequestIds::new());
        let signer: Arc<dyn MessageSigner> = Arc::new(session_signer);

        let auth = AuthProtocol::new(request, wallet, store.clone(), ids.clone())
            .with_token_ttl(config.token_ttl_secs);
        let sessions = AppSessionProtocol::new(
            config.asset.clone(),
            signer.clone(),
            store.clone(),
            ids.clone(),
        );
        let connection = ConnectionManager::new(config.endpoint.clone(), factory);

        let core = ClientCore::new(
            connection,
            auth,
            sessions,
            signer,
            store,
            ids,
            SessionTerms {
                counterparty: config.counterparty.clone(),
                escrow: config.escrow_amount,
            },
        );

        Ok(ClearNodeClient::new(core, config.ws, config.reconnect))
    }
}

/// Create a ClearNode client over a real WebSocket
pub fn build_client(
    config: ClientConfig,
) -> Result<ClearNodeClient<TungsteniteWs<RpcCodec>>, ClearNodeError> {
    ClientBuilder::new(config).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::DEFAULT_ENDPOINT;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn builds_from_default_config() {
        let client = build_client(ClientConfig::default()).unwrap();
        assert!(!client.is_authenticated());
        assert_eq!(client.core().connection().endpoint(), DEFAULT_ENDPOINT);
        assert_eq!(client.app_session_id().unwrap(), None);
    }

    #[test]
    fn rejects_bad_wallet_key() {
        let config = ClientConfig::default().wallet_key("not-hex");
        assert!(matches!(
            build_client(config),
            Err(ClearNodeError::Signing(_))
        ));
    }

    #[test]
    fn wallet_key_from_config_is_used() {
        let config = ClientConfig::default()
            .wallet_key(DEV_KEY)
            .counterparty("0x2222222222222222222222222222222222222222");
        assert!(build_client(config).is_ok());
    }
}
