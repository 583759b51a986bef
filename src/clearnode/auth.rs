use crate::clearnode::types::{AuthChallenge, AuthVerifyResult, RequestIds, RpcMethod, RpcRequest};
use crate::core::errors::ClearNodeError;
use crate::core::kernel::eip712::{PolicyAllowance, PolicyMessage, TypedData};
use crate::core::kernel::signer::WalletSigner;
use crate::core::storage::{DurableStore, RECONNECT_TOKEN_KEY};
use crate::core::types::AuthRequest;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Idle,
    AwaitingChallenge,
    AwaitingVerify,
    Authenticated,
}

/// Challenge/response handshake with the ClearNode
///
/// A stored reconnection token short-circuits the handshake with
/// `auth_verify_jwt`; otherwise `auth_request` is sent and the returned
/// challenge is signed by the wallet as EIP-712 typed data.
pub struct AuthProtocol {
    state: AuthState,
    request: AuthRequest,
    wallet: Option<Arc<dyn WalletSigner>>,
    store: Arc<dyn DurableStore>,
    ids: Arc<RequestIds>,
    token_ttl_secs: Option<i64>,
    via_token: bool,
}

impl AuthProtocol {
    pub fn new(
        request: AuthRequest,
        wallet: Option<Arc<dyn WalletSigner>>,
        store: Arc<dyn DurableStore>,
        ids: Arc<RequestIds>,
    ) -> Self {
        Self {
            state: AuthState::Idle,
            request,
            wallet,
            store,
            ids,
            token_ttl_secs: None,
            via_token: false,
        }
    }

    /// Stamp each full handshake with `expire = now + ttl`
    pub fn with_token_ttl(mut self, ttl_secs: i64) -> Self {
        self.token_ttl_secs = Some(ttl_secs);
        self
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self.state,
            AuthState::AwaitingChallenge | AuthState::AwaitingVerify
        )
    }

    pub fn request(&self) -> &AuthRequest {
        &self.request
    }

    /// Forget the handshake; the channel it ran on is gone
    pub fn reset(&mut self) {
        self.state = AuthState::Idle;
        self.via_token = false;
    }

    /// First frame of the handshake for a freshly opened channel
    ///
    /// A stored token is always offered; only the server decides whether it
    /// is still good.
    #[instrument(skip(self))]
    pub fn begin(&mut self) -> Result<RpcRequest, ClearNodeError> {
        if let Some(token) = self.store.get(RECONNECT_TOKEN_KEY)? {
            debug!("reusing stored reconnection token");
            self.via_token = true;
            self.state = AuthState::AwaitingVerify;
            return Ok(self
                .ids
                .request(RpcMethod::AuthVerifyJwt, json!([{ "token": token }])));
        }

        if let Some(ttl) = self.token_ttl_secs {
            self.request.expire = (chrono::Utc::now().timestamp() + ttl).to_string();
        }

        let params = serde_json::to_value(&self.request)?;
        self.via_token = false;
        self.state = AuthState::AwaitingChallenge;
        Ok(self.ids.request(RpcMethod::AuthRequest, json!([params])))
    }

    /// Typed data the wallet signs for a challenge
    pub fn typed_data(&self, challenge: &str) -> TypedData {
        let request = &self.request;
        let message = PolicyMessage {
            challenge: challenge.to_string(),
            scope: request.scope.clone(),
            wallet: request.wallet.clone(),
            application: request.application.clone(),
            participant: request.participant.clone(),
            expire: request.expire.clone(),
            allowances: request
                .allowances
                .iter()
                .map(|allowance| PolicyAllowance {
                    asset: allowance.symbol.clone(),
                    amount: allowance.amount.clone(),
                })
                .collect(),
        };
        TypedData::new(request.app_name.clone(), message)
    }

    /// Sign a challenge; `None` when no handshake is waiting for one
    #[instrument(skip(self, challenge))]
    pub async fn on_challenge(
        &mut self,
        challenge: &AuthChallenge,
    ) -> Result<Option<RpcRequest>, ClearNodeError> {
        if self.state != AuthState::AwaitingChallenge {
            warn!(state = ?self.state, "ignoring challenge received outside the handshake");
            return Ok(None);
        }

        let Some(wallet) = self.wallet.clone() else {
            self.reset();
            return Err(ClearNodeError::signing("no wallet identity available"));
        };

        let typed_data = self.typed_data(&challenge.challenge_message);
        let signature = match wallet.sign_typed_data(&typed_data).await {
            Ok(signature) => signature,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        self.state = AuthState::AwaitingVerify;
        let frame = self
            .ids
            .request(
                RpcMethod::AuthVerify,
                json!([{ "challenge": challenge.challenge_message }]),
            )
            .with_signature(signature);
        Ok(Some(frame))
    }

    /// Apply the server's verdict; a rejection ends the handshake
    pub fn on_verify(&mut self, result: &AuthVerifyResult) -> Result<(), ClearNodeError> {
        if !result.success {
            let reason = result
                .error
                .clone()
                .unwrap_or_else(|| "verification rejected".to_string());

            if self.via_token {
                // Server no longer accepts the token; next connect starts over.
                self.store.delete(RECONNECT_TOKEN_KEY)?;
            }
            self.reset();
            return Err(ClearNodeError::HandshakeFailure(reason));
        }

        if let Some(token) = result.jwt_token.as_deref() {
            self.store.set(RECONNECT_TOKEN_KEY, token)?;
        }
        self.state = AuthState::Authenticated;
        self.via_token = false;
        info!("authenticated");
        Ok(())
    }

    /// Abort an in-flight handshake on a server error
    ///
    /// Returns the failure to surface, or `None` when no handshake was running.
    pub fn on_error(&mut self, error: &str) -> Option<ClearNodeError> {
        if !self.is_in_progress() {
            return None;
        }
        self.reset();
        Some(ClearNodeError::HandshakeFailure(error.to_string()))
    }
}
