use crate::clearnode::app_session::{AppSessionProtocol, PendingOp};
use crate::clearnode::auth::{AuthProtocol, AuthState};
use crate::clearnode::codec::RpcCodec;
use crate::clearnode::connection::{ConnectionManager, KeepaliveOutcome};
use crate::clearnode::router::{Dispatch, FrameHandler, MessageRouter};
use crate::clearnode::types::{
    AppSessionClosed, AppSessionCreated, AuthChallenge, AuthVerifyResult, RequestIds, RpcError,
    RpcMethod, RpcRequest,
};
use crate::core::errors::ClearNodeError;
use crate::core::kernel::signer::MessageSigner;
use crate::core::kernel::ws::{ReconnectPolicy, WsConfig, WsSession};
use crate::core::storage::{DurableStore, APP_SESSION_ID_KEY};
use crate::core::types::{Amount, AppSessionStatus, ApplicationSession, Balance, PayerIndex};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Notifications for the application driving the client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Authenticated,
    AuthFailed(String),
    /// Configured asset's entry from the latest ledger listing
    BalanceUpdated(Balance),
    AppSessionCreated(ApplicationSession),
    AppSessionClosed(ApplicationSession),
    /// The server answered a close with a status other than `closed`
    AppSessionCloseRejected(ApplicationSession),
    ServerError(String),
    ChannelLost,
}

/// Who the application session is opened with, and for how much
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTerms {
    pub counterparty: Option<String>,
    pub escrow: Amount,
}

/// Protocol state owned by the event loop
pub struct ClientCore<S> {
    connection: ConnectionManager<S>,
    auth: AuthProtocol,
    sessions: AppSessionProtocol,
    signer: Arc<dyn MessageSigner>,
    store: Arc<dyn DurableStore>,
    ids: Arc<RequestIds>,
    terms: SessionTerms,
    events: Option<mpsc::UnboundedSender<ClientEvent>>,
}

impl<S: WsSession<RpcCodec>> ClientCore<S> {
    pub fn new(
        connection: ConnectionManager<S>,
        auth: AuthProtocol,
        sessions: AppSessionProtocol,
        signer: Arc<dyn MessageSigner>,
        store: Arc<dyn DurableStore>,
        ids: Arc<RequestIds>,
        terms: SessionTerms,
    ) -> Self {
        Self {
            connection,
            auth,
            sessions,
            signer,
            store,
            ids,
            terms,
            events: None,
        }
    }

    fn emit(&mut self, event: ClientEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                debug!("event receiver dropped");
                self.events = None;
            }
        }
    }

    fn wallet_address(&self) -> Result<String, ClearNodeError> {
        let wallet = &self.auth.request().wallet;
        if wallet.is_empty() {
            return Err(ClearNodeError::InvalidParameters(
                "no wallet address configured".to_string(),
            ));
        }
        Ok(wallet.clone())
    }

    fn counterparty(&self) -> Result<String, ClearNodeError> {
        self.terms.counterparty.clone().ok_or_else(|| {
            ClearNodeError::InvalidParameters("no counterparty configured".to_string())
        })
    }

    fn signed(
        &self,
        method: RpcMethod,
        params: serde_json::Value,
    ) -> Result<RpcRequest, ClearNodeError> {
        self.ids.request(method, params).sign_with(self.signer.as_ref())
    }

    fn forget_channel_state(&mut self) {
        self.auth.reset();
        self.sessions.clear_pending();
    }

    /// Open a channel and start the handshake on it
    pub async fn connect(&mut self) -> Result<(), ClearNodeError> {
        self.forget_channel_state();
        self.connection.connect().await?;

        let frame = self.auth.begin()?;
        self.connection.send(&frame).await
    }

    pub async fn keepalive_tick(&mut self) -> Result<KeepaliveOutcome, ClearNodeError> {
        let ids = &self.ids;
        let signer = &self.signer;
        let outcome = self
            .connection
            .keepalive_tick(|| {
                ids.request(RpcMethod::Ping, json!([]))
                    .sign_with(signer.as_ref())
            })
            .await?;

        if outcome == KeepaliveOutcome::ChannelCleared {
            self.forget_channel_state();
            self.emit(ClientEvent::ChannelLost);
        }
        Ok(outcome)
    }

    /// Request the ledger balances of `account`, or of the wallet
    pub async fn fetch_balances(&mut self, account: Option<&str>) -> Result<(), ClearNodeError> {
        let account = match account {
            Some(account) => account.to_string(),
            None => self.wallet_address()?,
        };
        let frame = self.signed(
            RpcMethod::GetLedgerBalances,
            json!([{ "account": account }]),
        )?;
        self.connection.send(&frame).await
    }

    pub async fn create_application_session(&mut self) -> Result<(), ClearNodeError> {
        let wallet = self.wallet_address()?;
        let counterparty = self.counterparty()?;

        let frame = self
            .sessions
            .open_request(&wallet, &counterparty, self.terms.escrow)?;
        if let Err(e) = self.connection.send(&frame).await {
            self.sessions.clear_pending();
            return Err(e);
        }
        Ok(())
    }

    pub async fn close_application_session(
        &mut self,
        settlement: Amount,
        payer: PayerIndex,
    ) -> Result<(), ClearNodeError> {
        let wallet = self.wallet_address()?;
        let counterparty = self.counterparty()?;

        let frame = self
            .sessions
            .close_request(&wallet, &counterparty, settlement, payer)?;
        if let Err(e) = self.connection.send(&frame).await {
            self.sessions.clear_pending();
            return Err(e);
        }
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        self.connection.teardown().await;
        self.forget_channel_state();
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    pub fn app_session_id(&self) -> Result<Option<String>, ClearNodeError> {
        self.store.get(APP_SESSION_ID_KEY)
    }

    pub fn connection(&self) -> &ConnectionManager<S> {
        &self.connection
    }

    /// Create or close still waiting for its response
    pub fn pending_app_session(&self) -> Option<&PendingOp> {
        self.sessions.pending()
    }
}

#[async_trait]
impl<S: WsSession<RpcCodec>> FrameHandler for ClientCore<S> {
    async fn on_auth_challenge(&mut self, challenge: AuthChallenge) -> Result<(), ClearNodeError> {
        match self.auth.on_challenge(&challenge).await {
            Ok(Some(frame)) => self.connection.send(&frame).await,
            Ok(None) => Ok(()),
            Err(e) => {
                self.emit(ClientEvent::AuthFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn on_auth_verify(&mut self, result: AuthVerifyResult) -> Result<(), ClearNodeError> {
        match self.auth.on_verify(&result) {
            Ok(()) => {
                self.emit(ClientEvent::Authenticated);
                Ok(())
            }
            Err(e) => {
                self.emit(ClientEvent::AuthFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn on_error(&mut self, error: RpcError) -> Result<(), ClearNodeError> {
        warn!(error = %error.error, "server reported an error");

        if let Some(failure) = self.auth.on_error(&error.error) {
            self.emit(ClientEvent::AuthFailed(failure.to_string()));
            return Err(failure);
        }

        if let Some(op) = self.sessions.on_error(error.request_id) {
            debug!(?op, "application session request failed");
        }
        self.emit(ClientEvent::ServerError(error.error));
        Ok(())
    }

    async fn on_balances(&mut self, balances: Vec<Balance>) -> Result<(), ClearNodeError> {
        let balance = Balance::project(&balances, self.sessions.asset());
        debug!(asset = %balance.asset, amount = %balance.amount, "balance updated");
        self.emit(ClientEvent::BalanceUpdated(balance));
        Ok(())
    }

    async fn on_app_session_created(
        &mut self,
        created: AppSessionCreated,
    ) -> Result<(), ClearNodeError> {
        let session = self.sessions.on_created(&created)?;
        self.emit(ClientEvent::AppSessionCreated(session));
        Ok(())
    }

    async fn on_app_session_closed(
        &mut self,
        closed: AppSessionClosed,
    ) -> Result<(), ClearNodeError> {
        let session = self.sessions.on_closed(&closed)?;
        if session.status == AppSessionStatus::Closed {
            self.emit(ClientEvent::AppSessionClosed(session));
        } else {
            self.emit(ClientEvent::AppSessionCloseRejected(session));
        }
        Ok(())
    }
}

/// Requests sent from a [`ClientHandle`] to the running event loop
#[derive(Debug)]
pub enum ClientCommand {
    Connect(oneshot::Sender<Result<(), ClearNodeError>>),
    FetchBalances {
        account: Option<String>,
        reply: oneshot::Sender<Result<(), ClearNodeError>>,
    },
    CreateAppSession(oneshot::Sender<Result<(), ClearNodeError>>),
    CloseAppSession {
        settlement: Amount,
        payer: PayerIndex,
        reply: oneshot::Sender<Result<(), ClearNodeError>>,
    },
    AppSessionId(oneshot::Sender<Result<Option<String>, ClearNodeError>>),
    IsAuthenticated(oneshot::Sender<Result<bool, ClearNodeError>>),
    Disconnect(oneshot::Sender<Result<(), ClearNodeError>>),
    Shutdown,
}

/// ClearNode client: router plus protocol state
///
/// Drive it directly (`connect`, `handle_message`, `keepalive_tick`) or hand
/// it to a task with [`ClearNodeClient::spawn`] and talk to it through the
/// returned [`ClientHandle`].
pub struct ClearNodeClient<S> {
    router: MessageRouter,
    core: ClientCore<S>,
    ws_config: WsConfig,
    reconnect: ReconnectPolicy,
}

impl<S: WsSession<RpcCodec> + 'static> ClearNodeClient<S> {
    pub fn new(core: ClientCore<S>, ws_config: WsConfig, reconnect: ReconnectPolicy) -> Self {
        Self {
            router: MessageRouter::new(),
            core,
            ws_config,
            reconnect,
        }
    }

    /// Receive client events; a later call replaces the previous receiver
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.core.events = Some(tx);
        rx
    }

    pub async fn connect(&mut self) -> Result<(), ClearNodeError> {
        self.core.connect().await
    }

    /// Route one inbound text frame
    pub async fn handle_message(&mut self, text: &str) -> Dispatch {
        self.router.route_text(text, &mut self.core).await
    }

    pub async fn keepalive_tick(&mut self) -> Result<KeepaliveOutcome, ClearNodeError> {
        self.core.keepalive_tick().await
    }

    pub async fn fetch_balances(&mut self, account: Option<&str>) -> Result<(), ClearNodeError> {
        self.core.fetch_balances(account).await
    }

    pub async fn create_application_session(&mut self) -> Result<(), ClearNodeError> {
        self.core.create_application_session().await
    }

    pub async fn close_application_session(
        &mut self,
        settlement: Amount,
        payer: PayerIndex,
    ) -> Result<(), ClearNodeError> {
        self.core.close_application_session(settlement, payer).await
    }

    pub async fn disconnect(&mut self) {
        self.core.disconnect().await;
    }

    pub fn is_authenticated(&self) -> bool {
        self.core.is_authenticated()
    }

    pub fn auth_state(&self) -> AuthState {
        self.core.auth_state()
    }

    pub fn app_session_id(&self) -> Result<Option<String>, ClearNodeError> {
        self.core.app_session_id()
    }

    pub fn core(&self) -> &ClientCore<S> {
        &self.core
    }

    /// Run the event loop until shutdown or until every handle is dropped
    ///
    /// Reconnect backoff is part of the loop state, so commands are still
    /// answered while an attempt is waiting.
    #[instrument(skip_all, fields(endpoint = %self.core.connection.endpoint()))]
    pub async fn run(mut self, mut commands: mpsc::Receiver<ClientCommand>) {
        let mut keepalive = tokio::time::interval(self.ws_config.keepalive_interval());
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        keepalive.reset();

        // (attempt index, due time) of the next reconnect
        let mut next_attempt: Option<(usize, Instant)> = None;

        loop {
            let reconnect_due = next_attempt.map_or_else(Instant::now, |(_, at)| at);

            tokio::select! {
                message = self.core.connection.recv() => match message {
                    Some(Ok(message)) => {
                        self.router.route_message(message, &mut self.core).await;
                    }
                    Some(Err(e)) => warn!("inbound stream failed: {}", e),
                    None => debug!("inbound stream ended"),
                },
                _ = keepalive.tick() => {
                    match self.core.keepalive_tick().await {
                        Ok(KeepaliveOutcome::ChannelCleared) => {
                            next_attempt = self.schedule_reconnect(0);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("keepalive failed: {}", e),
                    }
                }
                () = sleep_until(reconnect_due), if next_attempt.is_some() => {
                    if let Some((attempt, _)) = next_attempt.take() {
                        match self.core.connect().await {
                            Ok(()) => info!(attempt = attempt + 1, "reconnected"),
                            Err(e) => {
                                warn!(attempt = attempt + 1, "reconnect failed: {}", e);
                                next_attempt = self.schedule_reconnect(attempt + 1);
                            }
                        }
                    }
                }
                command = commands.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => {
                        let replaces_channel = matches!(
                            command,
                            ClientCommand::Connect(_) | ClientCommand::Disconnect(_)
                        );
                        if replaces_channel {
                            next_attempt = None;
                        }
                        self.execute(command).await;
                    }
                },
            }
        }

        self.core.disconnect().await;
        info!("client stopped");
    }

    fn schedule_reconnect(&self, attempt: usize) -> Option<(usize, Instant)> {
        if !self.reconnect.is_enabled() {
            return None;
        }

        match self.reconnect.delays().nth(attempt) {
            Some(delay) => {
                debug!(attempt = attempt + 1, ?delay, "reconnect scheduled");
                Some((attempt, Instant::now() + delay))
            }
            None => {
                warn!("giving up on reconnecting");
                None
            }
        }
    }

    async fn execute(&mut self, command: ClientCommand) {
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            ClientCommand::Connect(reply) => {
                let _ = reply.send(self.core.connect().await);
            }
            ClientCommand::FetchBalances { account, reply } => {
                let _ = reply.send(self.core.fetch_balances(account.as_deref()).await);
            }
            ClientCommand::CreateAppSession(reply) => {
                let _ = reply.send(self.core.create_application_session().await);
            }
            ClientCommand::CloseAppSession {
                settlement,
                payer,
                reply,
            } => {
                let _ = reply.send(
                    self.core
                        .close_application_session(settlement, payer)
                        .await,
                );
            }
            ClientCommand::AppSessionId(reply) => {
                let _ = reply.send(self.core.app_session_id());
            }
            ClientCommand::IsAuthenticated(reply) => {
                let _ = reply.send(Ok(self.core.is_authenticated()));
            }
            ClientCommand::Disconnect(reply) => {
                self.core.disconnect().await;
                let _ = reply.send(Ok(()));
            }
            ClientCommand::Shutdown => {}
        }
    }

    /// Move the client onto its own task
    pub fn spawn(self) -> (ClientHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run(rx));
        (ClientHandle { commands: tx }, task)
    }
}

/// Cloneable front end to a spawned client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    commands: mpsc::Sender<ClientCommand>,
}

impl ClientHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, ClearNodeError>>) -> ClientCommand,
    ) -> Result<T, ClearNodeError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ClearNodeError::ClientStopped)?;
        response.await.map_err(|_| ClearNodeError::ClientStopped)?
    }

    pub async fn connect(&self) -> Result<(), ClearNodeError> {
        self.request(ClientCommand::Connect).await
    }

    pub async fn fetch_balances(&self, account: Option<String>) -> Result<(), ClearNodeError> {
        self.request(|reply| ClientCommand::FetchBalances { account, reply })
            .await
    }

    pub async fn create_application_session(&self) -> Result<(), ClearNodeError> {
        self.request(ClientCommand::CreateAppSession).await
    }

    pub async fn close_application_session(
        &self,
        settlement: Amount,
        payer: PayerIndex,
    ) -> Result<(), ClearNodeError> {
        self.request(|reply| ClientCommand::CloseAppSession {
            settlement,
            payer,
            reply,
        })
        .await
    }

    pub async fn app_session_id(&self) -> Result<Option<String>, ClearNodeError> {
        self.request(ClientCommand::AppSessionId).await
    }

    pub async fn is_authenticated(&self) -> Result<bool, ClearNodeError> {
        self.request(ClientCommand::IsAuthenticated).await
    }

    pub async fn disconnect(&self) -> Result<(), ClearNodeError> {
        self.request(ClientCommand::Disconnect).await
    }

    /// Stop the event loop; the channel is released on the way out
    pub async fn shutdown(&self) -> Result<(), ClearNodeError> {
        self.commands
            .send(ClientCommand::Shutdown)
            .await
            .map_err(|_| ClearNodeError::ClientStopped)
    }
}
