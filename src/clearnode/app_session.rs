use crate::clearnode::types::{
    now_millis, AppSessionClosed, AppSessionCreated, RequestIds, RpcMethod, RpcRequest,
};
use crate::core::errors::ClearNodeError;
use crate::core::kernel::signer::MessageSigner;
use crate::core::storage::{DurableStore, APP_SESSION_ID_KEY};
use crate::core::types::{
    Allocation, Amount, AppDefinition, AppSessionStatus, ApplicationSession, PayerIndex,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Request awaiting its response
#[derive(Debug, Clone, PartialEq)]
pub enum PendingOp {
    Create {
        definition: AppDefinition,
        allocations: Vec<Allocation>,
    },
    Close {
        app_session_id: String,
        allocations: Vec<Allocation>,
    },
}

/// Allocation table for a close: the payer gets nothing, the other side
/// gets the settlement.
pub fn close_allocations(
    wallet: &str,
    counterparty: &str,
    asset: &str,
    settlement: Amount,
    payer: PayerIndex,
) -> Vec<Allocation> {
    let mut amounts = [settlement, settlement];
    amounts[payer.index()] = Amount::ZERO;

    vec![
        Allocation::new(wallet, asset, amounts[0]),
        Allocation::new(counterparty, asset, amounts[1]),
    ]
}

/// Opens and closes the two-party application session
pub struct AppSessionProtocol {
    asset: String,
    signer: Arc<dyn MessageSigner>,
    store: Arc<dyn DurableStore>,
    ids: Arc<RequestIds>,
    /// Outstanding request and the id it was sent with
    pending: Option<(u64, PendingOp)>,
}

impl AppSessionProtocol {
    pub fn new(
        asset: impl Into<String>,
        signer: Arc<dyn MessageSigner>,
        store: Arc<dyn DurableStore>,
        ids: Arc<RequestIds>,
    ) -> Self {
        Self {
            asset: asset.into(),
            signer,
            store,
            ids,
            pending: None,
        }
    }

    pub fn asset(&self) -> &str {
        &self.asset
    }

    pub fn pending(&self) -> Option<&PendingOp> {
        self.pending.as_ref().map(|(_, op)| op)
    }

    /// Drop the outstanding request; its response can no longer arrive
    pub fn clear_pending(&mut self) {
        self.pending = None;
    }

    /// Give up on the outstanding request if the server error answers it
    ///
    /// An error that echoes another request's id leaves it in place. One
    /// without an id cannot be told apart and is taken as the answer.
    pub fn on_error(&mut self, request_id: Option<u64>) -> Option<PendingOp> {
        let answers_pending = match (&self.pending, request_id) {
            (Some((pending_id, _)), Some(id)) => *pending_id == id,
            _ => true,
        };
        if !answers_pending {
            return None;
        }
        self.pending.take().map(|(_, op)| op)
    }

    /// Id of the tracked session, if any
    pub fn current_id(&self) -> Result<Option<String>, ClearNodeError> {
        self.store.get(APP_SESSION_ID_KEY)
    }

    /// Signed `create_app_session` escrowing `escrow` from the wallet
    #[instrument(skip(self))]
    pub fn open_request(
        &mut self,
        wallet: &str,
        counterparty: &str,
        escrow: Amount,
    ) -> Result<RpcRequest, ClearNodeError> {
        let definition = AppDefinition::two_party(wallet, counterparty, now_millis());
        let allocations = vec![
            Allocation::new(wallet, self.asset.as_str(), escrow),
            Allocation::new(counterparty, self.asset.as_str(), Amount::ZERO),
        ];

        let params = json!([{
            "definition": definition,
            "allocations": allocations,
        }]);
        let request = self
            .ids
            .request(RpcMethod::CreateAppSession, params)
            .sign_with(self.signer.as_ref())?;

        self.pending = Some((
            request.request_id,
            PendingOp::Create {
                definition,
                allocations,
            },
        ));
        Ok(request)
    }

    /// Signed `close_app_session` for the tracked session
    ///
    /// Fails with `MissingSession` when no session id is stored.
    #[instrument(skip(self))]
    pub fn close_request(
        &mut self,
        wallet: &str,
        counterparty: &str,
        settlement: Amount,
        payer: PayerIndex,
    ) -> Result<RpcRequest, ClearNodeError> {
        let app_session_id = self.current_id()?.ok_or(ClearNodeError::MissingSession)?;
        let allocations = close_allocations(wallet, counterparty, &self.asset, settlement, payer);

        let params = json!([{
            "app_session_id": app_session_id,
            "allocations": allocations,
        }]);
        let request = self
            .ids
            .request(RpcMethod::CloseAppSession, params)
            .sign_with(self.signer.as_ref())?;

        self.pending = Some((
            request.request_id,
            PendingOp::Close {
                app_session_id,
                allocations,
            },
        ));
        Ok(request)
    }

    /// Track the new session id, replacing any previous one
    pub fn on_created(
        &mut self,
        created: &AppSessionCreated,
    ) -> Result<ApplicationSession, ClearNodeError> {
        self.store.set(APP_SESSION_ID_KEY, &created.app_session_id)?;

        let (definition, allocations) = match self.pending.take() {
            Some((
                _,
                PendingOp::Create {
                    definition,
                    allocations,
                },
            )) => (Some(definition), allocations),
            other => {
                self.pending = other;
                (None, Vec::new())
            }
        };

        info!(app_session_id = %created.app_session_id, "application session created");
        Ok(ApplicationSession {
            id: created.app_session_id.clone(),
            definition,
            allocations,
            status: created
                .status
                .as_deref()
                .map_or(AppSessionStatus::Open, AppSessionStatus::parse),
        })
    }

    /// Forget the session once the server reports it closed
    ///
    /// Any other status keeps the id so the close can be retried.
    pub fn on_closed(
        &mut self,
        closed: &AppSessionClosed,
    ) -> Result<ApplicationSession, ClearNodeError> {
        let status = AppSessionStatus::parse(&closed.status);
        let stored = self.current_id()?;

        let allocations = match self.pending.take() {
            Some((_, PendingOp::Close { allocations, .. })) => allocations,
            other => {
                self.pending = other;
                Vec::new()
            }
        };

        let id = closed
            .app_session_id
            .clone()
            .or_else(|| stored.clone())
            .unwrap_or_default();

        if status == AppSessionStatus::Closed {
            match stored.as_deref() {
                Some(current) if current == id => {
                    self.store.delete(APP_SESSION_ID_KEY)?;
                    info!(app_session_id = %id, "application session closed");
                }
                Some(current) => {
                    warn!(
                        app_session_id = %id,
                        tracked = %current,
                        "closed session is not the tracked one"
                    );
                }
                None => {}
            }
        } else {
            warn!(app_session_id = %id, status = %status, "close not confirmed");
        }

        Ok(ApplicationSession {
            id,
            definition: None,
            allocations,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::signer::SessionKeySigner;
    use crate::core::storage::MemoryStore;

    const WALLET: &str = "0x1111111111111111111111111111111111111111";
    const COUNTERPARTY: &str = "0x2222222222222222222222222222222222222222";

    fn amount(raw: &str) -> Amount {
        raw.parse().unwrap()
    }

    fn protocol(store: Arc<dyn DurableStore>) -> AppSessionProtocol {
        AppSessionProtocol::new(
            "usdc",
            Arc::new(SessionKeySigner::generate()),
            store,
            Arc::new(RequestIds::starting_at(1)),
        )
    }

    #[test]
    fn payer_receives_zero() {
        let first = close_allocations(WALLET, COUNTERPARTY, "usdc", amount("2"), PayerIndex::First);
        assert_eq!(first[0].amount, Amount::ZERO);
        assert_eq!(first[1].amount, amount("2"));

        let second =
            close_allocations(WALLET, COUNTERPARTY, "usdc", amount("2"), PayerIndex::Second);
        assert_eq!(second[0].amount, amount("2"));
        assert_eq!(second[1].amount, Amount::ZERO);
    }

    #[test]
    fn open_escrows_from_wallet_and_signs() {
        let mut sessions = protocol(Arc::new(MemoryStore::new()));
        let request = sessions
            .open_request(WALLET, COUNTERPARTY, amount("0.001"))
            .unwrap();

        let params = request.first_param().unwrap();
        assert_eq!(params["definition"]["protocol"], "nitroliterpc");
        assert_eq!(params["definition"]["weights"], json!([100, 0]));
        assert_eq!(params["allocations"][0]["amount"], "0.001");
        assert_eq!(params["allocations"][1]["amount"], "0");
        assert_eq!(request.signatures.len(), 1);
        assert!(matches!(sessions.pending(), Some(PendingOp::Create { .. })));
    }

    #[test]
    fn error_for_another_request_keeps_pending_create() {
        let mut sessions = protocol(Arc::new(MemoryStore::new()));
        let request = sessions
            .open_request(WALLET, COUNTERPARTY, amount("0.001"))
            .unwrap();

        assert_eq!(sessions.on_error(Some(request.request_id + 7)), None);
        assert!(matches!(sessions.pending(), Some(PendingOp::Create { .. })));

        let dropped = sessions.on_error(Some(request.request_id));
        assert!(matches!(dropped, Some(PendingOp::Create { .. })));
        assert_eq!(sessions.pending(), None);
    }

    #[test]
    fn error_without_id_drops_pending() {
        let mut sessions = protocol(Arc::new(MemoryStore::new()));
        sessions
            .open_request(WALLET, COUNTERPARTY, amount("0.001"))
            .unwrap();

        assert!(sessions.on_error(None).is_some());
        assert_eq!(sessions.on_error(None), None);
    }

    #[test]
    fn non_closed_status_keeps_id() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        store.set(APP_SESSION_ID_KEY, "0xsession").unwrap();
        let mut sessions = protocol(store.clone());

        let session = sessions
            .on_closed(&AppSessionClosed {
                app_session_id: None,
                status: "open".to_string(),
            })
            .unwrap();

        assert_eq!(session.id, "0xsession");
        assert_eq!(session.status, AppSessionStatus::Open);
        assert_eq!(
            store.get(APP_SESSION_ID_KEY).unwrap().as_deref(),
            Some("0xsession")
        );
    }

    #[test]
    fn closing_another_session_keeps_tracked_id() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        store.set(APP_SESSION_ID_KEY, "0xmine").unwrap();
        let mut sessions = protocol(store.clone());

        sessions
            .on_closed(&AppSessionClosed {
                app_session_id: Some("0xother".to_string()),
                status: "closed".to_string(),
            })
            .unwrap();

        assert_eq!(
            store.get(APP_SESSION_ID_KEY).unwrap().as_deref(),
            Some("0xmine")
        );
    }
}
