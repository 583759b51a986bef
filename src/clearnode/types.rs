use crate::core::errors::ClearNodeError;
use crate::core::kernel::signer::MessageSigner;
use crate::core::types::Balance;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// RPC methods spoken over the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    AuthRequest,
    AuthChallenge,
    AuthVerify,
    AuthVerifyJwt,
    Error,
    Ping,
    Pong,
    GetLedgerBalances,
    CreateAppSession,
    CloseAppSession,
}

impl RpcMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthRequest => "auth_request",
            Self::AuthChallenge => "auth_challenge",
            Self::AuthVerify => "auth_verify",
            Self::AuthVerifyJwt => "auth_verify_jwt",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::GetLedgerBalances => "get_ledger_balances",
            Self::CreateAppSession => "create_app_session",
            Self::CloseAppSession => "close_app_session",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let method = match raw {
            "auth_request" => Self::AuthRequest,
            "auth_challenge" => Self::AuthChallenge,
            "auth_verify" => Self::AuthVerify,
            "auth_verify_jwt" => Self::AuthVerifyJwt,
            "error" => Self::Error,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "get_ledger_balances" => Self::GetLedgerBalances,
            "create_app_session" => Self::CreateAppSession,
            "close_app_session" => Self::CloseAppSession,
            _ => return None,
        };
        Some(method)
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound request envelope: `{"req":[id, method, params, ts], "sig":[...]}`
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub request_id: u64,
    pub method: RpcMethod,
    pub params: Value,
    pub timestamp: u64,
    pub signatures: Vec<String>,
}

impl RpcRequest {
    pub fn new(request_id: u64, method: RpcMethod, params: Value, timestamp: u64) -> Self {
        Self {
            request_id,
            method,
            params,
            timestamp,
            signatures: Vec::new(),
        }
    }

    /// The `req` tuple; this is what the session key signs
    pub fn payload(&self) -> Value {
        json!([
            self.request_id,
            self.method.as_str(),
            self.params,
            self.timestamp
        ])
    }

    pub fn sign_with(mut self, signer: &dyn MessageSigner) -> Result<Self, ClearNodeError> {
        let signature = signer.sign(&self.payload())?;
        self.signatures.push(signature);
        Ok(self)
    }

    pub fn with_signature(mut self, signature: String) -> Self {
        self.signatures.push(signature);
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "req": self.payload(),
            "sig": self.signatures,
        })
    }

    /// First parameter object, where every request keeps its arguments
    pub fn first_param(&self) -> Option<&Value> {
        self.params.as_array().and_then(|params| params.first())
    }
}

/// Current time in milliseconds since the epoch
pub fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Hands out request ids and stamps requests with the current time
///
/// Ids start at the creation time in milliseconds so they do not repeat
/// across restarts.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU64,
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestIds {
    pub fn new() -> Self {
        Self::starting_at(now_millis())
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    pub fn request(&self, method: RpcMethod, params: Value) -> RpcRequest {
        let request_id = self.next.fetch_add(1, Ordering::Relaxed);
        RpcRequest::new(request_id, method, params, now_millis())
    }
}

/// Envelope of an inbound frame before its params are interpreted
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEnvelope {
    pub request_id: Option<u64>,
    pub method: String,
    pub params: Value,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthChallenge {
    #[serde(alias = "challenge")]
    pub challenge_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthVerifyResult {
    pub success: bool,
    #[serde(rename = "jwtToken", alias = "jwt_token", default)]
    pub jwt_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub error: String,
    /// Id of the request this error answers, taken from the envelope
    #[serde(skip)]
    pub request_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSessionCreated {
    pub app_session_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSessionClosed {
    #[serde(default)]
    pub app_session_id: Option<String>,
    pub status: String,
}

/// Every inbound frame kind the client understands
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    AuthChallenge(AuthChallenge),
    AuthVerify(AuthVerifyResult),
    Error(RpcError),
    LedgerBalances(Vec<Balance>),
    AppSessionCreated(AppSessionCreated),
    AppSessionClosed(AppSessionClosed),
    Pong,
    Unknown { method: String },
}

impl InboundFrame {
    pub fn method_name(&self) -> &str {
        match self {
            Self::AuthChallenge(_) => RpcMethod::AuthChallenge.as_str(),
            Self::AuthVerify(_) => RpcMethod::AuthVerify.as_str(),
            Self::Error(_) => RpcMethod::Error.as_str(),
            Self::LedgerBalances(_) => RpcMethod::GetLedgerBalances.as_str(),
            Self::AppSessionCreated(_) => RpcMethod::CreateAppSession.as_str(),
            Self::AppSessionClosed(_) => RpcMethod::CloseAppSession.as_str(),
            Self::Pong => RpcMethod::Pong.as_str(),
            Self::Unknown { method } => method,
        }
    }

    pub fn from_envelope(envelope: RpcEnvelope) -> Result<Self, ClearNodeError> {
        let Some(method) = RpcMethod::parse(&envelope.method) else {
            return Ok(Self::Unknown {
                method: envelope.method,
            });
        };

        let frame = match method {
            RpcMethod::AuthChallenge => Self::AuthChallenge(param_object(&envelope.params)?),
            RpcMethod::AuthVerify => Self::AuthVerify(param_object(&envelope.params)?),
            RpcMethod::Error => {
                let mut error: RpcError = param_object(&envelope.params)?;
                error.request_id = envelope.request_id;
                Self::Error(error)
            }
            RpcMethod::GetLedgerBalances => Self::LedgerBalances(balance_list(&envelope.params)?),
            RpcMethod::CreateAppSession => {
                Self::AppSessionCreated(param_object(&envelope.params)?)
            }
            RpcMethod::CloseAppSession => Self::AppSessionClosed(param_object(&envelope.params)?),
            RpcMethod::Ping | RpcMethod::Pong => Self::Pong,
            RpcMethod::AuthRequest | RpcMethod::AuthVerifyJwt => Self::Unknown {
                method: envelope.method,
            },
        };

        Ok(frame)
    }
}

/// Params arrive either as an object or as a one-element array around it.
fn param_object<T: for<'de> Deserialize<'de>>(params: &Value) -> Result<T, ClearNodeError> {
    let object = match params {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| ClearNodeError::malformed("empty params"))?,
        other => other,
    };

    serde_json::from_value(object.clone())
        .map_err(|e| ClearNodeError::malformed(format!("unexpected params: {}", e)))
}

fn balance_list(params: &Value) -> Result<Vec<Balance>, ClearNodeError> {
    let entries = match params {
        Value::Array(items) => match items.first() {
            Some(Value::Array(inner)) => inner.clone(),
            Some(Value::Object(object)) if object.contains_key("ledger_balances") => {
                return balance_list(&object["ledger_balances"]);
            }
            _ => items.clone(),
        },
        Value::Object(object) => match object.get("ledger_balances") {
            Some(inner) => return balance_list(inner),
            None => return Err(ClearNodeError::malformed("balances params is not a list")),
        },
        _ => return Err(ClearNodeError::malformed("balances params is not a list")),
    };

    entries
        .into_iter()
        .map(|entry| {
            serde_json::from_value(entry)
                .map_err(|e| ClearNodeError::malformed(format!("unexpected balance entry: {}", e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(method: &str, params: Value) -> RpcEnvelope {
        RpcEnvelope {
            request_id: Some(1),
            method: method.to_string(),
            params,
            timestamp: Some(0),
        }
    }

    #[test]
    fn method_names_match_wire() {
        for method in [
            RpcMethod::AuthRequest,
            RpcMethod::AuthVerifyJwt,
            RpcMethod::GetLedgerBalances,
            RpcMethod::CloseAppSession,
        ] {
            assert_eq!(RpcMethod::parse(method.as_str()), Some(method));
        }
        assert_eq!(RpcMethod::parse("subscribe"), None);
    }

    #[test]
    fn request_wire_shape() {
        let request = RpcRequest::new(7, RpcMethod::Ping, json!([]), 1000)
            .with_signature("0xsig".to_string());
        assert_eq!(
            request.to_json(),
            json!({"req": [7, "ping", [], 1000], "sig": ["0xsig"]})
        );
    }

    #[test]
    fn request_ids_increase() {
        let ids = RequestIds::starting_at(10);
        let first = ids.request(RpcMethod::Ping, json!([]));
        let second = ids.request(RpcMethod::Ping, json!([]));
        assert_eq!(first.request_id, 10);
        assert_eq!(second.request_id, 11);
        assert!(second.timestamp >= first.timestamp);
    }

    #[test]
    fn verify_result_accepts_both_token_spellings() {
        let camel = InboundFrame::from_envelope(envelope(
            "auth_verify",
            json!([{"success": true, "jwtToken": "a.b.c"}]),
        ))
        .unwrap();
        let snake = InboundFrame::from_envelope(envelope(
            "auth_verify",
            json!({"success": true, "jwt_token": "a.b.c"}),
        ))
        .unwrap();
        assert_eq!(camel, snake);
    }

    #[test]
    fn balances_accept_flat_and_nested_lists() {
        let flat = json!([{"asset": "usdc", "amount": "1"}]);
        let nested = json!([[{"asset": "usdc", "amount": "1"}]]);
        let keyed = json!([{"ledger_balances": [{"asset": "usdc", "amount": "1"}]}]);
        let expected = vec![Balance {
            asset: "usdc".to_string(),
            amount: "1".to_string(),
        }];
        assert_eq!(balance_list(&flat).unwrap(), expected);
        assert_eq!(balance_list(&nested).unwrap(), expected);
        assert_eq!(balance_list(&keyed).unwrap(), expected);
        assert!(balance_list(&json!("nope")).is_err());
    }

    #[test]
    fn unknown_methods_are_not_errors() {
        let frame = InboundFrame::from_envelope(envelope("assets", json!([]))).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Unknown {
                method: "assets".to_string()
            }
        );
    }

    #[test]
    fn known_method_with_bad_params_is_malformed() {
        let result = InboundFrame::from_envelope(envelope("create_app_session", json!([{}])));
        assert!(matches!(result, Err(ClearNodeError::MalformedFrame(_))));
    }
}
