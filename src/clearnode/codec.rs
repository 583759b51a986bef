use crate::clearnode::types::{InboundFrame, RpcEnvelope, RpcRequest};
use crate::core::errors::ClearNodeError;
use crate::core::kernel::codec::WsCodec;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

/// Wire codec for the ClearNode RPC protocol
///
/// Outbound requests are written as `{"req": [...], "sig": [...]}`. Inbound
/// frames carry the same tuple under `res`; `req` is accepted too since the
/// server echoes some notifications in request form.
#[derive(Debug, Clone, Default)]
pub struct RpcCodec;

impl RpcCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_envelope(text: &str) -> Result<RpcEnvelope, ClearNodeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ClearNodeError::malformed(format!("invalid JSON: {}", e)))?;

        let tuple = value
            .get("res")
            .or_else(|| value.get("req"))
            .and_then(Value::as_array)
            .ok_or_else(|| ClearNodeError::malformed("missing res/req tuple"))?;

        if tuple.len() < 3 {
            return Err(ClearNodeError::malformed(format!(
                "tuple has {} elements, expected at least 3",
                tuple.len()
            )));
        }

        let method = tuple[1]
            .as_str()
            .ok_or_else(|| ClearNodeError::malformed("method is not a string"))?
            .to_string();

        Ok(RpcEnvelope {
            request_id: tuple[0].as_u64(),
            method,
            params: tuple[2].clone(),
            timestamp: tuple.get(3).and_then(Value::as_u64),
        })
    }

    pub fn decode_text(&self, text: &str) -> Result<InboundFrame, ClearNodeError> {
        InboundFrame::from_envelope(Self::parse_envelope(text)?)
    }
}

impl WsCodec for RpcCodec {
    type Outbound = RpcRequest;
    type Inbound = InboundFrame;

    fn encode(&self, frame: &Self::Outbound) -> Result<Message, ClearNodeError> {
        let text = serde_json::to_string(&frame.to_json())?;
        Ok(Message::Text(text))
    }

    fn decode_message(&self, message: Message) -> Result<Option<Self::Inbound>, ClearNodeError> {
        match message {
            Message::Text(text) => self.decode_text(&text).map(Some),
            Message::Binary(bytes) => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| ClearNodeError::malformed(format!("binary frame: {}", e)))?;
                self.decode_text(&text).map(Some)
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clearnode::types::{AuthChallenge, RpcMethod};
    use serde_json::json;

    #[test]
    fn decodes_response_tuple() {
        let codec = RpcCodec::new();
        let text = json!({
            "res": [1, "auth_challenge", [{ "challenge_message": "abc" }], 1_700_000_000_000u64],
            "sig": [],
        })
        .to_string();
        let frame = codec.decode_message(Message::Text(text)).unwrap();
        assert_eq!(
            frame,
            Some(InboundFrame::AuthChallenge(AuthChallenge {
                challenge_message: "abc".to_string()
            }))
        );
    }

    #[test]
    fn accepts_request_form_and_missing_timestamp() {
        let envelope = RpcCodec::parse_envelope(r#"{"req":[null,"pong",[]]}"#).unwrap();
        assert_eq!(envelope.request_id, None);
        assert_eq!(envelope.timestamp, None);
        assert_eq!(envelope.method, "pong");
    }

    #[test]
    fn rejects_malformed_envelopes() {
        for text in [
            "not json",
            r#"{"foo":1}"#,
            r#"{"res":[1,"ping"]}"#,
            r#"{"res":[1,2,[]]}"#,
        ] {
            assert!(
                matches!(
                    RpcCodec::parse_envelope(text),
                    Err(ClearNodeError::MalformedFrame(_))
                ),
                "{} should be malformed",
                text
            );
        }
    }

    #[test]
    fn control_messages_carry_no_frame() {
        let codec = RpcCodec::new();
        assert_eq!(codec.decode_message(Message::Ping(vec![])).unwrap(), None);
        assert_eq!(codec.decode_message(Message::Close(None)).unwrap(), None);
    }

    #[test]
    fn encodes_request_as_text() {
        let codec = RpcCodec::new();
        let request = RpcRequest::new(3, RpcMethod::Ping, json!([]), 42);
        let Message::Text(text) = codec.encode(&request).unwrap() else {
            panic!("expected text message");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["req"], json!([3, "ping", [], 42]));
        assert_eq!(value["sig"], json!([]));
    }
}
