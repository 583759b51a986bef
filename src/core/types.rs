use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Typed errors for the data model
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TypesError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Negative amount: {0}")]
    NegativeAmount(String),
    #[error("Invalid payer index: {0}")]
    InvalidPayerIndex(u8),
}

/// Non-negative fixed-point quantity that travels as a string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(value: Decimal) -> Result<Self, TypesError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(TypesError::NegativeAmount(value.to_string()));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Amount {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value =
            Decimal::from_str(s.trim()).map_err(|_| TypesError::InvalidAmount(s.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Spending allowance requested for the session key during auth
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub symbol: String,
    pub amount: String,
}

impl Allowance {
    pub fn new(symbol: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            amount: amount.into(),
        }
    }
}

/// Parameters of an `auth_request`; also the source of the typed data
/// signed when the challenge arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub wallet: String,
    pub participant: String,
    pub app_name: String,
    pub expire: String,
    pub scope: String,
    pub application: String,
    pub allowances: Vec<Allowance>,
}

/// One row of an application session's allocation table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub participant: String,
    pub asset: String,
    pub amount: Amount,
}

impl Allocation {
    pub fn new(participant: impl Into<String>, asset: impl Into<String>, amount: Amount) -> Self {
        Self {
            participant: participant.into(),
            asset: asset.into(),
            amount,
        }
    }
}

pub const APP_PROTOCOL: &str = "nitroliterpc";

/// Consensus rules of a two-party application session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub protocol: String,
    pub participants: [String; 2],
    pub weights: [u32; 2],
    pub quorum: u32,
    pub challenge: u64,
    pub nonce: u64,
}

impl AppDefinition {
    /// Definition where the first participant holds the full decision weight.
    pub fn two_party(first: impl Into<String>, second: impl Into<String>, nonce: u64) -> Self {
        Self {
            protocol: APP_PROTOCOL.to_string(),
            participants: [first.into(), second.into()],
            weights: [100, 0],
            quorum: 100,
            challenge: 0,
            nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AppSessionStatus {
    Open,
    Closed,
    Other(String),
}

impl AppSessionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "open" => Self::Open,
            "closed" => Self::Closed,
            _ => Self::Other(raw.to_string()),
        }
    }
}

impl fmt::Display for AppSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// An application session as known locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSession {
    pub id: String,
    /// Only known when the session was opened by this process.
    pub definition: Option<AppDefinition>,
    pub allocations: Vec<Allocation>,
    pub status: AppSessionStatus,
}

/// Selects the participant that receives nothing when a session closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayerIndex {
    First,
    Second,
}

impl PayerIndex {
    pub fn index(self) -> usize {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }
}

impl TryFrom<u8> for PayerIndex {
    type Error = TypesError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::First),
            1 => Ok(Self::Second),
            other => Err(TypesError::InvalidPayerIndex(other)),
        }
    }
}

/// Ledger balance entry as reported by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub amount: String,
}

impl Balance {
    /// Picks `asset` out of a ledger listing, defaulting to a zero amount.
    pub fn project(entries: &[Self], asset: &str) -> Self {
        entries
            .iter()
            .find(|entry| entry.asset == asset)
            .cloned()
            .unwrap_or_else(|| Self {
                asset: asset.to_string(),
                amount: "0".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_keeps_its_scale_as_string() {
        let amount: Amount = "0.001".parse().unwrap();
        assert_eq!(amount.to_string(), "0.001");
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"0.001\"");
        assert_eq!(Amount::ZERO.to_string(), "0");
    }

    #[test]
    fn amount_rejects_negative_and_garbage() {
        assert!(matches!(
            "-1".parse::<Amount>(),
            Err(TypesError::NegativeAmount(_))
        ));
        assert!(matches!(
            "abc".parse::<Amount>(),
            Err(TypesError::InvalidAmount(_))
        ));
    }

    #[test]
    fn payer_index_from_u8() {
        assert_eq!(PayerIndex::try_from(0).unwrap(), PayerIndex::First);
        assert_eq!(PayerIndex::try_from(1).unwrap(), PayerIndex::Second);
        assert_eq!(
            PayerIndex::try_from(2),
            Err(TypesError::InvalidPayerIndex(2))
        );
    }

    #[test]
    fn balance_projection_defaults_to_zero() {
        let entries = vec![
            Balance {
                asset: "usdc".to_string(),
                amount: "12.5".to_string(),
            },
            Balance {
                asset: "eth".to_string(),
                amount: "1".to_string(),
            },
        ];
        assert_eq!(Balance::project(&entries, "usdc").amount, "12.5");
        assert_eq!(Balance::project(&entries[1..], "usdc").amount, "0");
    }

    #[test]
    fn two_party_definition_shape() {
        let definition = AppDefinition::two_party("0xaa", "0xbb", 42);
        assert_eq!(definition.weights, [100, 0]);
        assert_eq!(definition.quorum, 100);
        assert_eq!(definition.challenge, 0);
        assert_eq!(definition.protocol, "nitroliterpc");
    }
}
