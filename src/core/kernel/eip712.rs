//! EIP-712 typed data for the authentication policy.
//!
//! The wallet signs a `Policy` struct that binds the server challenge to the
//! session key, scope, application and allowances requested in the
//! `auth_request`. Only the encoding this protocol needs is implemented:
//! `string`, `address`, `uint256` and an array of `Allowance` structs.

use crate::core::errors::ClearNodeError;
use crate::core::kernel::signer::keccak256;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DOMAIN_TYPE: &str = "EIP712Domain(string name)";
pub const ALLOWANCE_TYPE: &str = "Allowance(string asset,uint256 amount)";
pub const POLICY_TYPE: &str = "Policy(string challenge,string scope,address wallet,address application,address participant,uint256 expire,Allowance[] allowances)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eip712Domain {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAllowance {
    pub asset: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyMessage {
    pub challenge: String,
    pub scope: String,
    pub wallet: String,
    pub application: String,
    pub participant: String,
    pub expire: String,
    pub allowances: Vec<PolicyAllowance>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedData {
    pub domain: Eip712Domain,
    pub message: PolicyMessage,
}

impl TypedData {
    pub fn new(domain_name: impl Into<String>, message: PolicyMessage) -> Self {
        Self {
            domain: Eip712Domain {
                name: domain_name.into(),
            },
            message,
        }
    }

    pub fn domain_separator(&self) -> [u8; 32] {
        let mut encoded = Vec::with_capacity(64);
        encoded.extend_from_slice(&keccak256(DOMAIN_TYPE.as_bytes()));
        encoded.extend_from_slice(&keccak256(self.domain.name.as_bytes()));
        keccak256(&encoded)
    }

    pub fn struct_hash(&self) -> Result<[u8; 32], ClearNodeError> {
        let message = &self.message;
        let policy_type = format!("{}{}", POLICY_TYPE, ALLOWANCE_TYPE);

        let mut allowance_hashes = Vec::with_capacity(message.allowances.len() * 32);
        for allowance in &message.allowances {
            allowance_hashes.extend_from_slice(&allowance_hash(allowance)?);
        }

        let mut encoded = Vec::with_capacity(32 * 8);
        encoded.extend_from_slice(&keccak256(policy_type.as_bytes()));
        encoded.extend_from_slice(&keccak256(message.challenge.as_bytes()));
        encoded.extend_from_slice(&keccak256(message.scope.as_bytes()));
        encoded.extend_from_slice(&encode_address(&message.wallet)?);
        encoded.extend_from_slice(&encode_address(&message.application)?);
        encoded.extend_from_slice(&encode_address(&message.participant)?);
        encoded.extend_from_slice(&encode_uint256(&message.expire)?);
        encoded.extend_from_slice(&keccak256(&allowance_hashes));

        Ok(keccak256(&encoded))
    }

    /// `keccak256(0x1901 || domainSeparator || hashStruct(message))`
    pub fn signing_hash(&self) -> Result<[u8; 32], ClearNodeError> {
        let mut encoded = Vec::with_capacity(66);
        encoded.extend_from_slice(&[0x19, 0x01]);
        encoded.extend_from_slice(&self.domain_separator());
        encoded.extend_from_slice(&self.struct_hash()?);
        Ok(keccak256(&encoded))
    }

    /// `eth_signTypedData_v4` payload for wallets that sign out of process
    pub fn to_json(&self) -> Value {
        json!({
            "types": {
                "EIP712Domain": [{ "name": "name", "type": "string" }],
                "Policy": [
                    { "name": "challenge", "type": "string" },
                    { "name": "scope", "type": "string" },
                    { "name": "wallet", "type": "address" },
                    { "name": "application", "type": "address" },
                    { "name": "participant", "type": "address" },
                    { "name": "expire", "type": "uint256" },
                    { "name": "allowances", "type": "Allowance[]" }
                ],
                "Allowance": [
                    { "name": "asset", "type": "string" },
                    { "name": "amount", "type": "uint256" }
                ]
            },
            "primaryType": "Policy",
            "domain": self.domain,
            "message": self.message,
        })
    }
}

fn allowance_hash(allowance: &PolicyAllowance) -> Result<[u8; 32], ClearNodeError> {
    let mut encoded = Vec::with_capacity(96);
    encoded.extend_from_slice(&keccak256(ALLOWANCE_TYPE.as_bytes()));
    encoded.extend_from_slice(&keccak256(allowance.asset.as_bytes()));
    encoded.extend_from_slice(&encode_uint256(&allowance.amount)?);
    Ok(keccak256(&encoded))
}

fn encode_address(address: &str) -> Result<[u8; 32], ClearNodeError> {
    let bytes = hex::decode(address.trim_start_matches("0x"))
        .map_err(|e| ClearNodeError::signing(format!("Invalid address {}: {}", address, e)))?;
    if bytes.len() != 20 {
        return Err(ClearNodeError::signing(format!(
            "Invalid address length for {}",
            address
        )));
    }

    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}

fn encode_uint256(value: &str) -> Result<[u8; 32], ClearNodeError> {
    let value = value.trim();
    let parsed = if value.is_empty() {
        0
    } else {
        value
            .parse::<u128>()
            .map_err(|e| ClearNodeError::signing(format!("Invalid uint256 {}: {}", value, e)))?
    };

    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&parsed.to_be_bytes());
    Ok(word)
}
