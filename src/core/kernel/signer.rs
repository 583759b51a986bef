use crate::core::errors::ClearNodeError;
use crate::core::kernel::eip712::TypedData;
use async_trait::async_trait;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde_json::Value;
use sha3::{Digest, Keccak256};
use std::fmt;

/// Signs outbound protocol payloads with the local session key
///
/// The payload is serialized to compact JSON, hashed with Keccak256 and the
/// digest signed; the result is a `0x`-prefixed 65-byte `r || s || v` hex
/// string.
pub trait MessageSigner: Send + Sync {
    /// Address of the signing identity, if key material is present
    fn address(&self) -> Option<&str>;

    fn sign(&self, payload: &Value) -> Result<String, ClearNodeError>;
}

/// Signs EIP-712 typed data with the user's wallet
///
/// This is the only operation that needs the wallet; everything else goes
/// through the session key.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> &str;

    async fn sign_typed_data(&self, data: &TypedData) -> Result<String, ClearNodeError>;
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn public_key_to_address(public_key: &PublicKey) -> String {
    let public_key_bytes = public_key.serialize_uncompressed();

    // Remove the 0x04 prefix for uncompressed key
    let hash = keccak256(&public_key_bytes[1..]);

    // Take the last 20 bytes and format as hex address
    format!("0x{}", hex::encode(&hash[12..]))
}

fn parse_secret_key(private_key: &str) -> Result<SecretKey, ClearNodeError> {
    let bytes = hex::decode(private_key.trim().trim_start_matches("0x"))
        .map_err(|e| ClearNodeError::signing(format!("Invalid private key hex: {}", e)))?;
    SecretKey::from_slice(&bytes)
        .map_err(|e| ClearNodeError::signing(format!("Invalid private key: {}", e)))
}

fn sign_digest(
    secp: &Secp256k1<secp256k1::All>,
    secret_key: &SecretKey,
    digest: &[u8; 32],
) -> Result<String, ClearNodeError> {
    let message = Message::from_digest_slice(digest)
        .map_err(|e| ClearNodeError::signing(format!("Failed to create message: {}", e)))?;

    let signature = secp.sign_ecdsa_recoverable(&message, secret_key);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut sig_with_recovery = [0u8; 65];
    sig_with_recovery[..64].copy_from_slice(&compact);
    sig_with_recovery[64] = 27 + recovery_id.to_i32() as u8;

    Ok(format!("0x{}", hex::encode(sig_with_recovery)))
}

/// Recover the signer address from a digest and a `r || s || v` signature
pub fn recover_address(digest: &[u8; 32], signature: &str) -> Result<String, ClearNodeError> {
    let bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|e| ClearNodeError::signing(format!("Invalid signature hex: {}", e)))?;
    if bytes.len() != 65 {
        return Err(ClearNodeError::signing(format!(
            "Invalid signature length: {}",
            bytes.len()
        )));
    }

    let v = i32::from(bytes[64]);
    let recovery_id = RecoveryId::from_i32(if v >= 27 { v - 27 } else { v })
        .map_err(|e| ClearNodeError::signing(format!("Invalid recovery id: {}", e)))?;
    let signature = RecoverableSignature::from_compact(&bytes[..64], recovery_id)
        .map_err(|e| ClearNodeError::signing(format!("Invalid signature: {}", e)))?;
    let message = Message::from_digest_slice(digest)
        .map_err(|e| ClearNodeError::signing(format!("Failed to create message: {}", e)))?;

    let public_key = Secp256k1::new()
        .recover_ecdsa(&message, &signature)
        .map_err(|e| ClearNodeError::signing(format!("Recovery failed: {}", e)))?;

    Ok(public_key_to_address(&public_key))
}

/// Digest a payload exactly the way [`MessageSigner::sign`] does
pub fn payload_digest(payload: &Value) -> Result<[u8; 32], ClearNodeError> {
    let canonical = serde_json::to_string(payload)?;
    Ok(keccak256(canonical.as_bytes()))
}

/// secp256k1 session key
#[derive(Clone)]
pub struct SessionKeySigner {
    secret_key: Option<SecretKey>,
    address: Option<String>,
    secp: Secp256k1<secp256k1::All>,
}

impl fmt::Debug for SessionKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeySigner")
            .field("address", &self.address)
            .field("secret_key", &self.secret_key.map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SessionKeySigner {
    /// Signer without key material; every signature attempt fails
    pub fn empty() -> Self {
        Self {
            secret_key: None,
            address: None,
            secp: Secp256k1::new(),
        }
    }

    pub fn with_private_key(private_key: &str) -> Result<Self, ClearNodeError> {
        let secret_key = parse_secret_key(private_key)?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        Ok(Self {
            secret_key: Some(secret_key),
            address: Some(public_key_to_address(&public_key)),
            secp,
        })
    }

    /// Fresh random session key
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut rand::thread_rng());

        Self {
            secret_key: Some(secret_key),
            address: Some(public_key_to_address(&public_key)),
            secp,
        }
    }

    pub fn can_sign(&self) -> bool {
        self.secret_key.is_some()
    }
}

impl MessageSigner for SessionKeySigner {
    fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    fn sign(&self, payload: &Value) -> Result<String, ClearNodeError> {
        let secret_key = self
            .secret_key
            .as_ref()
            .ok_or_else(|| ClearNodeError::signing("No session key available for signing"))?;

        let digest = payload_digest(payload)?;
        sign_digest(&self.secp, secret_key, &digest)
    }
}

/// Wallet backed by an in-process private key
#[derive(Clone)]
pub struct LocalWallet {
    secret_key: SecretKey,
    address: String,
    secp: Secp256k1<secp256k1::All>,
}

impl fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl LocalWallet {
    pub fn with_private_key(private_key: &str) -> Result<Self, ClearNodeError> {
        let secret_key = parse_secret_key(private_key)?;
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);

        Ok(Self {
            secret_key,
            address: public_key_to_address(&public_key),
            secp,
        })
    }
}

#[async_trait]
impl WalletSigner for LocalWallet {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign_typed_data(&self, data: &TypedData) -> Result<String, ClearNodeError> {
        let digest = data.signing_hash()?;
        sign_digest(&self.secp, &self.secret_key, &digest)
    }
}
