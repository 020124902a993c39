//! Key management for the three per-actor key domains.
//!
//! A [`KeyRing`] derives governance, storage and credential-signing keypairs
//! from a single BIP-39 phrase using hardened per-domain paths. The storage
//! key owns every ledger chain, the governance key controls the DID on the
//! governance chain, and the credential key signs verifiable credentials.
use std::fmt;

use bip39::Mnemonic;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use ed25519_dalek_bip32::{DerivationPath, ExtendedSigningKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::utils;

/// An error relating to idchain key management.
#[derive(Error, Debug)]
pub enum KeyManagerError {
    /// Phrase failed BIP-39 validation.
    #[error("Invalid mnemonic phrase.")]
    InvalidPhrase,
    /// BIP-32 derivation failed.
    #[error("Key derivation failed.")]
    DerivationFailed,
    /// Public key bytes are not a valid ed25519 point.
    #[error("Invalid public key encoding.")]
    InvalidPublicKey,
    /// Signature bytes are malformed.
    #[error("Invalid signature encoding.")]
    InvalidSignature,
    /// Export encryption failed.
    #[error("Key export encryption failed.")]
    EncryptionFailed,
    /// Wrong password or corrupted export blob.
    #[error("Key export decryption failed.")]
    DecryptionFailed,
    /// Wrapped serialization error.
    #[error("Wrapped serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The three key domains held per actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Governance,
    Storage,
    Credential,
}

impl KeyType {
    /// Hardened derivation path for the domain. Ed25519 BIP-32 only supports
    /// hardened children.
    fn derivation_path(&self) -> &'static str {
        match self {
            KeyType::Governance => "m/801'/0'",
            KeyType::Storage => "m/801'/1'",
            KeyType::Credential => "m/801'/2'",
        }
    }
}

/// An ed25519 keypair.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generates a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(bytes),
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, KeyManagerError> {
        let bytes: [u8; 32] = hex::decode(secret_hex)
            .map_err(|_| KeyManagerError::InvalidPublicKey)?
            .try_into()
            .map_err(|_| KeyManagerError::InvalidPublicKey)?;
        Ok(Self::from_secret_bytes(&bytes))
    }

    /// Hex-encoded public key.
    pub fn public_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().as_bytes())
    }

    pub(crate) fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    /// Signs raw bytes, returning the hex-encoded signature.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }

    /// Signs the JCS canonicalization of a JSON value.
    pub fn sign_canonical(&self, value: &Value) -> Result<String, KeyManagerError> {
        let input = utils::canonicalize(value)?;
        Ok(self.sign_hex(input.as_bytes()))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print the secret half.
        write!(f, "Keypair({})", self.public_hex())
    }
}

/// Verifies a hex signature over a message under a hex public key.
pub fn verify(public_hex: &str, message: &[u8], signature_hex: &str) -> Result<bool, KeyManagerError> {
    let public_bytes: [u8; 32] = hex::decode(public_hex)
        .map_err(|_| KeyManagerError::InvalidPublicKey)?
        .try_into()
        .map_err(|_| KeyManagerError::InvalidPublicKey)?;
    let public = VerifyingKey::from_bytes(&public_bytes)
        .map_err(|_| KeyManagerError::InvalidPublicKey)?;
    let signature_bytes =
        hex::decode(signature_hex).map_err(|_| KeyManagerError::InvalidSignature)?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|_| KeyManagerError::InvalidSignature)?;
    Ok(public.verify(message, &signature).is_ok())
}

/// The three key domains of one actor, derived from one mnemonic phrase.
pub struct KeyRing {
    phrase: String,
    governance: Keypair,
    storage: Keypair,
    credential: Keypair,
}

/// Serialized form placed inside the encrypted export blob. The storage key
/// is carried explicitly because rotation can detach it from the phrase.
#[derive(Serialize, Deserialize)]
struct KeyRingSecrets {
    phrase: String,
    storage: String,
}

/// Password-encrypted export envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedKeyRing {
    pub did: String,
    pub keys: ExportBlob,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportBlob {
    salt: String,
    nonce: String,
    cipher: String,
}

impl KeyRing {
    /// Generates a new random keyring.
    pub fn generate() -> Result<Self, KeyManagerError> {
        let mut entropy = [0u8; 16];
        OsRng.fill_bytes(&mut entropy);
        let mnemonic =
            Mnemonic::from_entropy(&entropy).map_err(|_| KeyManagerError::InvalidPhrase)?;
        Self::from_phrase(&mnemonic.to_string())
    }

    /// Re-derives a keyring from a BIP-39 phrase.
    pub fn from_phrase(phrase: &str) -> Result<Self, KeyManagerError> {
        let mnemonic = Mnemonic::parse(phrase).map_err(|_| KeyManagerError::InvalidPhrase)?;
        let seed = mnemonic.to_seed("");
        Ok(Self {
            phrase: phrase.to_string(),
            governance: derive(&seed, KeyType::Governance)?,
            storage: derive(&seed, KeyType::Storage)?,
            credential: derive(&seed, KeyType::Credential)?,
        })
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn governance(&self) -> &Keypair {
        &self.governance
    }

    pub fn storage(&self) -> &Keypair {
        &self.storage
    }

    pub fn credential(&self) -> &Keypair {
        &self.credential
    }

    pub fn key(&self, key_type: KeyType) -> &Keypair {
        match key_type {
            KeyType::Governance => &self.governance,
            KeyType::Storage => &self.storage,
            KeyType::Credential => &self.credential,
        }
    }

    /// The actor's DID: the hex public key of the storage domain.
    pub fn did(&self) -> String {
        self.storage.public_hex()
    }

    /// Replaces the storage keypair after a completed rotation. The phrase no
    /// longer re-derives this key; export carries it explicitly.
    pub fn rotate_storage(&mut self, keypair: Keypair) {
        self.storage = keypair;
    }

    /// Password-encrypted export for account portability.
    pub fn export(&self, password: &str) -> Result<String, KeyManagerError> {
        let secrets = KeyRingSecrets {
            phrase: self.phrase.clone(),
            storage: self.storage.secret_hex(),
        };
        let plaintext = serde_json::to_vec(&secrets)?;
        let keys = seal(password, &plaintext)?;
        Ok(serde_json::to_string(&ExportedKeyRing {
            did: self.did(),
            keys,
        })?)
    }

    /// Decrypts and rebuilds an exported keyring.
    pub fn import(exported: &str, password: &str) -> Result<Self, KeyManagerError> {
        let envelope: ExportedKeyRing = serde_json::from_str(exported)?;
        let plaintext = open(password, &envelope.keys)?;
        let secrets: KeyRingSecrets =
            serde_json::from_slice(&plaintext).map_err(|_| KeyManagerError::DecryptionFailed)?;
        let mut ring = Self::from_phrase(&secrets.phrase)?;
        let storage = Keypair::from_secret_hex(&secrets.storage)?;
        if storage.public_hex() != ring.storage.public_hex() {
            ring.rotate_storage(storage);
        }
        Ok(ring)
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyRing(did={})", self.did())
    }
}

fn derive(seed: &[u8], key_type: KeyType) -> Result<Keypair, KeyManagerError> {
    let path: DerivationPath = key_type
        .derivation_path()
        .parse()
        .map_err(|_| KeyManagerError::DerivationFailed)?;
    let extended =
        ExtendedSigningKey::from_seed(seed).map_err(|_| KeyManagerError::DerivationFailed)?;
    let child = extended
        .derive(&path)
        .map_err(|_| KeyManagerError::DerivationFailed)?;
    Ok(Keypair {
        signing: child.signing_key,
    })
}

fn seal(password: &str, plaintext: &[u8]) -> Result<ExportBlob, KeyManagerError> {
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let key = password_key(password, &salt)?;
    let mut nonce = [0u8; 24];
    OsRng.fill_bytes(&mut nonce);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&key))
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|_| KeyManagerError::EncryptionFailed)?;
    Ok(ExportBlob {
        salt: hex::encode(salt),
        nonce: hex::encode(nonce),
        cipher: hex::encode(cipher),
    })
}

fn open(password: &str, blob: &ExportBlob) -> Result<Vec<u8>, KeyManagerError> {
    let salt = hex::decode(&blob.salt).map_err(|_| KeyManagerError::DecryptionFailed)?;
    let nonce = hex::decode(&blob.nonce).map_err(|_| KeyManagerError::DecryptionFailed)?;
    let cipher = hex::decode(&blob.cipher).map_err(|_| KeyManagerError::DecryptionFailed)?;
    if nonce.len() != 24 {
        return Err(KeyManagerError::DecryptionFailed);
    }
    let key = password_key(password, &salt)?;
    XChaCha20Poly1305::new(Key::from_slice(&key))
        .decrypt(XNonce::from_slice(&nonce), cipher.as_slice())
        .map_err(|_| KeyManagerError::DecryptionFailed)
}

fn password_key(password: &str, salt: &[u8]) -> Result<[u8; 32], KeyManagerError> {
    let mut key = [0u8; 32];
    argon2::Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|_| KeyManagerError::EncryptionFailed)?;
    Ok(key)
}
