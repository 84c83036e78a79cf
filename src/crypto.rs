//! Cryptographic capabilities bound to a key relationship.
//!
//! A capability is either a shared symmetric secret (AEAD + MAC) or an
//! asymmetric identity (Ed25519 for signatures, X25519 sealed boxes for
//! encryption). The secret halves of an asymmetric capability are optional so
//! the same type carries a peer's public-only view.

use std::collections::BTreeMap;
use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use blake3::Hasher;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::identity::{did_key_from_public, random_bytes, with_fresh_seed};

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const X25519_LEN: usize = 32;
const SYMMETRIC_ALG: &str = "chacha20poly1305+hmac-sha256";
const SEAL_INFO: &[u8] = b"mobility-ledger/seal";
const SESSION_INFO: &[u8] = b"mobility-ledger/session";

/// BLAKE3 hex digest of a string; the hash every ledger structure uses.
pub fn hash(data: &str) -> String {
    blake3_hex(data.as_bytes())
}

pub fn blake3_hex(data: &[u8]) -> String {
    let mut h = Hasher::new();
    h.update(data);
    hex::encode(h.finalize().as_bytes())
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "CapabilityRecord", into = "CapabilityRecord")]
pub enum Capability {
    Symmetric(SymmetricKey),
    Asymmetric(KeyPair),
}

#[derive(Clone)]
pub struct SymmetricKey {
    secret: [u8; 32],
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

#[derive(Clone)]
pub struct KeyPair {
    signing: Option<SigningKey>,
    verifying: VerifyingKey,
    agreement: Option<StaticSecret>,
    agreement_public: X25519Public,
}

impl SymmetricKey {
    pub fn generate() -> Result<Self> {
        with_fresh_seed(|seed| Self::from_secret(*seed))?
    }

    pub fn from_secret(secret: [u8; 32]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, &secret);
        let mut okm = [0u8; 64];
        hk.expand(SESSION_INFO, &mut okm)
            .map_err(|e| Error::Crypto(format!("hkdf expand: {e}")))?;
        let mut enc_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        enc_key.copy_from_slice(&okm[..32]);
        mac_key.copy_from_slice(&okm[32..]);
        okm.zeroize();
        Ok(Self {
            secret,
            enc_key,
            mac_key,
        })
    }

    /// Split the key into named fields for the field-by-field session handshake.
    pub fn to_fields(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("algorithm".to_string(), SYMMETRIC_ALG.to_string()),
            ("secret".to_string(), hex::encode(self.secret)),
        ])
    }

    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        match fields.get("algorithm").map(String::as_str) {
            Some(SYMMETRIC_ALG) => {}
            Some(other) => return Err(Error::Crypto(format!("unsupported algorithm: {other}"))),
            None => return Err(Error::Crypto("missing field: algorithm".into())),
        }
        let secret = fields
            .get("secret")
            .ok_or_else(|| Error::Crypto("missing field: secret".into()))?;
        Self::from_secret(decode_array(secret, "secret")?)
    }

    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.enc_key));
        let nonce = random_bytes::<NONCE_LEN>()?;
        let ct = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(general_purpose::STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let data = decode_b64(ciphertext)?;
        if data.len() < NONCE_LEN {
            return Err(Error::Crypto("ciphertext too short".into()));
        }
        let (nonce, ct) = data.split_at(NONCE_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.enc_key));
        let pt = cipher
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|e| Error::Crypto(format!("decryption failed: {e}")))?;
        String::from_utf8(pt).map_err(|e| Error::Crypto(format!("plaintext not utf-8: {e}")))
    }

    fn mac(&self) -> Result<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(&self.mac_key)
            .map_err(|e| Error::Crypto(format!("hmac key: {e}")))
    }

    fn sign(&self, content: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, content: &str, tag: &str) -> bool {
        let (Ok(mut mac), Ok(tag)) = (self.mac(), hex::decode(tag)) else {
            return false;
        };
        mac.update(content.as_bytes());
        mac.verify_slice(&tag).is_ok()
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.secret.zeroize();
        self.enc_key.zeroize();
        self.mac_key.zeroize();
    }
}

impl KeyPair {
    pub fn generate() -> Result<Self> {
        let signing = with_fresh_seed(SigningKey::from_bytes)?;
        let agreement = with_fresh_seed(|seed| StaticSecret::from(*seed))?;
        Ok(Self {
            verifying: signing.verifying_key(),
            agreement_public: X25519Public::from(&agreement),
            signing: Some(signing),
            agreement: Some(agreement),
        })
    }

    pub fn public_only(&self) -> Self {
        Self {
            signing: None,
            verifying: self.verifying,
            agreement: None,
            agreement_public: self.agreement_public,
        }
    }

    pub fn has_private(&self) -> bool {
        self.signing.is_some() && self.agreement.is_some()
    }

    pub fn did(&self) -> String {
        did_key_from_public(self.verifying.as_bytes())
    }

    /// Hex of both public halves; what fingerprints and ledger authors hash.
    pub fn public_material(&self) -> String {
        format!(
            "{}{}",
            hex::encode(self.verifying.as_bytes()),
            hex::encode(self.agreement_public.as_bytes())
        )
    }

    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let ephemeral = with_fresh_seed(|seed| StaticSecret::from(*seed))?;
        let ephemeral_public = X25519Public::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.agreement_public);
        let key = seal_key(
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            self.agreement_public.as_bytes(),
        )?;
        let nonce = random_bytes::<NONCE_LEN>()?;
        let ct = ChaCha20Poly1305::new(Key::from_slice(&key))
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| Error::Crypto(format!("seal failed: {e}")))?;
        let mut out = Vec::with_capacity(X25519_LEN + NONCE_LEN + ct.len());
        out.extend_from_slice(ephemeral_public.as_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ct);
        Ok(general_purpose::STANDARD.encode(out))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let secret = self
            .agreement
            .as_ref()
            .ok_or_else(|| Error::Crypto("no private agreement key".into()))?;
        let data = decode_b64(ciphertext)?;
        if data.len() < X25519_LEN + NONCE_LEN {
            return Err(Error::Crypto("sealed box too short".into()));
        }
        let (eph, rest) = data.split_at(X25519_LEN);
        let (nonce, ct) = rest.split_at(NONCE_LEN);
        let mut eph_bytes = [0u8; X25519_LEN];
        eph_bytes.copy_from_slice(eph);
        let ephemeral_public = X25519Public::from(eph_bytes);
        let shared = secret.diffie_hellman(&ephemeral_public);
        let key = seal_key(
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            self.agreement_public.as_bytes(),
        )?;
        let pt = ChaCha20Poly1305::new(Key::from_slice(&key))
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|e| Error::Crypto(format!("open failed: {e}")))?;
        String::from_utf8(pt).map_err(|e| Error::Crypto(format!("plaintext not utf-8: {e}")))
    }

    fn sign(&self, content: &str) -> Result<String> {
        let signing = self
            .signing
            .as_ref()
            .ok_or_else(|| Error::Crypto("no private signing key".into()))?;
        let sig: Signature = signing.sign(content.as_bytes());
        Ok(general_purpose::STANDARD.encode(sig.to_bytes()))
    }

    fn verify(&self, content: &str, signature: &str) -> bool {
        let Ok(bytes) = decode_b64(signature) else {
            return false;
        };
        let Ok(sig) = Signature::from_slice(&bytes) else {
            return false;
        };
        self.verifying.verify(content.as_bytes(), &sig).is_ok()
    }
}

fn seal_key(shared: &[u8], ephemeral: &[u8], recipient: &[u8]) -> Result<[u8; 32]> {
    let mut salt = Vec::with_capacity(ephemeral.len() + recipient.len());
    salt.extend_from_slice(ephemeral);
    salt.extend_from_slice(recipient);
    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = [0u8; 32];
    hk.expand(SEAL_INFO, &mut key)
        .map_err(|e| Error::Crypto(format!("hkdf expand: {e}")))?;
    Ok(key)
}

impl Capability {
    pub fn generate_symmetric() -> Result<Self> {
        Ok(Self::Symmetric(SymmetricKey::generate()?))
    }

    pub fn generate_asymmetric() -> Result<Self> {
        Ok(Self::Asymmetric(KeyPair::generate()?))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        match self {
            Self::Symmetric(k) => k.encrypt(plaintext),
            Self::Asymmetric(k) => k.encrypt(plaintext),
        }
    }

    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        match self {
            Self::Symmetric(k) => k.decrypt(ciphertext),
            Self::Asymmetric(k) => k.decrypt(ciphertext),
        }
    }

    pub fn sign(&self, content: &str) -> Result<String> {
        match self {
            Self::Symmetric(k) => k.sign(content),
            Self::Asymmetric(k) => k.sign(content),
        }
    }

    #[must_use]
    pub fn verify(&self, content: &str, signature: &str) -> bool {
        match self {
            Self::Symmetric(k) => k.verify(content, signature),
            Self::Asymmetric(k) => k.verify(content, signature),
        }
    }

    /// Public-only view of an asymmetric capability. Shared secrets have none.
    pub fn share_public(&self) -> Option<Self> {
        match self {
            Self::Symmetric(_) => None,
            Self::Asymmetric(k) => Some(Self::Asymmetric(k.public_only())),
        }
    }

    /// Whether this capability can decrypt and sign on its own.
    pub fn has_private(&self) -> bool {
        match self {
            Self::Symmetric(_) => true,
            Self::Asymmetric(k) => k.has_private(),
        }
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::Symmetric(_))
    }

    /// Stable identity of the key relationship: hash of the public material
    /// (asymmetric) or of the derived MAC key (symmetric).
    pub fn fingerprint(&self) -> String {
        match self {
            Self::Symmetric(k) => blake3_hex(&k.mac_key),
            Self::Asymmetric(k) => hash(&k.public_material()),
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Symmetric(_) => f
                .debug_struct("Symmetric")
                .field("fingerprint", &self.fingerprint())
                .finish(),
            Self::Asymmetric(k) => f
                .debug_struct("Asymmetric")
                .field("did", &k.did())
                .field("private", &k.has_private())
                .finish(),
        }
    }
}

impl PartialEq for Capability {
    fn eq(&self, other: &Self) -> bool {
        self.is_symmetric() == other.is_symmetric()
            && self.has_private() == other.has_private()
            && self.fingerprint() == other.fingerprint()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CapabilityRecord {
    Symmetric {
        secret: String,
    },
    Asymmetric {
        verifying: String,
        agreement: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signing_secret: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agreement_secret: Option<String>,
    },
}

impl From<Capability> for CapabilityRecord {
    fn from(cap: Capability) -> Self {
        match cap {
            Capability::Symmetric(k) => Self::Symmetric {
                secret: hex::encode(k.secret),
            },
            Capability::Asymmetric(k) => Self::Asymmetric {
                verifying: hex::encode(k.verifying.as_bytes()),
                agreement: hex::encode(k.agreement_public.as_bytes()),
                signing_secret: k.signing.as_ref().map(|s| hex::encode(s.to_bytes())),
                agreement_secret: k.agreement.as_ref().map(|s| hex::encode(s.to_bytes())),
            },
        }
    }
}

impl TryFrom<CapabilityRecord> for Capability {
    type Error = Error;

    fn try_from(record: CapabilityRecord) -> Result<Self> {
        match record {
            CapabilityRecord::Symmetric { secret } => Ok(Self::Symmetric(
                SymmetricKey::from_secret(decode_array(&secret, "secret")?)?,
            )),
            CapabilityRecord::Asymmetric {
                verifying,
                agreement,
                signing_secret,
                agreement_secret,
            } => {
                let verifying = VerifyingKey::from_bytes(&decode_array(&verifying, "verifying")?)
                    .map_err(|e| Error::Crypto(format!("bad verifying key: {e}")))?;
                let agreement_public = X25519Public::from(decode_array(&agreement, "agreement")?);
                let signing = signing_secret
                    .map(|s| decode_array(&s, "signing_secret").map(|b| SigningKey::from_bytes(&b)))
                    .transpose()?;
                if let Some(s) = &signing {
                    if s.verifying_key() != verifying {
                        return Err(Error::Crypto("signing secret does not match public key".into()));
                    }
                }
                let agreement = agreement_secret
                    .map(|s| decode_array(&s, "agreement_secret").map(StaticSecret::from))
                    .transpose()?;
                Ok(Self::Asymmetric(KeyPair {
                    signing,
                    verifying,
                    agreement,
                    agreement_public,
                }))
            }
        }
    }
}

fn decode_b64(s: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(s.as_bytes())
        .map_err(|e| Error::Crypto(format!("bad base64: {e}")))
}

fn decode_array<const N: usize>(s: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(s).map_err(|e| Error::Crypto(format!("bad {what} hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::Crypto(format!("bad {what} length")))
}
