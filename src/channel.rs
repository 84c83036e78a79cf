//! Principals and the envelope transforms between them.
//!
//! Every principal owns a keyring (peer code → capability, with its own
//! identity stored under its own code) and a single-slot inbox. Exchanges are
//! strictly lock-step: a send writes straight into the peer's inbox, replacing
//! whatever was there.

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::crypto::Capability;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Envelope {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            signature: None,
        }
    }

    /// Wrap a typed protocol message as JSON content.
    pub fn json<T: Serialize>(message: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_string(message)?))
    }
}

/// Which transforms a hop applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protection {
    pub encrypt: bool,
    pub sign: bool,
}

impl Protection {
    pub const PLAIN: Self = Self {
        encrypt: false,
        sign: false,
    };
    pub const SIGNED: Self = Self {
        encrypt: false,
        sign: true,
    };
    pub const SEALED: Self = Self {
        encrypt: true,
        sign: false,
    };
    pub const SEALED_SIGNED: Self = Self {
        encrypt: true,
        sign: true,
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    code: String,
    keys: BTreeMap<String, Capability>,
    #[serde(skip)]
    last_message: Option<Envelope>,
}

impl Principal {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            keys: BTreeMap::new(),
            last_message: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn key_for(&self, code: &str) -> Option<&Capability> {
        self.keys.get(code)
    }

    pub fn own_key(&self) -> Option<&Capability> {
        self.keys.get(&self.code)
    }

    /// Install (or replace) the capability used with `peer`.
    pub fn add_key(&mut self, peer: impl Into<String>, cap: Capability) {
        self.keys.insert(peer.into(), cap);
    }

    pub fn remove_key(&mut self, peer: &str) -> Option<Capability> {
        self.keys.remove(peer)
    }

    pub fn set_own_key(&mut self, cap: Capability) {
        let code = self.code.clone();
        self.keys.insert(code, cap);
    }

    pub fn own_public(&self) -> Option<Capability> {
        self.own_key().and_then(Capability::share_public)
    }

    pub fn last_message(&self) -> Option<&Envelope> {
        self.last_message.as_ref()
    }

    /// Decode the inbox as the message this step expects.
    ///
    /// A message the channel dropped leaves an older envelope behind; that
    /// shows up here as content of the wrong shape, so it is reported as a
    /// replay at `hop` rather than a parse failure.
    pub fn read<T: DeserializeOwned>(&self, hop: &str) -> Result<T> {
        let env = self
            .last_message
            .as_ref()
            .ok_or_else(|| Error::replay(hop, format!("{} has an empty inbox", self.code)))?;
        serde_json::from_str(&env.content).map_err(|e| {
            Error::replay(
                hop,
                format!("{} holds a stale or foreign message: {e}", self.code),
            )
        })
    }

    /// Capability for encrypting to `peer`: only the peer's own entry will do.
    fn encryption_key(&self, peer: &str) -> Result<&Capability> {
        self.keys
            .get(peer)
            .ok_or_else(|| Error::missing_key(&self.code, peer))
    }

    /// A shared secret with the peer MACs; otherwise the principal signs with
    /// its own private key.
    fn signing_key(&self, peer: &str) -> Result<&Capability> {
        match self.keys.get(peer) {
            Some(cap @ Capability::Symmetric(_)) => Ok(cap),
            _ => self
                .own_key()
                .filter(|c| c.has_private())
                .ok_or_else(|| Error::missing_key(&self.code, peer)),
        }
    }

    /// A shared secret decrypts; otherwise the principal's own private key.
    fn decryption_key(&self, peer: &str) -> Result<&Capability> {
        match self.keys.get(peer) {
            Some(cap @ Capability::Symmetric(_)) => Ok(cap),
            _ => self
                .own_key()
                .filter(|c| c.has_private())
                .ok_or_else(|| Error::missing_key(&self.code, peer)),
        }
    }

    /// The peer's capability checks signatures; own key is the last resort.
    fn verification_key(&self, peer: &str) -> Result<&Capability> {
        self.keys
            .get(peer)
            .or_else(|| self.own_key())
            .ok_or_else(|| Error::missing_key(&self.code, peer))
    }

    /// Apply `protection` to `message` for `peer`: encrypt first, then sign.
    ///
    /// # Errors
    /// `Error::MissingKey` when no capability can provide the requested
    /// protection; crypto failures propagate.
    pub fn seal(&self, peer: &str, message: Envelope, protection: Protection) -> Result<Envelope> {
        debug!(
            "{} -> {peer} (encrypt={}, sign={})",
            self.code, protection.encrypt, protection.sign
        );
        let mut out = message;
        if protection.encrypt {
            let cap = self.encryption_key(peer)?;
            out = Envelope::new(cap.encrypt(&out.content)?);
        }
        if protection.sign {
            let cap = self.signing_key(peer)?;
            out.signature = Some(cap.sign(&out.content)?);
        }
        Ok(out)
    }

    /// Protect `message` for `peer` and deliver it into the peer's inbox.
    pub fn send(&self, peer: &mut Principal, message: Envelope, protection: Protection) -> Result<()> {
        let sealed = self.seal(&peer.code, message, protection)?;
        peer.receive(&self.code, sealed, protection)
    }

    /// Undo `protection` on an envelope from `peer` and store the result.
    ///
    /// A signature that fails to verify drops the envelope: the inbox keeps its
    /// previous content and the protocol step reading it fails its own checks.
    pub fn receive(&mut self, peer: &str, envelope: Envelope, protection: Protection) -> Result<()> {
        if !protection.encrypt && !protection.sign {
            self.last_message = Some(envelope);
            return Ok(());
        }
        if protection.sign {
            let cap = self.verification_key(peer)?;
            let verified = envelope
                .signature
                .as_deref()
                .is_some_and(|sig| cap.verify(&envelope.content, sig));
            if !verified {
                warn!("{} dropped an unverifiable message from {peer}", self.code);
                return Ok(());
            }
        }
        let content = if protection.encrypt {
            self.decryption_key(peer)?.decrypt(&envelope.content)?
        } else {
            envelope.content
        };
        debug!("{} <- {peer}", self.code);
        self.last_message = Some(Envelope::new(content));
        Ok(())
    }
}
