use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::channel::Principal;
use crate::crypto::Capability;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateContent {
    pub subject: String,
    pub key: Capability,
    pub issued_at: DateTime<Utc>,
}

/// Public key binding signed by a certification authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub content: CertificateContent,
    pub issuer: String,
    pub signature: String,
}

impl Certificate {
    fn signed_bytes(content: &CertificateContent) -> Result<String> {
        Ok(serde_json::to_string(content)?)
    }

    #[must_use]
    pub fn verify(&self, issuer_key: &Capability) -> bool {
        Self::signed_bytes(&self.content)
            .map(|body| issuer_key.verify(&body, &self.signature))
            .unwrap_or(false)
    }

    /// Embedded key, returned only once the issuer's signature checks out.
    ///
    /// # Errors
    /// `Error::Signature` when the certificate was not signed by `issuer_key`.
    pub fn trusted_key(&self, issuer_key: &Capability) -> Result<Capability> {
        if !self.verify(issuer_key) {
            return Err(Error::Signature(format!(
                "certificate of {} does not verify against {}",
                self.content.subject, self.issuer
            )));
        }
        Ok(self.content.key.clone())
    }

    pub fn subject(&self) -> &str {
        &self.content.subject
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificationAuthority {
    principal: Principal,
    certificates: BTreeMap<String, Certificate>,
}

impl CertificationAuthority {
    pub fn new(code: impl Into<String>) -> Result<Self> {
        let mut principal = Principal::new(code);
        principal.set_own_key(Capability::generate_asymmetric()?);
        Ok(Self {
            principal,
            certificates: BTreeMap::new(),
        })
    }

    pub fn code(&self) -> &str {
        self.principal.code()
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn public_capability(&self) -> Result<Capability> {
        self.principal
            .own_public()
            .ok_or_else(|| Error::missing_key(self.code(), self.code()))
    }

    /// Certify `key` as belonging to `subject`, replacing any earlier certificate.
    pub fn register(
        &mut self,
        subject: &str,
        key: &Capability,
        now: DateTime<Utc>,
    ) -> Result<Certificate> {
        let public = key
            .share_public()
            .ok_or_else(|| Error::Crypto(format!("{subject}: only public keys are certified")))?;
        let signer = self
            .principal
            .own_key()
            .ok_or_else(|| Error::missing_key(self.principal.code(), subject))?;
        let content = CertificateContent {
            subject: subject.to_string(),
            key: public.clone(),
            issued_at: now,
        };
        let signature = signer.sign(&Certificate::signed_bytes(&content)?)?;
        let cert = Certificate {
            content,
            issuer: self.code().to_string(),
            signature,
        };
        self.principal.add_key(subject, public);
        self.certificates.insert(subject.to_string(), cert.clone());
        info!("{}: certified {subject}", self.code());
        Ok(cert)
    }

    pub fn certificate(&self, subject: &str) -> Result<&Certificate> {
        self.certificates
            .get(subject)
            .ok_or_else(|| Error::NotFound(format!("{} holds no certificate for {subject}", self.code())))
    }

    /// Look up and verify `subject`'s certificate in one step.
    pub fn trusted_key(&self, subject: &str) -> Result<Capability> {
        self.certificate(subject)?
            .trusted_key(&self.public_capability()?)
    }
}
