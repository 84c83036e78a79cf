use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use super::{receive_fresh, timestamped, Context};
use crate::actors::University;
use crate::certificate::{Certificate, CertificationAuthority};
use crate::channel::Protection;
use crate::crypto::Capability;
use crate::error::{Error, Result};
use crate::registry::TrustRegistry;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CertificateDelivery {
    certificate: Certificate,
    ts: DateTime<Utc>,
}

timestamped!(CertificateDelivery);

/// Give `university` a key pair (if it has none), have `ca` certify its public
/// half, whitelist it in `registry`, and deliver the certificate to it.
pub fn certify_university(
    ctx: &Context<'_>,
    ca: &mut CertificationAuthority,
    registry: &mut TrustRegistry,
    university: &mut University,
) -> Result<Certificate> {
    if !university
        .principal()
        .own_key()
        .is_some_and(|k| !k.is_symmetric() && k.has_private())
    {
        university
            .principal_mut()
            .set_own_key(Capability::generate_asymmetric()?);
    }
    let public = university.public_capability()?;
    let code = university.code().to_string();
    let cert = ca.register(&code, &public, ctx.now())?;
    registry.register_principal(&code, &public)?;

    let ca_key = ca.public_capability()?;
    university
        .principal_mut()
        .add_key(registry.code(), registry.public_capability()?);
    university.principal_mut().add_key(ca.code(), ca_key.clone());

    let delivery = CertificateDelivery {
        certificate: cert,
        ts: ctx.now(),
    };
    ctx.transmit(
        "certify/deliver",
        ca.principal(),
        university.principal_mut(),
        &delivery,
        Protection::SIGNED,
    )?;
    let delivery: CertificateDelivery =
        receive_fresh(ctx, "certify/deliver", university.principal())?;
    let cert = delivery.certificate;
    if cert.subject() != code || cert.trusted_key(&ca_key)? != public {
        return Err(Error::Signature(format!(
            "certificate delivered to {code} does not bind its own key"
        )));
    }
    university.set_certificate(cert.clone());
    info!("{code} certified by {} and registered with {}", ca.code(), registry.code());
    Ok(cert)
}
