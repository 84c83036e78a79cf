//! Revocation by the issuing university and liveness checks by relying ones.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::{expect_id, expect_nonce, fresh_nonce, receive_fresh, run_id, timestamped, Context};
use crate::actors::University;
use crate::channel::Protection;
use crate::error::{Error, Result};
use crate::registry::TrustRegistry;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RevocationRequest {
    credential_id: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RevocationReceipt {
    credential_id: String,
    tombstone_id: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusRequest {
    credential_id: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatusReply {
    credential_id: String,
    live: bool,
    nonce: u64,
    ts: DateTime<Utc>,
}

timestamped!(RevocationRequest, RevocationReceipt, StatusRequest, StatusReply);

/// Revoke the credential `host` issued to `student`. Returns the tombstone id.
///
/// # Errors
/// `Error::NotFound` if `host` never issued one; registry refusals
/// (`Blacklisted`, `AlreadyRevoked`) propagate unchanged.
pub fn revoke_credential(
    ctx: &Context<'_>,
    host: &mut University,
    registry: &mut TrustRegistry,
    student: &str,
) -> Result<String> {
    let run = run_id();
    let credential_id = host.issued_credential(student)?.id.clone();

    let nonce = fresh_nonce();
    let request = RevocationRequest {
        credential_id: credential_id.clone(),
        nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "revoke/request",
        host.principal(),
        registry.principal_mut(),
        &request,
        Protection::SIGNED,
    )?;
    let request: RevocationRequest = receive_fresh(ctx, "revoke/request", registry.principal())?;
    let tombstone_id = registry.revoke(&request.credential_id, host.code())?;
    let receipt = RevocationReceipt {
        credential_id: request.credential_id,
        tombstone_id,
        nonce: request.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "revoke/receipt",
        registry.principal(),
        host.principal_mut(),
        &receipt,
        Protection::SIGNED,
    )?;
    let receipt: RevocationReceipt = receive_fresh(ctx, "revoke/receipt", host.principal())?;
    expect_nonce("revoke/receipt", "nonce", nonce, receipt.nonce)?;
    expect_id("revoke/receipt", &credential_id, &receipt.credential_id)?;
    info!("[{run}] {} revoked {credential_id} of {student}", host.code());
    Ok(receipt.tombstone_id)
}

/// Ask the registry whether the credential `relying` verified for `student`
/// is still live. A negative answer clears the cached credential.
///
/// # Errors
/// `Error::NotFound` if nothing is cached for `student`;
/// `Error::Blacklisted` if the registry refuses `relying`.
pub fn verify_credential(
    ctx: &Context<'_>,
    relying: &mut University,
    registry: &mut TrustRegistry,
    student: &str,
) -> Result<bool> {
    let run = run_id();
    let credential_id = relying
        .verified_credential(student)
        .map(|c| c.id.clone())
        .ok_or_else(|| {
            Error::NotFound(format!(
                "{} holds no verified credential for {student}",
                relying.code()
            ))
        })?;

    let nonce = fresh_nonce();
    let request = StatusRequest {
        credential_id: credential_id.clone(),
        nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "verify/request",
        relying.principal(),
        registry.principal_mut(),
        &request,
        Protection::SIGNED,
    )?;
    let request: StatusRequest = receive_fresh(ctx, "verify/request", registry.principal())?;
    registry.ensure_trusted(relying.code())?;
    let reply = StatusReply {
        live: registry.validate_id(&request.credential_id),
        credential_id: request.credential_id,
        nonce: request.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "verify/reply",
        registry.principal(),
        relying.principal_mut(),
        &reply,
        Protection::SIGNED,
    )?;
    let reply: StatusReply = receive_fresh(ctx, "verify/reply", relying.principal())?;
    expect_nonce("verify/reply", "nonce", nonce, reply.nonce)?;
    expect_id("verify/reply", &credential_id, &reply.credential_id)?;
    if !reply.live {
        relying.forget_verified(student);
        warn!("[{run}] {credential_id} of {student} is no longer live at {}", relying.code());
    } else {
        info!("[{run}] {credential_id} of {student} still live");
    }
    Ok(reply.live)
}
