//! Credential issuance by the host university, certified on the ledger.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use super::{
    expect_nonce, fresh_nonce, logout, receive_fresh, require_session, run_id, timestamped,
    Context,
};
use crate::academic::{Credential, IssuedCredential};
use crate::actors::{Student, University};
use crate::channel::Protection;
use crate::error::Result;
use crate::merkle::MerkleTree;
use crate::registry::TrustRegistry;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialRequest {
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CertificationRequest {
    leaves: Vec<String>,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CertificationReceipt {
    credential_id: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialGrant {
    credential: Credential,
    credential_id: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

timestamped!(
    CredentialRequest,
    CertificationRequest,
    CertificationReceipt,
    CredentialGrant
);

/// Issue `student` a credential from `host`, certify it in `registry`, and
/// hand credential and id back to the student.
///
/// # Errors
/// `Error::MissingKey` without a session; `Error::Blacklisted` if the
/// registry refuses `host`; `Error::Replay` on stale hops or nonce mismatches;
/// `Error::NotFound` if the student has no incoming agreement at `host`.
pub fn issue_credential(
    ctx: &Context<'_>,
    student: &mut Student,
    host: &mut University,
    registry: &mut TrustRegistry,
) -> Result<IssuedCredential> {
    let run = run_id();
    require_session(student, host)?;

    // 1. student asks
    let nonce = fresh_nonce();
    let request = CredentialRequest {
        nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "issue/request",
        student.principal(),
        host.principal_mut(),
        &request,
        Protection::SEALED_SIGNED,
    )?;
    let request: CredentialRequest = receive_fresh(ctx, "issue/request", host.principal())?;

    // 2. host derives the credential and its leaves
    let credential = host.credential_for(
        student.code(),
        ctx.now().date_naive(),
        ctx.settings.credential_period_days,
    )?;
    let leaves = credential.leaf_hashes()?;

    // 3. registry certifies
    let cert_nonce = fresh_nonce();
    let cert_request = CertificationRequest {
        leaves,
        nonce: cert_nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "issue/certify",
        host.principal(),
        registry.principal_mut(),
        &cert_request,
        Protection::SIGNED,
    )?;
    let cert_request: CertificationRequest =
        receive_fresh(ctx, "issue/certify", registry.principal())?;
    registry.ensure_trusted(host.code())?;
    let tree = MerkleTree::build(&cert_request.leaves)?;
    let credential_id = registry.certify(tree, host.code())?;
    let receipt = CertificationReceipt {
        credential_id,
        nonce: cert_request.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "issue/receipt",
        registry.principal(),
        host.principal_mut(),
        &receipt,
        Protection::SIGNED,
    )?;
    let receipt: CertificationReceipt = receive_fresh(ctx, "issue/receipt", host.principal())?;
    expect_nonce("issue/receipt", "nonce", cert_nonce, receipt.nonce)?;
    let issued = IssuedCredential {
        credential,
        id: receipt.credential_id,
    };
    host.record_issued(student.code(), issued.clone());

    // 4. host → student under the original nonce
    let grant = CredentialGrant {
        credential: issued.credential,
        credential_id: issued.id,
        nonce: request.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "issue/grant",
        host.principal(),
        student.principal_mut(),
        &grant,
        Protection::SEALED_SIGNED,
    )?;
    let grant: CredentialGrant = receive_fresh(ctx, "issue/grant", student.principal())?;
    expect_nonce("issue/grant", "nonce", nonce, grant.nonce)?;
    let received = IssuedCredential {
        credential: grant.credential,
        id: grant.credential_id,
    };
    student.store_credential(received.clone());
    logout(student, host)?;
    info!(
        "[{run}] {} issued credential {} to {}",
        host.code(),
        received.id,
        student.code()
    );
    Ok(received)
}
