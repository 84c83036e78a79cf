//! Selective-disclosure presentation to a relying university.
//!
//! The student strips entries it does not want to disclose. The relying
//! university recomputes leaves from what it received and asks the registry
//! whether each is a leaf of the certified tree; a redacted credential has a
//! different root, so only leaf membership can be checked.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    expect_id, expect_nonce, fresh_nonce, logout, receive_fresh, require_session, run_id,
    timestamped, Context,
};
use crate::academic::{Credential, IssuedCredential};
use crate::actors::{Student, University};
use crate::channel::Protection;
use crate::error::Result;
use crate::registry::TrustRegistry;
use crate::schema;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Presentation {
    credential: Value,
    credential_id: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LeafCheck {
    leaves: Vec<String>,
    credential_id: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LeafVerdict {
    valid: bool,
    credential_id: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PresentationOutcome {
    valid: bool,
    credential_id: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

timestamped!(Presentation, LeafCheck, LeafVerdict, PresentationOutcome);

/// Present the student's latest credential to `relying`, withholding the
/// named exams and activities. Returns the registry's verdict; on success
/// `relying` caches the credential as verified for the student.
///
/// # Errors
/// `Error::MissingKey` without a session; `Error::Schema` for a malformed
/// credential; `Error::PolicyViolation` when an entry exceeds the exchange
/// agreement or the credential has expired; `Error::Replay` on stale hops or
/// nonce/id mismatches; `Error::Blacklisted` if the registry refuses `relying`.
pub fn present_credential(
    ctx: &Context<'_>,
    student: &mut Student,
    relying: &mut University,
    registry: &mut TrustRegistry,
    withhold_exams: &[&str],
    withhold_activities: &[&str],
) -> Result<bool> {
    let run = run_id();
    require_session(student, relying)?;
    let held = student.latest_credential()?;
    let credential_id = held.id.clone();
    let disclosed = held.credential.redact(withhold_exams, withhold_activities);

    // 1. student → relying university
    let nonce = fresh_nonce();
    let presentation = Presentation {
        credential: serde_json::to_value(&disclosed)?,
        credential_id: credential_id.clone(),
        nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "present/credential",
        student.principal(),
        relying.principal_mut(),
        &presentation,
        Protection::SEALED_SIGNED,
    )?;

    // 2. structure, then agreement
    let presentation: Presentation =
        receive_fresh(ctx, "present/credential", relying.principal())?;
    schema::validate_credential(&presentation.credential)?;
    let credential: Credential = serde_json::from_value(presentation.credential)?;
    relying.check_presented(student.code(), &credential, ctx.now().date_naive())?;
    let leaves = credential.leaf_hashes()?;

    // 3. registry checks membership and liveness
    let check_nonce = fresh_nonce();
    let check = LeafCheck {
        leaves,
        credential_id: presentation.credential_id.clone(),
        nonce: check_nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "present/check",
        relying.principal(),
        registry.principal_mut(),
        &check,
        Protection::SIGNED,
    )?;
    let check: LeafCheck = receive_fresh(ctx, "present/check", registry.principal())?;
    registry.ensure_trusted(relying.code())?;
    let valid = registry.validate_leaves(&check.leaves, &check.credential_id)?;
    let verdict = LeafVerdict {
        valid,
        credential_id: check.credential_id,
        nonce: check.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "present/verdict",
        registry.principal(),
        relying.principal_mut(),
        &verdict,
        Protection::SIGNED,
    )?;
    let verdict: LeafVerdict = receive_fresh(ctx, "present/verdict", relying.principal())?;
    expect_nonce("present/verdict", "nonce", check_nonce, verdict.nonce)?;
    expect_id("present/verdict", &presentation.credential_id, &verdict.credential_id)?;
    if verdict.valid {
        relying.accept_verified(
            student.code(),
            IssuedCredential {
                credential,
                id: verdict.credential_id.clone(),
            },
        );
    }

    // 4. relying university → student
    let outcome = PresentationOutcome {
        valid: verdict.valid,
        credential_id: verdict.credential_id,
        nonce: presentation.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "present/outcome",
        relying.principal(),
        student.principal_mut(),
        &outcome,
        Protection::SEALED_SIGNED,
    )?;
    let outcome: PresentationOutcome =
        receive_fresh(ctx, "present/outcome", student.principal())?;
    expect_nonce("present/outcome", "nonce", nonce, outcome.nonce)?;
    expect_id("present/outcome", &credential_id, &outcome.credential_id)?;
    logout(student, relying)?;
    if outcome.valid {
        info!("[{run}] {} accepted credential {credential_id} from {}", relying.code(), student.code());
    } else {
        warn!("[{run}] {} rejected credential {credential_id} from {}", relying.code(), student.code());
    }
    Ok(outcome.valid)
}
