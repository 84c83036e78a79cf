//! Student enrollment at a CA-certified university.
//!
//! Student → university traffic is sealed to the university's certified key;
//! replies are signed by the university.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use super::{expect_nonce, fresh_nonce, receive_fresh, run_id, timestamped, Context};
use crate::academic::EXCHANGE_PLAN;
use crate::actors::{Student, University};
use crate::certificate::CertificationAuthority;
use crate::channel::Protection;
use crate::error::Result;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct EnrollmentRequest {
    code: String,
    name: String,
    surname: String,
    study_plan: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PasswordPrompt {
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PasswordChoice {
    password: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

timestamped!(EnrollmentRequest, PasswordPrompt, PasswordChoice);

/// Enroll `student` at `university` under `study_plan`.
///
/// A student whose exchange was already accepted by `university` is enrolled
/// under the exchange plan regardless of `study_plan`.
///
/// # Errors
/// `Error::Signature` if the CA certificate does not verify, `Error::Replay`
/// on a stale hop or echoed nonce mismatch, `Error::PolicyViolation` for a
/// duplicate enrollment.
pub fn enroll(
    ctx: &Context<'_>,
    student: &mut Student,
    university: &mut University,
    ca: &CertificationAuthority,
    study_plan: &str,
    password: &str,
) -> Result<()> {
    let run = run_id();
    let uni_code = university.code().to_string();
    let key = ca.trusted_key(&uni_code)?;
    student.principal_mut().add_key(uni_code.clone(), key);

    let plan = if university.is_incoming(student.code()) {
        EXCHANGE_PLAN
    } else {
        study_plan
    };

    // 1. request
    let nonce = fresh_nonce();
    let request = EnrollmentRequest {
        code: student.code().to_string(),
        name: student.name.clone(),
        surname: student.surname.clone(),
        study_plan: plan.to_string(),
        nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "enroll/request",
        student.principal(),
        university.principal_mut(),
        &request,
        Protection::SEALED,
    )?;

    // 2. university prompts for a password, echoing the nonce
    let request: EnrollmentRequest = receive_fresh(ctx, "enroll/request", university.principal())?;
    university.ensure_can_enroll(&request.code, &request.study_plan)?;
    let prompt = PasswordPrompt {
        nonce: request.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "enroll/prompt",
        university.principal(),
        student.principal_mut(),
        &prompt,
        Protection::SIGNED,
    )?;

    // 3. student answers, bound to the original nonce
    let prompt: PasswordPrompt = receive_fresh(ctx, "enroll/prompt", student.principal())?;
    expect_nonce("enroll/prompt", "nonce", nonce, prompt.nonce)?;
    let choice = PasswordChoice {
        password: password.to_string(),
        nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "enroll/password",
        student.principal(),
        university.principal_mut(),
        &choice,
        Protection::SEALED,
    )?;

    // 4. university commits the record
    let choice: PasswordChoice = receive_fresh(ctx, "enroll/password", university.principal())?;
    expect_nonce("enroll/password", "nonce", request.nonce, choice.nonce)?;
    university.enroll(
        &request.code,
        &request.name,
        &request.surname,
        &request.study_plan,
        &choice.password,
    )?;
    student.set_password(&uni_code, password);
    info!(
        "[{run}] enrollment of {} at {uni_code} complete",
        student.code()
    );
    Ok(())
}
