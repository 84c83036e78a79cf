//! Mobility agreement between a student's home university and a host.
//!
//! The student asks its home university over the session channel; the home
//! university checks availability with the host using CA-certified keys, then
//! reports back. On success both universities record the agreement.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use super::{
    expect_nonce, fresh_nonce, logout, receive_fresh, require_session, run_id, timestamped,
    Context,
};
use crate::academic::{Activity, Exam, ExchangeAgreement};
use crate::actors::{Student, University};
use crate::certificate::CertificationAuthority;
use crate::channel::Protection;
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MobilityRequest {
    destination: String,
    exams: Vec<Exam>,
    activities: Vec<Activity>,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AvailabilityCheck {
    student: String,
    name: String,
    surname: String,
    home_serial_id: String,
    exams: Vec<Exam>,
    activities: Vec<Activity>,
    referrer: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AvailabilityAnswer {
    exams: BTreeMap<String, bool>,
    activities: BTreeMap<String, bool>,
    referrer: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct MobilityOutcome {
    available: bool,
    nonce: u64,
    ts: DateTime<Utc>,
}

timestamped!(MobilityRequest, AvailabilityCheck, AvailabilityAnswer, MobilityOutcome);

impl AvailabilityAnswer {
    fn covers(&self, exams: &[Exam], activities: &[Activity]) -> bool {
        exams
            .iter()
            .all(|e| self.exams.get(&e.name).copied().unwrap_or(false))
            && activities
                .iter()
                .all(|a| self.activities.get(&a.name).copied().unwrap_or(false))
    }
}

/// Negotiate an exchange of `student` from `home` to `host`.
///
/// Returns whether the host can offer every requested exam and activity. The
/// run ends with a logout either way; the agreement is recorded on both sides
/// only when everything is available.
///
/// # Errors
/// `Error::MissingKey` without an authenticated session; `Error::Signature`
/// if either university's certificate fails; `Error::Replay` on stale hops or
/// nonce mismatches; `Error::NotFound` if the student is not enrolled at home.
pub fn request_mobility(
    ctx: &Context<'_>,
    student: &mut Student,
    home: &mut University,
    host: &mut University,
    ca: &CertificationAuthority,
    exams: &[Exam],
    activities: &[Activity],
) -> Result<bool> {
    let run = run_id();
    require_session(student, home)?;
    if exams.is_empty() && activities.is_empty() {
        return Err(Error::PolicyViolation("mobility request names no exams or activities".into()));
    }

    // 1. student → home
    let nonce = fresh_nonce();
    let request = MobilityRequest {
        destination: host.code().to_string(),
        exams: exams.to_vec(),
        activities: activities.to_vec(),
        nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "mobility/request",
        student.principal(),
        home.principal_mut(),
        &request,
        Protection::SEALED_SIGNED,
    )?;

    let request: MobilityRequest = receive_fresh(ctx, "mobility/request", home.principal())?;
    if request.destination != host.code() {
        return Err(Error::NotFound(format!("destination university {}", request.destination)));
    }
    let record = home.record(student.code())?;
    let (name, surname) = (record.name.clone(), record.surname.clone());

    // 2. cross-university keys only from verified certificates
    let host_key = ca.trusted_key(host.code())?;
    let home_key = ca.trusted_key(home.code())?;
    home.principal_mut().add_key(host.code(), host_key);
    host.principal_mut().add_key(home.code(), home_key);

    // 3. home → host
    let check_nonce = fresh_nonce();
    let check = AvailabilityCheck {
        student: student.code().to_string(),
        name,
        surname,
        home_serial_id: home.serial_id(student.code()),
        exams: request.exams,
        activities: request.activities,
        referrer: home.referrer.clone(),
        nonce: check_nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "mobility/check",
        home.principal(),
        host.principal_mut(),
        &check,
        Protection::SEALED_SIGNED,
    )?;

    // 4. host answers per item
    let check: AvailabilityCheck = receive_fresh(ctx, "mobility/check", host.principal())?;
    let answer = AvailabilityAnswer {
        exams: check
            .exams
            .iter()
            .map(|e| (e.name.clone(), host.offers_exam(e)))
            .collect(),
        activities: check
            .activities
            .iter()
            .map(|a| (a.name.clone(), host.offers_activity(a)))
            .collect(),
        referrer: host.referrer.clone(),
        nonce: check.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "mobility/answer",
        host.principal(),
        home.principal_mut(),
        &answer,
        Protection::SEALED_SIGNED,
    )?;

    let answer: AvailabilityAnswer = receive_fresh(ctx, "mobility/answer", home.principal())?;
    expect_nonce("mobility/answer", "nonce", check_nonce, answer.nonce)?;
    let available = answer.covers(&check.exams, &check.activities);

    // 5. home → student
    let outcome = MobilityOutcome {
        available,
        nonce: request.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "mobility/outcome",
        home.principal(),
        student.principal_mut(),
        &outcome,
        Protection::SEALED_SIGNED,
    )?;
    let outcome: MobilityOutcome = receive_fresh(ctx, "mobility/outcome", student.principal())?;
    expect_nonce("mobility/outcome", "nonce", nonce, outcome.nonce)?;
    logout(student, home)?;

    if !outcome.available {
        info!("[{run}] mobility of {} to {} refused", student.code(), host.code());
        return Ok(false);
    }

    // 6. both sides record the agreement
    let start = ctx.now().date_naive();
    let agreement = ExchangeAgreement {
        student: check.student,
        home_university: home.code().to_string(),
        host_university: host.code().to_string(),
        home_serial_id: check.home_serial_id,
        exams: check.exams.iter().map(|e| (e.name.clone(), e.cfus)).collect(),
        activities: check
            .activities
            .iter()
            .map(|a| (a.name.clone(), a.cfus))
            .collect(),
        internal_referrer: check.referrer,
        external_referrer: answer.referrer,
        start,
        end: start + Duration::days(ctx.settings.exchange_period_days),
    };
    home.record_outgoing(agreement.clone());
    host.accept_incoming(agreement, &check.name, &check.surname);
    info!(
        "[{run}] mobility of {} from {} to {} agreed",
        student.code(),
        home.code(),
        host.code()
    );
    Ok(true)
}
