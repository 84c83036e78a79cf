//! Password authentication followed by session key establishment.
//!
//! After the password check the student generates a fresh symmetric key and
//! ships it one field per envelope. Each side keeps a sequence counter seeded
//! from the second nonce; every field and every ack must carry the counter
//! value the other side expects, and both counters advance in lock-step.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{expect_nonce, fresh_nonce, receive_fresh, run_id, timestamped, Context};
use crate::actors::{Student, University};
use crate::channel::Protection;
use crate::crypto::{Capability, SymmetricKey};
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Hello {
    code: String,
    nonce0: u64,
    nonce1: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Challenge {
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Proof {
    password: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Accepted {
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyField {
    field: String,
    value: String,
    seq: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyAck {
    seq: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SessionReady {
    session: String,
    ts: DateTime<Utc>,
}

timestamped!(Hello, Challenge, Proof, Accepted, KeyField, KeyAck, SessionReady);

/// Authenticate `student` at `university` and install a shared session key
/// on both sides.
///
/// # Errors
/// `Error::AuthenticationFailed` on a wrong password; `Error::Replay` on any
/// stale hop, nonce or sequence mismatch. Nothing is installed on failure.
pub fn authenticate(ctx: &Context<'_>, student: &mut Student, university: &mut University) -> Result<()> {
    let run = run_id();
    let uni_code = university.code().to_string();
    let password = student.password_for(&uni_code)?.to_string();

    // 1. two independent nonces
    let nonce0 = fresh_nonce();
    let nonce1 = fresh_nonce();
    let hello = Hello {
        code: student.code().to_string(),
        nonce0,
        nonce1,
        ts: ctx.now(),
    };
    ctx.transmit(
        "auth/hello",
        student.principal(),
        university.principal_mut(),
        &hello,
        Protection::SEALED,
    )?;

    // 2. university challenges with the first nonce
    let hello: Hello = receive_fresh(ctx, "auth/hello", university.principal())?;
    let challenge = Challenge {
        nonce: hello.nonce0,
        ts: ctx.now(),
    };
    ctx.transmit(
        "auth/challenge",
        university.principal(),
        student.principal_mut(),
        &challenge,
        Protection::SIGNED,
    )?;

    // 3. password bound to the second nonce
    let challenge: Challenge = receive_fresh(ctx, "auth/challenge", student.principal())?;
    expect_nonce("auth/challenge", "nonce0", nonce0, challenge.nonce)?;
    let proof = Proof {
        password,
        nonce: nonce1,
        ts: ctx.now(),
    };
    ctx.transmit(
        "auth/proof",
        student.principal(),
        university.principal_mut(),
        &proof,
        Protection::SEALED,
    )?;

    // 4. university checks the password
    let proof: Proof = receive_fresh(ctx, "auth/proof", university.principal())?;
    expect_nonce("auth/proof", "nonce1", hello.nonce1, proof.nonce)?;
    if !university.check_password(&hello.code, &proof.password) {
        return Err(Error::AuthenticationFailed {
            student: hello.code,
            university: uni_code,
        });
    }
    let accepted = Accepted {
        nonce: hello.nonce1,
        ts: ctx.now(),
    };
    ctx.transmit(
        "auth/accepted",
        university.principal(),
        student.principal_mut(),
        &accepted,
        Protection::SIGNED,
    )?;
    let accepted: Accepted = receive_fresh(ctx, "auth/accepted", student.principal())?;
    expect_nonce("auth/accepted", "nonce1", nonce1, accepted.nonce)?;

    // 5. session key, one field at a time
    let session = SymmetricKey::generate()?;
    let mut sender_seq = nonce1;
    let mut receiver_seq = hello.nonce1;
    let mut received = BTreeMap::new();
    for (field, value) in session.to_fields() {
        let message = KeyField {
            field,
            value,
            seq: sender_seq,
            ts: ctx.now(),
        };
        ctx.transmit(
            "auth/key-field",
            student.principal(),
            university.principal_mut(),
            &message,
            Protection::SEALED,
        )?;

        let message: KeyField = receive_fresh(ctx, "auth/key-field", university.principal())?;
        expect_nonce("auth/key-field", "sequence", receiver_seq, message.seq)?;
        debug!("[{run}] {uni_code} took field {} at seq {}", message.field, message.seq);
        received.insert(message.field, message.value);
        let ack = KeyAck {
            seq: receiver_seq,
            ts: ctx.now(),
        };
        ctx.transmit(
            "auth/key-ack",
            university.principal(),
            student.principal_mut(),
            &ack,
            Protection::SIGNED,
        )?;

        let ack: KeyAck = receive_fresh(ctx, "auth/key-ack", student.principal())?;
        expect_nonce("auth/key-ack", "sequence", sender_seq, ack.seq)?;
        sender_seq = sender_seq.wrapping_add(1);
        receiver_seq = receiver_seq.wrapping_add(1);
    }

    // 6. both sides switch to the session key
    let rebuilt = SymmetricKey::from_fields(&received)?;
    let student_code = student.code().to_string();
    student
        .principal_mut()
        .add_key(uni_code.clone(), Capability::Symmetric(session));
    university
        .principal_mut()
        .add_key(student_code.clone(), Capability::Symmetric(rebuilt));

    let ready = SessionReady {
        session: run.clone(),
        ts: ctx.now(),
    };
    ctx.transmit(
        "auth/ready",
        university.principal(),
        student.principal_mut(),
        &ready,
        Protection::SEALED_SIGNED,
    )?;
    let ready: SessionReady = receive_fresh(ctx, "auth/ready", student.principal())?;
    if ready.session != run {
        return Err(Error::replay("auth/ready", "session confirmation does not match this run"));
    }
    info!("[{run}] {student_code} authenticated at {uni_code}, session established");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::academic::Exam;
    use crate::certificate::CertificationAuthority;
    use crate::channel::Envelope;
    use crate::config::Settings;
    use crate::protocol::{enroll, Wire};

    fn enrolled() -> (Settings, University, Student) {
        let settings = Settings::default();
        let ctx = Context::new(&settings);
        let mut ca = CertificationAuthority::new("CA").unwrap();
        let mut u = University::new("U1", "First", "Bianchi");
        u.add_study_plan("CS", vec![Exam::new("Algorithms", 6)]);
        let key = Capability::generate_asymmetric().unwrap();
        ca.register("U1", &key, Utc::now()).unwrap();
        u.principal_mut().set_own_key(key);
        let mut s = Student::new("S", "Ada", "Lovelace");
        enroll(&ctx, &mut s, &mut u, &ca, "CS", "pw").unwrap();
        (settings, u, s)
    }

    #[test]
    fn session_key_is_shared_after_authentication() {
        let (settings, mut u, mut s) = enrolled();
        let ctx = Context::new(&settings);
        authenticate(&ctx, &mut s, &mut u).unwrap();
        let a = s.principal().key_for("U1").unwrap();
        let b = u.principal().key_for("S").unwrap();
        assert!(a.is_symmetric());
        assert_eq!(a, b);
    }

    #[test]
    fn wrong_password_installs_nothing() {
        let (settings, mut u, mut s) = enrolled();
        let ctx = Context::new(&settings);
        s.set_password("U1", "guess");
        assert!(matches!(
            authenticate(&ctx, &mut s, &mut u),
            Err(Error::AuthenticationFailed { .. })
        ));
        assert!(u.principal().key_for("S").is_none());
        assert!(!s.principal().key_for("U1").unwrap().is_symmetric());
    }

    /// Replays the first key field in place of the second.
    struct FieldReplayer {
        first: RefCell<Option<Envelope>>,
    }

    impl Wire for FieldReplayer {
        fn carry(&self, hop: &str, envelope: Envelope) -> Envelope {
            if hop != "auth/key-field" {
                return envelope;
            }
            let mut first = self.first.borrow_mut();
            match first.as_ref() {
                Some(captured) => captured.clone(),
                None => {
                    *first = Some(envelope.clone());
                    envelope
                }
            }
        }
    }

    #[test]
    fn replayed_key_field_breaks_the_sequence() {
        let (settings, mut u, mut s) = enrolled();
        let wire = FieldReplayer {
            first: RefCell::new(None),
        };
        let ctx = Context::new(&settings).with_wire(&wire);
        let err = authenticate(&ctx, &mut s, &mut u).unwrap_err();
        assert!(matches!(err, Error::Replay { ref hop, .. } if hop == "auth/key-field"));
        assert!(u.principal().key_for("S").is_none());
    }

    /// Flips the signature on the challenge so the student drops it.
    struct ChallengeForger;

    impl Wire for ChallengeForger {
        fn carry(&self, hop: &str, mut envelope: Envelope) -> Envelope {
            if hop == "auth/challenge" {
                envelope.content = envelope.content.replace("\"nonce\":", "\"nonce\": ");
            }
            envelope
        }
    }

    #[test]
    fn tampered_challenge_is_dropped_and_surfaces_as_replay() {
        let (settings, mut u, mut s) = enrolled();
        let ctx = Context::new(&settings).with_wire(&ChallengeForger);
        assert!(matches!(
            authenticate(&ctx, &mut s, &mut u),
            Err(Error::Replay { .. })
        ));
    }
}
