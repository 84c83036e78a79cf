use std::cell::RefCell;

use chrono::Utc;

use mobility_ledger::academic::{Activity, ActivityResult, Exam, ExamResult, Grade, EXCHANGE_PLAN};
use mobility_ledger::actors::{Student, University};
use mobility_ledger::certificate::CertificationAuthority;
use mobility_ledger::channel::Envelope;
use mobility_ledger::config::Settings;
use mobility_ledger::protocol::{
    authenticate, certify_university, enroll, issue_credential, present_credential,
    request_mobility, revoke_credential, verify_credential, vote_blacklist, Context, Wire,
};
use mobility_ledger::registry::TrustRegistry;
use mobility_ledger::Error;

struct World {
    registry: TrustRegistry,
    ca: CertificationAuthority,
    home: University,
    host: University,
    student: Student,
}

impl World {
    /// Two certified universities and a student enrolled at the home one.
    fn new(ctx: &Context<'_>) -> Self {
        let mut registry = TrustRegistry::from_settings(ctx.settings).unwrap();
        let mut ca = CertificationAuthority::new("CA").unwrap();
        let mut home = University::new("U1", "University One", "Bianchi");
        let mut host = University::new("U2", "University Two", "Verdi");
        home.add_study_plan("CS", vec![Exam::new("Algorithms", 6)]);
        host.add_study_plan("DS", vec![Exam::new("Databases", 4)]);
        host.add_activity(Activity::new("Lab", 2));
        certify_university(ctx, &mut ca, &mut registry, &mut home).unwrap();
        certify_university(ctx, &mut ca, &mut registry, &mut host).unwrap();
        let mut student = Student::new("S", "Ada", "Lovelace");
        enroll(ctx, &mut student, &mut home, &ca, "CS", "home-pw").unwrap();
        Self {
            registry,
            ca,
            home,
            host,
            student,
        }
    }

    fn go_abroad(&mut self, ctx: &Context<'_>, exams: &[Exam], activities: &[Activity]) -> bool {
        authenticate(ctx, &mut self.student, &mut self.home).unwrap();
        request_mobility(
            ctx,
            &mut self.student,
            &mut self.home,
            &mut self.host,
            &self.ca,
            exams,
            activities,
        )
        .unwrap()
    }

    /// Algorithms passed at home, exchange agreed, host enrollment done,
    /// Databases passed and the credential issued.
    fn with_credential(ctx: &Context<'_>) -> (Self, String) {
        let mut w = Self::new(ctx);
        let today = Utc::now().date_naive();
        w.home
            .pass_exam(
                "S",
                ExamResult {
                    name: "Algorithms".into(),
                    grade: Grade::Mark(27),
                    honours: false,
                    date: today,
                    prof: "Gialli".into(),
                    study_plan_name: "CS".into(),
                    cfus: 6,
                },
            )
            .unwrap();
        assert!(w.go_abroad(ctx, &[Exam::new("Databases", 4)], &[Activity::new("Lab", 2)]));
        enroll(ctx, &mut w.student, &mut w.host, &w.ca, EXCHANGE_PLAN, "host-pw").unwrap();
        w.host
            .pass_exam(
                "S",
                ExamResult {
                    name: "Databases".into(),
                    grade: Grade::Mark(28),
                    honours: false,
                    date: today,
                    prof: "Neri".into(),
                    study_plan_name: EXCHANGE_PLAN.into(),
                    cfus: 4,
                },
            )
            .unwrap();
        w.host
            .pass_activity(
                "S",
                ActivityResult {
                    name: "Lab".into(),
                    kind: "laboratory".into(),
                    start_date: today,
                    end_date: today,
                    cfus: 2,
                    prof: "Rossi".into(),
                },
            )
            .unwrap();
        authenticate(ctx, &mut w.student, &mut w.host).unwrap();
        let issued = issue_credential(ctx, &mut w.student, &mut w.host, &mut w.registry).unwrap();
        (w, issued.id)
    }

    fn present(&mut self, ctx: &Context<'_>, exams: &[&str], activities: &[&str]) -> bool {
        authenticate(ctx, &mut self.student, &mut self.home).unwrap();
        present_credential(
            ctx,
            &mut self.student,
            &mut self.home,
            &mut self.registry,
            exams,
            activities,
        )
        .unwrap()
    }
}

#[test]
fn full_exchange_then_revocation() {
    let settings = Settings::default();
    let ctx = Context::new(&settings);
    let (mut w, id) = World::with_credential(&ctx);

    let held = w.student.latest_credential().unwrap();
    assert_eq!(held.id, id);
    assert_eq!(held.credential.metadata.external_serial_id, "S#U1");
    assert_eq!(held.credential.metadata.internal_serial_id, "S#U2");
    assert_eq!(held.credential.leaf_hashes().unwrap().len(), 3);
    // home results never travel in the host's credential
    let names: Vec<_> = held.credential.exams_results.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["Databases"]);
    assert_eq!(w.home.record("S").unwrap().passed_exams.len(), 1);
    assert_eq!(w.registry.ledger().len(), 1);
    assert!(w.registry.validate_id(&id));

    assert!(w.present(&ctx, &[], &[]));
    assert_eq!(w.home.verified_credential("S").unwrap().id, id);

    let tombstone = revoke_credential(&ctx, &mut w.host, &mut w.registry, "S").unwrap();
    assert_ne!(tombstone, id);
    assert_eq!(w.registry.ledger().len(), 2);
    assert!(w.registry.ledger().is_valid());

    assert!(!verify_credential(&ctx, &mut w.home, &mut w.registry, "S").unwrap());
    assert!(w.home.verified_credential("S").is_none());
    assert!(matches!(
        verify_credential(&ctx, &mut w.home, &mut w.registry, "S"),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        revoke_credential(&ctx, &mut w.host, &mut w.registry, "S"),
        Err(Error::AlreadyRevoked(_))
    ));
}

#[test]
fn redacted_credential_is_still_accepted() {
    let settings = Settings::default();
    let ctx = Context::new(&settings);
    let (mut w, id) = World::with_credential(&ctx);

    assert!(w.present(&ctx, &["Databases"], &[]));
    let verified = w.home.verified_credential("S").unwrap();
    assert_eq!(verified.id, id);
    assert!(verified.credential.exams_results.is_empty());
    assert_eq!(verified.credential.activities_results.len(), 1);
    assert!(verify_credential(&ctx, &mut w.home, &mut w.registry, "S").unwrap());
}

#[test]
fn presentation_after_revocation_is_rejected() {
    let settings = Settings::default();
    let ctx = Context::new(&settings);
    let (mut w, _) = World::with_credential(&ctx);
    revoke_credential(&ctx, &mut w.host, &mut w.registry, "S").unwrap();
    assert!(!w.present(&ctx, &[], &[]));
    assert!(w.home.verified_credential("S").is_none());
}

#[test]
fn unavailable_exam_leaves_no_agreement() {
    let settings = Settings::default();
    let ctx = Context::new(&settings);
    let mut w = World::new(&ctx);
    assert!(!w.go_abroad(&ctx, &[Exam::new("Compilers", 6)], &[]));
    assert!(w.home.outgoing_agreement("S").is_err());
    assert!(w.host.incoming_agreement("S").is_err());
    assert!(!w.host.is_incoming("S"));
}

#[test]
fn every_run_needs_a_fresh_session() {
    let settings = Settings::default();
    let ctx = Context::new(&settings);
    let (mut w, _) = World::with_credential(&ctx);
    assert!(matches!(
        present_credential(&ctx, &mut w.student, &mut w.home, &mut w.registry, &[], &[]),
        Err(Error::MissingKey { .. })
    ));
    assert!(matches!(
        issue_credential(&ctx, &mut w.student, &mut w.host, &mut w.registry),
        Err(Error::MissingKey { .. })
    ));
}

#[test]
fn blacklisted_host_cannot_certify() {
    let settings = Settings::default();
    let ctx = Context::new(&settings);
    let mut w = World::new(&ctx);
    assert!(w.go_abroad(&ctx, &[Exam::new("Databases", 4)], &[]));
    enroll(&ctx, &mut w.student, &mut w.host, &w.ca, EXCHANGE_PLAN, "host-pw").unwrap();

    // two registered principals: one vote exceeds 0.5 × 1
    assert!(vote_blacklist(&ctx, &mut w.home, &mut w.registry, "U2").unwrap());
    assert!(w.registry.is_blacklisted("U2"));
    assert!(matches!(
        vote_blacklist(&ctx, &mut w.host, &mut w.registry, "U1"),
        Err(Error::Blacklisted(_))
    ));
    assert!(!w.registry.is_blacklisted("U1"));

    authenticate(&ctx, &mut w.student, &mut w.host).unwrap();
    assert!(matches!(
        issue_credential(&ctx, &mut w.student, &mut w.host, &mut w.registry),
        Err(Error::Blacklisted(_))
    ));
    assert!(w.registry.ledger().is_empty());
}

/// Flips the content of one hop so its signature no longer verifies.
struct Tamper(&'static str);

impl Wire for Tamper {
    fn carry(&self, hop: &str, mut envelope: Envelope) -> Envelope {
        if hop == self.0 {
            envelope.content.push(' ');
        }
        envelope
    }
}

#[test]
fn tampered_certification_request_is_dropped() {
    let settings = Settings::default();
    let ctx = Context::new(&settings);
    let mut w = World::new(&ctx);
    assert!(w.go_abroad(&ctx, &[Exam::new("Databases", 4)], &[]));
    enroll(&ctx, &mut w.student, &mut w.host, &w.ca, EXCHANGE_PLAN, "host-pw").unwrap();
    authenticate(&ctx, &mut w.student, &mut w.host).unwrap();

    let wire = Tamper("issue/certify");
    let tampering = Context::new(&settings).with_wire(&wire);
    let err = issue_credential(&tampering, &mut w.student, &mut w.host, &mut w.registry).unwrap_err();
    assert!(matches!(err, Error::Replay { ref hop, .. } if hop == "issue/certify"));
    assert!(w.registry.ledger().is_empty());
    assert!(w.student.credentials().is_empty());
}

/// Records one hop's envelope on first sight and substitutes it afterwards.
struct Replayer {
    hop: &'static str,
    captured: RefCell<Option<Envelope>>,
}

impl Wire for Replayer {
    fn carry(&self, hop: &str, envelope: Envelope) -> Envelope {
        if hop != self.hop {
            return envelope;
        }
        let mut slot = self.captured.borrow_mut();
        match slot.as_ref() {
            Some(old) => old.clone(),
            None => {
                *slot = Some(envelope.clone());
                envelope
            }
        }
    }
}

#[test]
fn replayed_liveness_answer_is_rejected() {
    let settings = Settings::default();
    let ctx = Context::new(&settings);
    let (mut w, _) = World::with_credential(&ctx);
    assert!(w.present(&ctx, &[], &[]));

    let wire = Replayer {
        hop: "verify/reply",
        captured: RefCell::new(None),
    };
    let replaying = Context::new(&settings).with_wire(&wire);
    assert!(verify_credential(&replaying, &mut w.home, &mut w.registry, "S").unwrap());

    revoke_credential(&ctx, &mut w.host, &mut w.registry, "S").unwrap();
    let err = verify_credential(&replaying, &mut w.home, &mut w.registry, "S").unwrap_err();
    assert!(matches!(err, Error::Replay { ref hop, .. } if hop == "verify/reply"));
    // the stale "live" answer must not have been trusted either way
    assert!(w.home.verified_credential("S").is_some());
    assert!(!verify_credential(&ctx, &mut w.home, &mut w.registry, "S").unwrap());
}
