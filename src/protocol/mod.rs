//! Multi-party exchanges between students, universities, the CA and the
//! trust registry.
//!
//! Every run is lock-step: one envelope in flight, read by the receiver
//! before anything else is sent to it. Each hop checks freshness and nonce
//! correspondence; the first failed check aborts the whole run.

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use ulid::Ulid;

use crate::actors::{Student, University};
use crate::channel::{Envelope, Principal, Protection};
use crate::config::{Clock, Settings, SystemClock};
use crate::crypto::Capability;
use crate::error::{Error, Result};

pub mod authentication;
pub mod blacklist;
pub mod certification;
pub mod enrollment;
pub mod issuance;
pub mod logout;
pub mod mobility;
pub mod presentation;
pub mod revocation;

pub use authentication::authenticate;
pub use blacklist::vote_blacklist;
pub use certification::certify_university;
pub use enrollment::enroll;
pub use issuance::issue_credential;
pub use logout::logout;
pub use mobility::request_mobility;
pub use presentation::present_credential;
pub use revocation::{revoke_credential, verify_credential};

/// Carries sealed envelopes between principals. The default delivers them
/// untouched; tests and attack simulations substitute their own.
pub trait Wire {
    fn carry(&self, hop: &str, envelope: Envelope) -> Envelope;
}

pub struct DirectWire;

impl Wire for DirectWire {
    fn carry(&self, _hop: &str, envelope: Envelope) -> Envelope {
        envelope
    }
}

static DIRECT: DirectWire = DirectWire;
static SYSTEM_CLOCK: SystemClock = SystemClock;

pub struct Context<'a> {
    pub settings: &'a Settings,
    clock: &'a dyn Clock,
    wire: &'a dyn Wire,
}

impl<'a> Context<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            clock: &SYSTEM_CLOCK,
            wire: &DIRECT,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_wire(mut self, wire: &'a dyn Wire) -> Self {
        self.wire = wire;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// # Errors
    /// `Error::Replay` when `ts` lies more than `max_skew_secs` from now,
    /// in either direction.
    pub fn check_fresh(&self, hop: &str, ts: DateTime<Utc>) -> Result<()> {
        let now = self.now();
        let skew = (now - ts).num_seconds().abs();
        if skew > self.settings.max_skew_secs {
            return Err(Error::replay(
                hop,
                format!(
                    "timestamp {ts} is {skew}s from {now}, limit {}s",
                    self.settings.max_skew_secs
                ),
            ));
        }
        Ok(())
    }

    /// Serialise `message`, protect it for `to`, pass it over the wire and
    /// let `to` receive it.
    pub(crate) fn transmit<T: Serialize>(
        &self,
        hop: &str,
        from: &Principal,
        to: &mut Principal,
        message: &T,
        protection: Protection,
    ) -> Result<()> {
        let sealed = from.seal(to.code(), Envelope::json(message)?, protection)?;
        let carried = self.wire.carry(hop, sealed);
        to.receive(from.code(), carried, protection)
    }
}

/// Read the inbox as `T` and check the timestamp it carries.
pub(crate) fn receive_fresh<T>(ctx: &Context<'_>, hop: &str, principal: &Principal) -> Result<T>
where
    T: DeserializeOwned + Timestamped,
{
    let message: T = principal.read(hop)?;
    ctx.check_fresh(hop, message.ts())?;
    Ok(message)
}

pub(crate) trait Timestamped {
    fn ts(&self) -> DateTime<Utc>;
}

macro_rules! timestamped {
    ($($t:ty),+ $(,)?) => {
        $(impl $crate::protocol::Timestamped for $t {
            fn ts(&self) -> ::chrono::DateTime<::chrono::Utc> {
                self.ts
            }
        })+
    };
}
pub(crate) use timestamped;

pub fn fresh_nonce() -> u64 {
    OsRng.next_u64()
}

/// # Errors
/// `Error::Replay` naming both values when they differ.
pub(crate) fn expect_nonce(hop: &str, what: &str, expected: u64, received: u64) -> Result<()> {
    if expected != received {
        return Err(Error::replay(
            hop,
            format!("{what} mismatch: expected {expected}, received {received}"),
        ));
    }
    Ok(())
}

pub(crate) fn expect_id(hop: &str, expected: &str, received: &str) -> Result<()> {
    if expected != received {
        return Err(Error::replay(
            hop,
            format!("credential id mismatch: expected {expected}, received {received}"),
        ));
    }
    Ok(())
}

/// The student and university must share a session key from a prior
/// authentication run.
pub(crate) fn require_session(student: &Student, university: &University) -> Result<()> {
    let both = matches!(
        student.principal().key_for(university.code()),
        Some(Capability::Symmetric(_))
    ) && matches!(
        university.principal().key_for(student.code()),
        Some(Capability::Symmetric(_))
    );
    if both {
        Ok(())
    } else {
        Err(Error::MissingKey {
            principal: student.code().to_string(),
            peer: format!("{} (no session, authenticate first)", university.code()),
        })
    }
}

pub fn run_id() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;

    use chrono::{DateTime, Duration, Utc};

    use crate::config::Clock;

    /// Advances by `step` on every reading.
    pub struct SteppingClock {
        now: Cell<DateTime<Utc>>,
        step: Duration,
    }

    impl SteppingClock {
        pub fn new(step: Duration) -> Self {
            Self {
                now: Cell::new(Utc::now()),
                step,
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let t = self.now.get();
            self.now.set(t + self.step);
            t
        }
    }
}
