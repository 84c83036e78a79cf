//! Votes to exclude a university from the registry.

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use super::{expect_nonce, fresh_nonce, receive_fresh, run_id, timestamped, Context};
use crate::actors::University;
use crate::channel::Protection;
use crate::error::{Error, Result};
use crate::registry::TrustRegistry;

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Ballot {
    target: String,
    nonce: u64,
    ts: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BallotReceipt {
    target: String,
    counted: bool,
    blacklisted: bool,
    nonce: u64,
    ts: DateTime<Utc>,
}

timestamped!(Ballot, BallotReceipt);

/// Cast `voter`'s vote against `target`. Returns whether `target` is
/// blacklisted once the vote has been counted.
///
/// # Errors
/// `Error::Blacklisted` if `voter` is itself blacklisted; `Error::NotFound`
/// if either university is unregistered; `Error::Replay` on stale hops or
/// nonce/target mismatches.
pub fn vote_blacklist(
    ctx: &Context<'_>,
    voter: &mut University,
    registry: &mut TrustRegistry,
    target: &str,
) -> Result<bool> {
    let run = run_id();
    let nonce = fresh_nonce();
    let ballot = Ballot {
        target: target.to_string(),
        nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "blacklist/vote",
        voter.principal(),
        registry.principal_mut(),
        &ballot,
        Protection::SEALED_SIGNED,
    )?;

    let ballot: Ballot = receive_fresh(ctx, "blacklist/vote", registry.principal())?;
    let counted = registry.vote_blacklist(voter.code(), &ballot.target)?;
    let receipt = BallotReceipt {
        blacklisted: registry.is_blacklisted(&ballot.target),
        target: ballot.target,
        counted,
        nonce: ballot.nonce,
        ts: ctx.now(),
    };
    ctx.transmit(
        "blacklist/receipt",
        registry.principal(),
        voter.principal_mut(),
        &receipt,
        Protection::SIGNED,
    )?;

    let receipt: BallotReceipt = receive_fresh(ctx, "blacklist/receipt", voter.principal())?;
    expect_nonce("blacklist/receipt", "nonce", nonce, receipt.nonce)?;
    if receipt.target != target {
        return Err(Error::replay(
            "blacklist/receipt",
            format!("receipt names {}, vote was against {target}", receipt.target),
        ));
    }
    info!(
        "[{run}] {} voted against {target} (counted={}, blacklisted={})",
        voter.code(),
        receipt.counted,
        receipt.blacklisted
    );
    Ok(receipt.blacklisted)
}
