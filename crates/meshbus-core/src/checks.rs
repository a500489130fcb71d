//! Cluster consistency evaluation.
//!
//! The directing side of a bootstrap or rejoin collects a
//! [`ConsistencyReport`] from every participant and compares them against its
//! own. Each disagreement sets one [`JoinFailure`] bit; an empty result means
//! the cluster may proceed.

use std::{collections::BTreeSet, time::Duration};

use meshbus_proto::{ConsistencyReport, HostId, JoinFailure};

/// Compare `reports` against the `local` report.
///
/// Clock skew is the spread between the earliest and latest wall clock among
/// all reports, `local` included. Checksums, catalog version and catalog
/// transaction id must equal the local values exactly. Two reports claiming
/// the same host id set [`JoinFailure::HOSTID`].
pub fn evaluate(
    local: &ConsistencyReport,
    reports: &[ConsistencyReport],
    max_skew: Duration,
) -> JoinFailure {
    let mut failure = JoinFailure::empty();

    let clocks = reports.iter().chain(std::iter::once(local)).map(|r| r.wall_clock_ms);
    let (min, max) = clocks.fold((i64::MAX, i64::MIN), |(lo, hi), t| (lo.min(t), hi.max(t)));
    let skew = max.saturating_sub(min);
    let limit = i64::try_from(max_skew.as_millis()).unwrap_or(i64::MAX);
    if skew > limit {
        failure |= JoinFailure::NTP;
    }

    for report in reports {
        if report.catalog_crc != local.catalog_crc {
            failure |= JoinFailure::CRC;
        }
        if report.deployment_crc != local.deployment_crc {
            failure |= JoinFailure::DEPCRC;
        }
        if report.catalog_version != local.catalog_version {
            failure |= JoinFailure::CATVER;
        }
        if report.catalog_txn_id != local.catalog_txn_id {
            failure |= JoinFailure::CATTXNID;
        }
    }

    let mut seen = BTreeSet::from([local.host]);
    if !reports.iter().all(|report| seen.insert(report.host)) {
        failure |= JoinFailure::HOSTID;
    }

    failure
}

/// Membership agreement for a rejoin.
///
/// Every member must describe the same live-host set, every member in that set
/// must have reported, and all restore flags (the rejoining host's included)
/// must agree. Any disagreement is [`JoinFailure::FAULT_MISMATCH`].
pub fn evaluate_membership<'a>(
    connected: &BTreeSet<HostId>,
    live_sets: impl IntoIterator<Item = &'a [HostId]>,
    restore_flags: impl IntoIterator<Item = bool>,
    local_restore_done: bool,
) -> JoinFailure {
    let sets_agree = live_sets
        .into_iter()
        .all(|set| set.iter().copied().collect::<BTreeSet<_>>() == *connected);
    let flags_agree = restore_flags.into_iter().all(|flag| flag == local_restore_done);

    if sets_agree && flags_agree { JoinFailure::empty() } else { JoinFailure::FAULT_MISMATCH }
}
