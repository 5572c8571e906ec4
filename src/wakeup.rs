//! Wake-up policy: urgent / periodic / random checks applied to each
//! managed node, once per reconciler cycle.

use chrono::{DateTime, Local, LocalResult, TimeZone, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::FarmConfig;
use crate::node::{Node, PowerState};
use crate::proxy::Proxy;
use crate::state::periodic_wake_up_duration;

/// Nodes go dark for at most this long before the urgent check fires,
/// regardless of any other policy — one hour of slack accounts for DST
/// transitions around the proxy's 23h staleness threshold.
pub fn urgent_staleness_threshold() -> chrono::Duration {
    chrono::Duration::hours(23)
}

/// Average number of random wake-ups a single node gets per month if it is
/// almost always down.
pub const RANDOM_WAKEUPS_PER_MONTH: u32 = 10;

/// Outcome of evaluating the wake-up policy for one node.
#[derive(Debug, PartialEq, Eq)]
pub enum WakeUpDecision {
    DontWake,
    /// Wake, and bump `last_time_periodic_wake_up`.
    WakeUrgent,
    WakePeriodic,
    /// Wake, and increment `times_random_wake_ups`.
    WakeRandom,
}

impl WakeUpDecision {
    pub fn should_wake(&self) -> bool {
        !matches!(self, WakeUpDecision::DontWake)
    }
}

/// The denominator of the random-wake-up draw. Preserved verbatim from the
/// original control loop rather than reinvented, because the derivation is
/// easier to audit than to re-derive:
///
/// the reconciler runs every 5 minutes => 288 cycles/day => 8640 cycles/month
/// (30 days). Of those, roughly 6 cycles/day are consumed by the 30-minute
/// periodic wake-up window, leaving ~8460 cycles/month where a random wake-up
/// could fire. A node-count correction accounts for the fact that only
/// `min(periodic_wake_up_limit, n)` nodes can be woken per cycle: subtract
/// `K * (n - 1) / L` cycles. Dividing by `K` gives a denominator such that a
/// uniform draw landing on 0 yields an expected `K` wake-ups per month.
fn random_wakeup_denominator(n: usize, periodic_wake_up_limit: u32) -> i64 {
    let k = RANDOM_WAKEUPS_PER_MONTH as i64;
    let n = n as i64;
    let l = std::cmp::min(periodic_wake_up_limit as i64, n).max(1);
    (8460 - k * 6 - (k * (n - 1)) / l) / k
}

/// Resolve `power.periodic_wake_up_start` ("HH:MM", host local time per
/// spec §6) against `round_start`'s local calendar day, converted back to
/// UTC for comparison against `round_start` itself.
///
/// DST gap (the local time never occurs that day): fall back to
/// `round_start`, so the periodic check simply doesn't fire early.
/// DST fold (the local time occurs twice): pick the earlier occurrence.
fn periodic_wake_up_start_utc(round_start: DateTime<Utc>, start: chrono::NaiveTime) -> DateTime<Utc> {
    let local_day = round_start.with_timezone(&Local).date_naive();
    let naive_start = local_day.and_time(start);
    match Local.from_local_datetime(&naive_start) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _latest) => earliest.with_timezone(&Utc),
        LocalResult::None => round_start,
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn should_wake_up(
    node: &Node,
    config: &FarmConfig,
    proxy: &dyn Proxy,
    round_start: DateTime<Utc>,
    wake_up_calls_this_cycle: u32,
    total_managed_nodes: usize,
) -> WakeUpDecision {
    if node.power_state != PowerState::Off {
        return WakeUpDecision::DontWake;
    }
    if wake_up_calls_this_cycle >= config.power.periodic_wake_up_limit {
        return WakeUpDecision::DontWake;
    }

    let proxy_node = match proxy.node(node.id).await {
        Ok(p) => p,
        Err(e) => {
            warn!(node_id = node.id, error = %e, "could not fetch node from grid proxy");
            return WakeUpDecision::DontWake;
        }
    };

    let since_last_seen = round_start - proxy_node.last_updated_at;
    if since_last_seen > urgent_staleness_threshold() {
        info!(node_id = node.id, hours = since_last_seen.num_hours(), "urgent wake up");
        return WakeUpDecision::WakeUrgent;
    }

    // Postpone power state checks for immediate wake ups already in flight.
    if round_start - node.last_time_power_state_changed < periodic_wake_up_duration() {
        return WakeUpDecision::DontWake;
    }

    let periodic_start_today = periodic_wake_up_start_utc(round_start, config.power.periodic_wake_up_start);

    if periodic_start_today <= round_start && node.last_time_awake < periodic_start_today {
        info!(node_id = node.id, "periodic wake up");
        return WakeUpDecision::WakePeriodic;
    }

    if node.times_random_wake_ups < RANDOM_WAKEUPS_PER_MONTH {
        let denom = random_wakeup_denominator(total_managed_nodes, config.power.periodic_wake_up_limit);
        if denom > 0 {
            let draw: i64 = rand::thread_rng().gen_range(0..denom);
            if draw == 0 {
                info!(node_id = node.id, "random wake up");
                return WakeUpDecision::WakeRandom;
            }
        }
    }

    debug!(node_id = node.id, "no wake up condition met");
    WakeUpDecision::DontWake
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denominator_targets_roughly_ten_per_month() {
        let denom = random_wakeup_denominator(20, 1);
        // Expected count over a month is ~ 8460/(denom*K) * K == 8460/denom.
        assert!(denom > 0);
        assert!((8460 / denom - RANDOM_WAKEUPS_PER_MONTH as i64).abs() <= 2);
    }

    #[test]
    fn single_node_fleet_does_not_divide_by_zero() {
        assert!(random_wakeup_denominator(1, 1) > 0);
    }

    #[test]
    fn periodic_start_resolves_to_the_configured_local_wall_clock_hour() {
        use chrono::Timelike;

        let start = chrono::NaiveTime::from_hms_opt(7, 0, 0).unwrap();
        let round_start = Utc::now();
        let resolved = periodic_wake_up_start_utc(round_start, start);

        // Converting the result back to local time must reproduce the
        // configured "HH:MM", regardless of the host's UTC offset.
        let local = resolved.with_timezone(&Local);
        assert_eq!(local.time().hour(), 7);
        assert_eq!(local.time().minute(), 0);
        assert_eq!(local.date_naive(), round_start.with_timezone(&Local).date_naive());
    }
}
