//! Time-period arithmetic for the onion-service system.
//!
//! Blinded keys and directory positions rotate once per "time
//! period".  Everything here works on plain Unix timestamps (seconds)
//! and period lengths in minutes, since that is how the values appear
//! in the consensus.

/// The voting interval to assume when a consensus does not tell us
/// otherwise, in seconds.
pub const DEFAULT_VOTING_INTERVAL: u64 = 3600;

/// The default length of a time period, in minutes.
pub const DEFAULT_TIME_PERIOD_LENGTH: u64 = 1440;

/// Period boundaries are offset from the epoch by this many voting
/// intervals, so that they never land on an SRV rotation.
const VOTING_PERIODS_IN_OFFSET: u64 = 12;

/// How many voting periods make up one full round of the
/// shared-random commit-and-reveal protocol.
const VOTING_PERIODS_IN_SRV_ROUND: u64 = 24;

/// Return the voting interval implied by a consensus lifetime, in
/// seconds.
pub fn voting_interval(valid_after: u64, fresh_until: u64) -> u64 {
    if fresh_until > valid_after {
        fresh_until - valid_after
    } else {
        DEFAULT_VOTING_INTERVAL
    }
}

/// Return the number of the time period containing the time `t`.
///
/// `t` is a Unix timestamp in seconds; `interval` is the voting
/// interval in seconds; `period_length` is the period length in
/// minutes.
pub fn time_period_num(t: u64, interval: u64, period_length: u64) -> u64 {
    let offset = VOTING_PERIODS_IN_OFFSET * (interval / 60);
    ((t / 60).saturating_sub(offset)) / period_length
}

/// Return the Unix time at which the time period *after*
/// `period_num` begins.
pub fn next_time_period_start(period_num: u64, interval: u64, period_length: u64) -> u64 {
    (period_num + 1) * period_length * 60 + VOTING_PERIODS_IN_OFFSET * interval
}

/// Return the start of the shared-random protocol round that was in
/// progress (or most recently finished) at `valid_after`.
pub fn shared_random_start(valid_after: u64, interval: u64) -> u64 {
    valid_after - ((valid_after / interval) % VOTING_PERIODS_IN_SRV_ROUND) * interval
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn period_num() {
        // 2016-04-13T11:00:00Z.
        let t = 1_460_545_200;
        assert_eq!(time_period_num(t, 3600, 1440), 16903);
        // Anywhere in the same period gives the same number.
        assert_eq!(time_period_num(t + 3599, 3600, 1440), 16903);
    }

    #[test]
    fn period_monotonic_and_boundary() {
        let interval = 3600;
        let tpl = 1440;
        // The boundary is aligned to 12 voting intervals past the
        // period start.
        let boundary = next_time_period_start(16903, interval, tpl);
        assert_eq!(time_period_num(boundary - 1, interval, tpl), 16903);
        assert_eq!(time_period_num(boundary, interval, tpl), 16904);

        let mut last = 0;
        for t in (1_460_000_000..1_460_600_000).step_by(7919) {
            let n = time_period_num(t, interval, tpl);
            assert!(n >= last);
            last = n;
        }
    }

    #[test]
    fn srv_round_start() {
        // 12:00 UTC is 12 voting intervals past the day boundary.
        let noon = 499_176_000; // 1985-10-26T12:00:00Z
        assert_eq!(shared_random_start(noon, 3600), noon - 12 * 3600);
        let midnight = noon + 12 * 3600;
        assert_eq!(shared_random_start(midnight, 3600), midnight);
    }
}
