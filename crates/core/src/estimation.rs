//! Cost and wall-clock estimation for generation batches.
//!
//! Provider pricing is per second of output with a minimum charge per
//! request. Remaining time is projected the same way a worker pool is:
//! outstanding work divided by the number of jobs that may run at once.

/// Estimated price of one clip: `price_per_second * duration`, never below
/// `min_price`.
pub fn job_cost_estimate(price_per_second_usd: f64, min_price_usd: f64, duration_secs: f64) -> f64 {
    (price_per_second_usd * duration_secs.max(0.0)).max(min_price_usd)
}

/// Project wall-clock seconds for the outstanding jobs.
///
/// `pending_job_secs` holds the typical generation time of every job that
/// has not reached a terminal state. The work is assumed to spread evenly
/// over `concurrency` slots, but never finishes faster than its single
/// longest job.
pub fn remaining_wall_clock_secs(
    pending_job_secs: impl IntoIterator<Item = f64>,
    concurrency: usize,
) -> f64 {
    let mut total = 0.0;
    let mut longest: f64 = 0.0;
    for secs in pending_job_secs {
        let secs = secs.max(0.0);
        total += secs;
        longest = longest.max(secs);
    }
    let effective = concurrency.max(1) as f64;
    (total / effective).max(longest)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
