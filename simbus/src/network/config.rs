//! Fault-injection profile for the delivery state machine.
//!
//! Every delay and drop the fabric injects is named here rather than buried
//! in the delivery code. The defaults are the canonical tuning that the
//! replicated-state-machine test suites were calibrated against; change
//! them only if you also own the timeouts of the code under test.
//!
//! | Knob | Effect when active |
//! |------|--------------------|
//! | unreliable | 0–27 ms pre-delay, 10% request drop, 10% reply drop |
//! | long reordering | ~2/3 of replies deferred by 200 ms plus up to ~2.2 s of skew |
//! | long delays | unreachable calls black-hole for up to 7 s instead of 100 ms |

use std::ops::Range;
use std::time::Duration;

use rand::Rng;

/// Timing and loss parameters consumed by the delivery state machine.
///
/// The three booleans that *activate* fault injection (`reliable`,
/// `long_delays`, `long_reordering`) live on the network and can be toggled
/// mid-test; this profile fixes what the faults look like when active.
#[derive(Debug, Clone)]
pub struct FaultProfile {
    /// Probability that an unreliable network eats a request on the way in.
    pub request_drop_probability: f64,
    /// Probability that an unreliable network eats a computed reply.
    pub reply_drop_probability: f64,
    /// Pre-dispatch delay range applied to every unreliable request.
    pub unreliable_delay: Range<Duration>,
    /// How often an in-flight call re-checks that its server is still the
    /// one it was dispatched to. Bounds the latency of failure detection.
    pub liveness_poll_interval: Duration,
    /// Black-hole delay for calls with no reachable server. Short enough
    /// that clients probing many servers stay fast.
    pub blackhole_delay: Range<Duration>,
    /// Black-hole delay when long delays are enabled, long enough to catch
    /// code that sends RPCs synchronously from a critical path.
    pub blackhole_delay_long: Range<Duration>,
    /// Probability that a reply is deferred when long reordering is on.
    pub reorder_probability: f64,
    /// Fixed floor of a deferred reply's extra latency.
    pub reorder_base_delay: Duration,
    /// Upper bound of the compound-uniform skew added on top of the floor.
    /// The skew is `uniform(0 ..= uniform(0 .. max))`, biasing toward small
    /// delays while keeping a heavy tail.
    pub reorder_skew_max: Duration,
}

impl Default for FaultProfile {
    fn default() -> Self {
        FaultProfile {
            request_drop_probability: 0.1,
            reply_drop_probability: 0.1,
            unreliable_delay: Duration::ZERO..Duration::from_millis(27),
            liveness_poll_interval: Duration::from_millis(100),
            blackhole_delay: Duration::ZERO..Duration::from_millis(100),
            blackhole_delay_long: Duration::ZERO..Duration::from_millis(7000),
            reorder_probability: 600.0 / 900.0,
            reorder_base_delay: Duration::from_millis(200),
            reorder_skew_max: Duration::from_millis(2000),
        }
    }
}

/// Sample a duration uniformly from a range; empty ranges yield the start.
pub fn sample_duration(rng: &mut impl Rng, range: &Range<Duration>) -> Duration {
    let start = range.start.as_nanos() as u64;
    let end = range.end.as_nanos() as u64;
    if start >= end {
        return range.start;
    }
    Duration::from_nanos(rng.random_range(start..end))
}
