mod agent;
mod event;
mod lease;

pub use agent::*;
pub use event::*;
pub use lease::*;

/// Age of `ts` at `now`, saturating at zero if the clock went backwards.
pub fn age_ms(now: u64, ts: u64) -> u64 {
    now.saturating_sub(ts)
}
