//! Heartbeat ticker
//!
//! Drives periodic liveness checks while a socket is open. The connection
//! decides what each beat does; this loop only owns the timing.

use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};

/// What the loop should do after a beat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    Continue,
    Stop,
}

/// Call `beat` every `period`, starting one period from now, until it returns [`Beat::Stop`]
pub async fn run_heartbeat<F>(period: Duration, mut beat: F)
where
    F: FnMut() -> Beat,
{
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if beat() == Beat::Stop {
            return;
        }
    }
}
