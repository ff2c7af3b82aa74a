use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, 0 if the clock reads earlier than that.
pub fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since_the_epoch| {
            since_the_epoch.as_secs() * 1000 + since_the_epoch.subsec_millis() as u64
        })
        .unwrap_or(0)
}

/// Seed for runs that did not ask for a specific one.
pub fn clock_seed() -> u64 {
    timestamp()
}
