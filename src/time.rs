use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn wall_clock_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should not go backwards")
        .as_secs()
}
