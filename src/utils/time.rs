use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::utils::types::ExpirationDate;

pub fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is set before the unix epoch")
}

pub fn has_expired(expiration_date: &ExpirationDate) -> bool {
    now().as_secs() >= *expiration_date
}
