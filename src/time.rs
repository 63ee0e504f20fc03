use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between 1904-01-01 (the movie header epoch) and 1970-01-01.
pub const MAC_EPOCH_OFFSET: u64 = 2_082_844_800;

fn time_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

pub fn unix_now() -> u64 {
    time_now().as_secs()
}

/// Current time in seconds since 1904, saturating at `u32::MAX`.
pub fn mac_now() -> u32 {
    unix_to_mac(unix_now())
}

pub fn unix_to_mac(unix: u64) -> u32 {
    (unix + MAC_EPOCH_OFFSET).min(u32::MAX as u64) as u32
}

pub fn mac_to_unix(mac: u32) -> Option<u64> {
    (mac as u64).checked_sub(MAC_EPOCH_OFFSET)
}

pub fn mac_to_system_time(mac: u32) -> Option<SystemTime> {
    mac_to_unix(mac).map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}
