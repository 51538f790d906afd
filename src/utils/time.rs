use chrono::Utc;

pub const SECONDS_PER_HOUR: i64 = 3600;
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Current wall-clock time as unix seconds
pub fn now_ts() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Start of the epoch-aligned hour containing `ts`
pub fn hour_floor(ts: f64) -> i64 {
    (ts.floor() as i64).div_euclid(SECONDS_PER_HOUR) * SECONDS_PER_HOUR
}

/// Start of the epoch-aligned (UTC) day containing `ts`
pub fn day_floor(ts: f64) -> i64 {
    (ts.floor() as i64).div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

/// `ts - hours`, in seconds
pub fn hours_ago(ts: f64, hours: u32) -> f64 {
    ts - f64::from(hours) * SECONDS_PER_HOUR as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_to_hour_and_day() {
        assert_eq!(hour_floor(7199.9), 3600);
        assert_eq!(hour_floor(7200.0), 7200);
        assert_eq!(hour_floor(-1.0), -3600);
        assert_eq!(day_floor(86_400.0 * 2.0 + 5.0), 172_800);
        assert_eq!(hours_ago(10_000.0, 2), 2_800.0);
    }
}
