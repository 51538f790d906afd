/// Cache key builders. Every key is spelled out from the caller's intent.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeys;

impl CacheKeys {
    pub fn live_violations(camera: Option<&str>, hours: u32, limit: usize) -> String {
        format!("violations:live:{}:{}:{}", camera.unwrap_or("all"), hours, limit)
    }

    /// Matches every live violations variant
    pub fn live_violations_pattern() -> &'static str {
        "violations:live:*"
    }

    pub fn hourly_trend(hours: u32) -> String {
        format!("violations:hourly_trend:{}", hours)
    }

    pub fn employee_stats() -> &'static str {
        "employees:stats"
    }

    pub fn camera_summary(camera: &str) -> String {
        format!("cameras:{}:summary", camera)
    }

    pub fn all_camera_summaries() -> &'static str {
        "cameras:summary:all"
    }

    pub fn dashboard_overview() -> &'static str {
        "dashboard:overview"
    }

    pub fn system_health() -> &'static str {
        "system:health"
    }

    /// Key families owned by this service
    pub fn managed_patterns() -> [&'static str; 5] {
        ["violations:*", "employees:*", "cameras:*", "dashboard:*", "system:*"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_keys_fall_under_the_live_pattern() {
        let pattern = glob::Pattern::new(CacheKeys::live_violations_pattern()).unwrap();
        assert!(pattern.matches(&CacheKeys::live_violations(None, 1, 100)));
        assert!(pattern.matches(&CacheKeys::live_violations(Some("reception"), 24, 50)));
        assert!(!pattern.matches(&CacheKeys::hourly_trend(24)));
    }
}
