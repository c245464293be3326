use std::time::Duration;

const NS_PER_US: u64 = 1_000;
const NS_PER_MS: u64 = 1_000_000;
const NS_PER_S: u64 = 1_000_000_000;

/// Converts a `Duration` to whole nanoseconds, saturating on overflow.
/// Overflow only occurs for durations beyond roughly 584 years.
pub fn duration_as_ns(d: Duration) -> u64 {
    d.as_secs()
        .saturating_mul(NS_PER_S)
        .saturating_add(u64::from(d.subsec_nanos()))
}

pub fn ns_as_duration(ns: u64) -> Duration {
    Duration::new(ns / NS_PER_S, (ns % NS_PER_S) as u32)
}

/// Renders a nanosecond interval with a unit chosen for readability.
/// Estimator values span nine orders of magnitude; raw nanosecond counts in
/// log lines are unreadable.
pub fn format_ns(ns: u64) -> String {
    if ns < NS_PER_US {
        format!("{}ns", ns)
    } else if ns < NS_PER_MS {
        format!("{:.1}us", ns as f64 / NS_PER_US as f64)
    } else if ns < NS_PER_S {
        format!("{:.1}ms", ns as f64 / NS_PER_MS as f64)
    } else {
        format!("{:.2}s", ns as f64 / NS_PER_S as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_round_trip() {
        let d = Duration::new(3, 250_000_000);
        assert_eq!(duration_as_ns(d), 3_250_000_000);
        assert_eq!(ns_as_duration(3_250_000_000), d);
    }

    #[test]
    fn test_format_ns_picks_unit() {
        assert_eq!(format_ns(750), "750ns");
        assert_eq!(format_ns(1_500), "1.5us");
        assert_eq!(format_ns(2_500_000), "2.5ms");
        assert_eq!(format_ns(1_250_000_000), "1.25s");
    }
}
