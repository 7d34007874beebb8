use chrono::{DateTime, TimeZone, Utc};

fn fmt_ts(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

/// Relative path for a retained frame, ranked from 1 (best) within its group.
/// e.g. "day/day_image_1_20260218T093000000Z.jpg"
pub fn retained_image_key(label: &str, rank: usize, captured_at_ms: i64, ext: &str) -> String {
    format!(
        "{label}/{label}_image_{rank}_{ts}.{ext}",
        ts = fmt_ts(captured_at_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        // 2026-02-18T09:30:00.000Z
        let ts = 1771407000000i64;
        let k = retained_image_key("night", 2, ts + 42, "png");
        assert_eq!(k, "night/night_image_2_20260218T093000042Z.png");
    }

    #[test]
    fn keys_sort_by_time_within_rank() {
        let a = retained_image_key("top", 1, 1_000, "jpg");
        let b = retained_image_key("top", 1, 2_000, "jpg");
        assert!(a < b);
        assert!(a.starts_with("top/top_image_1_19700101T"));
    }
}
