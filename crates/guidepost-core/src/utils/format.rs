use chrono::NaiveTime;

/// Case-insensitive substring check
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Format a head-count with its child share, e.g. "4 (1 child)"
pub fn format_counts(count: u32, child_count: u32) -> String {
    match child_count {
        0 => count.to_string(),
        1 => format!("{} (1 child)", count),
        n => format!("{} ({} children)", count, n),
    }
}

/// Format an entry time as HH:MM, or a placeholder when unset
pub fn format_time(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_ignore_case() {
        assert!(contains_ignore_case("Château de Versailles", "versailles"));
        assert!(contains_ignore_case("LOUVRE", "Louvre"));
        assert!(!contains_ignore_case("Paris city walk", "versailles"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Hello", 10), "Hello");
        assert_eq!(truncate("Hello World", 8), "Hello...");
        assert_eq!(truncate("Hi", 2), "Hi");
    }

    #[test]
    fn test_format_counts() {
        assert_eq!(format_counts(3, 0), "3");
        assert_eq!(format_counts(4, 1), "4 (1 child)");
        assert_eq!(format_counts(5, 2), "5 (2 children)");
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(NaiveTime::from_hms_opt(9, 5, 0)), "09:05");
        assert_eq!(format_time(None), "--:--");
    }
}
