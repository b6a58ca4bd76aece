//! Deadline extraction from tender detail pages.
//!
//! The source site has no stable structured field for the bid deadline, so
//! extraction is heuristic: explicitly labelled ISO timestamps win when
//! present, otherwise the ROC-calendar date nearest *after* a keyword anchor
//! is taken (distance minimization over the flat document text). Input is
//! untrusted HTML and is only ever scanned as text.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

pub const CRATE_NAME: &str = "tlr-extract";

/// ISO prefix means the value is already canonical.
static ISO_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());

/// ROC (Minguo) calendar date: 2-3 digit year, `/` or `.` separators.
static ROC_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{2,3})[/.](\d{1,2})[/.](\d{1,2})").unwrap());

/// Date tokens scanned out of the raw document. Accepts `/`, `.`, or a
/// backslash-escaped separator as rendered in embedded JSON, plus an
/// optional trailing HH:MM.
static DATE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{2,3})[/.\\]{1,2}(\d{1,2})[/.\\]{1,2}(\d{1,2})(?:\s+(\d{1,2}:\d{2}))?")
        .unwrap()
});

/// Explicitly labelled deadlines, tried before the proximity heuristic.
/// First capture group is the candidate value.
static LABELLED_DEADLINES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)DEADLINE.*?(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})").unwrap(),
        Regex::new(r"截止.*?(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})").unwrap(),
        Regex::new(r#""deadline"\s*:\s*"([^"]+)""#).unwrap(),
        Regex::new(r#""deadlineDate"\s*:\s*"([^"]+)""#).unwrap(),
    ]
});

/// Normalize a raw date-like string to canonical ISO form.
///
/// Already-ISO input (`YYYY-MM-DD...`) passes through unchanged, including
/// any time suffix. ROC input `YY[/.]M[/.]D` converts via AD = ROC + 1911
/// with zero-padded month and day. Anything else is `None`: a failed
/// normalization is "no deadline found", never an error.
pub fn normalize_date(raw: &str) -> Option<String> {
    let cleaned = raw.replace('\\', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    if ISO_PREFIX.is_match(cleaned) {
        return Some(cleaned.to_string());
    }
    let caps = ROC_DATE.captures(cleaned)?;
    let roc_year: i32 = caps[1].parse().ok()?;
    Some(format!(
        "{}-{:0>2}-{:0>2}",
        roc_year + 1911,
        &caps[2],
        &caps[3]
    ))
}

/// Parse a normalized date string into a UTC timestamp for persistence.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM[:SS]`, `YYYY-MM-DDTHH:MM:SS`, and a
/// bare `YYYY-MM-DD` (midnight UTC). Calendar-invalid dates (month 13 and
/// friends) come back as `None` rather than a bogus timestamp.
pub fn parse_deadline_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc());
        }
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}

/// Keyword anchors and search radius for the proximity heuristic.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// Anchors hunted in document order; the date must appear *after* one.
    pub keywords: Vec<String>,
    /// Maximum keyword-to-date distance in bytes, exclusive.
    pub max_radius: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            keywords: vec!["截止投標".to_string(), "截止".to_string()],
            max_radius: 5000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeadlineExtractor {
    config: ExtractorConfig,
}

impl DeadlineExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Locate the most plausible bid deadline in a fetched detail page and
    /// return it normalized, or `None` when nothing qualifies. A `None` is a
    /// valid, expected outcome for pages that simply don't expose one.
    pub fn extract(&self, html: &str) -> Option<String> {
        if let Some(date) = labelled_deadline(html) {
            return Some(date);
        }
        self.nearest_date_after_keyword(html)
            .and_then(|raw| normalize_date(&raw))
    }

    /// Distance-minimization pass: among all (keyword occurrence, date token)
    /// pairs where the date starts strictly after the keyword and within the
    /// radius, pick the globally closest pair. Offsets are byte offsets.
    fn nearest_date_after_keyword(&self, html: &str) -> Option<String> {
        let dates: Vec<(usize, &str)> = DATE_TOKEN
            .find_iter(html)
            .map(|m| (m.start(), m.as_str()))
            .collect();
        if dates.is_empty() {
            return None;
        }

        let mut best: Option<&str> = None;
        let mut min_distance = usize::MAX;
        for keyword in &self.config.keywords {
            for (keyword_index, _) in html.match_indices(keyword.as_str()) {
                for (date_index, text) in &dates {
                    if *date_index <= keyword_index {
                        continue;
                    }
                    let distance = date_index - keyword_index;
                    if distance < self.config.max_radius && distance < min_distance {
                        min_distance = distance;
                        best = Some(text);
                    }
                }
            }
        }
        best.map(str::to_string)
    }
}

/// Labelled ISO deadlines (`DEADLINE ... 2024-05-20 17:00:00`, embedded
/// `"deadline": "..."` JSON fields). A label whose value fails to normalize
/// does not short-circuit the proximity fallback.
fn labelled_deadline(html: &str) -> Option<String> {
    for pattern in LABELLED_DEADLINES.iter() {
        if let Some(caps) = pattern.captures(html) {
            if let Some(date) = normalize_date(&caps[1]) {
                return Some(date);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn roc_dates_convert_to_ad() {
        assert_eq!(normalize_date("113/05/20").as_deref(), Some("2024-05-20"));
        assert_eq!(normalize_date("98/1/5").as_deref(), Some("2009-01-05"));
        assert_eq!(normalize_date("113.05.20").as_deref(), Some("2024-05-20"));
    }

    #[test]
    fn escaped_separators_are_stripped_before_parsing() {
        assert_eq!(normalize_date("113\\/05\\/20").as_deref(), Some("2024-05-20"));
        assert_eq!(normalize_date("  113/05/20  ").as_deref(), Some("2024-05-20"));
    }

    #[test]
    fn iso_input_passes_through_unchanged() {
        assert_eq!(normalize_date("2024-05-20").as_deref(), Some("2024-05-20"));
        assert_eq!(
            normalize_date("2024-05-20 17:00:00").as_deref(),
            Some("2024-05-20 17:00:00")
        );
    }

    #[test]
    fn non_dates_normalize_to_none() {
        assert_eq!(normalize_date("not a date"), None);
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("   "), None);
        assert_eq!(normalize_date("5/20"), None);
    }

    #[test]
    fn timestamps_parse_from_every_observed_shape() {
        let midnight = Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).single().unwrap();
        assert_eq!(parse_deadline_timestamp("2024-05-20"), Some(midnight));

        let five_pm = Utc.with_ymd_and_hms(2024, 5, 20, 17, 0, 0).single().unwrap();
        assert_eq!(parse_deadline_timestamp("2024-05-20 17:00:00"), Some(five_pm));
        assert_eq!(parse_deadline_timestamp("2024-05-20 17:00"), Some(five_pm));
        assert_eq!(parse_deadline_timestamp("2024-05-20T17:00:00"), Some(five_pm));
        assert_eq!(
            parse_deadline_timestamp("2024-05-20T17:00:00Z"),
            Some(five_pm)
        );
    }

    #[test]
    fn calendar_invalid_timestamps_are_rejected() {
        assert_eq!(parse_deadline_timestamp("2024-13-05"), None);
        assert_eq!(parse_deadline_timestamp("2024-02-30"), None);
        assert_eq!(parse_deadline_timestamp("soon"), None);
    }

    /// Keyword at byte 100, unrelated date at 50 (before the anchor), real
    /// deadline at 150. Only the date after the keyword may win.
    #[test]
    fn dates_before_the_keyword_are_rejected() {
        let mut html = String::new();
        html.push_str(&"x".repeat(50));
        html.push_str("112/01/01");
        html.push_str(&"x".repeat(100 - html.len()));
        html.push_str("截止投標");
        html.push_str(&"x".repeat(150 - html.len()));
        html.push_str("113/05/20");

        let extractor = DeadlineExtractor::default();
        assert_eq!(extractor.extract(&html).as_deref(), Some("2024-05-20"));
    }

    #[test]
    fn distance_cap_is_exclusive_on_both_sides() {
        let radius = 200usize;
        let extractor = DeadlineExtractor::new(ExtractorConfig {
            keywords: vec!["截止".to_string()],
            max_radius: radius,
        });

        // "截止" is 6 bytes; a date starting at radius - 1 qualifies.
        let mut inside = String::from("截止");
        inside.push_str(&"y".repeat(radius - 1 - inside.len()));
        inside.push_str("113/05/20");
        assert_eq!(extractor.extract(&inside).as_deref(), Some("2024-05-20"));

        // At exactly the radius the pair no longer qualifies.
        let mut at_edge = String::from("截止");
        at_edge.push_str(&"y".repeat(radius - at_edge.len()));
        at_edge.push_str("113/05/20");
        assert_eq!(at_edge.find("113").unwrap(), radius);
        assert_eq!(extractor.extract(&at_edge), None);

        // And one past it.
        let mut outside = String::from("截止");
        outside.push_str(&"y".repeat(radius + 1 - outside.len()));
        outside.push_str("113/05/20");
        assert_eq!(extractor.extract(&outside), None);
    }

    #[test]
    fn closest_pair_wins_across_all_keywords() {
        // The later "截止" anchor sits 10 bytes from its date; the earlier
        // "截止投標" anchor is 60 bytes from the same-format decoy.
        let mut html = String::new();
        html.push_str("截止投標");
        html.push_str(&"z".repeat(60 - html.len()));
        html.push_str("112/02/02");
        html.push_str(&"z".repeat(300 - html.len()));
        html.push_str("截止");
        html.push_str(&"z".repeat(310 - html.len()));
        html.push_str("113/08/15 17:30");

        let extractor = DeadlineExtractor::default();
        assert_eq!(extractor.extract(&html).as_deref(), Some("2025-08-15"));
    }

    #[test]
    fn page_without_any_qualifying_date_yields_none() {
        let extractor = DeadlineExtractor::default();
        assert_eq!(extractor.extract("<html><body>no dates here</body></html>"), None);
        // Dates present but no anchor keyword at all.
        assert_eq!(extractor.extract("published 113/05/20"), None);
    }

    #[test]
    fn labelled_iso_deadline_wins_over_proximity() {
        let html = "截止投標 113/05/20 ... DEADLINE 2025-08-15 17:00:00";
        let extractor = DeadlineExtractor::default();
        assert_eq!(
            extractor.extract(html).as_deref(),
            Some("2025-08-15 17:00:00")
        );
    }

    #[test]
    fn embedded_json_deadline_field_is_honoured() {
        let html = r#"<script>{"title":"t","deadline":"2025-08-15T09:00:00Z"}</script>"#;
        let extractor = DeadlineExtractor::default();
        assert_eq!(
            extractor.extract(html).as_deref(),
            Some("2025-08-15T09:00:00Z")
        );
    }

    #[test]
    fn garbage_labelled_value_falls_back_to_proximity() {
        let html = r#"{"deadline":"TBD"} 截止投標: 113/05/20 17:00"#;
        let extractor = DeadlineExtractor::default();
        assert_eq!(extractor.extract(html).as_deref(), Some("2024-05-20"));
    }
}
