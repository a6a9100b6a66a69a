use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashMap;

use crate::config;

/// Unresolvable codes render as this string so they sort after every real
/// date and fall out of any "future settlement" filter.
pub const SENTINEL_DATE: &str = "9999/99/99";

pub const DATE_FMT: &str = "%Y/%m/%d";

/// Maps a contract code to its calendar settlement date.
///
/// TXO settlement always lands on a fixed weekday of the contract month:
/// the monthly contract on the 3rd Wednesday, `W{n}` weeklies on the n-th
/// Wednesday, `F{n}` weeklies on the n-th Friday. Exchange holidays
/// occasionally shift the nominal day; those shifts are data, kept in an
/// externally editable override table that always wins over the rule.
pub struct SettlementResolver {
    /// (code substring, literal date) pairs, checked in key order.
    overrides: Vec<(String, NaiveDate)>,
}

impl SettlementResolver {
    /// Resolver with the built-in holiday shifts only.
    pub fn new() -> Self {
        Self::with_overrides(default_overrides())
    }

    /// Resolver with an explicit override table. Keys are matched as
    /// substrings of the normalized code; ties go to the first key in
    /// sorted order so resolution is deterministic.
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        let mut table: Vec<(String, NaiveDate)> = overrides
            .into_iter()
            .filter_map(|(key, value)| {
                let key = key.trim().to_uppercase();
                match NaiveDate::parse_from_str(value.trim(), DATE_FMT) {
                    Ok(date) if !key.is_empty() => Some((key, date)),
                    _ => {
                        tracing::warn!(%key, %value, "skipping malformed settlement override");
                        None
                    }
                }
            })
            .collect();
        table.sort_by(|a, b| a.0.cmp(&b.0));
        Self { overrides: table }
    }

    /// Resolver loaded from `TXO_OVERRIDES_PATH` (a JSON object of
    /// code-substring → `YYYY/MM/DD`), falling back to the built-ins when
    /// the variable is unset or the file is unreadable.
    pub fn from_env() -> Self {
        let Some(path) = config::get_overrides_path() else {
            return Self::new();
        };
        match std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<HashMap<String, String>>(&text).map_err(|e| e.to_string()))
        {
            Ok(map) => {
                tracing::info!(%path, entries = map.len(), "loaded settlement overrides");
                Self::with_overrides(map)
            }
            Err(err) => {
                tracing::warn!(%path, %err, "failed to load settlement overrides, using built-ins");
                Self::new()
            }
        }
    }

    /// Resolve a contract code to its settlement date.
    ///
    /// Never panics and never errors: malformed codes, out-of-range months
    /// and weekly variants the month cannot satisfy all collapse to `None`,
    /// which downstream filters treat as "not a future date".
    pub fn resolve(&self, code: &str) -> Option<NaiveDate> {
        let code = code.trim().to_uppercase();

        // Overrides win unconditionally
        for (key, date) in &self.overrides {
            if code.contains(key.as_str()) {
                return Some(*date);
            }
        }

        if code.len() < 6 {
            return None;
        }
        let year: i32 = code.get(0..4)?.parse().ok()?;
        let month: u32 = code.get(4..6)?.parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }

        let (weekday, nth) = parse_variant(code.get(6..).unwrap_or(""))?;
        let days = weekdays_in_month(year, month, weekday);
        days.get(nth - 1).copied()
    }

    /// `resolve`, formatted for display: `YYYY/MM/DD` or the sentinel.
    pub fn resolve_display(&self, code: &str) -> String {
        match self.resolve(code) {
            Some(date) => format_date(date),
            None => SENTINEL_DATE.to_string(),
        }
    }
}

impl Default for SettlementResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Known holiday shifts. 2025/01/01 was a Wednesday and a market holiday,
/// pushing the first January weekly to the 2nd.
fn default_overrides() -> HashMap<String, String> {
    HashMap::from([("202501W1".to_string(), "2025/01/02".to_string())])
}

/// Map the variant suffix to (weekday, 1-indexed occurrence).
/// Empty suffix is the monthly contract: 3rd Wednesday.
fn parse_variant(variant: &str) -> Option<(Weekday, usize)> {
    let variant = variant.trim();
    if variant.is_empty() {
        return Some((Weekday::Wed, 3));
    }
    let mut chars = variant.chars();
    let letter = chars.next()?;
    let digit = chars.next()?.to_digit(10)?;
    if chars.next().is_some() || digit == 0 {
        return None;
    }
    match letter {
        'W' => Some((Weekday::Wed, digit as usize)),
        'F' => Some((Weekday::Fri, digit as usize)),
        _ => None,
    }
}

/// All days of the given month that fall on `weekday`, chronological.
fn weekdays_in_month(year: i32, month: u32, weekday: Weekday) -> Vec<NaiveDate> {
    (1..=31)
        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
        .filter(|d| d.weekday() == weekday)
        .collect()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FMT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monthly_is_third_wednesday() {
        let resolver = SettlementResolver::new();
        // March 2025 Wednesdays: 5, 12, 19, 26
        assert_eq!(
            resolver.resolve("202503"),
            NaiveDate::from_ymd_opt(2025, 3, 19)
        );
        assert_eq!(resolver.resolve_display("202503"), "2025/03/19");
    }

    #[test]
    fn test_weekly_variants() {
        let resolver = SettlementResolver::new();
        assert_eq!(
            resolver.resolve("202503W1"),
            NaiveDate::from_ymd_opt(2025, 3, 5)
        );
        assert_eq!(
            resolver.resolve("202503w2"),
            NaiveDate::from_ymd_opt(2025, 3, 12)
        );
        // March 2025 Fridays: 7, 14, 21, 28
        assert_eq!(
            resolver.resolve("202503F2"),
            NaiveDate::from_ymd_opt(2025, 3, 14)
        );
    }

    #[test]
    fn test_variant_beyond_month_is_unresolvable() {
        let resolver = SettlementResolver::new();
        // Only four Wednesdays and four Fridays in March 2025
        assert_eq!(resolver.resolve("202503W5"), None);
        assert_eq!(resolver.resolve("202503F5"), None);
        assert_eq!(resolver.resolve_display("202503W5"), SENTINEL_DATE);
    }

    #[test]
    fn test_malformed_codes_are_unresolvable() {
        let resolver = SettlementResolver::new();
        assert_eq!(resolver.resolve(""), None);
        assert_eq!(resolver.resolve("2025"), None);
        assert_eq!(resolver.resolve("ABCDEF"), None);
        assert_eq!(resolver.resolve("202513"), None); // month out of range
        assert_eq!(resolver.resolve("202500"), None);
        assert_eq!(resolver.resolve("202503X1"), None); // unknown weekday letter
        assert_eq!(resolver.resolve("202503W0"), None);
        assert_eq!(resolver.resolve("202503W12"), None); // trailing garbage
    }

    #[test]
    fn test_override_beats_calendar_rule() {
        let resolver = SettlementResolver::new();
        // The rule alone would give 2025/01/01 (1st Wednesday)
        assert_eq!(
            resolver.resolve("202501W1"),
            NaiveDate::from_ymd_opt(2025, 1, 2)
        );
        assert_eq!(resolver.resolve_display("202501W1"), "2025/01/02");
    }

    #[test]
    fn test_custom_override_by_substring() {
        let resolver = SettlementResolver::with_overrides(HashMap::from([(
            "202506W4".to_string(),
            "2025/06/26".to_string(),
        )]));
        // Matches as a substring even with surrounding product text
        assert_eq!(
            resolver.resolve(" txo 202506w4 "),
            NaiveDate::from_ymd_opt(2025, 6, 26)
        );
        // Other codes still follow the rule (June 2025 Wednesdays: 4, 11, 18, 25)
        assert_eq!(
            resolver.resolve("202506"),
            NaiveDate::from_ymd_opt(2025, 6, 18)
        );
    }

    #[test]
    fn test_sentinel_sorts_after_real_dates() {
        assert!(SENTINEL_DATE > "2025/12/31");
        assert!(SENTINEL_DATE > "9998/12/31");
    }
}
