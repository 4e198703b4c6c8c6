//! Entity extraction: clock times and the emergency flag.

use super::keywords::{EMERGENCY_KEYWORDS, contains_any};
use careline_core::Entities;
use regex_lite::Regex;
use std::sync::LazyLock;

/// `HH:MM`, also written `HH.MM` in Indonesian chat.
static TIME_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\b([01]?[0-9]|2[0-3])[:.]([0-5][0-9])\b").ok());

pub fn extract_entities(normalized: &str) -> Entities {
    Entities {
        times: extract_times(normalized),
        emergency_level_high: contains_any(normalized, EMERGENCY_KEYWORDS),
    }
}

/// Clock times in order of appearance, zero-padded to `HH:MM`.
pub fn extract_times(text: &str) -> Vec<String> {
    let Some(re) = TIME_PATTERN.as_ref() else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
            let minute = caps.get(2)?.as_str();
            Some(format!("{hour:02}:{minute}"))
        })
        .collect()
}
