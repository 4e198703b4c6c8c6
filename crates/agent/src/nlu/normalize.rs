//! Locale-aware text normalization.

use careline_config::LocaleConfig;
use std::collections::HashMap;

/// Lowercases, collapses whitespace, strips trailing punctuation and expands
/// chat abbreviations (`udh` → `sudah`, `gk` → `tidak`).
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    abbreviations: HashMap<String, String>,
}

impl Normalizer {
    pub fn new(abbreviations: HashMap<String, String>) -> Self {
        let abbreviations = abbreviations
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
            .collect();
        Self { abbreviations }
    }

    pub fn from_locale(locale: &LocaleConfig) -> Self {
        Self::new(locale.abbreviations.clone())
    }

    pub fn normalize(&self, text: &str) -> String {
        let lower = text.to_lowercase();
        let trimmed = lower.trim().trim_end_matches(is_trailing_punct);

        trimmed
            .split_whitespace()
            .map(|token| self.expand(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Expand one token, keeping punctuation glued to either end.
    fn expand(&self, token: &str) -> String {
        let core_start = token
            .find(|c: char| c.is_alphanumeric())
            .unwrap_or(token.len());
        let core_end = token
            .rfind(|c: char| c.is_alphanumeric())
            .map(|i| i + token[i..].chars().next().map_or(1, char::len_utf8))
            .unwrap_or(core_start);
        if core_start >= core_end {
            return token.to_string();
        }

        let core = &token[core_start..core_end];
        match self.abbreviations.get(core) {
            Some(full) => format!("{}{full}{}", &token[..core_start], &token[core_end..]),
            None => token.to_string(),
        }
    }
}

fn is_trailing_punct(c: char) -> bool {
    matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '~' | '…') || c.is_whitespace()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> Normalizer {
        Normalizer::from_locale(&LocaleConfig::default())
    }

    #[test]
    fn lowercases_and_collapses_whitespace() {
        assert_eq!(normalizer().normalize("  Saya   SUDAH\tminum  "), "saya sudah minum");
    }

    #[test]
    fn strips_trailing_punctuation() {
        assert_eq!(normalizer().normalize("Sudah!!!"), "sudah");
        assert_eq!(normalizer().normalize("kapan jadwalnya?? "), "kapan jadwalnya");
    }

    #[test]
    fn expands_abbreviations() {
        assert_eq!(normalizer().normalize("udh minum"), "sudah minum");
        assert_eq!(normalizer().normalize("blm, nanti"), "belum, nanti");
        assert_eq!(normalizer().normalize("gk mau"), "tidak mau");
    }

    #[test]
    fn leaves_unknown_tokens_and_empty_input() {
        assert_eq!(normalizer().normalize("halo udhh"), "halo udhh");
        assert_eq!(normalizer().normalize("   "), "");
        assert_eq!(normalizer().normalize("?!"), "");
    }

    #[test]
    fn custom_table() {
        let n = Normalizer::new(HashMap::from([("OTW".to_string(), "sedang jalan".to_string())]));
        assert_eq!(n.normalize("otw"), "sedang jalan");
    }
}
