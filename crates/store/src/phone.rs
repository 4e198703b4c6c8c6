//! Phone-number encodings.
//!
//! Indonesian numbers arrive as `0812…` (local), `62812…` (international
//! without plus) or `+62812…`. Lookups try every encoding.

const COUNTRY_CODE: &str = "62";

/// The literal number first, then every other encoding of it. No duplicates.
pub fn phone_variants(phone_number: &str) -> Vec<String> {
    let literal = phone_number.trim().to_string();
    let compact: String = literal
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    let subscriber = if let Some(rest) = compact.strip_prefix('+') {
        rest.strip_prefix(COUNTRY_CODE)
    } else if let Some(rest) = compact.strip_prefix('0') {
        Some(rest)
    } else {
        compact.strip_prefix(COUNTRY_CODE)
    };

    let mut variants = vec![literal];
    let mut push = |v: String| {
        if !variants.contains(&v) {
            variants.push(v);
        }
    };
    push(compact.clone());
    if let Some(sub) = subscriber.filter(|s| !s.is_empty()) {
        push(format!("0{sub}"));
        push(format!("{COUNTRY_CODE}{sub}"));
        push(format!("+{COUNTRY_CODE}{sub}"));
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_number_variants() {
        assert_eq!(
            phone_variants("081234567890"),
            vec!["081234567890", "6281234567890", "+6281234567890"]
        );
    }

    #[test]
    fn international_variants_share_a_set() {
        let mut a = phone_variants("6281234567890");
        let mut b = phone_variants("+6281234567890");
        let mut c = phone_variants("081234567890");
        a.sort();
        b.sort();
        c.sort();
        assert_eq!(a, c);
        assert_eq!(b, c);
    }

    #[test]
    fn formatting_characters_are_ignored() {
        let variants = phone_variants("0812-3456 7890");
        assert_eq!(variants[0], "0812-3456 7890");
        assert!(variants.contains(&"6281234567890".to_string()));
    }

    #[test]
    fn foreign_number_is_literal_only() {
        assert_eq!(phone_variants("4915112345678"), vec!["4915112345678"]);
    }
}
