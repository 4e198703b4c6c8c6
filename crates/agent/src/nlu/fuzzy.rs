//! Fuzzy word matching for misspelled keywords.

/// Largest edit distance still counted as a partial match.
pub const MAX_FUZZY_DISTANCE: u32 = 2;

/// Words shorter than this never fuzzy-match; short words collide too easily.
pub const MIN_FUZZY_LEN: usize = 4;

/// Levenshtein edit distance between two strings.
pub fn edit_distance(a: &str, b: &str) -> u32 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 {
        return n as u32;
    }
    if n == 0 {
        return m as u32;
    }

    let mut prev: Vec<u32> = (0..=n as u32).collect();
    let mut curr = vec![0u32; n + 1];

    for (i, &a_ch) in a_chars.iter().enumerate() {
        curr[0] = (i + 1) as u32;
        for (j, &b_ch) in b_chars.iter().enumerate() {
            let cost = u32::from(a_ch != b_ch);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Whether `word` is a near miss for the single-word `keyword`.
///
/// Exact equality is not a fuzzy match; callers score that separately.
pub fn is_fuzzy_match(word: &str, keyword: &str) -> bool {
    if word == keyword
        || word.chars().count() < MIN_FUZZY_LEN
        || keyword.chars().count() < MIN_FUZZY_LEN
    {
        return false;
    }
    let len_gap = word.chars().count().abs_diff(keyword.chars().count());
    len_gap as u32 <= MAX_FUZZY_DISTANCE && edit_distance(word, keyword) <= MAX_FUZZY_DISTANCE
}
