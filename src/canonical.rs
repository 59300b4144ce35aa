//! Name normalization shared by the identity cache and the persisted
//! uniqueness key.

/// Two canonical names scoring above this are treated as the same player.
pub const SIMILARITY_THRESHOLD: f64 = 0.85;

/// Lowercase, keep letters/digits/spaces, collapse whitespace runs, trim.
pub fn canonicalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if !ch.is_alphanumeric() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.extend(ch.to_lowercase());
    }
    out
}

/// Levenshtein similarity in `[0, 1]` over the canonical forms of `a` and `b`.
pub fn similarity(a: &str, b: &str) -> f64 {
    similarity_canonical(&canonicalize(a), &canonicalize(b))
}

/// Same as [`similarity`] for inputs that are already canonical.
pub fn similarity_canonical(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let len_a = a.chars().count();
    let len_b = b.chars().count();
    if len_a == 0 || len_b == 0 {
        return 0.0;
    }
    let distance = strsim::levenshtein(a, b);
    1.0 - distance as f64 / len_a.max(len_b) as f64
}

pub fn is_similar(a: &str, b: &str) -> bool {
    similarity_canonical(a, b) > SIMILARITY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_symbols_and_collapses_spaces() {
        assert_eq!(canonicalize("  ★Dark__Lord  \t 99! "), "darklord 99");
        assert_eq!(canonicalize("Ninja  Turtle"), "ninja turtle");
        assert_eq!(canonicalize("!!!"), "");
    }

    #[test]
    fn keeps_non_latin_letters() {
        assert_eq!(canonicalize("Воин_Света"), "воинсвета");
    }

    #[test]
    fn symbol_between_words_does_not_leave_double_space() {
        assert_eq!(canonicalize("a ~ b"), "a b");
    }

    #[test]
    fn similarity_short_circuits() {
        assert_eq!(similarity("Same", "same!"), 1.0);
        assert_eq!(similarity("", "abc"), 0.0);
        assert_eq!(similarity("", ""), 1.0);
    }
}
