/// Normalize text for metric computation: lowercase, strip non-alphanumeric
/// characters inside tokens, collapse whitespace runs, trim. Applying it
/// twice is a fixed point.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for token in text.split_whitespace() {
        let word: String = token
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect();
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&word);
    }
    out
}

/// Whitespace tokenization of normalized text.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_strips_punctuation() {
        assert_eq!(normalize("Hello, World!"), "hello world");
        assert_eq!(normalize("  The   quick\tbrown\nfox  "), "the quick brown fox");
    }

    #[test]
    fn drops_tokens_that_are_all_punctuation() {
        assert_eq!(normalize("yes -- no"), "yes no");
    }

    #[test]
    fn keeps_digits() {
        assert_eq!(normalize("Route 66!"), "route 66");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["Hello, World!", "  a  B  c ", "", "!!!", "Don't stop"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn tokenize_matches_normalized_split() {
        assert_eq!(tokenize("The quick, brown fox."), vec!["the", "quick", "brown", "fox"]);
        assert!(tokenize("  ").is_empty());
    }
}
