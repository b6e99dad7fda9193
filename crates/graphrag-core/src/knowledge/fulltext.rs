//! Fuzzy full-text query construction

use crate::error::{Error, Result};

/// Edit distance applied to every token
const FUZZY_DISTANCE: u8 = 2;

/// Lucene operators and reserved characters, two-character operators first
const RESERVED: [&str; 19] = [
    "&&", "||", "\\", "+", "-", "!", "(", ")", "{", "}", "[", "]", "^", "\"", "~", "*", "?", ":", "/",
];

/// Replace every reserved full-text character with a space
pub fn remove_lucene_chars(text: &str) -> String {
    RESERVED
        .iter()
        .fold(text.to_string(), |acc, reserved| acc.replace(reserved, " "))
}

/// Turn free text into an AND-joined fuzzy full-text expression
///
/// `"Galaxium Travels"` becomes `"Galaxium~2 AND Travels~2"`.
pub fn build_fuzzy_query(text: &str) -> Result<String> {
    let cleaned = remove_lucene_chars(text);
    let terms: Vec<String> = cleaned
        .split_whitespace()
        .map(|word| format!("{}~{}", word, FUZZY_DISTANCE))
        .collect();

    if terms.is_empty() {
        return Err(Error::InvalidInput(format!(
            "no searchable terms in '{}'",
            text
        )));
    }

    Ok(terms.join(" AND "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_tokens() {
        assert_eq!(build_fuzzy_query("Galaxium Travels").unwrap(), "Galaxium~2 AND Travels~2");
    }

    #[test]
    fn test_single_token() {
        assert_eq!(build_fuzzy_query("Acme").unwrap(), "Acme~2");
    }

    #[test]
    fn test_reserved_characters_stripped() {
        assert_eq!(build_fuzzy_query("AT&T (Corp)").unwrap(), "AT&T~2 AND Corp~2");
        assert_eq!(build_fuzzy_query("Rock && Roll").unwrap(), "Rock~2 AND Roll~2");
        assert_eq!(build_fuzzy_query("Coca-Cola").unwrap(), "Coca~2 AND Cola~2");
        assert_eq!(build_fuzzy_query("  spaced   out  ").unwrap(), "spaced~2 AND out~2");
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(build_fuzzy_query("").is_err());
        assert!(build_fuzzy_query("   ").is_err());
        assert!(matches!(build_fuzzy_query("?! ~*"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_remove_lucene_chars() {
        assert_eq!(remove_lucene_chars("a:b/c").trim(), "a b c");
        assert_eq!(remove_lucene_chars("plain text"), "plain text");
    }
}
