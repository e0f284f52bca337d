//! Local denylist applied to prompts before any request is made.

use crate::error::{GenerationError, Result};

/// Terms the creation service refuses. Matched case-insensitively as substrings.
pub const SENSITIVE_WORDS: &[&str] = &["porn", "sex", "naked", "kill", "drug", "gore"];

/// Returns the first denylisted term contained in `prompt`, if any.
pub fn find_sensitive_word(prompt: &str) -> Option<&'static str> {
    let lower = prompt.to_lowercase();
    SENSITIVE_WORDS
        .iter()
        .copied()
        .find(|word| lower.contains(word))
}

/// Fails with [`GenerationError::BlockedContent`] when the prompt hits the denylist.
pub fn check_prompt(prompt: &str) -> Result<()> {
    match find_sensitive_word(prompt) {
        Some(word) => Err(GenerationError::BlockedContent(word.to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_prompt_passes() {
        assert!(check_prompt("a red fox in the snow").is_ok());
        assert_eq!(find_sensitive_word("origami crane"), None);
    }

    #[test]
    fn test_match_ignores_case() {
        assert_eq!(find_sensitive_word("A GORE scene"), Some("gore"));
        assert_eq!(find_sensitive_word("Drug store"), Some("drug"));
    }

    #[test]
    fn test_substring_match() {
        // plain substring match: "skill" contains "kill"
        assert_eq!(find_sensitive_word("a skilled painter"), Some("kill"));
    }

    #[test]
    fn test_blocked_error() {
        match check_prompt("naked mole rat") {
            Err(GenerationError::BlockedContent(word)) => assert_eq!(word, "naked"),
            other => panic!("expected BlockedContent, got {:?}", other),
        }
    }
}
