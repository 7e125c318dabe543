//! Prefix tests and argument extraction.
//!
//! Lengths and offsets are counted in chars, never bytes, so a multi-byte body
//! can't be cut inside a code point.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Sensitive,
    Insensitive,
}

#[must_use]
pub fn matches(body: &str, prefix: &str, case: CaseMode) -> bool {
    let mut body_chars = body.chars();
    prefix.chars().all(|p| {
        body_chars.next().is_some_and(|b| match case {
            CaseMode::Sensitive => b == p,
            CaseMode::Insensitive => b == p || b.to_lowercase().eq(p.to_lowercase()),
        })
    })
}

/// Argument carried after `prefix`, or `None` when `body` doesn't start with it.
///
/// The prefix and exactly one following char are dropped, whatever that char
/// is. A body that is the bare prefix (or shorter than prefix + 1) yields `""`.
#[must_use]
pub fn argument<'a>(body: &'a str, prefix: &str, case: CaseMode) -> Option<&'a str> {
    if !matches(body, prefix, case) {
        return None;
    }
    let skip = prefix.chars().count() + 1;
    Some(
        body.char_indices()
            .nth(skip)
            .map_or("", |(offset, _)| &body[offset..]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensitive_match_is_exact() {
        assert!(matches("!config set", "!config", CaseMode::Sensitive));
        assert!(!matches("!Config set", "!config", CaseMode::Sensitive));
    }

    #[test]
    fn insensitive_match_folds_case() {
        assert!(matches("!GPT hello", "!gpt", CaseMode::Insensitive));
        assert!(matches("!gpt hello", "!GpT", CaseMode::Insensitive));
        assert!(matches("ÄBC", "äbc", CaseMode::Insensitive));
    }

    #[test]
    fn body_shorter_than_prefix_never_matches() {
        assert!(!matches("!gp", "!gpt", CaseMode::Insensitive));
        assert_eq!(argument("", "!gpt", CaseMode::Sensitive), None);
    }

    #[test]
    fn argument_drops_prefix_and_one_separator() {
        assert_eq!(argument("!gpt hello", "!gpt", CaseMode::Sensitive), Some("hello"));
        assert_eq!(argument("!gpt  two", "!gpt", CaseMode::Sensitive), Some(" two"));
        // The separator need not be whitespace.
        assert_eq!(argument("!gptxhello", "!gpt", CaseMode::Sensitive), Some("hello"));
    }

    #[test]
    fn bare_prefix_yields_empty_argument() {
        assert_eq!(argument("!gpt", "!gpt", CaseMode::Insensitive), Some(""));
        assert_eq!(argument("!gpt ", "!gpt", CaseMode::Insensitive), Some(""));
    }

    #[test]
    fn multibyte_separator_is_not_split() {
        assert_eq!(argument("!gpt\u{3000}猫", "!gpt", CaseMode::Sensitive), Some("猫"));
        assert_eq!(argument("¡hola ¿qué?", "¡hola", CaseMode::Sensitive), Some("¿qué?"));
    }
}
