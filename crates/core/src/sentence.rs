//! Sentence segmentation for progressive speech synthesis.

/// Returns `true` for the punctuation marks that can end a sentence.
fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Splits finalized text into synthesis-ready sentences.
///
/// A boundary is a run of whitespace directly preceded by `.`, `!` or `?`.
/// Each fragment is trimmed and empty fragments are dropped; order is kept.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev: Option<char> = None;

    for (idx, c) in text.char_indices() {
        if c.is_whitespace() && prev.is_some_and(is_terminator) {
            push_trimmed(&mut sentences, &text[start..idx]);
            start = idx;
        }
        prev = Some(c);
    }
    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, fragment: &str) {
    let fragment = fragment.trim();
    if !fragment.is_empty() {
        sentences.push(fragment.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_each_terminator() {
        assert_eq!(
            split_sentences("Hello there. How are you? I am fine! Thanks."),
            vec!["Hello there.", "How are you?", "I am fine!", "Thanks."]
        );
    }

    #[test]
    fn test_clause_count_matches_sentence_count() {
        let clauses = ["One.", "Two!", "Three?", "Four...", "Five?!"];
        for n in 1..=clauses.len() {
            let text = clauses[..n].join(" \n\t ");
            let sentences = split_sentences(&text);
            assert_eq!(sentences.len(), n, "input: {text:?}");
            assert_eq!(sentences, clauses[..n].to_vec());
        }
    }

    #[test]
    fn test_no_terminal_punctuation_yields_single_sentence() {
        assert_eq!(
            split_sentences("   just some words without an end  "),
            vec!["just some words without an end"]
        );
    }

    #[test]
    fn test_blank_input_yields_nothing() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("  \n\t ").is_empty());
    }

    #[test]
    fn test_punctuation_without_whitespace_is_not_a_boundary() {
        assert_eq!(
            split_sentences("Pi is 3.14 roughly. See www.example.com now"),
            vec!["Pi is 3.14 roughly.", "See www.example.com now"]
        );
    }

    #[test]
    fn test_multibyte_text() {
        assert_eq!(
            split_sentences("Ça va? Très bien. ¡Olé!"),
            vec!["Ça va?", "Très bien.", "¡Olé!"]
        );
    }

    #[test]
    fn test_deterministic() {
        let text = "A. B? C! D";
        assert_eq!(split_sentences(text), split_sentences(text));
    }
}
