//! Sentence segmentation for turn responses.
//!
//! A turn's response text is synthesized one sentence-like segment at a time
//! so audio can start streaming before the full response has been voiced.

/// Characters that terminate a sentence-like segment. Covers both ASCII and
/// full-width CJK punctuation since character personas frequently mix the two.
const TERMINALS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；', '…'];

/// Splits `text` into sentence-like segments.
///
/// Each segment is trimmed and keeps its terminal punctuation attached. A
/// trailing fragment without terminal punctuation becomes its own segment.
/// Empty or whitespace-only segments are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        // Split at the end of a run of terminals so ellipses stay attached.
        let run_ends = TERMINALS.contains(&ch)
            && chars.peek().is_none_or(|next| !TERMINALS.contains(next));
        if run_ends {
            let trimmed = current.trim();
            // A segment that is nothing but punctuation carries no speech.
            if trimmed.chars().any(|c| !TERMINALS.contains(&c)) {
                segments.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        segments.push(trailing.to_string());
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation() {
        let segments = split_sentences("Hello there. How are you? I am fine!");
        assert_eq!(segments, vec!["Hello there.", "How are you?", "I am fine!"]);
    }

    #[test]
    fn keeps_trailing_fragment() {
        let segments = split_sentences("First sentence. and then a trailing bit");
        assert_eq!(segments, vec!["First sentence.", "and then a trailing bit"]);
    }

    #[test]
    fn drops_empty_segments() {
        let segments = split_sentences("One... ... Two.");
        assert_eq!(segments, vec!["One...", "Two."]);
        assert!(split_sentences("   ").is_empty());
        assert!(split_sentences("").is_empty());
    }

    #[test]
    fn handles_cjk_punctuation() {
        let segments = split_sentences("こんにちは。元気ですか？");
        assert_eq!(segments, vec!["こんにちは。", "元気ですか？"]);
    }

    #[test]
    fn single_sentence_without_punctuation() {
        assert_eq!(split_sentences("just words"), vec!["just words"]);
    }
}
