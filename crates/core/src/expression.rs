//! Avatar expression extraction.
//!
//! Response text may carry bracketed emotion keywords (e.g. `[joy]`) that map
//! to expression indices on the avatar model. Extraction is best-effort: a
//! text without recognized keywords simply yields no actions, and the caller
//! proceeds with a degraded (expressionless) payload.

use crate::output::AvatarActions;
use std::collections::HashMap;

/// Resolves avatar expression directives from response text.
///
/// The extractor also knows how to strip its keywords from text so the TTS
/// engine never tries to pronounce them.
pub trait ExpressionExtractor: Send + Sync {
    /// Returns the actions found in `text`, or `None` when the text carries
    /// no recognized expression keywords.
    fn extract(&self, text: &str) -> Option<AvatarActions>;

    /// Returns `text` with all recognized expression keywords removed.
    fn strip_keywords(&self, text: &str) -> String;
}

/// An extractor for avatars without an expression table.
pub struct NoExpressions;

impl ExpressionExtractor for NoExpressions {
    fn extract(&self, _text: &str) -> Option<AvatarActions> {
        None
    }

    fn strip_keywords(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Maps bracketed keywords like `[joy]` to expression indices from the avatar
/// model's configuration.
pub struct KeywordExpressionExtractor {
    keywords: HashMap<String, i32>,
}

impl KeywordExpressionExtractor {
    pub fn new(keywords: HashMap<String, i32>) -> Self {
        Self { keywords }
    }

    fn tagged(&self, keyword: &str) -> String {
        format!("[{keyword}]")
    }
}

impl ExpressionExtractor for KeywordExpressionExtractor {
    fn extract(&self, text: &str) -> Option<AvatarActions> {
        // Indices are collected in order of appearance so the front end plays
        // expressions in the order the agent wrote them.
        let mut found: Vec<(usize, i32)> = Vec::new();
        for (keyword, index) in &self.keywords {
            let tag = self.tagged(keyword);
            let mut offset = 0;
            while let Some(pos) = text[offset..].find(&tag) {
                found.push((offset + pos, *index));
                offset += pos + tag.len();
            }
        }
        if found.is_empty() {
            return None;
        }
        found.sort_by_key(|(pos, _)| *pos);
        Some(AvatarActions {
            expressions: found.into_iter().map(|(_, idx)| idx).collect(),
        })
    }

    fn strip_keywords(&self, text: &str) -> String {
        let mut stripped = text.to_string();
        for keyword in self.keywords.keys() {
            stripped = stripped.replace(&self.tagged(keyword), "");
        }
        // Collapse the double spaces left behind by removed tags.
        let mut collapsed = String::with_capacity(stripped.len());
        let mut last_was_space = false;
        for ch in stripped.chars() {
            if ch == ' ' {
                if !last_was_space {
                    collapsed.push(ch);
                }
                last_was_space = true;
            } else {
                collapsed.push(ch);
                last_was_space = false;
            }
        }
        collapsed.trim().to_string()
    }
}
