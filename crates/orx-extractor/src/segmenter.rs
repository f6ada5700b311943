//! Sentence segmentation
//!
//! Splits after `.`, `!` or `?` followed by whitespace, except after a
//! known abbreviation such as "e.g." or "et al.".

use std::collections::BTreeSet;

use orx_core::{Document, Sentence};

const DEFAULT_ABBREVIATIONS: &[&str] = &[
    "al.", "approx.", "ca.", "cf.", "e.g.", "fig.", "figs.", "i.e.", "no.", "ref.", "vs.",
];

/// Rule-based sentence splitter
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    abbreviations: BTreeSet<String>,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self {
            abbreviations: DEFAULT_ABBREVIATIONS
                .iter()
                .map(|a| a.to_string())
                .collect(),
        }
    }
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the abbreviation list (entries include the trailing dot)
    pub fn with_abbreviations<I, S>(mut self, abbreviations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.abbreviations = abbreviations
            .into_iter()
            .map(|a| a.as_ref().to_lowercase())
            .collect();
        self
    }

    /// Split a document into ordered, indexed sentences
    pub fn segment(&self, document: &Document) -> Vec<Sentence> {
        self.split(&document.text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Sentence::new(document.doc_id.clone(), index as u32, text))
            .collect()
    }

    /// Split raw text into trimmed, non-empty sentences
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        let mut sentences = Vec::new();
        let mut start = 0;
        let mut chars = text.char_indices().peekable();

        while let Some((index, c)) = chars.next() {
            if !matches!(c, '.' | '!' | '?') {
                continue;
            }
            match chars.peek() {
                Some(&(_, next)) if next.is_whitespace() => {}
                _ => continue,
            }

            let end = index + c.len_utf8();
            if c == '.' && self.ends_with_abbreviation(&text[start..end]) {
                continue;
            }

            push_trimmed(&mut sentences, &text[start..end]);
            start = end;
        }

        push_trimmed(&mut sentences, &text[start..]);
        sentences
    }

    fn ends_with_abbreviation(&self, candidate: &str) -> bool {
        candidate
            .split_whitespace()
            .next_back()
            .map(|token| token.trim_start_matches(['(', '[']).to_lowercase())
            .is_some_and(|token| self.abbreviations.contains(&token))
    }
}

fn push_trimmed(sentences: &mut Vec<String>, part: &str) {
    let part = part.trim();
    if !part.is_empty() {
        sentences.push(part.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_terminal_punctuation() {
        let segmenter = SentenceSegmenter::new();
        let parts = segmenter.split("ABCB1 is upregulated. Does it matter? Yes!  Clearly.");
        assert_eq!(
            parts,
            vec!["ABCB1 is upregulated.", "Does it matter?", "Yes!", "Clearly."]
        );
    }

    #[test]
    fn test_no_split_inside_tokens() {
        let segmenter = SentenceSegmenter::new();
        let parts = segmenter.split("IC50 rose 2.5-fold (p<0.01).");
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn test_abbreviations_do_not_split() {
        let segmenter = SentenceSegmenter::new();
        let parts = segmenter.split(
            "PARP inhibitors (e.g. talazoparib) were tested by Smith et al. in 2020. Resistance followed.",
        );
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with("in 2020."));
    }

    #[test]
    fn test_segment_indexes_sentences() {
        let segmenter = SentenceSegmenter::new();
        let doc = Document::new("123", "  First sentence.\nSecond one.  ");
        let sentences = segmenter.segment(&doc);

        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[1].doc_id, "123");
        assert_eq!(sentences[1].sentence_index, 1);
        assert_eq!(sentences[1].text, "Second one.");
    }

    #[test]
    fn test_empty_text() {
        let segmenter = SentenceSegmenter::new();
        assert!(segmenter.segment(&Document::new("1", "   ")).is_empty());
    }
}
