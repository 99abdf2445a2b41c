//! Sentence-aligned text segmenter.
//!
//! Splits normalized document text into ordered excerpts. An excerpt grows
//! sentence by sentence until adding the next sentence would pass the soft
//! target length at a paragraph boundary, or would pass the hard cap
//! anywhere; it then closes at the preceding sentence boundary, never
//! mid-sentence.
//!
//! Invariants: excerpts concatenated in order reproduce the input modulo
//! boundary whitespace; no excerpt is empty; none exceeds the hard cap.
//! Text with no detectable sentence boundary yields a single excerpt
//! truncated at the hard cap. Empty input is an error.
//!
//! Lengths are `char` counts. The hard cap must leave headroom under the
//! transport's message limit for header formatting (enforced at config
//! load).

use crate::error::SegmentError;

/// An excerpt candidate before it is bound to a document identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcerptDraft {
    pub text: String,
    pub paragraph_count: i64,
}

/// Segment normalized text into ordered excerpt candidates.
pub fn segment(
    text: &str,
    target_chars: usize,
    hard_cap_chars: usize,
) -> Result<Vec<ExcerptDraft>, SegmentError> {
    if text.trim().is_empty() {
        return Err(SegmentError::EmptyInput);
    }

    let spans = sentence_spans(text);

    // No sentence boundary anywhere: one excerpt, truncated at the cap.
    if spans.len() == 1 {
        let body = truncate_chars(text.trim(), hard_cap_chars);
        return Ok(vec![make_draft(body)]);
    }

    let mut drafts: Vec<ExcerptDraft> = Vec::new();
    let mut current = String::new();
    // Running char count of appended spans, trailing separators included.
    // Slightly over the trimmed length, so cap checks stay conservative.
    let mut current_chars = 0usize;
    // Whether the separator trailing the last appended sentence was a
    // paragraph break.
    let mut at_paragraph_break = false;

    for span in &spans {
        let trimmed = span.trim_end();
        let trimmed_chars = trimmed.chars().count();

        if !current.is_empty() {
            let prospective = current_chars + trimmed_chars;
            let over_cap = prospective > hard_cap_chars;
            let over_target_at_para = prospective > target_chars && at_paragraph_break;
            if over_cap || over_target_at_para {
                drafts.push(make_draft(current.trim().to_string()));
                current.clear();
                current_chars = 0;
            }
        }

        if current.is_empty() && trimmed_chars > hard_cap_chars {
            // A single sentence longer than the cap cannot close on a
            // sentence boundary; split it at the cap on whitespace instead.
            for piece in hard_split(trimmed, hard_cap_chars) {
                drafts.push(make_draft(piece));
            }
            at_paragraph_break = span_ends_paragraph(span);
            continue;
        }

        current.push_str(span);
        current_chars += span.chars().count();
        at_paragraph_break = span_ends_paragraph(span);
    }

    if !current.trim().is_empty() {
        drafts.push(make_draft(current.trim().to_string()));
    }

    Ok(drafts)
}

fn make_draft(text: String) -> ExcerptDraft {
    let paragraph_count = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .count()
        .max(1) as i64;
    ExcerptDraft {
        text,
        paragraph_count,
    }
}

/// Split `text` into sentence spans. Each span runs from the start of a
/// sentence to the start of the next one, trailing whitespace included, so
/// the spans partition the input exactly.
///
/// A boundary is a terminator (`.` `!` `?`), optionally followed by closing
/// quotes or brackets, followed by whitespace, where the next sentence does
/// not begin with a lowercase letter (avoids breaking on "e.g. something").
fn sentence_spans(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let len = chars.len();
    let mut starts: Vec<usize> = vec![0];

    let mut i = 0;
    while i < len {
        if matches!(chars[i].1, '.' | '!' | '?') {
            let mut j = i + 1;
            while j < len && matches!(chars[j].1, '"' | '\'' | '\u{00BB}' | '\u{201D}' | '\u{2019}' | ')' | ']') {
                j += 1;
            }
            if j < len && chars[j].1.is_whitespace() {
                let mut k = j;
                while k < len && chars[k].1.is_whitespace() {
                    k += 1;
                }
                if k < len && !chars[k].1.is_lowercase() {
                    starts.push(chars[k].0);
                    i = k;
                    continue;
                }
            }
        }
        i += 1;
    }

    let mut spans = Vec::with_capacity(starts.len());
    for w in starts.windows(2) {
        spans.push(&text[w[0]..w[1]]);
    }
    spans.push(&text[*starts.last().unwrap()..]);
    spans
}

/// Whether the whitespace trailing this span contains a blank line.
fn span_ends_paragraph(span: &str) -> bool {
    let tail = &span[span.trim_end().len()..];
    tail.matches('\n').count() >= 2
}

/// Split an oversized sentence into pieces of at most `cap` chars,
/// preferring whitespace boundaries.
fn hard_split(text: &str, cap: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let chars: Vec<(usize, char)> = rest.char_indices().collect();
        if chars.len() <= cap {
            pieces.push(rest.trim().to_string());
            break;
        }
        let cut_byte = chars[cap].0;
        let head = &rest[..cut_byte];
        let split_at = head
            .rfind(char::is_whitespace)
            .map(|p| p + head[p..].chars().next().map_or(1, |c| c.len_utf8()))
            .unwrap_or(cut_byte);
        pieces.push(rest[..split_at].trim().to_string());
        rest = rest[split_at..].trim_start();
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn truncate_chars(text: &str, cap: usize) -> String {
    text.chars().take(cap).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: usize = 800;
    const CAP: usize = 3500;

    fn strip_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    /// Build a paragraph of `n` short sentences.
    fn paragraph(n: usize, tag: &str) -> String {
        (0..n)
            .map(|i| format!("Sentence {i} of block {tag} carries some words."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(segment("", TARGET, CAP).is_err());
        assert!(segment("   \n\n\t  ", TARGET, CAP).is_err());
    }

    #[test]
    fn short_text_yields_one_excerpt() {
        let drafts = segment("One sentence. And another one.", TARGET, CAP).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].text, "One sentence. And another one.");
        assert_eq!(drafts[0].paragraph_count, 1);
    }

    #[test]
    fn concatenation_is_lossless_modulo_whitespace() {
        let text = (0..40)
            .map(|i| paragraph(6, &i.to_string()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let drafts = segment(&text, TARGET, CAP).unwrap();
        assert!(drafts.len() > 1);

        let rebuilt: String = drafts.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(strip_ws(&rebuilt), strip_ws(&text));

        for d in &drafts {
            assert!(!d.text.trim().is_empty());
            assert!(d.text.chars().count() <= CAP);
        }
    }

    #[test]
    fn closes_at_paragraph_boundary_past_target() {
        // Two paragraphs just past the soft target each: the junction is the
        // first point where both close conditions hold, so each paragraph
        // becomes its own excerpt.
        let text = format!("{}\n\n{}", paragraph(20, "a"), paragraph(20, "b"));
        assert!(paragraph(20, "a").len() > 800);
        let drafts = segment(&text, TARGET, CAP).unwrap();
        assert_eq!(drafts.len(), 2);
        assert!(drafts[0].text.contains("block a"));
        assert!(!drafts[0].text.contains("block b"));
    }

    #[test]
    fn single_huge_paragraph_closes_at_cap_on_sentence_boundary() {
        // No paragraph breaks: only the hard cap can close an excerpt.
        let text = paragraph(200, "x");
        assert!(text.len() > 2 * CAP);
        let drafts = segment(&text, TARGET, CAP).unwrap();
        assert!(drafts.len() >= 2);
        for d in &drafts {
            assert!(d.text.chars().count() <= CAP);
            assert!(d.text.ends_with('.'), "not sentence-aligned: ...{:?}", &d.text[d.text.len().saturating_sub(20)..]);
        }
        let rebuilt: String = drafts.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(strip_ws(&rebuilt), strip_ws(&text));
    }

    #[test]
    fn no_sentence_boundary_truncates_at_cap() {
        let text = "word ".repeat(1200);
        assert!(text.chars().count() > CAP);
        let drafts = segment(&text, TARGET, CAP).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].text.chars().count(), CAP);
    }

    #[test]
    fn oversized_sentence_is_split_on_whitespace() {
        let giant = format!("It begins {} and never stops", "running on ".repeat(500));
        let text = format!("A normal opener. {giant}. A normal closer.");
        let drafts = segment(&text, TARGET, CAP).unwrap();
        assert!(drafts.len() >= 2);
        for d in &drafts {
            assert!(d.text.chars().count() <= CAP);
        }
        let rebuilt: String = drafts.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(strip_ws(&rebuilt), strip_ws(&text));
    }

    #[test]
    fn does_not_split_before_lowercase_continuation() {
        let drafts = segment("See e.g. the appendix for details.", TARGET, CAP).unwrap();
        assert_eq!(drafts.len(), 1);
    }

    #[test]
    fn paragraph_count_reflects_blank_lines() {
        let text = "First block. It has two sentences.\n\nSecond block here.";
        let drafts = segment(text, TARGET, CAP).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].paragraph_count, 2);
    }

    #[test]
    fn segmentation_is_deterministic() {
        let text = (0..10)
            .map(|i| paragraph(8, &i.to_string()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let a = segment(&text, TARGET, CAP).unwrap();
        let b = segment(&text, TARGET, CAP).unwrap();
        assert_eq!(a, b);
    }
}
