//! Paragraph-boundary text chunker.
//!
//! Splits extracted document text into segments that respect a configurable
//! `max_chars` budget. Splitting occurs on paragraph boundaries (blank lines)
//! to preserve semantic coherence; a paragraph that alone exceeds the budget
//! is re-split on sentence boundaries. A single sentence longer than the
//! budget is emitted whole rather than cut mid-sentence.
//!
//! The function is pure: the same inputs always produce the same chunks, so
//! a re-run of the ingestion pipeline regenerates identical chunk indices.

/// Split text into chunk strings, in document order.
///
/// `overlap_chars` > 0 prefixes each chunk after the first with the tail of
/// the previous chunk (snapped to a whitespace boundary) so that context
/// spanning a chunk border is retrievable from either side. The `max_chars`
/// budget applies to the segmentation before overlap is added.
///
/// Empty or whitespace-only input yields no chunks; this is not an error.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this paragraph would exceed the budget, flush first.
        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            // Oversized paragraph: accumulate sentence by sentence.
            for sentence in split_sentences(trimmed) {
                let s = sentence.trim();
                if s.is_empty() {
                    continue;
                }
                let would = if buf.is_empty() {
                    s.len()
                } else {
                    buf.len() + 1 + s.len()
                };
                if would > max_chars && !buf.is_empty() {
                    chunks.push(std::mem::take(&mut buf));
                }
                if !buf.is_empty() {
                    buf.push(' ');
                }
                // A single sentence longer than the budget lands here alone
                // and is emitted whole on the next flush.
                buf.push_str(s);
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.trim().is_empty() {
        chunks.push(buf);
    }

    if overlap_chars > 0 {
        apply_overlap(&mut chunks, overlap_chars);
    }

    chunks
}

/// Split a paragraph into sentences, keeping terminators (`.`, `!`, `?`)
/// attached. A boundary requires the terminator run to be followed by
/// whitespace or end of text, so decimals and abbreviations inside a word do
/// not split. Trailing text without a terminator is kept as a final piece.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, c2)) = iter.peek() {
            if matches!(c2, '.' | '!' | '?') {
                end = j + c2.len_utf8();
                iter.next();
            } else {
                break;
            }
        }
        let at_boundary = match iter.peek() {
            None => true,
            Some(&(_, c2)) => c2.is_whitespace(),
        };
        if at_boundary {
            out.push(&text[start..end]);
            start = end;
        }
    }

    if start < text.len() && !text[start..].trim().is_empty() {
        out.push(&text[start..]);
    }

    out
}

/// Prefix each chunk after the first with the tail of its predecessor.
fn apply_overlap(chunks: &mut [String], overlap_chars: usize) {
    for i in (1..chunks.len()).rev() {
        let tail = overlap_tail(&chunks[i - 1], overlap_chars).to_string();
        if !tail.is_empty() {
            chunks[i] = format!("{} {}", tail, chunks[i]);
        }
    }
}

/// The last `overlap_chars` characters of `text`, extended left to the
/// nearest whitespace boundary so words are not cut in half.
fn overlap_tail(text: &str, overlap_chars: usize) -> &str {
    if text.len() <= overlap_chars {
        return text;
    }
    let mut pos = text.len() - overlap_chars;
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    match text[..pos].rfind(char::is_whitespace) {
        Some(ws) => text[ws..].trim_start(),
        None => text[pos..].trim_start(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collapse_ws(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = chunk_text("Hello, world!", 500, 0);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 500, 0).is_empty());
        assert!(chunk_text("   \n\n  \n\n ", 500, 0).is_empty());
    }

    #[test]
    fn paragraphs_under_limit_accumulate() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let chunks = chunk_text(text, 500, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First paragraph."));
        assert!(chunks[0].contains("Third paragraph."));
    }

    #[test]
    fn paragraphs_over_limit_flush() {
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let chunks = chunk_text(text, 30, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 30, "chunk exceeds budget: {:?}", c);
        }
    }

    #[test]
    fn oversized_paragraph_splits_on_sentences() {
        let text = "Alpha is first. Beta comes second! Gamma is third? Delta ends it.";
        let chunks = chunk_text(text, 40, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.len() <= 40, "chunk exceeds budget: {:?}", c);
        }
    }

    #[test]
    fn oversized_sentence_emitted_whole() {
        let long = "word ".repeat(30).trim_end().to_string() + ".";
        let text = format!("Short one.\n\n{}", long);
        let chunks = chunk_text(&text, 50, 0);
        assert!(chunks.iter().any(|c| c.trim() == long));
    }

    #[test]
    fn no_empty_chunks() {
        let text = "One.\n\n\n\n\n\nTwo.\n\n  \n\nThree.";
        for c in chunk_text(text, 8, 0) {
            assert!(!c.trim().is_empty());
        }
    }

    #[test]
    fn concatenation_reconstructs_text() {
        let text = "The quick brown fox jumps. It was fast! Was it though?\n\n\
                    A second paragraph follows here. With more sentences. And more.\n\n\
                    Final short one.";
        let chunks = chunk_text(text, 40, 0);
        assert_eq!(collapse_ws(&chunks.join(" ")), collapse_ws(text));
    }

    #[test]
    fn trailing_text_without_terminator_is_kept() {
        let text = "A full sentence here. and then a trailing fragment without an end";
        let chunks = chunk_text(text, 30, 0);
        assert!(collapse_ws(&chunks.join(" ")).contains("trailing fragment without an end"));
    }

    #[test]
    fn deterministic() {
        let text = "Alpha.\n\nBeta.\n\nGamma.\n\nDelta.";
        assert_eq!(chunk_text(text, 10, 0), chunk_text(text, 10, 0));
    }

    #[test]
    fn overlap_prefixes_following_chunk() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = chunk_text(text, 25, 10);
        assert_eq!(chunks.len(), 2);
        assert!(
            chunks[1].starts_with("here.") || chunks[1].starts_with("paragraph"),
            "expected overlap prefix, got {:?}",
            chunks[1]
        );
        assert!(chunks[1].contains("Second paragraph here."));
    }

    #[test]
    fn two_hundred_chars_three_paragraphs_one_chunk() {
        // 200 characters across three paragraphs fits a 500-char budget.
        let p = "x".repeat(60);
        let text = format!("{}\n\n{}\n\n{}", p, p, p);
        assert_eq!(chunk_text(&text, 500, 0).len(), 1);
    }
}
