//! Boundary-aware text chunking.
//!
//! Splits normalized text into spans of at most `chunk_size` characters,
//! preferring to cut at a paragraph break, then a sentence end, then
//! whitespace. Consecutive spans overlap by a fixed fraction of the chunk
//! size.

/// Splits text into overlapping spans.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// `overlap_ratio` is clamped to `[0, 0.5]`.
    pub fn new(chunk_size: usize, overlap_ratio: f32) -> Self {
        let chunk_size = chunk_size.max(1);
        let ratio = overlap_ratio.clamp(0.0, 0.5);
        Self {
            chunk_size,
            overlap: (chunk_size as f32 * ratio) as usize,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text`. Empty or whitespace-only text yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.trim().chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        loop {
            if chars.len() - start <= self.chunk_size {
                push_span(&mut chunks, &chars[start..]);
                break;
            }

            let limit = start + self.chunk_size;
            let end = self.find_break(&chars, start, limit);
            push_span(&mut chunks, &chars[start..end]);

            let mut next = end.saturating_sub(self.overlap);
            if next <= start {
                next = end;
            }
            // Start the overlap on a word boundary when one is close.
            while next < end && next > start && !chars[next - 1].is_whitespace() {
                next += 1;
            }
            start = next;
        }
        chunks
    }

    /// End index (exclusive) of the span starting at `start`, at most `limit`.
    fn find_break(&self, chars: &[char], start: usize, limit: usize) -> usize {
        // Never cut in the first half of the window, so spans stay useful.
        let floor = start + self.chunk_size / 2;
        let window = floor..limit;

        let paragraph = window
            .clone()
            .rev()
            .find(|&i| i + 1 < chars.len() && chars[i] == '\n' && chars[i + 1] == '\n');
        if let Some(i) = paragraph {
            return i + 2;
        }

        let sentence = window.clone().rev().find(|&i| {
            matches!(chars[i], '.' | '!' | '?') && chars.get(i + 1).is_some_and(|c| c.is_whitespace())
        });
        if let Some(i) = sentence {
            return i + 1;
        }

        let space = window.rev().find(|&i| chars[i].is_whitespace());
        match space {
            Some(i) => i + 1,
            None => limit,
        }
    }
}

fn push_span(chunks: &mut Vec<String>, span: &[char]) {
    let text: String = span.iter().collect();
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_has_no_chunks() {
        let chunker = Chunker::new(100, 0.1);
        assert!(chunker.split("").is_empty());
        assert!(chunker.split("   \n\n  ").is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = Chunker::new(100, 0.1);
        assert_eq!(chunker.split("  Hello world.  "), vec!["Hello world."]);
    }

    #[test]
    fn chunks_respect_the_size_budget() {
        let text = "word ".repeat(500);
        let chunker = Chunker::new(64, 0.2);
        let chunks = chunker.split(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 64));
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let text = format!("{}\n\n{}", "a".repeat(70), "b".repeat(70));
        let chunks = Chunker::new(100, 0.0).split(&text);
        assert_eq!(chunks[0], "a".repeat(70));
        assert_eq!(chunks[1], "b".repeat(70));
    }

    #[test]
    fn prefers_sentence_ends_over_spaces() {
        let text = "The first sentence is here. The second one runs on and on without stopping";
        let chunks = Chunker::new(40, 0.0).split(text);
        assert_eq!(chunks[0], "The first sentence is here.");
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text: String = (0..200).map(|i| format!("w{i} ")).collect();
        let chunker = Chunker::new(80, 0.25);
        let chunks = chunker.split(&text);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "{:?} should carry over {last_word}",
                pair[1]
            );
        }
    }

    #[test]
    fn unbroken_text_is_hard_cut_and_terminates() {
        let text = "x".repeat(1000);
        let chunks = Chunker::new(100, 0.5).split(&text);
        assert_eq!(chunks.len(), 10);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "ünïcödé ".repeat(100);
        let chunks = Chunker::new(30, 0.1).split(&text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 30));
    }

    #[test]
    fn overlap_ratio_is_clamped() {
        assert_eq!(Chunker::new(100, 2.0).overlap(), 50);
        assert_eq!(Chunker::new(100, -1.0).overlap(), 0);
    }
}
