/// A contiguous slice of a scheme document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub text: String,
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize, min_chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            min_chunk_size,
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.len() <= self.chunk_size {
            if text.trim().len() < self.min_chunk_size {
                return Vec::new();
            }
            return vec![Chunk {
                text: text.to_string(),
                index: 0,
                start_offset: 0,
                end_offset: text.len(),
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut index = 0;

        while start < text.len() {
            let raw_end = (start + self.chunk_size).min(text.len());
            let end = snap_to_char_boundary(text, raw_end);

            // Prefer a natural boundary near the end
            let mut actual_end = if end < text.len() {
                self.find_break_point(text, start, end)
            } else {
                end
            };
            // A chunk size below one character's width still has to cover it.
            if actual_end <= start {
                actual_end = next_char_boundary(text, start);
            }

            let chunk_text = &text[start..actual_end];
            if chunk_text.trim().len() >= self.min_chunk_size {
                chunks.push(Chunk {
                    text: chunk_text.to_string(),
                    index,
                    start_offset: start,
                    end_offset: actual_end,
                });
                index += 1;
            }

            if actual_end >= text.len() {
                break;
            }

            // Move forward with overlap, always making progress
            let span = actual_end - start;
            let step = if span > self.chunk_overlap {
                span - self.chunk_overlap
            } else {
                span.max(1)
            };
            let next = snap_to_char_boundary(text, start + step);
            start = if next > start { next } else { actual_end };
        }

        chunks
    }

    fn find_break_point(&self, text: &str, start: usize, preferred_end: usize) -> usize {
        let raw_search_start = if preferred_end > start + 200 {
            preferred_end - 200
        } else {
            start
        };
        let search_start = snap_to_char_boundary(text, raw_search_start);
        let safe_end = snap_to_char_boundary(text, preferred_end);

        if search_start >= safe_end {
            return safe_end;
        }

        let search_region = &text[search_start..safe_end];

        // Priority: paragraph break > sentence end > line break > word break
        let candidate = search_region
            .rfind("\n\n")
            .map(|pos| pos + 2)
            .or_else(|| search_region.rfind(". ").map(|pos| pos + 2))
            .or_else(|| search_region.rfind('\n').map(|pos| pos + 1))
            .or_else(|| search_region.rfind(' ').map(|pos| pos + 1));

        match candidate {
            Some(pos) if search_start + pos > start => search_start + pos,
            _ => safe_end,
        }
    }
}

/// Snap a byte offset to the nearest valid UTF-8 char boundary (rounding down).
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}

/// First char boundary strictly after `pos`.
fn next_char_boundary(text: &str, pos: usize) -> usize {
    let mut p = pos + 1;
    while p < text.len() && !text.is_char_boundary(p) {
        p += 1;
    }
    p.min(text.len())
}
