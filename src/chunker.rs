//! Heading-aware markdown chunker.
//!
//! Splits a markdown document into retrieval units that respect the heading
//! hierarchy and a configurable `max_tokens` limit. Each chunk carries the
//! breadcrumb of headings enclosing it (e.g. `"# Intro > ## Setup"`), so
//! retrieval results keep their structural context.
//!
//! # Algorithm
//!
//! 1. Scan lines for ATX headings (`#` through `######`). A heading at level
//!    L pops all open headings at level ≥ L off the stack and pushes itself;
//!    the section accumulated so far is flushed first.
//! 2. Sections within the token limit become one chunk each.
//! 3. Oversized sections are sub-split on blank-line paragraph boundaries,
//!    seeding each subsequent chunk with the trailing paragraphs of the
//!    previous one up to `overlap_tokens`.
//! 4. Chunk indices are assigned sequentially across the whole document,
//!    starting at 0.
//!
//! A document with no headings yields one chunk with an empty heading path.
//! A single paragraph larger than `max_tokens` is emitted whole — splitting
//! never descends below paragraph granularity.

use crate::tokens::estimate_tokens;

const DEFAULT_MAX_TOKENS: usize = 512;
const DEFAULT_OVERLAP_TOKENS: usize = 50;

/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Maximum estimated tokens per chunk.
    pub max_tokens: usize,
    /// Token budget for the trailing-paragraph overlap between sub-chunks.
    pub overlap_tokens: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

/// One chunk produced by [`chunk_markdown`], not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub content: String,
    pub heading_path: String,
    pub chunk_index: i64,
    pub token_count: i64,
}

/// Split markdown into heading-scoped, size-bounded chunks.
pub fn chunk_markdown(markdown: &str, options: &ChunkOptions) -> Vec<ChunkPiece> {
    let sections = split_by_headings(markdown);
    let mut chunks = Vec::new();
    let mut chunk_index: i64 = 0;

    for section in sections {
        let token_count = estimate_tokens(&section.content);
        if token_count <= options.max_tokens {
            chunks.push(ChunkPiece {
                content: section.content,
                heading_path: section.heading_path,
                chunk_index,
                token_count: token_count as i64,
            });
            chunk_index += 1;
        } else {
            for sub in sub_split(&section.content, options.max_tokens, options.overlap_tokens) {
                let sub_tokens = estimate_tokens(&sub);
                chunks.push(ChunkPiece {
                    content: sub,
                    heading_path: section.heading_path.clone(),
                    chunk_index,
                    token_count: sub_tokens as i64,
                });
                chunk_index += 1;
            }
        }
    }

    chunks
}

struct Section {
    content: String,
    heading_path: String,
}

struct HeadingFrame {
    level: usize,
    text: String,
}

/// Parse a line as an ATX heading: 1–6 `#`s, whitespace, non-empty text.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.len() - line.trim_start_matches('#').len();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let text = rest.trim();
    if text.is_empty() {
        return None;
    }
    Some((hashes, text))
}

fn render_path(stack: &[HeadingFrame]) -> String {
    stack
        .iter()
        .map(|h| format!("{} {}", "#".repeat(h.level), h.text))
        .collect::<Vec<_>>()
        .join(" > ")
}

fn split_by_headings(markdown: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut stack: Vec<HeadingFrame> = Vec::new();
    let mut current_lines: Vec<&str> = Vec::new();

    let flush = |lines: &mut Vec<&str>, stack: &[HeadingFrame], out: &mut Vec<Section>| {
        let content = lines.join("\n").trim().to_string();
        if !content.is_empty() {
            out.push(Section {
                content,
                heading_path: render_path(stack),
            });
        }
        lines.clear();
    };

    for line in markdown.lines() {
        if let Some((level, text)) = parse_heading(line) {
            flush(&mut current_lines, &stack, &mut sections);
            while stack.last().is_some_and(|h| h.level >= level) {
                stack.pop();
            }
            stack.push(HeadingFrame {
                level,
                text: text.to_string(),
            });
        } else {
            current_lines.push(line);
        }
    }
    flush(&mut current_lines, &stack, &mut sections);

    // No headings anywhere: the whole document is one section
    if sections.is_empty() {
        let content = markdown.trim().to_string();
        if !content.is_empty() {
            sections.push(Section {
                content,
                heading_path: String::new(),
            });
        }
    }

    sections
}

/// Sub-split an oversized section on paragraph boundaries.
///
/// Paragraphs accumulate greedily; when the next one would push the buffer
/// over `max_tokens`, the buffer is flushed and the next buffer is seeded
/// with trailing paragraphs from the flushed chunk whose cumulative estimate
/// stays within `overlap_tokens`.
fn sub_split(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let paragraphs = split_paragraphs(text);
    let mut result = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;

    for para in paragraphs {
        let para_tokens = estimate_tokens(para);

        if current_tokens + para_tokens > max_tokens && !current.is_empty() {
            result.push(current.join("\n\n"));

            let mut overlap: Vec<&str> = Vec::new();
            let mut overlap_tokens_used = 0usize;
            for prev in current.iter().rev() {
                let t = estimate_tokens(prev);
                if overlap_tokens_used + t > overlap_tokens {
                    break;
                }
                overlap.insert(0, prev);
                overlap_tokens_used += t;
            }

            current = overlap;
            current.push(para);
            current_tokens = overlap_tokens_used + para_tokens;
        } else {
            current.push(para);
            current_tokens += para_tokens;
        }
    }

    if !current.is_empty() {
        result.push(current.join("\n\n"));
    }

    result
}

/// Split on runs of blank lines, dropping empty segments.
fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut rest = text;
    while let Some(pos) = find_paragraph_break(rest) {
        let (para, tail) = rest.split_at(pos);
        if !para.trim().is_empty() {
            paragraphs.push(para);
        }
        rest = tail.trim_start_matches(['\n', '\r']);
    }
    if !rest.trim().is_empty() {
        paragraphs.push(rest);
    }
    paragraphs
}

/// Byte offset of the first blank-line run (`\n\n+`), if any.
fn find_paragraph_break(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
            return Some(i);
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repeat_words(word: &str, count: usize) -> String {
        vec![word; count].join(" ")
    }

    fn opts(max_tokens: usize, overlap_tokens: usize) -> ChunkOptions {
        ChunkOptions {
            max_tokens,
            overlap_tokens,
        }
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        assert!(chunk_markdown("", &ChunkOptions::default()).is_empty());
        assert!(chunk_markdown("\n\n  \n", &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn test_no_headings_single_chunk() {
        let chunks = chunk_markdown("Plain text without headings.\n", &opts(200, 0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading_path, "");
        assert_eq!(chunks[0].content, "Plain text without headings.");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_heading_paths_are_nested() {
        let md = [
            "# Intro",
            "Hello world.",
            "",
            "## Setup",
            "Step one.",
            "",
            "### Details",
            "More info.",
        ]
        .join("\n");

        let chunks = chunk_markdown(&md, &opts(200, 0));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading_path, "# Intro");
        assert_eq!(chunks[1].heading_path, "# Intro > ## Setup");
        assert_eq!(chunks[2].heading_path, "# Intro > ## Setup > ### Details");
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
        }
    }

    #[test]
    fn test_sibling_heading_resets_path() {
        let md = "# A\none\n\n## B\ntwo\n\n## C\nthree\n\n# D\nfour";
        let chunks = chunk_markdown(md, &opts(200, 0));
        let paths: Vec<&str> = chunks.iter().map(|c| c.heading_path.as_str()).collect();
        assert_eq!(paths, vec!["# A", "# A > ## B", "# A > ## C", "# D"]);
    }

    #[test]
    fn test_two_section_document() {
        let chunks = chunk_markdown("# A\nhello\n\n## B\nworld", &opts(1000, 0));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].heading_path, "# A");
        assert_eq!(chunks[0].content, "hello");
        assert_eq!(chunks[1].heading_path, "# A > ## B");
        assert_eq!(chunks[1].content, "world");
    }

    #[test]
    fn test_oversized_section_sub_splits_with_overlap() {
        let md = format!(
            "# Section\n{}\n\n{}\n\n{}",
            repeat_words("alpha", 60),
            repeat_words("beta", 60),
            repeat_words("gamma", 60)
        );

        let chunks = chunk_markdown(&md, &opts(80, 20));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert_eq!(c.heading_path, "# Section");
        }
        assert!(chunks[0].content.contains("alpha"));
        assert!(chunks[1].content.contains("beta"));
    }

    #[test]
    fn test_overlap_repeats_trailing_paragraph() {
        // Paragraphs of 9 words each estimate to 12 tokens; with max 30 and
        // overlap 15 a flushed chunk's last paragraph seeds the next chunk.
        let p: Vec<String> = (0..6)
            .map(|i| repeat_words(&format!("p{}", i), 9))
            .collect();
        let md = p.join("\n\n");

        let chunks = chunk_markdown(&md, &opts(30, 15));
        assert!(chunks.len() >= 2);
        for window in chunks.windows(2) {
            let prev_last = window[0]
                .content
                .split("\n\n")
                .last()
                .unwrap()
                .to_string();
            assert!(
                window[1].content.contains(&prev_last),
                "expected overlap paragraph to repeat in the next chunk"
            );
        }
    }

    #[test]
    fn test_no_overlap_when_budget_zero() {
        let p: Vec<String> = (0..4)
            .map(|i| repeat_words(&format!("q{}", i), 9))
            .collect();
        let md = p.join("\n\n");

        let chunks = chunk_markdown(&md, &opts(30, 0));
        assert!(chunks.len() >= 2);
        let all: String = chunks.iter().map(|c| c.content.as_str()).collect();
        // Each paragraph marker appears exactly once across all chunks
        for i in 0..4 {
            let marker = format!("q{}", i);
            assert_eq!(all.matches(&marker).count(), 9, "paragraph {} duplicated", i);
        }
    }

    #[test]
    fn test_giant_paragraph_emitted_whole() {
        let md = repeat_words("huge", 500);
        let chunks = chunk_markdown(&md, &opts(50, 10));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, md);
        assert!(chunks[0].token_count > 50);
    }

    #[test]
    fn test_indices_contiguous_across_sections_and_subsplits() {
        let md = format!(
            "# One\n{}\n\n{}\n\n# Two\nshort",
            repeat_words("x", 60),
            repeat_words("y", 60)
        );
        let chunks = chunk_markdown(&md, &opts(80, 0));
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "index gap at {}", i);
        }
    }

    #[test]
    fn test_heading_line_requires_space_and_text() {
        assert!(parse_heading("#no-space").is_none());
        assert!(parse_heading("####### seven").is_none());
        assert!(parse_heading("#   ").is_none());
        assert_eq!(parse_heading("## Title"), Some((2, "Title")));
    }

    #[test]
    fn test_heading_line_excluded_from_content() {
        let chunks = chunk_markdown("# Title\nbody text", &opts(200, 0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "body text");
        assert_eq!(chunks[0].heading_path, "# Title");
    }

    #[test]
    fn test_heading_with_no_body_emits_nothing() {
        let chunks = chunk_markdown("# Lonely\n\n## Also lonely\n", &opts(200, 0));
        assert!(chunks.is_empty());
    }
}
