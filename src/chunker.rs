//! Overlapping fixed-window text chunker.
//!
//! Splits normalized document text into word windows of at most
//! `window_words` words, where each window after the first starts
//! `overlap_words` words before the end of the previous one. The overlap
//! exists so a sentence split across a boundary is still fully contained in
//! at least one chunk.
//!
//! The window sequence is lazy, finite, and restartable: [`ChunkWindows`] is
//! a plain [`Iterator`] that can be rebuilt from the same input at any time.

use crate::config::ChunkingConfig;

/// Iterator over `(index, text)` windows covering the whole input.
///
/// Degenerate input (shorter than one window, including empty text) yields
/// exactly one window.
#[derive(Debug, Clone)]
pub struct ChunkWindows<'a> {
    words: Vec<&'a str>,
    window: usize,
    overlap: usize,
    start: usize,
    index: usize,
    done: bool,
}

impl<'a> ChunkWindows<'a> {
    /// Panics if `overlap >= window` or `window == 0`; both are rejected at
    /// config load time.
    pub fn new(text: &'a str, window: usize, overlap: usize) -> Self {
        assert!(window > 0, "window must be > 0");
        assert!(overlap < window, "overlap must be < window");
        Self {
            words: text.split_whitespace().collect(),
            window,
            overlap,
            start: 0,
            index: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for ChunkWindows<'a> {
    type Item = (usize, String);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let end = (self.start + self.window).min(self.words.len());
        let text = self.words[self.start..end].join(" ");
        let item = (self.index, text);

        if end >= self.words.len() {
            self.done = true;
        } else {
            self.start = end - self.overlap;
            self.index += 1;
        }

        Some(item)
    }
}

/// Collect all windows for a text under the given chunking config.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<(usize, String)> {
    ChunkWindows::new(text, config.window_words, config.overlap_words).collect()
}
