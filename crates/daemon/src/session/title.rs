//! Window-title detection in raw terminal output.
//!
//! Programs set the window title with `ESC ] 0 ; <text> BEL`. A [`vte`]
//! parser keeps state between chunks so a sequence split across two reads is
//! still found. It only observes bytes; the chunk itself is forwarded
//! untouched.

use vte::{Parser, Perform};

/// Titles longer than this are treated as garbage and dropped.
pub const MAX_TITLE_LEN: usize = 4096;

/// Collects the titles dispatched while one chunk is parsed.
#[derive(Debug, Default)]
struct TitleCollector {
    titles: Vec<String>,
}

impl Perform for TitleCollector {
    fn osc_dispatch(&mut self, params: &[&[u8]], bell_terminated: bool) {
        if !bell_terminated {
            return;
        }
        let Some((&code, rest)) = params.split_first() else {
            return;
        };
        if code != b"0" || rest.is_empty() {
            return;
        }

        // The parser splits on ';', which is legal inside a title.
        let title = rest.join(&b';');
        if title.is_empty() || title.len() > MAX_TITLE_LEN {
            return;
        }
        self.titles
            .push(String::from_utf8_lossy(&title).into_owned());
    }
}

/// Incremental scanner for title-change sequences.
pub struct TitleScanner {
    parser: Parser,
    collector: TitleCollector,
}

impl std::fmt::Debug for TitleScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TitleScanner").finish_non_exhaustive()
    }
}

impl Default for TitleScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl TitleScanner {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            collector: TitleCollector::default(),
        }
    }

    /// Scan one chunk and return every complete, non-empty title it ends.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.parser.advance(&mut self.collector, chunk);
        std::mem::take(&mut self.collector.titles)
    }
}
