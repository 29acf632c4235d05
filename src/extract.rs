//! Pulls the JSON block that ffmpeg's `loudnorm` filter prints into its
//! diagnostic stream.
//!
//! The block is recognised purely by marker lines: a line that is exactly `{`
//! opens it and a line that is exactly `}` closes it. Everything before the
//! opening line is banner/progress noise and is discarded.

use futures::{Stream, StreamExt as _};

const OPEN_MARKER: &str = "{";
const CLOSE_MARKER: &str = "}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Searching,
    Inside,
    Closed,
}

/// Line-at-a-time extractor for a single marker-delimited block.
#[derive(Debug)]
pub struct BlockExtractor {
    state: State,
    block: String,
}

impl Default for BlockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockExtractor {
    pub fn new() -> Self {
        Self {
            state: State::Searching,
            block: String::new(),
        }
    }

    /// Feeds one line. Returns `true` once the closing marker has been seen;
    /// later lines are ignored.
    pub fn feed(&mut self, line: &str) -> bool {
        match self.state {
            State::Searching => {
                if line == OPEN_MARKER {
                    self.push(line);
                    self.state = State::Inside;
                }
            }
            State::Inside => {
                self.push(line);
                if line == CLOSE_MARKER {
                    self.state = State::Closed;
                }
            }
            State::Closed => {}
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Closed
    }

    /// Accumulated text. Empty when the opening marker never appeared; an
    /// unterminated block is returned as-is and left for the JSON parser to
    /// reject.
    pub fn finish(self) -> String {
        self.block
    }

    fn push(&mut self, line: &str) {
        self.block.push_str(line);
        self.block.push('\n');
    }
}

/// Extracts the block from a synchronous sequence of lines.
pub fn extract_block_from_lines<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut extractor = BlockExtractor::new();
    for line in lines {
        if extractor.feed(line.as_ref()) {
            break;
        }
    }
    extractor.finish()
}

/// Reads `lines` until the block closes or the stream ends.
///
/// Stops consuming right after the closing marker, so the remainder of the
/// stream is still available to the caller for draining.
pub async fn extract_block<S>(lines: &mut S) -> std::io::Result<String>
where
    S: Stream<Item = std::io::Result<String>> + Unpin,
{
    let mut extractor = BlockExtractor::new();
    while let Some(line) = lines.next().await {
        if extractor.feed(&line?) {
            break;
        }
    }
    Ok(extractor.finish())
}
