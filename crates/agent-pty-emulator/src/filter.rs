//! Streaming removal of ANSI/VT control sequences using the VTE crate.
//!
//! Terminal output arrives in arbitrary slices, so an escape sequence can
//! straddle two reads. [`AnsiFilter`] keeps the VTE state machine alive
//! between calls and only ever emits the printable text.

use vte::{Params, Perform};

/// Upper bound on spaces produced for a single cursor-forward sequence.
const MAX_CURSOR_FORWARD: u16 = 512;

/// Plain-text sink driven by the VTE parser.
#[derive(Debug, Default)]
struct PlainText {
    out: String,
}

impl Perform for PlainText {
    fn print(&mut self, c: char) {
        self.out.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.out.push('\n'),
            b'\t' => self.out.push('\t'),
            // CR, BEL, BS and the remaining C0 controls carry no text
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, c: char) {
        // Cursor forward is commonly used in place of runs of spaces
        if c == 'C' {
            let n = params
                .iter()
                .next()
                .and_then(|p| p.first().copied())
                .filter(|&n| n > 0)
                .unwrap_or(1)
                .min(MAX_CURSOR_FORWARD);
            self.out.extend(std::iter::repeat(' ').take(n as usize));
        }
    }
}

/// Stateful control-sequence filter.
pub struct AnsiFilter {
    parser: vte::Parser,
    sink: PlainText,
}

impl std::fmt::Debug for AnsiFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnsiFilter").finish_non_exhaustive()
    }
}

impl AnsiFilter {
    /// Create a filter in the ground state.
    pub fn new() -> Self {
        Self {
            parser: vte::Parser::new(),
            sink: PlainText::default(),
        }
    }

    /// Feed raw terminal bytes, returning the plain text they produced.
    ///
    /// Incomplete escape sequences and partial UTF-8 characters at the end of
    /// `bytes` are held back until the next call completes them.
    pub fn feed(&mut self, bytes: &[u8]) -> String {
        for byte in bytes {
            self.parser.advance(&mut self.sink, *byte);
        }
        std::mem::take(&mut self.sink.out)
    }
}

impl Default for AnsiFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove control sequences from a complete piece of text.
///
/// # Example
/// ```
/// use agent_pty_emulator::strip_control_sequences;
///
/// assert_eq!(strip_control_sequences("\x1b[31mRed\x1b[0m text"), "Red text");
/// ```
pub fn strip_control_sequences(text: &str) -> String {
    AnsiFilter::new().feed(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_sgr_colors() {
        assert_eq!(strip_control_sequences("\x1b[31mRed\x1b[0m text"), "Red text");
        assert_eq!(
            strip_control_sequences("\x1b[1;38;5;208mbold orange\x1b[m"),
            "bold orange"
        );
    }

    #[test]
    fn test_strips_cursor_movement() {
        assert_eq!(strip_control_sequences("\x1b[2K\x1b[1Gdone\x1b[?25h"), "done");
        assert_eq!(strip_control_sequences("\x1b[10;20Hhere"), "here");
    }

    #[test]
    fn test_strips_osc_title() {
        assert_eq!(strip_control_sequences("\x1b]0;my title\x07prompt"), "prompt");
        assert_eq!(strip_control_sequences("\x1b]2;title\x1b\\after"), "after");
    }

    #[test]
    fn test_cursor_forward_becomes_spaces() {
        assert_eq!(strip_control_sequences("a\x1b[3Cb"), "a   b");
        assert_eq!(strip_control_sequences("a\x1b[Cb"), "a b");
    }

    #[test]
    fn test_line_endings_normalized() {
        assert_eq!(strip_control_sequences("one\r\ntwo\r\n"), "one\ntwo\n");
        assert_eq!(strip_control_sequences("tab\there"), "tab\there");
        assert_eq!(strip_control_sequences("bell\x07"), "bell");
    }

    #[test]
    fn test_sequence_split_across_feeds() {
        let mut filter = AnsiFilter::new();
        let mut out = filter.feed(b"before \x1b[3");
        out.push_str(&filter.feed(b"1mred\x1b"));
        out.push_str(&filter.feed(b"[0m after"));
        assert_eq!(out, "before red after");
    }

    #[test]
    fn test_utf8_split_across_feeds() {
        let bytes = "héllo ❯".as_bytes();
        let mut filter = AnsiFilter::new();
        let mut out = String::new();
        for chunk in bytes.chunks(1) {
            out.push_str(&filter.feed(chunk));
        }
        assert_eq!(out, "héllo ❯");
    }
}
