//! Property-based tests for control-sequence filtering.
//!
//! Uses proptest to generate terminal output and verify filter invariants.

use proptest::prelude::*;

use agent_pty_emulator::{strip_control_sequences, AnsiFilter};

/// Printable text without any control characters.
fn plain_text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 .,:;!?'\"()\\[\\]{}<>/+=_-]{0,80}"
}

/// A random SGR/cursor/OSC sequence.
fn control_sequence() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u8..108).prop_map(|n| format!("\x1b[{n}m")),
        (1u16..50, 1u16..200).prop_map(|(r, c)| format!("\x1b[{r};{c}H")),
        (0u8..3).prop_map(|n| format!("\x1b[{n}K")),
        Just("\x1b[?25l".to_string()),
        Just("\x1b[?2004h".to_string()),
        "[a-z ]{0,20}".prop_map(|t| format!("\x1b]0;{t}\x07")),
    ]
}

/// Text interleaved with control sequences, plus the text alone.
fn decorated_text() -> impl Strategy<Value = (String, String)> {
    prop::collection::vec((control_sequence(), plain_text()), 0..10).prop_map(|parts| {
        let mut raw = String::new();
        let mut plain = String::new();
        for (seq, text) in parts {
            raw.push_str(&seq);
            raw.push_str(&text);
            plain.push_str(&text);
        }
        (raw, plain)
    })
}

proptest! {
    /// Plain text passes through untouched.
    #[test]
    fn plain_text_is_unchanged(text in plain_text()) {
        prop_assert_eq!(strip_control_sequences(&text), text);
    }

    /// Decorations are removed and only the text remains.
    #[test]
    fn decorations_are_removed((raw, plain) in decorated_text()) {
        prop_assert_eq!(strip_control_sequences(&raw), plain);
    }

    /// Output never contains an escape character.
    #[test]
    fn output_has_no_escape(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut filter = AnsiFilter::new();
        let out = filter.feed(&bytes);
        prop_assert!(!out.contains('\x1b'));
        prop_assert!(!out.contains('\r'));
    }

    /// Splitting the input at any point yields the same text.
    #[test]
    fn split_point_does_not_matter((raw, plain) in decorated_text(), split in 0usize..1000) {
        let bytes = raw.as_bytes();
        let at = split.min(bytes.len());
        let mut filter = AnsiFilter::new();
        let mut out = filter.feed(&bytes[..at]);
        out.push_str(&filter.feed(&bytes[at..]));
        prop_assert_eq!(out, plain);
    }
}
