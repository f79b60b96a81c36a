//! Input sanitising for messages written into a session.

/// End of transmission (Ctrl+D).
const EOT: char = '\u{04}';
/// Interrupt (Ctrl+C).
const ETX: char = '\u{03}';
/// Suspend (Ctrl+Z).
const SUB: char = '\u{1a}';

/// Outcome of sanitising caller input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizedInput {
    /// Text that is safe to forward to the child
    Text(String),
    /// The input was the CLI's exit command and must not be forwarded
    ExitCommand,
}

/// Strip process-control characters and refuse the literal exit command.
///
/// Callers must not be able to tear down the child through the
/// conversational channel, so EOT, interrupt and suspend are removed and a
/// payload that is exactly `exit_command` (ignoring surrounding whitespace
/// and ASCII case) is reported as [`SanitizedInput::ExitCommand`].
///
/// # Example
/// ```
/// use agent_pty_session::{sanitize_input, SanitizedInput};
///
/// assert_eq!(
///     sanitize_input("hi\u{03}there", "/exit"),
///     SanitizedInput::Text("hithere".to_string())
/// );
/// assert_eq!(sanitize_input(" /EXIT ", "/exit"), SanitizedInput::ExitCommand);
/// ```
pub fn sanitize_input(text: &str, exit_command: &str) -> SanitizedInput {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(*c, EOT | ETX | SUB))
        .collect();

    let exit_command = exit_command.trim();
    if !exit_command.is_empty() && cleaned.trim().eq_ignore_ascii_case(exit_command) {
        return SanitizedInput::ExitCommand;
    }

    SanitizedInput::Text(cleaned)
}
