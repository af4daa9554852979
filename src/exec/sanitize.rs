//! Terminal output cleanup.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

/// CSI sequences, OSC strings (BEL or ST terminated), DCS/SOS/PM/APC
/// strings, charset selection and the remaining two-byte escapes.
const ANSI_PATTERN: &str = concat!(
    r"\x1b\[[0-?]*[ -/]*[@-~]",
    r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
    r"|\x1b[PX^_][^\x1b]*\x1b\\",
    r"|\x1b[()*+][0-9A-Za-z]",
    r"|\x1b[@-Z\\-_=>78]",
);

fn ansi_regex() -> Option<&'static Regex> {
    static ANSI: OnceLock<Option<Regex>> = OnceLock::new();
    ANSI.get_or_init(|| match Regex::new(ANSI_PATTERN) {
        Ok(re) => Some(re),
        Err(e) => {
            log::error!("ANSI pattern failed to compile: {e}");
            None
        }
    })
    .as_ref()
}

/// Remove ANSI escape sequences.
#[must_use]
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    match ansi_regex() {
        Some(re) => re.replace_all(text, ""),
        None => Cow::Borrowed(text),
    }
}

/// Normalize pty line endings (`\r\n`, and `\r\r\n` from some shells) to `\n`.
#[must_use]
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\r\n", "\n").replace("\r\n", "\n")
}
