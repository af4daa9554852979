//! End-marker sentinel: wraps a command so its completion and exit code
//! become visible in the free-form terminal stream.
//!
//! ```text
//! (ls -la); echo "___TTYD_EXEC_END___Ab3dE9xQ2mZk:$?___"\r
//! ```
//!
//! The shell echoes that line back verbatim (with `$?` unexpanded), which
//! the pattern never matches because it requires digits after the colon.

use rand::distr::Alphanumeric;
use rand::Rng;
use regex::bytes::Regex;

use crate::constants::{
    END_MARKER_PREFIX, END_MARKER_SUFFIX, MARKER_ID_LEN, MARKER_ID_MIN_LEN, UNKNOWN_EXIT_CODE,
};
use crate::error::TtyError;

/// Where the marker was found and what it carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerMatch {
    /// Byte offset of the first marker byte.
    pub start: usize,
    /// Byte offset one past the last marker byte.
    pub end: usize,
    /// Parsed exit code, or `-1` if it did not fit.
    pub exit_code: i32,
}

/// One job's unique end marker.
#[derive(Debug, Clone)]
pub struct Marker {
    id: String,
    pattern: Regex,
}

impl Marker {
    /// Generate a fresh random marker.
    pub fn generate() -> Result<Self, TtyError> {
        let id: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(MARKER_ID_LEN)
            .map(char::from)
            .collect();
        Self::from_id(id)
    }

    /// Build a marker from an explicit id (`[A-Za-z0-9]{8,}`).
    pub fn from_id(id: impl Into<String>) -> Result<Self, TtyError> {
        let id = id.into();
        if id.len() < MARKER_ID_MIN_LEN || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(TtyError::protocol(format!("invalid marker id '{id}'")));
        }
        let pattern = Regex::new(&format!(
            "{}{}:([0-9]+){}",
            regex::escape(END_MARKER_PREFIX),
            regex::escape(&id),
            regex::escape(END_MARKER_SUFFIX),
        ))
        .map_err(|e| TtyError::protocol(format!("marker pattern failed to compile: {e}")))?;
        Ok(Self { id, pattern })
    }

    /// The random id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `PREFIX + id`, the part present in both the echo and the result.
    #[must_use]
    pub fn needle(&self) -> String {
        format!("{END_MARKER_PREFIX}{}", self.id)
    }

    /// `PREFIX + id + ":$?"`, present only in the shell's echo of the typed line.
    #[must_use]
    pub fn echo_needle(&self) -> String {
        format!("{}:$?", self.needle())
    }

    /// The line to type: the command in a subshell, then the marker echo.
    #[must_use]
    pub fn wrap(&self, command: &str) -> String {
        format!(
            "({command}); echo \"{}:$?{END_MARKER_SUFFIX}\"\r",
            self.needle()
        )
    }

    /// Find the first expanded marker in `buffer`.
    #[must_use]
    pub fn find(&self, buffer: &[u8]) -> Option<MarkerMatch> {
        self.find_from(buffer, 0)
    }

    /// Find the first expanded marker starting at or after `start`.
    ///
    /// Offsets in the result are relative to the whole of `buffer`.
    #[must_use]
    pub fn find_from(&self, buffer: &[u8], start: usize) -> Option<MarkerMatch> {
        let captures = self.pattern.captures_at(buffer, start.min(buffer.len()))?;
        let whole = captures.get(0)?;
        let exit_code = captures
            .get(1)
            .and_then(|code| std::str::from_utf8(code.as_bytes()).ok())
            .and_then(|code| code.parse::<i32>().ok())
            .unwrap_or(UNKNOWN_EXIT_CODE);
        Some(MarkerMatch {
            start: whole.start(),
            end: whole.end(),
            exit_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker() -> Marker {
        Marker::from_id("abcDEF123456").unwrap()
    }

    #[test]
    fn test_generated_ids_are_alphanumeric_and_distinct() {
        let a = Marker::generate().unwrap();
        let b = Marker::generate().unwrap();
        assert_eq!(a.id().len(), MARKER_ID_LEN);
        assert!(a.id().bytes().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_from_id_rejects_short_or_symbolic_ids() {
        assert!(Marker::from_id("abc").is_err());
        assert!(Marker::from_id("abc-def-ghi").is_err());
        assert!(Marker::from_id("abcdefgh").is_ok());
    }

    #[test]
    fn test_wrap_uses_subshell_and_carriage_return() {
        assert_eq!(
            marker().wrap("cd /tmp"),
            "(cd /tmp); echo \"___TTYD_EXEC_END___abcDEF123456:$?___\"\r"
        );
    }

    #[test]
    fn test_find_parses_exit_code() {
        let buf = b"hello\r\n___TTYD_EXEC_END___abcDEF123456:7___\r\n$ ";
        let m = marker().find(buf).unwrap();
        assert_eq!(m.exit_code, 7);
        assert_eq!(&buf[..m.start], b"hello\r\n");
    }

    #[test]
    fn test_echoed_command_is_not_a_match() {
        let echo = b"$ (true); echo \"___TTYD_EXEC_END___abcDEF123456:$?___\"\r\n";
        assert!(marker().find(echo).is_none());
    }

    #[test]
    fn test_other_marker_ids_are_ignored() {
        let buf = b"___TTYD_EXEC_END___zzzzzzzzzzzz:0___\r\n";
        assert!(marker().find(buf).is_none());

        let prefixed = b"___TTYD_EXEC_END___abcDEF1234567:0___";
        assert!(marker().find(prefixed).is_none());
    }

    #[test]
    fn test_find_from_skips_earlier_markers() {
        let buf = b"___TTYD_EXEC_END___abcDEF123456:1___ ___TTYD_EXEC_END___abcDEF123456:2___";
        let second = marker().find_from(buf, 1).unwrap();
        assert_eq!(second.exit_code, 2);
        assert_eq!(second.end, buf.len());
        assert!(marker().find_from(buf, buf.len() + 10).is_none());
    }

    #[test]
    fn test_echo_needle_matches_wrapped_line() {
        let m = marker();
        assert!(m.wrap("true").contains(&m.echo_needle()));
        assert!(!"___TTYD_EXEC_END___abcDEF123456:0___".contains(&m.echo_needle()));
    }

    #[test]
    fn test_oversized_exit_code_is_unknown() {
        let buf = b"___TTYD_EXEC_END___abcDEF123456:99999999999___";
        assert_eq!(marker().find(buf).unwrap().exit_code, UNKNOWN_EXIT_CODE);
    }
}
