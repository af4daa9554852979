//! One command execution: buffer, marker scan and output extraction.

use std::time::Duration;

use tokio::time::Instant;

use super::marker::Marker;
use super::sanitize::{normalize_newlines, strip_ansi};
use crate::constants::UNKNOWN_EXIT_CODE;

/// Room for the `:<code>___` tail of a marker that began in an earlier frame.
const MARKER_TAIL_SLACK: usize = 16;

/// Result of one command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Captured stdout/stderr, echo and marker removed, trimmed.
    pub output: String,
    /// Remote exit code, `-1` when unknown (timed out).
    pub exit_code: i32,
    /// True when the time limit elapsed before the marker arrived.
    pub timed_out: bool,
    /// Wall time from call start to resolution.
    pub duration: Duration,
}

impl ExecOutput {
    /// Completed with exit code zero.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Ephemeral per-call state. Never reused.
#[derive(Debug)]
pub(crate) struct ExecJob {
    marker: Marker,
    buffer: Vec<u8>,
    /// Bytes of already-scanned buffer to rescan so a split marker is found.
    overlap: usize,
    strip_ansi: bool,
    started_at: Instant,
}

impl ExecJob {
    pub(crate) fn new(marker: Marker, strip_ansi: bool) -> Self {
        let overlap = marker.needle().len() + MARKER_TAIL_SLACK;
        Self {
            marker,
            buffer: Vec::new(),
            overlap,
            strip_ansi,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn marker(&self) -> &Marker {
        &self.marker
    }

    /// Append output and check for the marker.
    ///
    /// Only the new bytes and a short overlap before them are scanned.
    pub(crate) fn push(&mut self, data: &[u8]) -> Option<ExecOutput> {
        let scan_from = self.buffer.len().saturating_sub(self.overlap);
        self.buffer.extend_from_slice(data);
        let found = self.marker.find_from(&self.buffer, scan_from)?;
        let output = self.extract(&self.buffer[..found.start]);
        Some(ExecOutput {
            output,
            exit_code: found.exit_code,
            timed_out: false,
            duration: self.started_at.elapsed(),
        })
    }

    /// Resolve with whatever arrived so far.
    pub(crate) fn timed_out(&self) -> ExecOutput {
        ExecOutput {
            output: self.extract(&self.buffer),
            exit_code: UNKNOWN_EXIT_CODE,
            timed_out: true,
            duration: self.started_at.elapsed(),
        }
    }

    /// Everything after the last line that echoed the marker, cleaned up.
    fn extract(&self, captured: &[u8]) -> String {
        let body = after_echo_line(captured, self.marker.echo_needle().as_bytes());
        let text = String::from_utf8_lossy(body);
        let text = normalize_newlines(&text);
        let text = if self.strip_ansi {
            strip_ansi(&text).into_owned()
        } else {
            text
        };
        text.trim().to_string()
    }
}

/// Slice after the line containing the last occurrence of `needle`.
///
/// Line-editor wrap artifacts are skipped while searching, so an echo that
/// spans several screen rows is still found. Returns all of `captured` when
/// the needle never appears (shell echo off), and nothing when the echoed
/// line has not been terminated yet.
fn after_echo_line<'a>(captured: &'a [u8], needle: &[u8]) -> &'a [u8] {
    let (visible, origin) = without_wrap_artifacts(captured);
    let Some(pos) = rfind(&visible, needle) else {
        return captured;
    };
    let needle_end = origin[pos + needle.len() - 1] + 1;
    match captured[needle_end..].iter().position(|&b| b == b'\n') {
        Some(newline) => &captured[needle_end + newline + 1..],
        None => &[],
    }
}

/// Drop every `\r` that does not end a line, and the padding space readline
/// writes right before one when the typed line reaches the last column.
///
/// Returns the kept bytes and, for each, its offset in `bytes`.
fn without_wrap_artifacts(bytes: &[u8]) -> (Vec<u8>, Vec<usize>) {
    let wrap_cr = |i: usize| bytes.get(i) == Some(&b'\r') && bytes.get(i + 1) != Some(&b'\n');
    let mut visible = Vec::with_capacity(bytes.len());
    let mut origin = Vec::with_capacity(bytes.len());
    for (i, &b) in bytes.iter().enumerate() {
        if wrap_cr(i) || (b == b' ' && wrap_cr(i + 1)) {
            continue;
        }
        visible.push(b);
        origin.push(i);
    }
    (visible, origin)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|window| window == needle)
}
