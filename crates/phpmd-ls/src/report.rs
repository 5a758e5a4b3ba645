//
// report.rs
//
// Incremental parsing of phpmd's text report
//

use std::sync::OnceLock;

use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range};

/// Prefix applied to every diagnostic message
pub const MESSAGE_PREFIX: &str = "PHPMD: ";

/// Value reported in `Diagnostic::source`
pub const DIAGNOSTIC_SOURCE: &str = "phpmd";

const READ_CHUNK_SIZE: usize = 4096;

fn violation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Groups: 1=file path, 2=1-based line, 3=message
    PATTERN.get_or_init(|| Regex::new(r"([a-zA-Z_/.]+):(\d+)\t(.*)").unwrap())
}

/// Parse one line of a phpmd text report.
///
/// Returns `None` for anything that is not a violation line (banners,
/// blank lines, deprecation notices). A line number of `0` or one that does
/// not fit in a `u32` is treated as non-matching.
pub fn parse_line(line: &str) -> Option<Diagnostic> {
    let caps = violation_pattern().captures(line)?;
    let line_no = caps.get(2)?.as_str().parse::<u32>().ok()?.checked_sub(1)?;
    let message = caps.get(3).map(|m| m.as_str()).unwrap_or_default();

    Some(Diagnostic {
        range: Range {
            start: Position {
                line: line_no,
                character: 0,
            },
            end: Position {
                line: line_no,
                character: u32::MAX,
            },
        },
        severity: Some(DiagnosticSeverity::ERROR),
        source: Some(DIAGNOSTIC_SOURCE.to_string()),
        message: format!("{MESSAGE_PREFIX}{message}"),
        ..Default::default()
    })
}

/// Reassembles arbitrarily sized output chunks into complete lines.
///
/// Bytes are buffered rather than text so that a UTF-8 sequence split across
/// two reads decodes correctly once its line is complete.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order.
    ///
    /// Empty lines are skipped and a trailing `\r` is stripped.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        complete
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .filter(|line| !line.is_empty())
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Bytes received after the last newline
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }
}

/// Ordered diagnostic accumulator with an upper bound on stored entries.
#[derive(Debug)]
pub struct DiagnosticCollector {
    diagnostics: Vec<Diagnostic>,
    max: usize,
    dropped: usize,
}

impl DiagnosticCollector {
    pub fn new(max: usize) -> Self {
        Self {
            diagnostics: Vec::new(),
            max,
            dropped: 0,
        }
    }

    /// Parse a line and store the resulting diagnostic if there is room.
    pub fn push_line(&mut self, line: &str) {
        match parse_line(line) {
            Some(diagnostic) => {
                if self.diagnostics.len() < self.max {
                    self.diagnostics.push(diagnostic);
                } else {
                    self.dropped += 1;
                }
            }
            None => log::trace!("Ignoring non-violation phpmd output: {:?}", line),
        }
    }

    /// Number of violations parsed past the cap
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// Read a phpmd text report to the end and collect its diagnostics.
///
/// The reader is always drained completely, even once `max_problems`
/// diagnostics are stored, so a child process never blocks on a full pipe.
pub async fn collect_report<R>(mut reader: R, max_problems: usize) -> std::io::Result<Vec<Diagnostic>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = LineBuffer::new();
    let mut collector = DiagnosticCollector::new(max_problems);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        for line in buffer.feed(&chunk[..n]) {
            collector.push_line(&line);
        }
    }

    if !buffer.remainder().is_empty() {
        log::trace!(
            "Discarding {} bytes of unterminated phpmd output",
            buffer.remainder().len()
        );
    }
    if collector.dropped() > 0 {
        log::debug!(
            "phpmd reported {} more violations than the limit of {}",
            collector.dropped(),
            max_problems
        );
    }

    Ok(collector.into_diagnostics())
}
