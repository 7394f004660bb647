//! Best-effort recovery of truncated JSON frames.
//!
//! Only trailing-truncation shaped failures are repaired: an unexpected end of input,
//! or a syntax error after which the rest of the payload is discarded. The repair
//! closes an open string, drops a dangling separator and closes every open bracket
//! in reverse nesting order. Anything that still fails to parse is reported as
//! [`FeedError::MalformedFrame`].

use crate::core::errors::FeedError;
use serde_json::error::Category;
use serde_json::Value;

/// Parse a text frame, attempting one repair on failure.
///
/// Returns the value and whether it was repaired.
pub fn parse_frame(text: &str) -> Result<(Value, bool), FeedError> {
    let err = match serde_json::from_str::<Value>(text) {
        Ok(value) => return Ok((value, false)),
        Err(err) => err,
    };

    let offset = byte_offset(text, err.line(), err.column());
    let Some(candidate) = repair_truncated(text, &err) else {
        return Err(FeedError::MalformedFrame {
            reason: err.to_string(),
            offset: Some(offset),
        });
    };

    serde_json::from_str::<Value>(&candidate)
        .map(|value| (value, true))
        .map_err(|retry_err| FeedError::MalformedFrame {
            reason: format!("{} (repair failed: {})", err, retry_err),
            offset: Some(offset),
        })
}

/// Produce a candidate document for a truncated payload, or `None` when the
/// error is not truncation shaped.
pub fn repair_truncated(text: &str, err: &serde_json::Error) -> Option<String> {
    let kept = match err.classify() {
        Category::Eof => text,
        Category::Syntax => {
            let mut cut = byte_offset(text, err.line(), err.column().saturating_sub(1));
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            &text[..cut]
        }
        Category::Data | Category::Io => return None,
    };

    if kept.trim().is_empty() {
        return None;
    }
    Some(close_open_structures(kept))
}

fn close_open_structures(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut out = text.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    } else if out.ends_with(':') {
        out.push_str("null");
    }

    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

/// Byte offset of a 1-based line and column as reported by serde_json
fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    let line_start: usize = text
        .split('\n')
        .take(line.saturating_sub(1))
        .map(|l| l.len() + 1)
        .sum();
    (line_start + column).min(text.len())
}
