//! Explicit output capture around a handler invocation.

use std::io;

use serde_json::Value as JsonValue;

/// In-memory sink for a handler's incidental output.
#[derive(Debug, Default, Clone)]
pub struct OutputSink {
    buf: Vec<u8>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Captured bytes as text (lossy), `None` when nothing was written.
    pub fn into_string(self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.buf).into_owned())
        }
    }
}

impl io::Write for OutputSink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Combine handler data with captured output.
///
/// No data: the captured output. Both present: `data + sep + captured`,
/// where `sep` is empty if `captured` already starts with a newline.
/// Non-text data is rendered as JSON first.
pub fn merge_output(data: Option<JsonValue>, captured: Option<String>) -> Option<String> {
    let data = match data {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    };

    match (data, captured) {
        (None, captured) => captured,
        (Some(data), None) => Some(data),
        (Some(data), Some(captured)) => {
            let sep = if captured.starts_with('\n') { "" } else { "\n" };
            Some(format!("{data}{sep}{captured}"))
        }
    }
}
