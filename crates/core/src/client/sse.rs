/// Incremental decoder for a `text/event-stream` body.
///
/// Lines may end in LF, CR or CRLF. Only `data:` fields are kept; comments
/// (keep-alives) and other fields are skipped. Multi-line data is joined
/// with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: Vec<String>,
    after_cr: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the data payload of every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut payloads = Vec::new();
        for &byte in chunk {
            match byte {
                // Second half of a CRLF, possibly split across chunks.
                b'\n' if self.after_cr => self.after_cr = false,
                b'\r' | b'\n' => {
                    self.after_cr = byte == b'\r';
                    if let Some(data) = self.end_line() {
                        payloads.push(data);
                    }
                }
                _ => {
                    self.after_cr = false;
                    self.line.push(byte);
                }
            }
        }
        payloads
    }

    /// Consumes the buffered line. A blank line dispatches the pending event.
    fn end_line(&mut self) -> Option<String> {
        if self.line.is_empty() {
            let data = std::mem::take(&mut self.data).join("\n");
            return (!data.is_empty()).then_some(data);
        }
        let line = String::from_utf8_lossy(&self.line).into_owned();
        self.line.clear();
        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }
}
