// sse.rs — Server-sent-event plumbing shared by the streaming backends.
//
// The body arrives in arbitrary chunks; `SseBuffer` reassembles lines and
// hands out `data:` payloads, `spawn_stream` turns them into `AgentEvent`s.

use tokio::sync::mpsc;

use super::{AgentEvent, AgentStream, ProviderError};

/// What one `data:` payload means to a backend.
#[derive(Debug)]
pub enum SseDelta {
    /// A text chunk to append to the report.
    Text(String),
    /// The backend signalled the end of the response.
    Done,
    /// Metadata or an event type we do not care about.
    Skip,
    Error(ProviderError),
}

/// Line reassembly for an SSE body. Bytes are kept raw until a line is
/// complete, so a UTF-8 sequence split across chunks decodes intact.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: Vec<u8>,
}

impl SseBuffer {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete `data:` payload, skipping comments, `event:`, `id:` and
    /// blank lines. `None` means more input is needed.
    pub fn next_data(&mut self) -> Option<String> {
        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
            let line = String::from_utf8_lossy(&raw[..newline_pos]);
            if let Some(data) = strip_data_prefix(line.trim_end_matches('\r')) {
                return Some(data.to_string());
            }
        }
        None
    }

    /// Flush a trailing payload that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let remaining = std::mem::take(&mut self.buffer);
        strip_data_prefix(String::from_utf8_lossy(&remaining).trim()).map(str::to_string)
    }
}

fn strip_data_prefix(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|d| d.trim_start())
}

/// Reads a streaming HTTP body and yields `data:` payloads.
pub struct SseReader {
    response: reqwest::Response,
    buffer: SseBuffer,
    done: bool,
}

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: SseBuffer::default(),
            done: false,
        }
    }

    pub async fn next_data(&mut self) -> Option<Result<String, ProviderError>> {
        loop {
            if let Some(data) = self.buffer.next_data() {
                return Some(Ok(data));
            }
            if self.done {
                return None;
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.push(&bytes),
                Ok(None) => {
                    self.done = true;
                    return self.buffer.finish().map(Ok);
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(ProviderError::Connection(format!(
                        "Stream read error: {e}"
                    ))));
                }
            }
        }
    }
}

/// Spawn a reader task that classifies each payload with `parse`.
///
/// Every text delta becomes a `Progress` event; the accumulated text is sent
/// once as `Final` when the body ends. A body that never carried text ends
/// the stream without a `Final`.
pub fn spawn_stream(
    response: reqwest::Response,
    parse: fn(&str) -> SseDelta,
    label: &'static str,
) -> AgentStream {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut reader = SseReader::new(response);
        let mut text = String::new();

        while let Some(data) = reader.next_data().await {
            match data.map(|d| parse(&d)) {
                Ok(SseDelta::Text(delta)) => {
                    text.push_str(&delta);
                    let status = format!("{label}: received {} characters", text.len());
                    if tx.send(AgentEvent::Progress(status)).await.is_err() {
                        log::debug!("{label}: stream consumer went away");
                        return;
                    }
                }
                Ok(SseDelta::Done) => break,
                Ok(SseDelta::Skip) => continue,
                Ok(SseDelta::Error(e)) | Err(e) => {
                    log::error!("{label}: stream error: {e}");
                    let _ = tx.send(AgentEvent::Error(e)).await;
                    return;
                }
            }
        }

        if text.trim().is_empty() {
            log::warn!("{label}: stream ended without any text");
        } else {
            let _ = tx.send(AgentEvent::Final(text)).await;
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_split_across_chunks_are_reassembled() {
        let mut buf = SseBuffer::default();
        buf.push(b"data: {\"a\":");
        assert!(buf.next_data().is_none());
        buf.push(b"1}\r\n\ndata: [DONE]\n");
        assert_eq!(buf.next_data().as_deref(), Some("{\"a\":1}"));
        assert_eq!(buf.next_data().as_deref(), Some("[DONE]"));
        assert!(buf.next_data().is_none());
    }

    #[test]
    fn non_data_lines_are_skipped() {
        let mut buf = SseBuffer::default();
        buf.push(b": keep-alive\nevent: message\nid: 7\n\ndata:{\"b\":2}\n");
        assert_eq!(buf.next_data().as_deref(), Some("{\"b\":2}"));
    }

    #[test]
    fn unterminated_tail_is_flushed() {
        let mut buf = SseBuffer::default();
        buf.push(b"data: tail");
        assert!(buf.next_data().is_none());
        assert_eq!(buf.finish().as_deref(), Some("tail"));
        assert!(buf.finish().is_none());
    }

    #[test]
    fn multibyte_char_split_across_chunks_survives() {
        let line = "data: Prüfung ü\n\n".as_bytes();
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut buf = SseBuffer::default();
        buf.push(&line[..split]);
        assert!(buf.next_data().is_none());
        buf.push(&line[split..]);
        assert_eq!(buf.next_data().as_deref(), Some("Prüfung ü"));
    }
}
