//! Server-sent-event frame decoding.
//!
//! Streamed completions arrive as `data: <json>\n\n` frames whose JSON
//! payload is one of `{"text": ...}`, `{"done": true, "message": ...}`, or
//! `{"error": ...}`. Network chunks split frames at arbitrary byte
//! boundaries, so decoding is incremental: feed each chunk in, collect
//! whatever frames completed.

use serde::Deserialize;

/// One decoded SSE frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A text fragment.
    Text(String),
    /// Terminal marker; the stream ends after this.
    Done { message: Option<String> },
    /// In-band provider error.
    Error(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    done: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl RawFrame {
    fn into_frame(self) -> SseFrame {
        if let Some(error) = self.error {
            SseFrame::Error(error)
        } else if self.done.unwrap_or(false) {
            SseFrame::Done {
                message: self.message,
            }
        } else {
            SseFrame::Text(self.text.unwrap_or_default())
        }
    }
}

/// Incremental decoder over a stream of text chunks.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    buffer: String,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one network chunk and returns the frames it completed.
    ///
    /// Blank separator lines and non-`data:` lines are skipped. A frame
    /// whose JSON payload fails to parse is a transport-level defect and
    /// aborts decoding with the parse error.
    pub fn push(&mut self, chunk: &str) -> Result<Vec<SseFrame>, serde_json::Error> {
        self.buffer.push_str(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim().to_string();
            self.buffer.drain(..=pos);

            if line.is_empty() {
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let raw: RawFrame = serde_json::from_str(data.trim_start())?;
            frames.push(raw.into_frame());
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_complete_stream() {
        let mut decoder = SseFrameDecoder::new();
        let frames = decoder
            .push(
                "data: {\"text\":\"Hi\"}\n\ndata: {\"text\":\" there\"}\n\n\
                 data: {\"done\":true,\"message\":\"Stream complete\"}\n\n",
            )
            .unwrap();
        assert_eq!(
            frames,
            vec![
                SseFrame::Text("Hi".to_string()),
                SseFrame::Text(" there".to_string()),
                SseFrame::Done {
                    message: Some("Stream complete".to_string())
                },
            ]
        );
    }

    #[test]
    fn reassembles_frames_split_across_chunks() {
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push("data: {\"te").unwrap().is_empty());
        assert!(decoder.push("xt\":\"Hel").unwrap().is_empty());
        let frames = decoder.push("lo\"}\n\n").unwrap();
        assert_eq!(frames, vec![SseFrame::Text("Hello".to_string())]);
    }

    #[test]
    fn error_frame_is_surfaced_in_band() {
        let mut decoder = SseFrameDecoder::new();
        let frames = decoder
            .push("data: {\"error\":\"rate limited\"}\n\n")
            .unwrap();
        assert_eq!(frames, vec![SseFrame::Error("rate limited".to_string())]);
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let mut decoder = SseFrameDecoder::new();
        let frames = decoder
            .push(": keep-alive\n\ndata: {\"text\":\"x\"}\n\n")
            .unwrap();
        assert_eq!(frames, vec![SseFrame::Text("x".to_string())]);
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let mut decoder = SseFrameDecoder::new();
        assert!(decoder.push("data: {not json}\n\n").is_err());
    }
}
