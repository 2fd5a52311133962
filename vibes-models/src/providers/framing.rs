//! Byte stream framing shared by the HTTP and CLI adapters.
//!
//! Bytes arrive in arbitrary chunks. [`FrameDecoder`] buffers them into
//! complete lines (never splitting a multi-byte character) and groups lines
//! into frames: server-sent events (`event:`/`data:` fields dispatched on a
//! blank line) or one JSON document per line. An [`EventTranslator`] turns
//! frames into [`ProviderEvent`]s.

use std::collections::VecDeque;
use std::pin::Pin;

use futures_util::{Stream, StreamExt, stream};
use tokio_util::sync::CancellationToken;

use super::{ProviderEvent, ProviderStream};
use crate::{Error, Result};

/// Raw bytes from a response body or child process.
pub(crate) type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// How lines are grouped into frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    Sse,
    JsonLines,
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub event: Option<String>,
    pub data: String,
}

#[derive(Debug)]
pub(crate) struct FrameDecoder {
    framing: Framing,
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
        }
    }

    /// Feed a chunk, returning every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            self.accept_line(line.trim_end_matches('\r'), &mut frames);
            start = end + 1;
        }
        self.buffer.drain(..start);
        frames
    }

    /// Flush whatever is left at end of input.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned();
            self.accept_line(rest.trim_end_matches('\r'), &mut frames);
        }
        if self.framing == Framing::Sse {
            self.dispatch(&mut frames);
        }
        frames
    }

    fn accept_line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        match self.framing {
            Framing::JsonLines => {
                let line = line.trim();
                if !line.is_empty() {
                    frames.push(Frame {
                        event: None,
                        data: line.to_string(),
                    });
                }
            }
            Framing::Sse => {
                if line.is_empty() {
                    self.dispatch(frames);
                    return;
                }
                if line.starts_with(':') {
                    return;
                }
                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                    None => (line, ""),
                };
                match field {
                    "event" => self.event = Some(value.to_string()),
                    "data" => self.data.push(value.to_string()),
                    _ => {}
                }
            }
        }
    }

    fn dispatch(&mut self, frames: &mut Vec<Frame>) {
        let event = self.event.take();
        if self.data.is_empty() {
            return;
        }
        frames.push(Frame {
            event,
            data: self.data.join("\n"),
        });
        self.data.clear();
    }
}

/// Stateful translation from one backend's frames to normalized events.
pub(crate) trait EventTranslator: Send + 'static {
    fn translate(&mut self, frame: Frame) -> Result<Vec<ProviderEvent>>;

    /// Called once at end of input.
    fn finish(&mut self) -> Result<Vec<ProviderEvent>> {
        Ok(Vec::new())
    }
}

struct StreamState<T> {
    bytes: ByteStream,
    decoder: FrameDecoder,
    translator: T,
    pending: VecDeque<Result<ProviderEvent>>,
    cancel: CancellationToken,
    done: bool,
}

impl<T: EventTranslator> StreamState<T> {
    fn translate(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            if self.done {
                return;
            }
            match self.translator.translate(frame) {
                Ok(events) => self.pending.extend(events.into_iter().map(Ok)),
                Err(e) => self.fail(e),
            }
        }
    }

    fn fail(&mut self, error: Error) {
        self.pending.push_back(Err(error));
        self.done = true;
    }
}

enum Step {
    Cancelled,
    Chunk(Option<Result<Vec<u8>>>),
}

/// Turn a byte stream into a [`ProviderStream`].
///
/// The stream ends after the first error, and yields `Error::Cancelled` if
/// `cancel` fires before the input is exhausted.
pub(crate) fn event_stream<T: EventTranslator>(
    bytes: ByteStream,
    framing: Framing,
    translator: T,
    cancel: CancellationToken,
) -> ProviderStream {
    let state = StreamState {
        bytes,
        decoder: FrameDecoder::new(framing),
        translator,
        pending: VecDeque::new(),
        cancel,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            let step = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => Step::Cancelled,
                next = state.bytes.next() => Step::Chunk(next),
            };

            match step {
                Step::Cancelled => state.fail(Error::Cancelled),
                Step::Chunk(Some(Ok(chunk))) => {
                    let frames = state.decoder.push(&chunk);
                    state.translate(frames);
                }
                Step::Chunk(Some(Err(e))) => state.fail(e),
                Step::Chunk(None) => {
                    let frames = state.decoder.finish();
                    state.translate(frames);
                    if !state.done {
                        match state.translator.finish() {
                            Ok(events) => state.pending.extend(events.into_iter().map(Ok)),
                            Err(e) => state.pending.push_back(Err(e)),
                        }
                    }
                    state.done = true;
                }
            }
        }
    }))
}

/// Body of an HTTP response as a [`ByteStream`].
pub(crate) fn response_bytes(response: reqwest::Response) -> ByteStream {
    Box::pin(
        response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(Error::from_reqwest)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&[u8]]) -> ByteStream {
        let items: Vec<Result<Vec<u8>>> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        Box::pin(stream::iter(items))
    }

    struct Echo;

    impl EventTranslator for Echo {
        fn translate(&mut self, frame: Frame) -> Result<Vec<ProviderEvent>> {
            if frame.data == "boom" {
                return Err(Error::Stream("boom".into()));
            }
            Ok(vec![ProviderEvent::content(frame.data)])
        }

        fn finish(&mut self) -> Result<Vec<ProviderEvent>> {
            Ok(vec![ProviderEvent::content("<eof>")])
        }
    }

    #[test]
    fn sse_frames_dispatch_on_blank_line() {
        let mut decoder = FrameDecoder::new(Framing::Sse);
        let frames = decoder.push(b"event: ping\ndata: {\"a\":1}\n\n: comment\ndata: x\n");
        assert_eq!(
            frames,
            vec![Frame {
                event: Some("ping".into()),
                data: "{\"a\":1}".into()
            }]
        );
        let frames = decoder.push(b"data: y\r\n\r\n");
        assert_eq!(frames[0].data, "x\ny");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn sse_flushes_pending_frame_at_finish() {
        let mut decoder = FrameDecoder::new(Framing::Sse);
        assert!(decoder.push(b"data: [DONE]").is_empty());
        assert_eq!(decoder.finish()[0].data, "[DONE]");
    }

    #[test]
    fn lines_split_across_chunks_and_utf8() {
        let mut decoder = FrameDecoder::new(Framing::JsonLines);
        let snowman = "☃".as_bytes();
        assert!(decoder.push(b"{\"t\":\"").is_empty());
        assert!(decoder.push(&snowman[..1]).is_empty());
        let frames = decoder.push(&[&snowman[1..], b"\"}\n\n{\"t\":2}\n"].concat());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"t\":\"☃\"}");
        assert_eq!(frames[1].data, "{\"t\":2}");
    }

    #[tokio::test]
    async fn event_stream_translates_and_finishes() {
        let bytes = chunks(&[b"a\nb", b"\n"]);
        let events: Vec<_> = event_stream(bytes, Framing::JsonLines, Echo, CancellationToken::new())
            .collect()
            .await;
        let texts: Vec<_> = events
            .into_iter()
            .map(|e| match e.unwrap() {
                ProviderEvent::ContentDelta { text } => text,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["a", "b", "<eof>"]);
    }

    #[tokio::test]
    async fn event_stream_stops_after_error() {
        let bytes = chunks(&[b"a\nboom\nc\n"]);
        let events: Vec<_> = event_stream(bytes, Framing::JsonLines, Echo, CancellationToken::new())
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(Error::Stream(_))));
    }

    #[tokio::test]
    async fn event_stream_honors_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let bytes: ByteStream = Box::pin(stream::pending());
        let events: Vec<_> = event_stream(bytes, Framing::Sse, Echo, cancel).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(Error::Cancelled)));
    }
}
