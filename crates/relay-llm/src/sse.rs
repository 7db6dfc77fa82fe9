//! Event-stream framing: bytes in, mapped events out

use futures_util::{Stream, StreamExt};

/// Payload that closes an event stream
pub const DONE: &str = "[DONE]";

/// Turns one event payload into zero or more output items
///
/// Mappers may keep state between events; the converter calls them in
/// stream order.
pub trait EventMapper {
    type Output;
    type Error: std::fmt::Display;

    fn map(&mut self, data: &str) -> Result<Vec<Self::Output>, Self::Error>;
}

/// One decoded unit of an event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame<T> {
    Event(T),
    /// The upstream sent the terminal sentinel
    Done,
}

/// Incremental event-stream parser
///
/// Bytes are buffered until a full line is available, `data` lines are
/// collected until a blank line ends the event. Lines end with `\n`, `\r\n`
/// or a bare `\r`. Output depends only on the byte sequence, never on how it
/// was split into chunks. A payload the mapper rejects is logged and skipped.
pub struct SseConverter<M> {
    mapper: M,
    buffer: Vec<u8>,
    data: Vec<String>,
    /// The last line ended with `\r`; a leading `\n` belongs to it
    skip_lf: bool,
    finished: bool,
}

impl<M: EventMapper> SseConverter<M> {
    pub const fn new(mapper: M) -> Self {
        Self {
            mapper,
            buffer: Vec::new(),
            data: Vec::new(),
            skip_lf: false,
            finished: false,
        }
    }

    /// Feed a chunk and collect every event it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame<M::Output>> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }

        self.buffer.extend_from_slice(chunk);

        loop {
            if self.skip_lf
                && let Some(&first) = self.buffer.first()
            {
                if first == b'\n' {
                    self.buffer.drain(..1);
                }
                self.skip_lf = false;
            }

            let Some(end) = self.buffer.iter().position(|&b| b == b'\n' || b == b'\r') else {
                break;
            };

            self.skip_lf = self.buffer[end] == b'\r';
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line[..end]);
            self.line(&line, &mut frames);
        }

        frames
    }

    /// Flush a trailing unterminated event, once
    pub fn finish(&mut self) -> Vec<SseFrame<M::Output>> {
        let mut frames = Vec::new();
        if std::mem::replace(&mut self.finished, true) {
            return frames;
        }

        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            self.line(&line, &mut frames);
        }
        self.dispatch(&mut frames);

        frames
    }

    fn line(&mut self, line: &str, frames: &mut Vec<SseFrame<M::Output>>) {
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

        if field == "data" {
            self.data.push(value.to_owned());
        }
    }

    fn dispatch(&mut self, frames: &mut Vec<SseFrame<M::Output>>) {
        if self.data.is_empty() {
            return;
        }

        let payload = self.data.join("\n");
        self.data.clear();

        let payload = payload.trim();
        if payload.is_empty() {
            return;
        }

        if payload == DONE {
            frames.push(SseFrame::Done);
            return;
        }

        match self.mapper.map(payload) {
            Ok(items) => frames.extend(items.into_iter().map(SseFrame::Event)),
            Err(e) => tracing::debug!(error = %e, "skipping malformed stream event"),
        }
    }
}

/// Convert a byte stream into mapped frames
///
/// A transport error is yielded once and ends the stream.
pub fn convert<S, B, E, M>(bytes: S, mapper: M) -> impl Stream<Item = Result<SseFrame<M::Output>, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    M: EventMapper,
{
    async_stream::stream! {
        let mut converter = SseConverter::new(mapper);
        let mut bytes = std::pin::pin!(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for frame in converter.push(chunk.as_ref()) {
                        yield Ok(frame);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        for frame in converter.finish() {
            yield Ok(frame);
        }
    }
}
