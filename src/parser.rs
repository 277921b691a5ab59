//! Event-stream record decoding.
//!
//! The assistant endpoint answers with newline-delimited `data: {...}` records
//! separated by a blank line. Transport frames carry no alignment guarantee, so
//! the parser keeps any trailing partial record (including half of a UTF-8
//! sequence) and prepends it to the next frame.

use std::collections::VecDeque;

use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::models::StreamPayload;

/// Typed event decoded from one stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Resets any text accumulated so far.
    Start,
    Delta(String),
    /// Fatal, server-declared failure. Nothing follows it.
    Error(String),
    /// Graceful completion. Nothing follows it.
    End,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error(_) | StreamEvent::End)
    }
}

#[derive(Debug, Default)]
pub struct ChunkParser {
    pending: Vec<u8>,
    finished: bool,
}

impl ChunkParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `End` or `Error` has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Consumes one raw frame and returns every record it completed.
    pub fn feed(&mut self, frame: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.pending.extend_from_slice(frame);

        let mut events = Vec::new();
        while let Some((end, delimiter_len)) = find_record_end(&self.pending) {
            let rest = self.pending.split_off(end + delimiter_len);
            let mut record = std::mem::replace(&mut self.pending, rest);
            record.truncate(end);

            if self.push_record(&record, &mut events) {
                break;
            }
        }
        events
    }

    /// Flushes a final record that the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.finished && !self.pending.is_empty() {
            let record = std::mem::take(&mut self.pending);
            self.push_record(&record, &mut events);
        }
        self.pending.clear();
        events
    }

    /// Returns true when the record ended the stream.
    fn push_record(&mut self, record: &[u8], events: &mut Vec<StreamEvent>) -> bool {
        let Some(event) = parse_record(record) else {
            return false;
        };
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            self.finished = true;
            self.pending.clear();
        }
        terminal
    }
}

/// Position of the first blank-line delimiter as `(record_len, delimiter_len)`.
fn find_record_end(buf: &[u8]) -> Option<(usize, usize)> {
    buf.iter().enumerate().find_map(|(i, b)| {
        if *b != b'\n' {
            return None;
        }
        match &buf[i + 1..] {
            [b'\n', ..] => Some((i, 2)),
            [b'\r', b'\n', ..] => Some((i, 3)),
            _ => None,
        }
    })
}

fn parse_record(record: &[u8]) -> Option<StreamEvent> {
    let text = String::from_utf8_lossy(record);

    let mut data: Option<String> = None;
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(rest);
                }
                None => data = Some(rest.to_string()),
            }
        }
    }

    let Some(data) = data else {
        if !text.trim().is_empty() {
            debug!("Ignoring stream record without data line: {text:?}");
        }
        return None;
    };

    let payload: StreamPayload = match serde_json::from_str(&data) {
        Ok(p) => p,
        Err(e) => {
            let anomaly = AppError::ParseAnomaly { record: data, reason: e.to_string() };
            warn!("Dropping stream record: {anomaly}");
            return None;
        }
    };

    match payload.kind.as_deref() {
        Some("start") => Some(StreamEvent::Start),
        Some("end") => Some(StreamEvent::End),
        Some("error") => Some(StreamEvent::Error(
            payload.error.unwrap_or_else(|| "unknown error".to_string()),
        )),
        _ => match payload.content {
            Some(content) => Some(StreamEvent::Delta(content)),
            None => {
                debug!("Ignoring stream payload of unknown shape: {data}");
                None
            }
        },
    }
}

struct EventState {
    frames: BoxStream<'static, Result<Vec<u8>, AppError>>,
    parser: ChunkParser,
    queue: VecDeque<StreamEvent>,
    done: bool,
}

/// Lazily turns raw transport frames into stream events.
///
/// Each call owns a fresh parser. The resulting stream ends after the first
/// terminal event, after a transport error item, or when the frames run out.
pub fn parse_events<S>(frames: S) -> BoxStream<'static, Result<StreamEvent, AppError>>
where
    S: Stream<Item = Result<Vec<u8>, AppError>> + Send + 'static,
{
    let state = EventState {
        frames: frames.boxed(),
        parser: ChunkParser::new(),
        queue: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.queue.pop_front() {
                return Some((Ok(event), st));
            }
            if st.done {
                return None;
            }
            match st.frames.next().await {
                Some(Ok(frame)) => {
                    let events = st.parser.feed(&frame);
                    st.queue.extend(events);
                    st.done = st.parser.is_finished();
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    let events = st.parser.finish();
                    st.queue.extend(events);
                }
            }
        }
    })
    .boxed()
}
