//! Component F: the async streaming runtime.
//!
//! Grounded on the chunked-reassembly / `csv_async` style used in the
//! buffered CSV reader example (carry buffer across chunks, `futures::Stream`
//! consumption) — reworked here over the crate's own compiled parsers
//! instead of delegating to an external async CSV crate, per the design
//! note that sync and async share one state machine.

use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_stream::stream;
use futures::stream::{Stream, StreamExt};

use crate::codec;
use crate::error::{Error, Result};
use crate::fast_path::FastPathEngine;
use crate::options::ConversionOptions;
use crate::value::Record;

/// Recommended chunk size; the runtime's preferred I/O granularity (§4.F:
/// "64 KB class").
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running = 0,
    Paused = 1,
    Cancelled = 2,
}

/// Shared pause/resume/cancel control surface for a stream. Checked before
/// every row emission and at every chunk boundary, per §5's suspension
/// points.
#[derive(Clone)]
pub struct StreamControl {
    state: Arc<AtomicU8>,
}

impl StreamControl {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RunState::Running as u8)),
        }
    }

    pub fn pause(&self) {
        self.state.store(RunState::Paused as u8, Ordering::SeqCst);
    }

    /// Fails silently if the stream has already been cancelled — resuming a
    /// cancelled stream is a no-op from the caller's perspective; the
    /// stream itself reports `Cancelled` on the next poll.
    pub fn resume(&self) {
        let _ = self.state.compare_exchange(
            RunState::Paused as u8,
            RunState::Running as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Final and idempotent; releases the stream at the next suspension
    /// point. Subsequent `resume()` calls are no-ops.
    pub fn cancel(&self) {
        self.state.store(RunState::Cancelled as u8, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == RunState::Cancelled as u8
    }

    async fn wait_while_paused(&self) {
        while self.state.load(Ordering::SeqCst) == RunState::Paused as u8 {
            tokio::task::yield_now().await;
        }
    }
}

impl Default for StreamControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress snapshot reported at configurable intervals during CSV→JSON
/// streaming.
#[derive(Debug, Clone, Copy, Default)]
pub struct Progress {
    pub rows_emitted: u64,
    pub bytes_consumed: u64,
}

/// Finds the last row terminator in `buffer` that occurs outside a quoted
/// field, splitting it into a complete-lines prefix and a carried
/// remainder. Quote state is tracked by a running parity count of `"`
/// characters from the start of `buffer`, which is valid because fields
/// are RFC 4180 double-quoted and quotes only ever appear in matched pairs
/// outside an open field.
fn split_complete_lines(buffer: &str) -> (&str, &str) {
    let mut quote_parity = 0u32;
    let mut last_boundary = None;
    for (idx, ch) in buffer.char_indices() {
        match ch {
            '"' => quote_parity += 1,
            '\n' if quote_parity % 2 == 0 => last_boundary = Some(idx + 1),
            _ => {}
        }
    }
    match last_boundary {
        Some(idx) => (&buffer[..idx], &buffer[idx..]),
        None => ("", buffer),
    }
}

/// Converts a stream of CSV text chunks into a stream of materialized
/// records. The header row is parsed once, from the first complete chunk,
/// and reused for every subsequent chunk so row numbering and the header
/// set stay stable across chunk boundaries.
pub fn csv_to_json_stream<S>(
    source: S,
    options: ConversionOptions,
    control: StreamControl,
    mut on_error: Option<Box<dyn FnMut(&Error, u64) -> Option<Record> + Send>>,
) -> Pin<Box<dyn Stream<Item = Result<Record>> + Send>>
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    Box::pin(stream! {
        let mut engine = FastPathEngine::default();
        let mut carry = String::new();
        let mut headers: Option<Vec<String>> = None;
        let mut row_number: u64 = 0;
        let mut skipped_rows: u64 = 0;
        tokio::pin!(source);

        while let Some(chunk) = source.next().await {
            if control.is_cancelled() {
                return;
            }
            control.wait_while_paused().await;
            if control.is_cancelled() {
                return;
            }

            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    yield Err(error);
                    return;
                }
            };
            carry.push_str(&chunk);

            let (complete, remainder) = split_complete_lines(&carry);
            let complete = complete.to_string();
            carry = remainder.to_string();
            if complete.is_empty() {
                continue;
            }

            let rows = match engine.parse(&complete, &options) {
                Ok(rows) => rows,
                Err(error) => {
                    row_number += 1;
                    match on_error.as_mut() {
                        Some(handler) => match handler(&error, row_number) {
                            Some(replacement) => {
                                yield Ok(replacement);
                                continue;
                            }
                            None => {
                                skipped_rows += 1;
                                continue;
                            }
                        },
                        None => {
                            yield Err(error);
                            return;
                        }
                    }
                }
            };

            let mut rows = rows.into_iter();
            if headers.is_none() {
                if options.has_headers {
                    if let Some(header_row) = rows.next() {
                        headers = Some(header_row);
                    }
                } else {
                    headers = Some(Vec::new());
                }
            }
            let Some(current_headers) = headers.clone() else {
                continue;
            };

            for row in rows {
                if control.is_cancelled() {
                    return;
                }
                row_number += 1;
                let header_set = if current_headers.is_empty() {
                    (1..=row.len()).map(|n| format!("column_{n}")).collect()
                } else {
                    current_headers.clone()
                };
                let mut record = Record::new();
                for (idx, header) in header_set.iter().enumerate() {
                    let raw = row.get(idx).map(String::as_str).unwrap_or("");
                    let trimmed = if options.trim { raw.trim() } else { raw };
                    record.insert(options.rename(header), codec::coerce(trimmed, &options).into());
                }
                yield Ok(record);
            }
        }

        if !carry.trim().is_empty() {
            match engine.parse(&carry, &options) {
                Ok(rows) => {
                    let current_headers = headers.unwrap_or_default();
                    for row in rows {
                        let mut record = Record::new();
                        for (idx, header) in current_headers.iter().enumerate() {
                            let raw = row.get(idx).map(String::as_str).unwrap_or("");
                            let trimmed = if options.trim { raw.trim() } else { raw };
                            record.insert(options.rename(header), codec::coerce(trimmed, &options).into());
                        }
                        yield Ok(record);
                    }
                }
                Err(error) => yield Err(error),
            }
        }

        if skipped_rows > 0 {
            log::debug!("csv_to_json_stream skipped {skipped_rows} row(s) via onError");
        }
    })
}

/// How a JSON→CSV streaming source is framed, per §4.F.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// A single root-level JSON array.
    Array,
    /// One JSON value per line.
    Ndjson,
}

/// Converts a stream of JSON records into a stream of CSV text chunks (one
/// chunk per row, headers emitted once up front). `input_format` only
/// affects how callers are expected to have decoded `source` into records
/// before calling this function — both framings reduce to the same
/// per-record codec call.
pub fn json_to_csv_stream<S>(
    source: S,
    options: ConversionOptions,
    control: StreamControl,
) -> Pin<Box<dyn Stream<Item = Result<String>> + Send>>
where
    S: Stream<Item = Record> + Send + 'static,
{
    Box::pin(stream! {
        let mut headers: Option<Vec<String>> = None;
        tokio::pin!(source);
        let mut first = true;

        while let Some(record) = source.next().await {
            if control.is_cancelled() {
                return;
            }
            control.wait_while_paused().await;
            if control.is_cancelled() {
                return;
            }
            if headers.is_none() {
                headers = Some(codec::derive_headers(Some(&record), &options));
            }
            let header_set = headers.clone().unwrap_or_default();
            if first && options.include_headers {
                let delimiter = options.delimiter.unwrap_or(crate::options::DEFAULT_DELIMITER);
                let header_line = header_set
                    .iter()
                    .map(|h| options.rename(h))
                    .collect::<Vec<_>>()
                    .join(&delimiter.to_string());
                yield Ok(header_line);
            }
            first = false;
            match codec::json_to_csv(std::slice::from_ref(&record), &options_without_headers(&options)) {
                Ok(line) => yield Ok(line),
                Err(error) => {
                    yield Err(error);
                    return;
                }
            }
        }
    })
}

fn options_without_headers(options: &ConversionOptions) -> ConversionOptions {
    let mut clone = options.clone();
    clone.include_headers = false;
    clone
}

/// Duplicates a stream into two independent consumers, used by UIs for
/// preview + download per §4.F's `tee`. Implemented generically (not
/// CSV-specific) since the fan-out itself has no codec knowledge.
pub fn tee<T>(
    mut source: impl Stream<Item = T> + Send + Unpin + 'static,
) -> (
    Pin<Box<dyn Stream<Item = T> + Send>>,
    Pin<Box<dyn Stream<Item = T> + Send>>,
)
where
    T: Clone + Send + 'static,
{
    let (tx_a, rx_a) = tokio::sync::mpsc::unbounded_channel();
    let (tx_b, rx_b) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(item) = source.next().await {
            let a_open = tx_a.send(item.clone()).is_ok();
            let b_open = tx_b.send(item).is_ok();
            if !a_open && !b_open {
                break;
            }
        }
    });
    let stream_a = Box::pin(tokio_stream_from_receiver(rx_a));
    let stream_b = Box::pin(tokio_stream_from_receiver(rx_b));
    (stream_a, stream_b)
}

fn tokio_stream_from_receiver<T>(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<T>,
) -> impl Stream<Item = T> {
    stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn eager_parse_and_chunked_stream_produce_identical_records() {
        let csv = "a,b\n1,2\n3,4\n5,6";
        let mut engine = FastPathEngine::default();
        let options = ConversionOptions::new();
        let eager = match codec::csv_to_json(csv, &options, &mut engine).unwrap() {
            codec::Decoded::Records(records) => records,
            _ => panic!("expected records"),
        };

        let chunks: Vec<Result<String>> = vec![
            Ok("a,b\n1,".to_string()),
            Ok("2\n3,4\n".to_string()),
            Ok("5,6".to_string()),
        ];
        let source = stream::iter(chunks);
        let control = StreamControl::new();
        let streamed: Vec<Record> = csv_to_json_stream(source, options, control, None)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(eager, streamed);
    }

    #[tokio::test]
    async fn cancellation_stops_further_emissions() {
        let chunks: Vec<Result<String>> = vec![
            Ok("a,b\n1,2\n".to_string()),
            Ok("3,4\n5,6".to_string()),
        ];
        let control = StreamControl::new();
        control.cancel();
        let source = stream::iter(chunks);
        let streamed: Vec<_> = csv_to_json_stream(source, ConversionOptions::new(), control, None)
            .collect()
            .await;
        assert!(streamed.is_empty());
    }

    #[test]
    fn split_complete_lines_respects_quote_state_across_boundary() {
        let buffer = "a,\"b\nc\"\nd,e\nf,";
        let (complete, remainder) = split_complete_lines(buffer);
        assert_eq!(complete, "a,\"b\nc\"\nd,e\n");
        assert_eq!(remainder, "f,");
    }
}
