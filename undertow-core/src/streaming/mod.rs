//! HTTP range streaming over cached swarm engines.
//!
//! [`RangeStreamer`] turns a file selection and an optional `Range` header
//! into a framed response whose body pulls from the engine's read stream only
//! as fast as hyper writes to the socket. Nothing is buffered beyond one
//! engine chunk. Dropping the body (client disconnect) drops the engine read
//! stream and the [`ActiveRead`] guard; the engine itself stays cached.

pub mod media;
pub mod range;

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::{
    ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio::sync::OwnedMutexGuard;

pub use media::{content_type_for, is_playable, select_default_file};
pub use range::{ByteRange, RangeSpec, parse_range_header};

use crate::config::StreamingConfig;
use crate::registry::{ActiveRead, EngineEntry};
use crate::swarm::{ByteStream, FileDescriptor};

/// Errors raised while serving a stream request.
///
/// Every variant is returned before response headers are sent. Failures
/// after that point end the body stream and close the connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamError {
    #[error("Torrent contains no playable media file")]
    NoPlayableFile,

    #[error("File index {index} not found (torrent has {count} files)")]
    FileNotFound { index: usize, count: usize },

    #[error("Requested range not satisfiable for {total}-byte file")]
    RangeNotSatisfiable { total: u64 },

    #[error("Stream read failed: {reason}")]
    StreamRead { reason: String },
}

/// Everything needed to frame a response, decided before any byte is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPlan {
    pub file: FileDescriptor,
    /// Requested range, `None` for a full-body response
    pub range: Option<ByteRange>,
    pub content_type: &'static str,
}

impl StreamPlan {
    /// 206 for range requests, 200 otherwise.
    pub fn status(&self) -> StatusCode {
        if self.range.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        }
    }

    /// Number of body bytes.
    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.file.length, |range| range.length())
    }

    /// Inclusive byte span to read, `None` when the body is empty.
    pub fn byte_span(&self) -> Option<(u64, u64)> {
        match self.range {
            Some(range) => Some((range.start, range.end)),
            None if self.file.length > 0 => Some((0, self.file.length - 1)),
            None => None,
        }
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(self.content_length()));
        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if let Some(range) = self.range {
            if let Ok(value) = HeaderValue::from_str(&range.content_range(self.file.length)) {
                headers.insert(CONTENT_RANGE, value);
            }
        }
        headers
    }
}

/// Serves byte ranges of torrent files as HTTP responses.
#[derive(Debug, Clone, Default)]
pub struct RangeStreamer {
    config: StreamingConfig,
}

impl RangeStreamer {
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }

    /// Chooses the file and range to serve.
    ///
    /// Without `file_index` the largest playable file is chosen. A malformed
    /// `Range` header is ignored and the whole file is served.
    ///
    /// # Errors
    ///
    /// - `StreamError::NoPlayableFile` - No index given and no playable file exists
    /// - `StreamError::FileNotFound` - Index outside the file list
    /// - `StreamError::RangeNotSatisfiable` - Range starts at or past end of file
    pub fn plan(
        &self,
        files: &[FileDescriptor],
        file_index: Option<usize>,
        range_header: Option<&str>,
    ) -> Result<StreamPlan, StreamError> {
        let file = match file_index {
            Some(index) => files
                .iter()
                .find(|file| file.index == index)
                .ok_or(StreamError::FileNotFound {
                    index,
                    count: files.len(),
                })?,
            None => select_default_file(files).ok_or(StreamError::NoPlayableFile)?,
        };

        let range = match range_header.and_then(parse_range_header) {
            Some(spec) => Some(spec.resolve(file.length).ok_or(
                StreamError::RangeNotSatisfiable { total: file.length },
            )?),
            None => None,
        };

        Ok(StreamPlan {
            file: file.clone(),
            range,
            content_type: content_type_for(&file.name),
        })
    }

    /// Builds the response for one stream request against `entry`.
    ///
    /// The first body chunk is read before returning, so an engine that fails
    /// immediately yields `StreamError::StreamRead` instead of a broken 200.
    ///
    /// # Errors
    ///
    /// - Any error from [`RangeStreamer::plan`]
    /// - `StreamError::StreamRead` - Engine refused the read or failed on the first chunk
    pub async fn stream(
        &self,
        entry: Arc<EngineEntry>,
        file_index: Option<usize>,
        range_header: Option<&str>,
    ) -> Result<Response, StreamError> {
        let plan = self.plan(&entry.engine().files(), file_index, range_header)?;

        let Some((start, end)) = plan.byte_span() else {
            entry.touch();
            return Ok(build_response(&plan, Body::empty()));
        };

        // Registered before any await so a sweep cannot close the engine under us
        let read = entry.begin_read(plan.content_length());

        // Engines that cannot interleave reads serve one response at a time
        let gate = if entry.engine().supports_concurrent_reads() {
            None
        } else {
            Some(entry.read_gate().lock_owned().await)
        };

        let source = entry
            .engine()
            .read_range(plan.file.index, start, end)
            .await
            .map_err(|error| StreamError::StreamRead {
                reason: error.to_string(),
            })?;

        tracing::info!(
            "Streaming {} file {} {:?} bytes {}-{}/{} (read {})",
            entry.content_id().short(),
            plan.file.index,
            plan.file.name,
            start,
            end,
            plan.file.length,
            read.read_id()
        );

        let mut body = BodyState {
            source,
            pending: Bytes::new(),
            remaining: plan.content_length(),
            chunk_size: self.config.chunk_size.max(1),
            read,
            _gate: gate,
        };

        let first = match body.next_chunk().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(error)) => {
                tracing::warn!(
                    "Read {} on {} failed before headers were sent: {}",
                    body.read.read_id(),
                    entry.content_id().short(),
                    error
                );
                return Err(error);
            }
            None => Bytes::new(),
        };

        let rest = stream::unfold(Some(body), |state| async move {
            let mut state = state?;
            match state.next_chunk().await? {
                Ok(chunk) if state.remaining == 0 => Some((Ok(chunk), None)),
                Ok(chunk) => Some((Ok(chunk), Some(state))),
                Err(error) => {
                    tracing::warn!(
                        "Read {} aborted after {} bytes: {}",
                        state.read.read_id(),
                        state.read.bytes_served(),
                        error
                    );
                    Some((Err(error), None))
                }
            }
        });

        let body = stream::once(async move { Ok::<_, StreamError>(first) }).chain(rest);
        Ok(build_response(&plan, Body::from_stream(body)))
    }
}

fn build_response(plan: &StreamPlan, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = plan.status();
    *response.headers_mut() = plan.headers();
    response
}

/// Pull state of one response body.
struct BodyState {
    source: ByteStream,
    pending: Bytes,
    remaining: u64,
    chunk_size: usize,
    read: ActiveRead,
    _gate: Option<OwnedMutexGuard<()>>,
}

impl BodyState {
    /// Next body chunk, at most `chunk_size` bytes and never past the range.
    async fn next_chunk(&mut self) -> Option<Result<Bytes, StreamError>> {
        if self.remaining == 0 {
            return None;
        }

        while self.pending.is_empty() {
            match self.source.next().await {
                Some(Ok(bytes)) => self.pending = bytes,
                Some(Err(error)) => {
                    return Some(Err(StreamError::StreamRead {
                        reason: error.to_string(),
                    }));
                }
                None => {
                    return Some(Err(StreamError::StreamRead {
                        reason: format!("engine stream ended {} bytes early", self.remaining),
                    }));
                }
            }
        }

        let take = self
            .pending
            .len()
            .min(self.chunk_size)
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let chunk = self.pending.split_to(take);
        self.remaining -= take as u64;
        self.read.record(take);
        Some(Ok(chunk))
    }
}
