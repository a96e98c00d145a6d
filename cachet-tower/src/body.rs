//! Response body replay for transparent caching.
//!
//! On a hit or a captured miss the middleware already holds the whole
//! body in memory and replays it in a single frame; on a bypass the
//! upstream body streams through untouched. A body error observed
//! while capturing is deferred and yielded to the client at the same
//! point it would have occurred without the cache.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;

/// Response body produced by the cache service.
#[pin_project(project = CachedBodyProj)]
pub enum CachedBody<B>
where
    B: Body,
{
    /// Buffered bytes replayed in one frame, then end of stream.
    Replay(Option<Bytes>),

    /// Error captured while collecting the upstream body; yielded once.
    Error(Option<B::Error>),

    /// Untouched upstream body (cache bypassed).
    Passthrough(#[pin] B),
}

impl<B> CachedBody<B>
where
    B: Body,
{
    pub fn replay(bytes: Bytes) -> Self {
        CachedBody::Replay(Some(bytes))
    }

    pub fn empty() -> Self {
        CachedBody::Replay(None)
    }
}

impl<B> Body for CachedBody<B>
where
    B: Body,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<<Self as Body>::Data>, <Self as Body>::Error>>> {
        match self.project() {
            CachedBodyProj::Replay(bytes) => match bytes.take() {
                Some(bytes) if !bytes.is_empty() => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                _ => Poll::Ready(None),
            },
            CachedBodyProj::Error(error) => match error.take() {
                Some(error) => Poll::Ready(Some(Err(error))),
                None => Poll::Ready(None),
            },
            CachedBodyProj::Passthrough(body) => match body.poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    let frame = frame.map_data(|mut data| data.copy_to_bytes(data.remaining()));
                    Poll::Ready(Some(Ok(frame)))
                }
                Poll::Ready(Some(Err(error))) => Poll::Ready(Some(Err(error))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn size_hint(&self) -> SizeHint {
        match self {
            CachedBody::Replay(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            CachedBody::Replay(None) => SizeHint::with_exact(0),
            CachedBody::Error(_) => SizeHint::with_exact(0),
            CachedBody::Passthrough(body) => body.size_hint(),
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            CachedBody::Replay(bytes) => bytes.as_ref().map_or(true, Bytes::is_empty),
            CachedBody::Error(error) => error.is_none(),
            CachedBody::Passthrough(body) => body.is_end_stream(),
        }
    }
}

impl<B> fmt::Debug for CachedBody<B>
where
    B: Body,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachedBody::Replay(Some(bytes)) => f
                .debug_tuple("Replay")
                .field(&format!("{} bytes", bytes.len()))
                .finish(),
            CachedBody::Replay(None) => f.debug_tuple("Replay").field(&"drained").finish(),
            CachedBody::Error(_) => f.debug_tuple("Error").finish(),
            CachedBody::Passthrough(_) => f.debug_tuple("Passthrough").field(&"...").finish(),
        }
    }
}
