//! Transform trait and pipeline composition.

use async_trait::async_trait;
use bytes::Bytes;
use cachet_core::{read_to_end, reader_from_bytes, BodyReader, CacheMeta};
use thiserror::Error;

/// Error type for transform application.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Reading the input or running a codec failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A streaming byte transform carrying metadata.
///
/// Implementations either fully consume the input (possibly via
/// internal buffering) or return it unchanged. The returned metadata
/// is a value copy of the input metadata with only `size` and
/// optionally `encoding` adjusted.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn apply(
        &self,
        input: BodyReader,
        meta: &CacheMeta,
    ) -> Result<(BodyReader, CacheMeta), TransformError>;
}

/// An ordered chain of transforms.
///
/// `apply` folds the transforms left-to-right. Intermediate readers
/// are dropped between stages; the externally supplied input is owned
/// by the first transform, which either consumes it or passes it
/// through untouched. Cancellation is cooperative: dropping the
/// returned future between stages abandons the fold.
#[derive(Default)]
pub struct Pipeline {
    transforms: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline {
            transforms: Vec::new(),
        }
    }

    /// Appends a transform, builder style.
    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transforms.push(Box::new(transform));
        self
    }

    pub fn push(&mut self, transform: Box<dyn Transform>) {
        self.transforms.push(transform);
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Applies every transform in order. An empty pipeline returns the
    /// input unchanged.
    pub async fn apply(
        &self,
        input: BodyReader,
        meta: &CacheMeta,
    ) -> Result<(BodyReader, CacheMeta), TransformError> {
        let mut reader = input;
        let mut current = meta.clone();
        for transform in &self.transforms {
            let (next_reader, next_meta) = transform.apply(reader, &current).await?;
            reader = next_reader;
            current = next_meta;
        }
        Ok((reader, current))
    }

    /// Buffered convenience over [`apply`](Pipeline::apply) used by the
    /// middleware and the worker, which already hold the body in
    /// memory.
    pub async fn apply_bytes(
        &self,
        data: Bytes,
        meta: &CacheMeta,
    ) -> Result<(Bytes, CacheMeta), TransformError> {
        if self.transforms.is_empty() {
            let mut unchanged = meta.clone();
            unchanged.size = data.len() as u64;
            return Ok((data, unchanged));
        }
        let (reader, out_meta) = self.apply(reader_from_bytes(data), meta).await?;
        let buffer = read_to_end(reader).await?;
        Ok((Bytes::from(buffer), out_meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl Transform for Upper {
        async fn apply(
            &self,
            input: BodyReader,
            meta: &CacheMeta,
        ) -> Result<(BodyReader, CacheMeta), TransformError> {
            let data = read_to_end(input).await?;
            let upper: Vec<u8> = data.iter().map(u8::to_ascii_uppercase).collect();
            let mut out_meta = meta.clone();
            out_meta.size = upper.len() as u64;
            Ok((reader_from_bytes(Bytes::from(upper)), out_meta))
        }
    }

    struct Repeat;

    #[async_trait]
    impl Transform for Repeat {
        async fn apply(
            &self,
            input: BodyReader,
            meta: &CacheMeta,
        ) -> Result<(BodyReader, CacheMeta), TransformError> {
            let mut data = read_to_end(input).await?;
            let copy = data.clone();
            data.extend_from_slice(&copy);
            let mut out_meta = meta.clone();
            out_meta.size = data.len() as u64;
            Ok((reader_from_bytes(Bytes::from(data)), out_meta))
        }
    }

    fn meta() -> CacheMeta {
        CacheMeta::new("text/plain", 200, None)
    }

    #[tokio::test]
    async fn empty_pipeline_is_identity() {
        let pipeline = Pipeline::new();
        let (out, out_meta) = pipeline
            .apply_bytes(Bytes::from_static(b"hello"), &meta())
            .await
            .unwrap();
        assert_eq!(&out[..], b"hello");
        assert_eq!(out_meta.size, 5);
        assert_eq!(out_meta.encoding, "");
    }

    #[tokio::test]
    async fn transforms_fold_left_to_right() {
        let pipeline = Pipeline::new().with_transform(Upper).with_transform(Repeat);
        let (out, out_meta) = pipeline
            .apply_bytes(Bytes::from_static(b"ab"), &meta())
            .await
            .unwrap();
        assert_eq!(&out[..], b"ABAB");
        assert_eq!(out_meta.size, 4);
    }

    #[tokio::test]
    async fn meta_size_tracks_the_last_stage() {
        let pipeline = Pipeline::new().with_transform(Repeat);
        let (out, out_meta) = pipeline
            .apply_bytes(Bytes::from_static(b"xyz"), &meta())
            .await
            .unwrap();
        assert_eq!(out.len() as u64, out_meta.size);
    }
}
