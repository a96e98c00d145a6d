//! Streaming transform pipeline for the cachet HTTP response cache.
//!
//! A [`Transform`] maps one `(body, meta)` pair to another; a
//! [`Pipeline`] folds an ordered list of transforms over an entry.
//! The two transform families are content-type-gated minification and
//! gzip/brotli compression.

mod compress;
mod minify;
mod pipeline;

pub use compress::{
    is_compressible, Codec, CompressConfig, CompressTransform, DecompressTransform,
    DEFAULT_MIN_SIZE,
};
pub use minify::{MinifyConfig, MinifyTransform};
pub use pipeline::{Pipeline, Transform, TransformError};
