//! Streaming gzip/brotli compression and decompression transforms.

use std::io::{Read, Write};

use async_trait::async_trait;
use bytes::Bytes;
use cachet_core::{read_to_end, reader_from_bytes, BodyReader, CacheMeta};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::pipeline::{Transform, TransformError};

/// Bodies below this size are stored uncompressed.
pub const DEFAULT_MIN_SIZE: u64 = 1024;

const BROTLI_BUFFER: usize = 4096;
const BROTLI_WINDOW: u32 = 22;

/// Compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Gzip,
    Brotli,
}

impl Codec {
    /// The `Content-Encoding` token this codec produces.
    pub fn encoding(&self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Brotli => "br",
        }
    }
}

/// Configuration for [`CompressTransform`].
#[derive(Debug, Clone)]
pub struct CompressConfig {
    pub codec: Codec,
    /// 0-9 for gzip, 0-11 for brotli; clamped by the codec.
    pub level: u32,
    /// Minimum body size before compression is attempted.
    pub min_size: u64,
}

impl CompressConfig {
    /// Default gzip configuration.
    pub fn gzip() -> Self {
        CompressConfig {
            codec: Codec::Gzip,
            level: 6,
            min_size: DEFAULT_MIN_SIZE,
        }
    }

    /// Default brotli configuration.
    pub fn brotli() -> Self {
        CompressConfig {
            codec: Codec::Brotli,
            level: 6,
            min_size: DEFAULT_MIN_SIZE,
        }
    }
}

/// Compresses bodies that are not already encoded.
///
/// The output is never larger than the input: bodies below the
/// minimum size and bodies that do not shrink are passed through with
/// an empty encoding.
pub struct CompressTransform {
    config: CompressConfig,
}

impl CompressTransform {
    pub fn new(config: CompressConfig) -> Self {
        CompressTransform { config }
    }
}

#[async_trait]
impl Transform for CompressTransform {
    async fn apply(
        &self,
        input: BodyReader,
        meta: &CacheMeta,
    ) -> Result<(BodyReader, CacheMeta), TransformError> {
        if !meta.encoding.is_empty() && meta.encoding != "identity" {
            return Ok((input, meta.clone()));
        }

        let data = read_to_end(input).await?;
        let mut out_meta = meta.clone();

        if (data.len() as u64) < self.config.min_size {
            out_meta.size = data.len() as u64;
            return Ok((reader_from_bytes(Bytes::from(data)), out_meta));
        }

        let compressed = compress(&data, self.config.codec, self.config.level)?;
        if compressed.len() >= data.len() {
            // No gain, keep the original.
            out_meta.size = data.len() as u64;
            return Ok((reader_from_bytes(Bytes::from(data)), out_meta));
        }

        out_meta.encoding = self.config.codec.encoding().to_string();
        out_meta.size = compressed.len() as u64;
        Ok((reader_from_bytes(Bytes::from(compressed)), out_meta))
    }
}

/// Inverts [`CompressTransform`]: decodes supported encodings, clears
/// `encoding`, and refreshes `size`. Unknown encodings pass through.
pub struct DecompressTransform;

#[async_trait]
impl Transform for DecompressTransform {
    async fn apply(
        &self,
        input: BodyReader,
        meta: &CacheMeta,
    ) -> Result<(BodyReader, CacheMeta), TransformError> {
        if meta.encoding.is_empty() || meta.encoding == "identity" {
            return Ok((input, meta.clone()));
        }

        let data = read_to_end(input).await?;
        let mut out_meta = meta.clone();
        match decompress(&data, &meta.encoding)? {
            Some(decoded) => {
                out_meta.encoding = String::new();
                out_meta.size = decoded.len() as u64;
                Ok((reader_from_bytes(Bytes::from(decoded)), out_meta))
            }
            None => {
                out_meta.size = data.len() as u64;
                Ok((reader_from_bytes(Bytes::from(data)), out_meta))
            }
        }
    }
}

fn compress(data: &[u8], codec: Codec, level: u32) -> std::io::Result<Vec<u8>> {
    match codec {
        Codec::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
            encoder.write_all(data)?;
            encoder.finish()
        }
        Codec::Brotli => {
            let mut out = Vec::new();
            {
                let mut writer =
                    brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, level.min(11), BROTLI_WINDOW);
                writer.write_all(data)?;
            }
            Ok(out)
        }
    }
}

/// Decodes `data` according to `encoding`; `None` when the encoding is
/// not one this module produces.
fn decompress(data: &[u8], encoding: &str) -> std::io::Result<Option<Vec<u8>>> {
    match encoding {
        "gzip" => {
            let mut decoder = flate2::read::GzDecoder::new(data);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(Some(out))
        }
        "br" => {
            let mut decoder = brotli::Decompressor::new(data, BROTLI_BUFFER);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            Ok(Some(out))
        }
        _ => Ok(None),
    }
}

/// Whether a content type typically benefits from compression.
pub fn is_compressible(content_type: &str) -> bool {
    const COMPRESSIBLE: [&str; 7] = [
        "text/",
        "application/json",
        "application/javascript",
        "application/xml",
        "application/x-javascript",
        "application/xhtml+xml",
        "image/svg+xml",
    ];
    COMPRESSIBLE
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> CacheMeta {
        CacheMeta::new("text/html", 200, None)
    }

    fn compressible_body() -> Bytes {
        Bytes::from("<p>hello hello hello</p>".repeat(100))
    }

    async fn run(transform: &dyn Transform, data: Bytes, meta: &CacheMeta) -> (Bytes, CacheMeta) {
        let (reader, out_meta) = transform
            .apply(reader_from_bytes(data), meta)
            .await
            .unwrap();
        (Bytes::from(read_to_end(reader).await.unwrap()), out_meta)
    }

    #[tokio::test]
    async fn gzip_shrinks_compressible_bodies() {
        let transform = CompressTransform::new(CompressConfig::gzip());
        let input = compressible_body();
        let (out, out_meta) = run(&transform, input.clone(), &meta()).await;
        assert!(out.len() < input.len());
        assert_eq!(out_meta.encoding, "gzip");
        assert_eq!(out_meta.size, out.len() as u64);
    }

    #[tokio::test]
    async fn brotli_shrinks_compressible_bodies() {
        let transform = CompressTransform::new(CompressConfig::brotli());
        let input = compressible_body();
        let (out, out_meta) = run(&transform, input.clone(), &meta()).await;
        assert!(out.len() < input.len());
        assert_eq!(out_meta.encoding, "br");
    }

    #[tokio::test]
    async fn output_is_never_larger_than_input() {
        let mut config = CompressConfig::gzip();
        config.min_size = 0;
        let transform = CompressTransform::new(config);
        // Already-compressed bytes do not shrink again.
        let incompressible = Bytes::from(compress(&compressible_body(), Codec::Gzip, 9).unwrap());
        let (out, out_meta) = run(&transform, incompressible.clone(), &meta()).await;
        assert!(out.len() <= incompressible.len());
        assert_eq!(out, incompressible);
        assert_eq!(out_meta.encoding, "");
    }

    #[tokio::test]
    async fn small_bodies_stay_uncompressed() {
        let transform = CompressTransform::new(CompressConfig::gzip());
        let (out, out_meta) = run(&transform, Bytes::from_static(b"tiny"), &meta()).await;
        assert_eq!(&out[..], b"tiny");
        assert_eq!(out_meta.encoding, "");
        assert_eq!(out_meta.size, 4);
    }

    #[tokio::test]
    async fn already_encoded_bodies_pass_through() {
        let transform = CompressTransform::new(CompressConfig::gzip());
        let mut encoded = meta();
        encoded.encoding = "br".to_string();
        let input = compressible_body();
        let (out, out_meta) = run(&transform, input.clone(), &encoded).await;
        assert_eq!(out, input);
        assert_eq!(out_meta.encoding, "br");
    }

    #[tokio::test]
    async fn decompress_round_trips_gzip_and_brotli() {
        let input = compressible_body();
        for config in [CompressConfig::gzip(), CompressConfig::brotli()] {
            let compressed = CompressTransform::new(config);
            let (packed, packed_meta) = run(&compressed, input.clone(), &meta()).await;
            let (unpacked, unpacked_meta) = run(&DecompressTransform, packed, &packed_meta).await;
            assert_eq!(unpacked, input);
            assert_eq!(unpacked_meta.encoding, "");
            assert_eq!(unpacked_meta.size, input.len() as u64);
        }
    }

    #[tokio::test]
    async fn decompress_passes_unknown_encodings_through() {
        let mut unknown = meta();
        unknown.encoding = "zstd".to_string();
        let (out, out_meta) = run(&DecompressTransform, Bytes::from_static(b"data"), &unknown).await;
        assert_eq!(&out[..], b"data");
        assert_eq!(out_meta.encoding, "zstd");
    }

    #[test]
    fn compressible_content_types() {
        assert!(is_compressible("text/html"));
        assert!(is_compressible("application/json"));
        assert!(is_compressible("image/svg+xml"));
        assert!(!is_compressible("image/png"));
        assert!(!is_compressible("video/mp4"));
    }
}
