//! Transparent decompression of source objects.
//!
//! Raw exports are sometimes uploaded gzipped. Objects are matched to a codec
//! by key extension first and by magic bytes second; objects matching no
//! codec pass through untouched.

use std::borrow::Cow;

/// A decompression codec for whole objects.
pub trait CompressionCodec: Send + Sync {
    /// Human-readable codec name (e.g., "gzip").
    fn name(&self) -> &str;

    /// Key extensions associated with this codec, lowercase with the leading dot.
    fn extensions(&self) -> &[&str];

    /// Magic byte signature for content-based detection.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Decompress a complete object.
    ///
    /// # Errors
    /// Returns an error if the payload is corrupt.
    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>>;
}

fn codecs() -> Vec<&'static dyn CompressionCodec> {
    vec![
        #[cfg(feature = "compression-gzip")]
        &GzipCodec,
    ]
}

/// Codec for `key` and its leading bytes, if any.
#[must_use]
pub fn detect_codec(key: &str, head: &[u8]) -> Option<&'static dyn CompressionCodec> {
    let lower = key.to_ascii_lowercase();
    let registered = codecs();
    registered
        .iter()
        .find(|c| c.extensions().iter().any(|ext| lower.ends_with(ext)))
        .or_else(|| {
            registered
                .iter()
                .find(|c| c.magic_bytes().is_some_and(|m| head.starts_with(m)))
        })
        .copied()
}

/// Strip the compression extension from `key` (`a.csv.gz` → `a.csv`).
#[must_use]
pub fn strip_codec_extension(key: &str) -> &str {
    let lower = key.to_ascii_lowercase();
    for codec in codecs() {
        for ext in codec.extensions() {
            if lower.ends_with(ext) {
                return &key[..key.len() - ext.len()];
            }
        }
    }
    key
}

/// Decompress `data` if `key` or its content indicates a known codec.
///
/// # Errors
/// Returns an error if a codec matched but the payload failed to decode.
pub fn auto_decompress<'a>(key: &str, data: &'a [u8]) -> std::io::Result<Cow<'a, [u8]>> {
    match detect_codec(key, data) {
        Some(codec) => codec.decompress(data).map(Cow::Owned),
        None => Ok(Cow::Borrowed(data)),
    }
}

// ============================================================================
// Built-in Codec Implementations
// ============================================================================

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        use flate2::read::MultiGzDecoder;
        use std::io::Read;
        let mut out = Vec::new();
        MultiGzDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }
}
