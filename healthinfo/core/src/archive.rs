use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_json::Value;

use crate::{HealthInfoError, HealthInfoResult};

#[derive(Serialize)]
struct VersionHeader<'a> {
    version: &'a str,
}

/// Compressed, transport-encoded form of one captured document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveBlob {
    /// Protocol version written as the leading header object.
    pub version_header: String,
    /// Gzip bytes holding the header and the document.
    pub compressed: Vec<u8>,
    /// Standard base64 of `compressed`.
    pub encoded: String,
}

/// Write `{"version": ...}` followed by `document` as newline-terminated JSON
/// into a gzip stream over `writer`, returning the finished writer.
pub fn write_archive<W, T>(writer: W, document: &T, version: &str) -> HealthInfoResult<W>
where
    W: Write,
    T: Serialize + ?Sized,
{
    let mut encoder = GzEncoder::new(writer, Compression::default());
    serde_json::to_writer(&mut encoder, &VersionHeader { version })?;
    encoder.write_all(b"\n")?;
    serde_json::to_writer(&mut encoder, document)?;
    encoder.write_all(b"\n")?;
    Ok(encoder.finish()?)
}

/// Archive a health document for transport.
pub fn archive_health_info<T>(document: &T, version: &str) -> HealthInfoResult<ArchiveBlob>
where
    T: Serialize + ?Sized,
{
    let compressed = write_archive(Vec::new(), document, version)?;
    let encoded = STANDARD.encode(&compressed);
    Ok(ArchiveBlob {
        version_header: version.to_string(),
        compressed,
        encoded,
    })
}

/// Reverse [`archive_health_info`]: base64, gunzip, then the header and the
/// document.
pub fn decode_archive(encoded: &str) -> HealthInfoResult<(String, Value)> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    let mut raw = Vec::new();
    GzDecoder::new(compressed.as_slice()).read_to_end(&mut raw)?;

    let mut values = serde_json::Deserializer::from_slice(&raw).into_iter::<Value>();
    let header = values.next().ok_or_else(|| missing("version header"))??;
    let document = values.next().ok_or_else(|| missing("document"))??;
    let version = header
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("version field"))?
        .to_string();
    Ok((version, document))
}

fn missing(what: &str) -> HealthInfoError {
    HealthInfoError::Archive(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("archive is missing its {what}"),
    ))
}
