//! Materializes response bodies for inspection without taking them from the caller.

use crate::capture::body::ResponseBody;
use crate::capture::sniffer::is_gzipped;
use crate::capture::CaptureError;
use bytes::Bytes;
use flate2::read::GzDecoder;
use http::Response;
use std::io::Read;

/// Body bytes ready for sniffing and decoding
#[derive(Debug, Clone)]
pub struct MaterializedBody {
    /// Decompressed bytes when the response was gzipped, raw bytes otherwise
    pub bytes: Bytes,
    /// True when `bytes` came out of a gzip stream
    pub decompressed: bool,
}

impl MaterializedBody {
    /// Size to record for the body. Only a gunzipped body corrects the declared size.
    pub fn content_length(&self, declared: Option<u64>) -> u64 {
        if self.decompressed {
            self.bytes.len() as u64
        } else {
            declared.unwrap_or(self.bytes.len() as u64)
        }
    }
}

/// Read the entire response body into memory.
///
/// The response keeps an identical buffered copy, so the real caller still reads
/// every byte. Gzip bodies are decompressed from a clone of the raw buffer.
pub async fn materialize_body(
    response: &mut Response<ResponseBody>,
) -> Result<MaterializedBody, CaptureError> {
    let raw = response
        .body_mut()
        .buffer()
        .await
        .map_err(CaptureError::BodyRead)?;

    if !is_gzipped(response.headers()) {
        return Ok(MaterializedBody {
            bytes: raw,
            decompressed: false,
        });
    }

    let mut decoder = GzDecoder::new(&raw[..]);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(CaptureError::Decompress)?;
    tracing::trace!(
        "Gzip decompressed {} bytes to {} bytes",
        raw.len(),
        decompressed.len()
    );
    Ok(MaterializedBody {
        bytes: Bytes::from(decompressed),
        decompressed: true,
    })
}

#[cfg(test)]
pub(crate) fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
