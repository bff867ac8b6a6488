//! Fingerprint Service
//!
//! SHA-256 over the normalized byte content of a video. ISO-BMFF inputs
//! (MP4/MOV) are walked box by box and metadata boxes are left out of the
//! hash, so re-tagging a file does not change its fingerprint. Anything that
//! is not well-formed BMFF is hashed byte for byte.
//!
//! Hashing runs in `spawn_blocking`; inputs larger than the configured
//! ceiling fail with `InputUnreadable`.

use sha2::{Digest, Sha256};

use crate::error::AnalysisError;
use crate::models::VideoFingerprint;

/// Boxes excluded from the content hash
const METADATA_BOXES: [&[u8; 4]; 4] = [b"udta", b"meta", b"free", b"skip"];

/// Boxes whose children are walked individually
const CONTAINER_BOXES: [&[u8; 4]; 10] = [
    b"moov", b"trak", b"mdia", b"minf", b"stbl", b"edts", b"dinf", b"mvex", b"moof", b"traf",
];

/// Bounded recursion for hostile inputs
const MAX_BOX_DEPTH: usize = 16;

/// Computes content fingerprints under a size ceiling
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    max_bytes: u64,
}

impl Fingerprinter {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    /// Fingerprint an in-memory video
    pub async fn fingerprint(
        &self,
        bytes: std::sync::Arc<Vec<u8>>,
    ) -> Result<VideoFingerprint, AnalysisError> {
        if bytes.is_empty() {
            return Err(AnalysisError::InputUnreadable("empty input".to_string()));
        }
        if bytes.len() as u64 > self.max_bytes {
            return Err(too_large(self.max_bytes));
        }

        let byte_length = bytes.len() as u64;
        let (digest, duration_secs) =
            tokio::task::spawn_blocking(move || (content_digest(&bytes), bmff_duration(&bytes)))
                .await
                .map_err(|e| AnalysisError::Storage(format!("Hash task failed: {}", e)))?;

        tracing::debug!(digest = %&digest[..12], byte_length, "Computed content fingerprint");

        Ok(VideoFingerprint {
            digest,
            byte_length,
            duration_secs,
        })
    }
}

/// Append one chunk of an incoming video, failing once it passes `max_bytes`
pub fn append_bounded(
    buffer: &mut Vec<u8>,
    chunk: &[u8],
    max_bytes: u64,
) -> Result<(), AnalysisError> {
    if (buffer.len() + chunk.len()) as u64 > max_bytes {
        return Err(too_large(max_bytes));
    }
    buffer.extend_from_slice(chunk);
    Ok(())
}

pub fn too_large(max_bytes: u64) -> AnalysisError {
    AnalysisError::InputUnreadable(format!("input exceeds the {} byte size limit", max_bytes))
}

/// Hex SHA-256 of the normalized content
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    if !(looks_like_bmff(bytes) && hash_boxes(bytes, 0, &mut hasher).is_some()) {
        hasher = Sha256::new();
        hasher.update(b"raw\0");
        hasher.update(bytes);
    }
    format!("{:x}", hasher.finalize())
}

fn looks_like_bmff(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && &bytes[4..8] == b"ftyp"
}

struct BmffBox<'a> {
    kind: [u8; 4],
    payload: &'a [u8],
}

/// Split a buffer into boxes; `None` if any header is malformed
fn parse_boxes(mut bytes: &[u8]) -> Option<Vec<BmffBox<'_>>> {
    let mut boxes = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 8 {
            return None;
        }
        let size32 = u32::from_be_bytes(bytes[0..4].try_into().ok()?) as u64;
        let kind: [u8; 4] = bytes[4..8].try_into().ok()?;
        let (header_len, size) = match size32 {
            0 => (8u64, bytes.len() as u64),
            1 => {
                if bytes.len() < 16 {
                    return None;
                }
                (16, u64::from_be_bytes(bytes[8..16].try_into().ok()?))
            }
            n => (8, n),
        };
        if size < header_len || size > bytes.len() as u64 {
            return None;
        }
        boxes.push(BmffBox {
            kind,
            payload: &bytes[header_len as usize..size as usize],
        });
        bytes = &bytes[size as usize..];
    }
    Some(boxes)
}

fn hash_boxes(bytes: &[u8], depth: usize, hasher: &mut Sha256) -> Option<()> {
    if depth > MAX_BOX_DEPTH {
        return None;
    }
    for bmff in parse_boxes(bytes)? {
        if METADATA_BOXES.contains(&&bmff.kind) {
            continue;
        }
        hasher.update(bmff.kind);
        if CONTAINER_BOXES.contains(&&bmff.kind) {
            hasher.update(b"{");
            hash_boxes(bmff.payload, depth + 1, hasher)?;
            hasher.update(b"}");
        } else {
            hasher.update((bmff.payload.len() as u64).to_be_bytes());
            hasher.update(bmff.payload);
        }
    }
    Some(())
}

/// Movie duration from `moov/mvhd`, if present
pub fn bmff_duration(bytes: &[u8]) -> Option<f64> {
    if !looks_like_bmff(bytes) {
        return None;
    }
    let moov = parse_boxes(bytes)?.into_iter().find(|b| &b.kind == b"moov")?;
    let mvhd = parse_boxes(moov.payload)?
        .into_iter()
        .find(|b| &b.kind == b"mvhd")?;
    let p = mvhd.payload;

    let (timescale, duration) = match *p.first()? {
        0 if p.len() >= 20 => (
            u32::from_be_bytes(p[12..16].try_into().ok()?) as u64,
            u32::from_be_bytes(p[16..20].try_into().ok()?) as u64,
        ),
        1 if p.len() >= 32 => (
            u32::from_be_bytes(p[20..24].try_into().ok()?) as u64,
            u64::from_be_bytes(p[24..32].try_into().ok()?),
        ),
        _ => return None,
    };
    if timescale == 0 {
        return None;
    }
    Some(duration as f64 / timescale as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bmff_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
        let mut payload = vec![0u8; 100];
        payload[12..16].copy_from_slice(&timescale.to_be_bytes());
        payload[16..20].copy_from_slice(&duration.to_be_bytes());
        bmff_box(b"mvhd", &payload)
    }

    fn mp4(with_tags: Option<&[u8]>) -> Vec<u8> {
        let mut moov_payload = mvhd(1000, 10_000);
        moov_payload.extend(bmff_box(b"trak", &bmff_box(b"tkhd", &[1, 2, 3])));
        if let Some(tag) = with_tags {
            moov_payload.extend(bmff_box(b"udta", tag));
        }
        let mut file = bmff_box(b"ftyp", b"isom\0\0\0\0");
        file.extend(bmff_box(b"moov", &moov_payload));
        file.extend(bmff_box(b"mdat", &[9u8; 64]));
        file
    }

    #[test]
    fn test_identical_bytes_same_digest() {
        let a = mp4(None);
        assert_eq!(content_digest(&a), content_digest(&a.clone()));
        assert_eq!(content_digest(&a).len(), 64);
    }

    #[test]
    fn test_metadata_boxes_ignored() {
        let plain = mp4(None);
        let tagged = mp4(Some(&b"title=holiday"[..]));
        let retagged = mp4(Some(&b"title=something else"[..]));
        assert_ne!(plain, tagged);
        assert_eq!(content_digest(&plain), content_digest(&tagged));
        assert_eq!(content_digest(&tagged), content_digest(&retagged));
    }

    #[test]
    fn test_media_change_changes_digest() {
        let a = mp4(None);
        let mut b = a.clone();
        let last = b.len() - 1;
        b[last] ^= 0xff;
        assert_ne!(content_digest(&a), content_digest(&b));
    }

    #[test]
    fn test_malformed_bmff_falls_back_to_raw_hash() {
        let mut broken = mp4(None);
        broken.extend_from_slice(&[0, 0, 0, 200, b'm', b'd', b'a', b't']);
        let mut expected = Sha256::new();
        expected.update(b"raw\0");
        expected.update(&broken);
        assert_eq!(content_digest(&broken), format!("{:x}", expected.finalize()));
    }

    #[test]
    fn test_duration_from_mvhd() {
        assert_eq!(bmff_duration(&mp4(None)), Some(10.0));
        assert_eq!(bmff_duration(b"not a video at all"), None);
    }

    #[tokio::test]
    async fn test_size_ceiling() {
        let fingerprinter = Fingerprinter::new(16);
        let err = fingerprinter.fingerprint(Arc::new(vec![0u8; 17])).await.unwrap_err();
        assert_eq!(err.code(), "INPUT_UNREADABLE");

    }

    #[test]
    fn test_append_bounded_stops_at_ceiling() {
        let mut buffer = Vec::new();
        append_bounded(&mut buffer, &[1u8; 10], 16).unwrap();
        append_bounded(&mut buffer, &[2u8; 6], 16).unwrap();
        assert_eq!(buffer.len(), 16);

        let err = append_bounded(&mut buffer, &[3u8], 16).unwrap_err();
        assert_eq!(err.code(), "INPUT_UNREADABLE");
        assert!(err.to_string().contains("16 byte size limit"));
        assert_eq!(buffer.len(), 16);
    }

    #[tokio::test]
    async fn test_fingerprint_carries_length_and_duration() {
        let bytes = mp4(None);
        let fp = Fingerprinter::new(1 << 20)
            .fingerprint(Arc::new(bytes.clone()))
            .await
            .unwrap();
        assert_eq!(fp.byte_length, bytes.len() as u64);
        assert_eq!(fp.duration_secs, Some(10.0));
        assert_eq!(fp.digest, content_digest(&bytes));
    }
}
