//! Delta codecs

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Codec failures. Carried as strings so results stay cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("reference state is empty")]
    EmptyReference,
    #[error("malformed diff: {0}")]
    Malformed(String),
}

/// Produces and applies deltas between a reference state and a target.
///
/// Implementations must round-trip: `apply(r, &encode(r, t)?)? == t`.
pub trait DeltaCodec: Send + Sync + 'static {
    fn encode(&self, reference: &[u8], target: &[u8]) -> Result<Vec<u8>, CodecError>;

    fn apply(&self, reference: &[u8], diff: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// XOR against the reference, then LZ4.
///
/// Layout before compression: `[target_len u32 LE][target ^ reference]`,
/// where the reference is zero-extended to the target length. Unchanged
/// regions XOR to zero runs, which LZ4 collapses.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorLz4Codec;

const HEADER_LEN: usize = 4;

impl DeltaCodec for XorLz4Codec {
    fn encode(&self, reference: &[u8], target: &[u8]) -> Result<Vec<u8>, CodecError> {
        if reference.is_empty() {
            return Err(CodecError::EmptyReference);
        }
        let target_len = u32::try_from(target.len())
            .map_err(|_| CodecError::Malformed(format!("target too large: {}", target.len())))?;

        let mut raw = Vec::with_capacity(HEADER_LEN + target.len());
        raw.write_u32::<LittleEndian>(target_len)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        raw.extend(xor_with(reference, target));

        Ok(lz4_flex::compress_prepend_size(&raw))
    }

    fn apply(&self, reference: &[u8], diff: &[u8]) -> Result<Vec<u8>, CodecError> {
        if reference.is_empty() {
            return Err(CodecError::EmptyReference);
        }
        let raw = lz4_flex::decompress_size_prepended(diff)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;

        let mut header = &raw[..raw.len().min(HEADER_LEN)];
        let target_len = header
            .read_u32::<LittleEndian>()
            .map_err(|_| CodecError::Malformed("truncated header".into()))?
            as usize;
        let body = &raw[HEADER_LEN..];
        if body.len() != target_len {
            return Err(CodecError::Malformed(format!(
                "length mismatch: header {target_len}, body {}",
                body.len()
            )));
        }

        Ok(xor_with(reference, body).collect())
    }
}

fn xor_with<'a>(reference: &'a [u8], data: &'a [u8]) -> impl Iterator<Item = u8> + 'a {
    data.iter()
        .enumerate()
        .map(|(i, byte)| byte ^ reference.get(i).copied().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_same_length() {
        let reference: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
        let mut target = reference.clone();
        target[100] = 0xFF;
        target[3000..3010].fill(7);

        let diff = XorLz4Codec.encode(&reference, &target).unwrap();
        assert!(diff.len() < target.len() / 4);
        assert_eq!(XorLz4Codec.apply(&reference, &diff).unwrap(), target);
    }

    #[test]
    fn test_roundtrip_length_changes() {
        let reference = vec![1u8; 32];
        let longer: Vec<u8> = (0..100).collect();
        let shorter = vec![3u8; 5];

        for target in [longer, shorter, Vec::new()] {
            let diff = XorLz4Codec.encode(&reference, &target).unwrap();
            assert_eq!(XorLz4Codec.apply(&reference, &diff).unwrap(), target);
        }
    }

    #[test]
    fn test_empty_reference_fails() {
        assert_eq!(
            XorLz4Codec.encode(&[], &[1, 2, 3]),
            Err(CodecError::EmptyReference)
        );
    }

    #[test]
    fn test_malformed_diff_fails() {
        let truncated = XorLz4Codec.apply(&[1, 2, 3], &[1, 2]);
        assert!(matches!(truncated, Err(CodecError::Malformed(_))));

        // Valid LZ4, but the header claims more bytes than the body holds
        let lying = lz4_flex::compress_prepend_size(&[5, 0, 0, 0, 1]);
        assert!(matches!(
            XorLz4Codec.apply(&[1, 2, 3], &lying),
            Err(CodecError::Malformed(_))
        ));
    }
}
