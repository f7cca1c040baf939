//! Base64 codec for linear16 audio: signed 16-bit little-endian samples.
//! This is the only format the accumulator may concatenate chunk-wise.

use base64::Engine as _;

/// Decodes a base64 chunk into i16 samples.
///
/// # Errors
/// Returns a message when the base64 is malformed or the byte length is
/// not sample-aligned.
pub fn decode_base64_samples(b64: &str) -> Result<Vec<i16>, String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| format!("invalid base64 audio chunk: {e}"))?;

    if bytes.len() % 2 != 0 {
        return Err(format!(
            "linear16 chunk has odd byte length {}",
            bytes.len()
        ));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

#[must_use]
pub fn encode_base64_samples(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn round_trip_preserves_samples() {
        let samples = vec![0, 1, -1, i16::MAX, i16::MIN, 12345];
        let encoded = encode_base64_samples(&samples);
        assert_eq!(decode_base64_samples(&encoded).unwrap(), samples);
    }

    #[test]
    fn merged_chunks_concatenate_sample_wise() {
        let chunks = [vec![1i16, 2], vec![3], vec![4, 5, 6]];
        let mut merged = Vec::new();
        for chunk in &chunks {
            merged.extend(decode_base64_samples(&encode_base64_samples(chunk)).unwrap());
        }
        assert_eq!(merged, vec![1, 2, 3, 4, 5, 6]);

        let reencoded = encode_base64_samples(&merged);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(reencoded)
            .unwrap();
        assert_eq!(bytes.len(), 12);
    }

    #[test]
    fn odd_length_chunk_is_rejected() {
        let b64 = base64::engine::general_purpose::STANDARD.encode([0u8; 3]);
        assert!(decode_base64_samples(&b64).is_err());
    }
}
