//! Little-endian sample codecs over raw byte buffers
//!
//! Streams exchange raw bytes; float samples are always decoded and encoded
//! explicitly as little-endian IEEE 754 values.

/// Bytes of one 32-bit float sample
pub const F32_SIZE: usize = 4;

/// Decodes the float sample at `index`
#[inline]
pub fn f32_at(bytes: &[u8], index: usize) -> f32 {
    let o = index * F32_SIZE;
    f32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]])
}

/// Encodes `value` as the float sample at `index`
#[inline]
pub fn put_f32(bytes: &mut [u8], index: usize, value: f32) {
    let o = index * F32_SIZE;
    bytes[o..o + F32_SIZE].copy_from_slice(&value.to_le_bytes());
}

/// Decodes all complete float samples of `bytes` into `out`, replacing its contents
pub fn decode_f32(bytes: &[u8], out: &mut Vec<f32>) {
    out.clear();
    out.extend(
        bytes
            .chunks_exact(F32_SIZE)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
}

/// Encodes `samples` into the front of `bytes`
pub fn encode_f32(samples: &[f32], bytes: &mut [u8]) {
    for (chunk, sample) in bytes.chunks_exact_mut(F32_SIZE).zip(samples) {
        chunk.copy_from_slice(&sample.to_le_bytes());
    }
}

/// Adds the float samples of `src` onto the float samples of `dst`
pub fn mix_f32(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst
        .chunks_exact_mut(F32_SIZE)
        .zip(src.chunks_exact(F32_SIZE))
    {
        let sum = f32::from_le_bytes([d[0], d[1], d[2], d[3]])
            + f32::from_le_bytes([s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&sum.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_is_little_endian() {
        let mut bytes = [0u8; 8];
        put_f32(&mut bytes, 1, 1.0);
        assert_eq!(&bytes[4..], &[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(f32_at(&bytes, 1), 1.0);
    }

    #[test]
    fn test_mix_adds_samples() {
        let mut dst = [0u8; 8];
        let mut src = [0u8; 8];
        encode_f32(&[0.25, -0.5], &mut dst);
        encode_f32(&[0.5, 0.25], &mut src);
        mix_f32(&mut dst, &src);

        let mut out = Vec::new();
        decode_f32(&dst, &mut out);
        assert_eq!(out, vec![0.75, -0.25]);
    }
}
