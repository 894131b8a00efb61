use thiserror::Error;

/// Failure while decoding a postings byte stream. Any of these means the
/// on-disk block is corrupt; the affected term becomes unreadable but the
/// rest of the segment stays usable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The byte stream ended in the middle of an encoded integer.
    #[error("byte stream truncated inside an encoded integer")]
    Truncated,
    /// A decoded value or a gap-restored doc id does not fit in 32 bits.
    #[error("decoded value overflows u32")]
    Overflow,
    /// A postings block decoded to a different number of entries than the
    /// term dictionary recorded for it.
    #[error("postings block holds {found} entries, dictionary says {expected}")]
    CountMismatch { expected: u32, found: usize },
}

/// Encoding used for the integer sequences inside a postings file.
///
/// `Vbe` is the production choice: big-endian base-128 digits where the
/// most significant bit marks the final byte of a number, so zero encodes
/// as the single byte `0x80`. `Standard` serializes every integer as a
/// fixed 4-byte big-endian value and exists as the uncompressed baseline.
///
/// Doc-id runs are gap-coded before encoding; term frequencies are encoded
/// raw. The segment writer and reader never assume a byte width, they go
/// through these methods only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Standard,
    Vbe,
}

impl Codec {
    /// The tag persisted in a segment sidecar, used to verify that a
    /// reader opens the file with the codec it was written with.
    pub fn tag(&self) -> &'static str {
        match self {
            Codec::Standard => "std",
            Codec::Vbe => "vbe",
        }
    }

    /// Inverse of [`Codec::tag`].
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "std" => Some(Codec::Standard),
            "vbe" => Some(Codec::Vbe),
            _ => None,
        }
    }

    /// Appends the encoding of `values` to `out`, without gap coding.
    pub fn encode_seq(&self, values: &[u32], out: &mut Vec<u8>) {
        match self {
            Codec::Standard => {
                for &v in values {
                    out.extend_from_slice(&v.to_be_bytes());
                }
            }
            Codec::Vbe => {
                for &v in values {
                    encode_vbyte(v, out);
                }
            }
        }
    }

    /// Decodes an entire byte slice back into the integer sequence it was
    /// encoded from.
    pub fn decode_seq(&self, bytes: &[u8]) -> Result<Vec<u32>, DecodeError> {
        match self {
            Codec::Standard => {
                if bytes.len() % 4 != 0 {
                    return Err(DecodeError::Truncated);
                }
                Ok(bytes
                    .chunks_exact(4)
                    .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect())
            }
            Codec::Vbe => decode_vbytes(bytes),
        }
    }

    /// Gap-codes a strictly ascending sequence and appends its encoding to
    /// `out`: the first value raw, then successive differences.
    ///
    /// Passing a sequence that is not strictly ascending is a caller bug.
    pub fn encode_gaps(&self, values: &[u32], out: &mut Vec<u8>) {
        let mut gaps = Vec::with_capacity(values.len());
        let mut prev = None;
        for &v in values {
            match prev {
                None => gaps.push(v),
                Some(p) => {
                    assert!(v > p, "gap-coded sequence must be strictly ascending");
                    gaps.push(v - p);
                }
            }
            prev = Some(v);
        }
        self.encode_seq(&gaps, out);
    }

    /// Inverse of [`Codec::encode_gaps`]: decodes and restores the original
    /// ascending values by running sum.
    pub fn decode_gaps(&self, bytes: &[u8]) -> Result<Vec<u32>, DecodeError> {
        let mut values = self.decode_seq(bytes)?;
        let mut prev: u32 = 0;
        for (i, v) in values.iter_mut().enumerate() {
            if i > 0 {
                *v = prev.checked_add(*v).ok_or(DecodeError::Overflow)?;
            }
            prev = *v;
        }
        Ok(values)
    }
}

fn encode_vbyte(mut n: u32, out: &mut Vec<u8>) {
    // u32 needs at most five base-128 digits
    let mut digits = [0u8; 5];
    let mut i = digits.len();
    loop {
        i -= 1;
        digits[i] = (n % 128) as u8;
        n /= 128;
        if n == 0 {
            break;
        }
    }
    digits[4] += 128;
    out.extend_from_slice(&digits[i..]);
}

fn decode_vbytes(bytes: &[u8]) -> Result<Vec<u32>, DecodeError> {
    let mut values = Vec::new();
    let mut n: u64 = 0;
    let mut mid_number = false;
    for &byte in bytes {
        n = n.checked_mul(128).ok_or(DecodeError::Overflow)?;
        if byte < 128 {
            n += u64::from(byte);
            mid_number = true;
        } else {
            n += u64::from(byte - 128);
            values.push(u32::try_from(n).map_err(|_| DecodeError::Overflow)?);
            n = 0;
            mid_number = false;
        }
        if n > u64::from(u32::MAX) {
            return Err(DecodeError::Overflow);
        }
    }
    if mid_number {
        return Err(DecodeError::Truncated);
    }
    Ok(values)
}
