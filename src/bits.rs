//! Bit cursors shared by the field codec.
//!
//! Everything is packed MSB-first: the first bit written lands in the high
//! bit of the first byte, which matches network bit order for sub-byte
//! header fields such as the IPv4 version/IHL nibbles.

#[derive(Debug, Default, Clone)]
pub(crate) struct BitWriter {
    buf: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bits
    }

    /// Length in whole bytes, counting a partially filled last byte.
    pub fn byte_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_aligned(&self) -> bool {
        self.bits % 8 == 0
    }

    pub fn push_bits(&mut self, value: u64, width: u32) {
        for i in (0..width).rev() {
            if self.bits % 8 == 0 {
                self.buf.push(0);
            }
            if (value >> i) & 1 == 1 {
                let last = self.buf.len() - 1;
                self.buf[last] |= 0x80 >> (self.bits % 8);
            }
            self.bits += 1;
        }
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        if self.is_aligned() {
            self.buf.extend_from_slice(bytes);
            self.bits += bytes.len() * 8;
        } else {
            for byte in bytes {
                self.push_bits(u64::from(*byte), 8);
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug, Clone)]
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position in bits.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    pub fn remaining_bytes(&self) -> usize {
        self.remaining_bits() / 8
    }

    pub fn read_bits(&mut self, width: u32) -> Option<u64> {
        if self.remaining_bits() < width as usize {
            return None;
        }
        let value = read_bits(self.data, self.pos, width as usize);
        self.pos += width as usize;
        Some(value)
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<Vec<u8>> {
        match n.checked_mul(8) {
            Some(bits) if bits <= self.remaining_bits() => {}
            _ => return None,
        }
        let bytes = if self.pos % 8 == 0 {
            let start = self.pos / 8;
            self.data[start..start + n].to_vec()
        } else {
            (0..n)
                .map(|i| read_bits(self.data, self.pos + i * 8, 8) as u8)
                .collect()
        };
        self.pos += n * 8;
        Some(bytes)
    }
}

fn read_bits(data: &[u8], offset: usize, width: usize) -> u64 {
    (offset..offset + width).fold(0u64, |acc, bit| {
        let set = (data[bit / 8] >> (7 - bit % 8)) & 1;
        (acc << 1) | u64::from(set)
    })
}

/// Overwrites `width` bits of `dst` starting at bit `dst_offset` with the
/// leading `width` bits of `src`.
pub(crate) fn copy_bits(dst: &mut [u8], dst_offset: usize, src: &[u8], width: usize) {
    for i in 0..width {
        let set = (src[i / 8] >> (7 - i % 8)) & 1 == 1;
        let bit = dst_offset + i;
        let mask = 0x80 >> (bit % 8);
        if set {
            dst[bit / 8] |= mask;
        } else {
            dst[bit / 8] &= !mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_byte_fields_share_a_byte() {
        let mut writer = BitWriter::new();
        writer.push_bits(4, 4);
        writer.push_bits(5, 4);
        writer.push_bits(0xABCD, 16);
        assert!(writer.is_aligned());
        assert_eq!(writer.as_bytes(), &[0x45, 0xAB, 0xCD]);

        let mut reader = BitReader::new(writer.as_bytes());
        assert_eq!(reader.read_bits(4), Some(4));
        assert_eq!(reader.read_bits(4), Some(5));
        assert_eq!(reader.read_bits(16), Some(0xABCD));
        assert_eq!(reader.read_bits(1), None);
    }

    #[test]
    fn test_unaligned_bytes() {
        let mut writer = BitWriter::new();
        writer.push_bits(1, 1);
        writer.push_bytes(&[0xFF]);
        writer.push_bits(0, 7);
        assert_eq!(writer.as_bytes(), &[0xFF, 0x80]);

        let mut reader = BitReader::new(writer.as_bytes());
        reader.read_bits(1);
        assert_eq!(reader.read_bytes(1), Some(vec![0xFF]));
    }

    #[test]
    fn test_copy_bits_patches_in_place() {
        let mut dst = [0x45, 0x00, 0xFF];
        copy_bits(&mut dst, 4, &[0xA0], 4);
        assert_eq!(dst, [0x4A, 0x00, 0xFF]);
        copy_bits(&mut dst, 8, &[0x12, 0x34], 16);
        assert_eq!(dst, [0x4A, 0x12, 0x34]);
    }
}
