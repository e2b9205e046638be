//! RFC 1071 Internet checksum.

/// Running one's-complement sum over 16-bit big-endian words.
///
/// Byte strings of odd length are padded with a zero byte, but only at the
/// end of each `add_bytes` call, so callers must feed odd chunks last.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checksum {
    sum: u64,
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&mut self, bytes: &[u8]) {
        let mut chunks = bytes.chunks_exact(2);
        for word in &mut chunks {
            self.sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
        }
        if let [last] = chunks.remainder() {
            self.sum += u64::from(*last) << 8;
        }
    }

    pub fn add_u16(&mut self, word: u16) {
        self.sum += u64::from(word);
    }

    pub fn add_u32(&mut self, word: u32) {
        self.sum += u64::from(word >> 16) + u64::from(word & 0xFFFF);
    }

    /// Folds the carries and returns the complemented sum.
    pub fn finish(&self) -> u16 {
        let mut sum = self.sum;
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }
}

pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum = Checksum::new();
    sum.add_bytes(data);
    sum.finish()
}

/// True when `data`, checksum field included, sums to zero.
pub fn verify(data: &[u8]) -> bool {
    internet_checksum(data) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1071_example() {
        // Words from RFC 1071 section 3: sum 0xddf2, checksum 0x220d.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), 0x220d);
    }

    #[test]
    fn test_odd_length_pads_with_zero() {
        assert_eq!(internet_checksum(&[0xAB]), internet_checksum(&[0xAB, 0x00]));
    }

    #[test]
    fn test_known_ipv4_header() {
        let header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert!(verify(&header));
        let mut zeroed = header;
        zeroed[10] = 0;
        zeroed[11] = 0;
        assert_eq!(internet_checksum(&zeroed), 0xb861);
    }

    #[test]
    fn test_add_u32_matches_bytes() {
        let mut a = Checksum::new();
        a.add_u32(0xC0A8_0001);
        let mut b = Checksum::new();
        b.add_bytes(&[0xC0, 0xA8, 0x00, 0x01]);
        assert_eq!(a.finish(), b.finish());
    }
}
