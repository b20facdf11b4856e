//! CRC-16 and XOR checksums over 32-bit record words
//!
//! The FEE trailer CRC is CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no
//! reflection). Words are fed most-significant byte first regardless of the
//! host byte order the record is stored in.

use crate::common::DecodeError;

/// CRC-16 polynomial
pub const CRC16_POLY: u16 = 0x1021;

/// Seed for a fresh CRC computation
pub const CRC16_SEED: u16 = 0xFFFF;

/// Lookup table for polynomial 0x1021, built at compile time
pub const CRC16_TABLE: [u16; 256] = {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut j = 0;
        while j < 8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ CRC16_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
};

#[inline]
fn crc16_update_byte(crc: u16, byte: u8) -> u16 {
    CRC16_TABLE[((crc >> 8) ^ byte as u16) as usize] ^ (crc << 8)
}

/// CRC-16 over a byte slice, continuing from `seed`
pub fn crc16_bytes(seed: u16, data: &[u8]) -> u16 {
    data.iter().fold(seed, |crc, &b| crc16_update_byte(crc, b))
}

/// CRC-16 over 32-bit words, continuing from `seed`
pub fn crc16_words(seed: u16, words: &[u32]) -> u16 {
    words.iter().fold(seed, |crc, w| {
        w.to_be_bytes()
            .iter()
            .fold(crc, |crc, &b| crc16_update_byte(crc, b))
    })
}

/// CRC-16 over the first `nwords` words of `words`
///
/// The word count comes from header arithmetic, so it is validated here:
/// negative counts and counts past the end of the slice are errors.
pub fn crc16_words_checked(seed: u16, words: &[u32], nwords: i64) -> Result<u16, DecodeError> {
    if nwords < 0 {
        return Err(DecodeError::NegativeWordCount(nwords));
    }
    let n = nwords as usize;
    if n > words.len() {
        return Err(DecodeError::CrcRangeOverrun {
            requested: n,
            available: words.len(),
        });
    }
    Ok(crc16_words(seed, &words[..n]))
}

/// Incremental CRC-16 calculator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    state: u16,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    /// Create a calculator seeded with 0xFFFF
    pub fn new() -> Self {
        Self::with_seed(CRC16_SEED)
    }

    /// Create a calculator continuing from an earlier value
    pub fn with_seed(seed: u16) -> Self {
        Self { state: seed }
    }

    /// Feed one word
    pub fn update_word(&mut self, word: u32) -> &mut Self {
        self.state = crc16_words(self.state, std::slice::from_ref(&word));
        self
    }

    /// Feed a run of words
    pub fn update(&mut self, words: &[u32]) -> &mut Self {
        self.state = crc16_words(self.state, words);
        self
    }

    /// Current CRC value
    pub fn value(&self) -> u16 {
        self.state
    }
}

/// Word-wise XOR checksum
pub fn xor_checksum(words: &[u32]) -> u32 {
    words.iter().fold(0, |acc, w| acc ^ w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_first_entries() {
        assert_eq!(CRC16_TABLE[0], 0x0000);
        assert_eq!(CRC16_TABLE[1], 0x1021);
        assert_eq!(CRC16_TABLE[2], 0x2042);
        assert_eq!(CRC16_TABLE[255], 0x1EF0);
    }

    #[test]
    fn test_ccitt_false_check_value() {
        assert_eq!(crc16_bytes(CRC16_SEED, b"123456789"), 0x29B1);
    }

    #[test]
    fn test_words_are_fed_msb_first() {
        let words = [0x3132_3334u32, 0x3536_3738];
        assert_eq!(
            crc16_words(CRC16_SEED, &words),
            crc16_bytes(CRC16_SEED, b"12345678")
        );
    }

    #[test]
    fn test_crc_is_deterministic() {
        let words = [0xDEAD_BEEFu32, 0x1234_5678, 0, 0xFFFF_FFFF];
        assert_eq!(crc16_words(CRC16_SEED, &words), crc16_words(CRC16_SEED, &words));
    }

    #[test]
    fn test_single_bit_flip_changes_crc() {
        let words = [0xDEAD_BEEFu32, 0x1234_5678];
        let mut flipped = words;
        flipped[1] ^= 0x0000_0100;
        assert_ne!(crc16_words(CRC16_SEED, &words), crc16_words(CRC16_SEED, &flipped));
    }

    #[test]
    fn test_chained_equals_single_pass() {
        let words = [1u32, 2, 3, 4, 5];
        let first = crc16_words(CRC16_SEED, &words[..2]);
        let chained = crc16_words(first, &words[2..]);
        assert_eq!(chained, crc16_words(CRC16_SEED, &words));

        let mut calc = Crc16::new();
        calc.update_word(1).update_word(2).update(&words[2..]);
        assert_eq!(calc.value(), chained);
    }

    #[test]
    fn test_empty_input_returns_seed() {
        assert_eq!(crc16_words(CRC16_SEED, &[]), CRC16_SEED);
        assert_eq!(Crc16::default().value(), CRC16_SEED);
    }

    #[test]
    fn test_checked_rejects_negative_count() {
        let result = crc16_words_checked(CRC16_SEED, &[1, 2, 3], -1);
        assert_eq!(result, Err(DecodeError::NegativeWordCount(-1)));
    }

    #[test]
    fn test_checked_rejects_overrun() {
        let result = crc16_words_checked(CRC16_SEED, &[1, 2, 3], 4);
        assert!(matches!(result, Err(DecodeError::CrcRangeOverrun { .. })));
    }

    #[test]
    fn test_checked_partial_range() {
        let words = [7u32, 8, 9];
        assert_eq!(
            crc16_words_checked(CRC16_SEED, &words, 2).unwrap(),
            crc16_words(CRC16_SEED, &words[..2])
        );
    }

    #[test]
    fn test_xor_checksum() {
        assert_eq!(xor_checksum(&[]), 0);
        assert_eq!(xor_checksum(&[0xF0F0_F0F0, 0x0F0F_0F0F]), 0xFFFF_FFFF);
        assert_eq!(xor_checksum(&[0x1234_5678, 0x1234_5678]), 0);
    }
}
