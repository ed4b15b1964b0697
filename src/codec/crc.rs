//! CRC16-CCITT (polynomial 0x1021, no reflection, no final XOR).
//!
//! Z-Wave seeds the register with `0x1D0F` (CRC-16/AUG-CCITT). The
//! CCITT-FALSE seed `0xFFFF` is exposed for interop with test vectors.

/// Generator polynomial.
pub const CRC16_POLY: u16 = 0x1021;

/// Initial value used by Z-Wave frames (Transport Service, CRC16 encapsulation).
pub const CRC16_ZWAVE_INIT: u16 = 0x1D0F;

/// Initial value of CRC-16/CCITT-FALSE.
pub const CRC16_CCITT_FALSE_INIT: u16 = 0xFFFF;

/// Incremental CRC16-CCITT calculator.
///
/// Useful when the checksummed bytes are not contiguous, e.g. the CC header
/// plus a slice of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    register: u16,
}

impl Crc16 {
    /// Start a calculation with the Z-Wave seed.
    pub fn new() -> Self {
        Self::with_init(CRC16_ZWAVE_INIT)
    }

    /// Start a calculation with an explicit seed.
    pub fn with_init(init: u16) -> Self {
        Self { register: init }
    }

    /// Feed more bytes.
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        for &byte in data {
            self.register ^= (byte as u16) << 8;
            for _ in 0..8 {
                if self.register & 0x8000 != 0 {
                    self.register = (self.register << 1) ^ CRC16_POLY;
                } else {
                    self.register <<= 1;
                }
            }
        }
        self
    }

    /// Current checksum value.
    pub fn value(&self) -> u16 {
        self.register
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC16-CCITT over `data` starting from `init`.
pub fn crc16_ccitt(data: &[u8], init: u16) -> u16 {
    Crc16::with_init(init).update(data).value()
}

/// CRC16 as used on the Z-Wave wire.
pub fn zwave_crc16(data: &[u8]) -> u16 {
    crc16_ccitt(data, CRC16_ZWAVE_INIT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ccitt_false_check_value() {
        assert_eq!(crc16_ccitt(b"123456789", CRC16_CCITT_FALSE_INIT), 0x29B1);
    }

    #[test]
    fn test_aug_ccitt_check_value() {
        assert_eq!(zwave_crc16(b"123456789"), 0xE5CC);
    }

    #[test]
    fn test_empty_input_returns_seed() {
        assert_eq!(zwave_crc16(&[]), CRC16_ZWAVE_INIT);
        assert_eq!(crc16_ccitt(&[], CRC16_CCITT_FALSE_INIT), 0xFFFF);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data = hex::decode("98400102030405060708").unwrap();
        let mut crc = Crc16::new();
        crc.update(&data[..2]).update(&data[2..5]).update(&data[5..]);
        assert_eq!(crc.value(), zwave_crc16(&data));
    }

    #[test]
    fn test_security_header_reference_value() {
        let mut data = vec![0x98, 0x40];
        data.extend_from_slice(b"transport service payload");
        assert_eq!(crc16_ccitt(&data, CRC16_CCITT_FALSE_INIT), 0x4D70);
        assert_eq!(zwave_crc16(&data), 0xDE45);
    }

    #[test]
    fn test_single_bit_flip_changes_checksum() {
        let mut data = vec![0x98, 0x40];
        data.extend_from_slice(b"transport service payload");
        let reference = crc16_ccitt(&data, CRC16_CCITT_FALSE_INIT);

        for byte in 2..data.len() {
            for bit in 0..8 {
                let mut flipped = data.clone();
                flipped[byte] ^= 1 << bit;
                assert_ne!(crc16_ccitt(&flipped, CRC16_CCITT_FALSE_INIT), reference);
            }
        }
    }
}
