//! CRC-8/SAE-J1850 checksum shared by every frame on the interceptor bus.
//!
//! Polynomial 0x1D, initial value 0xFF, final XOR 0xFF, no reflection.
//! The checksum always lives in byte 0 of a frame and covers a fixed
//! window of the bytes that follow it.

/// CRC polynomial (x^8 + x^4 + x^3 + x^2 + 1)
pub const CRC8_POLY: u8 = 0x1D;

/// Initial register value
pub const CRC8_INIT: u8 = 0xFF;

/// Value XORed into the register after the last byte
pub const CRC8_XOR_OUT: u8 = 0xFF;

/// Lookup table generated at compile time
const CRC8_TABLE: [u8; 256] = build_table(CRC8_POLY);

const fn build_table(poly: u8) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ poly
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the checksum of `bytes`.
pub fn compute(bytes: &[u8]) -> u8 {
    let crc = bytes
        .iter()
        .fold(CRC8_INIT, |crc, &b| CRC8_TABLE[(crc ^ b) as usize]);
    crc ^ CRC8_XOR_OUT
}

/// Check byte 0 of `frame` against the checksum of `frame[1..end]`.
///
/// Returns `false` when the frame is too short to hold the covered window.
pub fn verify(frame: &[u8], end: usize) -> bool {
    match (frame.first(), frame.get(1..end)) {
        (Some(&stored), Some(body)) => compute(body) == stored,
        _ => false,
    }
}

/// Fill byte 0 of `frame` with the checksum of `frame[1..end]`.
pub fn seal(frame: &mut [u8], end: usize) {
    if let Some(body) = frame.get(1..end) {
        let crc = compute(body);
        frame[0] = crc;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_check_value() {
        // CRC-8/SAE-J1850 catalogue check value
        assert_eq!(compute(b"123456789"), 0x4B);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(compute(&[]), CRC8_INIT ^ CRC8_XOR_OUT);
    }

    #[test]
    fn test_seal_then_verify() {
        let mut frame = [0u8, 0x64, 0x00, 0x9C, 0xFF, 0x81];
        seal(&mut frame, 6);
        assert!(verify(&frame, 6));

        frame[0] ^= 0x01;
        assert!(!verify(&frame, 6));
    }

    #[test]
    fn test_verify_short_frame() {
        assert!(!verify(&[], 6));
        assert!(!verify(&[0x12, 0x34], 6));
    }

    proptest! {
        #[test]
        fn prop_single_bit_errors_detected(
            body in proptest::array::uniform5(any::<u8>()),
            byte in 1usize..6,
            bit in 0u8..8,
        ) {
            let mut frame = [0u8; 6];
            frame[1..].copy_from_slice(&body);
            seal(&mut frame, 6);
            prop_assert!(verify(&frame, 6));

            frame[byte] ^= 1 << bit;
            prop_assert!(!verify(&frame, 6));
        }
    }
}
