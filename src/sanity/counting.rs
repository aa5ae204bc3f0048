//! Incrementing-integer detection.
//!
//! Catches the classic programming error where an array index or loop
//! counter ends up in the output instead of bytes from a random
//! source. The buffer is reinterpreted as integers of width 1, 2, 4
//! and 8 bytes, in both byte orders, and flagged if any interpretation
//! is a strictly incrementing sequence.

/// Integer widths tried by the detector, in bytes.
const WIDTHS: [usize; 4] = [1, 2, 4, 8];

/// Evidence required beyond the seed value, in bytes.
///
/// One seed integer plus 64 bits of confirming data keeps each
/// width/endianness combination at a 2^-64 false-positive rate.
const EVIDENCE_BYTES: usize = 8;

/// Returns the integer width (in bytes) of a detected counting
/// pattern, or `None` if no interpretation counts up.
pub(crate) fn counting(b: &[u8]) -> Option<usize> {
    for width in WIDTHS {
        let hit = match width {
            1 => incrementing(b, 1, |c| u64::from(c[0])),
            2 => {
                incrementing(b, 2, |c| u64::from(u16::from_le_bytes([c[0], c[1]])))
                    || incrementing(b, 2, |c| u64::from(u16::from_be_bytes([c[0], c[1]])))
            }
            4 => {
                incrementing(b, 4, |c| {
                    u64::from(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                }) || incrementing(b, 4, |c| {
                    u64::from(u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                })
            }
            _ => {
                incrementing(b, 8, |c| {
                    u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                }) || incrementing(b, 8, |c| {
                    u64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
                })
            }
        };
        if hit {
            return Some(width);
        }
    }
    None
}

/// Tests one width/decoder combination.
///
/// Decodes the first integer as the seed; every subsequent integer at
/// index `i` must equal `seed + i` (wrapping, matching fixed-width
/// integer overflow in the source under test). Trailing bytes that do
/// not fill a whole integer are ignored.
fn incrementing(b: &[u8], width: usize, decode: impl Fn(&[u8]) -> u64) -> bool {
    // One seed value plus the evidence requirement.
    if b.len() < width + EVIDENCE_BYTES {
        return false;
    }
    let first = decode(&b[..width]);
    for (i, chunk) in b.chunks_exact(width).enumerate().skip(1) {
        if decode(chunk) != first.wrapping_add(i as u64) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_counter() {
        assert_eq!(counting(&[1, 2, 3, 4, 5, 6, 7, 8, 9]), Some(1));
        // One byte short of the evidence requirement.
        assert_eq!(counting(&[1, 2, 3, 4, 5, 6, 7, 8]), None);
    }

    #[test]
    fn test_seed_is_arbitrary() {
        assert_eq!(
            counting(&[0x18, 0x19, 0x1a, 0x1b, 0x1c, 0x1d, 0x1e, 0x1f, 0x20]),
            Some(1)
        );
    }

    #[test]
    fn test_u16_both_orders() {
        let be: Vec<u8> = [0u16, 1, 2, 3, 4]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        assert_eq!(counting(&be), Some(2));

        let le: Vec<u8> = [0x9991u16, 0x9992, 0x9993, 0x9994, 0x9995]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(counting(&le), Some(2));
    }

    #[test]
    fn test_u64_wraps() {
        // A counter crossing a carry boundary still counts.
        let be: Vec<u8> = [0x4edc2837e54241ffu64, 0x4edc2837e5424200]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        assert_eq!(counting(&be), Some(8));

        let wrap: Vec<u8> = [u64::MAX, 0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(counting(&wrap), Some(8));
    }

    #[test]
    fn test_mismatch_aborts() {
        assert_eq!(counting(&[1, 2, 3, 4, 9, 6, 7, 8, 9]), None);
    }

    #[test]
    fn test_partial_trailing_integer_ignored() {
        // 17 bytes: two full u64 values plus one dangling byte.
        let mut b: Vec<u8> = [100u64, 101]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        b.push(0xc3);
        assert_eq!(counting(&b), Some(8));
    }
}
