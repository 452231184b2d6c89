use std::fmt::Write;

use bson::Bson;

pub fn get_bit_u32(input: u32, digit: u8) -> bool {
    if digit < 32 {
        input & (1u32 << (digit as u32)) != 0
    } else {
        false
    }
}

pub fn set_bit_u32(int: &mut u32, digit: u8, value: bool) {
    if value {
        *int |= 1u32 << (digit as u32);
    } else {
        *int &= !(1u32 << (digit as u32));
    }
}

/// Servers answer counts as int32, int64 or double depending on version.
pub fn bson_as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(number) => Some(*number as i64),
        Bson::Int64(number) => Some(*number),
        Bson::Double(number) if number.fract() == 0.0 => Some(*number as i64),
        _ => None,
    }
}

/**
Render a byte array like this:
0000 | 0d 01 00 00 00 00 00 00 00 00 00 00 d4 07 00 00
0010 | 00 00 00 00 61 64 6d 69 6e 2e 24 63 6d 64 00 00
**/
pub fn hex_dump(buffer: &[u8]) -> String {
    let mut output = String::with_capacity(buffer.len() * 3 + buffer.len() / 16 * 8);
    for (i, byte) in buffer.iter().enumerate() {
        if i % 16 == 0 {
            if i > 0 {
                output.push('\n');
            }
            let _ = write!(output, "{:04x} | ", i);
        }
        let _ = write!(output, "{:02x} ", byte);
    }
    output
}

#[cfg(test)]
mod utils_test {
    use bson::Bson;

    use crate::utils::{bson_as_i64, get_bit_u32, hex_dump, set_bit_u32};

    #[test]
    fn test_get_bit_u32() {
        for digit in 0..32 {
            assert_eq!(get_bit_u32(0, digit), false);
            assert_eq!(get_bit_u32(std::u32::MAX, digit), true);
        }
        assert_eq!(get_bit_u32(std::u32::MAX, 100), false);
    }

    #[test]
    fn test_set_bit_u32() {
        let mut data = 0u32;

        for i in 0..32 {
            set_bit_u32(&mut data, i, true);
        }
        assert_eq!(data, std::u32::MAX);

        for i in 0..32 {
            set_bit_u32(&mut data, i, false);
        }
        assert_eq!(data, 0);
    }

    #[test]
    fn test_bson_as_i64() {
        assert_eq!(bson_as_i64(&Bson::Int32(100)), Some(100));
        assert_eq!(bson_as_i64(&Bson::Int64(1 << 40)), Some(1 << 40));
        assert_eq!(bson_as_i64(&Bson::Double(150.0)), Some(150));
        assert_eq!(bson_as_i64(&Bson::Double(1.5)), None);
        assert_eq!(bson_as_i64(&Bson::String("1".to_string())), None);
    }

    #[test]
    fn test_hex_dump() {
        let buffer: Vec<u8> = (0u8..18).collect();
        assert_eq!(
            hex_dump(&buffer),
            "0000 | 00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f \n0010 | 10 11 "
        );
    }
}
