use std::convert::TryInto;

use bson::Document;

use crate::wire::error::{WireError, WireResult};

/// Smallest legal bson document: a 4-byte length and the trailing zero.
pub const MIN_BSON_DOCUMENT_SIZE: i32 = 5;

fn take<const N: usize>(buffer: &[u8]) -> WireResult<([u8; N], &[u8])> {
    if buffer.len() < N {
        return Err(WireError::NotEnoughBufferSize {
            needed: N,
            available: buffer.len(),
        });
    }
    let (head, rest) = buffer.split_at(N);
    // split_at guarantees the length
    let array: [u8; N] = head.try_into().map_err(|_| WireError::NotEnoughBufferSize {
        needed: N,
        available: head.len(),
    })?;
    Ok((array, rest))
}

pub fn parse_u32(buffer: &[u8]) -> WireResult<(u32, &[u8])> {
    let (bytes, rest) = take::<4>(buffer)?;
    Ok((u32::from_le_bytes(bytes), rest))
}

pub fn parse_i32(buffer: &[u8]) -> WireResult<(i32, &[u8])> {
    let (bytes, rest) = take::<4>(buffer)?;
    Ok((i32::from_le_bytes(bytes), rest))
}

pub fn parse_i64(buffer: &[u8]) -> WireResult<(i64, &[u8])> {
    let (bytes, rest) = take::<8>(buffer)?;
    Ok((i64::from_le_bytes(bytes), rest))
}

pub fn parse_cstring(buffer: &[u8]) -> WireResult<(String, &[u8])> {
    match buffer.iter().position(|&r| r == b'\0') {
        None => Err(WireError::NoZeroTrailingInCstringBuffer),
        Some(terminal_index) => {
            let value = std::str::from_utf8(&buffer[..terminal_index])
                .map_err(|_| WireError::CstringInvalidUtf8)?;
            Ok((value.to_string(), &buffer[terminal_index + 1..]))
        }
    }
}

pub fn parse_bson_document(buffer: &[u8]) -> WireResult<(Document, &[u8])> {
    let (bson_size, _) = parse_i32(buffer)?;
    if bson_size < MIN_BSON_DOCUMENT_SIZE {
        return Err(WireError::InvalidDocumentSize(bson_size));
    }
    let bson_size = bson_size as usize;
    if bson_size > buffer.len() {
        return Err(WireError::NotEnoughBufferSize {
            needed: bson_size,
            available: buffer.len(),
        });
    }
    let document = Document::from_reader(&mut &buffer[..bson_size])?;
    Ok((document, &buffer[bson_size..]))
}

/// Reads documents until the buffer is used up.
pub fn parse_bson_documents(mut buffer: &[u8]) -> WireResult<Vec<Document>> {
    let mut documents = vec![];
    while !buffer.is_empty() {
        let (document, rest) = parse_bson_document(buffer)?;
        documents.push(document);
        buffer = rest;
    }
    Ok(documents)
}

pub fn ensure_consumed(buffer: &[u8]) -> WireResult<()> {
    if buffer.is_empty() {
        Ok(())
    } else {
        Err(WireError::TrailingBytes(buffer.len()))
    }
}

pub fn serialize_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

pub fn serialize_i32(buffer: &mut Vec<u8>, value: i32) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

pub fn serialize_i64(buffer: &mut Vec<u8>, value: i64) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

pub fn serialize_cstring(buffer: &mut Vec<u8>, value: &str) -> WireResult<()> {
    if value.as_bytes().contains(&b'\0') {
        return Err(WireError::CstringContainZeroByte);
    }
    buffer.extend_from_slice(value.as_bytes());
    buffer.push(b'\0');
    Ok(())
}

pub fn serialize_bson_document(buffer: &mut Vec<u8>, document: &Document) -> WireResult<()> {
    document.to_writer(buffer)?;
    Ok(())
}

#[cfg(test)]
mod wire_utils_tests {
    use bson::doc;

    use super::*;

    #[test]
    fn test_parse_u32() {
        let (num, rest) = parse_u32(&[0x0d, 0x01, 0x00, 0x00, 0xff]).unwrap();
        assert_eq!(269, num);
        assert_eq!(rest, &[0xff]);
    }

    #[test]
    fn test_parse_u32_error() {
        match parse_u32(&[0x0d]) {
            Err(WireError::NotEnoughBufferSize { needed, available }) => {
                assert_eq!(needed, 4);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_parse_i64_negative() {
        let bytes = (-2i64).to_le_bytes();
        let (num, rest) = parse_i64(&bytes).unwrap();
        assert_eq!(num, -2);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_parse_cstring() {
        let buffer = b"admin.$cmd\0\x01";
        let (value, rest) = parse_cstring(buffer).unwrap();
        assert_eq!(value, "admin.$cmd");
        assert_eq!(rest, &[0x01]);
    }

    #[test]
    fn test_parse_cstring_error() {
        let buffer = [0x70, 0x70, 0x6c, 0x69];
        assert!(parse_cstring(&buffer).is_err());
    }

    #[test]
    fn test_serialize_cstring_rejects_interior_zero() {
        let mut buffer = vec![];
        assert!(serialize_cstring(&mut buffer, "te\0st").is_err());
    }

    #[test]
    fn test_bson_document_keeps_key_order() {
        let document = doc! { "z": 1, "a": { "nested": [1, 2, 3] }, "m": "text" };
        let mut buffer = vec![];
        serialize_bson_document(&mut buffer, &document).unwrap();
        buffer.push(0x42);
        let (parsed, rest) = parse_bson_document(&buffer).unwrap();
        assert_eq!(parsed, document);
        let keys: Vec<&String> = parsed.keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(rest, &[0x42]);
    }

    #[test]
    fn test_bson_document_truncated() {
        let document = doc! { "name": "value" };
        let mut buffer = vec![];
        serialize_bson_document(&mut buffer, &document).unwrap();
        buffer.truncate(buffer.len() - 2);
        assert!(parse_bson_document(&buffer).is_err());
    }

    #[test]
    fn test_bson_document_undersized() {
        let buffer = [0x02, 0x00, 0x00, 0x00, 0x00];
        match parse_bson_document(&buffer) {
            Err(WireError::InvalidDocumentSize(2)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }
}
