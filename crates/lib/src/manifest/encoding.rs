//! Text decoding for source files.
//!
//! Files are UTF-8 unless they start with a UTF-16 byte-order mark, in which
//! case they are transcoded. A UTF-8 byte-order mark is stripped.

use super::NormalizeError;

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const UTF16_LE_BOM: [u8; 2] = [0xFF, 0xFE];
const UTF16_BE_BOM: [u8; 2] = [0xFE, 0xFF];

/// Decode raw file bytes into a string.
pub fn decode_text(bytes: &[u8]) -> Result<String, NormalizeError> {
  if let Some(rest) = bytes.strip_prefix(&UTF16_LE_BOM) {
    return decode_utf16(rest, u16::from_le_bytes);
  }
  if let Some(rest) = bytes.strip_prefix(&UTF16_BE_BOM) {
    return decode_utf16(rest, u16::from_be_bytes);
  }
  let bytes = bytes.strip_prefix(&UTF8_BOM).unwrap_or(bytes);
  String::from_utf8(bytes.to_vec()).map_err(|e| NormalizeError::Encoding(e.to_string()))
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> Result<String, NormalizeError> {
  if bytes.len() % 2 != 0 {
    return Err(NormalizeError::Encoding("odd number of bytes in UTF-16 text".to_string()));
  }
  let units = bytes.chunks_exact(2).map(|pair| to_unit([pair[0], pair[1]]));
  char::decode_utf16(units)
    .collect::<Result<String, _>>()
    .map_err(|e| NormalizeError::Encoding(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn utf16(text: &str, little_endian: bool) -> Vec<u8> {
    let mut bytes = if little_endian {
      UTF16_LE_BOM.to_vec()
    } else {
      UTF16_BE_BOM.to_vec()
    };
    for unit in text.encode_utf16() {
      let pair = if little_endian {
        unit.to_le_bytes()
      } else {
        unit.to_be_bytes()
      };
      bytes.extend_from_slice(&pair);
    }
    bytes
  }

  #[test]
  fn plain_utf8() {
    assert_eq!(decode_text(b"kind: Service\n").unwrap(), "kind: Service\n");
  }

  #[test]
  fn strips_utf8_bom() {
    let mut bytes = UTF8_BOM.to_vec();
    bytes.extend_from_slice(b"kind: Service\n");
    assert_eq!(decode_text(&bytes).unwrap(), "kind: Service\n");
  }

  #[test]
  fn utf16_little_endian() {
    let text = "kind: ConfigMap\nmetadata:\n  name: ünïcode\n";
    assert_eq!(decode_text(&utf16(text, true)).unwrap(), text);
  }

  #[test]
  fn utf16_big_endian() {
    let text = "kind: ConfigMap\n";
    assert_eq!(decode_text(&utf16(text, false)).unwrap(), text);
  }

  #[test]
  fn truncated_utf16_is_error() {
    let mut bytes = utf16("kind: ConfigMap\n", true);
    bytes.push(0x00);
    assert!(matches!(decode_text(&bytes), Err(NormalizeError::Encoding(_))));
  }

  #[test]
  fn invalid_utf8_is_error() {
    assert!(matches!(decode_text(&[0x6b, 0xC3, 0x28]), Err(NormalizeError::Encoding(_))));
  }
}
