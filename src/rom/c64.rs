//! C64 `.prg` image loading: a 2-byte little-endian load address followed by
//! raw bytes, the standard convention for this format.

use crate::error::EmulatorError;

#[derive(Debug)]
pub struct C64Image {
    pub load_address: u16,
    pub data: Vec<u8>,
}

impl C64Image {
    pub fn parse(contents: &[u8]) -> Result<Self, EmulatorError> {
        if contents.len() < 2 {
            return Err(EmulatorError::InvalidC64Prg(
                "file is shorter than the 2-byte load address".into(),
            ));
        }
        let load_address = u16::from_le_bytes([contents[0], contents[1]]);
        Ok(C64Image {
            load_address,
            data: contents[2..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_load_address_and_body() {
        let bytes = vec![0x01, 0x08, 0xDE, 0xAD, 0xBE, 0xEF];
        let img = C64Image::parse(&bytes).unwrap();
        assert_eq!(img.load_address, 0x0801);
        assert_eq!(img.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn rejects_truncated_file() {
        assert!(C64Image::parse(&[0x01]).is_err());
    }
}
