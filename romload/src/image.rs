//! Memory images.
//!
//! An image is the raw byte content of the i8080 address space starting at
//! address 0. The size travels in a 16-bit field, which caps an image at
//! 65535 bytes.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::MAX_IMAGE_LEN;

/// An immutable memory image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryImage {
    data: Vec<u8>,
}

impl MemoryImage {
    /// Wrap raw bytes, checking the size limit.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_IMAGE_LEN {
            return Err(Error::ImageTooLarge { len: data.len() });
        }
        Ok(Self { data })
    }

    /// Load an image file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading image from: {}", path.display());
        Self::from_bytes(fs::read(path)?)
    }

    /// Image bytes, address 0 first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bytes_limits() {
        assert_eq!(MemoryImage::from_bytes(vec![0; 0xFFFF]).unwrap().len(), 0xFFFF);
        assert!(matches!(
            MemoryImage::from_bytes(vec![0; 0x1_0000]),
            Err(Error::ImageTooLarge { len: 0x1_0000 })
        ));
        assert!(MemoryImage::from_bytes(Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn test_from_file_roundtrip_and_missing() {
        let path = std::env::temp_dir().join(format!("romload_image_{}.bin", std::process::id()));
        fs::write(&path, [0xC3, 0x00, 0x01]).unwrap();
        let image = MemoryImage::from_file(&path).unwrap();
        assert_eq!(image.as_bytes(), &[0xC3, 0x00, 0x01]);
        let _ = fs::remove_file(&path);

        assert!(matches!(MemoryImage::from_file(&path), Err(Error::Io(_))));
    }
}
