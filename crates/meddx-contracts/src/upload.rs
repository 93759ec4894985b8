use std::fmt;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Image formats accepted at upload time.
///
/// `jpg` and `jpeg` stay distinct so the staged buffer keeps the extension the
/// user supplied; both share the `image/jpeg` media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Jpg,
    Jpeg,
    Png,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported image format '{extension}' (expected jpg, jpeg, or png)")]
pub struct UnsupportedFormat {
    pub extension: String,
}

impl ImageFormat {
    pub fn from_extension(raw: &str) -> Result<Self, UnsupportedFormat> {
        let normalized = raw.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "jpg" => Ok(Self::Jpg),
            "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            _ => Err(UnsupportedFormat {
                extension: raw.trim().to_string(),
            }),
        }
    }

    pub fn from_file_name(name: &str) -> Result<Self, UnsupportedFormat> {
        let extension = Path::new(name)
            .extension()
            .and_then(|value| value.to_str())
            .unwrap_or_default();
        Self::from_extension(extension)
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpg | Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Raw image bytes plus the format declared by the uploader.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub file_name: String,
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, UnsupportedFormat> {
        let file_name = file_name.into();
        let format = ImageFormat::from_file_name(&file_name)?;
        Ok(Self {
            file_name,
            format,
            bytes,
        })
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

impl fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedImage")
            .field("file_name", &self.file_name)
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn data_url(bytes: &[u8], format: ImageFormat) -> String {
    format!("data:{};base64,{}", format.mime_type(), BASE64.encode(bytes))
}
