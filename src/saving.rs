use crate::dataset::TabularDataset;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bincode::{deserialize_from, serialize_into};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fmt;

/// Errors raised while packing or unpacking a stored dataset
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Bincode(bincode::Error),
    Base64(base64::DecodeError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "compression failed: {}", e),
            StoreError::Bincode(e) => write!(f, "invalid stored dataset: {}", e),
            StoreError::Base64(e) => write!(f, "invalid stored dataset token: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Bincode(e) => Some(e),
            StoreError::Base64(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Bincode(e)
    }
}

impl From<base64::DecodeError> for StoreError {
    fn from(e: base64::DecodeError) -> Self {
        StoreError::Base64(e)
    }
}

/// Packs a dataset into a text token the browser can hold on to
///
/// The dataset is serialized with bincode, gzip compressed and encoded as
/// URL-safe base64 without padding.
///
/// # Arguments
/// * `dataset` - The dataset to pack
///
/// # Returns
/// * `Result<String, StoreError>` - The token or an error
pub fn encode_dataset(dataset: &TabularDataset) -> Result<String, StoreError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serialize_into(&mut encoder, dataset)?;
    let compressed = encoder.finish()?;

    Ok(URL_SAFE_NO_PAD.encode(compressed))
}

/// Unpacks a token produced by [`encode_dataset`]
pub fn decode_dataset(token: &str) -> Result<TabularDataset, StoreError> {
    let compressed = URL_SAFE_NO_PAD.decode(token.trim())?;
    let mut reader = std::io::BufReader::new(GzDecoder::new(compressed.as_slice()));

    let dataset: TabularDataset = deserialize_from(&mut reader)?;
    Ok(dataset)
}
