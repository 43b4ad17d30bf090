//! This module contains utilities for decoding tile images received from a tile server.

use bytes::Bytes;

use crate::error::TileError;

/// An image that has been loaded into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    /// Raw bytes of the image, in RGBA order.
    pub(crate) bytes: Vec<u8>,
    /// Width and height of the image.
    pub(crate) dimensions: (u32, u32),
}

impl DecodedImage {
    /// Decode an image from a byte slice.
    ///
    /// Attempts to guess the format of the image from the data. Non-RGBA images
    /// will be converted to RGBA.
    pub fn decode(bytes: &[u8]) -> Result<Self, TileError> {
        use image::GenericImageView;
        let decoded = image::load_from_memory(bytes)?;
        let dimensions = decoded.dimensions();
        let bytes = decoded.to_rgba8();

        Ok(Self {
            bytes: bytes.into_vec(),
            dimensions,
        })
    }

    /// Creates an image from raw RGBA bytes.
    ///
    /// Returns an error if the length of `bytes` does not match the dimensions.
    pub fn from_raw(bytes: Vec<u8>, width: u32, height: u32) -> Result<Self, TileError> {
        let expected = width as usize * height as usize * 4;
        if bytes.len() != expected {
            return Err(TileError::Generic(format!(
                "invalid image buffer size: expected {expected} bytes, got {}",
                bytes.len()
            )));
        }

        Ok(Self {
            bytes,
            dimensions: (width, height),
        })
    }

    /// Width of the image in pixels.
    pub fn width(&self) -> u32 {
        self.dimensions.0
    }

    /// Height of the image in pixels.
    pub fn height(&self) -> u32 {
        self.dimensions.1
    }

    /// RGBA pixel data, row by row.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Turns raw bytes received from a tile server into an image.
pub trait TileDecoder: Send + Sync {
    /// Decodes the bytes of one tile.
    fn decode(&self, bytes: &Bytes) -> Result<DecodedImage, TileError>;
}

/// Default [`TileDecoder`] that supports PNG and JPEG tiles.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl TileDecoder for ImageDecoder {
    fn decode(&self, bytes: &Bytes) -> Result<DecodedImage, TileError> {
        DecodedImage::decode(bytes)
    }
}
