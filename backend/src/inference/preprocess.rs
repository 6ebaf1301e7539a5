use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use ndarray::Array4;

pub const INPUT_SIZE: u32 = 224;
pub const CHANNELS: usize = 3;

const NORM_SCALE: f32 = 1. / 255.;

#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    #[error("Unrecognised image format")]
    UnknownFormat,
    #[error("Image has no pixels")]
    EmptyImage,
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Failed to read image: {0}")]
    Io(#[from] std::io::Error),
}

/// NHWC input of shape (1, 224, 224, 3), values in [0, 1].
#[derive(Debug, Clone)]
pub struct PreprocessedTensor(Array4<f32>);

impl PreprocessedTensor {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.0.shape();
        [s[0], s[1], s[2], s[3]]
    }

    #[cfg(test)]
    pub fn array(&self) -> &Array4<f32> {
        &self.0
    }

    /// Row-major copy of the tensor data.
    pub fn to_vec(&self) -> Vec<f32> {
        match self.0.as_slice() {
            Some(slice) => slice.to_vec(),
            None => self.0.iter().copied().collect(),
        }
    }
}

/// Decodes an upload. The header is verified by a first reader, and the
/// pixels are decoded by a second one opened at the start of the buffer.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
    let probe = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = probe.format().ok_or(PreprocessError::UnknownFormat)?;
    let (width, height) = probe.into_dimensions()?;
    if width == 0 || height == 0 {
        return Err(PreprocessError::EmptyImage);
    }

    let image = ImageReader::with_format(Cursor::new(bytes), format).decode()?;
    log::info!(
        "Decoded {:?} image: {}x{}, colour {:?}",
        format,
        image.width(),
        image.height(),
        image.color()
    );
    Ok(image)
}

pub fn preprocess(image: &DynamicImage) -> PreprocessedTensor {
    let rgb = image
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom)
        .to_rgb8();
    let side = INPUT_SIZE as usize;
    let tensor = Array4::from_shape_fn((1, side, side, CHANNELS), |(_, y, x, c)| {
        rgb.get_pixel(x as u32, y as u32)[c] as f32 * NORM_SCALE
    });
    PreprocessedTensor(tensor)
}

pub fn prepare(bytes: &[u8]) -> Result<PreprocessedTensor, PreprocessError> {
    let image = decode_image(bytes)?;
    Ok(preprocess(&image))
}
