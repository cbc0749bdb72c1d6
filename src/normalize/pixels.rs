use image::DynamicImage;
use image::imageops::FilterType;

/// Pixel features handed to the settings model for a single prediction.
///
/// Channel-major (CHW) RGB, each value in `[0, 1]`. Per-channel
/// standardization is left to the model, which knows its own statistics.
#[derive(Debug, Clone)]
pub struct NormalizedFeatureVector {
    data: Vec<f32>,
    size: u32,
}

impl NormalizedFeatureVector {
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Square edge length in pixels.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// `(channels, height, width)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (3, self.size as usize, self.size as usize)
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

/// Resize to `size × size` and rescale to `[0, 1]`, laid out as CHW.
///
/// The image is stretched, not cropped, matching the training-time resize.
pub fn normalize_image(image: &DynamicImage, size: u32) -> NormalizedFeatureVector {
    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let plane = size as usize * size as usize;
    let mut data = vec![0f32; plane * 3];

    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = pixel.0[c] as f32 / 255.0;
        }
    }

    NormalizedFeatureVector { data, size }
}
