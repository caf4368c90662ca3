use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::PreprocessError;
use crate::keras_config::ModelSpec;

/// A single NHWC image batch, already scaled to `[0, 1]`.
#[derive(Debug, Clone)]
pub struct InputTensor {
    pub data: Vec<f32>,
    pub height: u32,
    pub width: u32,
    pub channels: u32,
}

impl InputTensor {
    /// `[1, height, width, channels]`
    pub fn dims(&self) -> [u64; 4] {
        [
            1,
            u64::from(self.height),
            u64::from(self.width),
            u64::from(self.channels),
        ]
    }
}

pub fn preprocess_image(
    image_data: &[u8],
    spec: &ModelSpec,
) -> Result<InputTensor, PreprocessError> {
    if image_data.is_empty() {
        return Err(PreprocessError::Empty);
    }

    let img = image::load_from_memory(image_data)?;
    Ok(to_input_tensor(&img, spec))
}

pub fn to_input_tensor(img: &DynamicImage, spec: &ModelSpec) -> InputTensor {
    // Bicubic, matching PIL's default resample for RGB images.
    let resized = img.resize_exact(spec.width, spec.height, FilterType::CatmullRom);

    let data: Vec<f32> = if spec.channels == 1 {
        resized
            .to_luma8()
            .pixels()
            .map(|p| p[0] as f32 / 255.0)
            .collect()
    } else {
        resized
            .to_rgb8()
            .pixels()
            .flat_map(|p| p.0)
            .map(|v| v as f32 / 255.0)
            .collect()
    };

    InputTensor {
        data,
        height: spec.height,
        width: spec.width,
        channels: if spec.channels == 1 { 1 } else { 3 },
    }
}
