use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use std::path::Path;

pub fn solid_gray(width: u32, height: u32, value: u8) -> DynamicImage {
    DynamicImage::ImageLuma8(ImageBuffer::from_pixel(width, height, Luma([value])))
}

pub fn solid_rgb(width: u32, height: u32, rgb: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(rgb)))
}

/// Gray diagonal ramp wrapping at 256.
pub fn diagonal_ramp(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
        let intensity = ((x + y) % 256) as u8;
        Rgb([intensity, intensity, intensity])
    }))
}

/// Left half dark, right half bright.
pub fn split_halves(width: u32, height: u32) -> DynamicImage {
    split_halves_with(width, height, 20, 230)
}

pub fn split_halves_with(width: u32, height: u32, left: u8, right: u8) -> DynamicImage {
    DynamicImage::ImageLuma8(ImageBuffer::from_fn(width, height, |x, _| {
        if x < width / 2 { Luma([left]) } else { Luma([right]) }
    }))
}

/// Top half dark, bottom half bright.
pub fn split_rows(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageLuma8(ImageBuffer::from_fn(width, height, |_, y| {
        if y < height / 2 { Luma([20]) } else { Luma([230]) }
    }))
}

pub fn with_pixel(image: &DynamicImage, x: u32, y: u32, value: u8) -> DynamicImage {
    let mut gray = image.to_luma8();
    gray.put_pixel(x, y, Luma([value]));
    DynamicImage::ImageLuma8(gray)
}

pub fn write_image(path: &Path, image: &DynamicImage) -> Result<(), Box<dyn std::error::Error>> {
    image.save(path)?;
    Ok(())
}
