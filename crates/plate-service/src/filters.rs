/// Grayscale filters used by both the OCR preprocessing and the contour
/// detector.
///
/// Both follow the OpenCV definitions the tuning constants were chosen for:
/// the bilateral filter samples a circular neighbourhood with reflect-101
/// borders, and the adaptive threshold compares each pixel with a
/// Gaussian-weighted local mean rounded to 8 bits.
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::filter::separable_filter_equal;

/// Edge-preserving smoothing.
///
/// `diameter` is the neighbourhood diameter in pixels (OpenCV's `d`).
pub fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    let (width, height) = image.dimensions();
    let radius = (diameter / 2).max(1) as i32;

    let color_coeff = -0.5 / (sigma_color * sigma_color);
    let space_coeff = -0.5 / (sigma_space * sigma_space);

    let color_weights: Vec<f32> = (0..256)
        .map(|d| ((d * d) as f32 * color_coeff).exp())
        .collect();

    let mut offsets = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = dx * dx + dy * dy;
            if r2 > radius * radius {
                continue;
            }
            offsets.push((dx, dy, (r2 as f32 * space_coeff).exp()));
        }
    }

    let src = image.as_raw();
    let mut out = GrayImage::new(width, height);

    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let center = src[(y as u32 * width + x as u32) as usize] as i32;
            let mut sum = 0.0f32;
            let mut wsum = 0.0f32;

            for &(dx, dy, space_weight) in &offsets {
                let sx = reflect_101(x + dx, width as i32);
                let sy = reflect_101(y + dy, height as i32);
                let value = src[(sy as u32 * width + sx as u32) as usize] as i32;
                let weight = space_weight * color_weights[(value - center).unsigned_abs() as usize];
                sum += value as f32 * weight;
                wsum += weight;
            }

            let filtered = if wsum > 0.0 { sum / wsum } else { center as f32 };
            out.put_pixel(x as u32, y as u32, Luma([filtered.round().clamp(0.0, 255.0) as u8]));
        }
    }

    out
}

/// Local thresholding against a Gaussian-weighted neighbourhood mean.
///
/// Output is 255 where `pixel > mean - offset`, 0 elsewhere.
pub fn adaptive_threshold_gaussian(image: &GrayImage, block_size: u32, offset: i32) -> GrayImage {
    let local_mean = gaussian_blur_fixed(image, block_size);
    let mut out = GrayImage::new(image.width(), image.height());

    for (x, y, pixel) in image.enumerate_pixels() {
        let mean = local_mean.get_pixel(x, y)[0] as i32;
        let value = if pixel[0] as i32 - mean > -offset { 255 } else { 0 };
        out.put_pixel(x, y, Luma([value]));
    }

    out
}

/// Gaussian blur with an explicit odd kernel size; sigma is derived from the
/// size the same way OpenCV does for `sigma = 0`.
///
/// Both passes run in `f32` so the mean is rounded to 8 bits only once.
pub fn gaussian_blur_fixed(image: &GrayImage, kernel_size: u32) -> GrayImage {
    let kernel = gaussian_kernel(kernel_size);
    let (width, height) = image.dimensions();

    let widened: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width, height, |x, y| Luma([image.get_pixel(x, y)[0] as f32]));
    let blurred = separable_filter_equal(&widened, &kernel);

    GrayImage::from_fn(width, height, |x, y| {
        Luma([blurred.get_pixel(x, y)[0].round().clamp(0.0, 255.0) as u8])
    })
}

fn gaussian_kernel(size: u32) -> Vec<f32> {
    let size = if size % 2 == 0 { size + 1 } else { size.max(1) };
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let radius = (size / 2) as i32;

    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    for weight in kernel.iter_mut() {
        *weight /= total;
    }
    kernel
}

fn reflect_101(index: i32, len: i32) -> i32 {
    if len == 1 {
        return 0;
    }
    let mut i = index;
    while i < 0 || i >= len {
        if i < 0 {
            i = -i;
        }
        if i >= len {
            i = 2 * len - i - 2;
        }
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bilateral_keeps_flat_image() {
        let image = GrayImage::from_pixel(20, 12, Luma([140]));
        let filtered = bilateral_filter(&image, 11, 17.0, 17.0);
        assert!(filtered.pixels().all(|p| p[0] == 140));
    }

    #[test]
    fn test_bilateral_preserves_strong_edge() {
        let image = GrayImage::from_fn(30, 10, |x, _| if x < 15 { Luma([20]) } else { Luma([230]) });
        let filtered = bilateral_filter(&image, 11, 17.0, 17.0);

        // A 210-level step is far outside sigma_color, so neither side bleeds.
        assert_eq!(filtered.get_pixel(14, 5)[0], 20);
        assert_eq!(filtered.get_pixel(15, 5)[0], 230);
    }

    #[test]
    fn test_gaussian_kernel_is_normalized() {
        let kernel = gaussian_kernel(11);
        assert_eq!(kernel.len(), 11);
        let total: f32 = kernel.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(kernel[5] > kernel[0]);
    }

    #[test]
    fn test_gaussian_blur_spreads_spike_symmetrically() {
        let mut image = GrayImage::new(21, 21);
        image.put_pixel(10, 10, Luma([255]));

        let blurred = gaussian_blur_fixed(&image, 11);
        let center = blurred.get_pixel(10, 10)[0];
        assert!(center > 0 && center < 255);
        assert_eq!(blurred.get_pixel(9, 10), blurred.get_pixel(11, 10));
        assert_eq!(blurred.get_pixel(10, 9), blurred.get_pixel(10, 11));
        assert_eq!(blurred.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn test_adaptive_threshold_flat_is_white() {
        let image = GrayImage::from_pixel(16, 16, Luma([90]));
        let binary = adaptive_threshold_gaussian(&image, 11, 2);
        assert!(binary.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_adaptive_threshold_marks_dark_stroke() {
        let mut image = GrayImage::from_pixel(40, 20, Luma([220]));
        for y in 4..16 {
            for x in 18..21 {
                image.put_pixel(x, y, Luma([30]));
            }
        }

        let binary = adaptive_threshold_gaussian(&image, 11, 2);
        assert_eq!(binary.get_pixel(19, 10)[0], 0);
        assert_eq!(binary.get_pixel(2, 2)[0], 255);
        assert!(binary.pixels().all(|p| p[0] == 0 || p[0] == 255));
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(2, 5), 2);
        assert_eq!(reflect_101(-3, 1), 0);
    }
}
