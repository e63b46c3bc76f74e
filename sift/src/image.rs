use derive_more::{Deref, DerefMut};
use image::{DynamicImage, GenericImageView, GrayImage, ImageBuffer, Luma};
use log::*;
use ndarray::{azip, s, Array2, ArrayView2};
use std::f32;
use wide::f32x4;

pub type GrayImageBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// The image type we use in this library.
///
/// This is a wrapper around a contiguous row-major `f32` buffer with pixel
/// values between 0 and 1. The image crate is still used for loading and
/// encoding, but every accessor here takes `(row, col)` rather than the
/// image crate's `(x, y)`, since that is how the scale space is addressed.
///
/// Reads outside the image are never an error for the sampling accessors:
/// [`GrayFloatImage::get_clamped`] and [`GrayFloatImage::interpolate`] clamp
/// to the nearest edge row/column.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct GrayFloatImage(pub GrayImageBuffer);

impl GrayFloatImage {
    /// Create a unit float image from the image crate's DynamicImage type.
    ///
    /// Color images are converted to luma first.
    pub fn from_dynamic(input_image: &DynamicImage) -> Self {
        info!(
            "Loaded a {} x {} image",
            input_image.width(),
            input_image.height()
        );
        Self(input_image.to_luma32f())
    }

    /// Create a unit float image from an 8-bit grayscale image.
    pub fn from_gray(gray_image: &GrayImage) -> Self {
        Self(ImageBuffer::from_fn(
            gray_image.width(),
            gray_image.height(),
            |x, y| Luma([f32::from(gray_image[(x, y)][0]) / 255f32]),
        ))
    }

    pub fn from_array2(arr: Array2<f32>) -> Self {
        let (height, width) = arr.dim();
        let data = if arr.is_standard_layout() {
            arr.into_raw_vec()
        } else {
            arr.iter().copied().collect()
        };
        Self(
            ImageBuffer::from_raw(width as u32, height as u32, data)
                .expect("raw vector didn't have enough pixels for the image"),
        )
    }

    pub fn ref_array2(&self) -> ArrayView2<f32> {
        ArrayView2::from_shape((self.height(), self.width()), self.0.as_raw().as_slice())
            .expect("image buffer does not match its dimensions")
    }

    pub fn zero_array(&self) -> Array2<f32> {
        Array2::zeros((self.height(), self.width()))
    }

    pub fn width(&self) -> usize {
        self.0.width() as usize
    }

    pub fn height(&self) -> usize {
        self.0.height() as usize
    }

    pub fn new(width: usize, height: usize) -> Self {
        Self(ImageBuffer::from_pixel(
            width as u32,
            height as u32,
            Luma([0.0]),
        ))
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.0.as_raw()[row * self.width() + col]
    }

    /// Read a pixel, clamping out-of-range coordinates to the nearest edge.
    pub fn get_clamped(&self, row: isize, col: isize) -> f32 {
        let row = row.clamp(0, self.height() as isize - 1) as usize;
        let col = col.clamp(0, self.width() as isize - 1) as usize;
        self.get(row, col)
    }

    /// Bilinear sample at a fractional position, clamped to the image edges.
    pub fn interpolate(&self, row: f32, col: f32) -> f32 {
        let row_floor = row.floor();
        let col_floor = col.floor();
        let row_frac = row - row_floor;
        let col_frac = col - col_floor;
        let (r, c) = (row_floor as isize, col_floor as isize);
        let top = self.get_clamped(r, c) * (1.0 - col_frac) + self.get_clamped(r, c + 1) * col_frac;
        let bottom =
            self.get_clamped(r + 1, c) * (1.0 - col_frac) + self.get_clamped(r + 1, c + 1) * col_frac;
        top * (1.0 - row_frac) + bottom * row_frac
    }

    /// Central difference gradient `(d/dcol, d/drow)` at an interior pixel.
    ///
    /// Rows grow downward, so a positive second component means the image
    /// gets brighter towards the bottom.
    pub fn gradient(&self, row: usize, col: usize) -> (f32, f32) {
        let dx = self.get(row, col + 1) - self.get(row, col - 1);
        let dy = self.get(row + 1, col) - self.get(row - 1, col);
        (dx, dy)
    }

    /// Keep every second pixel in both directions.
    ///
    /// The result has `ceil(width / 2) x ceil(height / 2)` pixels.
    pub fn downsample(&self) -> Self {
        Self::from_array2(self.ref_array2().slice(s![..;2, ..;2]).to_owned())
    }

    /// Double the image in both directions with bilinear interpolation.
    ///
    /// Pixel `(2 * row, 2 * col)` of the result is pixel `(row, col)` of the
    /// input, so coordinates map back by halving.
    pub fn upscale(&self) -> Self {
        Self(ImageBuffer::from_fn(
            self.0.width() * 2,
            self.0.height() * 2,
            |x, y| Luma([self.interpolate(y as f32 / 2.0, x as f32 / 2.0)]),
        ))
    }

    /// Pixelwise `self - other`. Both images must have the same size.
    pub fn difference(&self, other: &Self) -> Self {
        let mut difference = self.zero_array();
        azip!((
            out in &mut difference,
            &minuend in self.ref_array2(),
            &subtrahend in other.ref_array2(),
        ) {
            *out = minuend - subtrahend;
        });
        Self::from_array2(difference)
    }
}

/// Correlate every row of a row-major buffer with `kernel`.
///
/// Pixels beyond either end of a row take the value of the edge pixel.
fn filter_rows(data: &[f32], width: usize, kernel: &[f32]) -> Vec<f32> {
    debug_assert!(kernel.len() % 2 == 1);
    let kernel_half_size = kernel.len() / 2;
    // SIMD kernel, padded with 0 up to a multiple of four lanes.
    let kernel_simd = kernel
        .chunks(4)
        .map(|chunk| {
            let mut lanes = [0f32; 4];
            lanes[..chunk.len()].copy_from_slice(chunk);
            f32x4::new(lanes)
        })
        .collect::<Vec<_>>();
    let padded_size = kernel_simd.len() * 4;
    let mut output = vec![0f32; data.len()];
    let mut scratch = vec![0f32; width + 2 * kernel_half_size + padded_size - kernel.len()];
    for (row_in, row_out) in data.chunks_exact(width).zip(output.chunks_exact_mut(width)) {
        scratch[..kernel_half_size].fill(row_in[0]);
        scratch[kernel_half_size..kernel_half_size + width].copy_from_slice(row_in);
        scratch[kernel_half_size + width..2 * kernel_half_size + width].fill(row_in[width - 1]);
        scratch[2 * kernel_half_size + width..].fill(0.);
        scratch
            .windows(padded_size)
            .zip(row_out.iter_mut())
            .for_each(|(window, output)| {
                *output = window
                    .chunks_exact(4)
                    .map(|chunk| f32x4::new([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .zip(kernel_simd.iter())
                    .fold(f32x4::splat(0.), |acc, (a, b)| a.mul_add(*b, acc))
                    .reduce_add()
            });
    }
    output
}

/// Transpose a row-major `height x width` buffer.
fn transpose(data: &[f32], width: usize, height: usize) -> Vec<f32> {
    ArrayView2::from_shape((height, width), data)
        .expect("buffer does not match its dimensions")
        .t()
        .iter()
        .copied()
        .collect()
}

/// Apply `h_kernel` along rows and then `v_kernel` along columns.
///
/// The vertical pass runs the same row filter over the transposed image.
pub fn separable_filter(image: &GrayFloatImage, h_kernel: &[f32], v_kernel: &[f32]) -> GrayFloatImage {
    let width = image.width();
    let height = image.height();
    let rows = filter_rows(image.as_raw(), width, h_kernel);
    let columns = filter_rows(&transpose(&rows, width, height), height, v_kernel);
    let output = transpose(&columns, height, width);
    GrayFloatImage(
        GrayImageBuffer::from_raw(width as u32, height as u32, output)
            .expect("filter output has the input's dimensions"),
    )
}

/// The Gaussian function.
///
/// # Arguments
/// * `x` - the offset.
/// * `r` - sigma.
/// # Return value
/// The kernel value at x.
fn gaussian(x: f32, r: f32) -> f32 {
    ((2.0 * f32::consts::PI).sqrt() * r).recip() * (-x.powi(2) / (2.0 * r.powi(2))).exp()
}

/// Generate a normalized Gaussian kernel.
///
/// # Arguments
/// * `r` - sigma.
/// * `kernel_size` - The size of the kernel, which must be odd.
/// # Return value
/// The kernel (a vector).
pub fn gaussian_kernel(r: f32, kernel_size: usize) -> Vec<f32> {
    assert!(kernel_size % 2 == 1, "kernel_size must be odd");
    let half_width = (kernel_size / 2) as i32;
    let mut kernel: Vec<f32> = (-half_width..=half_width)
        .map(|i| gaussian(i as f32, r))
        .collect();
    let sum: f32 = kernel.iter().sum();
    for val in kernel.iter_mut() {
        *val /= sum;
    }
    kernel
}

/// Perform Gaussian blur on an image.
///
/// The kernel extends to three standard deviations on either side.
///
/// # Arguments
/// * `r` - sigma.
/// # Return value
/// The resulting image after the filter was applied.
pub fn gaussian_blur(image: &GrayFloatImage, r: f32) -> GrayFloatImage {
    debug_assert!(r > 0.0, "sigma must be > 0.0");
    let kernel_radius = (3.0 * r).ceil().max(1.0) as usize;
    let kernel = gaussian_kernel(r, kernel_radius * 2 + 1);
    separable_filter(image, &kernel, &kernel)
}

#[cfg(test)]
mod tests {
    use super::{gaussian_blur, gaussian_kernel, separable_filter, GrayFloatImage};
    use image::{ImageBuffer, Luma};

    fn pattern(width: u32, height: u32) -> GrayFloatImage {
        GrayFloatImage(ImageBuffer::from_fn(width, height, |x, y| {
            Luma([((x * 7 + y * 13) % 17) as f32 / 17.0])
        }))
    }

    #[test]
    fn gaussian_kernel_correct() {
        // test against known correct kernel
        let kernel = gaussian_kernel(3.0, 7);
        let known_correct_kernel = vec![
            0.1062_8852,
            0.1403_2133,
            0.1657_7007,
            0.1752_4014,
            0.1657_7007,
            0.1403_2133,
            0.1062_8852,
        ];
        for (i, j) in kernel.iter().zip(known_correct_kernel.iter()) {
            assert!(f32::abs(*i - *j) < 0.0001);
        }
    }

    #[test]
    fn separable_filter_matches_imageproc() {
        let image = pattern(23, 17);
        let kernel = gaussian_kernel(1.5, 9);
        let filtered_ours = separable_filter(&image, &kernel, &kernel);
        let filtered_imageproc = imageproc::filter::separable_filter_equal(&image.0, &kernel);
        imageproc::assert_pixels_eq_within!(filtered_ours.0, filtered_imageproc, 0.0001);
    }

    #[test]
    fn blur_keeps_constant_image_constant() {
        let mut image = GrayFloatImage::new(12, 9);
        image.pixels_mut().for_each(|p| p.0[0] = 0.25);
        let blurred = gaussian_blur(&image, 2.0);
        assert!(blurred.pixels().all(|p| (p.0[0] - 0.25).abs() < 1e-6));
    }

    #[test]
    fn clamped_reads_use_nearest_edge() {
        let image = pattern(5, 4);
        assert_eq!(image.get_clamped(-3, -3), image.get(0, 0));
        assert_eq!(image.get_clamped(10, 2), image.get(3, 2));
        assert_eq!(image.get_clamped(1, 99), image.get(1, 4));
        assert_eq!(image.get_clamped(-1, 7), image.get(0, 4));
    }

    #[test]
    fn interpolate_between_pixels() {
        let image = pattern(5, 4);
        assert_eq!(image.interpolate(2.0, 3.0), image.get(2, 3));
        let expected = 0.25 * (image.get(1, 1) + image.get(1, 2) + image.get(2, 1) + image.get(2, 2));
        assert!((image.interpolate(1.5, 1.5) - expected).abs() < 1e-6);
        // Outside the image the edge value is used.
        assert_eq!(image.interpolate(-4.0, 1.0), image.get(0, 1));
    }

    #[test]
    fn upscale_keeps_input_pixels_on_even_samples() {
        let image = pattern(5, 4);
        let double = image.upscale();
        assert_eq!((double.width(), double.height()), (10, 8));
        for row in 0..4 {
            for col in 0..5 {
                assert_eq!(double.get(2 * row, 2 * col), image.get(row, col));
            }
        }
        let midpoint = 0.5 * (image.get(1, 2) + image.get(1, 3));
        assert!((double.get(2, 5) - midpoint).abs() < 1e-6);
        // Past the last input pixel the edge is repeated.
        assert_eq!(double.get(7, 9), image.get(3, 4));
        assert_eq!(double.downsample().as_raw(), image.as_raw());
    }

    #[test]
    fn downsample_keeps_even_pixels() {
        let image = pattern(5, 4);
        let half = image.downsample();
        assert_eq!((half.width(), half.height()), (3, 2));
        for row in 0..2 {
            for col in 0..3 {
                assert_eq!(half.get(row, col), image.get(2 * row, 2 * col));
            }
        }
    }

    #[test]
    fn difference_of_identical_images_is_zero() {
        let image = pattern(6, 6);
        let diff = image.difference(&image);
        assert!(diff.pixels().all(|p| p.0[0] == 0.0));
        let zero = GrayFloatImage::new(6, 6);
        let same = image.difference(&zero);
        assert_eq!(same.as_raw(), image.as_raw());
    }
}
