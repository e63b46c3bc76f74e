use crate::extrema::Extremum;
use crate::image::GrayFloatImage;
use crate::orientation::{wrap_angle, OrientedExtremum};
use crate::pyramid::{Gaussian, Octave};
use crate::{Error, KeyPoint, Sift};
use derive_more::{Deref, DerefMut};
use log::*;
use std::f32::consts::{SQRT_2, TAU};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Spatial cells along each side of the descriptor window.
const WIDTH: usize = 4;
/// Orientation bins per spatial cell.
const BINS: usize = 8;

/// The number of components of a [`Descriptor`].
pub const DESCRIPTOR_LEN: usize = WIDTH * WIDTH * BINS;

/// Accumulator with a one cell margin on every side, so that trilinear
/// interpolation never needs bounds checks.
type PaddedHistogram = [[[f32; BINS]; WIDTH + 2]; WIDTH + 2];

/// A gradient histogram descriptor of unit L2 norm.
///
/// Components are laid out row of cells first, then column of cells, then
/// orientation bin.
#[derive(Debug, Clone, Copy, PartialEq, Deref, DerefMut)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "Vec<f32>", into = "Vec<f32>")
)]
pub struct Descriptor(pub [f32; DESCRIPTOR_LEN]);

impl From<Descriptor> for Vec<f32> {
    fn from(descriptor: Descriptor) -> Self {
        descriptor.0.to_vec()
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = Error;

    fn try_from(components: Vec<f32>) -> Result<Self, Self::Error> {
        let len = components.len();
        components
            .try_into()
            .map(Descriptor)
            .map_err(|_| Error::DescriptorLength(len))
    }
}

/// Spread `value` over the eight histogram entries surrounding a fractional
/// (row, col, orientation) bin position. Orientation wraps around.
fn accumulate(
    histogram: &mut PaddedHistogram,
    row_bin: f32,
    col_bin: f32,
    orientation_bin: f32,
    value: f32,
) {
    let (row_floor, col_floor, orientation_floor) =
        (row_bin.floor(), col_bin.floor(), orientation_bin.floor());
    let (row_frac, col_frac, orientation_frac) = (
        row_bin - row_floor,
        col_bin - col_floor,
        orientation_bin - orientation_floor,
    );
    // Shift by one for the margin.
    let row = (row_floor + 1.0) as usize;
    let col = (col_floor + 1.0) as usize;
    let orientation = orientation_floor as usize % BINS;
    for (r, row_weight) in [(row, 1.0 - row_frac), (row + 1, row_frac)] {
        for (c, col_weight) in [(col, 1.0 - col_frac), (col + 1, col_frac)] {
            for (o, orientation_weight) in [
                (orientation, 1.0 - orientation_frac),
                ((orientation + 1) % BINS, orientation_frac),
            ] {
                histogram[r][c][o] += value * row_weight * col_weight * orientation_weight;
            }
        }
    }
}

fn l2_norm(components: &[f32]) -> f32 {
    components.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Normalize, clip large components, and normalize again.
///
/// Returns `None` when the vector has no energy to normalize.
fn normalize(components: &mut [f32], clip: f32) -> Option<()> {
    let norm = l2_norm(components);
    if !(norm > 0.0) {
        return None;
    }
    for value in components.iter_mut() {
        *value = (*value / norm).min(clip);
    }
    let norm = l2_norm(components);
    if !(norm > 0.0) {
        return None;
    }
    for value in components.iter_mut() {
        *value /= norm;
    }
    Some(())
}

impl Sift {
    /// Compute the descriptor of an extremum in a patch rotated by `angle`.
    ///
    /// # Arguments
    /// * `image` - The Gaussian image the extremum was found in.
    /// * `extremum` - The extremum to describe.
    /// * `angle` - The orientation of the patch.
    /// # Return value
    /// The descriptor, or `None` if the patch has no gradient at all.
    pub(crate) fn descriptor(
        &self,
        image: &GrayFloatImage,
        extremum: &Extremum,
        angle: f32,
    ) -> Option<Descriptor> {
        let cell_width = self.descriptor_scale_factor * extremum.octave_scale;
        let half_width = WIDTH as f32 / 2.0;
        let diagonal = ((image.width().pow(2) + image.height().pow(2)) as f32).sqrt();
        let radius = (cell_width * SQRT_2 * (WIDTH as f32 + 1.0) * 0.5)
            .round()
            .min(diagonal) as isize;
        let (sin, cos) = angle.sin_cos();
        let bins_per_radian = BINS as f32 / TAU;
        // Gaussian window of sigma = half_width cells.
        let weight_factor = -0.5 / (half_width * half_width);
        let (center_row, center_col) = (extremum.sample_row as isize, extremum.sample_col as isize);
        let (height, width) = (image.height() as isize, image.width() as isize);

        let mut histogram: PaddedHistogram = [[[0.0; BINS]; WIDTH + 2]; WIDTH + 2];
        for i in -radius..=radius {
            for j in -radius..=radius {
                let col_rotated = (j as f32 * cos + i as f32 * sin) / cell_width;
                let row_rotated = (-j as f32 * sin + i as f32 * cos) / cell_width;
                let row_bin = row_rotated + half_width - 0.5;
                let col_bin = col_rotated + half_width - 0.5;
                if row_bin <= -1.0
                    || row_bin >= WIDTH as f32
                    || col_bin <= -1.0
                    || col_bin >= WIDTH as f32
                {
                    continue;
                }
                let (row, col) = (center_row + i, center_col + j);
                if row <= 0 || row >= height - 1 || col <= 0 || col >= width - 1 {
                    continue;
                }
                let (dx, dy) = image.gradient(row as usize, col as usize);
                let magnitude = (dx * dx + dy * dy).sqrt();
                let theta = wrap_angle(dy.atan2(dx) - angle);
                let weight = ((row_rotated * row_rotated + col_rotated * col_rotated)
                    * weight_factor)
                    .exp();
                accumulate(
                    &mut histogram,
                    row_bin,
                    col_bin,
                    theta * bins_per_radian,
                    weight * magnitude,
                );
            }
        }

        let mut descriptor = [0f32; DESCRIPTOR_LEN];
        let inner = histogram[1..=WIDTH]
            .iter()
            .flat_map(|cells| &cells[1..=WIDTH])
            .flatten();
        for (component, &value) in descriptor.iter_mut().zip(inner) {
            *component = value;
        }
        normalize(&mut descriptor, self.descriptor_clip)?;
        Some(Descriptor(descriptor))
    }

    fn describe(
        &self,
        gaussians: &[Octave<Gaussian>],
        oriented: &OrientedExtremum,
    ) -> Option<KeyPoint> {
        let extremum = &oriented.extremum;
        let image = &gaussians[extremum.octave][extremum.layer];
        let descriptor = self.descriptor(image, extremum, oriented.angle)?;
        Some(KeyPoint {
            row: extremum.row,
            col: extremum.col,
            octave: extremum.octave,
            scale: extremum.scale,
            angle: oriented.angle,
            response: extremum.response,
            descriptor,
        })
    }

    /// Turn oriented extrema into finished keypoints, preserving their order.
    pub(crate) fn extract_descriptors(
        &self,
        gaussians: &[Octave<Gaussian>],
        oriented: &[OrientedExtremum],
    ) -> Vec<KeyPoint> {
        #[cfg(not(feature = "rayon"))]
        let keypoints: Vec<KeyPoint> = oriented
            .iter()
            .filter_map(|o| self.describe(gaussians, o))
            .collect();
        #[cfg(feature = "rayon")]
        let keypoints: Vec<KeyPoint> = oriented
            .par_iter()
            .filter_map(|o| self.describe(gaussians, o))
            .collect();
        debug!(
            "Computed {} descriptors for {} oriented extrema",
            keypoints.len(),
            oriented.len()
        );
        keypoints
    }
}
