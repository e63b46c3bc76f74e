use crate::pyramid::{DifferenceOfGaussians, Octave};
use crate::Sift;
use log::*;
use nalgebra::{Matrix2, Matrix3, Vector3};
use std::collections::HashSet;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// A localized scale space extremum that has no orientation yet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Extremum {
    /// Sub-pixel row in the coordinate frame of the input image.
    pub row: f32,
    /// Sub-pixel column in the coordinate frame of the input image.
    pub col: f32,
    /// Blur sigma in the coordinate frame of the input image.
    pub scale: f32,
    /// Blur sigma in the pixels of the extremum's own octave.
    pub octave_scale: f32,
    pub octave: usize,
    /// The DoG layer of the final sample point, which is also the index of
    /// the Gaussian image used for orientation and description.
    pub layer: usize,
    pub sample_row: usize,
    pub sample_col: usize,
    /// Absolute DoG value at the interpolated extremum.
    pub response: f32,
}

/// Whether the sample is strictly above or strictly below all 26 neighbours.
fn is_extremum(
    dogs: &Octave<DifferenceOfGaussians>,
    layer: usize,
    row: usize,
    col: usize,
) -> bool {
    let value = dogs[layer].get(row, col);
    let mut is_max = true;
    let mut is_min = true;
    for l in layer - 1..=layer + 1 {
        for r in row - 1..=row + 1 {
            for c in col - 1..=col + 1 {
                if (l, r, c) == (layer, row, col) {
                    continue;
                }
                let neighbour = dogs[l].get(r, c);
                is_max &= value > neighbour;
                is_min &= value < neighbour;
                if !is_max && !is_min {
                    return false;
                }
            }
        }
    }
    true
}

/// Gradient and Hessian of the DoG at a sample, ordered (col, row, layer).
fn derivatives(
    dogs: &Octave<DifferenceOfGaussians>,
    layer: usize,
    row: usize,
    col: usize,
) -> (Vector3<f32>, Matrix3<f32>) {
    let at = |l: usize, r: usize, c: usize| dogs[l].get(r, c);
    let value = at(layer, row, col);
    let gradient = Vector3::new(
        0.5 * (at(layer, row, col + 1) - at(layer, row, col - 1)),
        0.5 * (at(layer, row + 1, col) - at(layer, row - 1, col)),
        0.5 * (at(layer + 1, row, col) - at(layer - 1, row, col)),
    );
    let dxx = at(layer, row, col + 1) + at(layer, row, col - 1) - 2.0 * value;
    let dyy = at(layer, row + 1, col) + at(layer, row - 1, col) - 2.0 * value;
    let dss = at(layer + 1, row, col) + at(layer - 1, row, col) - 2.0 * value;
    let dxy = 0.25
        * (at(layer, row + 1, col + 1) - at(layer, row + 1, col - 1)
            - at(layer, row - 1, col + 1)
            + at(layer, row - 1, col - 1));
    let dxs = 0.25
        * (at(layer + 1, row, col + 1) - at(layer + 1, row, col - 1)
            - at(layer - 1, row, col + 1)
            + at(layer - 1, row, col - 1));
    let dys = 0.25
        * (at(layer + 1, row + 1, col) - at(layer + 1, row - 1, col)
            - at(layer - 1, row + 1, col)
            + at(layer - 1, row - 1, col));
    let hessian = Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss);
    (gradient, hessian)
}

/// Reject points lying on edges, where the principal curvature ratio of the
/// spatial Hessian reaches `edge_threshold`.
fn passes_edge_test(hessian: &Matrix3<f32>, edge_threshold: f32) -> bool {
    let spatial: Matrix2<f32> = hessian.fixed_view::<2, 2>(0, 0).into_owned();
    let trace = spatial.trace();
    let determinant = spatial.determinant();
    determinant > 0.0
        && trace * trace / determinant < (edge_threshold + 1.0).powi(2) / edge_threshold
}

impl Sift {
    /// Fit a quadratic around a candidate and move towards its true extremum.
    ///
    /// `width` and `height` are the dimensions of the input image, which the
    /// final location must fall within.
    fn refine_extremum(
        &self,
        dogs: &Octave<DifferenceOfGaussians>,
        mut layer: usize,
        mut row: usize,
        mut col: usize,
        width: usize,
        height: usize,
    ) -> Option<Extremum> {
        let border = self.image_border.max(1) as isize;
        let max_row = dogs.height() as isize - border;
        let max_col = dogs.width() as isize - border;
        let mut step = 0;
        let (offset, gradient, hessian) = loop {
            let (gradient, hessian) = derivatives(dogs, layer, row, col);
            let offset = -hessian.lu().solve(&gradient)?;
            if offset.iter().any(|v| !v.is_finite()) {
                return None;
            }
            if offset.iter().all(|v| v.abs() <= 0.5) {
                break (offset, gradient, hessian);
            }
            step += 1;
            if step >= self.max_interpolation_steps {
                trace!("Extremum at ({}, {}) did not converge.", row, col);
                return None;
            }
            let next_col = col as isize + offset.x.round() as isize;
            let next_row = row as isize + offset.y.round() as isize;
            let next_layer = layer as isize + offset.z.round() as isize;
            if next_layer < 1
                || next_layer > self.num_intervals as isize
                || next_row < border
                || next_row >= max_row
                || next_col < border
                || next_col >= max_col
            {
                return None;
            }
            col = next_col as usize;
            row = next_row as usize;
            layer = next_layer as usize;
        };

        let contrast = dogs[layer].get(row, col) + 0.5 * gradient.dot(&offset);
        if contrast.abs() * (self.num_intervals as f32) < self.contrast_threshold {
            return None;
        }
        if !passes_edge_test(&hessian, self.edge_threshold) {
            return None;
        }

        let mut octave_factor = 2f32.powi(dogs.index() as i32);
        if self.upscale_input {
            octave_factor *= 0.5;
        }
        let octave_scale =
            self.sigma * 2f32.powf((layer as f32 + offset.z) / self.num_intervals as f32);
        let extremum = Extremum {
            row: (row as f32 + offset.y) * octave_factor,
            col: (col as f32 + offset.x) * octave_factor,
            scale: octave_scale * octave_factor,
            octave_scale,
            octave: dogs.index(),
            layer,
            sample_row: row,
            sample_col: col,
            response: contrast.abs(),
        };
        if extremum.row < 0.0
            || extremum.row >= height as f32
            || extremum.col < 0.0
            || extremum.col >= width as f32
        {
            return None;
        }
        Some(extremum)
    }

    fn octave_extrema(
        &self,
        dogs: &Octave<DifferenceOfGaussians>,
        width: usize,
        height: usize,
    ) -> Vec<Extremum> {
        let threshold = 0.5 * self.contrast_threshold / self.num_intervals as f32;
        let border = self.image_border.max(1);
        let mut candidates = 0usize;
        let mut extrema = vec![];
        let mut seen = HashSet::new();
        for layer in 1..=self.num_intervals {
            for row in border..dogs.height().saturating_sub(border) {
                for col in border..dogs.width().saturating_sub(border) {
                    if dogs[layer].get(row, col).abs() < threshold
                        || !is_extremum(dogs, layer, row, col)
                    {
                        continue;
                    }
                    candidates += 1;
                    if let Some(extremum) =
                        self.refine_extremum(dogs, layer, row, col, width, height)
                    {
                        let sample = (extremum.layer, extremum.sample_row, extremum.sample_col);
                        if seen.insert(sample) {
                            extrema.push(extremum);
                        }
                    }
                }
            }
        }
        debug!(
            "Octave {}: {} candidates, {} localized extrema",
            dogs.index(),
            candidates,
            extrema.len()
        );
        extrema
    }

    /// Find and localize the extrema of a DoG pyramid.
    ///
    /// # Arguments
    /// * `dogs` - The DoG octaves, in octave order.
    /// * `width` - The width of the input image.
    /// * `height` - The height of the input image.
    /// # Return value
    /// The extrema of every octave, concatenated in octave order.
    pub(crate) fn find_scale_space_extrema(
        &self,
        dogs: &[Octave<DifferenceOfGaussians>],
        width: usize,
        height: usize,
    ) -> Vec<Extremum> {
        #[cfg(not(feature = "rayon"))]
        let per_octave: Vec<Vec<Extremum>> = dogs
            .iter()
            .map(|octave| self.octave_extrema(octave, width, height))
            .collect();
        #[cfg(feature = "rayon")]
        let per_octave: Vec<Vec<Extremum>> = dogs
            .par_iter()
            .map(|octave| self.octave_extrema(octave, width, height))
            .collect();
        per_octave.into_iter().flatten().collect()
    }
}
