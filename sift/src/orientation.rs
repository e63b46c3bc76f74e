use crate::extrema::Extremum;
use crate::image::GrayFloatImage;
use crate::pyramid::{Gaussian, Octave};
use crate::Sift;
use float_ord::FloatOrd;
use log::*;
use std::f32::consts::TAU;

/// An extremum with one of its dominant orientations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct OrientedExtremum {
    pub extremum: Extremum,
    /// Radians in `[0, 2π)`, measured from the +col axis towards +row.
    pub angle: f32,
}

/// Wrap an angle into `[0, 2π)`.
pub(crate) fn wrap_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs.
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Circularly smooth a histogram with the kernel `[1, 4, 6, 4, 1] / 16`.
pub fn smooth_histogram(histogram: &[f32]) -> Vec<f32> {
    let n = histogram.len() as isize;
    (0..n)
        .map(|i| {
            let at = |offset: isize| histogram[(i + offset).rem_euclid(n) as usize];
            (at(-2) + 4.0 * at(-1) + 6.0 * at(0) + 4.0 * at(1) + at(2)) / 16.0
        })
        .collect()
}

/// The interpolated angles of all histogram peaks reaching `peak_ratio` of the maximum.
///
/// A peak must be strictly greater than both circular neighbours. Its
/// position is refined by fitting a parabola through it and its neighbours.
/// The global maximum always yields an angle; when it sits on a plateau its
/// bin angle is used as is. An empty or all-zero histogram has no orientation.
pub fn peak_orientations(histogram: &[f32], peak_ratio: f32) -> Vec<f32> {
    let n = histogram.len();
    let (max_bin, max) = match histogram
        .iter()
        .enumerate()
        .max_by_key(|&(_, &value)| FloatOrd(value))
    {
        Some((bin, &value)) if value > 0.0 => (bin, value),
        _ => return vec![],
    };
    (0..n)
        .filter_map(|bin| {
            let previous = histogram[(bin + n - 1) % n];
            let next = histogram[(bin + 1) % n];
            let value = histogram[bin];
            if value > previous && value > next && value >= peak_ratio * max {
                let offset = 0.5 * (previous - next) / (previous - 2.0 * value + next);
                let refined = (bin as f32 + offset).rem_euclid(n as f32);
                Some(wrap_angle(TAU * refined / n as f32))
            } else if bin == max_bin {
                Some(TAU * bin as f32 / n as f32)
            } else {
                None
            }
        })
        .collect()
}

impl Sift {
    /// Gradient orientation histogram around an extremum's sample position.
    ///
    /// Samples are weighted by gradient magnitude and a Gaussian window.
    pub(crate) fn orientation_histogram(
        &self,
        image: &GrayFloatImage,
        extremum: &Extremum,
    ) -> Vec<f32> {
        let bins = self.orientation_bins;
        let mut histogram = vec![0f32; bins];
        let sigma = self.orientation_sigma_factor * extremum.octave_scale;
        let radius = (self.orientation_radius_factor * sigma).round() as isize;
        let weight_factor = -0.5 / (sigma * sigma);
        let (center_row, center_col) = (extremum.sample_row as isize, extremum.sample_col as isize);
        let (height, width) = (image.height() as isize, image.width() as isize);
        for i in -radius..=radius {
            let row = center_row + i;
            if row <= 0 || row >= height - 1 {
                continue;
            }
            for j in -radius..=radius {
                let col = center_col + j;
                if col <= 0 || col >= width - 1 {
                    continue;
                }
                let (dx, dy) = image.gradient(row as usize, col as usize);
                let magnitude = (dx * dx + dy * dy).sqrt();
                let theta = wrap_angle(dy.atan2(dx));
                let weight = ((i * i + j * j) as f32 * weight_factor).exp();
                let bin = (bins as f32 * theta / TAU).round() as usize % bins;
                histogram[bin] += weight * magnitude;
            }
        }
        histogram
    }

    /// Give every extremum one or more dominant orientations.
    ///
    /// Extrema with several strong peaks are cloned once per peak. Extrema
    /// without any gradient around them are dropped.
    pub(crate) fn assign_orientations(
        &self,
        gaussians: &[Octave<Gaussian>],
        extrema: &[Extremum],
    ) -> Vec<OrientedExtremum> {
        let oriented: Vec<OrientedExtremum> = extrema
            .iter()
            .flat_map(|extremum| {
                let image = &gaussians[extremum.octave][extremum.layer];
                let histogram = smooth_histogram(&self.orientation_histogram(image, extremum));
                peak_orientations(&histogram, self.orientation_peak_ratio)
                    .into_iter()
                    .map(move |angle| OrientedExtremum {
                        extremum: *extremum,
                        angle,
                    })
            })
            .collect();
        debug!(
            "Assigned {} orientations to {} extrema",
            oriented.len(),
            extrema.len()
        );
        oriented
    }
}
