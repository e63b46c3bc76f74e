//! Scale invariant feature transform (SIFT) keypoints and brute force matching.
//!
//! ```no_run
//! let sift = sift::Sift::default();
//! let first = sift.extract_path("first.png")?;
//! let second = sift.extract_path("second.png")?;
//! let matches = sift::Matcher::default().match_keypoints(&first, &second);
//! # Ok::<(), sift::Error>(())
//! ```

mod descriptors;
mod extrema;
pub mod image;
mod matching;
mod orientation;
pub mod pyramid;

pub use crate::descriptors::{Descriptor, DESCRIPTOR_LEN};
pub use crate::matching::{descriptor_distance_squared, MatchPair, MatchPolicy, Matcher};
pub use crate::orientation::{peak_orientations, smooth_histogram};

use crate::image::GrayFloatImage;
use crate::pyramid::difference_of_gaussians;
use ::image::DynamicImage;
use log::*;
use std::path::Path;

/// A point of interest in an image, with its descriptor.
///
/// Coordinates always refer to the image passed to the extractor, whatever
/// octave the keypoint was found in.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyPoint {
    /// The vertical coordinate, growing toward the bottom of the image.
    pub row: f32,
    /// The horizontal coordinate, growing toward the right of the image.
    pub col: f32,
    /// The octave of scale space in which the keypoint was detected.
    pub octave: usize,
    /// The blur sigma at which the keypoint was detected, in pixel units.
    pub scale: f32,
    /// The orientation angle in radians within `[0, 2π)`.
    ///
    /// 0 points along +col and π/2 along +row.
    pub angle: f32,
    /// The magnitude of the interpolated difference of Gaussians response.
    pub response: f32,
    pub descriptor: Descriptor,
}

impl KeyPoint {
    /// The location as `(x, y)`.
    pub fn point(&self) -> (f32, f32) {
        (self.col, self.row)
    }
}

/// Errors that can occur while extracting features.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read image: {0}")]
    Image(#[from] ::image::ImageError),
    #[error("image of {width} x {height} pixels is empty")]
    EmptyImage { width: usize, height: usize },
    #[error("descriptor must have 128 components, found {0}")]
    DescriptorLength(usize),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Contains the configuration parameters of SIFT.
///
/// The most important parameter to pay attention to is `contrast_threshold`.
/// [`Sift::new`] can be used to set this threshold and let all other parameters
/// remain default. You can also use the helpers [`Sift::sparse`] and
/// [`Sift::dense`]. The default value of `contrast_threshold` is `0.04`.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sift {
    /// Maximum number of octaves
    pub num_octaves: usize,

    /// Number of intervals per octave, giving `num_intervals + 3` blurred images.
    /// Must be at least 1.
    pub num_intervals: usize,

    /// Blur of the first image of every octave, in that octave's pixels. Must be positive.
    pub sigma: f32,

    /// Blur assumed to be present in the input image
    pub assumed_blur: f32,

    /// No octave is built once its width or height would drop below this
    pub min_octave_size: usize,

    /// Double the input image before building the first octave
    pub upscale_input: bool,

    /// Pixels at the border of each octave that are never searched for extrema
    pub image_border: usize,

    /// Maximum number of steps when interpolating an extremum
    pub max_interpolation_steps: usize,

    /// Minimum interpolated response (multiplied by `num_intervals`) to accept an extremum
    pub contrast_threshold: f32,

    /// Maximum ratio of principal curvatures before an extremum counts as an edge.
    /// Must be positive.
    pub edge_threshold: f32,

    /// Number of bins in the orientation histogram, at least 1
    pub orientation_bins: usize,

    /// Orientation window sigma, in units of the keypoint scale (positive)
    pub orientation_sigma_factor: f32,

    /// Orientation window radius, in units of the window sigma
    pub orientation_radius_factor: f32,

    /// Histogram peaks at least this fraction of the largest peak add an orientation
    pub orientation_peak_ratio: f32,

    /// Width of a descriptor cell, in units of the keypoint scale (positive)
    pub descriptor_scale_factor: f32,

    /// Descriptor components are clipped to this before renormalizing (positive)
    pub descriptor_clip: f32,
}

impl Sift {
    /// This convenience constructor is provided for the very common case
    /// that the contrast threshold needs to be modified.
    pub fn new(threshold: f32) -> Self {
        Self {
            contrast_threshold: threshold,
            ..Default::default()
        }
    }

    /// Create a `Sift` that sparsely detects features.
    ///
    /// Uses a threshold of `0.08` (default is `0.04`).
    pub fn sparse() -> Self {
        Self::new(0.08)
    }

    /// Create a `Sift` that densely detects features.
    ///
    /// Uses a threshold of `0.02` (default is `0.04`).
    pub fn dense() -> Self {
        Self::new(0.02)
    }

    /// Check that the parameters describe a usable scale space.
    ///
    /// [`Sift::extract_from_gray_float_image`] runs this before doing any work.
    pub fn validate(&self) -> Result<(), Error> {
        if self.num_intervals == 0 {
            return Err(Error::InvalidConfiguration("num_intervals must be at least 1"));
        }
        if self.orientation_bins == 0 {
            return Err(Error::InvalidConfiguration("orientation_bins must be at least 1"));
        }
        let positive = [
            (self.sigma, "sigma must be positive"),
            (self.edge_threshold, "edge_threshold must be positive"),
            (
                self.orientation_sigma_factor,
                "orientation_sigma_factor must be positive",
            ),
            (
                self.descriptor_scale_factor,
                "descriptor_scale_factor must be positive",
            ),
            (self.descriptor_clip, "descriptor_clip must be positive"),
        ];
        // Written so that NaN is rejected as well.
        match positive.iter().find(|(value, _)| !(*value > 0.0)) {
            Some(&(_, reason)) => Err(Error::InvalidConfiguration(reason)),
            None => Ok(()),
        }
    }
}

impl Default for Sift {
    fn default() -> Sift {
        Sift {
            num_octaves: 8,
            num_intervals: 3,
            sigma: 1.6,
            assumed_blur: 0.5,
            min_octave_size: 16,
            upscale_input: false,
            image_border: 5,
            max_interpolation_steps: 5,
            contrast_threshold: 0.04,
            edge_threshold: 10.0,
            orientation_bins: 36,
            orientation_sigma_factor: 1.5,
            orientation_radius_factor: 3.0,
            orientation_peak_ratio: 0.8,
            descriptor_scale_factor: 3.0,
            descriptor_clip: 0.2,
        }
    }
}

impl Sift {
    /// Extract features using the SIFT feature extractor.
    ///
    /// This performs all operations end-to-end. The client might be only interested
    /// in certain portions of the process, all of which are exposed in public functions,
    /// but this function can document how the various parts fit together.
    ///
    /// # Arguments
    /// * `image` - The input image for which to extract features.
    ///
    /// Returns the keypoints with their descriptors.
    pub fn extract(&self, image: &DynamicImage) -> Result<Vec<KeyPoint>, Error> {
        let float_image = GrayFloatImage::from_dynamic(image);
        self.extract_from_gray_float_image(&float_image)
    }

    /// Extract features using the SIFT feature extractor from an image on disk.
    ///
    /// # Arguments
    /// * `path` - The input image path for which to extract features.
    pub fn extract_path(&self, path: impl AsRef<Path>) -> Result<Vec<KeyPoint>, Error> {
        let image = ::image::open(path)?;
        self.extract(&image)
    }

    /// Extract features from an image already converted to float grayscale.
    pub fn extract_from_gray_float_image(
        &self,
        image: &GrayFloatImage,
    ) -> Result<Vec<KeyPoint>, Error> {
        self.validate()?;
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(Error::EmptyImage { width, height });
        }
        trace!("Building the scale space.");
        let gaussians = self.build_gaussian_pyramid(image);
        let dogs = difference_of_gaussians(&gaussians);
        trace!("Finding scale space extrema.");
        let extrema = self.find_scale_space_extrema(&dogs, width, height);
        drop(dogs);
        debug!("Found {} extrema", extrema.len());
        trace!("Assigning orientations.");
        let oriented = self.assign_orientations(&gaussians, &extrema);
        trace!("Extracting descriptors.");
        let keypoints = self.extract_descriptors(&gaussians, &oriented);
        info!("Extracted {} features", keypoints.len());
        Ok(keypoints)
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, Sift};
    use crate::image::GrayFloatImage;

    #[test]
    fn presets_are_valid() {
        assert!(Sift::default().validate().is_ok());
        assert!(Sift::sparse().validate().is_ok());
        assert!(Sift::dense().validate().is_ok());
    }

    #[test]
    fn degenerate_configurations_are_rejected() {
        let image = GrayFloatImage::new(32, 32);
        let no_bins = Sift {
            orientation_bins: 0,
            ..Sift::default()
        };
        assert!(matches!(
            no_bins.extract_from_gray_float_image(&image),
            Err(Error::InvalidConfiguration(_))
        ));
        let no_intervals = Sift {
            num_intervals: 0,
            ..Sift::default()
        };
        assert!(matches!(
            no_intervals.extract_from_gray_float_image(&image),
            Err(Error::InvalidConfiguration(_))
        ));
        for sigma in [0.0, -1.0, f32::NAN] {
            let sift = Sift {
                sigma,
                ..Sift::default()
            };
            assert!(sift.validate().is_err());
        }
        let flat_edges = Sift {
            edge_threshold: 0.0,
            ..Sift::default()
        };
        assert!(flat_edges.validate().is_err());
    }
}
