use crate::image::{gaussian_blur, GrayFloatImage};
use crate::Sift;
use log::*;
use std::marker::PhantomData;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

// Type-state markers keep blurred octaves apart from their differences.

/// Marker for an octave of progressively blurred images.
#[derive(Debug, Clone, Copy)]
pub struct Gaussian;

/// Marker for an octave of differences between consecutive blurred images.
#[derive(Debug, Clone, Copy)]
pub struct DifferenceOfGaussians;

/// All images of one octave, ordered by increasing blur.
///
/// Every image in an octave has the same size.
#[derive(Debug, Clone)]
pub struct Octave<T> {
    index: usize,
    images: Vec<GrayFloatImage>,
    kind: PhantomData<T>,
}

impl<T> Octave<T> {
    pub(crate) fn new(index: usize, images: Vec<GrayFloatImage>) -> Self {
        debug_assert!(!images.is_empty());
        Self {
            index,
            images,
            kind: PhantomData,
        }
    }

    /// The octave index, 0 being the full resolution (or upscaled) octave.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[GrayFloatImage] {
        &self.images
    }

    pub fn width(&self) -> usize {
        self.images[0].width()
    }

    pub fn height(&self) -> usize {
        self.images[0].height()
    }
}

impl<T> std::ops::Index<usize> for Octave<T> {
    type Output = GrayFloatImage;

    fn index(&self, index: usize) -> &Self::Output {
        &self.images[index]
    }
}

impl Octave<Gaussian> {
    /// Blur `base` repeatedly, one incremental sigma per additional image.
    fn blur_from(index: usize, base: GrayFloatImage, incremental_sigmas: &[f32]) -> Self {
        let mut images = Vec::with_capacity(incremental_sigmas.len() + 1);
        images.push(base);
        for &sigma in incremental_sigmas {
            let blurred = gaussian_blur(&images[images.len() - 1], sigma);
            images.push(blurred);
        }
        Self::new(index, images)
    }

    /// Subtract every image from its successor.
    pub fn difference_of_gaussians(&self) -> Octave<DifferenceOfGaussians> {
        let images = self
            .images
            .windows(2)
            .map(|pair| pair[1].difference(&pair[0]))
            .collect();
        Octave::new(self.index, images)
    }
}

/// Compute the DoG octave of every Gaussian octave, in octave order.
pub fn difference_of_gaussians(
    octaves: &[Octave<Gaussian>],
) -> Vec<Octave<DifferenceOfGaussians>> {
    #[cfg(not(feature = "rayon"))]
    let dogs = octaves
        .iter()
        .map(Octave::difference_of_gaussians)
        .collect();
    #[cfg(feature = "rayon")]
    let dogs = octaves
        .par_iter()
        .map(Octave::difference_of_gaussians)
        .collect();
    dogs
}

impl Sift {
    /// The number of octaves built for an input of the given size.
    ///
    /// Octaves are added while both dimensions are at least
    /// `min_octave_size`, up to `num_octaves`. This can be zero for tiny inputs.
    pub fn number_of_octaves(&self, width: usize, height: usize) -> usize {
        let (mut width, mut height) = if self.upscale_input {
            (width * 2, height * 2)
        } else {
            (width, height)
        };
        let mut octaves = 0;
        while octaves < self.num_octaves
            && width >= self.min_octave_size
            && height >= self.min_octave_size
        {
            octaves += 1;
            width = (width + 1) / 2;
            height = (height + 1) / 2;
        }
        octaves
    }

    /// The sigma of the blur taking image `i - 1` of an octave to image `i`.
    ///
    /// Image `i` of every octave then carries a total blur of `sigma * k^i`
    /// relative to that octave's sampling, with `k = 2^(1 / num_intervals)`.
    pub fn incremental_sigmas(&self) -> Vec<f32> {
        let k = 2f32.powf((self.num_intervals as f32).recip());
        (1..self.num_intervals + 3)
            .map(|i| self.sigma * k.powi(i as i32 - 1) * (k * k - 1.0).sqrt())
            .collect()
    }

    fn seed_image(&self, image: &GrayFloatImage) -> GrayFloatImage {
        let (base, assumed_blur) = if self.upscale_input {
            trace!("Upscaling the input image.");
            (image.upscale(), 2.0 * self.assumed_blur)
        } else {
            (image.clone(), self.assumed_blur)
        };
        let sigma = (self.sigma.powi(2) - assumed_blur.powi(2)).max(0.01).sqrt();
        debug!("Blurring the seed image with sigma={}", sigma);
        gaussian_blur(&base, sigma)
    }

    /// Build the Gaussian scale space of an image.
    ///
    /// Each octave holds `num_intervals + 3` images. The first image of an
    /// octave is image `num_intervals` of the previous octave with every
    /// second pixel dropped, which has twice the base blur.
    pub fn build_gaussian_pyramid(&self, image: &GrayFloatImage) -> Vec<Octave<Gaussian>> {
        let num_octaves = self.number_of_octaves(image.width(), image.height());
        if num_octaves < self.num_octaves {
            debug!(
                "A {}x{} image only supports {} of {} octaves",
                image.width(),
                image.height(),
                num_octaves,
                self.num_octaves
            );
        }
        let sigmas = self.incremental_sigmas();
        let mut octaves: Vec<Octave<Gaussian>> = Vec::with_capacity(num_octaves);
        for index in 0..num_octaves {
            let base = match octaves.last() {
                Some(previous) => previous[self.num_intervals].downsample(),
                None => self.seed_image(image),
            };
            trace!(
                "Building octave {} from a {}x{} base.",
                index,
                base.width(),
                base.height()
            );
            octaves.push(Octave::blur_from(index, base, &sigmas));
        }
        debug!("Built {} octaves", octaves.len());
        octaves
    }
}
