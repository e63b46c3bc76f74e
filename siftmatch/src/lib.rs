use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
use image::{ColorType, DynamicImage, GrayImage, ImageEncoder, ImageResult, Luma, Rgb, RgbImage};
use imageproc::drawing;
use sift::{KeyPoint, MatchPair};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const KEYPOINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const MATCH_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

/// Draw every keypoint as a small circle at its location, a circle sized
/// by its scale, and a line along its orientation.
pub fn render_keypoints(image: &GrayImage, keypoints: &[KeyPoint]) -> RgbImage {
    let mut canvas = DynamicImage::ImageLuma8(image.clone()).to_rgb8();
    for keypoint in keypoints {
        let center = (keypoint.col.round() as i32, keypoint.row.round() as i32);
        let length = keypoint.scale.floor().max(1.0);
        drawing::draw_hollow_circle_mut(&mut canvas, center, 1, KEYPOINT_COLOR);
        drawing::draw_hollow_circle_mut(&mut canvas, center, length as i32 + 1, KEYPOINT_COLOR);
        let (sin, cos) = keypoint.angle.sin_cos();
        drawing::draw_line_segment_mut(
            &mut canvas,
            (keypoint.col, keypoint.row),
            (keypoint.col + length * cos, keypoint.row + length * sin),
            KEYPOINT_COLOR,
        );
    }
    canvas
}

/// Put both images side by side and connect every match with a line.
///
/// Rows below the shorter image are black.
pub fn render_matches(first: &GrayImage, second: &GrayImage, matches: &[MatchPair]) -> RgbImage {
    let (width1, height1) = first.dimensions();
    let (width2, height2) = second.dimensions();
    let combined = GrayImage::from_fn(width1 + width2, height1.max(height2), |x, y| {
        if x < width1 {
            if y < height1 {
                *first.get_pixel(x, y)
            } else {
                Luma([0])
            }
        } else if y < height2 {
            *second.get_pixel(x - width1, y)
        } else {
            Luma([0])
        }
    });
    let mut canvas = DynamicImage::ImageLuma8(combined).to_rgb8();
    for pair in matches {
        drawing::draw_line_segment_mut(
            &mut canvas,
            (pair.col1, pair.row1),
            (pair.col2 + width1 as f32, pair.row2),
            MATCH_COLOR,
        );
    }
    canvas
}

/// Encode an image as a binary PPM.
pub fn write_ppm<W: Write>(writer: W, image: &RgbImage) -> ImageResult<()> {
    PnmEncoder::new(writer)
        .with_subtype(PnmSubtype::Pixmap(SampleEncoding::Binary))
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
}

pub fn save_ppm(path: impl AsRef<Path>, image: &RgbImage) -> ImageResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_ppm(&mut writer, image)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift::{Descriptor, DESCRIPTOR_LEN};

    fn keypoint(row: f32, col: f32) -> KeyPoint {
        KeyPoint {
            row,
            col,
            octave: 0,
            scale: 3.4,
            angle: 0.0,
            response: 0.1,
            descriptor: Descriptor([0.0; DESCRIPTOR_LEN]),
        }
    }

    #[test]
    fn keypoints_are_drawn_in_red() {
        let image = GrayImage::from_pixel(20, 20, Luma([100]));
        let canvas = render_keypoints(&image, &[keypoint(10.0, 10.0)]);
        assert_eq!(canvas.dimensions(), (20, 20));
        assert_eq!(*canvas.get_pixel(10, 10), KEYPOINT_COLOR);
        assert_eq!(*canvas.get_pixel(10, 9), KEYPOINT_COLOR);
        // The orientation line runs along +col.
        assert_eq!(*canvas.get_pixel(12, 10), KEYPOINT_COLOR);
        assert_eq!(*canvas.get_pixel(0, 0), Rgb([100, 100, 100]));
    }

    #[test]
    fn keypoints_near_the_border_are_clipped() {
        let image = GrayImage::from_pixel(8, 8, Luma([0]));
        let canvas = render_keypoints(&image, &[keypoint(0.0, 7.0)]);
        assert_eq!(canvas.dimensions(), (8, 8));
    }

    #[test]
    fn matches_are_drawn_side_by_side() {
        let first = GrayImage::from_pixel(10, 6, Luma([50]));
        let second = GrayImage::from_pixel(8, 9, Luma([150]));
        let matches = [MatchPair {
            row1: 2.0,
            col1: 3.0,
            row2: 4.0,
            col2: 5.0,
        }];
        let canvas = render_matches(&first, &second, &matches);
        assert_eq!(canvas.dimensions(), (18, 9));
        assert_eq!(*canvas.get_pixel(0, 8), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(17, 8), Rgb([150, 150, 150]));
        assert_eq!(*canvas.get_pixel(3, 2), MATCH_COLOR);
    }

    #[test]
    fn ppm_is_binary_pixmap() {
        let image = RgbImage::from_pixel(3, 2, Rgb([1, 2, 3]));
        let mut encoded = vec![];
        write_ppm(&mut encoded, &image).unwrap();
        assert!(encoded.starts_with(b"P6"));
        assert!(encoded.ends_with(&[1, 2, 3, 1, 2, 3]));
    }
}
