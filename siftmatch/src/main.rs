use image::GrayImage;
use log::*;
use sift::image::GrayFloatImage;
use sift::{KeyPoint, Matcher, Sift};
use std::path::{Path, PathBuf};
use std::process;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "siftmatch",
    about = "Detects SIFT keypoints in two images and matches them"
)]
struct Opt {
    /// The SIFT contrast threshold to use.
    ///
    /// 0.08 will be sparse and 0.02 will be dense.
    #[structopt(short, long, default_value = "0.04")]
    threshold: f32,
    /// The nearest neighbour distance ratio below which a match is accepted.
    #[structopt(short, long, default_value = "0.65")]
    ratio: f32,
    /// Only keep matches that are also nearest neighbours from the second image.
    #[structopt(short, long)]
    mutual: bool,
    /// The directory the PPM overlays are written to.
    #[structopt(short, long, parse(from_os_str), default_value = ".")]
    output_dir: PathBuf,
    /// The first image.
    #[structopt(parse(from_os_str))]
    first: PathBuf,
    /// The second image.
    #[structopt(parse(from_os_str))]
    second: PathBuf,
}

fn fail(message: String) -> ! {
    error!("{}", message);
    process::exit(1);
}

fn load(path: &Path) -> GrayImage {
    match image::open(path) {
        Ok(image) => image.to_luma8(),
        Err(e) => fail(format!("failed to open {}: {}", path.display(), e)),
    }
}

fn extract(sift: &Sift, image: &GrayImage, path: &Path) -> Vec<KeyPoint> {
    sift.extract_from_gray_float_image(&GrayFloatImage::from_gray(image))
        .unwrap_or_else(|e| fail(format!("failed to extract features from {}: {}", path.display(), e)))
}

fn save(path: PathBuf, image: &image::RgbImage) -> PathBuf {
    if let Err(e) = siftmatch::save_ppm(&path, image) {
        fail(format!("failed to write {}: {}", path.display(), e));
    }
    path
}

fn main() {
    pretty_env_logger::init_timed();
    let opt = Opt::from_args();
    let first = load(&opt.first);
    let second = load(&opt.second);

    let sift = Sift::new(opt.threshold);
    let keypoints1 = extract(&sift, &first, &opt.first);
    let keypoints2 = extract(&sift, &second, &opt.second);

    let path = save(
        opt.output_dir.join("SIFT_KP_1.ppm"),
        &siftmatch::render_keypoints(&first, &keypoints1),
    );
    println!("Image 1: {} keypoints, drawn to {}", keypoints1.len(), path.display());
    let path = save(
        opt.output_dir.join("SIFT_KP_2.ppm"),
        &siftmatch::render_keypoints(&second, &keypoints2),
    );
    println!("Image 2: {} keypoints, drawn to {}", keypoints2.len(), path.display());

    let mut matcher = Matcher::new(opt.ratio);
    if opt.mutual {
        matcher = matcher.mutual();
    }
    let matches = matcher.match_keypoints(&keypoints1, &keypoints2);
    let path = save(
        opt.output_dir.join("SIFT_match.ppm"),
        &siftmatch::render_matches(&first, &second, &matches),
    );
    for (index, pair) in matches.iter().enumerate() {
        println!(
            "NO. {:3}: ({:.2}, {:.2}) -> ({:.2}, {:.2})",
            index, pair.row1, pair.col1, pair.row2, pair.col2
        );
    }
    println!("{} matches, drawn to {}", matches.len(), path.display());
}
