use log::*;
use sift::{Matcher, Sift};

fn main() -> Result<(), sift::Error> {
    pretty_env_logger::init_timed();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (first, second) = match args.as_slice() {
        [first, second] => (first, second),
        _ => {
            error!("usage: sift <first image> <second image>");
            std::process::exit(1);
        }
    };

    let sift = Sift::default();
    let first_keypoints = sift.extract_path(first)?;
    let second_keypoints = sift.extract_path(second)?;
    println!(
        "{}: {} keypoints, {}: {} keypoints",
        first,
        first_keypoints.len(),
        second,
        second_keypoints.len()
    );

    let matches = Matcher::default().match_keypoints(&first_keypoints, &second_keypoints);
    println!("{} matches", matches.len());
    for pair in &matches {
        println!(
            "({:.2}, {:.2}) -> ({:.2}, {:.2})",
            pair.row1, pair.col1, pair.row2, pair.col2
        );
    }
    Ok(())
}
