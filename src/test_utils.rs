use std::{fs, path::Path};

use image::{Rgb, RgbImage};

/// Writes `count` distinct PNGs named `img000.png`, `img001.png`, ... and
/// returns their identifiers.
pub fn write_images(dir: &Path, count: usize, width: u32, height: u32) -> Vec<String> {
    fs::create_dir_all(dir).unwrap();

    (0..count)
        .map(|i| {
            let identifier = format!("img{i:03}");
            let shade = (i * 37 % 256) as u8;
            let image = RgbImage::from_fn(width, height, |x, y| {
                Rgb([shade, (x * 20) as u8, (y * 20) as u8 ^ shade])
            });
            image.save(dir.join(format!("{identifier}.png"))).unwrap();
            identifier
        })
        .collect()
}

/// Lays out a data root: `labels.csv`, `sample_submission.csv`, `train/` and
/// `test/`, with breeds assigned round-robin from `breeds`.
pub fn write_data_root(root: &Path, train_count: usize, test_count: usize, breeds: &[&str]) {
    let train = write_images(&root.join("train"), train_count, 12, 12);
    let test = write_images(&root.join("test"), test_count, 12, 12);

    let csv = |ids: &[String]| {
        let mut out = String::from("id,breed\n");
        for (i, id) in ids.iter().enumerate() {
            out.push_str(&format!("{id},{}\n", breeds[i % breeds.len()]));
        }
        out
    };

    fs::write(root.join("labels.csv"), csv(&train)).unwrap();
    fs::write(root.join("sample_submission.csv"), csv(&test)).unwrap();
}
