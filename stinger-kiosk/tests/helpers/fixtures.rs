//! Frames, detections and on-disk gallery fixtures

use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use stinger_common::events::{BoundingBox, Detection};
use tempfile::TempDir;

pub fn solid_frame(width: u32, height: u32, colour: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(width, height, Rgb(colour))
}

pub fn detection(x: i32, y: i32, size: i32, embedding: Vec<f32>) -> Detection {
    Detection {
        bbox: BoundingBox::new(x, y, size, size),
        score: 0.9,
        embedding,
    }
}

/// Write a solid-colour photo; the format follows the extension
pub fn write_photo(path: &Path, colour: [u8; 3]) {
    solid_frame(32, 32, colour).save(path).unwrap();
}

/// Builds a people directory inside a temporary directory
pub struct GalleryDirBuilder {
    root: TempDir,
}

impl GalleryDirBuilder {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn person_dir(&self, name: &str) -> PathBuf {
        let dir = self.root.path().join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn photo(self, name: &str, file: &str, colour: [u8; 3]) -> Self {
        write_photo(&self.person_dir(name).join(file), colour);
        self
    }

    /// Arbitrary bytes under a person's directory (cues, previews, junk)
    pub fn file(self, name: &str, file: &str, contents: &[u8]) -> Self {
        std::fs::write(self.person_dir(name).join(file), contents).unwrap();
        self
    }
}
