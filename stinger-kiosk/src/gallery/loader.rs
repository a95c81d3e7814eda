//! Gallery directory loading
//!
//! Layout: one sub-directory per identity, named after it, holding the
//! identity's photos, an optional audio cue and an optional `.preview` file
//! naming the preferred photo.

use super::{Gallery, Identity};
use crate::detector::{detect_with_retry, FaceDetector};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use stinger_common::config::RuntimeSettings;
use tracing::{info, warn};

const CUE_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a"];
const PHOTO_EXTENSIONS: &[&str] = &["jpeg", "jpg", "png"];
const PREVIEW_FILE: &str = ".preview";

/// Build a gallery from `people_dir`
///
/// Each photo is run through the detector and the largest face's embedding
/// is kept. Photos that fail to decode or contain no face are skipped;
/// identities left without embeddings are not added. A missing directory
/// yields an empty gallery.
pub fn load_gallery(
    people_dir: &Path,
    detector: &dyn FaceDetector,
    settings: &RuntimeSettings,
) -> Result<Gallery> {
    let mut gallery = Gallery::new();

    if !people_dir.exists() {
        warn!("People directory does not exist: {}", people_dir.display());
        return Ok(gallery);
    }
    if !detector.is_ready() {
        return Err(Error::Gallery(
            "cannot compute embeddings: face detector is not ready".to_string(),
        ));
    }

    let mut person_dirs: Vec<PathBuf> = std::fs::read_dir(people_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    person_dirs.sort();

    for person_dir in person_dirs {
        let Some(name) = person_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let mut identity = Identity::new(name);
        if let Some(cue) = find_cue_file(&person_dir)? {
            info!("Found cue for {}: {}", name, cue.display());
            identity.set_cue(Some(cue));
        }

        let photos = files_with_extensions(&person_dir, PHOTO_EXTENSIONS)?;
        if photos.is_empty() {
            warn!("No images found for {}", name);
            continue;
        }

        for photo in photos {
            match embed_photo(&photo, detector, settings) {
                Ok(Some(embedding)) => {
                    identity.add_embedding(photo.clone(), embedding);
                    info!("Added embedding for {} from {}", name, photo.display());
                }
                Ok(None) => warn!("No face detected in {}", photo.display()),
                Err(e) => warn!("Failed to process {}: {}", photo.display(), e),
            }
        }

        if let Some(preview) = read_preview_id(&person_dir) {
            identity.set_preview_photo(&preview);
        }

        if !identity.embeddings().is_empty() {
            gallery.insert(identity);
        }
    }

    info!("Loaded {} people with embeddings", gallery.len());
    Ok(gallery)
}

/// Embedding of the largest face in a photo
fn embed_photo(
    photo: &Path,
    detector: &dyn FaceDetector,
    settings: &RuntimeSettings,
) -> Result<Option<Vec<f32>>> {
    let image = image::open(photo)?.to_rgb8();
    let detections = detect_with_retry(detector, &image, settings)?;
    Ok(detections
        .into_iter()
        .max_by_key(|d| d.bbox.area())
        .map(|d| d.embedding))
}

fn find_cue_file(dir: &Path) -> Result<Option<PathBuf>> {
    // Extension preference order first, then file name
    let files = files_with_extensions(dir, CUE_EXTENSIONS)?;
    Ok(CUE_EXTENSIONS.iter().find_map(|ext| {
        files
            .iter()
            .find(|f| has_extension(f, ext))
            .cloned()
    }))
}

fn files_with_extensions(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && extensions.iter().any(|ext| has_extension(p, ext)))
        .collect();
    files.sort();
    Ok(files)
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn read_preview_id(dir: &Path) -> Option<String> {
    let id = std::fs::read_to_string(dir.join(PREVIEW_FILE)).ok()?;
    let id = id.trim().to_string();
    dir.join(&id).exists().then_some(id)
}
