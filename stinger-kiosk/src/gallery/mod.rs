//! Gallery of known identities, nearest-embedding matching and the audio
//! cue cooldown policy
//!
//! Identities are created and edited by gallery management outside the
//! kiosk core. The core only reads them, except for the `last_seen` and
//! `last_played` timestamps which [`Gallery::register_sightings`] updates
//! once per recognition cycle.

mod loader;

pub use loader::load_gallery;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use stinger_common::events::{Detection, MatchResult, TriggeredCue};
use stinger_common::time::seconds_between;

/// Gallery shared between the kiosk loop and the recognition worker
pub type SharedGallery = Arc<RwLock<Gallery>>;

const COSINE_EPSILON: f64 = 1e-8;

/// Cosine distance `1 - a·b / (|a||b| + ε)`
///
/// Embeddings of different lengths come from different models and are
/// reported as maximally distant (2.0).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 2.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt() + COSINE_EPSILON)) as f32
}

/// A named gallery entry
///
/// `embeddings[i]` was computed from `photos[i]`; the two lists only change
/// together.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    name: String,
    embeddings: Vec<Vec<f32>>,
    photos: Vec<PathBuf>,
    cue_path: Option<PathBuf>,
    preview_photo: Option<String>,
    last_seen: Option<DateTime<Utc>>,
    last_played: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embeddings: Vec::new(),
            photos: Vec::new(),
            cue_path: None,
            preview_photo: None,
            last_seen: None,
            last_played: None,
        }
    }

    /// Builder-style cue assignment
    pub fn with_cue(mut self, cue_path: impl Into<PathBuf>) -> Self {
        self.cue_path = Some(cue_path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embeddings(&self) -> &[Vec<f32>] {
        &self.embeddings
    }

    pub fn photos(&self) -> &[PathBuf] {
        &self.photos
    }

    pub fn cue_path(&self) -> Option<&Path> {
        self.cue_path.as_deref()
    }

    pub fn has_cue(&self) -> bool {
        self.cue_path.is_some()
    }

    pub fn set_cue(&mut self, cue_path: Option<PathBuf>) {
        self.cue_path = cue_path;
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    pub fn last_played(&self) -> Option<DateTime<Utc>> {
        self.last_played
    }

    /// Append a photo and the embedding computed from it
    pub fn add_embedding(&mut self, photo: impl Into<PathBuf>, embedding: Vec<f32>) {
        self.photos.push(photo.into());
        self.embeddings.push(embedding);
    }

    /// Remove a photo (by file name) together with its embedding
    ///
    /// Returns false if no photo has that name. Clears the preview if it
    /// pointed at the removed photo.
    pub fn remove_photo(&mut self, photo_id: &str) -> bool {
        let Some(idx) = self.photos.iter().position(|p| photo_file_name(p) == Some(photo_id)) else {
            return false;
        };
        self.photos.remove(idx);
        self.embeddings.remove(idx);
        if self.preview_photo.as_deref() == Some(photo_id) {
            self.preview_photo = None;
        }
        true
    }

    /// Choose which photo represents this identity; it must already be present
    pub fn set_preview_photo(&mut self, photo_id: &str) -> bool {
        if self.photos.iter().any(|p| photo_file_name(p) == Some(photo_id)) {
            self.preview_photo = Some(photo_id.to_string());
            true
        } else {
            false
        }
    }

    /// Explicit preview photo, falling back to the first photo
    pub fn preview_photo(&self) -> Option<&Path> {
        self.preview_photo
            .as_deref()
            .and_then(|id| self.photos.iter().find(|p| photo_file_name(p) == Some(id)))
            .or_else(|| self.photos.first())
            .map(PathBuf::as_path)
    }

    /// Cue eligibility for a sighting at `now`
    ///
    /// Eligible iff the identity has a cue and either it never played, or
    /// the gap since the previous sighting (not since the previous play) is
    /// at least `cooldown_seconds`. Must be evaluated before
    /// [`Identity::mark_seen`] for the same sighting.
    pub fn should_play(&self, now: DateTime<Utc>, cooldown_seconds: f64) -> bool {
        if !self.has_cue() {
            return false;
        }
        if self.last_played.is_none() {
            return true;
        }
        match self.last_seen {
            Some(seen) => seconds_between(seen, now) >= cooldown_seconds,
            None => true,
        }
    }

    pub fn mark_seen(&mut self, now: DateTime<Utc>) {
        self.last_seen = Some(now);
    }

    pub fn mark_played(&mut self, now: DateTime<Utc>) {
        self.last_played = Some(now);
    }
}

fn photo_file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// All known identities, keyed by name
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: BTreeMap<String, Identity>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedGallery {
        Arc::new(RwLock::new(self))
    }

    /// Insert or replace an identity
    pub fn insert(&mut self, identity: Identity) -> Option<Identity> {
        self.identities.insert(identity.name.clone(), identity)
    }

    pub fn remove(&mut self, name: &str) -> Option<Identity> {
        self.identities.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.identities.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Identity> {
        self.identities.get_mut(name)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    /// Nearest identity over every embedding of every identity
    ///
    /// Returns `(None, f32::INFINITY)` when the gallery holds no embeddings.
    pub fn best_match(&self, embedding: &[f32]) -> (Option<&str>, f32) {
        let mut best_name = None;
        let mut best_distance = f32::INFINITY;

        for identity in self.identities.values() {
            for candidate in &identity.embeddings {
                let distance = cosine_distance(embedding, candidate);
                if distance < best_distance {
                    best_distance = distance;
                    best_name = Some(identity.name.as_str());
                }
            }
        }

        (best_name, best_distance)
    }

    /// Match a detection against the gallery
    ///
    /// Confident iff the nearest distance is strictly below `distance_threshold`;
    /// otherwise the identity is reported as unknown.
    pub fn classify(&self, detection: Detection, distance_threshold: f32) -> MatchResult {
        let (name, distance) = self.best_match(&detection.embedding);
        let is_match = distance < distance_threshold;
        MatchResult {
            identity: if is_match { name.map(str::to_string) } else { None },
            detection,
            distance,
            is_match,
        }
    }

    /// Apply the cooldown policy for one cycle's results
    ///
    /// For each confident match, in order: evaluate cue eligibility against
    /// the previous `last_seen`, mark the identity seen, then mark it played
    /// and emit a [`TriggeredCue`] if it was eligible.
    pub fn register_sightings(
        &mut self,
        results: &[MatchResult],
        now: DateTime<Utc>,
        cooldown_seconds: f64,
    ) -> Vec<TriggeredCue> {
        let mut triggered = Vec::new();

        for result in results.iter().filter(|r| r.is_match) {
            let Some(identity) = result
                .identity
                .as_deref()
                .and_then(|name| self.identities.get_mut(name))
            else {
                continue;
            };

            let should_play = identity.should_play(now, cooldown_seconds);
            identity.mark_seen(now);

            if should_play {
                if let Some(cue_path) = identity.cue_path.clone() {
                    identity.mark_played(now);
                    triggered.push(TriggeredCue {
                        identity: identity.name.clone(),
                        cue_path,
                    });
                }
            }
        }

        triggered
    }
}
