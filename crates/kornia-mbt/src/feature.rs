//! Boundary with the point feature tracker.
//!
//! The tracker only needs persistent integer ids and sub-pixel positions. Any KLT backend
//! can be plugged in by implementing [`FeatureTrack`].

use glam::DVec2;

use crate::camera::ImageSize;
use crate::error::FeatureTrackError;
use crate::geometry::Mask;

/// Persistent identifier of a tracked feature.
pub type FeatureId = i64;

/// A tracked point feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    /// Identifier, stable across frames while the feature is tracked.
    pub id: FeatureId,
    /// Column of the feature in pixels.
    pub x: f64,
    /// Row of the feature in pixels.
    pub y: f64,
}

impl Feature {
    /// Position as a vector.
    pub fn position(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }
}

/// Point feature tracker consumed by the model-based tracker.
pub trait FeatureTrack {
    /// Image type accepted by the backend.
    type Image;

    /// Size of an image.
    fn image_size(image: &Self::Image) -> ImageSize;

    /// Track the current features into `image`.
    fn track(&mut self, image: &Self::Image) -> Result<(), FeatureTrackError>;

    /// Number of currently tracked features.
    fn feature_count(&self) -> usize;

    /// Feature at `index` in `0..feature_count()`.
    fn feature(&self, index: usize) -> Option<Feature>;

    /// Detect a fresh set of features inside the non-zero area of `mask`.
    fn init_tracking(&mut self, image: &Self::Image, mask: &Mask)
        -> Result<(), FeatureTrackError>;

    /// Restart tracking from the given positions, keeping their ids.
    fn init_tracking_with_seeds(
        &mut self,
        image: &Self::Image,
        seeds: &[Feature],
    ) -> Result<(), FeatureTrackError>;

    /// All currently tracked features.
    fn features(&self) -> Vec<Feature> {
        (0..self.feature_count())
            .filter_map(|i| self.feature(i))
            .collect()
    }
}
