//! Rigid transforms (rotation + translation, no scale).

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

/// A rotation followed by a translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Orientation
    pub rotation: DQuat,
    /// Position
    pub translation: DVec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// The identity transform.
    pub const IDENTITY: Self = Self {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Creates a transform from rotation and translation.
    #[must_use]
    pub const fn new(rotation: DQuat, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Creates a pure translation.
    #[must_use]
    pub const fn from_translation(translation: DVec3) -> Self {
        Self::new(DQuat::IDENTITY, translation)
    }

    /// Maps a point from local to world space.
    #[must_use]
    pub fn transform_point(&self, local: DVec3) -> DVec3 {
        self.rotation * local + self.translation
    }

    /// Maps a point from world to local space.
    #[must_use]
    pub fn inverse_transform_point(&self, world: DVec3) -> DVec3 {
        self.rotation.inverse() * (world - self.translation)
    }

    /// Rotates a direction from local to world space.
    #[must_use]
    pub fn transform_vector(&self, local: DVec3) -> DVec3 {
        self.rotation * local
    }

    /// Rotates a direction from world to local space.
    #[must_use]
    pub fn inverse_transform_vector(&self, world: DVec3) -> DVec3 {
        self.rotation.inverse() * world
    }

    /// Returns the inverse transform.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }
}
