//! Child profile data model.
//!
//! Only the fields the sync and share code reasons about are typed; every
//! other field round-trips untouched through `extra`, so the profile screens
//! can evolve without this crate following along.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::time::unix_millis;

/// Current `SyncSnapshot` layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A single journal entry (medical note, school report, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    /// Category id, e.g. `"medical"`. Free-form to allow custom categories.
    pub category: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Display configuration of a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stand-in for a photo that stays on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRef {
    pub id: String,
    pub has_photo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildProfile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    /// Inline image data (data URL or base64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_ref: Option<PhotoRef>,
    #[serde(default)]
    pub entries: Vec<Entry>,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChildProfile {
    /// Key under which the device keeps this profile's photo.
    pub fn photo_id(&self) -> String {
        format!("photo_{}", self.id)
    }

    /// `preferred_name` when set, else `name`.
    pub fn display_name(&self) -> &str {
        self.preferred_name.as_deref().unwrap_or(&self.name)
    }

    /// Copy of this profile with the photo swapped for a `PhotoRef`.
    ///
    /// Photos are large and would blow past the blob server's size limits,
    /// so they never enter a sync snapshot.
    pub fn prepared_for_sync(&self) -> Self {
        let mut profile = self.clone();
        if let Some(photo) = profile.photo.take() {
            profile.photo_ref = Some(PhotoRef {
                id: self.photo_id(),
                has_photo: !photo.is_empty(),
                updated_at: self.updated_at.clone(),
            });
        }
        profile
    }

    /// Put a locally cached photo back after a pull.
    ///
    /// `photos` maps `photo_id` to image data. The reference is dropped once
    /// it has been resolved (or found to point nowhere).
    pub fn restore_photo(&mut self, photos: &HashMap<String, String>) {
        let Some(photo_ref) = self.photo_ref.as_ref() else {
            return;
        };
        if !photo_ref.has_photo {
            return;
        }
        if let Some(data) = photos.get(&photo_ref.id) {
            self.photo = Some(data.clone());
        }
        self.photo_ref = None;
    }
}

/// The whole-device unit that sync pushes and pulls.
///
/// Conflict handling is last-write-wins on this entire value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub version: u32,
    #[serde(default)]
    pub profiles: Vec<ChildProfile>,
    #[serde(default)]
    pub settings: Value,
    /// Unix milliseconds at which the snapshot was taken.
    #[serde(default)]
    pub updated_at: i64,
}

impl SyncSnapshot {
    pub fn new(profiles: Vec<ChildProfile>, settings: Value) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            profiles,
            settings,
            updated_at: unix_millis(),
        }
    }

    /// Snapshot with no profiles, used to create a fresh sync group.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Value::Object(Map::new()))
    }

    pub fn prepared_for_sync(&self) -> Self {
        Self {
            version: self.version,
            profiles: self
                .profiles
                .iter()
                .map(ChildProfile::prepared_for_sync)
                .collect(),
            settings: self.settings.clone(),
            updated_at: self.updated_at,
        }
    }

    pub fn restore_photos(&mut self, photos: &HashMap<String, String>) {
        for profile in &mut self.profiles {
            profile.restore_photo(photos);
        }
    }
}
