//! Volume registry
//!
//! Every label ever issued stays in the registry for the lifetime of the
//! archive, including destroyed ones, so a label is never handed out twice.

use std::collections::BTreeMap;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::label::{generate_label, validate_label, MAX_LABEL_ATTEMPTS};
use super::Medium;
use crate::errors::{ArcdError, ArcdResult};

/// Lifecycle status of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeStatus {
    Active,
    Destroyed,
}

impl VolumeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeStatus::Active => "active",
            VolumeStatus::Destroyed => "destroyed",
        }
    }
}

/// A known volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub label: String,
    pub medium: Medium,
    /// Where the volume was last seen; not a promise it is still there
    pub location: Option<String>,
    pub status: VolumeStatus,
    /// First registration time (RFC3339)
    pub created_at: String,
}

impl Volume {
    pub fn is_active(&self) -> bool {
        self.status == VolumeStatus::Active
    }
}

/// Registry of all volume identities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeRegistry {
    volumes: BTreeMap<String, Volume>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a volume, or refresh the location of a known one.
    ///
    /// Status and medium of a known volume are left untouched; a destroyed
    /// volume stays destroyed until explicitly reactivated.
    pub fn register(
        &mut self,
        label: &str,
        medium: Medium,
        location: Option<String>,
    ) -> ArcdResult<&Volume> {
        validate_label(label)?;

        let volume = self
            .volumes
            .entry(label.to_string())
            .or_insert_with(|| Volume {
                label: label.to_string(),
                medium,
                location: None,
                status: VolumeStatus::Active,
                created_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            });
        if location.is_some() {
            volume.location = location;
        }
        Ok(volume)
    }

    /// Mark a volume destroyed
    pub fn mark_destroyed(&mut self, label: &str) -> ArcdResult<()> {
        self.set_status(label, VolumeStatus::Destroyed)
    }

    /// Clear the destroyed status of a volume
    pub fn reactivate(&mut self, label: &str) -> ArcdResult<()> {
        self.set_status(label, VolumeStatus::Active)
    }

    fn set_status(&mut self, label: &str, status: VolumeStatus) -> ArcdResult<()> {
        let volume = self
            .volumes
            .get_mut(label)
            .ok_or_else(|| ArcdError::not_found(format!("volume {}", label)))?;
        volume.status = status;
        Ok(())
    }

    pub fn get(&self, label: &str) -> Option<&Volume> {
        self.volumes.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.volumes.contains_key(label)
    }

    pub fn is_destroyed(&self, label: &str) -> bool {
        self.volumes
            .get(label)
            .map(|v| v.status == VolumeStatus::Destroyed)
            .unwrap_or(false)
    }

    /// All volumes ordered by label
    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes.values()
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Draw a label not used by any volume, active or destroyed
    pub fn new_label<R: Rng + ?Sized>(&self, rng: &mut R, length: usize) -> ArcdResult<String> {
        for _ in 0..MAX_LABEL_ATTEMPTS {
            let label = generate_label(rng, length);
            if !self.contains(&label) {
                return Ok(label);
            }
        }
        Err(ArcdError::config(format!(
            "No unused label of length {} after {} attempts; increase label_length",
            length, MAX_LABEL_ATTEMPTS
        )))
    }
}
