// Contact-list visibility preference and its on-disk form.

use huddle_common::types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Whether the user has ever pinned an explicit visible subset.
///
/// `ExplicitSet` with an empty set means "show nobody" and is distinct
/// from `NoPreference`, which means "show everyone not hidden". The
/// on-disk form preserves this: an absent `visible` key is
/// `NoPreference`, a present-but-empty list is an explicit empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VisibilityPreference {
    #[default]
    NoPreference,
    ExplicitSet(BTreeSet<UserId>),
}

/// Per-user filter deciding which contacts the roster shows.
///
/// The hidden set is the legacy fallback, consulted only while no
/// explicit preference exists. `remove` is the only mutation, and the
/// only path from `NoPreference` to `ExplicitSet`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityFilter {
    hidden: BTreeSet<UserId>,
    preference: VisibilityPreference,
}

impl VisibilityFilter {
    /// Contacts from `roster` that pass the filter, in roster order.
    pub fn compute_visible(&self, roster: &[UserId]) -> Vec<UserId> {
        match &self.preference {
            VisibilityPreference::NoPreference => {
                roster.iter().filter(|id| !self.hidden.contains(id)).cloned().collect()
            }
            VisibilityPreference::ExplicitSet(visible) => {
                roster.iter().filter(|id| visible.contains(id)).cloned().collect()
            }
        }
    }

    pub fn is_hidden(&self, user_id: &UserId) -> bool {
        self.hidden.contains(user_id)
    }

    pub fn preference(&self) -> &VisibilityPreference {
        &self.preference
    }

    /// Remove `user_id` from view permanently: record it in the hidden
    /// set, then pin the visible subset to what the roster currently
    /// shows without it. The pinned set persists even when it is empty,
    /// which is a different durable state than never having chosen.
    pub fn remove(&mut self, user_id: &UserId, roster: &[UserId]) {
        self.hidden.insert(user_id.clone());
        let visible = self
            .compute_visible(roster)
            .into_iter()
            .filter(|id| id != user_id)
            .collect::<BTreeSet<_>>();
        self.preference = VisibilityPreference::ExplicitSet(visible);
    }
}

/// Serialized form. `visible = None` round-trips as an absent key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct VisibilityFile {
    #[serde(default)]
    hidden: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    visible: Option<Vec<UserId>>,
}

/// Durable store for the visibility filter, one TOML file per user.
#[derive(Debug, Clone)]
pub struct VisibilityStore {
    path: PathBuf,
}

impl VisibilityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default location, `~/.huddle/visibility.toml`.
    pub fn default_location() -> Self {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(".huddle").join("visibility.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the filter; a missing file yields the default (nothing
    /// hidden, no preference).
    pub fn load(&self) -> Result<VisibilityFilter, StateError> {
        if !self.path.exists() {
            return Ok(VisibilityFilter::default());
        }
        let raw = fs::read_to_string(&self.path)?;
        let file: VisibilityFile = toml::from_str(&raw)?;
        Ok(VisibilityFilter {
            hidden: file.hidden.into_iter().collect(),
            preference: match file.visible {
                None => VisibilityPreference::NoPreference,
                Some(ids) => VisibilityPreference::ExplicitSet(ids.into_iter().collect()),
            },
        })
    }

    pub fn save(&self, filter: &VisibilityFilter) -> Result<(), StateError> {
        let file = VisibilityFile {
            hidden: filter.hidden.iter().cloned().collect(),
            visible: match &filter.preference {
                VisibilityPreference::NoPreference => None,
                VisibilityPreference::ExplicitSet(ids) => Some(ids.iter().cloned().collect()),
            },
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(&file)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }
}
