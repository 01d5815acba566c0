//! Permission kinds and the per-device permission grant table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a permission name is outside the fixed set.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown permission kind: {0:?}")]
pub struct UnknownPermissionKind(pub String);

/// The fixed set of permissions a parent may ask the child for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionKind {
    Camera,
    Location,
    Notifications,
    Gallery,
    ScreenProjection,
}

impl PermissionKind {
    /// All kinds, in the order they appear in a serialized [`PermissionSet`].
    pub const ALL: [PermissionKind; 5] = [
        PermissionKind::Camera,
        PermissionKind::Location,
        PermissionKind::Notifications,
        PermissionKind::Gallery,
        PermissionKind::ScreenProjection,
    ];

    /// Wire name of this kind, e.g. `"screenProjection"`.
    pub fn as_str(self) -> &'static str {
        match self {
            PermissionKind::Camera => "camera",
            PermissionKind::Location => "location",
            PermissionKind::Notifications => "notifications",
            PermissionKind::Gallery => "gallery",
            PermissionKind::ScreenProjection => "screenProjection",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionKind {
    type Err = UnknownPermissionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PermissionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownPermissionKind(s.to_string()))
    }
}

/// Grant state for every [`PermissionKind`].
///
/// Serialized as a flat object so the parent UI can read it directly:
///
/// ```json
/// {"camera":false,"location":true,"notifications":false,"gallery":false,"screenProjection":false}
/// ```
///
/// A new set starts with every permission denied.  Grants are not monotone:
/// a re-request or an OS-level revocation can flip a permission back to
/// `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub camera: bool,
    pub location: bool,
    pub notifications: bool,
    pub gallery: bool,
    pub screen_projection: bool,
}

impl PermissionSet {
    /// Creates a set with every permission denied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the grant state of `kind`.
    pub fn is_granted(&self, kind: PermissionKind) -> bool {
        match kind {
            PermissionKind::Camera => self.camera,
            PermissionKind::Location => self.location,
            PermissionKind::Notifications => self.notifications,
            PermissionKind::Gallery => self.gallery,
            PermissionKind::ScreenProjection => self.screen_projection,
        }
    }

    /// Sets the grant state of `kind` and returns `true` if it changed.
    pub fn set(&mut self, kind: PermissionKind, granted: bool) -> bool {
        let slot = match kind {
            PermissionKind::Camera => &mut self.camera,
            PermissionKind::Location => &mut self.location,
            PermissionKind::Notifications => &mut self.notifications,
            PermissionKind::Gallery => &mut self.gallery,
            PermissionKind::ScreenProjection => &mut self.screen_projection,
        };
        let changed = *slot != granted;
        *slot = granted;
        changed
    }

    /// Iterates over `(kind, granted)` pairs in [`PermissionKind::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (PermissionKind, bool)> + '_ {
        PermissionKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.is_granted(kind)))
    }

    /// Returns the kinds that are currently granted.
    pub fn granted(&self) -> Vec<PermissionKind> {
        self.iter()
            .filter_map(|(kind, granted)| granted.then_some(kind))
            .collect()
    }
}
