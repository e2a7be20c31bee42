//! User identity and ephemeral presence (cursors/selections).
//!
//! Presence is non-authoritative metadata: each user owns exactly one entry
//! per room and updates are last-write-wins, so no conflict resolution is
//! needed. Entries carry a monotonic `last_seen` so idle users can be reaped
//! by the coordinator's sweep.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// RGBA color for rendering a user's cursor and selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl UserColor {
    /// Derive a stable, visually distinct color from a user id.
    ///
    /// The hue comes from an FNV-1a hash of the id (not the std hasher,
    /// whose seed varies between processes), so the same user renders the
    /// same color across reconnects and across replicas.
    pub fn from_id(id: &str) -> Self {
        let hash = fnv1a(id);
        let hue = ((hash % 360) as f32) / 360.0;
        let saturation = 0.7;
        let lightness = 0.6;

        let (r, g, b) = hsl_to_rgb(hue, saturation, lightness);
        Self { r, g, b, a: 1.0 }
    }

    /// Convert to `[f32; 4]` for renderers that want a flat array.
    pub fn to_array(&self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for UserColor {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96, a: 1.0 } // Default blue
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.as_bytes() {
        h ^= u64::from(*byte);
        h = h.wrapping_mul(0x100_0000_01b3);
    }
    h
}

/// HSL to RGB conversion helper.
fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l); // Achromatic
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    let r = hue_to_rgb(p, q, h + 1.0 / 3.0);
    let g = hue_to_rgb(p, q, h);
    let b = hue_to_rgb(p, q, h - 1.0 / 3.0);

    (r, g, b)
}

fn hue_to_rgb(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        return p + (q - p) * 6.0 * t;
    }
    if t < 1.0 / 2.0 {
        return q;
    }
    if t < 2.0 / 3.0 {
        return p + (q - p) * (2.0 / 3.0 - t) * 6.0;
    }
    p
}

/// A collaborating user. Identity is validated upstream; this layer only
/// carries it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
    pub color: UserColor,
}

impl User {
    /// Create a user with a generated v4 UUID id.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), display_name)
    }

    /// Create a user with an explicit id. The color is derived from the id,
    /// never stored independently.
    pub fn with_id(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let id = id.into();
        let color = UserColor::from_id(&id);
        Self {
            id,
            display_name: display_name.into(),
            color,
        }
    }
}

/// Cursor position in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPos {
    pub line: u32,
    pub column: u32,
}

/// A selected character range (`start..end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: usize,
    pub end: usize,
}

/// Wire form of a presence update. `last_seen` is deliberately absent;
/// the server stamps receipt time itself.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PresenceState {
    pub cursor: Option<CursorPos>,
    pub selection: Option<SelectionRange>,
}

/// Server-side presence entry for one user in one room.
#[derive(Debug, Clone)]
pub struct Presence {
    pub user_id: String,
    pub cursor: Option<CursorPos>,
    pub selection: Option<SelectionRange>,
    pub last_seen: Instant,
}

impl Presence {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            cursor: None,
            selection: None,
            last_seen: Instant::now(),
        }
    }

    /// Overwrite with a fresh state and stamp `last_seen`. Last write wins.
    pub fn update(&mut self, state: PresenceState) {
        self.cursor = state.cursor;
        self.selection = state.selection;
        self.last_seen = Instant::now();
    }

    /// The wire-visible part of this entry.
    pub fn state(&self) -> PresenceState {
        PresenceState {
            cursor: self.cursor,
            selection: self.selection,
        }
    }

    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.last_seen.elapsed() > threshold
    }
}
