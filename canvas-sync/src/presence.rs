//! Presence: who is looking where on the canvas.
//!
//! ## Data flow
//!
//! ```text
//! pointer sample (every sample interval)
//!       │
//!       ▼
//! PresencePublisher::sample()      (throttled, non-finite skipped)
//!       │
//!       ▼   PresenceStore::publish
//! store ──► full record set ──► PresenceSubscriber::receive()
//!                                   │  (drop self, drop stale)
//!                                   ▼
//!                          advance(dt)  (cursor easing)
//!                                   │
//!                                   ▼
//!                          project(&camera)  → screen-space cursors
//! ```
//!
//! Presence has no leave message. A record whose `last_active` is older
//! than the staleness threshold is simply not shown.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use uuid::Uuid;

use crate::projection::{Camera, Vec2};

// ───────────────────────────────────────────────────────────────────
// Identity
// ───────────────────────────────────────────────────────────────────

/// RGBA color for cursor rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl CursorColor {
    /// Stable, vivid color derived from a user id.
    pub fn from_uuid(id: Uuid) -> Self {
        let hue = ((id.as_u128() % 360) as f32) / 360.0;
        let (r, g, b) = hsl_to_rgb(hue, 0.7, 0.6);
        Self { r, g, b, a: 1.0 }
    }

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// `#rrggbb`, alpha dropped.
    pub fn to_hex(&self) -> String {
        let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        format!("#{:02x}{:02x}{:02x}", channel(self.r), channel(self.g), channel(self.b))
    }
}

impl Default for CursorColor {
    fn default() -> Self {
        Self { r: 0.26, g: 0.52, b: 0.96, a: 1.0 }
    }
}

fn hsl_to_rgb(h: f32, s: f32, l: f32) -> (f32, f32, f32) {
    if s == 0.0 {
        return (l, l, l);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;

    (
        hue_to_rgb(p, q, h + 1.0 / 3.0),
        hue_to_rgb(p, q, h),
        hue_to_rgb(p, q, h - 1.0 / 3.0),
    )
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

const ANONYMOUS: &str = "Anonymous";

/// The local viewer as the identity provider describes them.
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub name: Option<String>,
    pub email: Option<String>,
    /// Overrides the id-derived cursor color
    pub color: Option<CursorColor>,
}

impl UserProfile {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            name: None,
            email: None,
            color: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Profile name, else the email local-part, else "Anonymous".
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .map(str::trim)
            .filter(|local| !local.is_empty())
            .unwrap_or(ANONYMOUS)
            .to_string()
    }

    pub fn cursor_color(&self) -> CursorColor {
        self.color.unwrap_or_else(|| CursorColor::from_uuid(self.user_id))
    }
}

// ───────────────────────────────────────────────────────────────────
// Timestamps
// ───────────────────────────────────────────────────────────────────

/// Anything that can be read as milliseconds since the Unix epoch.
pub trait ResolveMillis {
    /// `None` when the value cannot be read.
    fn to_millis(&self) -> Option<i64>;

    /// Millis, or `now_ms` when unreadable. Never fails.
    fn resolve_millis(&self, now_ms: i64) -> i64 {
        self.to_millis().unwrap_or(now_ms)
    }
}

impl ResolveMillis for i64 {
    fn to_millis(&self) -> Option<i64> {
        Some(*self)
    }
}

/// Seconds + nanoseconds timestamp as document stores commonly emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTimestamp {
    pub seconds: i64,
    #[serde(default, alias = "nanos")]
    pub nanoseconds: u32,
}

impl ResolveMillis for ProviderTimestamp {
    fn to_millis(&self) -> Option<i64> {
        self.seconds
            .checked_mul(1000)?
            .checked_add(i64::from(self.nanoseconds / 1_000_000))
    }
}

/// A presence record's `last_active` as it arrived on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LastActive {
    EpochMillis(i64),
    Provider(ProviderTimestamp),
    #[default]
    Missing,
    /// Any other shape. Finite numbers are still read as millis.
    Other(Value),
}

impl ResolveMillis for LastActive {
    fn to_millis(&self) -> Option<i64> {
        match self {
            LastActive::EpochMillis(ms) => Some(*ms),
            LastActive::Provider(ts) => ts.to_millis(),
            LastActive::Missing => None,
            LastActive::Other(value) => value
                .as_f64()
                .filter(|ms| ms.is_finite())
                .map(|ms| ms.round() as i64),
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// ───────────────────────────────────────────────────────────────────
// Wire record
// ───────────────────────────────────────────────────────────────────

/// One participant's presence, refreshed on every publish tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: Uuid,
    pub display_name: String,
    pub color: CursorColor,
    /// Document coordinates, rounded to whole units
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub last_active: LastActive,
}

impl PresenceRecord {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x as f64, self.y as f64)
    }
}

// ───────────────────────────────────────────────────────────────────
// Publisher
// ───────────────────────────────────────────────────────────────────

/// Publisher outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub throttled: u64,
    /// Samples with no pointer or non-finite coordinates
    pub skipped: u64,
}

/// Turns pointer samples into throttled presence records.
///
/// Interval throttle: a sample inside the throttle window is dropped, not
/// deferred.
pub struct PresencePublisher {
    user_id: Uuid,
    display_name: String,
    color: CursorColor,
    throttle: Duration,
    last_publish: Option<Instant>,
    stats: PublishStats,
}

impl PresencePublisher {
    pub fn new(profile: &UserProfile, throttle: Duration) -> Self {
        Self {
            user_id: profile.user_id,
            display_name: profile.display_name(),
            color: profile.cursor_color(),
            throttle,
            last_publish: None,
            stats: PublishStats::default(),
        }
    }

    /// Returns a record to publish, or `None` if throttled or the pointer is
    /// outside the tracked surface.
    pub fn sample(
        &mut self,
        pointer: Option<Vec2>,
        now: Instant,
        wall_ms: i64,
    ) -> Option<PresenceRecord> {
        let Some(position) = pointer.filter(Vec2::is_finite) else {
            self.stats.skipped += 1;
            return None;
        };

        if let Some(last) = self.last_publish {
            if now.saturating_duration_since(last) < self.throttle {
                self.stats.throttled += 1;
                return None;
            }
        }

        self.last_publish = Some(now);
        self.stats.published += 1;
        Some(PresenceRecord {
            user_id: self.user_id,
            display_name: self.display_name.clone(),
            color: self.color,
            x: position.x.round() as i64,
            y: position.y.round() as i64,
            last_active: LastActive::EpochMillis(wall_ms),
        })
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }
}

// ───────────────────────────────────────────────────────────────────
// Subscriber
// ───────────────────────────────────────────────────────────────────

/// A remote participant's cursor, eased toward its latest reported position.
#[derive(Debug, Clone)]
pub struct RemoteCursor {
    pub user_id: Uuid,
    pub display_name: String,
    pub color: CursorColor,
    /// Rendered position (document coordinates, eased).
    current: Vec2,
    /// Last reported position.
    target: Vec2,
    last_active_ms: i64,
}

impl RemoteCursor {
    fn new(record: PresenceRecord, last_active_ms: i64) -> Self {
        let position = record.position();
        Self {
            user_id: record.user_id,
            display_name: record.display_name,
            color: record.color,
            current: position,
            target: position,
            last_active_ms,
        }
    }

    /// Apply a newer record. Records older than the one already held are
    /// ignored (delivery order is not guaranteed).
    fn retarget(&mut self, record: PresenceRecord, last_active_ms: i64) {
        if last_active_ms < self.last_active_ms {
            return;
        }
        self.target = record.position();
        self.display_name = record.display_name;
        self.color = record.color;
        self.last_active_ms = last_active_ms;
    }

    /// Frame-rate independent easing: `smoothing` is the fraction of the
    /// remaining distance kept per 1/60 s.
    fn advance(&mut self, dt: Duration, smoothing: f64) {
        let t = 1.0 - smoothing.powf(dt.as_secs_f64() * 60.0);
        self.current = self.current.lerp(&self.target, t.clamp(0.0, 1.0));
    }

    pub fn position(&self) -> Vec2 {
        self.current
    }

    pub fn target(&self) -> Vec2 {
        self.target
    }

    pub fn last_active_ms(&self) -> i64 {
        self.last_active_ms
    }

    pub fn is_stale(&self, now_ms: i64, stale_after_ms: i64) -> bool {
        now_ms.saturating_sub(self.last_active_ms) > stale_after_ms
    }
}

/// A remote cursor ready to draw, in screen coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorView {
    pub user_id: Uuid,
    pub display_name: String,
    pub color: CursorColor,
    pub screen: Vec2,
}

/// Filters the presence stream down to fresh, remote participants.
pub struct PresenceSubscriber {
    local_user_id: Uuid,
    stale_after_ms: i64,
    smoothing: f64,
    peers: HashMap<Uuid, RemoteCursor>,
}

impl PresenceSubscriber {
    pub fn new(local_user_id: Uuid, stale_after: Duration, smoothing: f64) -> Self {
        Self {
            local_user_id,
            stale_after_ms: i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX),
            smoothing,
            peers: HashMap::new(),
        }
    }

    /// Replace the peer set from a full presence snapshot.
    ///
    /// Drops the local user's own record and anything stale at `now_ms`.
    /// Peers missing from the snapshot are forgotten. Returns how many
    /// peers remain.
    pub fn receive(&mut self, records: Vec<PresenceRecord>, now_ms: i64) -> usize {
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            if record.user_id == self.local_user_id {
                continue;
            }

            let last_active_ms = match record.last_active.to_millis() {
                Some(ms) => ms,
                None => {
                    log::debug!(
                        "Presence from {} has unreadable last_active, treating as now",
                        record.user_id
                    );
                    now_ms
                }
            };
            if now_ms.saturating_sub(last_active_ms) > self.stale_after_ms {
                continue;
            }

            seen.insert(record.user_id);
            match self.peers.get_mut(&record.user_id) {
                Some(cursor) => cursor.retarget(record, last_active_ms),
                None => {
                    self.peers
                        .insert(record.user_id, RemoteCursor::new(record, last_active_ms));
                }
            }
        }

        self.peers.retain(|id, _| seen.contains(id));
        self.peers.len()
    }

    /// Ease every cursor toward its target by one frame of `dt`.
    pub fn advance(&mut self, dt: Duration) {
        for cursor in self.peers.values_mut() {
            cursor.advance(dt, self.smoothing);
        }
    }

    /// Peers still fresh at `now_ms`, ordered by user id.
    pub fn visible(&self, now_ms: i64) -> Vec<&RemoteCursor> {
        let mut visible: Vec<&RemoteCursor> = self
            .peers
            .values()
            .filter(|c| !c.is_stale(now_ms, self.stale_after_ms))
            .collect();
        visible.sort_by_key(|c| c.user_id);
        visible
    }

    /// Map visible cursors through `camera`. Call on every render; the
    /// result is only valid for the camera it was computed with.
    pub fn project(&self, camera: &Camera, now_ms: i64) -> Vec<CursorView> {
        self.visible(now_ms)
            .into_iter()
            .map(|cursor| CursorView {
                user_id: cursor.user_id,
                display_name: cursor.display_name.clone(),
                color: cursor.color,
                screen: camera.world_to_screen(cursor.current),
            })
            .collect()
    }

    pub fn peer(&self, user_id: &Uuid) -> Option<&RemoteCursor> {
        self.peers.get(user_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn local_user_id(&self) -> Uuid {
        self.local_user_id
    }
}
