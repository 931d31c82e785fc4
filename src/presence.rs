//! Player status to activity mapping.
//!
//! The external player reports what it is doing as [`PlayerStatus`] values
//! (one JSON object per line on the CLI). [`PresenceTemplates`] turns each
//! status into an [`Activity`], and [`PresenceTracker`] decides which reports
//! are worth sending to the host at all.
//!
//! # Status Format
//!
//! ```json
//! {"status": "idle"}
//! {"status": "playing", "title": "Hoppípolla", "artist": "Sigur Rós",
//!  "album": "Takk...", "currentTime": 12, "duration": 268,
//!  "cover": [{"size": "640x640", "url": "https://..."}]}
//! ```
//!
//! Extra keys on a playing status are kept and can be referenced from
//! templates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::activity::{Activity, ActivityKind, ActivityTemplate, Timestamps};

/// One cover image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artwork {
    /// Size label such as `"640x640"`.
    #[serde(default)]
    pub size: String,
    /// Image URL.
    pub url: String,
}

/// Track currently playing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    /// Track title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Artist name(s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    /// Album title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    /// Cover images in every size the player offers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cover: Vec<Artwork>,
    /// Playback position in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    /// Track length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Any other reported fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NowPlaying {
    /// Whether two reports describe the same track.
    pub fn same_track(&self, other: &Self) -> bool {
        self.title == other.title && self.artist == other.artist && self.album == other.album
    }

    /// Elapsed/remaining timestamps relative to `now`.
    ///
    /// `start` is when playback would have begun given the current position;
    /// `end` is `start` plus the track length. Both are Unix milliseconds.
    pub fn timestamps(&self, now: DateTime<Utc>) -> Timestamps {
        let now_ms = now.timestamp_millis();
        let elapsed_ms = self.current_time.map_or(0, seconds_to_ms);
        let start = now_ms - elapsed_ms;
        Timestamps {
            start: Some(start),
            end: self.duration.map(|d| start + seconds_to_ms(d)),
        }
    }

    /// Fields exposed to templates.
    pub fn template_fields(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

fn seconds_to_ms(seconds: f64) -> i64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as i64
    } else {
        0
    }
}

/// What the player is doing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PlayerStatus {
    /// Nothing playing (paused, stopped, browsing).
    Idle,
    /// A track is playing.
    Playing(NowPlaying),
}

impl PlayerStatus {
    /// Parse one status line.
    pub fn from_json(line: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(line)?)
    }
}

/// Templates for each player status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceTemplates {
    /// Used while nothing plays.
    pub idle: ActivityTemplate,
    /// Used while a track plays; fields are the [`NowPlaying`] keys.
    pub playing: ActivityTemplate,
}

impl Default for PresenceTemplates {
    fn default() -> Self {
        Self {
            idle: ActivityTemplate {
                name: Some("TIDAL".to_string()),
                kind: Some(ActivityKind::Listening),
                details: Some("Browsing TIDAL".to_string()),
                large_image: Some("tidal".to_string()),
                large_text: Some("TIDAL".to_string()),
                ..ActivityTemplate::default()
            },
            playing: ActivityTemplate {
                name: Some("TIDAL".to_string()),
                kind: Some(ActivityKind::Listening),
                details: Some("{title}".to_string()),
                state: Some("{artist}".to_string()),
                large_image: Some(r#"@{cover.find(size == "640x640").url}"#.to_string()),
                large_text: Some("{album}".to_string()),
                small_image: Some("tidal".to_string()),
                small_text: Some("TIDAL".to_string()),
                timestamps: true,
                ..ActivityTemplate::default()
            },
        }
    }
}

impl PresenceTemplates {
    /// Build the activity for a status.
    pub fn activity_for(&self, status: &PlayerStatus, now: DateTime<Utc>) -> Activity {
        match status {
            PlayerStatus::Idle => self.idle.build(&json!({}), None),
            PlayerStatus::Playing(track) => self
                .playing
                .build(&track.template_fields(), Some(track.timestamps(now))),
        }
    }
}

/// Filters player reports down to meaningful changes.
///
/// Players report on a fixed interval, mostly with nothing new but the
/// position. Only a different track or a switch between idle and playing
/// is reported as a change.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    last: Option<PlayerStatus>,
}

impl PresenceTracker {
    /// Create a tracker that treats the first report as a change.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report. Returns `true` if it should be sent.
    pub fn observe(&mut self, status: &PlayerStatus) -> bool {
        let changed = match (&self.last, status) {
            (None, _) => true,
            (Some(PlayerStatus::Idle), PlayerStatus::Idle) => false,
            (Some(PlayerStatus::Playing(old)), PlayerStatus::Playing(new)) => !old.same_track(new),
            _ => true,
        };
        self.last = Some(status.clone());
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn playing_line() -> &'static str {
        r#"{"status":"playing","title":"Hoppípolla","artist":"Sigur Rós","album":"Takk...",
            "currentTime":12,"duration":268.5,"year":2005,
            "cover":[{"size":"80x80","url":"https://img/80.jpg"},{"size":"640x640","url":"https://img/640.jpg"}]}"#
    }

    #[test]
    fn test_parse_statuses() {
        assert_eq!(PlayerStatus::from_json(r#"{"status":"idle"}"#).unwrap(), PlayerStatus::Idle);

        let PlayerStatus::Playing(track) = PlayerStatus::from_json(playing_line()).unwrap() else {
            panic!("expected playing");
        };
        assert_eq!(track.title.as_deref(), Some("Hoppípolla"));
        assert_eq!(track.current_time, Some(12.0));
        assert_eq!(track.cover.len(), 2);
        assert_eq!(track.extra.get("year"), Some(&json!(2005)));

        assert!(PlayerStatus::from_json(r#"{"status":"rewinding"}"#).is_err());
        assert!(PlayerStatus::from_json("not json").is_err());
    }

    #[test]
    fn test_idle_activity() {
        let activity = PresenceTemplates::default().activity_for(&PlayerStatus::Idle, now());
        assert_eq!(
            serde_json::to_value(&activity).unwrap(),
            json!({
                "name": "TIDAL",
                "type": 2,
                "details": "Browsing TIDAL",
                "assets": {"large_image": "tidal", "large_text": "TIDAL"}
            })
        );
    }

    #[test]
    fn test_playing_activity() {
        let status = PlayerStatus::from_json(playing_line()).unwrap();
        let activity = PresenceTemplates::default().activity_for(&status, now());

        assert_eq!(activity.details.as_deref(), Some("Hoppípolla"));
        assert_eq!(activity.state.as_deref(), Some("Sigur Rós"));
        let assets = activity.assets.unwrap();
        assert_eq!(assets.large_image.as_deref(), Some("https://img/640.jpg"));
        assert_eq!(assets.large_text.as_deref(), Some("Takk..."));
        assert_eq!(assets.small_image.as_deref(), Some("tidal"));

        let stamps = activity.timestamps.unwrap();
        assert_eq!(stamps.start, Some(1_700_000_000_000 - 12_000));
        assert_eq!(stamps.end, Some(1_700_000_000_000 - 12_000 + 268_500));
    }

    #[test]
    fn test_playing_without_artwork_or_artist() {
        let status = PlayerStatus::Playing(NowPlaying {
            title: Some("Untitled".to_string()),
            ..NowPlaying::default()
        });
        let activity = PresenceTemplates::default().activity_for(&status, now());
        assert_eq!(activity.state, None);
        let assets = activity.assets.unwrap();
        assert_eq!(assets.large_image, None);
        assert_eq!(assets.large_text, None);

        let stamps = activity.timestamps.unwrap();
        assert_eq!(stamps.start, Some(1_700_000_000_000));
        assert_eq!(stamps.end, None);
    }

    #[test]
    fn test_extra_fields_reach_templates() {
        let mut templates = PresenceTemplates::default();
        templates.playing.large_text = Some("{album} ({year})".to_string());
        let status = PlayerStatus::from_json(playing_line()).unwrap();
        let activity = templates.activity_for(&status, now());
        assert_eq!(
            activity.assets.unwrap().large_text.as_deref(),
            Some("Takk... (2005)")
        );
    }

    #[test]
    fn test_templates_deserialize_partial() {
        let templates: PresenceTemplates =
            serde_json::from_str(r#"{"idle": {"details": "Paused"}}"#).unwrap();
        assert_eq!(templates.idle.details.as_deref(), Some("Paused"));
        assert_eq!(templates.idle.name, None);
        assert_eq!(templates.playing, PresenceTemplates::default().playing);
    }

    #[test]
    fn test_tracker_reports_only_changes() {
        let mut tracker = PresenceTracker::new();
        let track = |title: &str, position: f64| {
            PlayerStatus::Playing(NowPlaying {
                title: Some(title.to_string()),
                current_time: Some(position),
                ..NowPlaying::default()
            })
        };

        assert!(tracker.observe(&PlayerStatus::Idle));
        assert!(!tracker.observe(&PlayerStatus::Idle));
        assert!(tracker.observe(&track("A", 0.0)));
        assert!(!tracker.observe(&track("A", 1.0)));
        assert!(tracker.observe(&track("B", 0.0)));
        assert!(tracker.observe(&PlayerStatus::Idle));

    }
}
