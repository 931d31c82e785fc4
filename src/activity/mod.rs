//! Activity payload and the `SET_ACTIVITY` command.
//!
//! An [`Activity`] is what the host displays as the user's status. Every
//! field is optional and absent fields are left out of the JSON entirely.
//! Sending no activity at all (`null`) clears the status.

pub mod template;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub use template::ActivityTemplate;

/// Command name for presence updates.
pub const SET_ACTIVITY: &str = "SET_ACTIVITY";

/// Kind of activity, shown as the verb before the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ActivityKind {
    /// "Playing ..."
    Playing,
    /// "Streaming ..."
    Streaming,
    /// "Listening to ..."
    Listening,
    /// "Watching ..."
    Watching,
    /// Custom status.
    Custom,
    /// "Competing in ..."
    Competing,
}

impl From<ActivityKind> for u8 {
    fn from(kind: ActivityKind) -> Self {
        match kind {
            ActivityKind::Playing => 0,
            ActivityKind::Streaming => 1,
            ActivityKind::Listening => 2,
            ActivityKind::Watching => 3,
            ActivityKind::Custom => 4,
            ActivityKind::Competing => 5,
        }
    }
}

impl TryFrom<u8> for ActivityKind {
    type Error = String;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Playing),
            1 => Ok(Self::Streaming),
            2 => Ok(Self::Listening),
            3 => Ok(Self::Watching),
            4 => Ok(Self::Custom),
            5 => Ok(Self::Competing),
            other => Err(format!("unknown activity type {other}")),
        }
    }
}

/// Image keys and hover text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assets {
    /// Large image asset key or URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    /// Hover text for the large image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    /// Small image asset key or URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    /// Hover text for the small image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

impl Assets {
    /// Returns `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        self.large_image.is_none()
            && self.large_text.is_none()
            && self.small_image.is_none()
            && self.small_text.is_none()
    }
}

/// Unix timestamps in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// When the activity started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// When the activity will end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

/// The presence payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Activity kind.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ActivityKind>,
    /// Stream URL (only shown for streaming activities).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Second line, e.g. the artist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// First line, e.g. the track title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Assets>,
    /// Elapsed/remaining time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,
    /// Host-defined flag bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u32>,
}

/// Build the `SET_ACTIVITY` command body.
///
/// `None` serializes as `"activity": null`, which clears the status. Each call
/// gets a fresh v4 UUID nonce.
pub fn set_activity_command(pid: u32, activity: Option<&Activity>) -> Value {
    json!({
        "cmd": SET_ACTIVITY,
        "args": {
            "pid": pid,
            "activity": activity,
        },
        "nonce": uuid::Uuid::new_v4().to_string(),
    })
}
