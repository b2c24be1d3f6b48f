//! Play-event model: the immutable "this track was played" fact,
//! plus the recording policy that decides whether a playback
//! observation is worth turning into a fact at all.

use serde::{Deserialize, Serialize};

/// Minimum listening time before a play counts, unless the track
/// itself is shorter than this.
pub const MIN_LISTEN_MS: u64 = 60_000;

/// A single qualifying listen. Created once, never mutated except
/// through [`PlayEvent::apply_patch`] (catalog rename propagation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayEvent {
    /// Wall-clock ms. `(timestamp, song_id)` is the natural key:
    /// two genuine plays of the same song cannot land on the same
    /// millisecond.
    pub timestamp: i64,
    pub song_id: String,
    pub song_name: String,
    #[serde(default)]
    pub artist_ids: Vec<String>,
    #[serde(default)]
    pub artist_names: Vec<String>,
    pub album_id: String,
    pub album_name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    pub listened_ms: u64,
    pub track_duration_ms: u64,
}

/// What the playback engine knows about the current track. Display
/// fields are optional; construction substitutes placeholders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackInfo {
    pub song_id: String,
    pub song_name: Option<String>,
    pub artist_ids: Vec<String>,
    pub artist_names: Vec<String>,
    pub album_id: Option<String>,
    pub album_name: Option<String>,
    pub genres: Vec<String>,
    pub year: Option<i32>,
    pub duration_ms: u64,
}

/// Dedup/idempotency key shared by queue drain, read-side merge,
/// import and the server's storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub timestamp: i64,
    pub song_id: String,
}

/// Which catalog entity a metadata patch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchKind {
    Song,
    Album,
    Artist,
}

/// Display-field updates carried by a metadata patch. Ids, timestamps
/// and listen durations are deliberately unrepresentable here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// Recording policy: a play counts once a minute has been heard, or
/// when a short track (< 1 minute long) was played at least 80%
/// through. Filters skip-noise without losing interludes.
pub fn worth_recording(listened_ms: u64, track_duration_ms: u64) -> bool {
    if listened_ms >= MIN_LISTEN_MS {
        return true;
    }
    // 80% threshold, integer math: listened/duration >= 4/5
    track_duration_ms > 0
        && track_duration_ms < MIN_LISTEN_MS
        && listened_ms * 5 >= track_duration_ms * 4
}

impl PlayEvent {
    /// Build an event from a live playback observation. Always
    /// succeeds; missing display names become "Unknown", missing
    /// relations become empty.
    pub fn from_track(track: &TrackInfo, listened_ms: u64, timestamp: i64) -> Self {
        Self {
            timestamp,
            song_id: track.song_id.clone(),
            song_name: track
                .song_name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            artist_ids: track.artist_ids.clone(),
            artist_names: track.artist_names.clone(),
            album_id: track.album_id.clone().unwrap_or_default(),
            album_name: track
                .album_name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            genres: track.genres.clone(),
            year: track.year,
            listened_ms,
            track_duration_ms: track.duration_ms,
        }
    }

    /// Structural validation for externally-supplied records
    /// (server append, import/restore). Invalid records are dropped
    /// by callers, never fatal to a batch.
    pub fn is_valid(&self) -> bool {
        !self.song_id.is_empty() && self.timestamp >= 0
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            timestamp: self.timestamp,
            song_id: self.song_id.clone(),
        }
    }

    /// True if a patch against `(kind, target_id)` concerns this event.
    pub fn matches_target(&self, kind: PatchKind, target_id: &str) -> bool {
        match kind {
            PatchKind::Song => self.song_id == target_id,
            PatchKind::Album => self.album_id == target_id,
            PatchKind::Artist => self.artist_ids.iter().any(|id| id == target_id),
        }
    }

    /// Apply a metadata patch in place. Only display fields, genres
    /// and year change; the fact itself (ids, timestamp, durations)
    /// is untouched.
    pub fn apply_patch(&mut self, fields: &MetadataFields) {
        if let Some(ref name) = fields.song_name {
            self.song_name = name.clone();
        }
        if let Some(ref names) = fields.artist_names {
            self.artist_names = names.clone();
        }
        if let Some(ref name) = fields.album_name {
            self.album_name = name.clone();
        }
        if let Some(ref genres) = fields.genres {
            self.genres = genres.clone();
        }
        if let Some(year) = fields.year {
            self.year = Some(year);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track() -> TrackInfo {
        TrackInfo {
            song_id: "song-1".to_string(),
            song_name: Some("Holocene".to_string()),
            artist_ids: vec!["artist-1".to_string()],
            artist_names: vec!["Bon Iver".to_string()],
            album_id: Some("album-1".to_string()),
            album_name: Some("Bon Iver, Bon Iver".to_string()),
            genres: vec!["Indie Folk".to_string()],
            year: Some(2011),
            duration_ms: 337_000,
        }
    }

    #[test]
    fn test_long_track_below_minute_not_recorded() {
        assert!(!worth_recording(59_999, 337_000));
        assert!(!worth_recording(0, 337_000));
    }

    #[test]
    fn test_minute_listened_is_recorded() {
        assert!(worth_recording(60_000, 337_000));
        assert!(worth_recording(60_000, 0));
        assert!(worth_recording(3_600_000, 180_000));
    }

    #[test]
    fn test_short_track_eighty_percent_boundary() {
        // 50s track: 80% = 40s
        assert!(worth_recording(40_000, 50_000));
        assert!(!worth_recording(39_999, 50_000));
        // full play-through of a 30s interlude
        assert!(worth_recording(30_000, 30_000));
    }

    #[test]
    fn test_unknown_duration_gets_no_short_track_credit() {
        assert!(!worth_recording(45_000, 0));
    }

    #[test]
    fn test_from_track_substitutes_placeholders() {
        let track = TrackInfo {
            song_id: "song-2".to_string(),
            duration_ms: 200_000,
            ..Default::default()
        };
        let event = PlayEvent::from_track(&track, 120_000, 1_700_000_000_000);

        assert_eq!(event.song_name, "Unknown");
        assert_eq!(event.album_name, "Unknown");
        assert!(event.album_id.is_empty());
        assert!(event.artist_ids.is_empty());
        assert!(event.genres.is_empty());
        assert!(event.year.is_none());
        assert_eq!(event.listened_ms, 120_000);
        assert_eq!(event.track_duration_ms, 200_000);
    }

    #[test]
    fn test_from_track_copies_metadata() {
        let event = PlayEvent::from_track(&sample_track(), 180_000, 42);

        assert_eq!(event.song_name, "Holocene");
        assert_eq!(event.artist_names, vec!["Bon Iver".to_string()]);
        assert_eq!(event.album_name, "Bon Iver, Bon Iver");
        assert_eq!(event.year, Some(2011));
    }

    #[test]
    fn test_validation_rejects_empty_song_id_and_negative_timestamp() {
        let mut event = PlayEvent::from_track(&sample_track(), 180_000, 42);
        assert!(event.is_valid());

        event.song_id.clear();
        assert!(!event.is_valid());

        let mut event = PlayEvent::from_track(&sample_track(), 180_000, -1);
        assert!(!event.is_valid());
        event.timestamp = 0;
        assert!(event.is_valid());
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let event = PlayEvent::from_track(&sample_track(), 180_000, 42);
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains("\"songId\""));
        assert!(json.contains("\"artistNames\""));
        assert!(json.contains("\"listenedMs\""));
        assert!(json.contains("\"trackDurationMs\""));

        let back: PlayEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_missing_year_omitted_from_wire() {
        let mut track = sample_track();
        track.year = None;
        let event = PlayEvent::from_track(&track, 180_000, 42);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("year"));
    }

    #[test]
    fn test_patch_touches_display_fields_only() {
        let mut event = PlayEvent::from_track(&sample_track(), 180_000, 42);
        let fields = MetadataFields {
            song_name: Some("Holocene (Remastered)".to_string()),
            genres: Some(vec!["Folk".to_string()]),
            year: Some(2012),
            ..Default::default()
        };
        event.apply_patch(&fields);

        assert_eq!(event.song_name, "Holocene (Remastered)");
        assert_eq!(event.genres, vec!["Folk".to_string()]);
        assert_eq!(event.year, Some(2012));
        // the fact itself is untouched
        assert_eq!(event.song_id, "song-1");
        assert_eq!(event.timestamp, 42);
        assert_eq!(event.listened_ms, 180_000);
    }

    #[test]
    fn test_patch_targeting() {
        let event = PlayEvent::from_track(&sample_track(), 180_000, 42);

        assert!(event.matches_target(PatchKind::Song, "song-1"));
        assert!(event.matches_target(PatchKind::Album, "album-1"));
        assert!(event.matches_target(PatchKind::Artist, "artist-1"));
        assert!(!event.matches_target(PatchKind::Song, "song-2"));
        assert!(!event.matches_target(PatchKind::Artist, "artist-2"));
    }
}
