//! Aggregation engine: pure reduction of a play-event list into
//! ranked listening statistics. No I/O, deterministic: identical
//! input sets produce byte-identical output regardless of input
//! order, which is what makes it property-testable.
//!
//! Callers are expected to dedup (see [`dedup_events`]) and filter to
//! the requested range before aggregating.

use chrono::DateTime;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::event::{EventKey, PlayEvent};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// A single-day play-count spike is only worth reporting from this
/// many same-song plays in one day.
const SPIKE_MIN_PLAYS: u64 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SongStats {
    pub id: String,
    pub name: String,
    pub hours: f64,
    pub plays: u64,
    /// Busiest single day for this song, when notable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spike: Option<DaySpike>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStats {
    pub id: String,
    pub name: String,
    pub hours: f64,
    pub plays: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySpike {
    /// UTC calendar day, `YYYY-MM-DD`.
    pub date: String,
    pub plays: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecadeStats {
    /// e.g. `"2010s"`.
    pub decade: String,
    pub hours: f64,
    pub plays: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreDecadeStats {
    pub genre: String,
    pub decade: String,
    pub hours: f64,
    pub plays: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyLeader {
    /// UTC calendar month, `YYYY-MM`.
    pub month: String,
    pub artist_id: String,
    pub artist_name: String,
    pub hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayTotal {
    pub date: String,
    pub hours: f64,
    pub plays: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListeningStats {
    pub top_songs: Vec<SongStats>,
    pub top_artists: Vec<EntityStats>,
    pub top_albums: Vec<EntityStats>,
    pub top_genres: Vec<EntityStats>,
    pub decades: Vec<DecadeStats>,
    pub genre_decades: Vec<GenreDecadeStats>,
    pub monthly_timeline: Vec<MonthlyLeader>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_listened_day: Option<DayTotal>,
}

/// Stable dedup by `(timestamp, songId)`, keeping the first
/// occurrence. This is the load-bearing idempotency primitive: any
/// merge of server + pending + re-fetched sets goes through here
/// before aggregation.
pub fn dedup_events(events: &[PlayEvent]) -> Vec<PlayEvent> {
    let mut seen: HashSet<EventKey> = HashSet::with_capacity(events.len());
    let mut out = Vec::with_capacity(events.len());
    for event in events {
        if seen.insert(event.key()) {
            out.push(event.clone());
        }
    }
    out
}

/// Integer accumulator; hours are derived from `ms` only at the end
/// so ordering never depends on float comparisons.
#[derive(Default, Clone)]
struct Tally {
    ms: u64,
    plays: u64,
}

impl Tally {
    fn add(&mut self, listened_ms: u64) {
        self.ms += listened_ms;
        self.plays += 1;
    }
}

fn hours(ms: u64) -> f64 {
    ms as f64 / MS_PER_HOUR
}

fn day_of(timestamp: i64) -> Option<String> {
    DateTime::from_timestamp_millis(timestamp).map(|dt| dt.format("%Y-%m-%d").to_string())
}

fn month_of(timestamp: i64) -> Option<String> {
    DateTime::from_timestamp_millis(timestamp).map(|dt| dt.format("%Y-%m").to_string())
}

fn decade_of(year: i32) -> String {
    format!("{}s", year - year.rem_euclid(10))
}

/// Rank: most listening time first, ties broken by play count, then
/// name, then id. The order is total, so output is deterministic.
fn rank_entries(entries: &mut Vec<(String, String, Tally)>) {
    entries.sort_by(|a, b| {
        b.2.ms
            .cmp(&a.2.ms)
            .then(b.2.plays.cmp(&a.2.plays))
            .then(a.1.cmp(&b.1))
            .then(a.0.cmp(&b.0))
    });
}

/// Reduce a deduplicated, range-filtered event list into ranked
/// statistics for the inclusive `[from, to]` window.
pub fn aggregate(events: &[PlayEvent], from: i64, to: i64) -> ListeningStats {
    let mut songs: HashMap<String, (String, Tally)> = HashMap::new();
    let mut artists: HashMap<String, (String, Tally)> = HashMap::new();
    let mut albums: HashMap<String, (String, Tally)> = HashMap::new();
    let mut genres: HashMap<String, Tally> = HashMap::new();
    let mut decades: HashMap<String, Tally> = HashMap::new();
    let mut genre_decades: HashMap<(String, String), Tally> = HashMap::new();
    let mut song_days: HashMap<(String, String), u64> = HashMap::new();
    let mut days: HashMap<String, Tally> = HashMap::new();
    let mut month_artists: HashMap<(String, String), (String, u64)> = HashMap::new();

    for event in events {
        if event.timestamp < from || event.timestamp > to {
            continue;
        }
        let ms = event.listened_ms;

        let song = songs
            .entry(event.song_id.clone())
            .or_insert_with(|| (event.song_name.clone(), Tally::default()));
        song.1.add(ms);

        // multi-valued fields contribute full duration to every value
        for (i, artist_id) in event.artist_ids.iter().enumerate() {
            let name = event
                .artist_names
                .get(i)
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string());
            let artist = artists
                .entry(artist_id.clone())
                .or_insert_with(|| (name, Tally::default()));
            artist.1.add(ms);
        }

        if !event.album_id.is_empty() {
            let album = albums
                .entry(event.album_id.clone())
                .or_insert_with(|| (event.album_name.clone(), Tally::default()));
            album.1.add(ms);
        }

        for genre in &event.genres {
            genres.entry(genre.clone()).or_default().add(ms);
        }

        if let Some(year) = event.year {
            let decade = decade_of(year);
            decades.entry(decade.clone()).or_default().add(ms);
            for genre in &event.genres {
                genre_decades
                    .entry((genre.clone(), decade.clone()))
                    .or_default()
                    .add(ms);
            }
        }

        if let Some(day) = day_of(event.timestamp) {
            *song_days
                .entry((event.song_id.clone(), day.clone()))
                .or_default() += 1;
            days.entry(day).or_default().add(ms);
        }

        if let Some(month) = month_of(event.timestamp) {
            for (i, artist_id) in event.artist_ids.iter().enumerate() {
                let name = event
                    .artist_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| "Unknown".to_string());
                let slot = month_artists
                    .entry((month.clone(), artist_id.clone()))
                    .or_insert((name, 0));
                slot.1 += ms;
            }
        }
    }

    // Songs, with per-song spike annotations.
    let mut song_entries: Vec<(String, String, Tally)> = songs
        .into_iter()
        .map(|(id, (name, tally))| (id, name, tally))
        .collect();
    rank_entries(&mut song_entries);
    let top_songs = song_entries
        .into_iter()
        .map(|(id, name, tally)| {
            let spike = spike_for(&song_days, &id);
            SongStats {
                id,
                name,
                hours: hours(tally.ms),
                plays: tally.plays,
                spike,
            }
        })
        .collect();

    let top_artists = rank_map(artists);
    let top_albums = rank_map(albums);

    let mut genre_entries: Vec<(String, String, Tally)> = genres
        .into_iter()
        .map(|(genre, tally)| (genre.clone(), genre, tally))
        .collect();
    rank_entries(&mut genre_entries);
    let top_genres = genre_entries
        .into_iter()
        .map(|(id, name, tally)| EntityStats {
            id,
            name,
            hours: hours(tally.ms),
            plays: tally.plays,
        })
        .collect();

    let mut decade_entries: Vec<(String, Tally)> = decades.into_iter().collect();
    decade_entries.sort_by(|a, b| a.0.cmp(&b.0));
    let decades = decade_entries
        .into_iter()
        .map(|(decade, tally)| DecadeStats {
            decade,
            hours: hours(tally.ms),
            plays: tally.plays,
        })
        .collect();

    let mut gd_entries: Vec<((String, String), Tally)> = genre_decades.into_iter().collect();
    gd_entries.sort_by(|a, b| {
        b.1.ms
            .cmp(&a.1.ms)
            .then(b.1.plays.cmp(&a.1.plays))
            .then(a.0.cmp(&b.0))
    });
    let genre_decades = gd_entries
        .into_iter()
        .map(|((genre, decade), tally)| GenreDecadeStats {
            genre,
            decade,
            hours: hours(tally.ms),
            plays: tally.plays,
        })
        .collect();

    let monthly_timeline = monthly_timeline(month_artists);

    let most_listened_day = days
        .into_iter()
        .max_by(|a, b| {
            a.1.ms
                .cmp(&b.1.ms)
                .then(a.1.plays.cmp(&b.1.plays))
                .then(b.0.cmp(&a.0)) // earliest day wins a tie
        })
        .map(|(date, tally)| DayTotal {
            date,
            hours: hours(tally.ms),
            plays: tally.plays,
        });

    ListeningStats {
        top_songs,
        top_artists,
        top_albums,
        top_genres,
        decades,
        genre_decades,
        monthly_timeline,
        most_listened_day,
    }
}

fn rank_map(map: HashMap<String, (String, Tally)>) -> Vec<EntityStats> {
    let mut entries: Vec<(String, String, Tally)> = map
        .into_iter()
        .map(|(id, (name, tally))| (id, name, tally))
        .collect();
    rank_entries(&mut entries);
    entries
        .into_iter()
        .map(|(id, name, tally)| EntityStats {
            id,
            name,
            hours: hours(tally.ms),
            plays: tally.plays,
        })
        .collect()
}

fn spike_for(song_days: &HashMap<(String, String), u64>, song_id: &str) -> Option<DaySpike> {
    song_days
        .iter()
        .filter(|((id, _), _)| id == song_id)
        .max_by(|a, b| {
            a.1.cmp(b.1).then(b.0 .1.cmp(&a.0 .1)) // earliest day wins a tie
        })
        .filter(|(_, &plays)| plays >= SPIKE_MIN_PLAYS)
        .map(|((_, date), &plays)| DaySpike {
            date: date.clone(),
            plays,
        })
}

/// Leading artist per calendar month. A timeline of fewer than two
/// months is a single misleading point, so it comes back empty.
fn monthly_timeline(
    month_artists: HashMap<(String, String), (String, u64)>,
) -> Vec<MonthlyLeader> {
    let months: HashSet<&String> = month_artists.keys().map(|(month, _)| month).collect();
    if months.len() < 2 {
        return Vec::new();
    }

    let mut leaders: HashMap<String, (String, String, u64)> = HashMap::new();
    for ((month, artist_id), (name, ms)) in month_artists {
        let replace = match leaders.get(&month) {
            Some((cur_id, cur_name, cur_ms)) => {
                ms > *cur_ms
                    || (ms == *cur_ms
                        && (name.as_str(), artist_id.as_str()) < (cur_name.as_str(), cur_id.as_str()))
            }
            None => true,
        };
        if replace {
            leaders.insert(month, (artist_id, name, ms));
        }
    }

    let mut timeline: Vec<MonthlyLeader> = leaders
        .into_iter()
        .map(|(month, (artist_id, artist_name, ms))| MonthlyLeader {
            month,
            artist_id,
            artist_name,
            hours: hours(ms),
        })
        .collect();
    timeline.sort_by(|a, b| a.month.cmp(&b.month));
    timeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TrackInfo;

    const DAY_MS: i64 = 86_400_000;
    // 2023-01-01T00:00:00Z
    const T0: i64 = 1_672_531_200_000;

    fn event(song_id: &str, timestamp: i64, listened_ms: u64) -> PlayEvent {
        let track = TrackInfo {
            song_id: song_id.to_string(),
            song_name: Some(format!("Song {song_id}")),
            artist_ids: vec![format!("ar-{song_id}")],
            artist_names: vec![format!("Artist {song_id}")],
            album_id: Some(format!("al-{song_id}")),
            album_name: Some(format!("Album {song_id}")),
            genres: vec!["Rock".to_string()],
            year: Some(2012),
            duration_ms: 240_000,
        };
        PlayEvent::from_track(&track, listened_ms, timestamp)
    }

    #[test]
    fn test_repeat_plays_outrank_and_share_decade_bucket() {
        let events = vec![
            event("a", T0, 180_000),
            event("b", T0 + 1_000, 120_000),
            event("a", T0 + DAY_MS, 180_000),
        ];
        let stats = aggregate(&events, T0, T0 + 31 * DAY_MS);

        assert_eq!(stats.top_songs[0].id, "a");
        assert_eq!(stats.top_songs[0].plays, 2);
        assert!((stats.top_songs[0].hours - 0.1).abs() < 1e-9);
        assert_eq!(stats.top_songs[1].id, "b");
        assert!((stats.top_songs[1].hours - 120_000.0 / 3_600_000.0).abs() < 1e-9);

        assert_eq!(stats.decades.len(), 1);
        assert_eq!(stats.decades[0].decade, "2010s");
        assert!((stats.decades[0].hours - 480_000.0 / 3_600_000.0).abs() < 1e-9);
        assert_eq!(stats.decades[0].plays, 3);
    }

    #[test]
    fn test_determinism_under_input_permutation() {
        let mut events = vec![
            event("a", T0, 180_000),
            event("b", T0 + 1_000, 120_000),
            event("c", T0 + 2_000, 300_000),
            event("a", T0 + DAY_MS, 90_000),
        ];
        let forward = aggregate(&events, T0, T0 + 31 * DAY_MS);
        events.reverse();
        let backward = aggregate(&events, T0, T0 + 31 * DAY_MS);

        assert_eq!(
            serde_json::to_string(&forward).unwrap(),
            serde_json::to_string(&backward).unwrap()
        );
    }

    #[test]
    fn test_refetch_union_matches_deduped_set() {
        let server = vec![event("a", T0, 180_000), event("b", T0 + 1_000, 120_000)];
        let pending = vec![event("c", T0 + 2_000, 300_000)];

        // simulate re-fetch after a partial sync: server events twice
        let mut union = server.clone();
        union.extend(pending.clone());
        union.extend(server.clone());

        let mut clean = server;
        clean.extend(pending);

        let from_union = aggregate(&dedup_events(&union), T0, T0 + DAY_MS);
        let from_clean = aggregate(&dedup_events(&clean), T0, T0 + DAY_MS);
        assert_eq!(
            serde_json::to_string(&from_union).unwrap(),
            serde_json::to_string(&from_clean).unwrap()
        );
    }

    #[test]
    fn test_dedup_keeps_first_occurrence_in_order() {
        let events = vec![
            event("a", T0, 180_000),
            event("a", T0, 999), // same key, later copy dropped
            event("b", T0, 120_000),
        ];
        let deduped = dedup_events(&events);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].listened_ms, 180_000);
        assert_eq!(deduped[1].song_id, "b");
    }

    #[test]
    fn test_ties_broken_by_plays_then_name() {
        // same total ms: a = 2 plays, b = 1 play
        let events = vec![
            event("a", T0, 60_000),
            event("a", T0 + 1_000, 60_000),
            event("b", T0 + 2_000, 120_000),
        ];
        let stats = aggregate(&events, T0, T0 + DAY_MS);
        assert_eq!(stats.top_songs[0].id, "a");

        // fully tied: name ascending
        let events = vec![event("z", T0, 60_000), event("b", T0 + 1_000, 60_000)];
        let stats = aggregate(&events, T0, T0 + DAY_MS);
        assert_eq!(stats.top_songs[0].id, "b");
    }

    #[test]
    fn test_multi_artist_event_credits_every_artist_fully() {
        let track = TrackInfo {
            song_id: "duet".to_string(),
            song_name: Some("Duet".to_string()),
            artist_ids: vec!["ar-1".to_string(), "ar-2".to_string()],
            artist_names: vec!["One".to_string(), "Two".to_string()],
            genres: vec!["Pop".to_string(), "Jazz".to_string()],
            year: Some(1999),
            duration_ms: 240_000,
            ..Default::default()
        };
        let events = vec![PlayEvent::from_track(&track, 3_600_000, T0)];
        let stats = aggregate(&events, T0, T0 + DAY_MS);

        assert_eq!(stats.top_artists.len(), 2);
        assert!((stats.top_artists[0].hours - 1.0).abs() < 1e-9);
        assert!((stats.top_artists[1].hours - 1.0).abs() < 1e-9);
        assert_eq!(stats.top_genres.len(), 2);
        assert!((stats.top_genres[0].hours - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_events_without_year_skip_decade_buckets() {
        let mut no_year = event("a", T0, 180_000);
        no_year.year = None;
        let with_year = event("b", T0 + 1_000, 120_000);

        let stats = aggregate(&[no_year, with_year], T0, T0 + DAY_MS);
        assert_eq!(stats.decades.len(), 1);
        assert_eq!(stats.decades[0].plays, 1);
    }

    #[test]
    fn test_spike_requires_three_plays_in_one_day() {
        let events = vec![
            event("a", T0, 60_000),
            event("a", T0 + 1_000, 60_000),
            event("a", T0 + 2_000, 60_000),
            event("b", T0, 60_000),
            event("b", T0 + 1_000, 60_000),
        ];
        let stats = aggregate(&events, T0, T0 + DAY_MS);

        let a = stats.top_songs.iter().find(|s| s.id == "a").unwrap();
        let spike = a.spike.as_ref().unwrap();
        assert_eq!(spike.plays, 3);
        assert_eq!(spike.date, "2023-01-01");

        let b = stats.top_songs.iter().find(|s| s.id == "b").unwrap();
        assert!(b.spike.is_none());
    }

    #[test]
    fn test_monthly_timeline_needs_two_months() {
        let one_month = vec![event("a", T0, 60_000), event("b", T0 + DAY_MS, 60_000)];
        let stats = aggregate(&one_month, T0, T0 + 31 * DAY_MS);
        assert!(stats.monthly_timeline.is_empty());

        let two_months = vec![
            event("a", T0, 7_200_000),          // Jan, artist ar-a leads
            event("b", T0, 3_600_000),          // Jan
            event("b", T0 + 40 * DAY_MS, 60_000), // Feb
        ];
        let stats = aggregate(&two_months, T0, T0 + 60 * DAY_MS);
        assert_eq!(stats.monthly_timeline.len(), 2);
        assert_eq!(stats.monthly_timeline[0].month, "2023-01");
        assert_eq!(stats.monthly_timeline[0].artist_id, "ar-a");
        assert_eq!(stats.monthly_timeline[1].month, "2023-02");
        assert_eq!(stats.monthly_timeline[1].artist_id, "ar-b");
    }

    #[test]
    fn test_most_listened_day() {
        let events = vec![
            event("a", T0, 60_000),
            event("b", T0 + DAY_MS, 3_600_000),
            event("c", T0 + DAY_MS + 1_000, 60_000),
        ];
        let stats = aggregate(&events, T0, T0 + 31 * DAY_MS);

        let day = stats.most_listened_day.unwrap();
        assert_eq!(day.date, "2023-01-02");
        assert_eq!(day.plays, 2);
        assert!((day.hours - 3_660_000.0 / 3_600_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_genre_decade_cross_tab() {
        let mut nineties = event("a", T0, 3_600_000);
        nineties.year = Some(1994);
        nineties.genres = vec!["Grunge".to_string()];
        let tens = event("b", T0 + 1_000, 60_000);

        let stats = aggregate(&[nineties, tens], T0, T0 + DAY_MS);

        assert_eq!(stats.genre_decades.len(), 2);
        assert_eq!(stats.genre_decades[0].genre, "Grunge");
        assert_eq!(stats.genre_decades[0].decade, "1990s");
        assert_eq!(stats.genre_decades[1].genre, "Rock");
        assert_eq!(stats.genre_decades[1].decade, "2010s");
    }

    #[test]
    fn test_empty_input_yields_empty_stats() {
        let stats = aggregate(&[], T0, T0 + DAY_MS);
        assert!(stats.top_songs.is_empty());
        assert!(stats.top_artists.is_empty());
        assert!(stats.decades.is_empty());
        assert!(stats.monthly_timeline.is_empty());
        assert!(stats.most_listened_day.is_none());
    }
}
