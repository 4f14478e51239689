//! Deterministic merge strategies for parallel track outcomes.
//!
//! Merging must be a pure function of the set of track results: tracks
//! finish in scheduler-dependent order, so every tie-break here is by
//! declaration position in the input list, never by completion time.

use super::TrackResult;
use std::fmt::Debug;
use std::sync::Arc;

/// A caller-supplied merge function.
pub type MergeFn = dyn Fn(&[TrackResult]) -> serde_json::Value + Send + Sync;

/// How to reconcile multiple tracks' outputs into one value.
#[derive(Clone, Default)]
pub enum MergeStrategy {
    /// No cross-track merging: each track's output is namespaced under its
    /// track name.
    #[default]
    ByTrack,
    /// For overlapping keys, the value from the track with the highest
    /// recorded confidence wins; ties break by declaration order.
    MostConfident,
    /// For overlapping keys, the value from the highest-weight track wins;
    /// ties break by declaration order.
    Weighted,
    /// For overlapping keys, the later-declared track wins.
    Last,
    /// A caller-supplied merge function.
    Custom(Arc<MergeFn>),
}

impl Debug for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ByTrack => write!(f, "ByTrack"),
            Self::MostConfident => write!(f, "MostConfident"),
            Self::Weighted => write!(f, "Weighted"),
            Self::Last => write!(f, "Last"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl MergeStrategy {
    /// Merges track results into a single value.
    ///
    /// `tracks` must be in declaration order; the output is independent of
    /// the order in which the tracks actually completed.
    #[must_use]
    pub fn merge(&self, tracks: &[TrackResult]) -> serde_json::Value {
        match self {
            Self::ByTrack => merge_by_track(tracks),
            Self::MostConfident => merge_by_score(tracks, |t| t.confidence),
            Self::Weighted => merge_by_score(tracks, |t| t.weight),
            Self::Last => merge_last(tracks),
            Self::Custom(merge) => merge(tracks),
        }
    }
}

fn merge_by_track(tracks: &[TrackResult]) -> serde_json::Value {
    let mut merged = serde_json::Map::new();
    for track in tracks {
        merged.insert(
            track.name.clone(),
            serde_json::json!({
                "data": track.data,
                "results": track.results,
                "completed": track.completed,
                "confidence": track.confidence,
            }),
        );
    }
    serde_json::Value::Object(merged)
}

/// Per-key winner selection. A strictly greater score steals a key; equal
/// scores keep the earlier-declared track's value.
fn merge_by_score<F>(tracks: &[TrackResult], score: F) -> serde_json::Value
where
    F: Fn(&TrackResult) -> f64,
{
    let mut merged = serde_json::Map::new();
    let mut winning_score: std::collections::HashMap<String, f64> =
        std::collections::HashMap::new();

    for track in tracks.iter().filter(|t| t.completed) {
        let track_score = score(track);
        for (key, value) in &track.data {
            let current = winning_score.get(key).copied();
            if current.is_none() || track_score > current.unwrap_or(f64::NEG_INFINITY) {
                winning_score.insert(key.clone(), track_score);
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    serde_json::Value::Object(merged)
}

fn merge_last(tracks: &[TrackResult]) -> serde_json::Value {
    let mut merged = serde_json::Map::new();
    for track in tracks.iter().filter(|t| t.completed) {
        for (key, value) in &track.data {
            merged.insert(key.clone(), value.clone());
        }
    }
    serde_json::Value::Object(merged)
}
