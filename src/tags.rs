use std::collections::{BTreeSet, HashMap};

use crate::foundation::core::{FrameIndex, Rgba8, TrackId};

/// Behavioral tags recorded for one track at one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameTags {
    pub action: Vec<String>,
    pub speed: Vec<String>,
}

/// Tag rows keyed by `(track, frame)`.
#[derive(Clone, Debug, Default)]
pub struct TagTable {
    rows: HashMap<(TrackId, FrameIndex), FrameTags>,
}

impl TagTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later rows for the same key replace earlier ones.
    pub fn insert(&mut self, id: TrackId, frame: FrameIndex, tags: FrameTags) {
        self.rows.insert((id, frame), tags);
    }

    pub fn tags_at(&self, id: TrackId, frame: FrameIndex) -> Option<&FrameTags> {
        self.rows.get(&(id, frame))
    }

    /// Identifiers with at least one tag row; used as the index allow-set.
    pub fn allow_set(&self) -> BTreeSet<TrackId> {
        self.rows.keys().map(|(id, _)| *id).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Ordered action-tag -> color table. Earlier entries win when a track
/// carries several tags.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ActionPalette {
    pub entries: Vec<ActionColor>,
    /// Color for tagged tracks whose tags match no entry.
    pub untagged: Rgba8,
    /// Tags left out of label text.
    pub hidden_in_labels: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ActionColor {
    pub tag: String,
    pub color: Rgba8,
}

impl Default for ActionPalette {
    fn default() -> Self {
        let e = |tag: &str, color: Rgba8| ActionColor {
            tag: tag.to_string(),
            color,
        };
        Self {
            entries: vec![
                e("waiting", Rgba8::rgb(255, 0, 0)),
                e("lane_change", Rgba8::rgb(255, 255, 0)),
                e("lane_change_left", Rgba8::rgb(255, 165, 0)),
                e("lane_change_right", Rgba8::rgb(0, 255, 255)),
                e("turning_left", Rgba8::rgb(0, 128, 0)),
                e("turning_right", Rgba8::rgb(221, 172, 48)),
                e("左轉", Rgba8::rgb(119, 248, 51)),
                e("右轉", Rgba8::rgb(59, 45, 21)),
                e("路口直行", Rgba8::rgb(173, 216, 230)),
                e("accelerating", Rgba8::rgb(255, 165, 0)),
                e("decelerating", Rgba8::rgb(128, 0, 128)),
                e("straight", Rgba8::rgb(0, 0, 255)),
                e("moving", Rgba8::rgb(143, 188, 143)),
                e("stopped", Rgba8::rgb(128, 128, 128)),
            ],
            untagged: Rgba8::rgb(0, 0, 0),
            hidden_in_labels: vec!["moving".to_string(), "waiting".to_string()],
        }
    }
}

impl ActionPalette {
    /// Color of the highest-priority entry present in `action`.
    pub fn color_for(&self, action: &[String]) -> Rgba8 {
        self.entries
            .iter()
            .find(|e| action.iter().any(|t| *t == e.tag))
            .map(|e| e.color)
            .unwrap_or(self.untagged)
    }

    /// Comma-joined visible tags.
    pub fn label_text(&self, action: &[String]) -> String {
        action
            .iter()
            .filter(|t| !self.hidden_in_labels.iter().any(|h| h == *t))
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Split a tag list cell: `a;b`, `a,b`, or a bracketed quoted list `['a', 'b']`.
pub fn parse_tag_list(cell: &str) -> Vec<String> {
    let inner = cell
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    inner
        .split([',', ';'])
        .map(|t| t.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tag_lists_accept_common_encodings() {
        assert_eq!(parse_tag_list("a;b"), tags(&["a", "b"]));
        assert_eq!(parse_tag_list("a, b"), tags(&["a", "b"]));
        assert_eq!(
            parse_tag_list("['lane_change', \"moving\"]"),
            tags(&["lane_change", "moving"])
        );
        assert!(parse_tag_list("[]").is_empty());
        assert!(parse_tag_list("  ").is_empty());
    }

    #[test]
    fn palette_priority_follows_entry_order() {
        let p = ActionPalette::default();
        // "waiting" precedes "straight" in the table regardless of tag order.
        assert_eq!(
            p.color_for(&tags(&["straight", "waiting"])),
            Rgba8::rgb(255, 0, 0)
        );
        assert_eq!(p.color_for(&tags(&["unknown"])), p.untagged);
        assert_eq!(p.color_for(&[]), p.untagged);
    }

    #[test]
    fn labels_hide_motion_state_tags() {
        let p = ActionPalette::default();
        assert_eq!(
            p.label_text(&tags(&["moving", "lane_change_left", "accelerating"])),
            "lane_change_left, accelerating"
        );
    }

    #[test]
    fn allow_set_collects_tagged_ids() {
        let mut t = TagTable::new();
        t.insert(TrackId(3), FrameIndex(0), FrameTags::default());
        t.insert(TrackId(1), FrameIndex(4), FrameTags::default());
        t.insert(TrackId(3), FrameIndex(1), FrameTags::default());
        assert_eq!(
            t.allow_set().into_iter().collect::<Vec<_>>(),
            vec![TrackId(1), TrackId(3)]
        );
    }
}
