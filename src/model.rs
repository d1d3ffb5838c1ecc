use std::collections::BTreeSet;

use crate::foundation::core::{FrameIndex, TrackId};
use crate::foundation::error::{TrajviewError, TrajviewResult};

/// State of one track at one frame. Positions and dimensions are in meters,
/// heading in degrees.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrackState {
    pub track_id: TrackId,
    pub frame: FrameIndex,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub width: f64,
    pub length: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<[f64; 2]>,
}

impl TrackState {
    pub fn validate(&self) -> TrajviewResult<()> {
        let finite = [
            self.x,
            self.y,
            self.heading,
            self.width,
            self.length,
        ]
        .iter()
        .all(|v| v.is_finite());
        if !finite {
            return Err(TrajviewError::data_format(format!(
                "track {} frame {} has non-finite geometry",
                self.track_id, self.frame
            )));
        }
        if self.width < 0.0 || self.length < 0.0 {
            return Err(TrajviewError::data_format(format!(
                "track {} frame {} has negative dimensions",
                self.track_id, self.frame
            )));
        }
        Ok(())
    }
}

/// Scenario category attached to a frame.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Category {
    #[serde(rename = "Lane Change")]
    LaneChange,
    Overtaking,
    Intersection,
    Merge,
    #[serde(rename = "Cut-in")]
    CutIn,
    Following,
    Turning,
    Emergency,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::LaneChange,
        Category::Overtaking,
        Category::Intersection,
        Category::Merge,
        Category::CutIn,
        Category::Following,
        Category::Turning,
        Category::Emergency,
        Category::Other,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::LaneChange => "Lane Change",
            Category::Overtaking => "Overtaking",
            Category::Intersection => "Intersection",
            Category::Merge => "Merge",
            Category::CutIn => "Cut-in",
            Category::Following => "Following",
            Category::Turning => "Turning",
            Category::Emergency => "Emergency",
            Category::Other => "Other",
        }
    }

    /// Parse a display label. Matching ignores ASCII case and surrounding space.
    pub fn from_label(s: &str) -> TrajviewResult<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| TrajviewError::data_format(format!("unknown category '{s}'")))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-frame scenario annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AnnotationRecord {
    pub frame: FrameIndex,
    pub description: String,
    pub category: Option<Category>,
    pub referred: Option<TrackId>,
    pub related: BTreeSet<TrackId>,
}

impl AnnotationRecord {
    pub fn empty(frame: FrameIndex) -> Self {
        Self {
            frame,
            ..Self::default()
        }
    }

    /// Fresh record for `frame` carrying only the category of `previous`.
    pub fn seeded_from(frame: FrameIndex, previous: Option<&AnnotationRecord>) -> Self {
        Self {
            frame,
            category: previous.and_then(|p| p.category),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, edit: AnnotationEdit) {
        match edit {
            AnnotationEdit::Description(text) => self.description = text,
            AnnotationEdit::Category(c) => self.category = c,
            AnnotationEdit::Referred(id) => self.referred = id,
            AnnotationEdit::Related(ids) => self.related = ids,
            AnnotationEdit::ToggleRelated(id) => {
                if !self.related.remove(&id) {
                    self.related.insert(id);
                }
            }
            AnnotationEdit::Clear => {
                let frame = self.frame;
                *self = Self::empty(frame);
            }
        }
    }

    pub fn role_of(&self, id: TrackId) -> Role {
        if self.referred == Some(id) {
            Role::Referred
        } else if self.related.contains(&id) {
            Role::Related
        } else {
            Role::Other
        }
    }
}

/// One field-level change to an [`AnnotationRecord`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnnotationEdit {
    Description(String),
    Category(Option<Category>),
    Referred(Option<TrackId>),
    Related(BTreeSet<TrackId>),
    ToggleRelated(TrackId),
    Clear,
}

/// Role a track plays in the current frame's annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Referred,
    Related,
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_labels_parse_back() {
        for c in Category::ALL {
            assert_eq!(Category::from_label(c.label()).unwrap(), c);
        }
        assert_eq!(
            Category::from_label("  lane change ").unwrap(),
            Category::LaneChange
        );
        assert!(Category::from_label("Drifting").is_err());
    }

    #[test]
    fn category_serde_uses_display_names() {
        let s = serde_json::to_string(&Category::CutIn).unwrap();
        assert_eq!(s, "\"Cut-in\"");
    }

    #[test]
    fn seeding_carries_only_category() {
        let mut prev = AnnotationRecord::empty(FrameIndex(4));
        prev.apply(AnnotationEdit::Description("ego yields".into()));
        prev.apply(AnnotationEdit::Category(Some(Category::Merge)));
        prev.apply(AnnotationEdit::Referred(Some(TrackId(2))));
        prev.apply(AnnotationEdit::ToggleRelated(TrackId(9)));

        let next = AnnotationRecord::seeded_from(FrameIndex(5), Some(&prev));
        assert_eq!(next.frame, FrameIndex(5));
        assert_eq!(next.category, Some(Category::Merge));
        assert!(next.description.is_empty());
        assert_eq!(next.referred, None);
        assert!(next.related.is_empty());
    }

    #[test]
    fn toggle_related_adds_then_removes() {
        let mut r = AnnotationRecord::empty(FrameIndex(0));
        r.apply(AnnotationEdit::ToggleRelated(TrackId(3)));
        assert_eq!(r.role_of(TrackId(3)), Role::Related);
        r.apply(AnnotationEdit::ToggleRelated(TrackId(3)));
        assert_eq!(r.role_of(TrackId(3)), Role::Other);
    }

    #[test]
    fn clear_keeps_frame() {
        let mut r = AnnotationRecord::empty(FrameIndex(8));
        r.apply(AnnotationEdit::Referred(Some(TrackId(1))));
        r.apply(AnnotationEdit::Clear);
        assert_eq!(r, AnnotationRecord::empty(FrameIndex(8)));
    }
}
