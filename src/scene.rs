use std::path::{Path, PathBuf};
use std::sync::Arc;

use kurbo::Rect;

use crate::config::{RoleColors, ViewerConfig};
use crate::foundation::core::{Affine, CoordinateScale, FrameIndex, Point, Rgba8, TrackId};
use crate::foundation::error::TrajviewResult;
use crate::index::TrajectoryIndex;
use crate::model::{AnnotationRecord, Role, TrackState};
use crate::tags::{ActionPalette, TagTable};

/// Background image placed with its top-left corner at the image-space origin.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct BackgroundInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl BackgroundInfo {
    pub fn probe(path: &Path) -> TrajviewResult<Self> {
        let (width, height) = crate::io::background_dimensions(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            width,
            height,
        })
    }
}

/// Elements that do not change with the frame: background and axes.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct StaticScene {
    pub background: Option<BackgroundInfo>,
    /// Drawable area in image pixels.
    pub extent: Rect,
    /// Same area in meters, for axis labels.
    pub axis_meters: Rect,
}

/// One oriented box with its role color and label.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct SceneBox {
    pub track_id: TrackId,
    pub role: Role,
    pub color: Rgba8,
    /// Corners in image pixels, rear-right first, counter-clockwise in world space.
    pub corners: [Point; 4],
    pub center: Point,
    pub label: String,
}

/// Per-frame drawable state.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct DynamicScene {
    pub frame: FrameIndex,
    pub frame_label: String,
    pub boxes: Vec<SceneBox>,
}

/// Turns index lookups plus the current annotation into drawable scenes.
#[derive(Clone, Debug)]
pub struct RenderBridge {
    index: Arc<TrajectoryIndex>,
    tags: Option<Arc<TagTable>>,
    roles: RoleColors,
    actions: ActionPalette,
    scale: CoordinateScale,
}

impl RenderBridge {
    pub fn new(
        index: Arc<TrajectoryIndex>,
        tags: Option<Arc<TagTable>>,
        cfg: &ViewerConfig,
    ) -> Self {
        Self {
            index,
            tags,
            roles: cfg.role_colors,
            actions: cfg.actions.clone(),
            scale: cfg.scale(),
        }
    }

    pub fn index(&self) -> &Arc<TrajectoryIndex> {
        &self.index
    }

    pub fn tags(&self) -> Option<&Arc<TagTable>> {
        self.tags.as_ref()
    }

    /// Point the bridge at a reloaded index. Cached static layers built from
    /// the old index must be invalidated by the caller.
    pub fn set_index(&mut self, index: Arc<TrajectoryIndex>) {
        self.index = index;
    }

    /// Full rebuild of the static layer.
    ///
    /// Without a background the extent is the bounding box of every loaded
    /// state, which walks the whole index.
    #[tracing::instrument(skip(self))]
    pub fn static_scene(&self, background: Option<BackgroundInfo>) -> StaticScene {
        let extent = match &background {
            Some(bg) => Rect::new(0.0, 0.0, f64::from(bg.width), f64::from(bg.height)),
            None => self.data_extent(),
        };
        let axis_meters = Rect::new(
            self.scale.to_meters(extent.x0),
            -self.scale.to_meters(extent.y1),
            self.scale.to_meters(extent.x1),
            -self.scale.to_meters(extent.y0),
        );
        StaticScene {
            background,
            extent,
            axis_meters,
        }
    }

    fn data_extent(&self) -> Rect {
        let mut rect: Option<Rect> = None;
        for id in self.index.track_ids() {
            let Ok(life) = self.index.lifespan_of(id) else {
                continue;
            };
            for s in life.states {
                let p = self.scale.world_to_image(s.x, s.y);
                rect = Some(match rect {
                    Some(r) => r.union_pt(p),
                    None => Rect::from_points(p, p),
                });
            }
        }
        rect.unwrap_or(Rect::ZERO)
    }

    /// Dynamic layer for `frame`: one box per active track plus the frame
    /// label. Frames without data yield an empty box list.
    pub fn scene_for(&self, frame: FrameIndex, annotation: &AnnotationRecord) -> DynamicScene {
        let boxes = self
            .index
            .active_at(frame)
            .iter()
            .map(|s| self.scene_box(s, annotation))
            .collect();
        DynamicScene {
            frame,
            frame_label: format!("Frame: {frame}"),
            boxes,
        }
    }

    fn scene_box(&self, s: &TrackState, annotation: &AnnotationRecord) -> SceneBox {
        let role = annotation.role_of(s.track_id);
        let tags = self
            .tags
            .as_ref()
            .and_then(|t| t.tags_at(s.track_id, s.frame));
        let color = match (role, tags) {
            (Role::Referred, _) => self.roles.referred,
            (Role::Related, _) => self.roles.related,
            (Role::Other, Some(t)) => self.actions.color_for(&t.action),
            (Role::Other, None) => self.roles.neutral,
        };
        let mut label = format!("ID:{}", s.track_id);
        if let Some(t) = tags {
            let text = self.actions.label_text(&t.action);
            if !text.is_empty() {
                label.push('\n');
                label.push_str(&text);
            }
        }
        let (corners, center) = self.box_geometry(s);
        SceneBox {
            track_id: s.track_id,
            role,
            color,
            corners,
            center,
            label,
        }
    }

    /// Oriented box corners and center in image pixels.
    pub fn box_geometry(&self, s: &TrackState) -> ([Point; 4], Point) {
        let center = self.scale.world_to_image(s.x, s.y);
        let half_l = self.scale.to_pixels(s.length) / 2.0;
        let half_w = self.scale.to_pixels(s.width) / 2.0;
        // Image y points down, so a counter-clockwise world heading rotates clockwise here.
        let xf = Affine::translate(center.to_vec2()) * Affine::rotate(-s.heading.to_radians());
        let corners = [
            xf * Point::new(-half_l, half_w),
            xf * Point::new(half_l, half_w),
            xf * Point::new(half_l, -half_w),
            xf * Point::new(-half_l, -half_w),
        ];
        (corners, center)
    }
}

/// Keeps the static layer across frame changes and rebuilds it only when the
/// background changes.
#[derive(Debug, Default)]
pub struct SceneCache {
    static_scene: Option<Arc<StaticScene>>,
    static_builds: u64,
    dynamic_builds: u64,
}

impl SceneCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn static_scene(
        &mut self,
        bridge: &RenderBridge,
        background: Option<&BackgroundInfo>,
    ) -> Arc<StaticScene> {
        if let Some(cur) = &self.static_scene {
            if cur.background.as_ref() == background {
                return cur.clone();
            }
        }
        let built = Arc::new(bridge.static_scene(background.cloned()));
        self.static_builds += 1;
        self.static_scene = Some(built.clone());
        built
    }

    /// Drop the static layer after a track reload.
    pub fn invalidate_static(&mut self) {
        self.static_scene = None;
    }

    pub fn dynamic_scene(
        &mut self,
        bridge: &RenderBridge,
        frame: FrameIndex,
        annotation: &AnnotationRecord,
    ) -> DynamicScene {
        self.dynamic_builds += 1;
        bridge.scene_for(frame, annotation)
    }

    pub fn static_builds(&self) -> u64 {
        self.static_builds
    }

    pub fn dynamic_builds(&self) -> u64 {
        self.dynamic_builds
    }
}
