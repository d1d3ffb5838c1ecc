//! Trajview is a frame-based trajectory viewer and scenario annotator.
//!
//! Tracked objects are loaded once into a read-only [`TrajectoryIndex`]. A
//! [`PlaybackClock`] moves a frame cursor over it, an [`AnnotationStore`]
//! keeps one scenario record per frame with write-through persistence, and a
//! [`RenderBridge`] turns both into drawable scenes. The [`InputController`]
//! maps keys and widget events onto those components, and [`Session`] wires
//! them together from files.
#![forbid(unsafe_code)]

mod foundation;

pub mod annotation;
pub mod autoplay;
pub mod clock;
pub mod config;
pub mod controller;
pub mod index;
pub mod io;
pub mod model;
pub mod scene;
pub mod session;
pub mod tags;

pub use crate::foundation::core::{
    Affine, CoordinateScale, FrameIndex, FrameSpan, Point, Rgba8, TrackId, Vec2,
};
pub use crate::foundation::error::{TrajviewError, TrajviewResult};

pub use crate::annotation::{AnnotationSink, AnnotationStore, MemorySink, SharedStore};
pub use crate::autoplay::{Autoplay, AutoplayExit, FrameSignal, SharedClock};
pub use crate::clock::{
    Direction, MAX_SPEED, MIN_SPEED, PlaybackClock, PlaybackState, PlaybackStatus, TickOutcome,
};
pub use crate::config::{RoleColors, ViewerConfig};
pub use crate::controller::{Action, InputController, Key, Outcome};
pub use crate::index::{IndexBuilder, SharedIndex, TrackLifespan, TrajectoryIndex};
pub use crate::io::CsvAnnotationFile;
pub use crate::model::{AnnotationEdit, AnnotationRecord, Category, Role, TrackState};
pub use crate::scene::{
    BackgroundInfo, DynamicScene, RenderBridge, SceneBox, SceneCache, StaticScene,
};
pub use crate::session::{FrameView, Session, SessionPaths};
pub use crate::tags::{ActionPalette, FrameTags, TagTable};
