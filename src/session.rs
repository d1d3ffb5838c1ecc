use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::annotation::{AnnotationSink, AnnotationStore, MemorySink, SharedStore};
use crate::autoplay::{FrameSignal, SharedClock};
use crate::clock::{PlaybackClock, PlaybackState};
use crate::config::ViewerConfig;
use crate::controller::InputController;
use crate::foundation::core::{FrameIndex, FrameSpan};
use crate::foundation::error::{TrajviewError, TrajviewResult};
use crate::index::{SharedIndex, TrajectoryIndex};
use crate::io::{self, CsvAnnotationFile};
use crate::model::AnnotationRecord;
use crate::scene::{BackgroundInfo, DynamicScene, RenderBridge, SceneCache, StaticScene};
use crate::tags::TagTable;

/// Input files for one viewing session.
#[derive(Clone, Debug, Default)]
pub struct SessionPaths {
    pub tracks: PathBuf,
    /// Restricts the loaded tracks to tagged identifiers and enables tag colors.
    pub tags: Option<PathBuf>,
    pub background: Option<PathBuf>,
    /// Loaded at start and rewritten on every edit. Without it edits stay in memory.
    pub annotations: Option<PathBuf>,
}

/// One rendered frame: the shared static layer plus the per-frame layer.
#[derive(Clone, Debug)]
pub struct FrameView {
    pub playback: PlaybackState,
    pub annotation: AnnotationRecord,
    pub static_scene: Arc<StaticScene>,
    pub dynamic: DynamicScene,
}

#[derive(serde::Serialize)]
struct FrameViewJson<'a> {
    playback: &'a PlaybackState,
    annotation: &'a AnnotationRecord,
    #[serde(rename = "static")]
    static_scene: &'a StaticScene,
    dynamic: &'a DynamicScene,
}

impl FrameView {
    pub fn to_json(&self) -> TrajviewResult<String> {
        let view = FrameViewJson {
            playback: &self.playback,
            annotation: &self.annotation,
            static_scene: &self.static_scene,
            dynamic: &self.dynamic,
        };
        serde_json::to_string_pretty(&view)
            .map_err(|e| TrajviewError::Other(anyhow::anyhow!("serialize frame view: {e}")))
    }

    /// One-line text form used by the headless UI loop.
    pub fn summary(&self) -> String {
        let ids: Vec<String> = self
            .dynamic
            .boxes
            .iter()
            .map(|b| b.track_id.to_string())
            .collect();
        let referred = self
            .annotation
            .referred
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let category = self.annotation.category.map_or("-", |c| c.label());
        format!(
            "{} speed={:.2} status={:?} tracks=[{}] referred={} category={}",
            self.dynamic.frame_label,
            self.playback.speed,
            self.playback.status(),
            ids.join(","),
            referred,
            category,
        )
    }
}

/// Playback range for `index`; empty data plays the single frame 0.
fn playable_span(index: &TrajectoryIndex) -> FrameSpan {
    index.frame_span().unwrap_or_else(|| {
        tracing::warn!("no track data loaded; scenes will be empty");
        FrameSpan::single(FrameIndex(0))
    })
}

fn load_store(path: &Path) -> TrajviewResult<AnnotationStore> {
    let rows = io::load_annotations(path)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "annotations loaded");
    Ok(AnnotationStore::from_rows(
        rows,
        Box::new(CsvAnnotationFile::new(path)),
    ))
}

/// Owns every component of a loaded dataset and hands out the shared handles
/// the controller and the UI loop need.
#[derive(Debug)]
pub struct Session {
    config: ViewerConfig,
    index: SharedIndex,
    store: SharedStore,
    clock: SharedClock,
    signal: Arc<FrameSignal>,
    bridge: RenderBridge,
    cache: SceneCache,
    background: Option<BackgroundInfo>,
}

impl Session {
    /// Load tags, tracks, background, and annotations. Any malformed input
    /// fails the whole open and nothing is kept.
    #[tracing::instrument(skip_all, fields(tracks = %paths.tracks.display()))]
    pub fn open(config: ViewerConfig, paths: &SessionPaths) -> TrajviewResult<Self> {
        config.validate()?;
        let tags = paths.tags.as_deref().map(io::load_tags).transpose()?;
        let allow = tags.as_ref().map(TagTable::allow_set);
        let index = io::load_tracks(&paths.tracks, config.ingest_window_rows, allow.as_ref())?;
        let background = paths
            .background
            .as_deref()
            .map(BackgroundInfo::probe)
            .transpose()?;
        let store = match &paths.annotations {
            Some(path) => load_store(path)?,
            None => AnnotationStore::new(Box::new(MemorySink::new())),
        };
        Ok(Self::from_parts(config, index, tags, store, background))
    }

    /// Assemble a session from already loaded parts.
    pub fn from_parts(
        config: ViewerConfig,
        index: TrajectoryIndex,
        tags: Option<TagTable>,
        store: AnnotationStore,
        background: Option<BackgroundInfo>,
    ) -> Self {
        let span = playable_span(&index);
        let index = Arc::new(index);
        let bridge = RenderBridge::new(index.clone(), tags.map(Arc::new), &config);
        Self {
            index: Arc::new(RwLock::new(index)),
            store: Arc::new(RwLock::new(Arc::new(store))),
            clock: Arc::new(Mutex::new(PlaybackClock::new(span))),
            signal: Arc::new(FrameSignal::new()),
            bridge,
            cache: SceneCache::new(),
            background,
            config,
        }
    }

    /// Annotations held in memory only, flushed to `sink` on every edit.
    pub fn with_sink(
        config: ViewerConfig,
        index: TrajectoryIndex,
        tags: Option<TagTable>,
        sink: Box<dyn AnnotationSink>,
    ) -> Self {
        Self::from_parts(config, index, tags, AnnotationStore::new(sink), None)
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Index currently loaded. A later reload does not affect the returned handle.
    pub fn index(&self) -> Arc<TrajectoryIndex> {
        self.index.read().clone()
    }

    /// Store currently loaded. A later annotation load closes it.
    pub fn store(&self) -> Arc<AnnotationStore> {
        self.store.read().clone()
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn signal(&self) -> &Arc<FrameSignal> {
        &self.signal
    }

    pub fn scene_cache(&self) -> &SceneCache {
        &self.cache
    }

    /// Controller sharing this session's clock, store, and frame signal.
    pub fn controller(&self) -> InputController {
        InputController::new(
            self.clock.clone(),
            self.store.clone(),
            self.index.clone(),
            self.signal.clone(),
            &self.config,
        )
    }

    /// Swap the background image; the next render rebuilds the static layer.
    pub fn load_background(&mut self, path: &Path) -> TrajviewResult<()> {
        self.background = Some(BackgroundInfo::probe(path)?);
        Ok(())
    }

    /// Replace the track data. The file is parsed completely before anything
    /// is swapped, so a malformed file leaves the session untouched. The
    /// current tag filter still applies.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn reload_tracks(&mut self, path: &Path) -> TrajviewResult<()> {
        let allow = self.bridge.tags().map(|t| t.allow_set());
        let index = Arc::new(io::load_tracks(
            path,
            self.config.ingest_window_rows,
            allow.as_ref(),
        )?);
        let span = playable_span(&index);

        *self.index.write() = index.clone();
        self.bridge.set_index(index);
        self.cache.invalidate_static();
        let frame = {
            let mut clock = self.clock.lock();
            clock.set_span(span);
            clock.frame()
        };
        self.signal.publish(frame);
        Ok(())
    }

    /// Switch to the annotation file at `path`; later edits are written there.
    ///
    /// The file is parsed before anything changes. Pending edits of the
    /// current store are flushed to their own destination first; if that
    /// fails the switch is refused.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub fn load_annotations(&mut self, path: &Path) -> TrajviewResult<()> {
        let store = Arc::new(load_store(path)?);
        let previous = self.store();
        previous.flush()?;

        *self.store.write() = store;
        if let Err(err) = previous.close() {
            tracing::warn!(error = %err, "previous annotation store did not close cleanly");
        }
        let frame = self.clock.lock().frame();
        self.signal.publish(frame);
        Ok(())
    }

    pub fn clear_background(&mut self) {
        self.background = None;
    }

    /// Write the current annotation rows to `path`, independent of the
    /// store's own sink.
    pub fn save_annotations_as(&self, path: &Path) -> TrajviewResult<()> {
        let rows = self.store().export_rows();
        CsvAnnotationFile::new(path).write_all(&rows)?;
        tracing::info!(path = %path.display(), rows = rows.len(), "annotations saved");
        Ok(())
    }

    /// Render `frame` (clamped to the loaded range) without moving the clock.
    pub fn render(&mut self, frame: FrameIndex) -> FrameView {
        let (playback, frame) = {
            let clock = self.clock.lock();
            (clock.state(), clock.span().clamp(frame))
        };
        let annotation = self.store().get(frame);
        let static_scene = self
            .cache
            .static_scene(&self.bridge, self.background.as_ref());
        let dynamic = self.cache.dynamic_scene(&self.bridge, frame, &annotation);
        FrameView {
            playback,
            annotation,
            static_scene,
            dynamic,
        }
    }

    pub fn render_current(&mut self) -> FrameView {
        let frame = self.clock.lock().frame();
        self.render(frame)
    }

    /// UI-loop step: wait up to `timeout` for a published frame and render it.
    pub fn next_view(&mut self, timeout: Duration) -> Option<FrameView> {
        let frame = self.signal.wait_timeout(timeout)?;
        Some(self.render(frame))
    }

    /// Non-blocking variant of [`next_view`](Self::next_view).
    pub fn poll_view(&mut self) -> Option<FrameView> {
        let frame = self.signal.take_latest()?;
        Some(self.render(frame))
    }
}
