//! File boundaries: track/tag CSV input, annotation CSV persistence and
//! background image probing.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use crate::annotation::AnnotationSink;
use crate::foundation::core::{FrameIndex, TrackId};
use crate::foundation::error::{TrajviewError, TrajviewResult};
use crate::index::{IndexBuilder, TrajectoryIndex};
use crate::model::{AnnotationRecord, Category, TrackState};
use crate::tags::{FrameTags, TagTable, parse_tag_list};

const TRACK_COLUMNS: [&str; 7] = [
    "trackId", "frame", "xCenter", "yCenter", "heading", "width", "length",
];
const TAG_COLUMNS: [&str; 3] = ["trackId", "frame", "action_tags"];
const ANNOTATION_COLUMNS: [&str; 5] = ["frame", "description", "category", "referred", "related"];

#[derive(Debug, serde::Deserialize)]
struct TrackRow {
    #[serde(rename = "trackId")]
    track_id: u64,
    frame: u64,
    #[serde(rename = "xCenter")]
    x_center: f64,
    #[serde(rename = "yCenter")]
    y_center: f64,
    heading: f64,
    width: f64,
    length: f64,
    #[serde(rename = "xVelocity", default)]
    x_velocity: Option<f64>,
    #[serde(rename = "yVelocity", default)]
    y_velocity: Option<f64>,
    #[serde(rename = "xAcceleration", default)]
    x_acceleration: Option<f64>,
    #[serde(rename = "yAcceleration", default)]
    y_acceleration: Option<f64>,
}

impl From<TrackRow> for TrackState {
    fn from(r: TrackRow) -> Self {
        let pair = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => Some([a, b]),
            _ => None,
        };
        TrackState {
            track_id: TrackId(r.track_id),
            frame: FrameIndex(r.frame),
            x: r.x_center,
            y: r.y_center,
            heading: r.heading,
            width: r.width,
            length: r.length,
            velocity: pair(r.x_velocity, r.y_velocity),
            acceleration: pair(r.x_acceleration, r.y_acceleration),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct TagRow {
    #[serde(rename = "trackId")]
    track_id: u64,
    frame: u64,
    action_tags: String,
    #[serde(default)]
    speed_tags: String,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct AnnotationRow {
    frame: u64,
    description: String,
    category: String,
    referred: String,
    related: String,
}

impl From<&AnnotationRecord> for AnnotationRow {
    fn from(r: &AnnotationRecord) -> Self {
        Self {
            frame: r.frame.0,
            description: r.description.clone(),
            category: r.category.map(|c| c.label().to_string()).unwrap_or_default(),
            referred: r.referred.map(|id| id.to_string()).unwrap_or_default(),
            related: r
                .related
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(";"),
        }
    }
}

impl TryFrom<AnnotationRow> for AnnotationRecord {
    type Error = TrajviewError;

    fn try_from(r: AnnotationRow) -> TrajviewResult<Self> {
        let frame = FrameIndex(r.frame);
        let category = match r.category.trim() {
            "" => None,
            s => Some(Category::from_label(s)?),
        };
        let referred = match r.referred.trim() {
            "" => None,
            s => Some(parse_track_id(s, frame)?),
        };
        let related = r
            .related
            .split([';', ','])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_track_id(s, frame))
            .collect::<TrajviewResult<BTreeSet<_>>>()?;
        Ok(AnnotationRecord {
            frame,
            description: r.description,
            category,
            referred,
            related,
        })
    }
}

fn parse_track_id(s: &str, frame: FrameIndex) -> TrajviewResult<TrackId> {
    // Float-formatted ids ("12.0") appear in files exported by dataframe tools.
    let s = s.strip_suffix(".0").unwrap_or(s);
    s.parse::<u64>().map(TrackId).map_err(|_| {
        TrajviewError::data_format(format!("frame {frame}: invalid track id '{s}'"))
    })
}

fn open(path: &Path) -> TrajviewResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| TrajviewError::data_format(format!("open '{}': {e}", path.display())))
}

fn csv_error(what: &str, e: csv::Error) -> TrajviewError {
    match e.position() {
        Some(pos) => TrajviewError::data_format(format!("{what} line {}: {e}", pos.line())),
        None => TrajviewError::data_format(format!("{what}: {e}")),
    }
}

fn require_columns<R: Read>(
    rdr: &mut csv::Reader<R>,
    what: &str,
    required: &[&str],
) -> TrajviewResult<()> {
    let headers = rdr.headers().map_err(|e| csv_error(what, e))?;
    for col in required {
        if !headers.iter().any(|h| h.trim() == *col) {
            return Err(TrajviewError::data_format(format!(
                "{what}: missing required column '{col}'"
            )));
        }
    }
    Ok(())
}

/// Read track rows in windows of `window` rows, feeding each window to the
/// index builder before reading the next.
#[tracing::instrument(skip(reader, allow))]
pub fn read_tracks<R: Read>(
    reader: R,
    window: usize,
    allow: Option<&BTreeSet<TrackId>>,
) -> TrajviewResult<TrajectoryIndex> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    require_columns(&mut rdr, "tracks", &TRACK_COLUMNS)?;

    let window = window.max(1);
    let mut builder = IndexBuilder::new(allow.cloned());
    let mut buf: Vec<TrackState> = Vec::with_capacity(window.min(16_384));
    for row in rdr.deserialize::<TrackRow>() {
        buf.push(row.map_err(|e| csv_error("tracks", e))?.into());
        if buf.len() == window {
            builder.push_window(buf.drain(..))?;
        }
    }
    builder.push_window(buf)?;
    builder.finish()
}

pub fn load_tracks(
    path: &Path,
    window: usize,
    allow: Option<&BTreeSet<TrackId>>,
) -> TrajviewResult<TrajectoryIndex> {
    let index = read_tracks(open(path)?, window, allow)?;
    tracing::info!(
        path = %path.display(),
        tracks = index.track_count(),
        frames = index.frame_count(),
        states = index.state_count(),
        "tracks loaded"
    );
    Ok(index)
}

pub fn read_tags<R: Read>(reader: R) -> TrajviewResult<TagTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    require_columns(&mut rdr, "tags", &TAG_COLUMNS)?;

    let mut table = TagTable::new();
    for row in rdr.deserialize::<TagRow>() {
        let row = row.map_err(|e| csv_error("tags", e))?;
        table.insert(
            TrackId(row.track_id),
            FrameIndex(row.frame),
            FrameTags {
                action: parse_tag_list(&row.action_tags),
                speed: parse_tag_list(&row.speed_tags),
            },
        );
    }
    Ok(table)
}

pub fn load_tags(path: &Path) -> TrajviewResult<TagTable> {
    let table = read_tags(open(path)?)?;
    tracing::info!(path = %path.display(), rows = table.len(), "tags loaded");
    Ok(table)
}

pub fn read_annotations<R: Read>(reader: R) -> TrajviewResult<Vec<AnnotationRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);
    require_columns(&mut rdr, "annotations", &ANNOTATION_COLUMNS)?;

    let mut rows = rdr
        .deserialize::<AnnotationRow>()
        .map(|row| {
            row.map_err(|e| csv_error("annotations", e))
                .and_then(AnnotationRecord::try_from)
        })
        .collect::<TrajviewResult<Vec<_>>>()?;
    rows.sort_by_key(|r| r.frame);
    if let Some(w) = rows.windows(2).find(|w| w[0].frame == w[1].frame) {
        return Err(TrajviewError::data_format(format!(
            "annotations: frame {} appears twice",
            w[0].frame
        )));
    }
    Ok(rows)
}

/// Missing file reads as an empty row set.
pub fn load_annotations(path: &Path) -> TrajviewResult<Vec<AnnotationRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_annotations(open(path)?)
}

pub fn write_annotations<W: Write>(writer: W, rows: &[AnnotationRecord]) -> TrajviewResult<()> {
    let persist = |e: csv::Error| TrajviewError::persistence(e.to_string());
    // Header written by hand so an empty row set still produces one.
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(ANNOTATION_COLUMNS).map_err(persist)?;
    for r in rows {
        wtr.serialize(AnnotationRow::from(r)).map_err(persist)?;
    }
    wtr.flush()
        .map_err(|e| TrajviewError::persistence(e.to_string()))
}

/// Annotation CSV on disk, rewritten in full through a sibling temp file and
/// a rename so readers never see a partial file.
#[derive(Clone, Debug)]
pub struct CsvAnnotationFile {
    path: PathBuf,
}

impl CsvAnnotationFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "annotations.csv".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl AnnotationSink for CsvAnnotationFile {
    fn write_all(&mut self, rows: &[AnnotationRecord]) -> TrajviewResult<()> {
        let tmp = self.tmp_path();
        let file = File::create(&tmp).map_err(|e| {
            TrajviewError::persistence(format!("create '{}': {e}", tmp.display()))
        })?;
        let written = write_annotations(std::io::BufWriter::new(file), rows).and_then(|()| {
            std::fs::rename(&tmp, &self.path).map_err(|e| {
                TrajviewError::persistence(format!("replace '{}': {e}", self.path.display()))
            })
        });
        if written.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        written
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Pixel dimensions of a background image (header only).
pub fn background_dimensions(path: &Path) -> TrajviewResult<(u32, u32)> {
    image::image_dimensions(path).map_err(|e| {
        TrajviewError::data_format(format!("background '{}': {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACKS: &str = "\
trackId,frame,xCenter,yCenter,heading,width,length,xVelocity,yVelocity,extra
1,0,10.0,-5.0,90.0,1.8,4.5,1.0,0.0,x
2,0,12.0,-6.0,180.0,1.9,4.2,,,y
1,1,10.5,-5.0,90.0,1.8,4.5,1.0,0.0,z
";

    #[test]
    fn reads_tracks_with_optional_columns() {
        let idx = read_tracks(TRACKS.as_bytes(), 2, None).unwrap();
        assert_eq!(idx.track_count(), 2);
        let s = idx.state_at(FrameIndex(0), TrackId(1)).unwrap();
        assert_eq!(s.velocity, Some([1.0, 0.0]));
        assert_eq!(s.acceleration, None);
        let s2 = idx.state_at(FrameIndex(0), TrackId(2)).unwrap();
        assert_eq!(s2.velocity, None);
    }

    #[test]
    fn missing_column_is_reported_by_name() {
        let csv = "trackId,frame,xCenter,heading,width,length\n1,0,1,0,1,1\n";
        let err = read_tracks(csv.as_bytes(), 10, None).unwrap_err();
        assert!(matches!(err, TrajviewError::DataFormat(_)));
        assert!(err.to_string().contains("yCenter"));
    }

    #[test]
    fn unparsable_value_is_a_format_error() {
        let csv = "trackId,frame,xCenter,yCenter,heading,width,length\n1,zero,1,1,0,1,1\n";
        let err = read_tracks(csv.as_bytes(), 10, None).unwrap_err();
        assert!(matches!(err, TrajviewError::DataFormat(_)));
    }

    #[test]
    fn reads_tags_in_list_formats() {
        let csv = "\
trackId,frame,action_tags,speed_tags
1,0,\"['lane_change', 'moving']\",['fast']
3,0,straight;waiting,
";
        let t = read_tags(csv.as_bytes()).unwrap();
        let a = t.tags_at(TrackId(1), FrameIndex(0)).unwrap();
        assert_eq!(a.action, vec!["lane_change", "moving"]);
        assert_eq!(a.speed, vec!["fast"]);
        let b = t.tags_at(TrackId(3), FrameIndex(0)).unwrap();
        assert_eq!(b.action, vec!["straight", "waiting"]);
        assert!(b.speed.is_empty());
    }

    #[test]
    fn annotation_rows_round_trip_through_csv() {
        let mut r = AnnotationRecord::empty(FrameIndex(6));
        r.description = "ego, then \"truck\"\nmerges".to_string();
        r.category = Some(Category::CutIn);
        r.referred = Some(TrackId(1));
        r.related = [TrackId(3), TrackId(12)].into();
        let blank = AnnotationRecord::empty(FrameIndex(2));

        let mut buf = Vec::new();
        write_annotations(&mut buf, &[blank.clone(), r.clone()]).unwrap();
        let back = read_annotations(buf.as_slice()).unwrap();
        assert_eq!(back, vec![blank, r]);
    }

    #[test]
    fn empty_annotation_set_still_has_header() {
        let mut buf = Vec::new();
        write_annotations(&mut buf, &[]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.trim(), "frame,description,category,referred,related");
        assert!(read_annotations(text.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn annotation_ids_accept_float_formatting() {
        let csv = "frame,description,category,referred,related\n3,,Merge,7.0,\"1.0,2\"\n";
        let rows = read_annotations(csv.as_bytes()).unwrap();
        assert_eq!(rows[0].referred, Some(TrackId(7)));
        assert_eq!(
            rows[0].related,
            [TrackId(1), TrackId(2)].into_iter().collect()
        );
    }

    #[test]
    fn unknown_category_is_a_format_error() {
        let csv = "frame,description,category,referred,related\n3,,Parking,,\n";
        assert!(matches!(
            read_annotations(csv.as_bytes()),
            Err(TrajviewError::DataFormat(_))
        ));
    }

    #[test]
    fn csv_file_sink_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ann.csv");
        let mut sink = CsvAnnotationFile::new(&path);
        let r = AnnotationRecord::empty(FrameIndex(1));
        sink.write_all(&[r.clone()]).unwrap();
        sink.write_all(&[]).unwrap();
        assert!(load_annotations(&path).unwrap().is_empty());
        assert!(!sink.tmp_path().exists());
    }

    #[test]
    fn failed_replace_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory at the target path makes the rename fail.
        let path = dir.path().join("ann.csv");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), "x").unwrap();

        let mut sink = CsvAnnotationFile::new(&path);
        let err = sink
            .write_all(&[AnnotationRecord::empty(FrameIndex(1))])
            .unwrap_err();
        assert!(matches!(err, TrajviewError::Persistence(_)));
        assert!(!sink.tmp_path().exists());
        assert!(path.join("keep").exists());
    }

    #[test]
    fn missing_annotation_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(
            load_annotations(&dir.path().join("none.csv"))
                .unwrap()
                .is_empty()
        );
    }
}
