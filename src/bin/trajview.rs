use std::io::{BufRead as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use trajview::{
    Action, AnnotationSink as _, CsvAnnotationFile, FrameIndex, FrameView, Outcome, Session,
    SessionPaths, ViewerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "trajview", version)]
struct Cli {
    /// Viewer configuration JSON. Missing keys keep their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the static and dynamic scene of one frame as JSON.
    Scene(SceneArgs),
    /// Headless playback: key names and annotation commands are read from stdin.
    Play(PlayArgs),
    /// Validate an annotation file and rewrite it as CSV or JSON.
    Export(ExportArgs),
}

#[derive(Args, Debug)]
struct DataArgs {
    /// Track CSV (trackId, frame, xCenter, yCenter, heading, width, length).
    #[arg(long)]
    tracks: PathBuf,

    /// Tag CSV; restricts tracks to tagged identifiers and enables tag colors.
    #[arg(long)]
    tags: Option<PathBuf>,

    /// Background image; only its dimensions are used.
    #[arg(long)]
    background: Option<PathBuf>,

    /// Annotation CSV, created on first edit if missing.
    #[arg(long)]
    annotations: Option<PathBuf>,
}

impl DataArgs {
    fn paths(&self) -> SessionPaths {
        SessionPaths {
            tracks: self.tracks.clone(),
            tags: self.tags.clone(),
            background: self.background.clone(),
            annotations: self.annotations.clone(),
        }
    }
}

#[derive(Parser, Debug)]
struct SceneArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Frame to render; clamped to the loaded range.
    #[arg(long)]
    frame: u64,

    /// Output JSON path (stdout if omitted).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct PlayArgs {
    #[command(flatten)]
    data: DataArgs,

    /// Start frame; defaults to the first loaded frame.
    #[arg(long)]
    start: Option<u64>,

    /// Print each rendered frame as JSON instead of a summary line.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Annotation CSV to read.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output path (stdout if omitted).
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    format: ExportFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.cmd {
        Command::Scene(args) => cmd_scene(config, args),
        Command::Play(args) => cmd_play(config, args),
        Command::Export(args) => cmd_export(args),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ViewerConfig> {
    match path {
        Some(p) => ViewerConfig::load(p).with_context(|| format!("load config '{}'", p.display())),
        None => Ok(ViewerConfig::default()),
    }
}

fn open_session(config: ViewerConfig, data: &DataArgs) -> anyhow::Result<Session> {
    Session::open(config, &data.paths())
        .with_context(|| format!("open tracks '{}'", data.tracks.display()))
}

fn write_output(out: Option<&Path>, text: &str) -> anyhow::Result<()> {
    match out {
        Some(p) => {
            std::fs::write(p, text).with_context(|| format!("write '{}'", p.display()))?;
            eprintln!("wrote {}", p.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}

fn cmd_scene(config: ViewerConfig, args: SceneArgs) -> anyhow::Result<()> {
    let mut session = open_session(config, &args.data)?;
    let view = session.render(FrameIndex(args.frame));
    let json = view.to_json()?;
    write_output(args.out.as_deref(), &json)
}

fn cmd_play(config: ViewerConfig, args: PlayArgs) -> anyhow::Result<()> {
    let mut session = open_session(config, &args.data)?;
    let mut ctl = session.controller();
    if let Some(start) = args.start {
        ctl.dispatch(Action::Seek(FrameIndex(start)))?;
    }

    let (tx, rx) = mpsc::channel::<String>();
    std::thread::Builder::new()
        .name("trajview-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;

    let mut stdout = std::io::stdout().lock();
    session.signal().take_latest();
    print_view(&mut stdout, &session.render_current(), args.json)?;
    let poll = session.config().base_interval();
    loop {
        match rx.recv_timeout(poll) {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => match line.parse::<Action>().and_then(|a| ctl.dispatch(a)) {
                Ok(Outcome::Exited) => break,
                Ok(Outcome::Annotated(record)) => {
                    writeln!(stdout, "annotated {}", serde_json::to_string(&record)?)?;
                }
                Ok(Outcome::Playback(_)) => {}
                Err(err) => tracing::warn!(command = %line.trim(), error = %err, "command failed"),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                ctl.shutdown().context("shut down on end of input")?;
                break;
            }
        }
        if let Some(view) = session.poll_view() {
            print_view(&mut stdout, &view, args.json)?;
        }
    }
    if let Some(view) = session.poll_view() {
        print_view(&mut stdout, &view, args.json)?;
    }
    stdout.flush()?;
    Ok(())
}

fn print_view(out: &mut impl std::io::Write, view: &FrameView, json: bool) -> anyhow::Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(&view.dynamic)?)?;
    } else {
        writeln!(out, "{}", view.summary())?;
    }
    Ok(())
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let file = std::fs::File::open(&args.in_path)
        .with_context(|| format!("open annotations '{}'", args.in_path.display()))?;
    let rows = trajview::io::read_annotations(std::io::BufReader::new(file))
        .with_context(|| format!("parse annotations '{}'", args.in_path.display()))?;

    match (args.format, args.out.as_deref()) {
        (ExportFormat::Json, out) => {
            let json = serde_json::to_string_pretty(&rows).context("serialize annotations")?;
            write_output(out, &json)
        }
        (ExportFormat::Csv, Some(out)) => {
            CsvAnnotationFile::new(out)
                .write_all(&rows)
                .with_context(|| format!("write '{}'", out.display()))?;
            eprintln!("wrote {}", out.display());
            Ok(())
        }
        (ExportFormat::Csv, None) => {
            trajview::io::write_annotations(std::io::stdout().lock(), &rows)?;
            Ok(())
        }
    }
}
