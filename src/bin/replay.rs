use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use serde_json::json;

use head_tracker_rs::recording::{ReplaySummary, SessionRecording};
use head_tracker_rs::{HeadTracker, TrackerConfig};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a session_*.json[.gz] recording
    #[arg(long, conflicts_with = "session_dir")]
    session: Option<PathBuf>,

    /// Directory of recordings to batch replay (processes *.json[.gz])
    #[arg(long)]
    session_dir: Option<PathBuf>,

    /// Tracker config JSON (defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write pose JSON lines here instead of stdout (single session only)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Only print the summary
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn is_recording(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".json") || name.ends_with(".json.gz")
}

fn replay_session(
    path: &Path,
    config: &TrackerConfig,
    out: Option<&mut dyn Write>,
) -> anyhow::Result<ReplaySummary> {
    let recording = SessionRecording::load(path)?;
    let mut tracker = HeadTracker::with_config(config);
    tracker.resume();

    let mut write_error = None;
    let summary = match out {
        Some(out) => recording.replay(&tracker, |frame, estimate| {
            if write_error.is_some() {
                return;
            }
            let line = json!({
                "timestamp": frame.timestamp,
                "viewport": frame.viewport,
                "source": estimate.source,
                "position": estimate.pose.position,
                "orientation": estimate.pose.orientation,
            });
            if let Err(e) = writeln!(out, "{}", line) {
                write_error = Some(e);
            }
        }),
        None => recording.replay(&tracker, |_, _| {}),
    };
    tracker.pause();

    if let Some(e) = write_error {
        return Err(e.into());
    }
    Ok(summary)
}

fn print_summary(path: &Path, summary: &ReplaySummary) {
    eprintln!("=== {} ===", path.display());
    eprintln!("  frames:          {}", summary.frames);
    eprintln!("  fused frames:    {}", summary.fused_frames);
    eprintln!("  fallback frames: {}", summary.fallback_frames);
    eprintln!("  final drift yaw: {:.2} deg", summary.final_drift_yaw_deg);
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };

    if let Some(dir) = &args.session_dir {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_recording(p))
            .collect();
        paths.sort();
        if paths.is_empty() {
            anyhow::bail!("no recordings in {}", dir.display());
        }

        let mut failed = 0usize;
        for path in &paths {
            match replay_session(path, &config, None) {
                Ok(summary) => print_summary(path, &summary),
                Err(e) => {
                    failed += 1;
                    log::error!("{}: {}", path.display(), e);
                }
            }
        }
        eprintln!("{} sessions, {} failed", paths.len(), failed);
        return Ok(());
    }

    let path = args
        .session
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("pass --session or --session-dir"))?;

    let summary = if args.quiet {
        replay_session(path, &config, None)?
    } else if let Some(output) = &args.output {
        let mut writer = BufWriter::new(File::create(output)?);
        let summary = replay_session(path, &config, Some(&mut writer))?;
        writer.flush()?;
        summary
    } else {
        let stdout = io::stdout();
        let mut writer = BufWriter::new(stdout.lock());
        let summary = replay_session(path, &config, Some(&mut writer))?;
        writer.flush()?;
        summary
    };
    print_summary(path, &summary);

    Ok(())
}
