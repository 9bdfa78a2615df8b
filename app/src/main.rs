use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use directories::ProjectDirs;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use stem_tracking_core::clock::ManualClock;
use stem_tracking_core::config::{FileConfigSource, TrackingSettings};
use stem_tracking_core::db::init_db;
use stem_tracking_core::session::{SessionStore, SqliteSessionStore};
use stem_tracking_core::{
    DomEvent, HttpBackendConnector, PageLocation, PageSession, Reaction, ScriptStep,
    TrackingClient,
};

/// Replays recorded page interactions through the tracker.
#[derive(Parser)]
#[command(name = "stem-tracking", about = "STEM Careers Programme interaction tracker", version)]
struct Cli {
    /// Tracking settings (Firebase web config, metrics stream, init policy)
    #[arg(long, default_value = "stem-tracking.json")]
    config: PathBuf,

    /// JSON-lines interaction script; `-` reads stdin
    #[arg(long, default_value = "-")]
    script: String,

    /// Directory holding the diagnostic database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long, default_value = "stem-careers.web.app")]
    host: String,

    #[arg(long, default_value = "/")]
    path: String,

    #[arg(long, default_value = "STEM Careers Programme")]
    title: String,

    #[arg(long)]
    referrer: Option<String>,

    /// Forget the stored session before replaying
    #[arg(long)]
    new_session: bool,
}

fn workspace_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("org", "STEM Careers", "stem-tracking") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("stem-tracking")
    }
}

fn open_script(script: &str) -> anyhow::Result<Box<dyn BufRead>> {
    if script == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(Path::new(script)).with_context(|| format!("opening script {script}"))?;
    Ok(Box::new(BufReader::new(file)))
}

fn report(reaction: &Reaction) -> anyhow::Result<()> {
    if matches!(reaction, Reaction::Notice(_) | Reaction::InvalidForm { .. }) {
        println!("{}", serde_json::to_string(reaction)?);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = TrackingSettings::load(&cli.config)
        .with_context(|| format!("reading {}", cli.config.display()))?;

    let pool = init_db(cli.data_dir.clone().unwrap_or_else(workspace_dir))?;
    let sessions = Arc::new(SqliteSessionStore::new(pool.clone()));
    if cli.new_session {
        sessions.clear()?;
    }

    let mut location = PageLocation::new(cli.host, cli.path).with_title(cli.title);
    location.referrer = cli.referrer;
    location.user_agent = format!("stem-tracking/{}", env!("CARGO_PKG_VERSION"));

    let connector = HttpBackendConnector::new()?;
    let clock = Arc::new(ManualClock::new(OffsetDateTime::now_utc()));
    let mut builder = TrackingClient::builder(location)
        .clock(clock.clone())
        .session_store(sessions)
        .diagnostics(pool);
    if let Some(metrics) = &settings.metrics {
        builder = builder.metrics_sink(Arc::new(connector.metrics_sink(metrics)));
    }
    let client = builder.build();

    let source = FileConfigSource::new(&cli.config);
    let status = client.initialize(&source, &connector, settings.init).await;
    log::info!("backend status: {status:?}");

    let mut page = PageSession::open(client);
    let mut frame_pending = false;
    for (idx, line) in open_script(&cli.script)?.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let step: ScriptStep = match serde_json::from_str(&line) {
            Ok(step) => step,
            Err(err) => {
                log::warn!("skipping script line {}: {err}", idx + 1);
                continue;
            }
        };
        if let Some(at_ms) = step.at_ms {
            clock.set_elapsed(Duration::from_millis(at_ms));
        }
        if frame_pending && !matches!(step.event, DomEvent::Scroll(_)) {
            page.handle(DomEvent::AnimationFrame).await;
            frame_pending = false;
        }
        let reaction = page.handle(step.event).await;
        if reaction == Reaction::FrameRequested {
            frame_pending = true;
        }
        report(&reaction)?;
        if page.is_closed() {
            break;
        }
    }

    if frame_pending {
        page.handle(DomEvent::AnimationFrame).await;
    }
    if !page.is_closed() {
        page.handle(DomEvent::Unload).await;
    }
    Ok(())
}
