use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use voicelink::audio::meter::bar_heights;
use voicelink::http::{self, AppState};
use voicelink::session::SessionMode;
use voicelink::{ClientConfig, SessionController, SessionState, SessionUpdate};

const LEVEL_BARS: usize = 5;
const BAR_GLYPHS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

#[derive(Parser)]
#[command(name = "voicelink")]
#[command(about = "Stream microphone audio to a realtime speech backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an interactive session (Enter toggles, q quits)
    Run(RunArgs),

    /// Serve a local mock backend for development
    MockBackend {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8787")]
        bind: String,

        /// Reply with a progress message every N audio frames
        #[arg(long, default_value = "10")]
        reply_every: u64,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Config file (TOML/YAML/JSON, extension optional)
    #[arg(short, long)]
    config: Option<String>,

    /// Negotiation endpoint
    #[arg(long)]
    session_url: Option<String>,

    /// Streaming WebSocket endpoint
    #[arg(long)]
    stream_url: Option<String>,

    /// Replay a WAV file instead of the microphone
    #[arg(short, long)]
    input: Option<String>,

    /// Pace file input at real time
    #[arg(long)]
    realtime: Option<bool>,

    /// Only negotiate a session; no capture, no streaming
    #[arg(long)]
    handshake_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::MockBackend { bind, reply_every } => {
            http::serve(&bind, AppState::new().with_reply_every(reply_every)).await
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = ClientConfig::load(args.config.as_deref())?;

    if let Some(url) = args.session_url {
        config.backend.session_url = url;
    }
    if let Some(url) = args.stream_url {
        config.backend.stream_url = url;
    }
    if let Some(input) = args.input {
        config.audio.source = format!("file:{}", shellexpand::tilde(&input));
    }
    if let Some(realtime) = args.realtime {
        config.audio.file_realtime = realtime;
    }
    if args.handshake_only {
        config.session.mode = SessionMode::HandshakeOnly;
    }

    info!("voicelink v{}", env!("CARGO_PKG_VERSION"));
    info!("Session endpoint: {}", config.backend.session_url);
    info!("Stream endpoint: {}", config.backend.stream_url);
    info!("Audio source: {}", config.audio.source);

    let controller = SessionController::spawn(config.session_config(), config.components()?);
    let trigger = controller.trigger();

    let display = tokio::spawn(render_updates(controller.clone()));

    println!("Press Enter to start/stop, 's' to print stats, 'q' to quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => match line.trim() {
                    "q" | "quit" => break,
                    "s" | "stats" => {
                        if let Some(stats) = controller.stats().await {
                            println!("{}", serde_json::to_string_pretty(&stats)?);
                        }
                    }
                    "" if controller.state() == SessionState::Idle => trigger(),
                    "" => controller.stop(),
                    other => warn!("Unknown command: {}", other),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    controller.shutdown().await;
    display.abort();
    println!();
    Ok(())
}

async fn render_updates(controller: SessionController) {
    let mut updates = controller.subscribe();
    let mut last: Option<SessionUpdate> = None;

    loop {
        let update = match updates.recv().await {
            Ok(update) => update,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };

        let changed = last
            .as_ref()
            .map(|prev| prev.state != update.state || prev.status_text != update.status_text)
            .unwrap_or(true);

        if changed {
            println!();
            println!("[{}] {}", update.state, update.status_text);
        }
        if update.state == SessionState::Streaming {
            print!("\r{}", level_bars(update.amplitude));
            let _ = std::io::stdout().flush();
        }
        last = Some(update);
    }
}

fn level_bars(level: f32) -> String {
    bar_heights(level, LEVEL_BARS)
        .into_iter()
        .map(|height| {
            // Heights run from the 10px floor to 200px at full scale
            let step = ((height - 10.0) / 190.0 * (BAR_GLYPHS.len() - 1) as f32).round();
            BAR_GLYPHS[(step.max(0.0) as usize).min(BAR_GLYPHS.len() - 1)]
        })
        .collect()
}
