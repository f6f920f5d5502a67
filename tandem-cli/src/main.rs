use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use dialoguer::Input;
use std::path::PathBuf;
use std::sync::Arc;
use tandem_client::{
    ApiAccount, CredentialGate, MatchSession, MediaStatus, RelayDirectory, ReqwestApi,
    RtcPeerFactory, SampleMediaDevices, SessionDeps, SessionHandle, SessionNotice,
    SessionSnapshot, SignalingChannel, WsSignalingTransport,
};
use tandem_core::{ConnectionState, SessionConfig, SessionStatus};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tandem")]
#[command(about = "Anonymous one-to-one video chat from the terminal")]
struct Cli {
    /// TOML file with session settings.
    #[arg(short, long, env = "TANDEM_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "TANDEM_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "TANDEM_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Queue again automatically when a link drops.
    #[arg(long)]
    auto_requeue: bool,

    #[arg(short, long)]
    verbose: bool,
}

enum Command {
    Search,
    Stop,
    Skip,
    Next,
    Say(String),
    Mute,
    Video,
    Retry,
    Status,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let command = match word {
            "search" | "s" => Self::Search,
            "stop" => Self::Stop,
            "skip" => Self::Skip,
            "next" | "n" => Self::Next,
            "say" | ">" => Self::Say(rest.to_owned()),
            "mute" | "m" => Self::Mute,
            "video" | "v" => Self::Video,
            "retry" => Self::Retry,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "q" | "exit" => Self::Quit,
            _ => return None,
        };
        Some(command)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    info!("Using API at {}", config.api_base_url);

    let api = Arc::new(ReqwestApi::new(&config.api_base_url).context("Invalid API url")?);
    let gate = Arc::new(CredentialGate::new(api.clone(), &config));
    let account = Arc::new(ApiAccount::new(gate.clone()));
    let transport = WsSignalingTransport::new(&config.signaling_url, Some(api.clone()))
        .context("Invalid signaling url")?;
    let signaling = Arc::new(SignalingChannel::new(Arc::new(transport), Some(gate.clone())));

    match account.fetch_me().await {
        Some(profile) => println!("Signed in as {}", profile.username.bold()),
        None => println!(
            "{}",
            "Not signed in. The service may refuse the session.".yellow()
        ),
    }

    let deps = SessionDeps {
        signaling,
        relay: Arc::new(RelayDirectory::new(gate, &config)),
        peers: Arc::new(RtcPeerFactory::new()),
        media: Arc::new(SampleMediaDevices),
        account,
    };
    let (handle, mut notices) = MatchSession::spawn(config, deps);

    print_help();
    let mut lines = spawn_prompt();
    let mut snapshots = handle.subscribe();
    let mut printed = 0usize;
    let mut last_state: Option<ConnectionState> = None;

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match Command::parse(&line) {
                    Some(Command::Quit) => break,
                    Some(command) => run_command(&handle, command).await,
                    None => println!("{} {}", "Unknown command:".red(), line.trim()),
                }
            }

            Some(notice) = notices.recv() => {
                print_notice(&notice);
                if matches!(notice, SessionNotice::Terminated | SessionNotice::Unauthenticated) {
                    break;
                }
            }

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_progress(&snapshot, &mut printed, &mut last_state);
                if snapshot.status == SessionStatus::Ended {
                    break;
                }
            }
        }
    }

    handle.shutdown().await;
    println!("{}", "Bye.".dimmed());
    Ok(())
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            toml::from_str::<SessionConfig>(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => SessionConfig::default(),
    };

    if let Some(url) = &cli.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(url) = &cli.signaling_url {
        config.signaling_url = url.clone();
    }
    if cli.auto_requeue {
        config.auto_requeue = true;
    }
    Ok(config)
}

/// Reads commands on a plain thread; the prompt blocks.
fn spawn_prompt() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        loop {
            let line = Input::<String>::new()
                .with_prompt("tandem")
                .allow_empty(true)
                .interact_text();
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn run_command(handle: &SessionHandle, command: Command) {
    let result = match command {
        Command::Search => handle.search().await,
        Command::Stop => handle.stop().await,
        Command::Skip => handle.skip().await,
        Command::Next => handle.skip_and_search().await,
        Command::Say(text) => handle.send_message(text).await,
        Command::Retry => handle.retry_media().await,
        Command::Mute => handle.toggle_mute().await.map(|muted| {
            println!("Microphone {}", if muted { "muted".yellow() } else { "on".green() });
        }),
        Command::Video => handle.toggle_video().await.map(|off| {
            println!("Camera {}", if off { "off".yellow() } else { "on".green() });
        }),
        Command::Status => {
            print_status(&handle.snapshot());
            Ok(())
        }
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Quit => Ok(()),
    };

    // Rejections also arrive as notices.
    if let Err(e) = result {
        warn!("Command rejected: {}", e);
    }
}

fn print_notice(notice: &SessionNotice) {
    match notice {
        SessionNotice::Matched { is_initiator } => println!(
            "{} {}",
            "Matched!".green().bold(),
            if *is_initiator { "(calling)" } else { "(answering)" }
        ),
        SessionNotice::PeerLeft => println!("{}", "Your partner left.".yellow()),
        SessionNotice::LinkLost(reason) => {
            println!("{} {}", "Connection lost:".red(), reason)
        }
        SessionNotice::MediaDenied(e) => {
            println!("{} {} Type 'retry' to try again.", "Media:".red(), e)
        }
        SessionNotice::Rejected(e) => println!("{} {}", "!".red().bold(), e),
        SessionNotice::Terminated => println!(
            "{}",
            "You signed in somewhere else. This session has ended.".red().bold()
        ),
        SessionNotice::Unauthenticated => println!(
            "{}",
            "Your session expired. Sign in again.".red().bold()
        ),
    }
}

fn print_progress(
    snapshot: &SessionSnapshot,
    printed: &mut usize,
    last_state: &mut Option<ConnectionState>,
) {
    if snapshot.messages.len() < *printed {
        *printed = 0;
    }
    for message in &snapshot.messages[*printed..] {
        let who = if message.from_self {
            "you".cyan().bold()
        } else {
            "them".magenta().bold()
        };
        println!("{}: {}", who, message.text);
    }
    *printed = snapshot.messages.len();

    if snapshot.connection_state == *last_state {
        return;
    }
    *last_state = snapshot.connection_state;
    match snapshot.connection_state {
        Some(ConnectionState::Connected) => println!("{}", "Connected. Say hi!".green()),
        Some(state) if state.is_terminal() => println!("{} {:?}", "Link".dimmed(), state),
        _ => {}
    }
}

fn print_status(snapshot: &SessionSnapshot) {
    println!("{:>12} {:?}", "status".bold(), snapshot.status);
    let media = match &snapshot.media {
        MediaStatus::Ready => "ready".green(),
        MediaStatus::Acquiring => "acquiring".yellow(),
        MediaStatus::Failed(e) => e.to_string().red(),
        MediaStatus::Released => "released".dimmed(),
    };
    println!("{:>12} {}", "media".bold(), media);
    if let Some(state) = snapshot.connection_state {
        println!("{:>12} {:?}", "link".bold(), state);
    }
    if let Some(quality) = snapshot.quality {
        println!(
            "{:>12} {:?} ({} kbps)",
            "quality".bold(),
            quality.quality_tier,
            quality.bitrate_kbps
        );
    }
    if let Some(remote) = &snapshot.remote_media {
        let video = if remote.has_video() { "with video" } else { "audio only" };
        println!("{:>12} {}", "partner".bold(), video);
    }
    println!(
        "{:>12} mic {}, camera {}",
        "local".bold(),
        if snapshot.is_muted { "muted" } else { "on" },
        if snapshot.is_video_off { "off" } else { "on" }
    );
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  search       join the queue");
    println!("  stop         leave the queue");
    println!("  skip         leave the current match");
    println!("  next         leave the current match and queue again");
    println!("  say <text>   send a chat message");
    println!("  mute, video  toggle microphone or camera");
    println!("  retry        ask for camera and microphone again");
    println!("  status       show the session state");
    println!("  quit         leave");
}
