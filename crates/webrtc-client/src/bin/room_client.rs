//! Room client binary entry point
//!
//! Joins a relay room with headless media and logs everything that happens
//! until Ctrl+C (leave) or a fatal error.
//!
//! # Usage
//!
//! ```bash
//! # Join a one-to-one room
//! cargo run --bin room_client -- \
//!   --signaling-url wss://relay.example.com/ws \
//!   --room standup \
//!   --username alice
//!
//! # Join a broadcasting room as the broadcaster, audio only
//! cargo run --bin room_client -- \
//!   --room town-hall --username host \
//!   --room-type broadcasting --broadcaster --no-video
//!
//! # Load everything from a JSON file
//! cargo run --bin room_client -- --config ./room.json
//! ```

use clap::{Parser, ValueEnum};
use huddle_webrtc::{
    Collaborators, HeadlessMediaSource, LoggingObserver, RoomType, RtcPeerLinkFactory, Session,
    SessionConfig, WsConnector,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Huddle room client
///
/// Joins a room on a WebSocket relay and negotiates a WebRTC link with the
/// other participants.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; command-line values override it
    #[arg(short, long, env = "HUDDLE_CONFIG")]
    config: Option<PathBuf>,

    /// Relay WebSocket URL
    #[arg(long, env = "HUDDLE_SIGNALING_URL")]
    signaling_url: Option<String>,

    /// Room to join
    #[arg(short, long, env = "HUDDLE_ROOM")]
    room: Option<String>,

    /// Display name
    #[arg(short, long, env = "HUDDLE_USERNAME")]
    username: Option<String>,

    /// Room type: one-to-one, broadcasting, screen-sharing
    #[arg(long, env = "HUDDLE_ROOM_TYPE")]
    room_type: Option<RoomTypeArg>,

    /// Join as the broadcaster
    #[arg(long, env = "HUDDLE_BROADCASTER")]
    broadcaster: bool,

    /// Announce this participant as a screen-share source
    #[arg(long, env = "HUDDLE_SCREEN_SHARE")]
    screen_share: bool,

    /// STUN servers (comma-separated)
    #[arg(long, value_delimiter = ',', env = "HUDDLE_STUN_SERVERS")]
    stun_servers: Vec<String>,

    /// Do not send camera video
    #[arg(long)]
    no_video: bool,

    /// Do not send microphone audio
    #[arg(long)]
    no_audio: bool,

    /// Consecutive negotiation failures tolerated before giving up
    #[arg(long, env = "HUDDLE_MAX_APPLY_FAILURES")]
    max_apply_failures: Option<u32>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoomTypeArg {
    OneToOne,
    Broadcasting,
    ScreenSharing,
}

impl From<RoomTypeArg> for RoomType {
    fn from(arg: RoomTypeArg) -> Self {
        match arg {
            RoomTypeArg::OneToOne => RoomType::OneToOne,
            RoomTypeArg::Broadcasting => RoomType::Broadcasting,
            RoomTypeArg::ScreenSharing => RoomType::ScreenSharing,
        }
    }
}

impl Args {
    fn into_config(self) -> huddle_webrtc::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::from_json_file(path)?,
            None => SessionConfig::default(),
        };

        if let Some(url) = self.signaling_url {
            config.signaling_url = url;
        }
        if let Some(room) = self.room {
            config.room_id = room;
        }
        if let Some(username) = self.username {
            config.username = username;
        }
        if let Some(room_type) = self.room_type {
            config.room_type = room_type.into();
        }
        if !self.stun_servers.is_empty() {
            config.stun_servers = self.stun_servers;
        }
        if let Some(max) = self.max_apply_failures {
            config.max_apply_failures = max;
        }
        config.broadcaster |= self.broadcaster;
        config.screen_share |= self.screen_share;
        if self.no_video {
            config.media.video = None;
        }
        if self.no_audio {
            config.media.audio = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing();

    info!(
        version = huddle_webrtc::version(),
        "Huddle room client starting"
    );

    let config = args.into_config()?;
    info!(
        signaling_url = %config.signaling_url,
        room_id = %config.room_id,
        username = %config.username,
        room_type = config.room_type.as_str(),
        "Configuration loaded"
    );

    let mut session = Session::new(
        config,
        Collaborators {
            connector: Box::new(WsConnector),
            links: Box::new(RtcPeerLinkFactory),
            media: Arc::new(HeadlessMediaSource::new()),
            observer: Arc::new(LoggingObserver),
        },
    );

    session.join().await?;

    let handle = session.handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Ctrl+C received, leaving room");
        if let Err(e) = handle.leave() {
            warn!("Leave request not delivered: {}", e);
        }
    });

    match session.run().await {
        Ok(()) => {
            info!("Left room");
            Ok(())
        }
        Err(e) => {
            error!("Session ended: {}", e);
            Err(e.into())
        }
    }
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
