//! Spokify terminal chat
//!
//! Submits each line typed on stdin as a prompt and streams the reply. With
//! `--voice` the session starts in continuous conversation mode: replies are
//! "spoken" at `--speech-rate` and the next input line is taken as the
//! captured utterance once speech has finished.
//!
//! Commands: `/voice` switches to continuous mode, `/typed` switches back,
//! `/quit` exits (also while listening).

mod console;

use anyhow::{Context, Result};
use clap::Parser;
use console::{ConsoleSynthesizer, ConsoleView, LineRecognizer};
use spokify_core::client::{ClientError, StreamClient};
use spokify_core::conversation::{Conversation, ConversationTimings};
use spokify_core::speech::ConversationMode;
use tokio::io::{AsyncBufReadExt, BufReader};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spokify-chat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the relay API
    #[arg(long, env = "SPOKIFY_API_URL", default_value = "http://127.0.0.1:3000")]
    api_url: String,

    /// Identity sent as `x-user-id`
    #[arg(long, env = "SPOKIFY_USER_ID")]
    user_id: Option<String>,

    /// Start in continuous conversation mode
    #[arg(long)]
    voice: bool,

    /// Words per minute for spoken replies
    #[arg(long, default_value_t = 180)]
    speech_rate: u32,

    /// Silence in milliseconds that ends a spoken utterance
    #[arg(long, default_value_t = 2000)]
    silence_ms: u64,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "warn")]
    log_level: String,
}

fn spawn_stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).context("Invalid log filter")?)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let mut client = StreamClient::new(&args.api_url).context("Failed to build HTTP client")?;
    if let Some(user_id) = &args.user_id {
        client = client.with_user_id(user_id);
    }
    let mode = if args.voice {
        ConversationMode::Continuous
    } else {
        ConversationMode::Typed
    };
    let timings = ConversationTimings {
        silence: Duration::from_millis(args.silence_ms),
        ..ConversationTimings::default()
    };
    let conversation = Conversation::new(client, mode)
        .with_timings(timings)
        .with_synthesizer(ConsoleSynthesizer::new(args.speech_rate));
    info!(api_url = %args.api_url, ?mode, "Chat started");

    let mut view = ConsoleView::stdout();
    let mut lines = spawn_stdin_lines();

    loop {
        if conversation.mode() == ConversationMode::Continuous {
            let mut recognizer = LineRecognizer::new(lines, conversation.voice().clone());
            if let Err(e) = conversation.run_continuous(&mut recognizer, &mut view).await {
                debug!(error = %e, "Continuous mode ended");
            }
            if recognizer.quit_requested() {
                break;
            }
            lines = recognizer.into_lines();
        }

        let Some(line) = lines.recv().await else {
            break;
        };
        match line.trim() {
            "/quit" => break,
            "/voice" => conversation.set_mode(ConversationMode::Continuous),
            "/typed" => conversation.set_mode(ConversationMode::Typed),
            text => match conversation.send(text, &mut view).await {
                Ok(_) | Err(ClientError::Validation) => {}
                Err(e) => debug!(error = %e, "Turn failed"),
            },
        }
    }

    info!("Chat finished");
    Ok(())
}
