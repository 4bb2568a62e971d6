//! chatline CLI
//!
//! Command-line client for the chat transport:
//! - Ask a question and print the answer
//! - Stream every message and connection state change
//! - Generate a default config file

use anyhow::Context;
use chatline::{
    generate_default_config, ChatSession, Config, ConnectionState, ConnectionStatus, Message,
    MessageKind, Route, StaticToken, Topic,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Real-time chat client with HTTP fallback")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Bearer token (default: $CHATLINE_TOKEN)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Ask a question and print the answer
    Ask {
        /// Question text
        question: String,
        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
        /// User ID, required when the HTTP fallback is used
        #[arg(short, long)]
        user: Option<String>,
        /// Seconds to wait for an answer
        #[arg(short, long, default_value = "60")]
        wait: u64,
    },

    /// Print every incoming message until interrupted
    Listen,

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let json = cli.format == "json";

    match cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Config written to {}", path.display());
                }
                None => print!("{}", content),
            }
        }

        Commands::Ask {
            question,
            conversation,
            user,
            wait,
        } => {
            let (config, session) = open_session(cli.config.as_deref(), cli.token)?;

            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            for kind in [MessageKind::Response, MessageKind::Error] {
                let tx = tx.clone();
                session.subscribe(kind, move |message| {
                    let _ = tx.send(message.clone());
                });
            }

            session.connect();
            wait_for_connection(&session, config.connection_settings().connect_timeout).await;

            let route = session
                .send_question(&question, conversation.as_deref(), user.as_deref())
                .await?;
            if let Route::Suppressed(outcome) = route {
                session.disconnect();
                anyhow::bail!("question not sent: {:?}", outcome);
            }

            let answer = tokio::time::timeout(Duration::from_secs(wait), rx.recv()).await;
            session.disconnect();
            match answer {
                Ok(Some(message)) => print_message(&message, json),
                Ok(None) => anyhow::bail!("message stream closed"),
                Err(_) => anyhow::bail!("no answer within {}s", wait),
            }
        }

        Commands::Listen => {
            let (_config, session) = open_session(cli.config.as_deref(), cli.token)?;

            let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
            session.subscribe(Topic::All, move |message| {
                let _ = tx.send(message.clone());
            });
            session.subscribe_to_state(move |state| print_state(state, json));
            session.connect();

            loop {
                tokio::select! {
                    Some(message) = rx.recv() => print_message(&message, json),
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            session.disconnect();
        }
    }

    Ok(())
}

/// Load config, start logging and build the session
fn open_session(
    config_path: Option<&Path>,
    token: Option<String>,
) -> anyhow::Result<(Config, ChatSession)> {
    let config = match config_path {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config);

    let token = token.or_else(|| std::env::var("CHATLINE_TOKEN").ok());
    let tokens = Arc::new(match token {
        Some(token) => StaticToken::new(token),
        None => StaticToken::anonymous(),
    });
    let session = ChatSession::new(&config, tokens)?;
    Ok((config, session))
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("chatline={}", config.logging.level))
    });
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Wait until the socket opens or gives up; the fallback covers the rest
async fn wait_for_connection(session: &ChatSession, timeout: Duration) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ConnectionStatus>();
    let id = session.subscribe_to_state(move |state| {
        let _ = tx.send(state.status);
    });

    let settled = async {
        if session.state().is_connected() {
            return;
        }
        while let Some(status) = rx.recv().await {
            if matches!(status, ConnectionStatus::Connected | ConnectionStatus::Errored) {
                return;
            }
        }
    };
    if tokio::time::timeout(timeout, settled).await.is_err() {
        tracing::info!("WebSocket not ready, continuing with HTTP fallback");
    }
    session.unsubscribe_from_state(id);
}

fn print_message(message: &Message, json: bool) {
    if json {
        match serde_json::to_string(message) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("failed to encode message: {}", e),
        }
        return;
    }

    let payload = message.payload();
    match message.kind() {
        MessageKind::Response => println!("{}", payload["response"].as_str().unwrap_or_default()),
        MessageKind::Error => eprintln!("error: {}", payload["message"].as_str().unwrap_or_default()),
        MessageKind::Status => println!(
            "[{}] {}",
            payload["status"].as_str().unwrap_or_default(),
            payload["progress"]
                .as_f64()
                .map(|p| format!("{:.0}%", p))
                .unwrap_or_default()
        ),
        MessageKind::Question => println!("> {}", message.question_text().unwrap_or_default()),
    }
}

fn print_state(state: &ConnectionState, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(state) {
            eprintln!("{}", line);
        }
    } else {
        match &state.last_error {
            Some(error) => eprintln!("-- {} ({})", state.status, error),
            None => eprintln!("-- {}", state.status),
        }
    }
}
