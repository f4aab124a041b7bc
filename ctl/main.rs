#![forbid(unsafe_code)]

//! `session-control-ctl`: local CLI for per-session control sockets.
//!
//! Connects to `<control_dir>/<session>.sock`, sends one command, prints the
//! response (and the awaited event, if any), and exits non-zero on failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use session_control::ipc::address;
use session_control::ipc::client::{send_command, RpcOptions, RpcOutcome};
use session_control::ipc::protocol::{Command, EventKind, Request, SendMode};
use session_control::{AppError, ControlConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum CtlMode {
    /// Interrupt the in-flight turn.
    Steer,
    /// Queue after the in-flight turn.
    FollowUp,
}

impl From<CtlMode> for SendMode {
    fn from(mode: CtlMode) -> Self {
        match mode {
            CtlMode::Steer => Self::Steer,
            CtlMode::FollowUp => Self::FollowUp,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum CtlWait {
    /// Wait until the target finishes its turn.
    TurnEnd,
    /// Return once the target has accepted the message.
    MessageProcessed,
}

#[derive(Debug, Parser)]
#[command(
    name = "session-control-ctl",
    about = "Local CLI for per-session control sockets",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the control directory (default `~/.pi/session-control`).
    #[arg(long)]
    control_dir: Option<PathBuf>,

    /// Override the timeout for this call, in seconds.
    #[arg(long)]
    timeout_seconds: Option<u64>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: CtlCommand,
}

#[derive(Debug, Subcommand)]
enum CtlCommand {
    /// List control sockets and whether they accept connections.
    List,

    /// Deliver a user message.
    Send {
        /// Target session id.
        #[arg(long)]
        session: String,
        /// Message text.
        message: String,
        /// Delivery mode when the target is busy.
        #[arg(long, value_enum, default_value_t = CtlMode::Steer)]
        mode: CtlMode,
        /// Wait behaviour.
        #[arg(long, value_enum)]
        wait: Option<CtlWait>,
    },

    /// Print the most recent assistant message.
    GetMessage {
        /// Target session id.
        #[arg(long)]
        session: String,
    },

    /// Summarize activity since the last user prompt.
    Summary {
        /// Target session id.
        #[arg(long)]
        session: String,
    },

    /// Rewind the session to its root entry.
    Clear {
        /// Target session id.
        #[arg(long)]
        session: String,
    },

    /// Cancel the in-flight turn.
    Abort {
        /// Target session id.
        #[arg(long)]
        session: String,
    },

    /// Wait for the next `turn_end` and print it.
    Watch {
        /// Target session id.
        #[arg(long)]
        session: String,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to build tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(AppError::Timeout(msg)) => {
            eprintln!("Timed out: {msg}");
            ExitCode::FAILURE
        }
        Err(AppError::Connect(msg)) => {
            eprintln!("Failed to connect: {msg}");
            eprintln!("Is the session running with --session-control?");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Execute the subcommand; `Ok(false)` means the endpoint answered with a
/// failed response.
async fn run(args: Cli) -> Result<bool> {
    let mut config = match args.config {
        Some(ref path) => ControlConfig::load_from_path(path)?,
        None => ControlConfig::default(),
    };
    if let Some(dir) = args.control_dir {
        config.control_dir = Some(dir);
    }
    let control_dir = config.control_dir()?;
    let timeouts = &config.timeouts;
    let override_timeout = args.timeout_seconds.map(Duration::from_secs);

    let (session, request, options) = match args.command {
        CtlCommand::List => return list(&control_dir).await,
        CtlCommand::Send {
            session,
            message,
            mode,
            wait,
        } => {
            let options = if wait == Some(CtlWait::TurnEnd) {
                RpcOptions::until_turn_end(timeouts.turn_wait())
            } else {
                RpcOptions::request(timeouts.request())
            };
            let command = Command::Send {
                message,
                mode: Some(mode.into()),
            };
            (session, Request::new(command), options)
        }
        CtlCommand::GetMessage { session } => (
            session,
            Request::new(Command::GetMessage),
            RpcOptions::request(timeouts.request()),
        ),
        CtlCommand::Summary { session } => (
            session,
            Request::new(Command::GetSummary),
            RpcOptions::request(timeouts.summary()),
        ),
        CtlCommand::Clear { session } => (
            session,
            Request::new(Command::Clear { summarize: false }),
            RpcOptions::request(timeouts.clear()),
        ),
        CtlCommand::Abort { session } => (
            session,
            Request::new(Command::Abort),
            RpcOptions::request(timeouts.request()),
        ),
        CtlCommand::Watch { session } => (
            session,
            Request::new(Command::Subscribe {
                event: EventKind::TurnEnd,
            }),
            RpcOptions::until_turn_end(timeouts.turn_wait()),
        ),
    };

    let options = RpcOptions {
        timeout: override_timeout.unwrap_or(options.timeout),
        ..options
    };
    let socket = address::socket_path(&control_dir, &session)?;
    debug!(socket = %socket.display(), command = request.command.name(), "sending control command");

    let outcome = send_command(&socket, &request, options).await?;
    print_outcome(&outcome)
}

async fn list(control_dir: &std::path::Path) -> Result<bool> {
    let ids = address::list_session_ids(control_dir).await?;
    if ids.is_empty() {
        println!("No control sockets in {}", control_dir.display());
        return Ok(true);
    }
    for id in ids {
        let socket = address::socket_path(control_dir, &id)?;
        let status = if address::is_live(&socket).await {
            "live"
        } else {
            "stale"
        };
        println!("{id}\t{status}");
    }
    Ok(true)
}

fn print_outcome(outcome: &RpcOutcome) -> Result<bool> {
    let response = &outcome.response;
    if !response.success {
        eprintln!(
            "Error: {}",
            response.error.as_deref().unwrap_or("unknown error")
        );
        return Ok(false);
    }

    let pretty = |value: &serde_json::Value| {
        serde_json::to_string_pretty(value)
            .map_err(|err| AppError::Protocol(format!("cannot render response: {err}")))
    };

    if let Some(ref event) = outcome.event {
        let value = serde_json::to_value(event)
            .map_err(|err| AppError::Protocol(format!("cannot render event: {err}")))?;
        println!("{}", pretty(&value)?);
    } else if let Some(ref data) = response.data {
        println!("{}", pretty(data)?);
    } else {
        println!("OK");
    }
    Ok(true)
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
