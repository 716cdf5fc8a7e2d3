use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use libtaskshell::{
    ConsoleTerminal, LocalStdio, Orchestrator, ProtocolDialer, QueueResolver, ShellConfig,
    ShellError, threaded_stdin,
};
use tokio::signal::unix::{SignalKind, signal};

#[derive(Parser)]
#[command(
    name = "taskshell",
    version,
    about = "Open an interactive shell in a running task"
)]
struct Cli {
    /// Queue root url (overrides TASKCLUSTER_ROOT_URL and the config file)
    #[arg(long, value_name = "URL")]
    root_url: Option<String>,

    /// Config file [default: $XDG_CONFIG_HOME/taskshell/config.toml]
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Task to attach to
    task_id: String,

    /// Command to run instead of the default shell
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskshell=warn,libtaskshell=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ShellConfig::load(cli.config.as_deref(), cli.root_url.as_deref())
        .map_err(ShellError::Config)?;
    let resolver = QueueResolver::new(&config).map_err(ShellError::Config)?;
    let tty = std::io::stdout().is_terminal();
    let orchestrator = Orchestrator::new(resolver, ProtocolDialer, Arc::new(ConsoleTerminal), tty);

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;

    let command = (!cli.command.is_empty()).then_some(cli.command);
    let stdio = LocalStdio {
        input: threaded_stdin(),
        output: tokio::io::stdout(),
        error_output: tokio::io::stderr(),
    };

    // Dropping the run on a signal restores the terminal before we return.
    tokio::select! {
        result = orchestrator.run(&cli.task_id, command, stdio) => Ok(result?),
        _ = terminate.recv() => bail!("shell session of task {} terminated", cli.task_id),
        _ = hangup.recv() => bail!("shell session of task {} hung up", cli.task_id),
    }
}
