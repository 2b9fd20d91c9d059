// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::{ExitCode, Stdio};
use std::{env, sync::Arc};

use tokio::{io::BufReader, process::Command, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

use tglog::{
    accumulator::Accumulator,
    config::Config,
    debounce::{Dispatcher, FlushSource, Trigger},
    dedup::DedupStore,
    errors::{ConfigError, StartupError},
    layer::{install_panic_hook, NotifyLayer},
    payload::PayloadFormat,
    sender::{Sender, Transport},
    tailer::{Tailer, UnitFilter},
    telegram::TelegramTransport,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    // a missing .env file is the common case
    let dotenv = dotenvy::dotenv();

    let (config, issues) = Config::from_env();

    let log_trigger = Trigger::new();
    let log_store = Arc::new(DedupStore::new(log_trigger.clone()));
    init_logging(&config, Arc::clone(&log_store));
    install_panic_hook();

    match dotenv {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to load .env file: {e}"),
    }
    for issue in &issues {
        warn!("{issue}, keeping default");
    }
    if let Err(e) = config.validate() {
        error!("Error creating config on tglog-journal startup: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Loaded configuration: {config:?}");

    let sender = Arc::new(build_sender(&config));
    let cancel = CancellationToken::new();

    let journal_trigger = Trigger::new();
    let accumulator = Arc::new(Accumulator::new(journal_trigger.clone()));
    let journal_dispatcher = spawn_dispatcher(
        Arc::clone(&accumulator),
        journal_trigger,
        &config,
        Arc::clone(&sender),
        PayloadFormat::CodeBlock,
        &cancel,
    );
    let log_dispatcher = spawn_dispatcher(
        log_store,
        log_trigger,
        &config,
        sender,
        PayloadFormat::Shell {
            header: executable_name(),
        },
        &cancel,
    );

    let result = tail_journal(&config, accumulator).await;
    if let Err(e) = &result {
        // logged before cancelling so the final flush carries it
        error!("{e}");
    }

    cancel.cancel();
    for (name, handle) in [("journal", journal_dispatcher), ("log", log_dispatcher)] {
        if let Err(e) = handle.await {
            error!("{name} dispatcher task failed: {e}");
        }
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn init_logging(config: &Config, log_store: Arc<DedupStore>) {
    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);
    // an invalid level is reported by validate() once logging is up
    let env_filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_filter(env_filter);

    let subscriber = tracing_subscriber::registry()
        .with(console)
        .with(NotifyLayer::new(log_store, config.forward_level));

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }
    debug!("Logging subsystem enabled");
}

fn build_sender(config: &Config) -> Sender {
    let transport: Option<Arc<dyn Transport>> = match &config.bot_token {
        Some(token) => match TelegramTransport::new(
            &config.api_url,
            token,
            config.parse_mode.clone(),
            config.send_timeout,
        ) {
            Ok(transport) => Some(Arc::new(transport)),
            Err(e) => {
                error!("Failed to build chat transport, payloads will go to stderr: {e}");
                None
            }
        },
        None => {
            warn!("TGLOG_BOT_TOKEN not set, payloads will go to stderr");
            None
        }
    };

    if config.recipients.is_empty() {
        warn!("TGLOG_RECIPIENTS is empty, payloads will go to stderr");
    } else {
        info!("Forwarding to {} recipient(s)", config.recipients.len());
    }

    Sender::new(transport, config.recipients.clone(), config.send_timeout)
}

fn spawn_dispatcher<S: FlushSource + 'static>(
    source: Arc<S>,
    trigger: Trigger,
    config: &Config,
    sender: Arc<Sender>,
    format: PayloadFormat,
    cancel: &CancellationToken,
) -> JoinHandle<()> {
    let dispatcher = Dispatcher::new(source, trigger, config.flush_strategy, sender, format);
    tokio::spawn(dispatcher.run(cancel.clone()))
}

/// Runs the journal command and feeds its output to the accumulator until the
/// stream ends or the process is interrupted.
async fn tail_journal(config: &Config, accumulator: Arc<Accumulator>) -> Result<(), StartupError> {
    let command_line = config.journal_command.join(" ");
    let (program, args) = config
        .journal_command
        .split_first()
        .ok_or_else(|| ConfigError::Invalid("TGLOG_JOURNAL_COMMAND cannot be empty".to_string()))?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StartupError::Spawn {
            command: command_line.clone(),
            source,
        })?;
    let stdout = child.stdout.take().ok_or(StartupError::MissingStdout)?;

    match &config.unit_prefix {
        Some(prefix) => info!("Tailing '{command_line}' for units starting with '{prefix}'"),
        None => info!("Tailing '{command_line}' for all units"),
    }

    let tailer = Tailer::new(accumulator, UnitFilter::new(config.unit_prefix.clone()));
    tokio::select! {
        res = tailer.run(BufReader::new(stdout)) => match res {
            Ok(stats) => info!(
                "Journal stream ended: {} forwarded, {} filtered, {} undecodable",
                stats.forwarded, stats.filtered, stats.decode_errors
            ),
            Err(e) => error!("Failed to read journal stream: {e}"),
        },
        () = shutdown_signal() => {
            info!("Interrupted, shutting down");
            if let Err(e) = child.kill().await {
                warn!("Failed to stop '{command_line}': {e}");
            }
            return Ok(());
        }
    }

    let status = child.wait().await.map_err(StartupError::Wait)?;
    if status.success() {
        Ok(())
    } else {
        Err(StartupError::Exited(status))
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

fn executable_name() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}
