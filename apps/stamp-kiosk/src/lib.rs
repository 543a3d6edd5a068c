//! # Stamp Kiosk
//!
//! Console host for one scan session.
//!
//! ## Module Organization
//! ```text
//! stamp_kiosk/
//! ├── lib.rs              ◄─── You are here (wiring & run loop)
//! ├── commands.rs         ◄─── Console command parsing, manual prompt
//! ├── credential_store.rs ◄─── Token file / STAMP_TOKEN credential
//! ├── emitter.rs          ◄─── Console state lines, exit signal
//! └── file_camera.rs      ◄─── Folder-backed camera backend
//! ```
//!
//! ## Run Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Kiosk Run Loop                                  │
//! │                                                                         │
//! │  select! {                                                              │
//! │     Ctrl+C / SIGTERM      ──► stop session, exit                        │
//! │     navigation signal     ──► stop session, exit with the reason        │
//! │     stdin line            ──► answer open prompt, or run a command      │
//! │  }                                                                      │
//! │                                                                         │
//! │  stdin reaching EOF only stops command input; the session keeps         │
//! │  running until it navigates away or a signal arrives.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod commands;
pub mod credential_store;
pub mod emitter;
pub mod file_camera;

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use stamp_scan::{
    ControllerConfig, HttpVisitSubmitter, LeaveReason, ScanConfig, ScanController,
    ScanControllerHandle, ScanDeps, ScannerError, ScannerResult,
};

use commands::{ConsoleCommand, ConsolePrompt, HELP};
use credential_store::TokenFileCredential;
use emitter::{render, ConsoleEmitter, ExitSignal};
use file_camera::FileCameraBackend;

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=stamp=trace` - Show trace for stamp crates only
/// - Default: `info,stamp=debug`
///
/// Logs go to stderr so stdout stays readable for the console.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,stamp=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Wires the kiosk collaborators and runs one session to completion.
///
/// Returns the navigation reason that ended the session, or `None` when the
/// operator quit or a shutdown signal arrived.
pub async fn run(config: ScanConfig) -> ScannerResult<Option<LeaveReason>> {
    let cameras_dir = config.kiosk.cameras_dir.clone().ok_or_else(|| {
        ScannerError::InvalidConfig("kiosk.cameras_dir is not set (STAMP_CAMERAS_DIR)".into())
    })?;

    let backend = Arc::new(FileCameraBackend::new(cameras_dir, config.frame_interval()));
    let submitter = Arc::new(HttpVisitSubmitter::new(&config)?);
    let credentials = Arc::new(TokenFileCredential::from_env(config.kiosk.token_path.clone()));
    let prompt = Arc::new(ConsolePrompt::new());
    let (exit, mut exits) = ExitSignal::channel();

    let deps = ScanDeps::new(backend, submitter, credentials)
        .with_emitter(Arc::new(ConsoleEmitter::new()))
        .with_navigation(Arc::new(exit))
        .with_manual_input(prompt.clone());
    let handle = ScanController::spawn(deps, ControllerConfig::from(&config));

    info!(session_id = %handle.session_id(), "Kiosk session created");
    println!("{}", HELP);
    if let Err(e) = handle.start().await {
        warn!(error = %e, "Session did not start");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break None,

            reason = exits.recv() => break reason,

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if prompt.answer(&line) {
                        continue;
                    }
                    match ConsoleCommand::parse(&line) {
                        Ok(Some(ConsoleCommand::Quit)) => break None,
                        Ok(Some(cmd)) => {
                            if let Err(e) = dispatch(&handle, cmd).await {
                                eprintln!("✗ {}", e);
                            }
                        }
                        Ok(None) => {}
                        Err(msg) => eprintln!("{}. {}", msg, HELP),
                    }
                }
                Ok(None) => {
                    debug!("Console input closed");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!(error = %e, "Console input failed");
                    stdin_open = false;
                }
            },
        }
    };

    prompt.close();
    handle.stop().await?;
    info!(reason = ?outcome, "Kiosk session finished");
    Ok(outcome)
}

/// Runs one console command against the session.
pub async fn dispatch(handle: &ScanControllerHandle, cmd: ConsoleCommand) -> ScannerResult<()> {
    match cmd {
        ConsoleCommand::Manual(Some(code)) => handle.manual_entry(code).await,
        ConsoleCommand::Manual(None) => handle.prompt_manual_entry().await,
        ConsoleCommand::Switch => {
            match handle.switch_camera().await? {
                Some(camera) => println!("→ {}", camera.label),
                None => println!("Solo hay una cámara disponible"),
            }
            Ok(())
        }
        ConsoleCommand::Cancel => handle.cancel_submission().await,
        ConsoleCommand::Restart => handle.start().await,
        ConsoleCommand::Print => {
            println!("{}", render(&handle.snapshot()));
            Ok(())
        }
        ConsoleCommand::Help => {
            println!("{}", HELP);
            Ok(())
        }
        ConsoleCommand::Quit => handle.stop().await,
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping session...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stamp_core::{
        CameraDescriptor, Credential, Facing, ScanStatus, SubmissionError, VisitOutcome,
    };
    use stamp_scan::sim::{SimCameraBackend, TextFrameDecoder};
    use stamp_scan::{StaticCredential, VisitSubmitter};

    struct AcceptAll;

    #[async_trait]
    impl VisitSubmitter for AcceptAll {
        async fn submit(
            &self,
            _code: &str,
            _credential: &Credential,
        ) -> Result<VisitOutcome, SubmissionError> {
            Ok(VisitOutcome::new(Some("Lugar registrado".into()), None))
        }
    }

    fn session(cameras: Vec<CameraDescriptor>) -> ScanControllerHandle {
        let deps = ScanDeps::new(
            Arc::new(SimCameraBackend::new(cameras)),
            Arc::new(AcceptAll),
            Arc::new(StaticCredential::new("token")),
        )
        .with_decoder(Arc::new(TextFrameDecoder));
        ScanController::spawn(deps, ControllerConfig::default())
    }

    #[tokio::test]
    async fn test_run_requires_cameras_dir() {
        let err = run(ScanConfig::default()).await.unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_manual_command_registers_visit() {
        let handle = session(vec![CameraDescriptor::new("back", "Back", Facing::Back)]);
        dispatch(&handle, ConsoleCommand::Restart).await.unwrap();
        handle.wait_for_status(ScanStatus::Scanning).await.unwrap();

        dispatch(&handle, ConsoleCommand::Manual(Some("PLACE-42".into())))
            .await
            .unwrap();
        let snapshot = handle.wait_for_status(ScanStatus::Success).await.unwrap();
        assert_eq!(snapshot.success_message.as_deref(), Some("Lugar registrado"));
    }

    #[tokio::test]
    async fn test_switch_and_quit_commands() {
        let handle = session(vec![
            CameraDescriptor::new("front", "Front", Facing::Front),
            CameraDescriptor::new("back", "Back", Facing::Back),
        ]);
        dispatch(&handle, ConsoleCommand::Restart).await.unwrap();
        handle.wait_for_status(ScanStatus::Scanning).await.unwrap();

        dispatch(&handle, ConsoleCommand::Switch).await.unwrap();
        assert!(dispatch(&handle, ConsoleCommand::Cancel).await.is_err());

        dispatch(&handle, ConsoleCommand::Quit).await.unwrap();
        assert_eq!(handle.status(), ScanStatus::Stopped);
    }

    #[tokio::test]
    async fn test_prompt_without_input_is_rejected() {
        let handle = session(vec![CameraDescriptor::new("back", "Back", Facing::Back)]);
        let err = dispatch(&handle, ConsoleCommand::Manual(None)).await.unwrap_err();
        assert!(err.is_config_error());
    }
}
