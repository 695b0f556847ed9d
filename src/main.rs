pub mod cli;
pub mod config;
pub mod controller;
pub mod mapping;

use crate::cli::{Cli, ConsoleCommand, CONSOLE_HELP};
use crate::controller::controller_handle::{
    list_ports, ControllerHandle, SourceKind, DEFAULT_REPLAY_INTERVAL,
};
use crate::mapping::{EngineCommand, KeyInjector, LogInjector, MappingEngineHandle, ProfileRegistry};
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::io::BufRead;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup(cli.verbose)?;

    if cli.list_ports {
        let ports = list_ports().map_err(|e| eyre!("Failed to list ports: {}", e))?;
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!(
                "{}{}  {}",
                port.name,
                if port.preferred { " *" } else { "" },
                port.description
            );
        }
        return Ok(());
    }

    // Konfiguration laden, CLI-Optionen haben Vorrang
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut config = config::load_or_create(&config_path).await?;
    if let Some(port) = &cli.port {
        config.serial.port = Some(port.clone());
    }
    if let Some(baud) = cli.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(profile) = &cli.profile {
        config.profile = profile.clone();
    }
    config.validate()?;

    let registry = config.registry()?;
    if cli.list_profiles {
        for name in registry.names() {
            let profile = registry.get(&name)?;
            println!("{}", profile.describe());
        }
        return Ok(());
    }

    let profile = registry.get(&config.profile).map_err(|e| {
        eyre!(
            "{} (available: {})",
            e,
            registry.names().join(", ")
        )
    })?;
    println!("{}", profile.describe());

    let injector = create_injector(cli.dry_run)?;
    info!("Key injection backend: {}", injector.name());

    let shutdown = CancellationToken::new();
    let (source_sender, source_receiver) = mpsc::channel(1000);

    // Engine zuerst starten, damit keine Zeile verloren geht
    let mut engine = MappingEngineHandle::new("joykeys".to_string(), shutdown.clone());
    engine.start(
        source_receiver,
        registry.clone(),
        config.engine_settings(),
        &config.profile,
        injector,
    )?;

    let source = match &cli.replay {
        Some(path) => SourceKind::Replay {
            path: path.clone(),
            interval: cli
                .replay_interval
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_REPLAY_INTERVAL),
        },
        None => SourceKind::Serial(config.collector_settings()),
    };
    let mut controller = ControllerHandle::spawn(source, source_sender, shutdown.clone())
        .await
        .map_err(|e| eyre!("Failed to start line source: {}", e))?;

    println!("{}", CONSOLE_HELP);
    run_console(&engine, &registry, &shutdown).await;

    info!("Shutting down");
    if let Err(e) = engine.shutdown().await {
        error!("Engine shutdown failed: {}", e);
    }
    if let Err(e) = controller.shutdown().await {
        warn!("Line source ended with error: {}", e);
    }
    Ok(())
}

/// Reads console commands until `quit`, Ctrl-C, or the engine stops
async fn run_console(
    engine: &MappingEngineHandle,
    registry: &ProfileRegistry,
    shutdown: &CancellationToken,
) {
    let mut lines = spawn_stdin_reader();
    let mut stdin_open = true;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }

            _ = watchdog.tick() => {
                if engine.is_finished() {
                    info!("Engine stopped");
                    break;
                }
            }

            line = lines.recv(), if stdin_open => {
                match line {
                    Some(line) => {
                        if !handle_console_line(&line, engine, registry).await {
                            break;
                        }
                    }
                    None => {
                        debug!("stdin closed, console disabled");
                        stdin_open = false;
                    }
                }
            }
        }
    }
}

/// Console input on a plain thread; a blocking read must not hold up runtime shutdown
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (sender, receiver) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if sender.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    receiver
}

/// Returns false on `quit`
async fn handle_console_line(
    line: &str,
    engine: &MappingEngineHandle,
    registry: &ProfileRegistry,
) -> bool {
    if line.trim().is_empty() {
        return true;
    }

    let Some(command) = ConsoleCommand::parse(line) else {
        println!("Unknown command '{}'", line.trim());
        println!("{}", CONSOLE_HELP);
        return true;
    };

    let result = match command {
        ConsoleCommand::Profile(name) => match registry.get(&name) {
            Ok(profile) => {
                println!("{}", profile.describe());
                engine.send(EngineCommand::SwitchProfile(name)).await
            }
            Err(e) => {
                println!("{} (available: {})", e, registry.names().join(", "));
                Ok(())
            }
        },
        ConsoleCommand::Profiles => {
            for name in registry.names() {
                println!("  {}", name);
            }
            Ok(())
        }
        ConsoleCommand::Release => engine.send(EngineCommand::ReleaseAll).await,
        ConsoleCommand::Help => {
            println!("{}", CONSOLE_HELP);
            Ok(())
        }
        ConsoleCommand::Quit => return false,
    };

    if let Err(e) = result {
        warn!("Console command failed: {}", e);
    }
    true
}

#[cfg(all(feature = "uinput", target_os = "linux"))]
fn create_injector(dry_run: bool) -> Result<Box<dyn KeyInjector>> {
    if dry_run {
        return Ok(Box::new(LogInjector));
    }
    let injector = crate::mapping::injector::UinputInjector::create()?;
    Ok(Box::new(injector))
}

#[cfg(not(all(feature = "uinput", target_os = "linux")))]
fn create_injector(dry_run: bool) -> Result<Box<dyn KeyInjector>> {
    if dry_run {
        return Ok(Box::new(LogInjector));
    }
    Err(eyre!(
        "No key injection backend available on this platform, run with --dry-run"
    ))
}

fn setup(verbose: bool) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env(verbose);
    Ok(())
}

fn setup_logging_env(verbose: bool) {
    let level = if verbose {
        Level::DEBUG
    } else {
        std::env::var("RUST_LOG")
            .ok()
            .and_then(|value| value.parse::<Level>().ok())
            .unwrap_or(Level::INFO)
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
