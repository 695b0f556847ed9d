//! Mapping engine with statum state machine around the key pipeline
//!
//! One engine per process owns the [`KeyPipeline`] and with it the key ledger.
//! It runs in its own tokio task and multiplexes serial source events, console
//! commands, a sweep tick and the shutdown token.
//!
//! # State Machine
//!
//! ```text
//! Initializing ──► Configured ──► Active ──► Deactivating ──► Deactivated
//!                                               (release_all)
//! ```
//!
//! # Architecture
//!
//! ```text
//! SourceEvent ──►┐
//! EngineCommand ─┼─► select! ──► KeyPipeline ──► KeyLedger ──► KeyInjector
//! tick (10ms) ──►┘
//! ```

use crate::controller::serial_collector::SourceEvent;
use crate::mapping::injector::KeyInjector;
use crate::mapping::pipeline::{KeyPipeline, PipelineSettings};
use crate::mapping::profile::ProfileRegistry;
use crate::mapping::MappingError;
use statum::{machine, state};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Runtime commands from the console
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    SwitchProfile(String),
    ReleaseAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub pipeline: PipelineSettings,
    pub tick: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pipeline: PipelineSettings::default(),
            tick: Duration::from_millis(10),
        }
    }
}

/// States for mapping engine lifecycle using statum
#[state]
#[derive(Debug, Clone)]
pub enum MappingEngineState {
    Initializing, // Channels attached, no pipeline yet
    Configured,   // Profile resolved, pipeline built
    Active,       // Processing events in main loop
    Deactivating, // Shutdown requested
    Deactivated,  // All keys released
}

#[machine]
pub struct MappingEngine<S: MappingEngineState> {
    source_receiver: mpsc::Receiver<SourceEvent>,
    command_receiver: mpsc::Receiver<EngineCommand>,
    registry: ProfileRegistry,
    settings: EngineSettings,
    name: String,
    pipeline: Option<KeyPipeline>,
}

impl<S: MappingEngineState> MappingEngine<S> {
    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> Option<&KeyPipeline> {
        self.pipeline.as_ref()
    }
}

impl MappingEngine<Initializing> {
    pub fn create(
        source_receiver: mpsc::Receiver<SourceEvent>,
        command_receiver: mpsc::Receiver<EngineCommand>,
        registry: ProfileRegistry,
        settings: EngineSettings,
        name: String,
    ) -> Self {
        info!("Initializing new mapping engine: {}", name);

        Self::new(
            source_receiver,
            command_receiver,
            registry,
            settings,
            name,
            None, // pipeline
        )
    }

    /// Resolves the profile, builds the pipeline and transitions to Configured
    pub fn configure(
        mut self,
        profile: &str,
        injector: Box<dyn KeyInjector>,
    ) -> Result<MappingEngine<Configured>, MappingError> {
        info!("Configuring mapping engine: {}", self.name);

        let mapping = self.registry.get(profile)?;
        match KeyPipeline::new(mapping, self.settings.pipeline, injector) {
            Ok(pipeline) => {
                debug!(
                    "Pipeline ready with profile '{}' and injector '{}'",
                    profile,
                    pipeline.ledger().injector_name()
                );
                self.pipeline = Some(pipeline);
                info!("Engine configured successfully: {}", self.name);
                Ok(self.transition())
            }
            Err(e) => {
                error!("Failed to build key pipeline: {}", e);
                Err(MappingError::InitializationError(format!(
                    "Failed to build key pipeline: {}",
                    e
                )))
            }
        }
    }
}

impl MappingEngine<Configured> {
    pub fn activate(self) -> MappingEngine<Active> {
        info!("Activating mapping engine: {}", self.name);
        self.transition()
    }
}

impl MappingEngine<Active> {
    fn pipeline_mut(&mut self) -> Result<&mut KeyPipeline, MappingError> {
        self.pipeline
            .as_mut()
            .ok_or_else(|| MappingError::InitializationError("No pipeline available".to_string()))
    }

    /// Applies one source event to the pipeline
    pub fn handle_source_event(
        &mut self,
        event: SourceEvent,
        now: Instant,
    ) -> Result<(), MappingError> {
        let pipeline = self.pipeline_mut()?;
        match event {
            SourceEvent::Connected(port) => {
                info!("Joystick connected on {}", port);
            }
            SourceEvent::Line(line) => {
                debug!(
                    "[{}] {}",
                    line.received_at.format("%H:%M:%S%.3f"),
                    line.text.trim_end()
                );
                pipeline.handle_line(&line.text, now);
            }
            SourceEvent::Disconnected(reason) => {
                warn!("Joystick disconnected: {}", reason);
                pipeline.on_disconnect();
            }
            SourceEvent::Finished(reason) => {
                info!("Line source finished: {}", reason);
                pipeline.finish(now);
            }
        }
        Ok(())
    }

    pub fn handle_command(&mut self, command: EngineCommand) -> Result<(), MappingError> {
        debug!("Engine command: {:?}", command);
        match command {
            EngineCommand::SwitchProfile(name) => {
                let mapping = self.registry.get(&name)?;
                self.pipeline_mut()?.switch_profile(mapping)?;
                Ok(())
            }
            EngineCommand::ReleaseAll => {
                self.pipeline_mut()?.release_all();
                Ok(())
            }
        }
    }

    pub fn tick(&mut self, now: Instant) -> Result<(), MappingError> {
        self.pipeline_mut()?.tick(now);
        Ok(())
    }

    /// Main processing loop with graceful shutdown support
    ///
    /// Runs until the token is cancelled or the source channel closes. Errors of
    /// single events are logged and do not stop the loop.
    pub async fn run_until_shutdown(
        mut self,
        shutdown: CancellationToken,
    ) -> Result<MappingEngine<Deactivating>, MappingError> {
        info!("Starting event processing loop for: {}", self.name);

        let mut tick = tokio::time::interval(self.settings.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats = tokio::time::interval(STATS_INTERVAL);
        stats.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received for: {}", self.name);
                    break;
                }

                event = self.source_receiver.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.handle_source_event(event, Instant::now()) {
                                error!("Error processing source event: {}", e);
                            }
                        }
                        None => {
                            info!("Source closed, stopping: {}", self.name);
                            break;
                        }
                    }
                }

                Some(command) = self.command_receiver.recv() => {
                    if let Err(e) = self.handle_command(command) {
                        warn!("Command failed: {}", e);
                    }
                }

                _ = tick.tick() => {
                    if let Err(e) = self.tick(Instant::now()) {
                        error!("Error in sweep: {}", e);
                    }
                }

                _ = stats.tick() => {
                    if let Some(pipeline) = &self.pipeline {
                        info!(
                            "Stats [{}]: {} held={}",
                            pipeline.mapping().name,
                            pipeline.stats().summary(),
                            pipeline.ledger().held_keys().len()
                        );
                    }
                }
            }
        }

        info!("Transitioning to Deactivating state: {}", self.name);
        Ok(self.transition())
    }
}

impl MappingEngine<Deactivating> {
    /// Releases every held key and transitions to Deactivated
    pub fn shutdown(mut self) -> MappingEngine<Deactivated> {
        info!("Shutting down mapping engine: {}", self.name);

        if let Some(pipeline) = &mut self.pipeline {
            let released = pipeline.release_all();
            debug!("Released {} keys on shutdown", released.len());
            info!("Final stats: {}", pipeline.stats().summary());
        }

        info!("Engine shut down successfully: {}", self.name);
        self.transition()
    }
}

/// Handle for managing the mapping engine in a tokio task
#[derive(Debug)]
pub struct MappingEngineHandle {
    pub name: String,

    task_handle: Option<JoinHandle<Result<(), MappingError>>>,

    command_sender: Option<mpsc::Sender<EngineCommand>>,

    shutdown: CancellationToken,
}

impl MappingEngineHandle {
    pub fn new(name: String, shutdown: CancellationToken) -> Self {
        Self {
            name,
            task_handle: None,
            command_sender: None,
            shutdown,
        }
    }

    /// Creates, configures and activates the engine, then spawns its loop
    pub fn start(
        &mut self,
        source_receiver: mpsc::Receiver<SourceEvent>,
        registry: ProfileRegistry,
        settings: EngineSettings,
        profile: &str,
        injector: Box<dyn KeyInjector>,
    ) -> Result<(), MappingError> {
        let (command_sender, command_receiver) = mpsc::channel(16);
        let engine_name = self.name.clone();

        let engine = MappingEngine::create(
            source_receiver,
            command_receiver,
            registry,
            settings,
            engine_name.clone(),
        )
        .configure(profile, injector)?;

        let active_engine = engine.activate();
        let shutdown = self.shutdown.clone();

        let task_handle = tokio::spawn(async move {
            info!("Spawning running engine: {}", engine_name);
            match active_engine.run_until_shutdown(shutdown).await {
                Ok(deactivating_engine) => {
                    info!("Engine entering deactivating state: {}", engine_name);
                    let _ = deactivating_engine.shutdown();
                    Ok(())
                }
                Err(e) => {
                    error!("Error running engine: {} - {}", engine_name, e);
                    Err(e)
                }
            }
        });

        self.command_sender = Some(command_sender);
        self.task_handle = Some(task_handle);
        info!("Mapping engine activated: {} (profile {})", self.name, profile);
        Ok(())
    }

    pub async fn send(&self, command: EngineCommand) -> Result<(), MappingError> {
        let sender = self
            .command_sender
            .as_ref()
            .ok_or_else(|| MappingError::ChannelError("Engine not started".to_string()))?;

        sender
            .send(command)
            .await
            .map_err(|e| MappingError::ChannelError(format!("Engine stopped: {}", e)))
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    /// Cancels the engine and waits until its keys are released
    pub async fn shutdown(&mut self) -> Result<(), MappingError> {
        debug!("Sending shutdown signal to engine: {}", self.name);
        self.shutdown.cancel();

        if let Some(handle) = self.task_handle.take() {
            match handle.await {
                Ok(result) => {
                    debug!("Engine task completed: {}", self.name);
                    result
                }
                Err(e) => {
                    error!("Engine task panicked: {} - {}", self.name, e);
                    Err(MappingError::ThreadError(format!(
                        "Engine task panicked: {}",
                        e
                    )))
                }
            }
        } else {
            debug!("Engine already shut down: {}", self.name);
            Ok(())
        }
    }
}
