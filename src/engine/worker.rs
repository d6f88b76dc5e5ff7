//! Engine thread main loop
//!
//! The worker owns [`EngineCore`] and is the only code that advances it.
//! Commands are drained before every tick; with nothing to play the thread
//! blocks on the inbox instead of spinning.

use super::command::Command;
use super::driver::{EngineCore, TickReport};
use super::session::RenderSession;
use super::status::{EngineEvent, EngineStatus};
use crate::config::{Settings, SettingsStore};
use crate::player::PlayerState;
use crate::render::RenderReport;
use crate::streaming::{NullSink, OutputSink, StreamConfig};
use crate::visualizer::VisualizerFeed;
use crate::{Result, SoundGenError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;

/// Render ticks between status refreshes
const RENDER_STATUS_INTERVAL: u32 = 16;

/// Handles shared between the worker and [`super::SoundGen`]
pub(crate) struct WorkerLinks {
    pub inbox: Receiver<Command>,
    pub events: SyncSender<EngineEvent>,
    pub status: Arc<Mutex<EngineStatus>>,
    pub interrupt: Arc<AtomicBool>,
    pub visualizer: VisualizerFeed,
    pub store: SettingsStore,
}

pub(crate) struct Worker {
    core: EngineCore,
    links: WorkerLinks,
    sink: Box<dyn OutputSink>,
    render: Option<RenderSession>,
    /// Settings re-read during a render, applied once it ends
    pending_settings: Option<Settings>,
    /// Ticks to keep generating after the engine went quiet (decay tails)
    linger: u32,
    /// Samples not yet accepted by the sink, oldest first
    output: Vec<i16>,
    scratch: Vec<i16>,
    levels: Vec<f32>,
    render_ticks: u32,
    running: bool,
}

impl Worker {
    pub fn new(core: EngineCore, links: WorkerLinks, sink: Box<dyn OutputSink>) -> Self {
        Worker {
            core,
            links,
            sink,
            render: None,
            pending_settings: None,
            linger: 0,
            output: Vec::new(),
            scratch: Vec::new(),
            levels: Vec::new(),
            render_ticks: 0,
            running: true,
        }
    }

    /// Thread body; returns after `Shutdown` or when every handle is gone
    pub fn run(mut self) {
        log::info!("sound engine started ({} output)", self.sink.name());
        self.open_sink();
        self.publish_status();

        while self.running {
            self.links.interrupt.store(false, Ordering::Release);
            if self.is_idle() {
                self.flush_output();
                self.publish_status();
                // an interrupted flush leaves a tail; serve the inbox and retry
                if self.output.is_empty() {
                    match self.links.inbox.recv() {
                        Ok(command) => self.handle(command),
                        Err(_) => break,
                    }
                }
            }
            self.drain_inbox();
            if !self.running {
                break;
            }

            if self.render.is_some() {
                self.render_step();
            } else if !self.is_idle() {
                self.play_step();
            }
        }

        if let Some(session) = self.render.take() {
            session.cancel();
        }
        self.sink.close();
        log::info!("sound engine stopped");
    }

    fn is_idle(&self) -> bool {
        self.render.is_none() && !self.core.is_active() && self.linger == 0
    }

    fn drain_inbox(&mut self) {
        while self.running {
            match self.links.inbox.try_recv() {
                Ok(command) => self.handle(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.running = false,
            }
        }
    }

    fn linger(&mut self) {
        self.linger = self.core.tick_rate();
    }

    fn emit(&self, event: EngineEvent) {
        match self.links.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => log::trace!("event queue full, dropped {event:?}"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn handle(&mut self, command: Command) {
        log::trace!("command {command:?}");
        match command {
            Command::AssignDocument(doc) => {
                self.abort_render("document replaced");
                self.core.assign_document(Some(doc));
                self.linger();
            }
            Command::RemoveDocument => {
                self.abort_render("document removed");
                self.core.assign_document(None);
                self.linger();
            }
            Command::Play(cursor) => {
                if self.render.is_some() {
                    log::warn!("play request ignored while rendering");
                } else if let Err(e) = self.core.play(cursor, PlayerState::Playing) {
                    log::warn!("play at {cursor} rejected: {e}");
                }
            }
            Command::Stop => {
                if self.render.is_none() {
                    self.core.stop();
                    self.linger();
                }
            }
            Command::Reset => {
                self.abort_render("engine reset");
                self.core.reset();
            }
            Command::StartRender { renderer, spec, cursor } => {
                self.abort_render("superseded by a new render");
                self.output.clear();
                match RenderSession::begin(&mut self.core, renderer, spec, cursor) {
                    Ok(session) => {
                        log::info!("rendering {:?} from {cursor}", spec.length);
                        self.render = Some(session);
                        self.render_ticks = 0;
                    }
                    Err(e) => self.emit(EngineEvent::RenderFinished(Err(e))),
                }
            }
            Command::StopRender => self.abort_render("render cancelled"),
            Command::PreviewSample { sample, offset, pitch } => {
                if let Err(e) = self.core.preview_sample(&sample, offset, pitch) {
                    log::warn!("preview rejected: {e}");
                }
            }
            Command::CancelPreview => {
                if self.core.cancel_preview() {
                    self.emit(EngineEvent::PreviewDone);
                    self.linger();
                }
            }
            Command::WriteApu(addr, value) => {
                self.core.write_apu(addr, value);
                self.linger();
            }
            Command::SetChip(chips) => {
                self.abort_render("chip set changed");
                self.core.set_chips(chips);
            }
            Command::LoadSettings => self.load_settings(),
            Command::SilentAll => {
                self.core.silent_all();
                self.linger();
            }
            Command::QueueNote { channel, note, priority } => {
                if !self.core.queue_note(channel, note, priority) {
                    log::debug!("note for channel {channel} dropped by a higher-priority note");
                }
                self.linger();
            }
            Command::MoveToFrame(frame) => self.core.move_to_frame(frame),
            Command::SetQueueFrame(frame) => self.core.set_queue_frame(frame),
            Command::JumpTo { frame, row } => self.core.jump_to(frame, row),
            Command::SkipTo(row) => self.core.skip_to(row),
            Command::SetHighlight(rows) => self.core.set_highlight_rows(rows),
            Command::ForceReloadInstruments => self.core.force_reload_instruments(),
            Command::WaveChanged => self.core.wave_changed(),
            Command::Shutdown => self.running = false,
        }
    }

    fn load_settings(&mut self) {
        match self.links.store.reload() {
            Ok(settings) => {
                if self.render.is_some() {
                    self.pending_settings = Some(settings.clone());
                } else {
                    self.apply_settings(settings.clone());
                }
                self.emit(EngineEvent::SettingsLoaded(Ok(settings)));
            }
            Err(e) => {
                log::warn!("settings reload failed: {e}");
                self.emit(EngineEvent::SettingsLoaded(Err(e)));
            }
        }
    }

    fn apply_settings(&mut self, settings: Settings) {
        if self.core.apply_settings(settings) {
            self.output.clear();
            self.sink.close();
            self.open_sink();
        }
    }

    fn open_sink(&mut self) {
        let config = StreamConfig::from_settings(self.core.settings());
        match self.sink.open(&config) {
            Ok(()) => log::debug!(
                "{} output open: {} Hz, {}-bit, {:.0} ms buffer",
                self.sink.name(),
                config.sample_rate,
                config.bit_depth,
                config.latency_ms()
            ),
            Err(e) => self.device_failed(e),
        }
    }

    /// Replace a failed output with a paced null sink so timing is kept
    fn device_failed(&mut self, err: SoundGenError) {
        log::error!("{} output failed: {err}; continuing without audio", self.sink.name());
        self.emit(EngineEvent::DeviceError(err.to_string()));
        self.sink.close();
        let mut fallback = NullSink::paced();
        let config = StreamConfig::from_settings(self.core.settings());
        if let Err(e) = fallback.open(&config) {
            log::error!("fallback output failed: {e}");
        }
        self.sink = Box::new(fallback);
    }

    fn on_tick(&mut self, report: TickReport) {
        if report.outcome.new_row {
            self.emit(EngineEvent::PositionChanged(self.core.player().cursor()));
        }
        if report.stopped {
            self.emit(EngineEvent::Halted);
            self.linger();
        }
        if report.preview_done {
            self.emit(EngineEvent::PreviewDone);
            self.linger();
        }
    }

    fn play_step(&mut self) {
        self.scratch.clear();
        let report = self.core.tick(&mut self.scratch);
        self.on_tick(report);

        if self.core.settings().bit_depth == 8 {
            for sample in &mut self.scratch {
                *sample &= !0xFF;
            }
        }
        self.core.channel_levels(&mut self.levels);
        self.links.visualizer.push(&self.scratch, &self.levels);
        self.output.extend_from_slice(&self.scratch);
        if self.output.len() >= self.core.settings().buffer_samples() {
            self.flush_output();
            self.publish_status();
        }
        if !self.core.is_active() {
            self.linger = self.linger.saturating_sub(1);
        }
    }

    /// Hand pending samples to the sink; whatever it refuses stays queued
    fn flush_output(&mut self) {
        if self.output.is_empty() {
            return;
        }
        match self.sink.flush_buffer(&self.output, &self.links.interrupt) {
            Ok(accepted) => {
                let accepted = accepted.min(self.output.len());
                if accepted < self.output.len() {
                    log::trace!("output interrupted, {} samples kept", self.output.len() - accepted);
                }
                self.output.drain(..accepted);
            }
            Err(e) => {
                self.output.clear();
                self.device_failed(e);
            }
        }
    }

    fn render_step(&mut self) {
        let Some(session) = self.render.as_mut() else {
            return;
        };
        match session.step(&mut self.core, &mut self.scratch) {
            Ok(report) => {
                self.on_tick(report);
                self.render_ticks += 1;
                if self.render_ticks % RENDER_STATUS_INTERVAL == 0 {
                    self.publish_status();
                }
                if self.render.as_ref().is_some_and(|s| s.is_done()) {
                    self.end_render(Ok(()));
                }
            }
            Err(e) => self.end_render(Err(e)),
        }
    }

    fn abort_render(&mut self, reason: &str) {
        if self.render.is_some() {
            self.end_render(Err(SoundGenError::Render(reason.to_string())));
        }
    }

    /// Persist or discard the running render and return to idle
    fn end_render(&mut self, outcome: Result<()>) {
        let Some(session) = self.render.take() else {
            return;
        };
        let result: Result<RenderReport> = match outcome {
            Ok(()) => session.finish(),
            Err(e) => {
                session.cancel();
                Err(e)
            }
        };
        match &result {
            Ok(report) => log::info!(
                "render finished: {} ({:.1} s)",
                report.path.display(),
                report.duration_secs()
            ),
            Err(e) => log::warn!("render discarded: {e}"),
        }
        self.emit(EngineEvent::RenderFinished(result));

        self.core.reset();
        if let Some(settings) = self.pending_settings.take() {
            self.apply_settings(settings);
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let progress = self.render.as_ref().map(RenderSession::progress);
        *self.links.status.lock() = self.core.status(progress);
    }
}
