//! Worker-side hardware loop: frames, detection gate, preview publishing,
//! motion-idle waits and command servicing.
//!
//! Everything here runs on the worker thread. External requests arrive on the
//! command inbox and are applied only in [`Station::checkpoint`], which is
//! called between frames and between moves.

use super::gate::{DetectionGate, GateOutcome, PositionAverager};
use super::state::Observation;
use super::worker::WorkerCommand;
use crate::camera::FrameSource;
use crate::config::AlignConfig;
use crate::errors::{AlignmentError, MotionError};
use crate::events::{AlignmentEvent, EventBus, PreviewFrame};
use crate::motion::MotionInterface;
use crate::types::{DetectedFeature, Frame};
use crate::vision::{overlay, Detection, VisionPipeline};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

pub const AMBIGUOUS_MESSAGE: &str = "Too many circles found. Please stop and clean the nozzle.";
pub const NO_DETECTION_MESSAGE: &str = "No circles found.";
pub const SEARCHING_MESSAGE: &str = "Searching for nozzle..";

/// Requests that only the worker's top-level loop can act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    StartAlignment,
    StartDetection,
    Shutdown,
}

/// Display toggles for published frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Publish the binary detector image instead of the camera frame.
    pub xray: bool,
    pub crosshair: bool,
}

pub struct Station {
    frames: FrameSource,
    vision: VisionPipeline,
    gate: DetectionGate,
    display: DisplayOptions,
    config: AlignConfig,
    bus: EventBus,
    inbox: mpsc::UnboundedReceiver<WorkerCommand>,
    running: Arc<AtomicBool>,
    shutdown: bool,
    detector_generation: u64,
}

impl Station {
    pub fn new(
        frames: FrameSource,
        config: AlignConfig,
        bus: EventBus,
        inbox: mpsc::UnboundedReceiver<WorkerCommand>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            frames,
            vision: VisionPipeline::new(&config.detector),
            gate: DetectionGate::new(config.alignment.no_detection_limit),
            display: DisplayOptions::default(),
            config,
            bus,
            inbox,
            running,
            shutdown: false,
            detector_generation: 0,
        }
    }

    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn display(&self) -> DisplayOptions {
        self.display
    }

    pub fn frames(&self) -> &FrameSource {
        &self.frames
    }

    /// Bumped whenever detector settings change.
    pub fn detector_generation(&self) -> u64 {
        self.detector_generation
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn set_running(&mut self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn open_camera(&mut self) {
        if let Err(e) = self.frames.open() {
            log::warn!("Camera unavailable: {}", e);
        }
    }

    pub fn release_camera(&mut self) {
        self.frames.close();
    }

    /// Apply one command. Start and shutdown requests are handed back.
    pub fn apply(&mut self, command: WorkerCommand) -> Option<Control> {
        match command {
            WorkerCommand::StartAlignment => return Some(Control::StartAlignment),
            WorkerCommand::StartDetection => return Some(Control::StartDetection),
            WorkerCommand::Shutdown => {
                self.shutdown = true;
                self.set_running(false);
                return Some(Control::Shutdown);
            }
            WorkerCommand::Stop => self.set_running(false),
            WorkerCommand::SetDetector(detector) => self.configure_detector(detector),
            WorkerCommand::ToggleLoose => {
                let mut detector = self.config.detector.clone();
                detector.loose = !detector.loose;
                self.bus.message(if detector.loose {
                    "Loose detection enabled"
                } else {
                    "Loose detection disabled"
                });
                self.configure_detector(detector);
            }
            WorkerCommand::ToggleInvert => {
                let mut detector = self.config.detector.clone();
                detector.invert = !detector.invert;
                self.configure_detector(detector);
            }
            WorkerCommand::ToggleXray => self.display.xray = !self.display.xray,
            WorkerCommand::ToggleCrosshair => self.display.crosshair = !self.display.crosshair,
            WorkerCommand::SetCameraProperty(property, value) => {
                if let Err(e) = self.frames.set_property(property, value) {
                    log::warn!("{}", e);
                    self.bus.message(e.to_string());
                }
            }
            WorkerCommand::ResetCameraProperties => {
                if let Err(e) = self.frames.reset_properties() {
                    log::warn!("{}", e);
                    self.bus.message(e.to_string());
                }
            }
            WorkerCommand::ChangeSource(source) => {
                self.config.camera.source = source.clone();
                if let Err(e) = self.frames.change_source(&source) {
                    log::warn!("Failed to switch to source {}: {}", source, e);
                    self.bus.message(e.to_string());
                }
            }
        }
        None
    }

    fn configure_detector(&mut self, detector: crate::config::DetectorConfig) {
        if detector != self.config.detector {
            self.vision.configure(&detector);
            self.config.detector = detector;
            self.detector_generation += 1;
        }
    }

    /// Safe point: drain queued commands and honor the running flag.
    pub fn checkpoint(&mut self) -> Result<(), AlignmentError> {
        while let Ok(command) = self.inbox.try_recv() {
            match self.apply(command) {
                Some(Control::Shutdown) | None => {}
                Some(other) => log::warn!("Ignoring {:?} while busy", other),
            }
        }
        if !self.is_running() {
            return Err(AlignmentError::Cancelled);
        }
        Ok(())
    }

    /// Wait for the next control request while no session runs. Keeps the
    /// preview alive while the camera is open.
    pub fn next_control(&mut self) -> Option<Control> {
        loop {
            if self.shutdown {
                return Some(Control::Shutdown);
            }
            if self.frames.is_open() {
                match self.inbox.try_recv() {
                    Ok(command) => {
                        if let Some(control) = self.apply(command) {
                            return Some(control);
                        }
                    }
                    Err(mpsc::error::TryRecvError::Empty) => {
                        self.preview_once();
                        let fps = self.frames.fps().max(1) as u64;
                        std::thread::sleep(Duration::from_millis(1000 / fps));
                    }
                    Err(mpsc::error::TryRecvError::Disconnected) => return None,
                }
            } else {
                let command = self.inbox.blocking_recv()?;
                if let Some(control) = self.apply(command) {
                    return Some(control);
                }
            }
        }
    }

    fn preview_once(&mut self) {
        match self.frames.read() {
            Ok(frame) => {
                let detection = self.vision.analyze(&frame.image);
                let feature = match detection.features.as_slice() {
                    [single] => Some(*single),
                    _ => None,
                };
                self.publish_frame(&frame, &detection, feature);
            }
            Err(e) => {
                log::warn!("Preview read failed: {}", e);
                if let Err(e) = self.frames.recover() {
                    log::warn!("{}", e);
                }
            }
        }
    }

    /// Read a frame, reopening the camera until one arrives.
    pub fn next_frame(&mut self) -> Result<Frame, AlignmentError> {
        loop {
            self.checkpoint()?;
            match self.frames.read() {
                Ok(frame) => return Ok(frame),
                Err(e) => {
                    log::warn!("Frame acquisition failed: {}", e);
                    if let Err(e) = self.frames.recover() {
                        log::warn!("Camera reopen failed: {}", e);
                    }
                }
            }
        }
    }

    /// Run the detection gate on fresh frames until exactly one feature is
    /// found. Empty and ambiguous frames only produce advisories.
    pub fn next_detection(&mut self) -> Result<(Frame, DetectedFeature), AlignmentError> {
        loop {
            let frame = self.next_frame()?;
            let detection = self.vision.analyze(&frame.image);
            match self.gate.check(&detection.features) {
                GateOutcome::Found(feature) => {
                    self.publish_frame(&frame, &detection, Some(feature));
                    return Ok((frame, feature));
                }
                GateOutcome::Empty(advisory) => {
                    self.publish_frame(&frame, &detection, None);
                    if let Some(advisory) = advisory {
                        log::warn!("{}", advisory);
                        self.bus.message(NO_DETECTION_MESSAGE);
                        self.bus
                            .publish(AlignmentEvent::DetectionError(advisory.to_string()));
                    }
                }
                GateOutcome::Ambiguous(advisory) => {
                    self.publish_frame(&frame, &detection, None);
                    log::warn!("{}", advisory);
                    self.bus.message(AMBIGUOUS_MESSAGE);
                }
            }
        }
    }

    /// Averaged position estimate followed by one confirming detection,
    /// paired with the machine position at confirmation time.
    pub fn observe(
        &mut self,
        motion: &mut dyn MotionInterface,
    ) -> Result<Observation, AlignmentError> {
        let mut averager = PositionAverager::new(self.config.alignment.position_samples);
        self.gate.reset();
        loop {
            let (_, feature) = self.next_detection()?;
            if let Some(averaged) = averager.push(feature) {
                let (confirm, _) = self.next_detection()?;
                let machine = motion.position()?;
                return Ok(Observation::new(averaged.center, confirm.geometry(), machine));
            }
        }
    }

    /// Block until the machine reports idle, servicing frames and commands
    /// while waiting.
    pub fn wait_idle(&mut self, motion: &mut dyn MotionInterface) -> Result<(), AlignmentError> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.alignment.idle_timeout_ms);
        let poll = Duration::from_millis(self.config.alignment.idle_poll_ms);
        loop {
            self.checkpoint()?;
            if motion.is_idle()? {
                return Ok(());
            }
            if started.elapsed() > timeout {
                return Err(MotionError::Timeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                }
                .into());
            }
            if self.frames.is_open() {
                self.preview_once();
            }
            std::thread::sleep(poll);
        }
    }

    /// Best-effort idle wait used while unwinding. Ignores the running flag.
    pub fn settle(&self, motion: &mut dyn MotionInterface) -> Result<(), MotionError> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.alignment.idle_timeout_ms);
        let poll = Duration::from_millis(self.config.alignment.idle_poll_ms);
        while !motion.is_idle()? {
            if started.elapsed() > timeout {
                return Err(MotionError::Timeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            std::thread::sleep(poll);
        }
        Ok(())
    }

    /// Publish a preview frame with the active overlays. Skipped when nobody
    /// is subscribed.
    pub fn publish_frame(
        &self,
        frame: &Frame,
        detection: &Detection,
        feature: Option<DetectedFeature>,
    ) {
        if self.bus.subscriber_count() == 0 {
            return;
        }
        let mut image = if self.display.xray {
            overlay::gray_to_rgb(&detection.binary)
        } else {
            frame.image.clone()
        };
        if self.display.crosshair {
            overlay::draw_crosshair(&mut image);
        }
        if let Some(f) = &feature {
            overlay::draw_feature(&mut image, f);
        }
        self.bus.publish(AlignmentEvent::Frame(Arc::new(PreviewFrame {
            sequence: frame.sequence,
            timestamp_us: frame.timestamp_us,
            image,
            feature,
            readout: feature.as_ref().map(overlay::readout),
        })));
    }

    /// Continuous detection without motion, until stopped.
    pub fn run_preview_detection(&mut self) -> Result<(), AlignmentError> {
        self.bus.status(SEARCHING_MESSAGE);
        self.gate.reset();
        loop {
            self.next_detection()?;
        }
    }
}
