//! Dedicated worker thread that owns the camera and the motion interface.
//!
//! Front ends hold a [`WorkerHandle`]: commands go in over an unbounded
//! channel, events come back on the broadcast [`EventBus`].

use super::session::Aligner;
use super::station::{Control, Station};
use crate::camera::{CameraDevice, CameraProperty, FrameSource};
use crate::config::{AlignConfig, DetectorConfig};
use crate::events::{AlignmentEvent, EventBus};
use crate::motion::MotionInterface;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{broadcast, mpsc};

/// Requests accepted by the worker. Applied at the next safe point.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerCommand {
    StartAlignment,
    StartDetection,
    Stop,
    SetDetector(DetectorConfig),
    ToggleLoose,
    ToggleInvert,
    ToggleXray,
    ToggleCrosshair,
    SetCameraProperty(CameraProperty, f64),
    ResetCameraProperties,
    ChangeSource(String),
    Shutdown,
}

pub struct AlignmentWorker;

impl AlignmentWorker {
    /// Start the worker thread. The camera is opened immediately so the
    /// preview runs before any session starts.
    pub fn spawn(
        config: AlignConfig,
        camera: Box<dyn CameraDevice>,
        motion: Box<dyn MotionInterface>,
    ) -> std::io::Result<WorkerHandle> {
        let (sender, inbox) = mpsc::unbounded_channel();
        let bus = EventBus::new();
        let running = Arc::new(AtomicBool::new(false));

        let frames = FrameSource::new(camera, config.camera.clone());
        let station = Station::new(frames, config, bus.clone(), inbox, running.clone());
        let mut aligner = Aligner::new(station, motion);

        let thread = std::thread::Builder::new()
            .name("crabalign-worker".to_string())
            .spawn(move || {
                aligner.station_mut().open_camera();
                log::info!("Alignment worker started");
                while let Some(control) = aligner.station_mut().next_control() {
                    match control {
                        Control::StartAlignment => {
                            if let Err(e) = aligner.run_session() {
                                log::error!("{}", e);
                                // The camera is released on abort; bring the preview back.
                                aligner.station_mut().open_camera();
                            }
                        }
                        Control::StartDetection => {
                            if let Err(e) = aligner.run_detection() {
                                log::error!("Detection failed: {}", e);
                                aligner.station().bus().message(e.to_string());
                            }
                        }
                        Control::Shutdown => break,
                    }
                    if aligner.station().is_shutdown() {
                        break;
                    }
                }
                aligner.station_mut().release_camera();
                log::info!("Alignment worker stopped");
            })?;

        Ok(WorkerHandle {
            sender,
            bus,
            running,
            thread: Some(thread),
        })
    }
}

/// Front-end side of a running worker.
pub struct WorkerHandle {
    sender: mpsc::UnboundedSender<WorkerCommand>,
    bus: EventBus,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<AlignmentEvent> {
        self.bus.subscribe()
    }

    /// Queue a command. Returns false once the worker has exited.
    pub fn send(&self, command: WorkerCommand) -> bool {
        self.sender.send(command).is_ok()
    }

    pub fn start_alignment(&self) -> bool {
        self.send(WorkerCommand::StartAlignment)
    }

    pub fn start_detection(&self) -> bool {
        self.send(WorkerCommand::StartDetection)
    }

    /// Ask the active session or detection run to stop at its next safe
    /// point.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.send(WorkerCommand::Stop);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the worker and wait for its thread to exit.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.send(WorkerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Alignment worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.join();
    }
}
