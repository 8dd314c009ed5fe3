//! Camera acquisition
//!
//! [`CameraDevice`] is the device boundary (native capture, a simulator, a
//! file replay). [`FrameSource`] owns one device on the worker thread and
//! turns it into a stream of timestamped [`Frame`]s. It reopens the device
//! after read failures and manages image properties.

pub mod controls;
#[cfg(feature = "native-camera")]
pub mod native;

pub use controls::{CameraProperty, PropertySet};

use crate::config::CameraConfig;
use crate::errors::CameraError;
use crate::timing::SessionClock;
use crate::types::Frame;
use image::RgbImage;
use std::time::Duration;

/// A camera the worker can open, read and adjust.
pub trait CameraDevice: Send {
    fn open(&mut self, source: &str) -> Result<(), CameraError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn read_frame(&mut self) -> Result<RgbImage, CameraError>;

    fn property(&self, property: CameraProperty) -> Result<f64, CameraError>;

    fn set_property(&mut self, property: CameraProperty, value: f64) -> Result<(), CameraError>;

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CameraError>;

    fn resolution(&self) -> (u32, u32);

    fn fps(&self) -> u32;
}

/// Frame supplier owning the camera device.
pub struct FrameSource {
    device: Box<dyn CameraDevice>,
    config: CameraConfig,
    clock: SessionClock,
    sequence: u64,
    defaults: PropertySet,
}

impl FrameSource {
    pub fn new(device: Box<dyn CameraDevice>, config: CameraConfig) -> Self {
        Self {
            device,
            config,
            clock: SessionClock::new(),
            sequence: 0,
            defaults: PropertySet::default(),
        }
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.device.is_open()
    }

    /// Open the configured source, apply resolution and the configured
    /// properties, and remember the device defaults for a later reset.
    pub fn open(&mut self) -> Result<(), CameraError> {
        if self.device.is_open() {
            return Ok(());
        }
        log::info!("Opening camera source {}", self.config.source);
        self.device.open(&self.config.source)?;

        let [width, height] = self.config.resolution;
        if let Err(e) = self.device.set_resolution(width, height) {
            log::warn!("Could not set resolution {}x{}: {}", width, height, e);
        }

        self.defaults = PropertySet::default();
        for property in CameraProperty::ALL {
            match self.device.property(property) {
                Ok(value) => self.defaults.set(property, value),
                Err(e) => log::debug!("No default for {}: {}", property, e),
            }
        }

        for (property, value) in PropertySet::from_config(&self.config).iter() {
            if let Err(e) = self.device.set_property(property, value) {
                log::warn!("Could not apply {} = {}: {}", property, value, e);
            }
        }

        let (w, h) = self.device.resolution();
        log::info!("Camera open at {}x{} @ {} fps", w, h, self.device.fps());
        Ok(())
    }

    pub fn close(&mut self) {
        if self.device.is_open() {
            log::info!("Releasing camera source {}", self.config.source);
            self.device.close();
        }
    }

    /// Read and stamp one frame. A failed read is returned as is; call
    /// [`FrameSource::recover`] before retrying.
    pub fn read(&mut self) -> Result<Frame, CameraError> {
        if !self.device.is_open() {
            return Err(CameraError::NotOpen);
        }
        let image = self.device.read_frame()?;
        self.sequence += 1;
        Ok(Frame::new(self.sequence, self.clock.timestamp_us(), image))
    }

    /// Close and reopen the device after a read failure, reapplying the
    /// resolution and properties.
    pub fn recover(&mut self) -> Result<(), CameraError> {
        log::warn!("Reopening camera source {}", self.config.source);
        self.device.close();
        std::thread::sleep(Duration::from_millis(self.config.reopen_delay_ms));
        self.open()
    }

    /// Apply a property value. Negative values leave the property untouched
    /// and return `Ok(false)`.
    pub fn set_property(
        &mut self,
        property: CameraProperty,
        value: f64,
    ) -> Result<bool, CameraError> {
        if value < 0.0 {
            log::debug!("Ignoring negative {} value {}", property, value);
            return Ok(false);
        }
        self.device.set_property(property, value)?;
        log::info!("Camera {} set to {}", property, value);
        Ok(true)
    }

    pub fn property(&self, property: CameraProperty) -> Result<f64, CameraError> {
        self.device.property(property)
    }

    /// Restore the values captured when the device was opened.
    pub fn reset_properties(&mut self) -> Result<(), CameraError> {
        for (property, value) in self.defaults.iter() {
            self.device.set_property(property, value)?;
        }
        log::info!("Camera properties reset to defaults");
        Ok(())
    }

    pub fn defaults(&self) -> &PropertySet {
        &self.defaults
    }

    /// Switch to another video source. The old device is released first.
    pub fn change_source(&mut self, source: &str) -> Result<(), CameraError> {
        self.close();
        self.config.source = source.to_string();
        self.open()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.device.resolution()
    }

    pub fn fps(&self) -> u32 {
        self.device.fps()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.close();
    }
}
