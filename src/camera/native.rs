//! Hardware capture through nokhwa (V4L2, MediaFoundation, AVFoundation).

use super::{CameraDevice, CameraProperty};
use crate::errors::CameraError;
use image::RgbImage;
use serde::Serialize;
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraIndex, ControlValueSetter, KnownCameraControl, RequestedFormat,
        RequestedFormatType, Resolution,
    },
    CallbackCamera,
};

/// Camera discovered on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: String,
    pub name: String,
    pub description: String,
}

/// Enumerate capture devices.
pub fn list_devices() -> Result<Vec<DeviceInfo>, CameraError> {
    let cameras = query(ApiBackend::Auto)
        .map_err(|e| CameraError::InitializationError(format!("Failed to query cameras: {}", e)))?;

    Ok(cameras
        .into_iter()
        .map(|info| DeviceInfo {
            index: info.index().to_string(),
            name: info.human_name(),
            description: info.description().to_string(),
        })
        .collect())
}

fn control_for(property: CameraProperty) -> KnownCameraControl {
    match property {
        CameraProperty::Brightness => KnownCameraControl::Brightness,
        CameraProperty::Contrast => KnownCameraControl::Contrast,
        CameraProperty::Saturation => KnownCameraControl::Saturation,
        CameraProperty::Hue => KnownCameraControl::Hue,
    }
}

fn parse_index(source: &str) -> CameraIndex {
    match source.parse::<u32>() {
        Ok(index) => CameraIndex::Index(index),
        Err(_) => CameraIndex::String(source.to_string()),
    }
}

/// A nokhwa-backed [`CameraDevice`].
#[derive(Default)]
pub struct NativeCamera {
    camera: Option<CallbackCamera>,
    resolution: (u32, u32),
    fps: u32,
}

impl NativeCamera {
    pub fn new() -> Self {
        Self::default()
    }

    fn camera_mut(&mut self) -> Result<&mut CallbackCamera, CameraError> {
        self.camera.as_mut().ok_or(CameraError::NotOpen)
    }

    fn refresh_format(&mut self) {
        if let Some(camera) = self.camera.as_mut() {
            if let Ok(res) = camera.resolution() {
                self.resolution = (res.width_x, res.height_y);
            }
            if let Ok(fps) = camera.frame_rate() {
                self.fps = fps;
            }
        }
    }
}

impl CameraDevice for NativeCamera {
    fn open(&mut self, source: &str) -> Result<(), CameraError> {
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = CallbackCamera::new(parse_index(source), requested, |_| {})
            .map_err(|e| {
                CameraError::InitializationError(format!("Failed to initialize camera: {}", e))
            })?;
        camera.open_stream().map_err(|e| {
            CameraError::InitializationError(format!("Failed to start stream: {}", e))
        })?;
        self.camera = Some(camera);
        self.refresh_format();
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_stream() {
                log::warn!("Failed to stop camera stream: {}", e);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.camera.is_some()
    }

    fn read_frame(&mut self) -> Result<RgbImage, CameraError> {
        let camera = self.camera_mut()?;
        let buffer = camera
            .poll_frame()
            .map_err(|e| CameraError::CaptureError(format!("Failed to capture frame: {}", e)))?;
        let (width, height) = (buffer.resolution().width_x, buffer.resolution().height_y);
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraError::CaptureError(format!("Failed to decode frame: {}", e)))?;
        RgbImage::from_raw(width, height, decoded.into_raw())
            .ok_or_else(|| CameraError::CaptureError("Decoded frame has wrong size".to_string()))
    }

    fn property(&self, property: CameraProperty) -> Result<f64, CameraError> {
        let camera = self.camera.as_ref().ok_or(CameraError::NotOpen)?;
        let control = camera
            .camera_control(control_for(property))
            .map_err(|e| CameraError::ControlError(format!("Failed to read {}: {}", property, e)))?;
        match control.value() {
            ControlValueSetter::Integer(v) => Ok(v as f64),
            ControlValueSetter::Float(v) => Ok(v),
            other => Err(CameraError::ControlError(format!(
                "Unexpected {} value: {:?}",
                property, other
            ))),
        }
    }

    fn set_property(&mut self, property: CameraProperty, value: f64) -> Result<(), CameraError> {
        let camera = self.camera_mut()?;
        camera
            .set_camera_control(
                control_for(property),
                ControlValueSetter::Integer(value.round() as i64),
            )
            .map_err(|e| CameraError::ControlError(format!("Failed to set {}: {}", property, e)))
    }

    fn set_resolution(&mut self, width: u32, height: u32) -> Result<(), CameraError> {
        let camera = self.camera_mut()?;
        camera
            .set_resolution(Resolution::new(width, height))
            .map_err(|e| CameraError::ControlError(format!("Failed to set resolution: {}", e)))?;
        self.refresh_format();
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn fps(&self) -> u32 {
        self.fps
    }
}

impl Drop for NativeCamera {
    fn drop(&mut self) {
        self.close();
    }
}
