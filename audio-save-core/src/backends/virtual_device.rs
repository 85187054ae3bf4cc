use std::sync::Arc;

use crate::backends::controls::SinkControls;
use crate::models::audio_format::AudioFormat;
use crate::models::error::SaveError;
use crate::models::recording_result::RecordingSummary;
use crate::models::state::StreamState;
use crate::traits::backend_sink::BackendSink;
use crate::traits::device_handle::{ControlCode, DeviceHandle, DeviceLocator};
use crate::traits::settings_store::SettingsStore;

/// Size of the encoded format record.
pub const FORMAT_RECORD_SIZE: usize = 12;

/// Stream direction announced when the device is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDirection {
    Playback,
    Record,
}

impl DeviceDirection {
    fn record(self) -> [u8; 4] {
        let raw: u32 = match self {
            Self::Playback => 0,
            Self::Record => 1,
        };
        raw.to_le_bytes()
    }
}

/// `{ u16 channels, u16 bits, u32 samples/s, u32 bytes/s }`, little-endian.
pub fn encode_format(format: &AudioFormat) -> [u8; FORMAT_RECORD_SIZE] {
    let mut record = [0u8; FORMAT_RECORD_SIZE];
    record[0..2].copy_from_slice(&format.channels().to_le_bytes());
    record[2..4].copy_from_slice(&format.bits_per_sample().to_le_bytes());
    record[4..8].copy_from_slice(&format.samples_per_sec().to_le_bytes());
    record[8..12].copy_from_slice(&format.avg_bytes_per_sec().to_le_bytes());
    record
}

/// Device booleans are 4 bytes wide.
fn encode_bool(value: bool) -> [u8; 4] {
    u32::from(value).to_le_bytes()
}

/// Forwards the stream to a companion virtual audio device.
///
/// The device is looked up once per `initialize`. When none is installed
/// every call succeeds without doing anything, so the backend can stay
/// registered on machines without the device.
pub struct VirtualDeviceBackend {
    name: String,
    locator: Box<dyn DeviceLocator>,
    device: Option<Box<dyn DeviceHandle>>,
    direction: DeviceDirection,
    format: Option<AudioFormat>,
    enabled: bool,
    open: bool,
    controls: SinkControls,
}

impl VirtualDeviceBackend {
    pub fn new(locator: Box<dyn DeviceLocator>) -> Self {
        Self {
            name: "device".to_string(),
            locator,
            device: None,
            direction: DeviceDirection::Playback,
            format: None,
            enabled: true,
            open: false,
            controls: SinkControls::new("device"),
        }
    }

    pub fn with_settings(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.controls.set_store(store);
        self
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    fn send(&mut self, code: ControlCode, input: &[u8]) -> Result<(), SaveError> {
        match self.device.as_mut() {
            Some(device) => device.control(code, input),
            None => Ok(()),
        }
    }
}

impl BackendSink for VirtualDeviceBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, _stream_id: u32, is_capture: bool) -> Result<(), SaveError> {
        self.direction = if is_capture {
            DeviceDirection::Record
        } else {
            DeviceDirection::Playback
        };
        self.device = self.locator.locate();
        if self.device.is_none() {
            log::debug!("{}: no virtual device present, backend inactive", self.name);
            return Ok(());
        }

        let direction = self.direction.record();
        self.send(ControlCode::DeviceTypeOpen, &direction)
            .map_err(|e| SaveError::BackendInit {
                backend: self.name.clone(),
                reason: e.to_string(),
            })
    }

    fn set_format(&mut self, format: &AudioFormat) -> Result<(), SaveError> {
        self.format = Some(*format);
        self.send(ControlCode::SetFormat, &encode_format(format))
    }

    fn set_state(&mut self, state: StreamState) -> Result<(), SaveError> {
        self.send(ControlCode::SetState, &state.as_raw().to_le_bytes())
    }

    fn disable(&mut self, disabled: bool) -> Result<(), SaveError> {
        self.enabled = !disabled;
        self.send(ControlCode::SetDisable, &encode_bool(disabled))
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self, _overwrite: bool) -> Result<(), SaveError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SaveError> {
        self.send(ControlCode::SendData, bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SaveError> {
        match self.device.as_mut() {
            Some(device) => device.query(ControlCode::GetData, buf),
            None => Ok(0),
        }
    }

    fn finalize(&mut self) -> Result<Option<RecordingSummary>, SaveError> {
        self.close();
        let direction = self.direction.record();
        self.send(ControlCode::DeviceTypeClose, &direction)?;
        self.device = None;
        Ok(None)
    }

    fn controls(&mut self) -> &mut SinkControls {
        &mut self.controls
    }

    fn set_volume(&mut self, channel: u32, volume: i32) -> Result<(), SaveError> {
        self.controls.set_volume(channel, volume)?;
        self.send(ControlCode::SetVolume, &volume.to_le_bytes())
    }

    fn set_mute(&mut self, mute: bool) -> Result<(), SaveError> {
        self.controls.set_mute(mute)?;
        self.send(ControlCode::SetMute, &encode_bool(mute))
    }

    /// Asks the device when present, otherwise answers from the stored value.
    fn get_mute(&mut self) -> bool {
        if let Some(device) = self.device.as_mut() {
            let mut record = [0u8; 4];
            match device.query(ControlCode::GetMute, &mut record) {
                Ok(4) => return u32::from_le_bytes(record) != 0,
                Ok(n) => log::warn!("{}: short mute record ({} bytes)", self.name, n),
                Err(e) => log::warn!("{}: mute query failed: {}", self.name, e),
            }
        }
        self.controls.muted()
    }
}
