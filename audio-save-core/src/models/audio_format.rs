use serde::{Deserialize, Serialize};

use super::error::SaveError;

/// PCM stream format shared by the engine and every backend.
///
/// Immutable once built. Changing the format of a running stream means
/// handing a new value to `SaveEngine::set_format`, which re-propagates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    channels: u16,
    bits_per_sample: u16,
    samples_per_sec: u32,
    avg_bytes_per_sec: u32,
}

impl AudioFormat {
    /// Integer PCM format; the byte rate is derived from the frame size.
    /// A rate that does not fit saturates and fails `validate`.
    pub fn pcm(channels: u16, bits_per_sample: u16, samples_per_sec: u32) -> Self {
        let frame = frame_bytes(channels, bits_per_sample);
        Self {
            channels,
            bits_per_sample,
            samples_per_sec,
            avg_bytes_per_sec: samples_per_sec.saturating_mul(frame),
        }
    }

    /// Format exactly as declared by a header or device, nothing derived.
    pub fn from_fields(channels: u16, bits_per_sample: u16, samples_per_sec: u32, avg_bytes_per_sec: u32) -> Self {
        Self {
            channels,
            bits_per_sample,
            samples_per_sec,
            avg_bytes_per_sec,
        }
    }

    /// Same format with an explicit byte rate, as reported by a device.
    pub fn with_avg_bytes_per_sec(self, avg_bytes_per_sec: u32) -> Self {
        Self {
            avg_bytes_per_sec,
            ..self
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn samples_per_sec(&self) -> u32 {
        self.samples_per_sec
    }

    pub fn avg_bytes_per_sec(&self) -> u32 {
        self.avg_bytes_per_sec
    }

    /// Bytes per interleaved frame.
    pub fn block_align(&self) -> u16 {
        u16::try_from(frame_bytes(self.channels, self.bits_per_sample)).unwrap_or(u16::MAX)
    }

    /// Bytes handed to the backends per delivery: 10 ms of audio, never
    /// less than one frame.
    pub fn transfer_chunk_size(&self) -> usize {
        let ten_ms = (self.avg_bytes_per_sec / 100) as usize;
        ten_ms.max(self.block_align().max(1) as usize)
    }

    pub fn validate(&self) -> Result<(), SaveError> {
        if self.channels == 0 {
            return Err(SaveError::InvalidFormat("channel count must be positive".into()));
        }
        if ![8, 16, 24, 32].contains(&self.bits_per_sample) {
            return Err(SaveError::InvalidFormat(format!(
                "unsupported bit depth: {}",
                self.bits_per_sample
            )));
        }
        if self.samples_per_sec == 0 {
            return Err(SaveError::InvalidFormat("sample rate must be positive".into()));
        }
        if self.avg_bytes_per_sec == 0 {
            return Err(SaveError::InvalidFormat("byte rate must be positive".into()));
        }
        let frame = frame_bytes(self.channels, self.bits_per_sample);
        if u16::try_from(frame).is_err() {
            return Err(SaveError::InvalidFormat(format!("frame of {} bytes is too large", frame)));
        }
        if self.samples_per_sec.checked_mul(frame).is_none() {
            return Err(SaveError::InvalidFormat(format!(
                "{} Hz with {} byte frames overflows the byte rate",
                self.samples_per_sec, frame
            )));
        }
        Ok(())
    }
}

/// Bytes per frame. Cannot overflow: 65535 * 65535 < 2^32.
fn frame_bytes(channels: u16, bits_per_sample: u16) -> u32 {
    u32::from(channels) * u32::from(bits_per_sample) / 8
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm(2, 16, 48000)
    }
}
