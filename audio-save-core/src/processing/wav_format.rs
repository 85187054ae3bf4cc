//! RIFF/WAVE header handling for persisted streams.
//!
//! Files are written with a placeholder header when they are opened and the
//! size fields are corrected once the stream is finalized.

use crate::models::audio_format::AudioFormat;
use crate::models::error::SaveError;

/// Size of the canonical PCM WAV header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Offset of the RIFF chunk size (`file_size - 8`).
pub const RIFF_SIZE_OFFSET: u64 = 4;

/// Offset of the `data` chunk length.
pub const DATA_SIZE_OFFSET: u64 = 40;

const FMT_CHUNK_LEN: u32 = 16;
const PCM_FORMAT_TAG: u16 = 1;

/// Build a 44-byte header for `data_size` bytes of PCM in `format`.
///
/// Layout (little-endian):
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16
/// [20-21]  1 (PCM)
/// [22-23]  channels
/// [24-27]  samples per second
/// [28-31]  average bytes per second
/// [32-33]  block align
/// [34-35]  bits per sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
///
/// Sizes beyond the 32-bit RIFF limit are clamped.
pub fn generate_wav_header(format: &AudioFormat, data_size: u64) -> [u8; WAV_HEADER_SIZE] {
    let data_len = clamp_u32(data_size);
    let riff_len = clamp_u32(data_size + WAV_HEADER_SIZE as u64 - 8);

    let mut header = [0u8; WAV_HEADER_SIZE];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_len.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&FMT_CHUNK_LEN.to_le_bytes());
    header[20..22].copy_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels().to_le_bytes());
    header[24..28].copy_from_slice(&format.samples_per_sec().to_le_bytes());
    header[28..32].copy_from_slice(&format.avg_bytes_per_sec().to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align().to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample().to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Parse a canonical header back into its format and declared data length.
pub fn parse_wav_header(header: &[u8]) -> Result<(AudioFormat, u32), SaveError> {
    if header.len() < WAV_HEADER_SIZE {
        return Err(SaveError::StorageError(format!(
            "WAV header truncated: {} bytes",
            header.len()
        )));
    }
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" || &header[12..16] != b"fmt " {
        return Err(SaveError::StorageError("not a RIFF/WAVE file".into()));
    }
    if u16_at(header, 20) != PCM_FORMAT_TAG {
        return Err(SaveError::StorageError("WAV file is not PCM".into()));
    }
    if &header[36..40] != b"data" {
        return Err(SaveError::StorageError("unexpected chunk after fmt".into()));
    }

    let format = AudioFormat::from_fields(
        u16_at(header, 22),
        u16_at(header, 34),
        u32_at(header, 24),
        u32_at(header, 28),
    );
    format
        .validate()
        .map_err(|e| SaveError::StorageError(format!("WAV header declares an invalid format: {}", e)))?;
    Ok((format, u32_at(header, 40)))
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn u32_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_magic_and_size() {
        let header = generate_wav_header(&AudioFormat::default(), 0);
        assert_eq!(header.len(), 44);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn header_48khz_stereo_16bit() {
        let header = generate_wav_header(&AudioFormat::pcm(2, 16, 48000), 9600);

        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u32_at(&header, 16), 16);
        assert_eq!(u16_at(&header, 22), 2);
        assert_eq!(u32_at(&header, 24), 48000);
        assert_eq!(u32_at(&header, 28), 192000);
        assert_eq!(u16_at(&header, 32), 4);
        assert_eq!(u16_at(&header, 34), 16);
        assert_eq!(u32_at(&header, 40), 9600);
        assert_eq!(u32_at(&header, 4), 36 + 9600);
    }

    #[test]
    fn byte_rate_is_taken_from_format() {
        let format = AudioFormat::pcm(1, 16, 16000).with_avg_bytes_per_sec(31999);
        let header = generate_wav_header(&format, 0);
        assert_eq!(u32_at(&header, 28), 31999);
    }

    #[test]
    fn oversized_data_is_clamped() {
        let header = generate_wav_header(&AudioFormat::default(), u64::from(u32::MAX) + 10);
        assert_eq!(u32_at(&header, 40), u32::MAX);
        assert_eq!(u32_at(&header, 4), u32::MAX);
    }

    #[test]
    fn parse_reads_back_generated_header() {
        let format = AudioFormat::pcm(1, 24, 96000);
        let (parsed, data_len) = parse_wav_header(&generate_wav_header(&format, 300)).unwrap();
        assert_eq!(parsed, format);
        assert_eq!(data_len, 300);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_wav_header(&[0u8; 10]).is_err());
        assert!(parse_wav_header(&[0u8; 44]).is_err());
    }

    #[test]
    fn parse_rejects_impossible_format() {
        let mut header = generate_wav_header(&AudioFormat::default(), 0);
        header[22..24].copy_from_slice(&u16::MAX.to_le_bytes());
        header[24..28].copy_from_slice(&u32::MAX.to_le_bytes());

        let err = parse_wav_header(&header).unwrap_err();
        assert!(matches!(err, SaveError::StorageError(_)));
    }

    #[test]
    fn parse_keeps_declared_byte_rate() {
        let mut header = generate_wav_header(&AudioFormat::pcm(2, 16, 44100), 0);
        header[28..32].copy_from_slice(&176_000u32.to_le_bytes());

        let (parsed, _) = parse_wav_header(&header).unwrap();
        assert_eq!(parsed.avg_bytes_per_sec(), 176_000);
        assert_eq!(parsed.samples_per_sec(), 44100);
    }
}
