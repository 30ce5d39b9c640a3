//! WAV output for rendered PCM, with trailing silence detection.

use std::io::{Cursor, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use hound::{WavSpec, WavWriter};

use crate::mixer::OutputFormat;

fn spec(format: OutputFormat, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: format.channels(),
        sample_rate,
        bits_per_sample: format.bits(),
        sample_format: hound::SampleFormat::Int,
    }
}

/// Write PCM bytes in `format` as samples. Returns the largest absolute
/// sample seen, scaled to 16 bits.
fn write_pcm<W: Write + Seek>(
    writer: &mut WavWriter<W>,
    format: OutputFormat,
    bytes: &[u8],
) -> Result<i32> {
    let mut peak = 0i32;
    match format.bits() {
        16 => {
            for pair in bytes.chunks_exact(2) {
                let sample = i16::from_le_bytes([pair[0], pair[1]]);
                writer
                    .write_sample(sample)
                    .map_err(|e| anyhow!("Failed to write WAV sample: {}", e))?;
                peak = peak.max((sample as i32).abs());
            }
        }
        _ => {
            for &byte in bytes {
                // hound takes signed 8-bit and stores it offset by 128.
                let sample = (byte as i16 - 128) as i8;
                writer
                    .write_sample(sample)
                    .map_err(|e| anyhow!("Failed to write WAV sample: {}", e))?;
                peak = peak.max((sample as i32).abs() << 8);
            }
        }
    }
    Ok(peak)
}

/// WAV file writer with silence detection.
pub struct WavOutput {
    writer: Option<WavWriter<std::io::BufWriter<std::fs::File>>>,
    format: OutputFormat,
    sample_rate: u32,
    silent_frames: usize,
    silence_threshold_frames: usize,
    silence_amplitude: i32,
}

impl WavOutput {
    /// Create a new WAV file.
    ///
    /// # Arguments
    /// * `path` - Output file
    /// * `sample_rate` - Sample rate in Hz
    /// * `format` - Layout of the PCM passed to [`WavOutput::write_pcm`]
    /// * `silence_duration_us` - Quiet time after which writes report silence
    pub fn create(
        path: &Path,
        sample_rate: u32,
        format: OutputFormat,
        silence_duration_us: u32,
    ) -> Result<Self> {
        let writer = WavWriter::create(path, spec(format, sample_rate))
            .with_context(|| format!("Failed to create WAV file '{}'", path.display()))?;

        let silence_threshold_frames =
            ((silence_duration_us as u64 * sample_rate as u64) / 1_000_000) as usize;

        Ok(Self {
            writer: Some(writer),
            format,
            sample_rate,
            silent_frames: 0,
            silence_threshold_frames,
            // One 8-bit step, so 8-bit output can still go quiet.
            silence_amplitude: 256,
        })
    }

    /// Append PCM bytes.
    ///
    /// Returns `true` once the output has been quiet for the silence
    /// duration.
    pub fn write_pcm(&mut self, bytes: &[u8]) -> Result<bool> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| anyhow!("WAV writer is closed"))?;

        let frame_len = self.format.bytes_per_frame();
        for frame in bytes.chunks_exact(frame_len) {
            let peak = write_pcm(writer, self.format, frame)?;
            if peak <= self.silence_amplitude {
                self.silent_frames += 1;
            } else {
                self.silent_frames = 0;
            }
        }
        Ok(self.silent_frames >= self.silence_threshold_frames)
    }

    /// Finalize and close the file.
    pub fn finalize(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| anyhow!("Failed to finalize WAV file: {}", e))?;
        }
        Ok(())
    }

    /// Sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Quiet frames needed before silence is reported.
    pub fn silence_threshold_frames(&self) -> usize {
        self.silence_threshold_frames
    }

    /// Consecutive quiet frames written so far.
    pub fn silent_frames(&self) -> usize {
        self.silent_frames
    }
}

impl Drop for WavOutput {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.finalize();
        }
    }
}

/// Wrap PCM bytes in an in-memory WAV file.
pub fn wav_bytes(format: OutputFormat, sample_rate: u32, pcm: &[u8]) -> Result<Vec<u8>> {
    let mut wav = Vec::new();
    let mut cursor = Cursor::new(&mut wav);
    let mut writer = WavWriter::new(&mut cursor, spec(format, sample_rate))
        .map_err(|e| anyhow!("Failed to start WAV stream: {}", e))?;
    write_pcm(&mut writer, format, pcm)?;
    writer
        .finalize()
        .map_err(|e| anyhow!("Failed to finalize WAV stream: {}", e))?;
    Ok(wav)
}
