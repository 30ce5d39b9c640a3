//! Final mix: per-channel pan and output level, master volume, PCM encoding.

use serde::{Deserialize, Serialize};

use crate::opm::CHANNELS;

/// Highest master volume.
pub const MAX_VOLUME: u8 = 127;

const CENTRE: u8 = 64;

/// PCM layout of rendered bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Interleaved 16-bit little endian, left first.
    #[default]
    Stereo16,
    /// 16-bit little endian, left and right averaged.
    Mono16,
    /// Interleaved unsigned 8-bit.
    Stereo8,
    /// Unsigned 8-bit, left and right averaged.
    Mono8,
}

impl OutputFormat {
    /// Bytes per output frame.
    pub fn bytes_per_frame(self) -> usize {
        match self {
            OutputFormat::Stereo16 => 4,
            OutputFormat::Mono16 | OutputFormat::Stereo8 => 2,
            OutputFormat::Mono8 => 1,
        }
    }

    /// Number of interleaved channels.
    pub fn channels(self) -> u16 {
        match self {
            OutputFormat::Stereo16 | OutputFormat::Stereo8 => 2,
            OutputFormat::Mono16 | OutputFormat::Mono8 => 1,
        }
    }

    /// Bits per sample.
    pub fn bits(self) -> u16 {
        match self {
            OutputFormat::Stereo16 | OutputFormat::Mono16 => 16,
            OutputFormat::Stereo8 | OutputFormat::Mono8 => 8,
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stereo16" => Ok(OutputFormat::Stereo16),
            "mono16" => Ok(OutputFormat::Mono16),
            "stereo8" => Ok(OutputFormat::Stereo8),
            "mono8" => Ok(OutputFormat::Mono8),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// Sums chip channels into one stereo frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mixer {
    master_volume: u8,
    pan: [u8; CHANNELS],
    level: [u8; CHANNELS],
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new(MAX_VOLUME)
    }
}

impl Mixer {
    /// Centred, full level mixer.
    pub fn new(master_volume: u8) -> Self {
        Self {
            master_volume: master_volume.min(MAX_VOLUME),
            pan: [CENTRE; CHANNELS],
            level: [MAX_VOLUME; CHANNELS],
        }
    }

    /// Master volume.
    pub fn master_volume(&self) -> u8 {
        self.master_volume
    }

    /// Set master volume, clamped to [`MAX_VOLUME`].
    pub fn set_master_volume(&mut self, volume: u8) {
        self.master_volume = volume.min(MAX_VOLUME);
    }

    /// Pan and output level for physical channel `ch`.
    pub fn set_channel(&mut self, ch: usize, pan: u8, level: u8) {
        if ch < CHANNELS {
            self.pan[ch] = pan.min(127);
            self.level[ch] = level.min(127);
        }
    }

    /// Pan of physical channel `ch`.
    pub fn pan(&self, ch: usize) -> u8 {
        self.pan[ch]
    }

    /// Mix one frame of per-channel output.
    pub fn mix(&self, channels: &[(i32, i32); CHANNELS]) -> (i32, i32) {
        let mut left = 0i64;
        let mut right = 0i64;
        for (ch, &(l, r)) in channels.iter().enumerate() {
            let pan = self.pan[ch] as i64;
            let level = self.level[ch] as i64;
            let lw = (127 - pan).min(CENTRE as i64);
            let rw = pan.min(CENTRE as i64);
            left += l as i64 * lw * level / (CENTRE as i64 * 127);
            right += r as i64 * rw * level / (CENTRE as i64 * 127);
        }
        let master = self.master_volume as i64;
        let clamp = |x: i64| (x * master / 127).clamp(i16::MIN as i64, i16::MAX as i64) as i32;
        (clamp(left), clamp(right))
    }
}

/// Append one frame in `format`.
pub fn encode(frame: (i32, i32), format: OutputFormat, out: &mut Vec<u8>) {
    let (l, r) = frame;
    let mono = (l + r) / 2;
    let to_u8 = |x: i32| ((x + 32768) >> 8) as u8;
    match format {
        OutputFormat::Stereo16 => {
            out.extend_from_slice(&(l as i16).to_le_bytes());
            out.extend_from_slice(&(r as i16).to_le_bytes());
        }
        OutputFormat::Mono16 => out.extend_from_slice(&(mono as i16).to_le_bytes()),
        OutputFormat::Stereo8 => {
            out.push(to_u8(l));
            out.push(to_u8(r));
        }
        OutputFormat::Mono8 => out.push(to_u8(mono)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_channel(ch: usize, value: i32) -> [(i32, i32); CHANNELS] {
        let mut frame = [(0, 0); CHANNELS];
        frame[ch] = (value, value);
        frame
    }

    #[test]
    fn test_centre_pan_passes_both_sides() {
        let mixer = Mixer::default();
        // Left tops out at 63/64 of full scale.
        assert_eq!(mixer.mix(&one_channel(0, 1000)), (984, 1000));
    }

    #[test]
    fn test_hard_pan() {
        let mut mixer = Mixer::default();
        mixer.set_channel(1, 0, 127);
        assert_eq!(mixer.mix(&one_channel(1, 1000)), (1000, 0));
        mixer.set_channel(1, 127, 127);
        assert_eq!(mixer.mix(&one_channel(1, 1000)), (0, 1000));
    }

    #[test]
    fn test_levels_scale_and_clamp() {
        let mut mixer = Mixer::new(0);
        assert_eq!(mixer.mix(&one_channel(0, 8000)), (0, 0));
        mixer.set_master_volume(200);
        assert_eq!(mixer.master_volume(), MAX_VOLUME);
        mixer.set_channel(0, 64, 0);
        assert_eq!(mixer.mix(&one_channel(0, 8000)), (0, 0));

        let mixer = Mixer::default();
        let loud = [(20_000, -20_000); CHANNELS];
        assert_eq!(mixer.mix(&loud), (32767, -32768));
    }

    #[test]
    fn test_encode_formats() {
        let mut out = Vec::new();
        encode((1, -1), OutputFormat::Stereo16, &mut out);
        assert_eq!(out, vec![1, 0, 0xFF, 0xFF]);

        out.clear();
        encode((100, 300), OutputFormat::Mono16, &mut out);
        assert_eq!(out, 200i16.to_le_bytes().to_vec());

        out.clear();
        encode((0, -32768), OutputFormat::Stereo8, &mut out);
        assert_eq!(out, vec![0x80, 0x00]);

        out.clear();
        encode((32767, 32767), OutputFormat::Mono8, &mut out);
        assert_eq!(out, vec![0xFF]);

        for f in [
            OutputFormat::Stereo16,
            OutputFormat::Mono16,
            OutputFormat::Stereo8,
            OutputFormat::Mono8,
        ] {
            let mut out = Vec::new();
            encode((0, 0), f, &mut out);
            assert_eq!(out.len(), f.bytes_per_frame());
        }
        assert_eq!("Mono8".parse::<OutputFormat>(), Ok(OutputFormat::Mono8));
        assert!("surround".parse::<OutputFormat>().is_err());
    }
}
