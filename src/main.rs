use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};

use fb01emu::midi::{MidiEvent, MidiStreamParser};
use fb01emu::mixer::OutputFormat;
use fb01emu::voice::{VoiceData, VOICES_PER_BANK};
use fb01emu::voice_file::{format_voice_file, load_voice_file};
use fb01emu::wav::WavOutput;
use fb01emu::{EngineConfig, Fb01Synth};

/// Frames rendered per block.
const BLOCK_FRAMES: usize = 1024;

/// Longest tail rendered after the last event.
const MAX_TAIL: Duration = Duration::from_secs(10);

/// Quiet time that ends a tail early.
const SILENCE_US: u32 = 500_000;

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
    let ms: u64 = s.parse()?;
    Ok(Duration::from_millis(ms))
}

/// Render audio from an emulated FB-01 / IBM Music Feature Card
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output sample rate in Hz
    #[arg(long, global = true)]
    sample_rate: Option<u32>,

    /// Output format: stereo16, mono16, stereo8 or mono8
    #[arg(long, global = true)]
    format: Option<OutputFormat>,

    /// Voice parameter file loaded over the built-in tones
    #[arg(long, global = true)]
    voice_file: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List tone names
    Voices {
        /// Also write every tone to this file in voice file format
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Render a single note
    Note {
        /// Output WAV file
        out: PathBuf,

        /// Program number (tone 0-127)
        #[arg(long, default_value_t = 0)]
        program: u8,

        /// MIDI note
        #[arg(long, default_value_t = 69)]
        note: u8,

        /// Note velocity
        #[arg(long, default_value_t = 100)]
        velocity: u8,

        /// Key on duration in milliseconds
        #[arg(long, default_value = "1000", value_parser = parse_duration)]
        duration: Duration,

        /// Time rendered after key off in milliseconds
        #[arg(long, default_value = "500", value_parser = parse_duration)]
        release: Duration,
    },
    /// Render a raw MIDI byte stream
    Play {
        /// File of raw MIDI bytes (not a standard MIDI file)
        input: PathBuf,

        /// Output WAV file
        out: PathBuf,

        /// Time between consecutive events in milliseconds
        #[arg(long, default_value = "10", value_parser = parse_duration)]
        event_spacing: Duration,

        /// SysEx files sent before playback
        #[arg(long = "syx")]
        syx: Vec<PathBuf>,
    },
    /// Write a voice bank dump
    DumpBank {
        /// Bank number (0-6)
        bank: u8,

        /// Output .syx file
        out: PathBuf,
    },
}

fn settings(common: &CommonArgs) -> Result<EngineConfig> {
    let mut settings = match &common.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(rate) = common.sample_rate {
        settings.sample_rate = rate;
    }
    if let Some(format) = common.format {
        settings.output_format = format;
    }
    if let Some(path) = &common.voice_file {
        settings.voice_file = Some(path.clone());
    }
    settings.validate().context("Invalid engine settings")?;
    Ok(settings)
}

fn frames(duration: Duration, sample_rate: u32) -> u64 {
    duration.as_micros() as u64 * sample_rate as u64 / 1_000_000
}

/// Render `count` frames into the WAV file. Returns true if the output was
/// silent for the whole silence window at the end.
fn render(synth: &mut Fb01Synth, wav: &mut WavOutput, count: u64) -> Result<bool> {
    let mut left = count;
    let mut silent = false;
    let mut buf = Vec::new();
    while left > 0 {
        let n = left.min(BLOCK_FRAMES as u64);
        buf.clear();
        synth.render_bytes(n as usize, &mut buf);
        silent = wav.write_pcm(&buf)?;
        left -= n;
    }
    Ok(silent)
}

/// Render until the engine goes quiet or [`MAX_TAIL`] passes.
fn render_tail(synth: &mut Fb01Synth, wav: &mut WavOutput) -> Result<()> {
    let limit = synth.render_position() + frames(MAX_TAIL, synth.settings().sample_rate);
    while synth.render_position() < limit {
        let silent = render(synth, wav, BLOCK_FRAMES as u64)?;
        if silent && !synth.is_active() {
            break;
        }
    }
    Ok(())
}

fn create_wav(path: &Path, settings: &EngineConfig) -> Result<WavOutput> {
    WavOutput::create(
        path,
        settings.sample_rate,
        settings.output_format,
        SILENCE_US,
    )
}

fn list_voices(settings: &EngineConfig, export: Option<&Path>) -> Result<()> {
    let mut tones = VoiceData::default_tones();
    if let Some(path) = &settings.voice_file {
        let file = load_voice_file(path)
            .with_context(|| format!("Failed to read voice file '{}'", path.display()))?;
        file.apply(&mut tones);
    }
    for (i, voice) in tones.iter().enumerate() {
        println!(
            "{}:{:02} {:3} {}",
            i / VOICES_PER_BANK,
            i % VOICES_PER_BANK,
            i,
            voice.name
        );
    }
    if let Some(path) = export {
        let voices: Vec<(usize, VoiceData)> = tones.into_iter().enumerate().collect();
        std::fs::write(path, format_voice_file(&voices))
            .with_context(|| format!("Failed to write voice file '{}'", path.display()))?;
        info!("Exported {} tones to {}", voices.len(), path.display());
    }
    Ok(())
}

fn note(
    settings: EngineConfig,
    out: &Path,
    program: u8,
    note: u8,
    velocity: u8,
    duration: Duration,
    release: Duration,
) -> Result<()> {
    if note > 127 || velocity > 127 || program > 127 {
        bail!("program, note and velocity must be <= 127");
    }
    let rate = settings.sample_rate;
    let mut wav = create_wav(out, &settings)?;
    let mut synth = Fb01Synth::new(settings).context("Failed to start engine")?;

    synth.apply_event(&MidiEvent::ProgramChange {
        channel: 0,
        program,
    });
    synth.queue_event(
        MidiEvent::NoteOn {
            channel: 0,
            note,
            velocity,
        },
        None,
    )?;
    render(&mut synth, &mut wav, frames(duration, rate))?;
    synth.queue_event(
        MidiEvent::NoteOff {
            channel: 0,
            note,
            velocity: 0,
        },
        None,
    )?;
    render(&mut synth, &mut wav, frames(release, rate))?;
    wav.finalize()?;
    info!("wrote {}", out.display());
    Ok(())
}

fn play(
    settings: EngineConfig,
    input: &Path,
    out: &Path,
    spacing: Duration,
    syx: &[PathBuf],
) -> Result<()> {
    let bytes = std::fs::read(input)
        .with_context(|| format!("Failed to read MIDI bytes '{}'", input.display()))?;
    let rate = settings.sample_rate;
    let mut wav = create_wav(out, &settings)?;
    let mut synth = Fb01Synth::new(settings).context("Failed to start engine")?;

    for path in syx {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read SysEx file '{}'", path.display()))?;
        let mut parser = MidiStreamParser::default();
        for event in parser.push_slice(&data) {
            if let MidiEvent::SysEx(message) = event {
                synth
                    .play_sysex(&message)
                    .with_context(|| format!("Bad SysEx in '{}'", path.display()))?;
            }
        }
        debug!("loaded {}", path.display());
    }

    let mut parser = MidiStreamParser::default();
    let events = parser.push_slice(&bytes);
    info!("playing {} events", events.len());
    let step = frames(spacing, rate);
    for event in events {
        synth.queue_event(event, None)?;
        render(&mut synth, &mut wav, step)?;
    }
    render_tail(&mut synth, &mut wav)?;
    wav.finalize()?;
    info!("wrote {}", out.display());
    Ok(())
}

fn dump_bank(settings: EngineConfig, bank: u8, out: &Path) -> Result<()> {
    let system_channel = settings.system_channel;
    let mut synth = Fb01Synth::new(settings).context("Failed to start engine")?;
    let (tx, rx) = mpsc::channel();
    synth.set_midi_out(move |message: &[u8]| {
        let _ = tx.send(message.to_vec());
    });
    synth.play_sysex(&[0xF0, 0x43, 0x75, system_channel, 0x20, 0x00, bank, 0xF7])?;

    let Ok(dump) = rx.try_recv() else {
        bail!("bank {} produced no dump", bank);
    };
    std::fs::write(out, &dump)
        .with_context(|| format!("Failed to write '{}'", out.display()))?;
    info!("wrote {} bytes to {}", dump.len(), out.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.common.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let settings = settings(&cli.common)?;
    match cli.command {
        Commands::Voices { export } => list_voices(&settings, export.as_deref()),
        Commands::Note {
            out,
            program,
            note: key,
            velocity,
            duration,
            release,
        } => note(settings, &out, program, key, velocity, duration, release),
        Commands::Play {
            input,
            out,
            event_spacing,
            syx,
        } => play(settings, &input, &out, event_spacing, &syx),
        Commands::DumpBank { bank, out } => dump_bank(settings, bank, &out),
    }
}
