//! Plain text voice parameter file.
//!
//! Each voice is a parenthesised tuple:
//!
//! ```text
//! # comment
//! ( @005,
//!   31, 0, 7, 0, 4, 32, 3, 1, 2, 0, 0,   # M1: AR D1R D2R RR SL TL KS MUL DT1 DT2 AME
//!   ...three more operators...
//!   4, 7, 15 )                            # CON FL SM
//! ```
//!
//! A malformed entry is replaced by the default voice and parsing carries on.

use std::fmt::Write as _;
use std::path::Path;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::opm::OPERATORS;
use crate::voice::{OperatorData, VoiceData, MAX_TONES};

/// File name looked for when no explicit voice file is configured.
pub const DEFAULT_VOICE_FILE: &str = "tone_sample.cfg";

/// Upper bounds of the eleven operator fields in file order.
const OPERATOR_FIELD_MAX: [u32; 11] = [31, 31, 31, 15, 15, 127, 3, 15, 7, 3, 1];

/// Upper bounds of the trailing CON, FL, SM fields.
const VOICE_FIELD_MAX: [u32; 3] = [7, 7, 15];

const VALUES_PER_ENTRY: usize = OPERATORS * OPERATOR_FIELD_MAX.len() + VOICE_FIELD_MAX.len();

/// Outcome of parsing a voice file.
#[derive(Debug, Default)]
pub struct VoiceFile {
    /// Parsed voices with their tone numbers, in file order.
    pub voices: Vec<(usize, VoiceData)>,
    /// Entries that were malformed and fell back to the default voice.
    pub failures: usize,
}

impl VoiceFile {
    /// Copy every parsed voice into a tone table.
    pub fn apply(&self, tones: &mut [VoiceData]) {
        for (index, voice) in &self.voices {
            if let Some(slot) = tones.get_mut(*index) {
                *slot = voice.clone();
            }
        }
    }
}

/// Read and parse a voice file from disk.
pub fn load_voice_file(path: &Path) -> Result<VoiceFile> {
    let text = std::fs::read_to_string(path)?;
    let parsed = parse_voice_file(&text);
    debug!(
        "VOICE: loaded {} voices from {} ({} failures)",
        parsed.voices.len(),
        path.display(),
        parsed.failures
    );
    if parsed.voices.is_empty() && !text.trim().is_empty() {
        return Err(Error::VoiceFile {
            path: path.to_path_buf(),
            line: 1,
            msg: "no voice entries found".to_string(),
        });
    }
    Ok(parsed)
}

/// Remove `#` comments, keeping line structure so entries can report lines.
fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_tone_number(token: &str) -> Option<usize> {
    token.trim().strip_prefix('@')?.trim().parse().ok()
}

fn parse_entry(body: &str) -> std::result::Result<(usize, VoiceData), (Option<usize>, String)> {
    let mut tokens = body.split(',');
    let tone = tokens
        .next()
        .and_then(parse_tone_number)
        .ok_or((None, "missing @NNN tone number".to_string()))?;

    let values: Vec<&str> = tokens.map(str::trim).collect();
    if values.len() != VALUES_PER_ENTRY {
        return Err((
            Some(tone),
            format!("expected {} values, found {}", VALUES_PER_ENTRY, values.len()),
        ));
    }
    let mut numbers = Vec::with_capacity(VALUES_PER_ENTRY);
    for value in values {
        let n: u32 = value
            .parse()
            .map_err(|_| (Some(tone), format!("bad value '{}'", value)))?;
        numbers.push(n);
    }

    let field = |op: usize, i: usize| numbers[op * 11 + i].min(OPERATOR_FIELD_MAX[i]) as u8;
    let ops: [OperatorData; OPERATORS] = std::array::from_fn(|op| {
        OperatorData::from_file_order(
            field(op, 0),
            field(op, 1),
            field(op, 2),
            field(op, 3),
            field(op, 4),
            field(op, 5),
            field(op, 6),
            field(op, 7),
            field(op, 8),
            field(op, 9),
            field(op, 10),
        )
    });
    let tail = &numbers[OPERATORS * 11..];
    let trailing = |i: usize| tail[i].min(VOICE_FIELD_MAX[i]) as u8;

    Ok((
        tone,
        VoiceData {
            name: format!("V{:03}", tone),
            con: trailing(0),
            fl: trailing(1),
            slot_mask: trailing(2),
            ops,
        },
    ))
}

/// Parse voice file text.
pub fn parse_voice_file(text: &str) -> VoiceFile {
    let clean = strip_comments(text);
    let mut out = VoiceFile::default();
    let mut rest = clean.as_str();
    let mut consumed_lines = 1;

    while let Some(open) = rest.find('(') {
        consumed_lines += rest[..open].matches('\n').count();
        let after = &rest[open + 1..];
        let Some(close) = after.find(')') else {
            warn!("VOICE: line {}: unterminated entry", consumed_lines);
            out.failures += 1;
            break;
        };
        let body = &after[..close];
        match parse_entry(body) {
            Ok((tone, voice)) if tone < MAX_TONES => out.voices.push((tone, voice)),
            Ok((tone, _)) => {
                warn!("VOICE: line {}: tone @{} out of range, skipped", consumed_lines, tone);
            }
            Err((tone, msg)) => {
                out.failures += 1;
                match tone {
                    Some(tone) if tone < MAX_TONES => {
                        warn!(
                            "VOICE: line {}: @{}: {}, using default voice",
                            consumed_lines, tone, msg
                        );
                        out.voices.push((tone, VoiceData::default()));
                    }
                    _ => warn!("VOICE: line {}: {}, entry skipped", consumed_lines, msg),
                }
            }
        }
        consumed_lines += body.matches('\n').count();
        rest = &after[close + 1..];
    }
    out
}

/// Render voices back into the text format.
pub fn format_voice_file(voices: &[(usize, VoiceData)]) -> String {
    let mut out = String::from("# AR D1R D2R RR SL TL KS MUL DT1 DT2 AME per operator, then CON FL SM\n");
    for (tone, voice) in voices {
        let _ = writeln!(out, "( @{:03},", tone);
        for op in &voice.ops {
            let _ = writeln!(
                out,
                "  {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {},",
                op.ar, op.d1r, op.d2r, op.rr, op.sl, op.tl, op.ks, op.mul, op.dt1, op.dt2, op.ame
            );
        }
        let _ = writeln!(out, "  {}, {}, {} )", voice.con, voice.fl, voice.slot_mask);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# sample voice file
( @000,
  31, 0, 7, 0, 4, 32, 3, 1, 2, 0, 0,   # M1
  31, 0, 7, 0, 4, 28, 3, 3, 7, 0, 0,
  22, 7, 3, 7, 3, 10, 2, 1, 4, 0, 0,
  22, 7, 3, 7, 3, 10, 2, 1, 1, 0, 0,
  4, 7, 15 )
( @002, 99, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
  31, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
  31, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
  31, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
  9, 7, 15 )
";

    #[test]
    fn test_parse_sample_entry() {
        let parsed = parse_voice_file(SAMPLE);
        assert_eq!(parsed.failures, 0);
        assert_eq!(parsed.voices.len(), 2);

        let (tone, voice) = &parsed.voices[0];
        assert_eq!(*tone, 0);
        let default = VoiceData::default();
        assert_eq!(voice.ops, default.ops);
        assert_eq!(voice.con, 4);
        assert_eq!(voice.fl, 7);
        assert_eq!(voice.slot_mask, 15);
    }

    #[test]
    fn test_values_are_clamped() {
        let parsed = parse_voice_file(SAMPLE);
        let (tone, voice) = &parsed.voices[1];
        assert_eq!(*tone, 2);
        assert_eq!(voice.ops[0].ar, 31);
        assert_eq!(voice.con, 7);
    }

    #[test]
    fn test_bad_entry_falls_back_and_continues() {
        let text = "( @001, 1, 2, three )\n( @004, 1 )\n( nonsense )\n".to_string()
            + SAMPLE;
        let parsed = parse_voice_file(&text);
        assert_eq!(parsed.failures, 3);
        // Two defaults for @001 and @004, then the two good entries.
        assert_eq!(parsed.voices.len(), 4);
        assert_eq!(parsed.voices[0], (1, VoiceData::default()));
        assert_eq!(parsed.voices[1], (4, VoiceData::default()));
        assert_eq!(parsed.voices[2].0, 0);
    }

    #[test]
    fn test_format_round_trip() {
        let voices: Vec<(usize, VoiceData)> = VoiceData::default_set()
            .into_iter()
            .enumerate()
            .map(|(i, mut v)| {
                v.name = format!("V{:03}", i * 3);
                (i * 3, v)
            })
            .collect();
        let text = format_voice_file(&voices);
        let parsed = parse_voice_file(&text);
        assert_eq!(parsed.failures, 0);
        assert_eq!(parsed.voices, voices);
    }

    #[test]
    fn test_apply_ignores_out_of_range() {
        let file = VoiceFile {
            voices: vec![(MAX_TONES + 1, VoiceData::default())],
            failures: 0,
        };
        let mut tones = VoiceData::default_tones();
        let before = tones.clone();
        file.apply(&mut tones);
        assert_eq!(tones, before);
    }
}
