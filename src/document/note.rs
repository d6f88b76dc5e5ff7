//! Pattern cells
//!
//! A cell is written the way a pattern editor shows it:
//! `C#4 01 F 4A2 ...`: note, instrument, volume and up to four effect
//! columns. `...`, `..` and `.` mark empty fields. Noise notes are written
//! `X-#` with a hex pitch, `---` cuts, `===` releases and `^N` repeats the
//! N-th previous note.

use super::effect::{EffectEntry, EffectKind};
use crate::SoundGenError;
use std::fmt;
use std::str::FromStr;

/// Maximum effect columns per channel
pub const MAX_EFFECT_COLUMNS: usize = 4;

/// Highest volume column value
pub const MAX_VOLUME: u8 = 0x0F;

const NOTE_NAMES: [&str; 12] = [
    "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#", "A-", "A#", "B-",
];

/// Note field of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NoteValue {
    /// No note
    #[default]
    None,
    /// Note number, 0 = C-0
    Note(u8),
    /// Note cut (`---`)
    Halt,
    /// Note release (`===`)
    Release,
    /// Repeat an earlier note from the echo buffer (`^0`..`^3`)
    Echo(u8),
}

impl NoteValue {
    /// Build a note from pitch class (0..11) and octave
    pub fn from_parts(note: u8, octave: u8) -> Self {
        NoteValue::Note((octave.min(7) * 12 + note.min(11)).min(95))
    }
}

/// One pattern cell for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Note {
    /// Note field
    pub value: NoteValue,
    /// Instrument index
    pub instrument: Option<u8>,
    /// Volume column (0..15)
    pub volume: Option<u8>,
    /// Effect columns
    pub effects: [EffectEntry; MAX_EFFECT_COLUMNS],
}

impl Note {
    /// Empty cell
    pub fn empty() -> Self {
        Self::default()
    }

    /// Cell holding a note number
    pub fn note(note: u8) -> Self {
        Note {
            value: NoteValue::Note(note.min(95)),
            ..Self::default()
        }
    }

    /// Set the instrument
    pub fn with_instrument(mut self, instrument: u8) -> Self {
        self.instrument = Some(instrument);
        self
    }

    /// Set the volume column
    pub fn with_volume(mut self, volume: u8) -> Self {
        self.volume = Some(volume.min(MAX_VOLUME));
        self
    }

    /// Put an effect in the first free column
    pub fn with_effect(mut self, kind: EffectKind, param: u8) -> Self {
        if let Some(slot) = self.effects.iter_mut().find(|e| e.is_empty()) {
            *slot = EffectEntry::new(kind, param);
        }
        self
    }

    /// Parameter of the last column holding `kind`
    pub fn effect_param(&self, kind: EffectKind) -> Option<u8> {
        self.effects
            .iter()
            .rev()
            .find(|e| e.kind() == Some(kind))
            .map(|e| e.param)
    }

    /// True when every field is empty
    pub fn is_empty(&self) -> bool {
        self.value == NoteValue::None
            && self.instrument.is_none()
            && self.volume.is_none()
            && self.effects.iter().all(EffectEntry::is_empty)
    }
}

fn parse_hex(text: &str, what: &str) -> Result<u8, SoundGenError> {
    u8::from_str_radix(text, 16)
        .map_err(|_| SoundGenError::Document(format!("invalid {what} '{text}'")))
}

fn parse_note(field: &str) -> Result<NoteValue, SoundGenError> {
    match field {
        "..." | "" => return Ok(NoteValue::None),
        "---" => return Ok(NoteValue::Halt),
        "===" => return Ok(NoteValue::Release),
        _ => {}
    }
    if let Some(rest) = field.strip_prefix('^') {
        let n = rest.trim_start_matches('-');
        let depth = n
            .parse::<u8>()
            .map_err(|_| SoundGenError::Document(format!("invalid echo note '{field}'")))?;
        return Ok(NoteValue::Echo(depth.min(3)));
    }
    if field.len() != 3 {
        return Err(SoundGenError::Document(format!("invalid note '{field}'")));
    }
    let (name, octave) = field.split_at(2);
    if octave == "#" {
        // Noise pitch: "X-#"
        let pitch = parse_hex(&name[..1], "noise pitch")?;
        return Ok(NoteValue::Note(pitch & 0x0F));
    }
    let upper = name.to_ascii_uppercase();
    let pitch = NOTE_NAMES
        .iter()
        .position(|n| *n == upper)
        .ok_or_else(|| SoundGenError::Document(format!("invalid note name '{field}'")))?;
    let octave = octave
        .parse::<u8>()
        .map_err(|_| SoundGenError::Document(format!("invalid octave '{field}'")))?;
    if octave > 7 {
        return Err(SoundGenError::Document(format!("octave out of range '{field}'")));
    }
    Ok(NoteValue::from_parts(pitch as u8, octave))
}

fn parse_effect(field: &str) -> Result<EffectEntry, SoundGenError> {
    if field.chars().all(|c| c == '.') {
        return Ok(EffectEntry::default());
    }
    let mut chars = field.chars();
    let letter = chars.next().unwrap_or('.');
    let kind = EffectKind::from_letter(letter)
        .ok_or_else(|| SoundGenError::Document(format!("unknown effect '{field}'")))?;
    let param = parse_hex(chars.as_str(), "effect parameter")?;
    Ok(EffectEntry::new(kind, param))
}

impl FromStr for Note {
    type Err = SoundGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let mut note = Note::empty();

        if let Some(field) = fields.next() {
            note.value = parse_note(field)?;
        }
        if let Some(field) = fields.next() {
            if field != ".." {
                note.instrument = Some(parse_hex(field, "instrument")?);
            }
        }
        if let Some(field) = fields.next() {
            if field != "." {
                note.volume = Some(parse_hex(field, "volume")?.min(MAX_VOLUME));
            }
        }
        for (column, field) in fields.enumerate() {
            if column >= MAX_EFFECT_COLUMNS {
                return Err(SoundGenError::Document(format!(
                    "too many effect columns in '{s}'"
                )));
            }
            note.effects[column] = parse_effect(field)?;
        }
        Ok(note)
    }
}

impl fmt::Display for NoteValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            NoteValue::None => f.write_str("..."),
            NoteValue::Halt => f.write_str("---"),
            NoteValue::Release => f.write_str("==="),
            NoteValue::Echo(n) => write!(f, "^-{n}"),
            NoteValue::Note(n) => write!(f, "{}{}", NOTE_NAMES[(n % 12) as usize], n / 12),
        }
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)?;
        match self.instrument {
            Some(i) => write!(f, " {i:02X}")?,
            None => f.write_str(" ..")?,
        }
        match self.volume {
            Some(v) => write!(f, " {v:X}")?,
            None => f.write_str(" .")?,
        }
        for effect in &self.effects {
            match effect.kind() {
                Some(kind) => write!(f, " {}{:02X}", kind.letter(), effect.param)?,
                None => f.write_str(" ...")?,
            }
        }
        Ok(())
    }
}
