//! Effect column commands

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Effect command stored in a pattern effect column
///
/// The discriminant is the value kept in [`EffectEntry::code`]; code 0 is an
/// empty column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
#[repr(u8)]
pub enum EffectKind {
    /// `Fxx` speed (below the split point) or tempo
    Speed = 1,
    /// `Bxx` jump to frame
    Jump,
    /// `Dxx` skip to row of next frame
    Skip,
    /// `Cxx` halt playback
    Halt,
    /// `3xx` automatic portamento
    Portamento,
    /// `Hxy` hardware sweep up
    SweepUp,
    /// `Ixy` hardware sweep down
    SweepDown,
    /// `0xy` arpeggio
    Arpeggio,
    /// `4xy` vibrato
    Vibrato,
    /// `7xy` tremolo
    Tremolo,
    /// `Pxx` fine pitch
    Pitch,
    /// `Gxx` note delay
    Delay,
    /// `Zxx` DPCM delta counter
    Dac,
    /// `1xx` portamento up
    PortaUp,
    /// `2xx` portamento down
    PortaDown,
    /// `Vxx` duty/timbre
    Duty,
    /// `Yxx` DPCM sample offset
    SampleOffset,
    /// `Qxy` note slide up
    SlideUp,
    /// `Rxy` note slide down
    SlideDown,
    /// `Axy` volume slide
    VolumeSlide,
    /// `Sxx` note cut
    NoteCut,
    /// `Xxx` DPCM retrigger
    Retrigger,
    /// `Wxx` DPCM pitch
    DpcmPitch,
    /// `Lxx` note release
    NoteRelease,
    /// `Txy` delayed transpose
    Transpose,
}

const LETTERS: [(EffectKind, char); 25] = [
    (EffectKind::Speed, 'F'),
    (EffectKind::Jump, 'B'),
    (EffectKind::Skip, 'D'),
    (EffectKind::Halt, 'C'),
    (EffectKind::Portamento, '3'),
    (EffectKind::SweepUp, 'H'),
    (EffectKind::SweepDown, 'I'),
    (EffectKind::Arpeggio, '0'),
    (EffectKind::Vibrato, '4'),
    (EffectKind::Tremolo, '7'),
    (EffectKind::Pitch, 'P'),
    (EffectKind::Delay, 'G'),
    (EffectKind::Dac, 'Z'),
    (EffectKind::PortaUp, '1'),
    (EffectKind::PortaDown, '2'),
    (EffectKind::Duty, 'V'),
    (EffectKind::SampleOffset, 'Y'),
    (EffectKind::SlideUp, 'Q'),
    (EffectKind::SlideDown, 'R'),
    (EffectKind::VolumeSlide, 'A'),
    (EffectKind::NoteCut, 'S'),
    (EffectKind::Retrigger, 'X'),
    (EffectKind::DpcmPitch, 'W'),
    (EffectKind::NoteRelease, 'L'),
    (EffectKind::Transpose, 'T'),
];

impl EffectKind {
    /// Column letter as shown in a pattern editor
    pub fn letter(self) -> char {
        LETTERS
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, c)| *c)
            .unwrap_or('?')
    }

    /// Parse a column letter
    pub fn from_letter(letter: char) -> Option<Self> {
        let upper = letter.to_ascii_uppercase();
        LETTERS
            .iter()
            .find(|(_, c)| *c == upper)
            .map(|(kind, _)| *kind)
    }

    /// Effects evaluated by the sequencer rather than a channel
    pub fn is_global(self) -> bool {
        matches!(
            self,
            EffectKind::Speed | EffectKind::Jump | EffectKind::Skip | EffectKind::Halt
        )
    }
}

/// One effect column: command code and parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EffectEntry {
    /// Raw command code (0 = none)
    pub code: u8,
    /// Parameter byte
    pub param: u8,
}

impl EffectEntry {
    /// Build an entry from a decoded command
    pub fn new(kind: EffectKind, param: u8) -> Self {
        EffectEntry {
            code: kind as u8,
            param,
        }
    }

    /// Decoded command; unknown codes read as empty
    pub fn kind(&self) -> Option<EffectKind> {
        EffectKind::from_u8(self.code)
    }

    /// True when the column holds no effect
    pub fn is_empty(&self) -> bool {
        self.kind().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trips_through_from_primitive() {
        for (kind, _) in LETTERS {
            let entry = EffectEntry::new(kind, 0x12);
            assert_eq!(entry.kind(), Some(kind));
        }
    }

    #[test]
    fn test_unknown_code_is_empty() {
        let entry = EffectEntry { code: 0xEE, param: 1 };
        assert!(entry.is_empty());
        assert!(EffectEntry::default().is_empty());
    }

    #[test]
    fn test_letters() {
        assert_eq!(EffectKind::from_letter('f'), Some(EffectKind::Speed));
        assert_eq!(EffectKind::Vibrato.letter(), '4');
        assert_eq!(EffectKind::from_letter('K'), None);
        assert!(EffectKind::Jump.is_global());
        assert!(!EffectKind::Vibrato.is_global());
    }
}
