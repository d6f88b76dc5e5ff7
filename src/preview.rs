//! DPCM sample preview
//!
//! A preview plays a sample on a standalone DMC that temporarily replaces the
//! sequencer's one. Sequencer DPCM writes keep landing on the parked DMC,
//! which runs silently in the background, so a sample triggered during the
//! preview is heard from its current position once the preview ends.

use crate::apu::Apu;
use crate::instrument::DpcmSample;
use crate::{Result, SoundGenError};
use std::sync::Arc;

/// Check that `offset` (64-byte units) lies inside a playable sample
pub fn validate_preview(sample: &DpcmSample, offset: u8) -> Result<()> {
    let len = sample.playable_len();
    if len == 0 {
        return Err(SoundGenError::InvalidPlayback(format!(
            "sample '{}' is empty",
            sample.name
        )));
    }
    if offset as usize * 64 >= len {
        return Err(SoundGenError::InvalidPlayback(format!(
            "offset {offset} is past the end of '{}' ({len} bytes)",
            sample.name
        )));
    }
    Ok(())
}

/// Preview currently on the DMC output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewInfo {
    /// Sample name
    pub name: String,
    /// Start offset in 64-byte units
    pub offset: u8,
    /// Rate index (0-15)
    pub pitch: u8,
}

/// Owner of the preview lifecycle
#[derive(Debug, Default)]
pub struct SamplePreview {
    active: Option<PreviewInfo>,
}

impl SamplePreview {
    /// Idle preview slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Running preview, if any
    pub fn active(&self) -> Option<&PreviewInfo> {
        self.active.as_ref()
    }

    /// Whether a preview is playing
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Start playing `sample` from `offset` (64-byte units) at rate `pitch`
    ///
    /// A running preview is replaced; the sequencer's DMC stays parked.
    ///
    /// # Errors
    ///
    /// Returns [`SoundGenError::InvalidPlayback`] for an empty sample or an
    /// offset past its end.
    pub fn start(&mut self, apu: &mut Apu, sample: &DpcmSample, offset: u8, pitch: u8) -> Result<()> {
        validate_preview(sample, offset)?;
        let len = sample.playable_len();
        let start = offset as usize * 64;
        let length = ((len - start - 1) / 16).min(0xFF) as u8;
        let delta = apu.dpcm_state().delta;

        let mut dmc = apu.make_dmc(Arc::from(sample.data.as_slice()));
        dmc.write(0x4010, pitch & 0x0F);
        dmc.write(0x4011, delta);
        dmc.write(0x4012, offset);
        dmc.write(0x4013, length);
        dmc.set_enabled(true);
        apu.begin_dmc_preview(dmc);

        log::debug!(
            "preview '{}' offset {} pitch {} ({} bytes)",
            sample.name,
            offset,
            pitch & 0x0F,
            length as usize * 16 + 1
        );
        self.active = Some(PreviewInfo {
            name: sample.name.clone(),
            offset,
            pitch: pitch & 0x0F,
        });
        Ok(())
    }

    /// Restore the sequencer's DMC once the sample has played out
    ///
    /// Returns true when the preview finished during this call.
    pub fn poll(&mut self, apu: &mut Apu) -> bool {
        if self.active.is_none() || apu.dpcm_active() {
            return false;
        }
        self.finish(apu)
    }

    /// Stop the preview immediately; returns true if one was running
    pub fn cancel(&mut self, apu: &mut Apu) -> bool {
        if self.active.is_none() {
            return false;
        }
        self.finish(apu)
    }

    /// Forget the preview without touching the APU (after an APU reset)
    pub fn clear(&mut self) {
        self.active = None;
    }

    fn finish(&mut self, apu: &mut Apu) -> bool {
        apu.end_dmc_preview();
        self.active.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::{Chip, Machine};

    fn sample(bytes: usize) -> DpcmSample {
        DpcmSample {
            name: "snare".into(),
            data: vec![0xFF; bytes],
        }
    }

    #[test]
    fn test_preview_plays_out_and_restores() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        apu.write(0x4011, 0x10);
        let mut preview = SamplePreview::new();
        preview.start(&mut apu, &sample(65), 0, 15).unwrap();
        assert!(apu.is_previewing());
        assert!(!preview.poll(&mut apu), "sample still playing");

        let mut out = Vec::new();
        apu.advance_samples(4410, &mut out);
        assert!(out.iter().any(|&s| s != 0), "preview must be audible");
        assert!(preview.poll(&mut apu), "65 bytes at the top rate end within 100 ms");
        assert!(!apu.is_previewing());
        assert_eq!(apu.dpcm_state().delta, 0x10, "sequencer DMC comes back unchanged");
    }

    #[test]
    fn test_sequencer_writes_during_preview_are_kept() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        let mut preview = SamplePreview::new();
        preview.start(&mut apu, &sample(1024), 0, 0).unwrap();
        apu.write(0x4011, 0x33);
        assert_eq!(apu.get_reg(Chip::Apu2A03, 0x11), 0x33);
        assert!(preview.cancel(&mut apu));
        assert_eq!(apu.dpcm_state().delta, 0x33);
        assert!(!preview.cancel(&mut apu), "second cancel is a no-op");
    }

    #[test]
    fn test_invalid_preview_rejected() {
        let mut apu = Apu::new(Machine::Ntsc, 44_100);
        let mut preview = SamplePreview::new();
        let empty = DpcmSample::default();
        assert!(matches!(
            preview.start(&mut apu, &empty, 0, 15),
            Err(SoundGenError::InvalidPlayback(_))
        ));
        assert!(preview.start(&mut apu, &sample(65), 2, 15).is_err(), "offset 128 > 65 bytes");
        assert!(!apu.is_previewing());
        assert!(!preview.is_active());
    }
}
