//! Instrument recorder
//!
//! Captures what one channel actually plays, tick by tick, and turns it into
//! sequence instruments: volume, fixed arpeggio (the sounding note), pitch
//! (period drift from that note) and duty. Every `interval` ticks the buffer
//! becomes one instrument, until `instrument_count` have been made.

use crate::channels::{ChannelSet, TickContext};
use crate::chip::ChannelType;
use crate::instrument::{ArpeggioMode, Instrument, Sequence, SequenceKind};
use crate::{Result, SoundGenError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Longest sequence an instrument can hold
pub const MAX_SEQUENCE_LENGTH: usize = 252;

/// Recorder parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSetting {
    /// Ticks per recorded instrument
    pub interval: usize,
    /// Instruments to record before stopping
    pub instrument_count: usize,
}

impl Default for RecordSetting {
    fn default() -> Self {
        RecordSetting {
            interval: 60,
            instrument_count: 1,
        }
    }
}

impl RecordSetting {
    /// Check the ranges
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SEQUENCE_LENGTH).contains(&self.interval) {
            return Err(SoundGenError::Config(format!(
                "record interval {} out of range",
                self.interval
            )));
        }
        if self.instrument_count == 0 {
            return Err(SoundGenError::Config("record instrument count must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    volume: i32,
    note: i32,
    pitch: i32,
    duty: i32,
}

/// Per-tick recorder for one channel
#[derive(Debug, Clone, Default)]
pub struct InstrumentRecorder {
    channel: Option<usize>,
    setting: RecordSetting,
    frames: Vec<Frame>,
    made: usize,
    ready: VecDeque<Instrument>,
}

impl InstrumentRecorder {
    /// Idle recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel being recorded
    pub fn record_channel(&self) -> Option<usize> {
        self.channel
    }

    /// Select the channel to record; pending data is discarded
    pub fn set_record_channel(&mut self, channel: Option<usize>) {
        self.channel = channel;
        self.restart();
    }

    /// Current parameters
    pub fn record_setting(&self) -> RecordSetting {
        self.setting
    }

    /// Change the parameters; pending data is discarded
    pub fn set_record_setting(&mut self, setting: RecordSetting) -> Result<()> {
        setting.validate()?;
        self.setting = setting;
        self.restart();
        Ok(())
    }

    fn restart(&mut self) {
        self.frames.clear();
        self.made = 0;
        self.ready.clear();
    }

    /// Whether ticks are still being collected
    pub fn is_recording(&self) -> bool {
        self.channel.is_some() && self.made < self.setting.instrument_count
    }

    /// Capture the recorded channel's output for this tick
    pub fn record_tick(&mut self, channels: &ChannelSet, ctx: &TickContext) {
        if !self.is_recording() {
            return;
        }
        let Some(handler) = self.channel.and_then(|c| channels.get(c)) else {
            return;
        };
        let state = handler.tick_state();
        self.frames.push(Frame {
            volume: state.volume,
            note: state.note,
            pitch: handler.pitch_offset(ctx),
            duty: state.duty,
        });
        if self.frames.len() >= self.setting.interval {
            self.finish_instrument(handler.channel());
        }
    }

    /// Turn a partially filled buffer into an instrument (playback stopped)
    pub fn flush(&mut self, channels: &ChannelSet) {
        if self.frames.is_empty() || !self.is_recording() {
            return;
        }
        if let Some(channel) = self.channel.and_then(|c| channels.get(c)).map(|h| h.channel()) {
            self.finish_instrument(channel);
        }
    }

    /// Oldest recorded instrument not yet collected
    pub fn get_record_instrument(&mut self) -> Option<Instrument> {
        self.ready.pop_front()
    }

    /// Instruments waiting to be collected
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    fn finish_instrument(&mut self, channel: ChannelType) {
        let frames = std::mem::take(&mut self.frames);
        self.made += 1;
        let mut inst = Instrument::new(format!("{} {:02}", channel.name(), self.made), channel.chip());

        let volume = frames.iter().map(|f| f.volume.clamp(0, 15) as i8).collect();
        let arpeggio = Sequence {
            arpeggio_mode: ArpeggioMode::Fixed,
            ..hold(frames.iter().map(|f| f.note.clamp(0, 95) as i8).collect())
        };
        let mut last = 0;
        let pitch = frames
            .iter()
            .map(|f| {
                let step = (f.pitch - last).clamp(i8::MIN as i32, i8::MAX as i32);
                last += step;
                step as i8
            })
            .collect();
        let duty = frames.iter().map(|f| f.duty.clamp(0, i8::MAX as i32) as i8).collect();

        inst.sequences.set(SequenceKind::Volume, Some(hold(volume)));
        inst.sequences.set(SequenceKind::Arpeggio, Some(arpeggio));
        inst.sequences.set(SequenceKind::Pitch, Some(Sequence::new(pitch)));
        inst.sequences.set(SequenceKind::Duty, Some(hold(duty)));
        log::debug!("recorded instrument '{}' ({} ticks)", inst.name, frames.len());
        self.ready.push_back(inst);
    }
}

/// Sequence that holds its last value
fn hold(values: Vec<i8>) -> Sequence {
    let end = values.len().saturating_sub(1);
    Sequence::new(values).looping(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::tests::Fixture;
    use crate::channels::tests::WriteLog;
    use crate::document::{Document, EffectKind, Note};

    fn run(recorder: &mut InstrumentRecorder, fx: &Fixture, channels: &mut ChannelSet, ticks: usize) {
        let ctx = fx.ctx();
        let mut log = WriteLog::default();
        for _ in 0..ticks {
            channels.process(&ctx);
            channels.refresh(&mut log, &ctx);
            recorder.record_tick(channels, &ctx);
        }
    }

    #[test]
    fn test_records_one_instrument_per_interval() {
        let fx = Fixture::new();
        let mut channels = ChannelSet::new(&fx.doc.channels());
        let mut recorder = InstrumentRecorder::new();
        recorder
            .set_record_setting(RecordSetting {
                interval: 4,
                instrument_count: 2,
            })
            .unwrap();
        recorder.set_record_channel(Some(0));
        if let Some(h) = channels.get_mut(0) {
            h.play_note(&Note::note(48).with_volume(12), &fx.ctx());
        }
        run(&mut recorder, &fx, &mut channels, 10);

        assert_eq!(recorder.pending(), 2, "two instruments then stop");
        assert!(!recorder.is_recording());
        let inst = recorder.get_record_instrument().unwrap();
        let volume = inst.sequences.get(SequenceKind::Volume).unwrap();
        assert_eq!(volume.values, vec![12; 4]);
        assert_eq!(volume.loop_point, Some(3));
        let arp = inst.sequences.get(SequenceKind::Arpeggio).unwrap();
        assert_eq!(arp.arpeggio_mode, ArpeggioMode::Fixed);
        assert_eq!(arp.values, vec![48; 4]);
        assert_eq!(inst.name, "Pulse 1 01");
    }

    #[test]
    fn test_pitch_drift_is_recorded_as_steps() {
        let fx = Fixture::new();
        let mut channels = ChannelSet::new(&fx.doc.channels());
        let mut recorder = InstrumentRecorder::new();
        recorder
            .set_record_setting(RecordSetting {
                interval: 3,
                instrument_count: 1,
            })
            .unwrap();
        recorder.set_record_channel(Some(0));
        if let Some(h) = channels.get_mut(0) {
            h.play_note(&Note::note(48).with_effect(EffectKind::PortaDown, 2), &fx.ctx());
        }
        run(&mut recorder, &fx, &mut channels, 3);

        let inst = recorder.get_record_instrument().unwrap();
        let pitch = inst.sequences.get(SequenceKind::Pitch).unwrap();
        let total: i32 = pitch.values.iter().map(|&v| v as i32).sum();
        assert!(total > 0, "sliding down raises the period: {:?}", pitch.values);
    }

    #[test]
    fn test_flush_keeps_partial_buffer() {
        let fx = Fixture::new();
        let mut channels = ChannelSet::new(&fx.doc.channels());
        let mut recorder = InstrumentRecorder::new();
        recorder.set_record_channel(Some(1));
        run(&mut recorder, &fx, &mut channels, 5);
        assert_eq!(recorder.pending(), 0);
        recorder.flush(&channels);
        let inst = recorder.get_record_instrument().unwrap();
        assert_eq!(inst.sequences.get(SequenceKind::Volume).unwrap().values.len(), 5);
        assert_eq!(inst.name, "Pulse 2 01");
    }

    #[test]
    fn test_invalid_setting_rejected() {
        let mut recorder = InstrumentRecorder::new();
        let bad = RecordSetting {
            interval: 0,
            instrument_count: 1,
        };
        assert!(matches!(recorder.set_record_setting(bad), Err(SoundGenError::Config(_))));
        assert_eq!(recorder.record_setting(), RecordSetting::default());
    }
}
