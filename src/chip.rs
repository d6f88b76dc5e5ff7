//! Chip identities, machine types and tracker channel layout

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Console timing domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Machine {
    /// 60 Hz Famicom/NES
    #[default]
    Ntsc,
    /// 50 Hz PAL NES
    Pal,
}

impl Machine {
    /// CPU clock in Hz
    pub const fn cpu_clock(self) -> u32 {
        match self {
            Machine::Ntsc => 1_789_773,
            Machine::Pal => 1_662_607,
        }
    }

    /// Default engine tick rate in Hz
    pub const fn frame_rate(self) -> u32 {
        match self {
            Machine::Ntsc => 60,
            Machine::Pal => 50,
        }
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Machine::Ntsc => "NTSC",
            Machine::Pal => "PAL",
        })
    }
}

/// A sound generation subsystem with its own register set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chip {
    /// Internal 2A03 APU (always present)
    #[serde(rename = "2a03")]
    Apu2A03,
    /// Konami VRC6
    #[serde(rename = "vrc6")]
    Vrc6,
    /// Konami VRC7 (OPLL derivative)
    #[serde(rename = "vrc7")]
    Vrc7,
    /// Famicom Disk System
    #[serde(rename = "fds")]
    Fds,
    /// Nintendo MMC5
    #[serde(rename = "mmc5")]
    Mmc5,
    /// Namco 163
    #[serde(rename = "n163")]
    N163,
    /// Sunsoft 5B
    #[serde(rename = "s5b")]
    S5B,
}

impl Chip {
    /// All chips in tracker channel order
    pub const ALL: [Chip; 7] = [
        Chip::Apu2A03,
        Chip::Vrc6,
        Chip::Mmc5,
        Chip::N163,
        Chip::Fds,
        Chip::Vrc7,
        Chip::S5B,
    ];

    /// Mask bit for this chip (empty for the 2A03)
    pub fn mask(self) -> ChipMask {
        match self {
            Chip::Apu2A03 => ChipMask::empty(),
            Chip::Vrc6 => ChipMask::VRC6,
            Chip::Vrc7 => ChipMask::VRC7,
            Chip::Fds => ChipMask::FDS,
            Chip::Mmc5 => ChipMask::MMC5,
            Chip::N163 => ChipMask::N163,
            Chip::S5B => ChipMask::S5B,
        }
    }

    /// Human-readable chip name
    pub fn name(self) -> &'static str {
        match self {
            Chip::Apu2A03 => "2A03",
            Chip::Vrc6 => "VRC6",
            Chip::Vrc7 => "VRC7",
            Chip::Fds => "FDS",
            Chip::Mmc5 => "MMC5",
            Chip::N163 => "N163",
            Chip::S5B => "5B",
        }
    }
}

impl fmt::Display for Chip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Expansion chip selection (the 2A03 is implied)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChipMask: u8 {
        /// Konami VRC6
        const VRC6 = 0x01;
        /// Konami VRC7
        const VRC7 = 0x02;
        /// Famicom Disk System
        const FDS = 0x04;
        /// Nintendo MMC5
        const MMC5 = 0x08;
        /// Namco 163
        const N163 = 0x10;
        /// Sunsoft 5B
        const S5B = 0x20;
    }
}

impl ChipMask {
    /// Check whether a chip is part of this selection (the 2A03 always is)
    pub fn has(self, chip: Chip) -> bool {
        chip == Chip::Apu2A03 || self.contains(chip.mask())
    }

    /// Build a mask from a list of chips
    pub fn from_chips<I: IntoIterator<Item = Chip>>(chips: I) -> Self {
        chips
            .into_iter()
            .fold(ChipMask::empty(), |mask, chip| mask | chip.mask())
    }

    /// Chips present in this selection, 2A03 first
    pub fn chips(self) -> Vec<Chip> {
        Chip::ALL.into_iter().filter(|c| self.has(*c)).collect()
    }
}

/// Maximum number of Namco 163 channels
pub const MAX_N163_CHANNELS: usize = 8;

/// Physical channel identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    /// 2A03 pulse 1
    Square1,
    /// 2A03 pulse 2
    Square2,
    /// 2A03 triangle
    Triangle,
    /// 2A03 noise
    Noise,
    /// 2A03 delta modulation channel
    Dpcm,
    /// VRC6 pulse (0 or 1)
    Vrc6Pulse(u8),
    /// VRC6 sawtooth
    Vrc6Sawtooth,
    /// MMC5 pulse (0 or 1)
    Mmc5Pulse(u8),
    /// Namco 163 wavetable channel (0..8)
    N163(u8),
    /// FDS wavetable channel
    Fds,
    /// VRC7 FM channel (0..6)
    Vrc7(u8),
    /// Sunsoft 5B tone channel (0..3)
    S5B(u8),
}

impl ChannelType {
    /// Chip that owns this channel
    pub fn chip(self) -> Chip {
        match self {
            ChannelType::Square1
            | ChannelType::Square2
            | ChannelType::Triangle
            | ChannelType::Noise
            | ChannelType::Dpcm => Chip::Apu2A03,
            ChannelType::Vrc6Pulse(_) | ChannelType::Vrc6Sawtooth => Chip::Vrc6,
            ChannelType::Mmc5Pulse(_) => Chip::Mmc5,
            ChannelType::N163(_) => Chip::N163,
            ChannelType::Fds => Chip::Fds,
            ChannelType::Vrc7(_) => Chip::Vrc7,
            ChannelType::S5B(_) => Chip::S5B,
        }
    }

    /// Display name as shown in a pattern editor header
    pub fn name(self) -> String {
        match self {
            ChannelType::Square1 => "Pulse 1".into(),
            ChannelType::Square2 => "Pulse 2".into(),
            ChannelType::Triangle => "Triangle".into(),
            ChannelType::Noise => "Noise".into(),
            ChannelType::Dpcm => "DPCM".into(),
            ChannelType::Vrc6Pulse(n) => format!("VRC6 Pulse {}", n + 1),
            ChannelType::Vrc6Sawtooth => "Sawtooth".into(),
            ChannelType::Mmc5Pulse(n) => format!("MMC5 Pulse {}", n + 1),
            ChannelType::N163(n) => format!("Namco {}", n + 1),
            ChannelType::Fds => "FDS".into(),
            ChannelType::Vrc7(n) => format!("FM Channel {}", n + 1),
            ChannelType::S5B(n) => format!("5B Square {}", n + 1),
        }
    }
}

/// Document-facing channel identity, stable across handler rebuilds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerChannel {
    /// Channel index as addressed by the document
    pub index: usize,
    /// Physical channel
    pub channel: ChannelType,
    /// Display name
    pub name: String,
}

/// Build the tracker channel list for a chip selection
///
/// Channels are ordered 2A03, VRC6, MMC5, N163, FDS, VRC7, 5B. The N163 channel
/// count is clamped to 1..=8 when the chip is present.
pub fn channel_layout(chips: ChipMask, n163_channels: usize) -> Vec<TrackerChannel> {
    let mut types = vec![
        ChannelType::Square1,
        ChannelType::Square2,
        ChannelType::Triangle,
        ChannelType::Noise,
        ChannelType::Dpcm,
    ];
    if chips.has(Chip::Vrc6) {
        types.extend([
            ChannelType::Vrc6Pulse(0),
            ChannelType::Vrc6Pulse(1),
            ChannelType::Vrc6Sawtooth,
        ]);
    }
    if chips.has(Chip::Mmc5) {
        types.extend([ChannelType::Mmc5Pulse(0), ChannelType::Mmc5Pulse(1)]);
    }
    if chips.has(Chip::N163) {
        let count = n163_channels.clamp(1, MAX_N163_CHANNELS);
        types.extend((0..count as u8).map(ChannelType::N163));
    }
    if chips.has(Chip::Fds) {
        types.push(ChannelType::Fds);
    }
    if chips.has(Chip::Vrc7) {
        types.extend((0..6).map(ChannelType::Vrc7));
    }
    if chips.has(Chip::S5B) {
        types.extend((0..3).map(ChannelType::S5B));
    }

    types
        .into_iter()
        .enumerate()
        .map(|(index, channel)| TrackerChannel {
            index,
            channel,
            name: channel.name(),
        })
        .collect()
}
