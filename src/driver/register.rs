//! Register ids the circulation engine issues
//!
//! The engine only moves whole register values; bit-field encoding stays in the driver.

use std::fmt;

use crate::channel::{Channel, Direction};
use crate::descriptor::AudioSystem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterId(pub u32);

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg {:#06x}", self.0)
    }
}

const CHANNEL_BASE: u32 = 0x0100;
const CHANNEL_STRIDE: u32 = 0x10;
const LTC_BASE: u32 = 0x0200;
const AUDIO_BASE: u32 = 0x0300;
const AUDIO_STRIDE: u32 = 0x10;

/// Audio control values
pub const AUDIO_STOP: u32 = 0;
pub const AUDIO_RUN: u32 = 1;
pub const AUDIO_PAUSE: u32 = 2;

fn channel_reg(channel: Channel, offset: u32) -> RegisterId {
    RegisterId(CHANNEL_BASE + channel.index() as u32 * CHANNEL_STRIDE + offset)
}

/// Frame buffer the channel reads (playout) or writes (capture) during the next interval
pub fn frame_select(channel: Channel, direction: Direction) -> RegisterId {
    match direction {
        Direction::Capture => channel_reg(channel, 0x0),
        Direction::Playout => channel_reg(channel, 0x1),
    }
}

/// DBB, low and high words of the channel's embedded RP188 timecode
pub fn rp188(channel: Channel, direction: Direction) -> [RegisterId; 3] {
    let base = match direction {
        Direction::Capture => 0x4,
        Direction::Playout => 0x8,
    };
    [
        channel_reg(channel, base),
        channel_reg(channel, base + 1),
        channel_reg(channel, base + 2),
    ]
}

/// Low and high words of the analog LTC port
pub fn ltc(direction: Direction) -> [RegisterId; 2] {
    match direction {
        Direction::Capture => [RegisterId(LTC_BASE), RegisterId(LTC_BASE + 1)],
        Direction::Playout => [RegisterId(LTC_BASE + 2), RegisterId(LTC_BASE + 3)],
    }
}

pub fn audio_control(audio: AudioSystem) -> RegisterId {
    RegisterId(AUDIO_BASE + audio.index() as u32 * AUDIO_STRIDE)
}

/// Byte offset of the hardware within the audio ring
pub fn audio_position(audio: AudioSystem, direction: Direction) -> RegisterId {
    let offset = match direction {
        Direction::Capture => 0x1,
        Direction::Playout => 0x2,
    };
    RegisterId(AUDIO_BASE + audio.index() as u32 * AUDIO_STRIDE + offset)
}
