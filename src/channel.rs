use std::convert::TryFrom;
use std::fmt;

use crate::error::Error;

/// Number of independent frame-store pipelines on a device
pub const MAX_CHANNELS: usize = 8;

/// One frame-store pipeline, numbered from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(u8);

impl Channel {
    /// Returns a channel by its one-based number
    ///
    /// # Arguments
    ///
    /// * `number` - Channel number in `1..=8`
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::Channel;
    /// let ch = Channel::new(1).unwrap();
    /// assert_eq!(ch.index(), 0);
    /// assert!(Channel::new(9).is_none());
    /// ```
    pub fn new(number: u8) -> Option<Self> {
        if number >= 1 && number as usize <= MAX_CHANNELS {
            Some(Channel(number))
        } else {
            None
        }
    }

    /// Returns the channel for a zero-based index
    pub fn from_index(index: usize) -> Option<Self> {
        if index < MAX_CHANNELS {
            Some(Channel(index as u8 + 1))
        } else {
            None
        }
    }

    /// One-based channel number
    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-based index, used to address per-channel state and registers
    pub fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Iterates over every channel of the device
    pub fn all() -> impl Iterator<Item = Channel> {
        (1..=MAX_CHANNELS as u8).map(Channel)
    }
}

impl TryFrom<u8> for Channel {
    type Error = Error;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Channel::new(number).ok_or(Error::InvalidDescriptor("channel must be in 1..=8"))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ch{}", self.0)
    }
}

/// Direction of frame movement for a circulating channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device writes frames, host reads them
    Capture,
    /// Host writes frames, device presents them
    Playout,
}

impl Direction {
    pub fn is_capture(self) -> bool {
        self == Direction::Capture
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Direction::Capture => write!(f, "input"),
            Direction::Playout => write!(f, "output"),
        }
    }
}
