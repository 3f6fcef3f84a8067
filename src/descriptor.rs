use bitflags::bitflags;
use std::fmt;

use crate::channel::{Channel, Direction, MAX_CHANNELS};
use crate::error::{Error, Result};

/// Number of audio systems a device can expose
pub const MAX_AUDIO_SYSTEMS: u8 = 8;

bitflags! {
    /// Circulation options captured at init time
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Options: u32 {
        /// Capture or play RP188 timecode with every frame
        const RP188             = 0x0000_0001;
        /// Capture or play analog LTC with every frame
        const LTC               = 0x0000_0002;
        /// Move ancillary data regions together with the video
        const ANC               = 0x0000_0004;
        /// Field-based circulation
        const FIELDS            = 0x0000_0008;
        /// Move HDMI auxiliary data
        const HDMI_AUX          = 0x0000_0010;
        /// The client starts and stops audio itself
        const AUDIO_CONTROL     = 0x0000_0020;
        /// Frame buffer format may change per frame
        const FBF_CHANGE        = 0x0000_0040;
        /// Frame buffer orientation may change per frame
        const FBO_CHANGE        = 0x0000_0080;
        /// Color correction tables may change per frame
        const COLOR_CORRECT     = 0x0000_0100;
        /// Video processing settings may change per frame
        const VID_PROC          = 0x0000_0200;
        /// Multi-link audio on the next audio systems
        const MULTILINK_AUDIO1  = 0x0000_1000;
        const MULTILINK_AUDIO2  = 0x0000_2000;
        const MULTILINK_AUDIO3  = 0x0000_4000;
    }
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Audio system associated with a circulating channel, numbered from 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioSystem(u8);

impl AudioSystem {
    pub fn new(number: u8) -> Option<Self> {
        if number >= 1 && number <= MAX_AUDIO_SYSTEMS {
            Some(AudioSystem(number))
        } else {
            None
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl fmt::Display for AudioSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudSys{}", self.0)
    }
}

/// Inclusive range of device frame buffer indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRange {
    pub start: u32,
    pub end: u32,
}

impl FrameRange {
    /// Returns a frame range
    ///
    /// # Arguments
    ///
    /// * `start` - First frame index
    /// * `end` - Last frame index (inclusive)
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::FrameRange;
    /// let range = FrameRange::new(4, 10).unwrap();
    /// assert_eq!(range.count(), 7);
    /// assert!(FrameRange::new(10, 4).is_none());
    /// ```
    pub fn new(start: u32, end: u32) -> Option<Self> {
        if end >= start {
            Some(FrameRange { start, end })
        } else {
            None
        }
    }

    /// Returns the range of `count` frames beginning at `start`
    pub fn with_count(start: u32, count: u32) -> Option<Self> {
        if count == 0 {
            return None;
        }
        FrameRange::new(start, start.checked_add(count - 1)?)
    }

    pub fn count(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, frame: u32) -> bool {
        frame >= self.start && frame <= self.end
    }

    pub fn overlaps(&self, other: &FrameRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Frame following `frame`, wrapping at the end of the range
    pub fn next(&self, frame: u32) -> u32 {
        if frame >= self.end {
            self.start
        } else {
            frame + 1
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "frame {}", self.start)
        } else {
            write!(f, "frames {}-{}", self.start, self.end)
        }
    }
}

/// How the frame slots of a channel are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frames {
    /// Let the pool find `count` contiguous free frames
    Count(u32),
    /// Use exactly these frames
    Explicit(FrameRange),
}

/// Configuration of one circulation session
///
/// Captured by `Device::init` and left untouched until the channel stops.
#[derive(Debug, Clone, PartialEq)]
pub struct CirculateDescriptor {
    pub channel: Channel,
    pub direction: Direction,
    pub frames: Frames,
    pub audio: Option<AudioSystem>,
    /// Number of channels locked together, starting at `channel`
    pub group: u8,
    pub options: Options,
    /// Video bytes moved per frame; zero means the whole device frame minus anc regions
    pub video_size: usize,
    /// Largest audio payload per frame the host buffers must hold
    pub max_audio_bytes: usize,
    /// Ancillary region sizes for field 1 and field 2
    pub anc_sizes: (usize, usize),
}

impl CirculateDescriptor {
    /// Returns a capture descriptor with the given number of pool-allocated frames
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::{AudioSystem, Channel, CirculateDescriptor, Options};
    ///
    /// let desc = CirculateDescriptor::capture(Channel::new(1).unwrap(), 7)
    ///     .with_audio(AudioSystem::new(1).unwrap())
    ///     .with_options(Options::RP188);
    /// assert!(desc.validate(64).is_ok());
    /// ```
    pub fn capture(channel: Channel, count: u32) -> Self {
        Self::with_direction(channel, Direction::Capture, count)
    }

    /// Returns a playout descriptor with the given number of pool-allocated frames
    pub fn playout(channel: Channel, count: u32) -> Self {
        Self::with_direction(channel, Direction::Playout, count)
    }

    fn with_direction(channel: Channel, direction: Direction, count: u32) -> Self {
        CirculateDescriptor {
            channel,
            direction,
            frames: Frames::Count(count),
            audio: None,
            group: 1,
            options: Options::empty(),
            video_size: 0,
            max_audio_bytes: 0,
            anc_sizes: (0, 0),
        }
    }

    /// Uses an explicit frame range instead of a pool-allocated one
    pub fn with_range(mut self, range: FrameRange) -> Self {
        self.frames = Frames::Explicit(range);
        self
    }

    pub fn with_audio(mut self, audio: AudioSystem) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_group(mut self, group: u8) -> Self {
        self.group = group;
        self
    }

    pub fn with_video_size(mut self, bytes: usize) -> Self {
        self.video_size = bytes;
        self
    }

    pub fn with_max_audio_bytes(mut self, bytes: usize) -> Self {
        self.max_audio_bytes = bytes;
        self
    }

    pub fn with_anc_sizes(mut self, field1: usize, field2: usize) -> Self {
        self.anc_sizes = (field1, field2);
        self
    }

    /// Channels driven together by this session
    pub fn channels(&self) -> impl Iterator<Item = Channel> {
        let first = self.channel.index();
        (first..first + self.group as usize).filter_map(Channel::from_index)
    }

    /// Checks the descriptor against a pool of `capacity` frames
    pub fn validate(&self, capacity: u32) -> Result<()> {
        if self.group == 0 || self.group as usize > MAX_CHANNELS {
            return Err(Error::InvalidDescriptor("grouped channel count must be 1-8"));
        }
        if self.channel.index() + self.group as usize > MAX_CHANNELS {
            return Err(Error::InvalidDescriptor("channel group runs past the last channel"));
        }

        match self.frames {
            Frames::Count(0) => Err(Error::InvalidDescriptor("zero frames requested")),
            Frames::Count(1) => Err(Error::InvalidDescriptor("at least 2 frames are needed")),
            Frames::Count(count) if count > capacity => {
                Err(Error::ResourceExhausted { requested: count })
            }
            Frames::Count(_) => Ok(()),
            Frames::Explicit(range) => {
                if range.count() < 2 {
                    return Err(Error::InvalidDescriptor("at least 2 frames are needed"));
                }
                if range.end >= capacity {
                    return Err(Error::OutOfRange {
                        frame: range.end,
                        range: FrameRange {
                            start: 0,
                            end: capacity.saturating_sub(1),
                        },
                    });
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(n: u8) -> Channel {
        Channel::new(n).unwrap()
    }

    #[test]
    fn range_wraps() {
        let range = FrameRange::new(3, 5).unwrap();
        assert_eq!(range.next(3), 4);
        assert_eq!(range.next(5), 3);
        assert!(range.overlaps(&FrameRange::new(5, 9).unwrap()));
        assert!(!range.overlaps(&FrameRange::new(6, 9).unwrap()));
        assert_eq!(FrameRange::with_count(3, 3), Some(range));
        assert_eq!(FrameRange::with_count(3, 0), None);
    }

    #[test]
    fn group_must_fit() {
        let desc = CirculateDescriptor::capture(ch(7), 4).with_group(2);
        assert!(desc.validate(32).is_ok());
        assert_eq!(desc.channels().collect::<Vec<_>>(), vec![ch(7), ch(8)]);

        let desc = CirculateDescriptor::capture(ch(7), 4).with_group(3);
        assert!(matches!(desc.validate(32), Err(Error::InvalidDescriptor(_))));
        let desc = CirculateDescriptor::capture(ch(1), 4).with_group(0);
        assert!(matches!(desc.validate(32), Err(Error::InvalidDescriptor(_))));
    }

    #[test]
    fn frame_counts() {
        let single = CirculateDescriptor::playout(ch(1), 1);
        assert!(matches!(single.validate(32), Err(Error::InvalidDescriptor(_))));

        let none = CirculateDescriptor::playout(ch(1), 0);
        assert!(matches!(none.validate(32), Err(Error::InvalidDescriptor(_))));

        let beyond = CirculateDescriptor::playout(ch(1), 0)
            .with_range(FrameRange::new(30, 40).unwrap());
        assert!(matches!(beyond.validate(32), Err(Error::OutOfRange { frame: 40, .. })));

        let huge = CirculateDescriptor::playout(ch(1), 33);
        assert!(matches!(
            huge.validate(32),
            Err(Error::ResourceExhausted { requested: 33 })
        ));
    }
}
