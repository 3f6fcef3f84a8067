use std::fmt;
use std::time::Instant;

use crate::channel::{Channel, Direction};
use crate::circulate::{ChannelState, Device, FrameSlot, State};
use crate::descriptor::{AudioSystem, FrameRange, Options};
use crate::error::{Error, Result};
use crate::timecode::Timecode;

/// Per-frame record kept for every slot of a circulating channel
///
/// Refreshed by the interrupt handler when the device moves onto or off the slot, and by
/// playout transfers that fill it.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStamp {
    /// Device frame buffer index
    pub frame: u32,
    /// Tick sequence number of the interrupt that made this frame active
    pub sequence: u64,
    /// When that interrupt fired
    pub timestamp: Option<Instant>,
    /// Audio ring byte offset where the audio of this frame begins
    pub audio_start: u32,
    /// Audio ring byte offset where the audio of this frame ends
    pub audio_end: u32,
    /// RP188 timecode captured with or played out with this frame
    pub timecode: Option<Timecode>,
    pub ltc: Option<Timecode>,
    /// Number of extra intervals this frame stayed on air because the next was missing
    pub repeats: u32,
    /// Opaque value a playout transfer attached to this frame
    pub user_cookie: u64,
}

impl FrameStamp {
    pub fn new(frame: u32) -> Self {
        FrameStamp {
            frame,
            sequence: 0,
            timestamp: None,
            audio_start: 0,
            audio_end: 0,
            timecode: None,
            ltc: None,
            repeats: 0,
            user_cookie: 0,
        }
    }

    /// Audio bytes between the start and end offsets of a ring of `ring_size` bytes
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::FrameStamp;
    ///
    /// let mut stamp = FrameStamp::new(0);
    /// stamp.audio_start = 900;
    /// stamp.audio_end = 100;
    /// assert_eq!(stamp.audio_bytes(1000), 200);
    /// ```
    pub fn audio_bytes(&self, ring_size: usize) -> usize {
        let (start, end) = (self.audio_start as usize, self.audio_end as usize);
        if end >= start {
            end - start
        } else {
            ring_size - start + end
        }
    }
}

impl fmt::Display for FrameStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} seq {} audio {}..{} tc {}",
            self.frame,
            self.sequence,
            self.audio_start,
            self.audio_end,
            self.timecode.unwrap_or_default()
        )?;
        if self.repeats > 0 {
            write!(f, " repeated {}x", self.repeats)?;
        }
        Ok(())
    }
}

/// Point-in-time view of a channel
#[derive(Debug, Clone, PartialEq)]
pub struct CirculateStatus {
    pub channel: Channel,
    pub direction: Option<Direction>,
    pub state: State,
    pub range: Option<FrameRange>,
    /// Frame the device is currently writing or presenting
    pub active_frame: Option<u32>,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    /// Captured frames waiting for the host, or queued frames waiting for the device
    pub buffer_level: u32,
    /// Slots a transfer could use right now
    pub available: u32,
    /// Sequence number of the latest tick
    pub tick: u64,
    pub audio: Option<AudioSystem>,
    pub options: Options,
    pub start_time: Option<Instant>,
    /// Cookie of the frame on air (playout)
    pub user_cookie: u64,
}

impl CirculateStatus {
    fn disabled(channel: Channel) -> Self {
        CirculateStatus {
            channel,
            direction: None,
            state: State::Disabled,
            range: None,
            active_frame: None,
            frames_processed: 0,
            frames_dropped: 0,
            buffer_level: 0,
            available: 0,
            tick: 0,
            audio: None,
            options: Options::empty(),
            start_time: None,
            user_cookie: 0,
        }
    }

    pub(crate) fn snapshot(st: &ChannelState) -> Self {
        let (desc, ring) = match (st.descriptor.as_ref(), st.ring.as_ref()) {
            (Some(desc), Some(ring)) if st.state != State::Disabled => (desc, ring),
            _ => {
                let mut status = CirculateStatus::disabled(st.channel);
                status.tick = st.tick_seq;
                return status;
            }
        };

        let active_frame = ring.active();
        CirculateStatus {
            channel: st.channel,
            direction: Some(desc.direction),
            state: st.state,
            range: Some(ring.range()),
            active_frame,
            frames_processed: st.processed,
            frames_dropped: st.dropped,
            buffer_level: ring.level(),
            available: ring.available(),
            tick: st.tick_seq,
            audio: desc.audio,
            options: desc.options,
            start_time: st.start_time,
            user_cookie: match (desc.direction, active_frame) {
                (Direction::Playout, Some(frame)) => ring.slot(frame).stamp.user_cookie,
                _ => 0,
            },
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// Whether the host has fallen behind the device at least once
    pub fn has_dropped(&self) -> bool {
        self.frames_dropped > 0
    }
}

impl fmt::Display for CirculateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.channel, self.state)?;
        if let (Some(direction), Some(range)) = (self.direction, self.range) {
            write!(f, " {} {}", direction, range)?;
        }
        if let Some(frame) = self.active_frame {
            write!(f, " active {}", frame)?;
        }
        write!(
            f,
            " processed {} dropped {} level {}",
            self.frames_processed, self.frames_dropped, self.buffer_level
        )
    }
}

impl Device {
    /// Snapshot of `channel`, computed from its slots and counters
    ///
    /// A disabled channel reports a disabled snapshot.
    pub fn status(&self, channel: Channel) -> CirculateStatus {
        CirculateStatus::snapshot(&self.lock(channel))
    }

    /// Frame stamp of `frame` in the ring of `channel`
    pub fn frame_stamp(&self, channel: Channel, frame: u32) -> Result<FrameStamp> {
        let st = self.lock(channel);
        let ring = match st.ring.as_ref() {
            Some(ring) if st.state != State::Disabled => ring,
            _ => return Err(Error::NotCirculating(channel)),
        };
        if !ring.range().contains(frame) {
            return Err(Error::OutOfRange {
                frame,
                range: ring.range(),
            });
        }
        Ok(ring.slot(frame).stamp.clone())
    }

    /// Copy of every frame slot of `channel`, in frame order
    pub fn slots(&self, channel: Channel) -> Result<Vec<FrameSlot>> {
        let st = self.lock(channel);
        match st.ring.as_ref() {
            Some(ring) if st.state != State::Disabled => Ok(ring.slots().to_vec()),
            _ => Err(Error::NotCirculating(channel)),
        }
    }
}
