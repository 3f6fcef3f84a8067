use std::io;

use thiserror::Error;

use crate::channel::Channel;
use crate::circulate::State;
use crate::descriptor::FrameRange;

/// Errors reported by the circulation engine
///
/// Dropped frames are not errors; they are counted and reported through
/// [`CirculateStatus`](crate::CirculateStatus).
#[derive(Error, Debug)]
pub enum Error {
    #[error("{channel}: {op} is not legal while {state}")]
    InvalidState {
        channel: Channel,
        state: State,
        op: &'static str,
    },
    #[error("no block of {requested} contiguous free frames")]
    ResourceExhausted { requested: u32 },
    #[error("frames {requested} overlap the frames reserved by {owner}")]
    Overlap { requested: FrameRange, owner: Channel },
    #[error("frame {frame} is outside of {range}")]
    OutOfRange { frame: u32, range: FrameRange },
    #[error("{what} buffer holds {actual} bytes, {needed} needed")]
    BufferTooSmall {
        what: &'static str,
        needed: usize,
        actual: usize,
    },
    #[error("operation aborted by a hard stop")]
    Aborted,
    #[error("{0} is not circulating")]
    NotCirculating(Channel),
    #[error("timed out waiting for the device")]
    Timeout,
    #[error("{channel} is driven by the channel group of {leader}")]
    Grouped { channel: Channel, leader: Channel },
    #[error("{0} has no configured signal path")]
    NotRouted(Channel),
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(&'static str),
    #[error("device I/O failed: {0}")]
    DeviceIo(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
