use crate::circulate::{HostBuffers, TransferStatus};
use crate::error::Result;

/// Streaming I/O
pub trait Stream {
    /// Start circulating
    fn start(&mut self) -> Result<()>;

    /// Stop circulating, frees all frame slots
    fn stop(&mut self) -> Result<()>;
}

pub trait CaptureStream: Stream {
    /// Fetch the oldest captured frame into `buffers`.
    /// Circulation is started first if necessary.
    fn next(&mut self, buffers: &mut HostBuffers<'_>) -> Result<TransferStatus>;
}

pub trait OutputStream: Stream {
    /// Queue the frame held by `buffers` for playout.
    /// Circulation starts once enough frames are queued.
    fn next(&mut self, buffers: &mut HostBuffers<'_>) -> Result<TransferStatus>;
}
