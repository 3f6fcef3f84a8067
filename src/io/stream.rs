use log::warn;
use std::time::Duration;

use crate::channel::{Channel, Direction};
use crate::circulate::{CirculateStatus, Device, HostBuffers, TransferStatus};
use crate::descriptor::{CirculateDescriptor, FrameRange};
use crate::error::{Error, Result};
use crate::io::traits::{CaptureStream, OutputStream, Stream as StreamTrait};

/// Stream of frames through one channel
///
/// The channel is initialized when the stream is created and stopped when it is dropped.
pub struct Stream {
    device: Device,
    channel: Channel,
    direction: Direction,
    range: FrameRange,
    /// Frames queued before an output stream starts
    preroll: u32,
    /// How long a graceful stop may take before it turns into an abort
    stop_timeout: Duration,

    active: bool,
}

impl Stream {
    /// Returns a stream for the session described by `desc`
    ///
    /// # Arguments
    ///
    /// * `dev` - Engine driving the channel
    /// * `desc` - Session to initialize
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::driver::MemoryDevice;
    /// use framecirc::io::traits::OutputStream;
    /// use framecirc::io::Stream;
    /// use framecirc::{Channel, CirculateDescriptor, Config, Device, HostBuffers, State};
    /// use std::sync::Arc;
    ///
    /// let dev = Device::new(Arc::new(MemoryDevice::new(8, 64)), Config::new(8, 64));
    /// let ch2 = Channel::new(2).unwrap();
    /// let mut stream = Stream::new(&dev, CirculateDescriptor::playout(ch2, 3))
    ///     .unwrap()
    ///     .with_preroll(2);
    ///
    /// let mut frame = vec![0u8; 64];
    /// stream.next(&mut HostBuffers::new(&mut frame)).unwrap();
    /// assert_eq!(dev.state(ch2), State::Initializing);
    /// stream.next(&mut HostBuffers::new(&mut frame)).unwrap();
    /// assert_eq!(dev.state(ch2), State::Starting);
    /// ```
    pub fn new(dev: &Device, desc: CirculateDescriptor) -> Result<Self> {
        let channel = desc.channel;
        let direction = desc.direction;
        let range = dev.init(desc)?;

        Ok(Stream {
            device: dev.clone(),
            channel,
            direction,
            range,
            preroll: 1,
            stop_timeout: dev.config().tick_timeout,
            active: false,
        })
    }

    /// Sets how many frames an output stream queues before it starts
    pub fn with_preroll(mut self, frames: u32) -> Self {
        self.preroll = frames.max(1).min(self.range.count());
        self
    }

    pub fn set_stop_timeout(&mut self, timeout: Duration) {
        self.stop_timeout = timeout;
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Frame slots reserved for the stream
    pub fn range(&self) -> FrameRange {
        self.range
    }

    pub fn status(&self) -> CirculateStatus {
        self.device.status(self.channel)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Err(e) = self.device.stop(self.channel, true) {
            warn!("{}: stop on drop failed: {}", self.channel, e);
        }
    }
}

impl StreamTrait for Stream {
    fn start(&mut self) -> Result<()> {
        self.device.start(self.channel, None)?;
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.device.stop_wait(self.channel, self.stop_timeout)?;
        self.active = false;
        Ok(())
    }
}

impl CaptureStream for Stream {
    fn next(&mut self, buffers: &mut HostBuffers<'_>) -> Result<TransferStatus> {
        if self.direction != Direction::Capture {
            return Err(Error::InvalidDescriptor("not a capture stream"));
        }
        if !self.active {
            self.start()?;
        }
        self.device.transfer(self.channel, buffers)
    }
}

impl OutputStream for Stream {
    fn next(&mut self, buffers: &mut HostBuffers<'_>) -> Result<TransferStatus> {
        if self.direction != Direction::Playout {
            return Err(Error::InvalidDescriptor("not an output stream"));
        }
        let status = self.device.transfer(self.channel, buffers)?;

        // Only start once the host has queued enough frames to ride out the first ticks.
        if !self.active && status.buffer_level >= self.preroll {
            self.start()?;
        }
        Ok(status)
    }
}
