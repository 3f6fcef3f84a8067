use std::time::Duration;

/// Ceiling for a single vertical interrupt wait; every supported format ticks faster
pub const TICK_TIMEOUT: Duration = Duration::from_millis(50);

/// Device geometry and engine tuning
///
/// # Example
///
/// ```
/// use framecirc::Config;
/// use std::time::Duration;
///
/// let config = Config::new(64, 8 * 1024 * 1024)
///     .with_audio_systems(2)
///     .with_transfer_timeout(Duration::from_millis(40));
/// assert_eq!(config.pool_capacity(), 62);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Frame buffers on the device
    pub frame_count: u32,
    /// Bytes per device frame buffer
    pub frame_size: usize,
    /// Audio rings parked in the topmost frame buffers
    pub audio_systems: u8,
    /// Bytes per audio ring, clamped to `frame_size`
    pub audio_buffer_size: usize,
    pub tick_timeout: Duration,
    /// How long a transfer waits for a usable slot
    pub transfer_timeout: Duration,
    pub interrupt_queue_depth: usize,
    /// DMA is issued in chunks of this many bytes, the unit of abort latency
    pub dma_segment_size: usize,
}

impl Config {
    pub fn new(frame_count: u32, frame_size: usize) -> Self {
        Config {
            frame_count,
            frame_size,
            audio_systems: 1,
            audio_buffer_size: 4 * 1024 * 1024,
            tick_timeout: TICK_TIMEOUT,
            transfer_timeout: Duration::from_millis(100),
            interrupt_queue_depth: 4,
            dma_segment_size: 1024 * 1024,
        }
    }

    pub fn with_audio_systems(mut self, count: u8) -> Self {
        self.audio_systems = count;
        self
    }

    pub fn with_audio_buffer_size(mut self, bytes: usize) -> Self {
        self.audio_buffer_size = bytes;
        self
    }

    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = timeout;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    pub fn with_interrupt_queue_depth(mut self, depth: usize) -> Self {
        self.interrupt_queue_depth = depth;
        self
    }

    pub fn with_dma_segment_size(mut self, bytes: usize) -> Self {
        self.dma_segment_size = bytes;
        self
    }

    /// Frames available to the slot allocator
    pub fn pool_capacity(&self) -> u32 {
        self.frame_count.saturating_sub(self.audio_systems as u32)
    }

    pub fn audio_ring_size(&self) -> usize {
        self.audio_buffer_size.min(self.frame_size)
    }

    /// Frame buffer holding the ring of the audio system with zero-based `index`
    ///
    /// `None` when no such ring is configured or the device has too few frame buffers.
    pub fn audio_frame(&self, index: usize) -> Option<u32> {
        if index >= self.audio_systems as usize {
            return None;
        }
        self.frame_count.checked_sub(1)?.checked_sub(index as u32)
    }
}
