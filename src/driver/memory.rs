use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::{io, thread, time::Duration, time::Instant};

use crate::channel::{Channel, MAX_CHANNELS};
use crate::driver::{Driver, RegisterId};

#[derive(Default)]
struct Faults {
    /// Number of upcoming DMA calls that fail
    fail_dma: u32,
    /// Time each DMA call takes
    dma_latency: Duration,
}

/// Device backed by host memory
///
/// Frame buffers are allocated on first touch. Registers read as zero until written.
/// Interrupts are raised by hand, which makes the device useful for tests and for
/// driving the engine from a software clock.
pub struct MemoryDevice {
    frame_count: u32,
    frame_size: usize,

    registers: Mutex<HashMap<RegisterId, u32>>,
    frames: Mutex<HashMap<u32, Vec<u8>>>,
    faults: Mutex<Faults>,

    pending: Mutex<[u64; MAX_CHANNELS]>,
    raised: Condvar,
}

impl MemoryDevice {
    /// Returns a device with `frame_count` frame buffers of `frame_size` bytes
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::driver::{Driver, MemoryDevice};
    ///
    /// let dev = MemoryDevice::new(16, 1024);
    /// dev.dma_from_host(3, 0, &[1, 2, 3]).unwrap();
    /// let mut back = [0u8; 3];
    /// dev.dma_to_host(3, 0, &mut back).unwrap();
    /// assert_eq!(back, [1, 2, 3]);
    /// ```
    pub fn new(frame_count: u32, frame_size: usize) -> Self {
        MemoryDevice {
            frame_count,
            frame_size,
            registers: Mutex::new(HashMap::new()),
            frames: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            pending: Mutex::new([0; MAX_CHANNELS]),
            raised: Condvar::new(),
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Current value of a register
    pub fn register(&self, reg: RegisterId) -> u32 {
        self.registers.lock().get(&reg).copied().unwrap_or(0)
    }

    /// Sets a register as the hardware would
    pub fn set_register(&self, reg: RegisterId, value: u32) {
        self.registers.lock().insert(reg, value);
    }

    /// Copy of a whole frame buffer
    pub fn frame(&self, frame: u32) -> Vec<u8> {
        self.frames
            .lock()
            .get(&frame)
            .cloned()
            .unwrap_or_else(|| vec![0; self.frame_size])
    }

    /// Fills a frame buffer region as the hardware would
    pub fn fill_frame(&self, frame: u32, offset: usize, data: &[u8]) -> io::Result<()> {
        self.check(frame, offset, data.len())?;
        let mut frames = self.frames.lock();
        let buf = frames
            .entry(frame)
            .or_insert_with(|| vec![0; self.frame_size]);
        buf[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Makes the next `count` DMA calls fail
    pub fn fail_next_dma(&self, count: u32) {
        self.faults.lock().fail_dma = count;
    }

    /// Makes every DMA call take at least `latency`
    pub fn set_dma_latency(&self, latency: Duration) {
        self.faults.lock().dma_latency = latency;
    }

    /// Signals a vertical interrupt on `channel`
    pub fn raise_interrupt(&self, channel: Channel) {
        self.pending.lock()[channel.index()] += 1;
        self.raised.notify_all();
    }

    fn check(&self, frame: u32, offset: usize, len: usize) -> io::Result<()> {
        if frame >= self.frame_count {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame {} beyond {} frame buffers", frame, self.frame_count),
            ));
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.frame_size => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} bytes at offset {} overrun the frame", len, offset),
            )),
        }
    }

    fn dma_begin(&self) -> io::Result<()> {
        let latency = {
            let mut faults = self.faults.lock();
            if faults.fail_dma > 0 {
                faults.fail_dma -= 1;
                return Err(io::Error::new(io::ErrorKind::Other, "DMA engine fault"));
            }
            faults.dma_latency
        };

        if latency > Duration::from_secs(0) {
            thread::sleep(latency);
        }
        Ok(())
    }
}

impl Driver for MemoryDevice {
    fn read_register(&self, reg: RegisterId) -> io::Result<u32> {
        Ok(self.register(reg))
    }

    fn write_register(&self, reg: RegisterId, value: u32) -> io::Result<()> {
        self.set_register(reg, value);
        Ok(())
    }

    fn dma_to_host(&self, frame: u32, offset: usize, host: &mut [u8]) -> io::Result<()> {
        self.check(frame, offset, host.len())?;
        self.dma_begin()?;

        let frames = self.frames.lock();
        match frames.get(&frame) {
            Some(buf) => host.copy_from_slice(&buf[offset..offset + host.len()]),
            None => host.iter_mut().for_each(|b| *b = 0),
        }
        Ok(())
    }

    fn dma_from_host(&self, frame: u32, offset: usize, host: &[u8]) -> io::Result<()> {
        self.check(frame, offset, host.len())?;
        self.dma_begin()?;
        self.fill_frame(frame, offset, host)
    }

    fn wait_for_interrupt(&self, channel: Channel, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut pending = self.pending.lock();
        loop {
            if pending[channel.index()] > 0 {
                pending[channel.index()] -= 1;
                return Ok(true);
            }
            if self.raised.wait_until(&mut pending, deadline).timed_out() {
                return Ok(false);
            }
        }
    }
}
