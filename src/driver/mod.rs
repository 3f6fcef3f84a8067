use std::{io, time::Duration};

use crate::channel::{Channel, Direction};
use crate::timecode::Timecode;

pub mod memory;
pub use memory::MemoryDevice;

pub mod register;
pub use register::RegisterId;

/// Register and DMA access to a device
///
/// This is the only way the circulation engine touches hardware. Implementations own no
/// ring-buffer state; they move register values and frame bytes and report interrupts.
pub trait Driver: Send + Sync {
    /// Reads a whole register value
    fn read_register(&self, reg: RegisterId) -> io::Result<u32>;

    /// Writes a whole register value
    fn write_register(&self, reg: RegisterId, value: u32) -> io::Result<()>;

    /// Copies `host.len()` bytes from device frame `frame` at byte `offset` into `host`
    fn dma_to_host(&self, frame: u32, offset: usize, host: &mut [u8]) -> io::Result<()>;

    /// Copies `host` into device frame `frame` at byte `offset`
    fn dma_from_host(&self, frame: u32, offset: usize, host: &[u8]) -> io::Result<()>;

    /// Blocks until the next vertical interrupt of `channel`
    ///
    /// Returns `false` if `timeout` elapsed first.
    fn wait_for_interrupt(&self, channel: Channel, timeout: Duration) -> io::Result<bool>;
}

/// Signal routing, consulted once before a channel starts circulating
pub trait Router: Send + Sync {
    /// Whether the widget path feeding (capture) or fed by (playout) `channel` is connected
    fn is_routed(&self, channel: Channel, direction: Direction) -> bool;
}

pub(crate) fn read_timecode(driver: &dyn Driver, regs: &[RegisterId]) -> io::Result<Timecode> {
    match *regs {
        [dbb, low, high] => Ok(Timecode::new(
            driver.read_register(dbb)?,
            driver.read_register(low)?,
            driver.read_register(high)?,
        )),
        [low, high] => Ok(Timecode::new(
            0,
            driver.read_register(low)?,
            driver.read_register(high)?,
        )),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "timecode needs two or three registers",
        )),
    }
}

pub(crate) fn write_timecode(driver: &dyn Driver, regs: &[RegisterId], tc: &Timecode) -> io::Result<()> {
    match *regs {
        [dbb, low, high] => {
            driver.write_register(dbb, tc.dbb)?;
            driver.write_register(low, tc.low)?;
            driver.write_register(high, tc.high)
        }
        [low, high] => {
            driver.write_register(low, tc.low)?;
            driver.write_register(high, tc.high)
        }
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "timecode needs two or three registers",
        )),
    }
}
