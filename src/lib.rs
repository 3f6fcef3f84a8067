//! Frame circulation for video capture and playout devices
//!
//! The engine keeps a ring of device frame buffers per channel moving in step with the
//! vertical interrupt, tracks which slots hold data for the host or the hardware, and
//! moves frames, audio, ancillary data and timecode with blocking transfers.
//!
//! ```
//! use framecirc::driver::MemoryDevice;
//! use framecirc::{Channel, CirculateDescriptor, Config, Device, HostBuffers, Interrupt};
//! use std::sync::Arc;
//!
//! let dev = Device::new(Arc::new(MemoryDevice::new(16, 256)), Config::new(16, 256));
//! let ch1 = Channel::new(1).unwrap();
//! dev.init(CirculateDescriptor::capture(ch1, 4)).unwrap();
//! dev.start(ch1, None).unwrap();
//!
//! for _ in 0..3 {
//!     dev.vertical_interrupt(Interrupt::new(ch1)).unwrap();
//! }
//!
//! let mut frame = vec![0u8; 256];
//! let status = dev.transfer(ch1, &mut HostBuffers::new(&mut frame)).unwrap();
//! assert_eq!(status.frame, 0);
//! assert_eq!(status.buffer_level, 1);
//! ```

mod channel;
pub use channel::{Channel, Direction, MAX_CHANNELS};

mod config;
pub use config::{Config, TICK_TIMEOUT};

mod descriptor;
pub use descriptor::{AudioSystem, CirculateDescriptor, FrameRange, Frames, Options};
pub use descriptor::MAX_AUDIO_SYSTEMS;

mod error;
pub use error::{Error, Result};

mod pool;
pub use pool::FramePool;

mod timecode;
pub use timecode::Timecode;

pub mod circulate;
pub use circulate::{CirculateStatus, Device, FrameStamp, HostBuffers, State, TransferStatus};
pub use circulate::{FrameSlot, Interrupt, InterruptSender, SlotRole, Synchronizer};

pub mod driver;

pub mod io;
