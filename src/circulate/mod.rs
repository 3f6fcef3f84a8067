//! Frame circulation engine
//!
//! A [`Device`] owns one state machine per channel. Clients drive the lifecycle with
//! [`Device::init`], [`Device::start`], [`Device::pause`], [`Device::resume`] and
//! [`Device::stop`], move frames with [`Device::transfer`] and observe progress through
//! [`Device::status`]. Vertical interrupts reach the engine through
//! [`Device::vertical_interrupt`], usually fed by a [`Synchronizer`].

use log::{info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::{Channel, Direction};
use crate::config::Config;
use crate::descriptor::{CirculateDescriptor, FrameRange, Frames, Options};
use crate::driver::{register, Driver, Router};
use crate::error::{Error, Result};
use crate::pool::FramePool;

pub mod ring;
pub use ring::{FrameSlot, SlotRole};

pub mod stamp;
pub use stamp::{CirculateStatus, FrameStamp};

pub mod state;
pub use state::State;
use state::Pending;

pub mod transfer;
pub use transfer::{HostBuffers, TransferStatus};

pub mod vbi;
pub use vbi::{Interrupt, InterruptSender, Synchronizer};

use ring::Ring;

/// Everything a channel knows about its current session
pub(crate) struct ChannelState {
    pub channel: Channel,
    pub state: State,
    pub pending: Option<Pending>,
    pub descriptor: Option<CirculateDescriptor>,
    pub ring: Option<Ring>,
    /// Frame the device moves to at the next tick instead of its natural successor
    pub redirect: Option<u32>,
    /// Leader of the channel group this channel is slaved to
    pub claimed_by: Option<Channel>,

    pub processed: u64,
    pub dropped: u64,
    /// Ticks that moved the ring; numbers the frame stamps
    pub tick_seq: u64,
    /// Every interrupt observed, whatever the state
    pub vbi_count: u64,
    pub last_irq: Option<u64>,

    /// Bumped whenever the slot ring is replaced or torn down
    pub session: u64,
    pub abort: Arc<AtomicBool>,
    pub aborts: u64,

    pub deadline: Option<Instant>,
    pub start_time: Option<Instant>,
    /// Next byte of the audio ring a playout transfer writes
    pub audio_offset: u32,
}

impl ChannelState {
    fn new(channel: Channel) -> Self {
        ChannelState {
            channel,
            state: State::Disabled,
            pending: None,
            descriptor: None,
            ring: None,
            redirect: None,
            claimed_by: None,
            processed: 0,
            dropped: 0,
            tick_seq: 0,
            vbi_count: 0,
            last_irq: None,
            session: 0,
            abort: Arc::new(AtomicBool::new(false)),
            aborts: 0,
            deadline: None,
            start_time: None,
            audio_offset: 0,
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        self.descriptor.as_ref().map(|desc| desc.direction)
    }

    fn invalid(&self, op: &'static str) -> Error {
        Error::InvalidState {
            channel: self.channel,
            state: self.state,
            op,
        }
    }

    fn expect_state(&self, op: &'static str, legal: &[State]) -> Result<()> {
        if legal.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(op))
        }
    }
}

pub(crate) struct ChannelCell {
    pub state: Mutex<ChannelState>,
    /// Signalled after every interrupt and every state change
    pub tick: Condvar,
    /// Serializes transfers of one channel; held across DMA, unlike `state`
    pub transfer: Mutex<()>,
}

pub(crate) struct Shared {
    pub driver: Arc<dyn Driver>,
    pub router: Option<Box<dyn Router>>,
    pub config: Config,
    pub pool: FramePool,
    pub channels: Vec<ChannelCell>,
}

/// Circulation engine of one device
///
/// Cloning is cheap; all clones drive the same channels.
#[derive(Clone)]
pub struct Device {
    pub(crate) shared: Arc<Shared>,
}

impl Device {
    /// Returns an engine driving `driver`
    ///
    /// # Arguments
    ///
    /// * `driver` - Register and DMA access to the hardware
    /// * `config` - Device geometry and tuning
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::driver::MemoryDevice;
    /// use framecirc::{Channel, CirculateDescriptor, Config, Device, State};
    /// use std::sync::Arc;
    ///
    /// let config = Config::new(16, 4096);
    /// let dev = Device::new(Arc::new(MemoryDevice::new(16, 4096)), config);
    /// let ch1 = Channel::new(1).unwrap();
    ///
    /// dev.init(CirculateDescriptor::capture(ch1, 4)).unwrap();
    /// assert_eq!(dev.state(ch1), State::Initializing);
    /// dev.stop(ch1, false).unwrap();
    /// assert_eq!(dev.state(ch1), State::Disabled);
    /// ```
    pub fn new(driver: Arc<dyn Driver>, config: Config) -> Self {
        Self::build(driver, None, config)
    }

    /// Returns an engine that checks signal routing before a channel is initialized
    pub fn with_router(driver: Arc<dyn Driver>, router: Box<dyn Router>, config: Config) -> Self {
        Self::build(driver, Some(router), config)
    }

    fn build(driver: Arc<dyn Driver>, router: Option<Box<dyn Router>>, config: Config) -> Self {
        let channels = Channel::all()
            .map(|channel| ChannelCell {
                state: Mutex::new(ChannelState::new(channel)),
                tick: Condvar::new(),
                transfer: Mutex::new(()),
            })
            .collect();

        Device {
            shared: Arc::new(Shared {
                driver,
                router,
                pool: FramePool::new(config.pool_capacity()),
                config,
                channels,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.shared.driver
    }

    /// Frame slot allocator shared by all channels
    pub fn pool(&self) -> &FramePool {
        &self.shared.pool
    }

    pub(crate) fn cell(&self, channel: Channel) -> &ChannelCell {
        &self.shared.channels[channel.index()]
    }

    pub(crate) fn lock(&self, channel: Channel) -> MutexGuard<'_, ChannelState> {
        self.cell(channel).state.lock()
    }

    /// Current lifecycle state of `channel`
    pub fn state(&self, channel: Channel) -> State {
        self.lock(channel).state
    }

    /// Reserves frame slots and prepares `desc.channel` for circulation
    ///
    /// Returns the reserved frame range.
    pub fn init(&self, desc: CirculateDescriptor) -> Result<FrameRange> {
        let config = &self.shared.config;
        let channel = desc.channel;

        desc.validate(self.shared.pool.capacity())?;
        if let Some(audio) = desc.audio {
            if config.audio_frame(audio.index()).is_none() {
                return Err(Error::InvalidDescriptor(
                    "audio system has no ring configured on this device",
                ));
            }
        }
        let (anc1, anc2) = desc.anc_sizes;
        if desc.video_size + anc1 + anc2 > config.frame_size {
            return Err(Error::InvalidDescriptor(
                "video and ancillary data exceed the device frame size",
            ));
        }

        if let Some(router) = &self.shared.router {
            if let Some(unrouted) = desc
                .channels()
                .find(|&ch| !router.is_routed(ch, desc.direction))
            {
                return Err(Error::NotRouted(unrouted));
            }
        }

        let mut st = self.lock(channel);
        if let Some(leader) = st.claimed_by {
            return Err(Error::Grouped { channel, leader });
        }
        st.expect_state("init", &[State::Disabled])?;

        // grouped channels follow the leader in ascending order, so locking them here is safe
        let mut followers = Vec::new();
        for follower in desc.channels().skip(1) {
            let fst = self.lock(follower);
            if let Some(leader) = fst.claimed_by {
                return Err(Error::Grouped {
                    channel: follower,
                    leader,
                });
            }
            fst.expect_state("init", &[State::Disabled])?;
            followers.push(fst);
        }

        let range = match desc.frames {
            Frames::Count(count) => self.shared.pool.reserve(channel, count)?,
            Frames::Explicit(range) => self.shared.pool.reserve_explicit(channel, range)?,
        };

        if desc.audio.is_some() {
            let demand = range.count() as usize * desc.max_audio_bytes;
            if demand > config.audio_ring_size() {
                warn!(
                    "{}: {} need {} audio bytes, the ring holds {}",
                    channel,
                    range,
                    demand,
                    config.audio_ring_size()
                );
            }
        }

        for fst in followers.iter_mut() {
            fst.claimed_by = Some(channel);
        }
        drop(followers);

        st.session += 1;
        st.state = State::Initializing;
        st.pending = None;
        st.ring = Some(Ring::new(range, desc.direction));
        st.redirect = None;
        st.processed = 0;
        st.dropped = 0;
        st.deadline = None;
        st.start_time = None;
        st.audio_offset = 0;
        st.abort = Arc::new(AtomicBool::new(false));

        info!(
            "{}: init {} on {} (group {}, options {})",
            channel, desc.direction, range, desc.group, desc.options
        );
        st.descriptor = Some(desc);
        self.cell(channel).tick.notify_all();
        Ok(range)
    }

    /// Starts circulating
    ///
    /// The channel enters `Starting` and goes live at the first interrupt at or after
    /// `deadline`, or at the very next one when no deadline is given. Starting a paused
    /// channel begins a fresh run from the top of its frame range.
    pub fn start(&self, channel: Channel, deadline: Option<Instant>) -> Result<()> {
        let mut st = self.lock(channel);
        st.expect_state("start", &[State::Initializing, State::Paused])?;

        if st.state == State::Paused {
            if let Some(ring) = st.ring.as_mut() {
                ring.reset();
            }
            st.session += 1;
            st.processed = 0;
            st.dropped = 0;
            st.start_time = None;
            info!("{}: restarting from pause", channel);
        }

        st.pending = None;
        st.deadline = deadline;
        st.state = State::Starting;
        info!("{}: starting", channel);
        self.cell(channel).tick.notify_all();
        Ok(())
    }

    /// Pauses at the next interrupt; counters and frame stamps are kept
    pub fn pause(&self, channel: Channel) -> Result<()> {
        let mut st = self.lock(channel);
        st.expect_state("pause", &[State::Running])?;
        st.pending = Some(Pending::Pause);
        info!("{}: pausing", channel);
        Ok(())
    }

    /// Resumes at the next interrupt where the channel left off
    pub fn resume(&self, channel: Channel, clear_drops: bool) -> Result<()> {
        let mut st = self.lock(channel);
        st.expect_state("resume", &[State::Paused])?;
        st.pending = Some(Pending::Resume { clear_drops });
        info!("{}: resuming", channel);
        Ok(())
    }

    /// Stops circulating
    ///
    /// A graceful stop finishes at the next interrupt. An abort disables the channel at
    /// once and fails every transfer or wait in progress with [`Error::Aborted`].
    /// Stopping a disabled channel does nothing.
    pub fn stop(&self, channel: Channel, abort: bool) -> Result<()> {
        let cell = self.cell(channel);
        let mut st = cell.state.lock();

        let result = match st.state {
            State::Disabled => Ok(()),
            _ if abort => {
                st.abort.store(true, Ordering::SeqCst);
                st.aborts += 1;
                info!("{}: abort", channel);
                self.teardown(&mut st)
            }
            // never started, nothing to close out at a tick boundary
            State::Initializing => {
                info!("{}: stop", channel);
                self.teardown(&mut st)
            }
            State::Stopping => Ok(()),
            _ => {
                st.pending = None;
                st.state = State::Stopping;
                info!("{}: stopping", channel);
                Ok(())
            }
        };

        cell.tick.notify_all();
        result
    }

    /// Stops gracefully, aborting if the channel has not stopped within `timeout`
    pub fn stop_wait(&self, channel: Channel, timeout: Duration) -> Result<()> {
        self.stop(channel, false)?;

        let cell = self.cell(channel);
        let deadline = Instant::now() + timeout;
        let mut st = cell.state.lock();
        while st.state != State::Disabled {
            if cell.tick.wait_until(&mut st, deadline).timed_out() {
                break;
            }
        }
        if st.state == State::Disabled {
            return Ok(());
        }
        drop(st);

        warn!("{}: no interrupt within {:?}, aborting", channel, timeout);
        self.stop(channel, true)
    }

    /// Stops every channel in `channels`
    ///
    /// All channels are attempted; the first failure is returned.
    pub fn stop_all<I>(&self, channels: I, abort: bool) -> Result<()>
    where
        I: IntoIterator<Item = Channel>,
    {
        let mut first = None;
        for channel in channels {
            if let Err(e) = self.stop(channel, abort) {
                warn!("{}: stop failed: {}", channel, e);
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Discards captured or queued frames the device is not working on
    ///
    /// Returns the number of discarded frames.
    pub fn flush(&self, channel: Channel, clear_drops: bool) -> Result<u32> {
        let mut st = self.lock(channel);
        st.expect_state("flush", &[State::Starting, State::Running, State::Paused])?;

        let discarded = st.ring.as_mut().map(Ring::flush).unwrap_or(0);
        if clear_drops {
            st.dropped = 0;
        }
        info!("{}: flushed {} frames", channel, discarded);
        Ok(discarded)
    }

    /// Points the device at `frame` from the next interrupt on
    pub fn set_active_frame(&self, channel: Channel, frame: u32) -> Result<()> {
        let mut st = self.lock(channel);
        st.expect_state(
            "set_active_frame",
            &[State::Starting, State::Running, State::Paused],
        )?;

        let range = match st.ring.as_ref() {
            Some(ring) => ring.range(),
            None => return Err(Error::NotCirculating(channel)),
        };
        if !range.contains(frame) {
            return Err(Error::OutOfRange { frame, range });
        }
        st.redirect = Some(frame);
        Ok(())
    }

    /// Marks up to `count` playout slots as filled without transferring them
    ///
    /// Returns the number of slots added to the queue. Capture channels and channels that
    /// are not circulating are left alone.
    pub fn preroll(&self, channel: Channel, count: u32) -> Result<u32> {
        let mut st = self.lock(channel);
        if st.direction() != Some(Direction::Playout) {
            return Ok(0);
        }
        match st.state {
            State::Disabled | State::Stopping => Ok(0),
            _ => {
                let added = st.ring.as_mut().map(|ring| ring.preroll(count)).unwrap_or(0);
                info!("{}: preroll of {} frames", channel, added);
                self.cell(channel).tick.notify_all();
                Ok(added)
            }
        }
    }

    /// Ends the session of a channel whose state lock is held
    pub(crate) fn teardown(&self, st: &mut ChannelState) -> Result<()> {
        let channel = st.channel;
        let desc = st.descriptor.take();

        st.state = State::Disabled;
        st.pending = None;
        st.ring = None;
        st.redirect = None;
        st.deadline = None;
        st.session += 1;
        self.shared.pool.release(channel);

        if let Some(desc) = desc.as_ref() {
            for follower in desc.channels().skip(1) {
                self.lock(follower).claimed_by = None;
            }
        }
        info!("{}: disabled", channel);

        match desc {
            Some(desc) => self.audio_control(&desc, register::AUDIO_STOP),
            None => Ok(()),
        }
    }

    /// Drives the audio system of a session unless the client owns it
    pub(crate) fn audio_control(&self, desc: &CirculateDescriptor, value: u32) -> Result<()> {
        if desc.options.contains(Options::AUDIO_CONTROL) {
            return Ok(());
        }
        if let Some(audio) = desc.audio {
            self.shared
                .driver
                .write_register(register::audio_control(audio), value)?;
        }
        Ok(())
    }
}

