//! Vertical interrupt handling
//!
//! Every interrupt is one logical tick. The handler never catches up on missed ticks; a
//! gap in the interrupt sequence is counted as dropped frames instead.

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use log::{debug, info, trace, warn};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::channel::{Channel, Direction, MAX_CHANNELS};
use crate::circulate::ring::Advance;
use crate::circulate::state::Pending;
use crate::circulate::{ChannelState, Device, FrameStamp, State};
use crate::descriptor::{CirculateDescriptor, Options};
use crate::driver::{self, register};
use crate::error::{Error, Result};
use crate::timecode::Timecode;

/// One vertical blanking event of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt {
    pub channel: Channel,
    /// Running count kept by the producer; gaps reveal lost interrupts
    pub sequence: Option<u64>,
    pub timestamp: Instant,
}

impl Interrupt {
    pub fn new(channel: Channel) -> Self {
        Interrupt {
            channel,
            sequence: None,
            timestamp: Instant::now(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn at(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Hardware inputs sampled once per tick
struct Sample {
    audio: u32,
    timecode: Option<Timecode>,
    ltc: Option<Timecode>,
}

impl Device {
    /// Handles one vertical interrupt
    ///
    /// Advances the frame ring of the channel, refreshes frame stamps and performs any
    /// transition waiting for a tick boundary. Waiters on the channel are woken whatever
    /// the outcome.
    pub fn vertical_interrupt(&self, irq: Interrupt) -> Result<()> {
        let cell = self.cell(irq.channel);
        let mut st = cell.state.lock();
        let result = self.tick(&mut st, &irq);
        cell.tick.notify_all();
        result
    }

    fn tick(&self, st: &mut ChannelState, irq: &Interrupt) -> Result<()> {
        st.vbi_count += 1;
        let lost = match (irq.sequence, st.last_irq) {
            (Some(seq), Some(last)) if seq > last + 1 => seq - last - 1,
            _ => 0,
        };
        if irq.sequence.is_some() {
            st.last_irq = irq.sequence;
        }

        match st.state {
            State::Disabled | State::Initializing => Ok(()),
            State::Starting => match st.deadline {
                Some(deadline) if irq.timestamp < deadline => Ok(()),
                _ => self.go_live(st, irq),
            },
            State::Running => {
                if st.pending == Some(Pending::Pause) {
                    st.pending = None;
                    st.state = State::Paused;
                    info!("{}: paused", st.channel);
                    return self.session_audio(st, register::AUDIO_PAUSE);
                }
                if lost > 0 {
                    trace!("{}: {} interrupts lost", st.channel, lost);
                    st.dropped += lost;
                }
                self.advance(st, irq)
            }
            State::Paused => {
                if let Some(Pending::Resume { clear_drops }) = st.pending.take() {
                    if clear_drops {
                        st.dropped = 0;
                    }
                    st.state = State::Running;
                    info!("{}: running again", st.channel);
                    return self.session_audio(st, register::AUDIO_RUN);
                }
                Ok(())
            }
            State::Stopping => self.teardown(st),
        }
    }

    fn go_live(&self, st: &mut ChannelState, irq: &Interrupt) -> Result<()> {
        let desc = session(st)?;
        let ring = st.ring.as_ref().ok_or(Error::NotCirculating(desc.channel))?;
        let first = st.redirect.unwrap_or_else(|| ring.range().start);
        if ring.slot(first).borrowed {
            trace!("{}: frame {} is still being transferred, start held", desc.channel, first);
            return Ok(());
        }

        let sample = self.sample(&desc)?;
        st.redirect = None;
        st.tick_seq += 1;
        let seq = st.tick_seq;

        let ring = st.ring.as_mut().ok_or(Error::NotCirculating(desc.channel))?;
        let held = ring.begin(first);
        enter(&mut ring.slot_mut(first).stamp, desc.direction, seq, irq, &sample);
        let on_air = ring.slot(first).stamp.clone();

        if desc.direction == Direction::Playout && !held {
            trace!("{}: nothing queued for frame {} at start", desc.channel, first);
            st.dropped += 1;
        }
        st.state = State::Running;
        st.start_time = Some(irq.timestamp);
        info!("{}: running from frame {}", desc.channel, first);

        self.select_frame(&desc, &on_air)?;
        self.audio_control(&desc, register::AUDIO_RUN)
    }

    fn advance(&self, st: &mut ChannelState, irq: &Interrupt) -> Result<()> {
        let desc = session(st)?;
        let sample = self.sample(&desc)?;
        let redirect = st.redirect.take();
        st.tick_seq += 1;
        let seq = st.tick_seq;

        let ring = st.ring.as_mut().ok_or(Error::NotCirculating(desc.channel))?;
        if let Some(frame) = redirect {
            if ring.slot(frame).borrowed {
                warn!(
                    "{}: frame {} is being transferred, redirect ignored",
                    desc.channel, frame
                );
            }
        }

        let on_air = match ring.advance(redirect) {
            Some(Advance::Moved { from, to }) => {
                if desc.direction == Direction::Capture {
                    complete(&mut ring.slot_mut(from).stamp, &sample);
                }
                enter(&mut ring.slot_mut(to).stamp, desc.direction, seq, irq, &sample);
                st.processed += 1;
                to
            }
            Some(Advance::Stayed { at }) => {
                if desc.direction == Direction::Capture {
                    enter(&mut ring.slot_mut(at).stamp, desc.direction, seq, irq, &sample);
                }
                at
            }
            Some(Advance::Held { at }) => {
                trace!("{}: frame {} held, drop", desc.channel, at);
                match desc.direction {
                    Direction::Capture => {
                        enter(&mut ring.slot_mut(at).stamp, desc.direction, seq, irq, &sample)
                    }
                    Direction::Playout => ring.slot_mut(at).stamp.repeats += 1,
                }
                st.dropped += 1;
                at
            }
            None => return Ok(()),
        };

        let stamp = ring.slot(on_air).stamp.clone();
        self.select_frame(&desc, &stamp)
    }

    fn sample(&self, desc: &CirculateDescriptor) -> Result<Sample> {
        let mut sample = Sample {
            audio: 0,
            timecode: None,
            ltc: None,
        };
        if desc.direction != Direction::Capture {
            return Ok(sample);
        }

        let driver = &*self.shared.driver;
        if let Some(audio) = desc.audio {
            let ring_size = self.shared.config.audio_ring_size().max(1) as u32;
            let position = driver.read_register(register::audio_position(audio, desc.direction))?;
            sample.audio = position % ring_size;
        }
        if desc.options.contains(Options::RP188) {
            let regs = register::rp188(desc.channel, desc.direction);
            sample.timecode = Some(driver::read_timecode(driver, &regs)?);
        }
        if desc.options.contains(Options::LTC) {
            let regs = register::ltc(desc.direction);
            sample.ltc = Some(driver::read_timecode(driver, &regs)?);
        }
        Ok(sample)
    }

    /// Points every channel of the group at the active frame, with its timecode on playout
    fn select_frame(&self, desc: &CirculateDescriptor, on_air: &FrameStamp) -> Result<()> {
        let driver = &*self.shared.driver;
        for channel in desc.channels() {
            driver.write_register(register::frame_select(channel, desc.direction), on_air.frame)?;
        }

        if desc.direction == Direction::Playout {
            if let Some(tc) = on_air.timecode.filter(|_| desc.options.contains(Options::RP188)) {
                driver::write_timecode(driver, &register::rp188(desc.channel, desc.direction), &tc)?;
            }
            if let Some(tc) = on_air.ltc.filter(|_| desc.options.contains(Options::LTC)) {
                driver::write_timecode(driver, &register::ltc(desc.direction), &tc)?;
            }
        }
        Ok(())
    }

    fn session_audio(&self, st: &ChannelState, value: u32) -> Result<()> {
        match st.descriptor.as_ref() {
            Some(desc) => self.audio_control(desc, value),
            None => Ok(()),
        }
    }

    /// Blocks until `count` more interrupts of `channel` were handled
    ///
    /// Each interrupt must arrive within `timeout` of the previous one, otherwise
    /// [`Error::Timeout`] is returned. An abort of the channel wakes the caller with
    /// [`Error::Aborted`].
    pub fn wait_for_tick(&self, channel: Channel, count: u32, timeout: Duration) -> Result<()> {
        let cell = self.cell(channel);
        let mut st = cell.state.lock();
        if st.state == State::Disabled {
            return Err(Error::NotCirculating(channel));
        }

        let aborts = st.aborts;
        let target = st.vbi_count + count as u64;
        let mut seen = st.vbi_count;
        let mut deadline = Instant::now() + timeout;
        loop {
            if st.aborts != aborts {
                return Err(Error::Aborted);
            }
            if st.vbi_count >= target {
                return Ok(());
            }
            if st.vbi_count > seen {
                seen = st.vbi_count;
                deadline = Instant::now() + timeout;
            }
            if cell.tick.wait_until(&mut st, deadline).timed_out()
                && st.vbi_count == seen
                && st.aborts == aborts
            {
                return Err(Error::Timeout);
            }
        }
    }
}

fn session(st: &ChannelState) -> Result<CirculateDescriptor> {
    st.descriptor
        .clone()
        .ok_or(Error::NotCirculating(st.channel))
}

/// Stamps a slot the device just moved onto
fn enter(stamp: &mut FrameStamp, direction: Direction, seq: u64, irq: &Interrupt, sample: &Sample) {
    stamp.sequence = seq;
    stamp.timestamp = Some(irq.timestamp);
    if direction == Direction::Capture {
        stamp.audio_start = sample.audio;
        stamp.audio_end = sample.audio;
        stamp.timecode = None;
        stamp.ltc = None;
    }
    stamp.repeats = 0;
}

/// Stamps a capture slot the device just finished
fn complete(stamp: &mut FrameStamp, sample: &Sample) {
    stamp.audio_end = sample.audio;
    stamp.timecode = sample.timecode;
    stamp.ltc = sample.ltc;
}

/// Producer side of the interrupt queue
///
/// Cheap to clone; every clone numbers interrupts from the same per-channel counters.
#[derive(Clone)]
pub struct InterruptSender {
    tx: Sender<Interrupt>,
    sequences: Arc<Vec<AtomicU64>>,
}

impl InterruptSender {
    /// Queues an interrupt of `channel`
    ///
    /// Returns `false` when the queue was full and the interrupt got coalesced. The
    /// consumer sees the gap in the sequence and counts it as a drop.
    pub fn raise(&self, channel: Channel) -> bool {
        let seq = self.sequences[channel.index()].fetch_add(1, Ordering::SeqCst) + 1;
        match self.tx.try_send(Interrupt::new(channel).with_sequence(seq)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("{}: interrupt {} coalesced", channel, seq);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Feeds vertical interrupts into a [`Device`] from a dedicated thread
///
/// Interrupts travel through a bounded queue so that a slow consumer coalesces ticks
/// instead of piling them up. Pump threads can forward the interrupts a driver reports.
pub struct Synchronizer {
    device: Device,
    sender: InterruptSender,
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
    pumps: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl Synchronizer {
    /// Spawns the consumer thread for `device`
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::driver::MemoryDevice;
    /// use framecirc::{Channel, CirculateDescriptor, Config, Device, Synchronizer};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let dev = Device::new(Arc::new(MemoryDevice::new(8, 1024)), Config::new(8, 1024));
    /// let ch1 = Channel::new(1).unwrap();
    /// dev.init(CirculateDescriptor::capture(ch1, 3)).unwrap();
    ///
    /// let sync = Synchronizer::spawn(&dev).unwrap();
    /// let irq = sync.sender();
    /// let waiter = {
    ///     let dev = dev.clone();
    ///     std::thread::spawn(move || dev.wait_for_tick(ch1, 1, Duration::from_secs(5)))
    /// };
    /// while !waiter.is_finished() {
    ///     irq.raise(ch1);
    ///     std::thread::sleep(Duration::from_millis(1));
    /// }
    /// assert!(waiter.join().unwrap().is_ok());
    /// sync.shutdown();
    /// ```
    pub fn spawn(device: &Device) -> io::Result<Self> {
        let depth = device.config().interrupt_queue_depth.max(1);
        let (tx, rx) = bounded(depth);
        let (shutdown_tx, shutdown_rx) = bounded(0);

        let engine = device.clone();
        let worker = thread::Builder::new()
            .name("framecirc-vbi".to_string())
            .spawn(move || consume(engine, rx, shutdown_rx))?;

        let sequences = (0..MAX_CHANNELS).map(|_| AtomicU64::new(0)).collect();
        Ok(Synchronizer {
            device: device.clone(),
            sender: InterruptSender {
                tx,
                sequences: Arc::new(sequences),
            },
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
            pumps: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Handle for raising interrupts by hand
    pub fn sender(&self) -> InterruptSender {
        self.sender.clone()
    }

    /// Forwards the interrupts the driver reports for `channel`
    pub fn pump(&mut self, channel: Channel) -> io::Result<()> {
        let driver = self.device.driver().clone();
        let timeout = self.device.config().tick_timeout;
        let sender = self.sender.clone();
        let running = self.running.clone();

        let pump = thread::Builder::new()
            .name(format!("framecirc-irq-{}", channel.number()))
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    match driver.wait_for_interrupt(channel, timeout) {
                        Ok(true) => {
                            sender.raise(channel);
                        }
                        Ok(false) => {}
                        Err(e) => {
                            warn!("{}: interrupt wait failed: {}", channel, e);
                            break;
                        }
                    }
                }
            })?;
        self.pumps.push(pump);
        Ok(())
    }

    /// Stops the pump and consumer threads and waits for them
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        // disconnecting the shutdown channel wakes the consumer
        self.shutdown.take();
        for pump in self.pumps.drain(..) {
            let _ = pump.join();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn consume(device: Device, rx: Receiver<Interrupt>, shutdown: Receiver<()>) {
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(irq) => {
                    if let Err(e) = device.vertical_interrupt(irq) {
                        warn!("{}: interrupt handling failed: {}", irq.channel, e);
                    }
                }
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    debug!("interrupt consumer exiting");
}
