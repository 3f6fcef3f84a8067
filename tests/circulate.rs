use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use framecirc::driver::{register, MemoryDevice, Router};
use framecirc::{
    AudioSystem, Channel, CirculateDescriptor, Config, Device, Direction, Error, FrameRange,
    HostBuffers, Interrupt, SlotRole, State,
};

const FRAME: usize = 1024;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine() -> (Arc<MemoryDevice>, Device) {
    init_logger();
    let mem = Arc::new(MemoryDevice::new(32, FRAME));
    let config = Config::new(32, FRAME).with_transfer_timeout(Duration::from_millis(20));
    (mem.clone(), Device::new(mem, config))
}

fn ch(n: u8) -> Channel {
    Channel::new(n).unwrap()
}

fn tick(dev: &Device, channel: Channel, count: u32) {
    for _ in 0..count {
        dev.vertical_interrupt(Interrupt::new(channel)).unwrap();
    }
}

#[test]
fn capture_session_drops_once_the_ring_wraps() {
    let (_, dev) = engine();
    dev.init(CirculateDescriptor::capture(ch(1), 7)).unwrap();
    dev.start(ch(1), None).unwrap();

    tick(&dev, ch(1), 7);
    let status = dev.status(ch(1));
    assert_eq!(status.state, State::Running);
    assert_eq!(status.frames_dropped, 0);
    assert_eq!(status.buffer_level, 6);
    assert_eq!(status.active_frame, Some(6));
    let captured = dev
        .slots(ch(1))
        .unwrap()
        .iter()
        .filter(|slot| slot.role == SlotRole::Captured)
        .count();
    assert_eq!(captured, 6);

    tick(&dev, ch(1), 1);
    let status = dev.status(ch(1));
    assert!(status.frames_dropped > 0);
    assert_eq!(status.active_frame, Some(6));
}

#[test]
fn drops_count_every_tick_after_exhaustion() {
    let (_, dev) = engine();
    dev.init(CirculateDescriptor::capture(ch(1), 4)).unwrap();
    dev.start(ch(1), None).unwrap();

    // start plus three advances fill the ring without a drop
    tick(&dev, ch(1), 4);
    assert_eq!(dev.status(ch(1)).frames_dropped, 0);

    tick(&dev, ch(1), 5);
    assert_eq!(dev.status(ch(1)).frames_dropped, 5);

    // draining one frame lets the device move on again
    let mut video = vec![0; FRAME];
    dev.transfer(ch(1), &mut HostBuffers::new(&mut video)).unwrap();
    tick(&dev, ch(1), 1);
    let status = dev.status(ch(1));
    assert_eq!(status.frames_dropped, 5);
    assert_eq!(status.active_frame, Some(0));
}

#[test]
fn playout_preroll_presents_without_drops() {
    let (mem, dev) = engine();
    let range = dev.init(CirculateDescriptor::playout(ch(2), 4)).unwrap();

    for (i, frame) in range.iter().enumerate() {
        let mut video = vec![i as u8 + 1; FRAME];
        let status = dev.transfer(ch(2), &mut HostBuffers::new(&mut video)).unwrap();
        assert_eq!(status.frame, frame);
    }
    assert_eq!(dev.preroll(ch(2), 4).unwrap(), 0);
    dev.start(ch(2), None).unwrap();

    let select = register::frame_select(ch(2), Direction::Playout);
    for frame in range.iter() {
        tick(&dev, ch(2), 1);
        assert_eq!(mem.register(select), frame);
        assert_eq!(dev.status(ch(2)).frames_dropped, 0);
    }
    assert_eq!(mem.frame(range.start)[0], 1);

    // nothing new queued: the last frame repeats
    tick(&dev, ch(2), 1);
    let status = dev.status(ch(2));
    assert_eq!(status.frames_dropped, 1);
    assert_eq!(dev.frame_stamp(ch(2), range.end).unwrap().repeats, 1);
}

#[test]
fn preroll_without_transfers() {
    let (_, dev) = engine();
    dev.init(CirculateDescriptor::playout(ch(3), 3)).unwrap();
    assert_eq!(dev.preroll(ch(3), 2).unwrap(), 2);
    dev.start(ch(3), None).unwrap();
    tick(&dev, ch(3), 2);
    assert_eq!(dev.status(ch(3)).frames_dropped, 0);

    // capture channels ignore pre-roll
    dev.init(CirculateDescriptor::capture(ch(4), 3)).unwrap();
    assert_eq!(dev.preroll(ch(4), 2).unwrap(), 0);
    assert_eq!(dev.preroll(ch(5), 2).unwrap(), 0);
}

#[test]
fn abort_wakes_a_transfer_waiting_for_a_slot() {
    init_logger();
    let mem = Arc::new(MemoryDevice::new(16, FRAME));
    let config = Config::new(16, FRAME).with_transfer_timeout(Duration::from_secs(10));
    let dev = Device::new(mem, config);
    dev.init(CirculateDescriptor::capture(ch(1), 3)).unwrap();
    dev.start(ch(1), None).unwrap();

    let waiter = {
        let dev = dev.clone();
        thread::spawn(move || {
            let mut video = vec![0; FRAME];
            let started = Instant::now();
            let result = dev.transfer(ch(1), &mut HostBuffers::new(&mut video));
            (result, started.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(50));
    dev.stop(ch(1), true).unwrap();

    let (result, elapsed) = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::Aborted)));
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(dev.state(ch(1)), State::Disabled);
}

#[test]
fn abort_interrupts_dma_in_progress() {
    init_logger();
    let mem = Arc::new(MemoryDevice::new(16, 64 * 1024));
    let config = Config::new(16, 64 * 1024).with_dma_segment_size(1024);
    let dev = Device::new(mem.clone(), config);
    let range = dev.init(CirculateDescriptor::playout(ch(1), 3)).unwrap();
    mem.set_dma_latency(Duration::from_millis(20));

    let writer = {
        let dev = dev.clone();
        thread::spawn(move || {
            let mut video = vec![9; 64 * 1024];
            dev.transfer(ch(1), &mut HostBuffers::new(&mut video))
        })
    };
    thread::sleep(Duration::from_millis(100));
    dev.stop(ch(1), true).unwrap();

    assert!(matches!(writer.join().unwrap(), Err(Error::Aborted)));
    assert_eq!(dev.pool().reservation(ch(1)), None);
    // the pool is free again for a new session on the same frames
    mem.set_dma_latency(Duration::from_millis(0));
    assert_eq!(
        dev.init(CirculateDescriptor::playout(ch(1), 0).with_range(range)).unwrap(),
        range
    );
}

#[test]
fn abort_wakes_tick_waiters() {
    let (_, dev) = engine();
    dev.init(CirculateDescriptor::capture(ch(6), 2)).unwrap();
    let waiter = {
        let dev = dev.clone();
        thread::spawn(move || dev.wait_for_tick(ch(6), 1, Duration::from_secs(10)))
    };
    thread::sleep(Duration::from_millis(50));
    dev.stop(ch(6), true).unwrap();
    assert!(matches!(waiter.join().unwrap(), Err(Error::Aborted)));
}

#[test]
fn init_then_stop_restores_the_pool() {
    let (_, dev) = engine();
    let before = dev.pool().free_regions();

    for channel in Channel::all() {
        dev.init(CirculateDescriptor::capture(channel, 3)).unwrap();
        dev.stop(channel, false).unwrap();
        assert_eq!(dev.state(channel), State::Disabled);
        assert_eq!(dev.pool().free_regions(), before);
    }
}

#[test]
fn stop_is_idempotent() {
    let (_, dev) = engine();
    assert!(dev.stop(ch(1), false).is_ok());
    assert!(dev.stop(ch(1), true).is_ok());
    assert!(dev.pool().release(ch(1)).is_none());

    dev.init(CirculateDescriptor::capture(ch(1), 2)).unwrap();
    dev.start(ch(1), None).unwrap();
    tick(&dev, ch(1), 1);
    dev.stop(ch(1), false).unwrap();
    dev.stop(ch(1), false).unwrap();
    assert_eq!(dev.state(ch(1)), State::Stopping);
    tick(&dev, ch(1), 1);
    assert_eq!(dev.state(ch(1)), State::Disabled);
    dev.stop(ch(1), false).unwrap();
}

#[test]
fn overlapping_explicit_ranges_never_both_init() {
    let (_, dev) = engine();
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [(1, FrameRange::new(4, 11).unwrap()), (2, FrameRange::new(10, 15).unwrap())]
        .iter()
        .map(|&(n, range)| {
            let dev = dev.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                dev.init(CirculateDescriptor::capture(ch(n), 0).with_range(range))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::Overlap { .. }))));
}

#[test]
fn init_requires_disabled() {
    let (_, dev) = engine();
    dev.init(CirculateDescriptor::capture(ch(1), 2)).unwrap();
    assert!(matches!(
        dev.init(CirculateDescriptor::capture(ch(1), 2)),
        Err(Error::InvalidState { state: State::Initializing, .. })
    ));
    assert!(matches!(
        dev.init(CirculateDescriptor::capture(ch(2), 40)),
        Err(Error::ResourceExhausted { requested: 40 })
    ));
    assert!(matches!(dev.pause(ch(1)), Err(Error::InvalidState { .. })));
    assert!(matches!(dev.resume(ch(1), false), Err(Error::InvalidState { .. })));
    assert!(matches!(dev.flush(ch(1), false), Err(Error::InvalidState { .. })));
}

#[test]
fn tick_sequence_is_monotonic() {
    let (_, dev) = engine();
    let range = dev.init(CirculateDescriptor::capture(ch(1), 3)).unwrap();
    dev.start(ch(1), None).unwrap();

    let mut last = 0;
    let mut video = vec![0; FRAME];
    for _ in 0..12 {
        tick(&dev, ch(1), 1);
        let tick = dev.status(ch(1)).tick;
        assert_eq!(tick, last + 1);
        last = tick;

        let active = dev.status(ch(1)).active_frame.unwrap();
        assert_eq!(dev.frame_stamp(ch(1), active).unwrap().sequence, tick);
        let _ = dev.transfer(ch(1), &mut HostBuffers::new(&mut video));
    }
    assert!(matches!(
        dev.frame_stamp(ch(1), range.end + 1),
        Err(Error::OutOfRange { .. })
    ));
    dev.stop(ch(1), true).unwrap();
    assert!(matches!(
        dev.frame_stamp(ch(1), range.start),
        Err(Error::NotCirculating(_))
    ));
}

#[test]
fn pause_resume_keeps_position_and_drops() {
    let (_, dev) = engine();
    dev.init(CirculateDescriptor::capture(ch(1), 3)).unwrap();
    dev.start(ch(1), None).unwrap();
    tick(&dev, ch(1), 5);

    let before = dev.status(ch(1));
    assert_eq!(before.frames_dropped, 2);

    dev.pause(ch(1)).unwrap();
    tick(&dev, ch(1), 1);
    assert_eq!(dev.state(ch(1)), State::Paused);
    tick(&dev, ch(1), 3);
    dev.resume(ch(1), false).unwrap();
    tick(&dev, ch(1), 1);

    let after = dev.status(ch(1));
    assert_eq!(after.state, State::Running);
    assert_eq!(after.frames_dropped, before.frames_dropped);
    assert_eq!(after.active_frame, before.active_frame);
    assert_eq!(after.frames_processed, before.frames_processed);

    dev.pause(ch(1)).unwrap();
    tick(&dev, ch(1), 1);
    dev.resume(ch(1), true).unwrap();
    tick(&dev, ch(1), 1);
    assert_eq!(dev.status(ch(1)).frames_dropped, 0);
}

#[test]
fn start_from_pause_is_a_fresh_start() {
    let (_, dev) = engine();
    let range = dev.init(CirculateDescriptor::capture(ch(1), 3)).unwrap();
    dev.start(ch(1), None).unwrap();
    tick(&dev, ch(1), 5);
    dev.pause(ch(1)).unwrap();
    tick(&dev, ch(1), 1);
    let tick_before = dev.status(ch(1)).tick;

    dev.start(ch(1), None).unwrap();
    let status = dev.status(ch(1));
    assert_eq!(status.state, State::Starting);
    assert_eq!((status.frames_dropped, status.frames_processed, status.buffer_level), (0, 0, 0));

    tick(&dev, ch(1), 1);
    let status = dev.status(ch(1));
    assert_eq!(status.active_frame, Some(range.start));
    assert!(status.tick > tick_before);
}

#[test]
fn start_from_pause_drops_frames_still_in_transfer() {
    let (mem, dev) = engine();
    dev.init(CirculateDescriptor::capture(ch(1), 3)).unwrap();
    dev.start(ch(1), None).unwrap();
    tick(&dev, ch(1), 2);
    assert_eq!(dev.status(ch(1)).buffer_level, 1);

    mem.set_dma_latency(Duration::from_millis(150));
    let reader = {
        let dev = dev.clone();
        thread::spawn(move || {
            let mut video = vec![0; FRAME];
            dev.transfer(ch(1), &mut HostBuffers::new(&mut video))
        })
    };
    thread::sleep(Duration::from_millis(40));
    dev.pause(ch(1)).unwrap();
    tick(&dev, ch(1), 1);
    dev.start(ch(1), None).unwrap();

    let status = dev.status(ch(1));
    assert_eq!((status.buffer_level, status.available), (0, 0));
    assert!(dev
        .slots(ch(1))
        .unwrap()
        .iter()
        .all(|slot| slot.role == SlotRole::Free));
    assert!(matches!(reader.join().unwrap(), Err(Error::Aborted)));

    // nothing of the previous run is handed out before the device captures again
    mem.set_dma_latency(Duration::from_millis(0));
    let mut video = vec![0; FRAME];
    tick(&dev, ch(1), 1);
    assert!(matches!(
        dev.transfer(ch(1), &mut HostBuffers::new(&mut video)),
        Err(Error::Timeout)
    ));
    tick(&dev, ch(1), 1);
    let status = dev.transfer(ch(1), &mut HostBuffers::new(&mut video)).unwrap();
    assert_eq!(status.frame, 0);
    assert_eq!(status.stamp.sequence, dev.status(ch(1)).tick - 1);
}

#[test]
fn playout_start_waits_for_the_first_frame_to_land() {
    let (mem, dev) = engine();
    let range = dev.init(CirculateDescriptor::playout(ch(1), 3)).unwrap();
    dev.start(ch(1), None).unwrap();

    mem.set_dma_latency(Duration::from_millis(150));
    let writer = {
        let dev = dev.clone();
        thread::spawn(move || {
            let mut video = vec![5; FRAME];
            dev.transfer(ch(1), &mut HostBuffers::new(&mut video))
        })
    };
    thread::sleep(Duration::from_millis(40));
    tick(&dev, ch(1), 1);
    let status = dev.status(ch(1));
    assert_eq!(status.state, State::Starting);
    assert_eq!(status.active_frame, None);

    let written = writer.join().unwrap().unwrap();
    assert_eq!(written.frame, range.start);
    tick(&dev, ch(1), 1);
    let status = dev.status(ch(1));
    assert_eq!(status.state, State::Running);
    assert_eq!(status.active_frame, Some(range.start));
    assert_eq!(status.frames_dropped, 0);
    assert_eq!(mem.frame(range.start)[0], 5);
}

#[test]
fn playout_flush_fails_the_fill_in_flight() {
    let (mem, dev) = engine();
    let range = dev.init(CirculateDescriptor::playout(ch(1), 3)).unwrap();
    assert_eq!(dev.preroll(ch(1), 2).unwrap(), 2);
    dev.start(ch(1), None).unwrap();
    tick(&dev, ch(1), 1);
    assert_eq!(dev.status(ch(1)).active_frame, Some(range.start));

    mem.set_dma_latency(Duration::from_millis(150));
    let writer = {
        let dev = dev.clone();
        thread::spawn(move || {
            let mut video = vec![5; FRAME];
            dev.transfer(ch(1), &mut HostBuffers::new(&mut video))
        })
    };
    thread::sleep(Duration::from_millis(40));
    assert_eq!(dev.flush(ch(1), false).unwrap(), 1);
    assert!(matches!(writer.join().unwrap(), Err(Error::Aborted)));
    assert_eq!(dev.status(ch(1)).buffer_level, 0);

    mem.set_dma_latency(Duration::from_millis(0));
    let mut video = vec![6; FRAME];
    let status = dev.transfer(ch(1), &mut HostBuffers::new(&mut video)).unwrap();
    assert_eq!(status.frame, range.start + 1);
}

#[test]
fn flush_discards_waiting_frames_only() {
    let (_, dev) = engine();
    dev.init(CirculateDescriptor::capture(ch(1), 5)).unwrap();
    dev.start(ch(1), None).unwrap();
    tick(&dev, ch(1), 6);
    assert_eq!(dev.status(ch(1)).frames_dropped, 1);

    assert_eq!(dev.flush(ch(1), true).unwrap(), 4);
    let status = dev.status(ch(1));
    assert_eq!((status.buffer_level, status.frames_dropped), (0, 0));
    assert_eq!(status.active_frame, Some(4));

    tick(&dev, ch(1), 1);
    assert_eq!(dev.status(ch(1)).active_frame, Some(0));
}

#[test]
fn set_active_frame_redirects_next_tick() {
    let (mem, dev) = engine();
    let range = dev.init(CirculateDescriptor::capture(ch(1), 4)).unwrap();
    assert!(matches!(
        dev.set_active_frame(ch(1), 2),
        Err(Error::InvalidState { .. })
    ));
    dev.start(ch(1), None).unwrap();
    assert!(matches!(
        dev.set_active_frame(ch(1), range.end + 1),
        Err(Error::OutOfRange { .. })
    ));

    dev.set_active_frame(ch(1), 2).unwrap();
    tick(&dev, ch(1), 1);
    assert_eq!(dev.status(ch(1)).active_frame, Some(2));
    assert_eq!(mem.register(register::frame_select(ch(1), Direction::Capture)), 2);
    tick(&dev, ch(1), 1);
    assert_eq!(dev.status(ch(1)).active_frame, Some(3));
}

#[test]
fn graceful_stop_closes_audio_at_the_tick() {
    let (mem, dev) = engine();
    let audio = AudioSystem::new(1).unwrap();
    dev.init(CirculateDescriptor::capture(ch(1), 2).with_audio(audio))
        .unwrap();
    dev.start(ch(1), None).unwrap();
    tick(&dev, ch(1), 1);
    let control = register::audio_control(audio);
    assert_eq!(mem.register(control), register::AUDIO_RUN);

    dev.stop(ch(1), false).unwrap();
    assert_eq!(mem.register(control), register::AUDIO_RUN);
    tick(&dev, ch(1), 1);
    assert_eq!(mem.register(control), register::AUDIO_STOP);
    assert_eq!(dev.state(ch(1)), State::Disabled);
}

#[test]
fn stop_wait_falls_back_to_abort() {
    let (_, dev) = engine();
    dev.init(CirculateDescriptor::capture(ch(1), 2)).unwrap();
    dev.start(ch(1), None).unwrap();
    dev.stop_wait(ch(1), Duration::from_millis(10)).unwrap();
    assert_eq!(dev.state(ch(1)), State::Disabled);

    dev.init(CirculateDescriptor::capture(ch(2), 2)).unwrap();
    dev.init(CirculateDescriptor::capture(ch(3), 2)).unwrap();
    dev.stop_all(vec![ch(2), ch(3)], true).unwrap();
    assert_eq!(dev.pool().free_frames(), dev.pool().capacity());
}

#[test]
fn disabled_status_snapshot() {
    let (_, dev) = engine();
    let status = dev.status(ch(8));
    assert_eq!(status.state, State::Disabled);
    assert_eq!(status.range, None);
    assert!(!status.is_running());
}

struct RoutedExcept(Channel);

impl Router for RoutedExcept {
    fn is_routed(&self, channel: Channel, _direction: Direction) -> bool {
        channel != self.0
    }
}

#[test]
fn init_refuses_unrouted_channels() {
    init_logger();
    let mem = Arc::new(MemoryDevice::new(32, FRAME));
    let dev = Device::with_router(mem, Box::new(RoutedExcept(ch(3))), Config::new(32, FRAME));

    assert!(matches!(
        dev.init(CirculateDescriptor::capture(ch(2), 3).with_group(2)),
        Err(Error::NotRouted(channel)) if channel == ch(3)
    ));
    assert_eq!(dev.state(ch(2)), State::Disabled);
    assert_eq!(dev.pool().free_frames(), dev.pool().capacity());

    assert!(matches!(
        dev.init(CirculateDescriptor::playout(ch(3), 3)),
        Err(Error::NotRouted(_))
    ));
    assert!(dev.init(CirculateDescriptor::capture(ch(2), 3)).is_ok());
}
