use std::sync::Arc;
use std::thread;
use std::time::Duration;

use framecirc::driver::MemoryDevice;
use framecirc::io::traits::{CaptureStream, OutputStream, Stream as _};
use framecirc::io::Stream;
use framecirc::{Channel, CirculateDescriptor, Config, Device, HostBuffers, State, Synchronizer};

const FRAME: usize = 512;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn capture_stream_follows_a_software_clock() {
    init_logger();
    let mem = Arc::new(MemoryDevice::new(16, FRAME));
    let config = Config::new(16, FRAME).with_transfer_timeout(Duration::from_secs(2));
    let dev = Device::new(mem.clone(), config);
    let ch1 = Channel::new(1).unwrap();

    let mut sync = Synchronizer::spawn(&dev).unwrap();
    sync.pump(ch1).unwrap();
    let clock = {
        let mem = mem.clone();
        thread::spawn(move || {
            for n in 0..200u32 {
                mem.fill_frame(n % 4, 0, &n.to_le_bytes()).unwrap();
                mem.raise_interrupt(ch1);
                thread::sleep(Duration::from_millis(2));
            }
        })
    };

    let mut stream = Stream::new(&dev, CirculateDescriptor::capture(ch1, 4)).unwrap();
    let mut last_seq = 0;
    let mut frame = vec![0u8; FRAME];
    for _ in 0..5 {
        let status = CaptureStream::next(&mut stream, &mut HostBuffers::new(&mut frame)).unwrap();
        assert!(stream.range().contains(status.frame));
        assert!(status.stamp.sequence > last_seq);
        last_seq = status.stamp.sequence;
    }
    assert_eq!(stream.status().state, State::Running);

    stream.stop().unwrap();
    assert_eq!(dev.state(ch1), State::Disabled);
    clock.join().unwrap();
    sync.shutdown();
}

#[test]
fn dropping_a_stream_frees_its_frames() {
    init_logger();
    let dev = Device::new(Arc::new(MemoryDevice::new(8, FRAME)), Config::new(8, FRAME));
    let ch3 = Channel::new(3).unwrap();
    {
        let mut stream = Stream::new(&dev, CirculateDescriptor::playout(ch3, 2)).unwrap();
        let mut frame = vec![1u8; FRAME];
        OutputStream::next(&mut stream, &mut HostBuffers::new(&mut frame)).unwrap();
        assert_eq!(dev.state(ch3), State::Starting);
        assert!(CaptureStream::next(&mut stream, &mut HostBuffers::new(&mut frame)).is_err());
    }
    assert_eq!(dev.state(ch3), State::Disabled);
    assert_eq!(dev.pool().free_frames(), dev.pool().capacity());
}
