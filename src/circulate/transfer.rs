use log::debug;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::channel::{Channel, Direction};
use crate::circulate::{Device, FrameStamp, State};
use crate::descriptor::{CirculateDescriptor, Options};
use crate::error::{Error, Result};
use crate::timecode::Timecode;

/// Host memory one transfer moves a frame to or from
///
/// On capture the buffers receive the frame; on playout they hold the frame to queue.
pub struct HostBuffers<'a> {
    video: &'a mut [u8],
    audio: Option<&'a mut [u8]>,
    anc: Option<&'a mut [u8]>,
    anc_field2: Option<&'a mut [u8]>,
    /// RP188 timecode played out with the frame
    pub timecode: Option<Timecode>,
    /// LTC played out with the frame
    pub ltc: Option<Timecode>,
    /// Opaque value stored with a playout frame and reported while it is on air
    pub user_cookie: u64,
}

impl<'a> HostBuffers<'a> {
    /// Returns buffers that move video only
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::{HostBuffers, Timecode};
    ///
    /// let mut video = vec![0u8; 1920 * 1080 * 2];
    /// let mut audio = vec![0u8; 8192];
    /// let bufs = HostBuffers::new(&mut video)
    ///     .with_audio(&mut audio)
    ///     .with_timecode(Timecode::from_hmsf(10, 0, 0, 0));
    /// assert_eq!(bufs.video().len(), 1920 * 1080 * 2);
    /// ```
    pub fn new(video: &'a mut [u8]) -> Self {
        HostBuffers {
            video,
            audio: None,
            anc: None,
            anc_field2: None,
            timecode: None,
            ltc: None,
            user_cookie: 0,
        }
    }

    /// Adds an audio buffer
    ///
    /// On playout the whole buffer is queued as the audio of the frame.
    pub fn with_audio(mut self, audio: &'a mut [u8]) -> Self {
        self.audio = Some(audio);
        self
    }

    /// Adds ancillary data buffers for field 1 and, optionally, field 2
    pub fn with_anc(mut self, field1: &'a mut [u8], field2: Option<&'a mut [u8]>) -> Self {
        self.anc = Some(field1);
        self.anc_field2 = field2;
        self
    }

    pub fn with_timecode(mut self, timecode: Timecode) -> Self {
        self.timecode = Some(timecode);
        self
    }

    pub fn with_ltc(mut self, ltc: Timecode) -> Self {
        self.ltc = Some(ltc);
        self
    }

    pub fn with_user_cookie(mut self, cookie: u64) -> Self {
        self.user_cookie = cookie;
        self
    }

    pub fn video(&self) -> &[u8] {
        self.video
    }

    pub fn audio(&self) -> Option<&[u8]> {
        self.audio.as_deref()
    }

    pub fn anc(&self) -> Option<&[u8]> {
        self.anc.as_deref()
    }

    pub fn anc_field2(&self) -> Option<&[u8]> {
        self.anc_field2.as_deref()
    }

    fn audio_len(&self) -> usize {
        self.audio.as_ref().map_or(0, |a| a.len())
    }
}

/// Outcome of a successful transfer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStatus {
    /// Device frame buffer the data came from or went to
    pub frame: u32,
    pub state: State,
    pub buffer_level: u32,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    /// Stamp of the transferred frame; carries the captured timecode on capture
    pub stamp: FrameStamp,
    pub video_bytes: usize,
    pub audio_bytes: usize,
    pub anc_bytes: (usize, usize),
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frame {} ({} video, {} audio bytes) level {} dropped {}",
            self.frame, self.video_bytes, self.audio_bytes, self.buffer_level, self.frames_dropped
        )
    }
}

/// Where the audio of a frame lives in its ring
#[derive(Debug, Clone, Copy)]
struct AudioSpan {
    frame: u32,
    start: usize,
    len: usize,
    ring: usize,
}

impl AudioSpan {
    /// Ring pieces as `(ring offset, host offset, len)`, split where the ring wraps
    fn pieces(&self) -> impl Iterator<Item = (usize, usize, usize)> {
        let first = self.len.min(self.ring - self.start);
        let second = self.len - first;
        let head = Some((self.start, 0, first));
        let tail = if second > 0 { Some((0, first, second)) } else { None };
        head.into_iter().chain(tail).filter(|&(_, _, len)| len > 0)
    }
}

/// A slot borrowed for the duration of one transfer
struct Claim {
    frame: u32,
    session: u64,
    direction: Direction,
    video: usize,
    anc: (usize, usize),
    audio: Option<AudioSpan>,
    stamp: FrameStamp,
}

impl Device {
    /// Moves one frame between host memory and the device
    ///
    /// On capture the oldest captured frame is copied into `buffers`; on playout
    /// `buffers` are queued into the next free slot. Blocks until a slot is usable, for at
    /// most the configured transfer timeout. A failed transfer leaves every slot as it was.
    ///
    /// A frame that a flush or restart discarded while it was moving yields
    /// [`Error::Aborted`].
    pub fn transfer(&self, channel: Channel, buffers: &mut HostBuffers<'_>) -> Result<TransferStatus> {
        let cell = self.cell(channel);
        let abort = {
            let st = cell.state.lock();
            if st.state == State::Disabled {
                return Err(Error::NotCirculating(channel));
            }
            st.abort.clone()
        };

        let _serial = cell.transfer.lock();
        let claim = self.claim(channel, &abort, buffers)?;

        let moved = self.move_frame(&claim, &abort, buffers);

        let mut st = cell.state.lock();
        if abort.load(Ordering::SeqCst) {
            return Err(Error::Aborted);
        }
        let session_ended = st.session != claim.session;
        let ring = match st.ring.as_mut() {
            Some(ring) => ring,
            None => return Err(Error::NotCirculating(channel)),
        };
        if session_ended || moved.is_err() {
            if ring.range().contains(claim.frame) {
                ring.give_back(claim.frame);
            }
            moved?;
            return Err(Error::Aborted);
        }

        if !ring.complete(claim.frame) {
            debug!("{}: frame {} was discarded during its transfer", channel, claim.frame);
            return Err(Error::Aborted);
        }

        let mut stamp = claim.stamp;
        if claim.direction == Direction::Playout {
            stamp.timecode = buffers.timecode;
            stamp.ltc = buffers.ltc;
            stamp.user_cookie = buffers.user_cookie;
            stamp.repeats = 0;
            if let Some(span) = claim.audio {
                stamp.audio_start = span.start as u32;
                stamp.audio_end = ((span.start + span.len) % span.ring) as u32;
            }
            ring.slot_mut(claim.frame).stamp = stamp.clone();
        }

        let buffer_level = ring.level();
        if let (Direction::Playout, Some(span)) = (claim.direction, claim.audio) {
            st.audio_offset = ((span.start + span.len) % span.ring) as u32;
        }

        debug!("{}: transferred frame {}", channel, claim.frame);
        Ok(TransferStatus {
            frame: claim.frame,
            state: st.state,
            buffer_level,
            frames_processed: st.processed,
            frames_dropped: st.dropped,
            stamp,
            video_bytes: claim.video,
            audio_bytes: claim.audio.map_or(0, |span| span.len),
            anc_bytes: claim.anc,
        })
    }

    /// Waits for a usable slot and borrows it
    fn claim(
        &self,
        channel: Channel,
        abort: &Arc<AtomicBool>,
        buffers: &HostBuffers<'_>,
    ) -> Result<Claim> {
        let cell = self.cell(channel);
        let deadline = Instant::now() + self.shared.config.transfer_timeout;
        let mut st = cell.state.lock();

        loop {
            if abort.load(Ordering::SeqCst) {
                return Err(Error::Aborted);
            }
            if st.state == State::Disabled || !Arc::ptr_eq(&st.abort, abort) {
                return Err(Error::NotCirculating(channel));
            }
            let desc = match st.descriptor.clone() {
                Some(desc) => desc,
                None => return Err(Error::NotCirculating(channel)),
            };
            let (video, anc) = self.check_buffers(&desc, buffers)?;

            let audio_offset = st.audio_offset as usize;
            let session = st.session;
            if let Some(ring) = st.ring.as_mut() {
                if let Some(frame) = ring.next_transfer() {
                    let stamp = ring.slot(frame).stamp.clone();
                    let audio = self.audio_span(&desc, &stamp, audio_offset, buffers)?;
                    ring.borrow(frame);
                    return Ok(Claim {
                        frame,
                        session,
                        direction: desc.direction,
                        video,
                        anc,
                        audio,
                        stamp,
                    });
                }
            }

            if cell.tick.wait_until(&mut st, deadline).timed_out() {
                let waiting = st
                    .ring
                    .as_ref()
                    .map_or(true, |ring| ring.next_transfer().is_none());
                if waiting && !abort.load(Ordering::SeqCst) {
                    return Err(Error::Timeout);
                }
            }
        }
    }

    /// Checks the host buffers against the session, returning video and anc byte counts
    fn check_buffers(
        &self,
        desc: &CirculateDescriptor,
        buffers: &HostBuffers<'_>,
    ) -> Result<(usize, (usize, usize))> {
        let anc = if desc.options.contains(Options::ANC) {
            desc.anc_sizes
        } else {
            (0, 0)
        };
        let video = match desc.video_size {
            0 => self.shared.config.frame_size - anc.0 - anc.1,
            size => size,
        };

        too_small("video", video, buffers.video.len())?;
        if anc.0 > 0 {
            too_small("anc field 1", anc.0, buffers.anc.as_ref().map_or(0, |b| b.len()))?;
        }
        if anc.1 > 0 {
            too_small("anc field 2", anc.1, buffers.anc_field2.as_ref().map_or(0, |b| b.len()))?;
        }
        if desc.direction == Direction::Capture && desc.audio.is_some() {
            too_small("audio", desc.max_audio_bytes, buffers.audio_len())?;
        }
        Ok((video, anc))
    }

    fn audio_span(
        &self,
        desc: &CirculateDescriptor,
        stamp: &FrameStamp,
        write_offset: usize,
        buffers: &HostBuffers<'_>,
    ) -> Result<Option<AudioSpan>> {
        let audio = match (desc.audio, buffers.audio.as_ref()) {
            (Some(audio), Some(_)) => audio,
            _ => return Ok(None),
        };
        let config = &self.shared.config;
        let ring = config.audio_ring_size();
        let frame = config.audio_frame(audio.index()).ok_or(Error::InvalidDescriptor(
            "audio system has no ring configured on this device",
        ))?;

        let (start, len) = match desc.direction {
            Direction::Capture => {
                let len = stamp.audio_bytes(ring);
                too_small("audio", len, buffers.audio_len())?;
                (stamp.audio_start as usize, len)
            }
            Direction::Playout => {
                let len = buffers.audio_len();
                if len > ring {
                    return Err(Error::InvalidDescriptor("audio payload exceeds the audio ring"));
                }
                (write_offset % ring.max(1), len)
            }
        };
        Ok(Some(AudioSpan {
            frame,
            start,
            len,
            ring,
        }))
    }

    /// Runs the DMA of a claimed slot without holding the channel state lock
    fn move_frame(
        &self,
        claim: &Claim,
        abort: &AtomicBool,
        buffers: &mut HostBuffers<'_>,
    ) -> Result<()> {
        let frame_size = self.shared.config.frame_size;
        let (anc1, anc2) = claim.anc;
        let capture = claim.direction == Direction::Capture;

        self.dma(abort, capture, claim.frame, 0, &mut buffers.video[..claim.video])?;
        if anc1 > 0 {
            if let Some(buf) = buffers.anc.as_mut() {
                let offset = frame_size - anc1 - anc2;
                self.dma(abort, capture, claim.frame, offset, &mut buf[..anc1])?;
            }
        }
        if anc2 > 0 {
            if let Some(buf) = buffers.anc_field2.as_mut() {
                let offset = frame_size - anc2;
                self.dma(abort, capture, claim.frame, offset, &mut buf[..anc2])?;
            }
        }

        if let (Some(span), Some(buf)) = (claim.audio, buffers.audio.as_mut()) {
            for (offset, host, len) in span.pieces() {
                self.dma(abort, capture, span.frame, offset, &mut buf[host..host + len])?;
            }
        }
        Ok(())
    }

    /// DMA in segments, checking for an abort between segments
    fn dma(
        &self,
        abort: &AtomicBool,
        to_host: bool,
        frame: u32,
        offset: usize,
        host: &mut [u8],
    ) -> Result<()> {
        let driver = &*self.shared.driver;
        let segment = self.shared.config.dma_segment_size.max(1);
        for (index, chunk) in host.chunks_mut(segment).enumerate() {
            if abort.load(Ordering::SeqCst) {
                return Err(Error::Aborted);
            }
            let at = offset + index * segment;
            if to_host {
                driver.dma_to_host(frame, at, chunk)?;
            } else {
                driver.dma_from_host(frame, at, chunk)?;
            }
        }
        Ok(())
    }
}

fn too_small(what: &'static str, needed: usize, actual: usize) -> Result<()> {
    if actual < needed {
        Err(Error::BufferTooSmall {
            what,
            needed,
            actual,
        })
    } else {
        Ok(())
    }
}
