use log::{debug, warn};
use parking_lot::Mutex;

use crate::channel::{Channel, MAX_CHANNELS};
use crate::descriptor::FrameRange;
use crate::error::{Error, Result};

/// Allocator of device frame buffers shared by all channels
///
/// Every scan-and-reserve happens under one pool-wide lock, so two channels can never
/// be handed overlapping frames, whichever thread they initialize from.
pub struct FramePool {
    capacity: u32,
    reserved: Mutex<[Option<FrameRange>; MAX_CHANNELS]>,
}

impl FramePool {
    /// Returns a pool managing frames `0..capacity`
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::{Channel, FramePool};
    ///
    /// let pool = FramePool::new(16);
    /// let ch1 = Channel::new(1).unwrap();
    /// let range = pool.reserve(ch1, 4).unwrap();
    /// assert_eq!((range.start, range.end), (0, 3));
    /// assert_eq!(pool.free_frames(), 12);
    /// pool.release(ch1);
    /// assert_eq!(pool.free_frames(), 16);
    /// ```
    pub fn new(capacity: u32) -> Self {
        FramePool {
            capacity,
            reserved: Mutex::new([None; MAX_CHANNELS]),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reserves the first block of `count` contiguous free frames for `channel`
    pub fn reserve(&self, channel: Channel, count: u32) -> Result<FrameRange> {
        let mut reserved = self.reserved.lock();
        if let Some(existing) = reserved[channel.index()] {
            return Err(Error::Overlap {
                requested: existing,
                owner: channel,
            });
        }

        let range = free_regions(self.capacity, &*reserved)
            .into_iter()
            .find(|region| region.count() >= count)
            .and_then(|region| FrameRange::with_count(region.start, count))
            .ok_or(Error::ResourceExhausted { requested: count })?;

        reserved[channel.index()] = Some(range);
        debug!("{}: reserved {}", channel, range);
        Ok(range)
    }

    /// Reserves exactly `range` for `channel`, provided no other channel holds any of it
    pub fn reserve_explicit(&self, channel: Channel, range: FrameRange) -> Result<FrameRange> {
        if range.end >= self.capacity {
            return Err(Error::OutOfRange {
                frame: range.end,
                range: FrameRange {
                    start: 0,
                    end: self.capacity.saturating_sub(1),
                },
            });
        }

        let mut reserved = self.reserved.lock();
        for (index, other) in reserved.iter().enumerate() {
            if let Some(other) = other {
                if index == channel.index() || other.overlaps(&range) {
                    let owner = Channel::from_index(index).unwrap_or(channel);
                    warn!("{}: {} collide with {} of {}", channel, range, other, owner);
                    return Err(Error::Overlap {
                        requested: range,
                        owner,
                    });
                }
            }
        }

        reserved[channel.index()] = Some(range);
        debug!("{}: reserved {}", channel, range);
        Ok(range)
    }

    /// Frees the frames of `channel`; releasing an unreserved channel does nothing
    pub fn release(&self, channel: Channel) -> Option<FrameRange> {
        let released = self.reserved.lock()[channel.index()].take();
        if let Some(range) = released {
            debug!("{}: released {}", channel, range);
        }
        released
    }

    pub fn reservation(&self, channel: Channel) -> Option<FrameRange> {
        self.reserved.lock()[channel.index()]
    }

    /// Unreserved frame ranges in ascending order
    pub fn free_regions(&self) -> Vec<FrameRange> {
        free_regions(self.capacity, &*self.reserved.lock())
    }

    pub fn free_frames(&self) -> u32 {
        self.free_regions().iter().map(FrameRange::count).sum()
    }
}

fn free_regions(capacity: u32, reserved: &[Option<FrameRange>]) -> Vec<FrameRange> {
    let mut taken: Vec<FrameRange> = reserved.iter().filter_map(|r| *r).collect();
    taken.sort_by_key(|r| r.start);

    let mut regions = Vec::new();
    let mut next = 0;
    for range in taken {
        if range.start > next {
            regions.extend(FrameRange::new(next, range.start - 1));
        }
        next = next.max(range.end + 1);
    }
    if next < capacity {
        regions.extend(FrameRange::new(next, capacity - 1));
    }
    regions
}
