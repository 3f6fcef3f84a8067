use std::collections::VecDeque;
use std::fmt;

use crate::channel::Direction;
use crate::circulate::stamp::FrameStamp;
use crate::descriptor::FrameRange;

/// What a frame slot currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRole {
    Free,
    /// Captured by the device, waiting for the host to transfer it
    Captured,
    /// Written by the host, waiting for the device to present it
    Queued,
    /// Being written (capture) or presented (playout) by the device
    Active,
}

impl fmt::Display for SlotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SlotRole::Free => write!(f, "free"),
            SlotRole::Captured => write!(f, "captured"),
            SlotRole::Queued => write!(f, "queued"),
            SlotRole::Active => write!(f, "active"),
        }
    }
}

/// One frame buffer of a circulating channel
#[derive(Debug, Clone)]
pub struct FrameSlot {
    pub frame: u32,
    pub role: SlotRole,
    /// Held by a transfer in progress
    pub borrowed: bool,
    pub stamp: FrameStamp,
}

/// Outcome of one tick for the slot ring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Advance {
    Moved { from: u32, to: u32 },
    /// Redirected onto the frame already active
    Stayed { at: u32 },
    /// The next slot was not ready; the device keeps the current one
    Held { at: u32 },
}

/// Slots of a channel plus the cursors the device and host work from
pub(crate) struct Ring {
    range: FrameRange,
    direction: Direction,
    slots: Vec<FrameSlot>,
    /// Captured or queued frames, oldest first
    ready: VecDeque<u32>,
    active: Option<u32>,
    /// Next frame the host fills on playout
    write: u32,
}

impl Ring {
    pub fn new(range: FrameRange, direction: Direction) -> Self {
        let slots = range
            .iter()
            .map(|frame| FrameSlot {
                frame,
                role: SlotRole::Free,
                borrowed: false,
                stamp: FrameStamp::new(frame),
            })
            .collect();

        Ring {
            range,
            direction,
            slots,
            ready: VecDeque::new(),
            active: None,
            write: range.start,
        }
    }

    pub fn range(&self) -> FrameRange {
        self.range
    }

    pub fn active(&self) -> Option<u32> {
        self.active
    }

    pub fn slot(&self, frame: u32) -> &FrameSlot {
        &self.slots[self.index(frame)]
    }

    pub fn slot_mut(&mut self, frame: u32) -> &mut FrameSlot {
        let index = self.index(frame);
        &mut self.slots[index]
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    fn index(&self, frame: u32) -> usize {
        (frame - self.range.start) as usize
    }

    /// Frames waiting on the other side: captured for the host, queued for the device
    pub fn level(&self) -> u32 {
        self.ready.len() as u32
    }

    /// Frames a transfer could use right now
    pub fn available(&self) -> u32 {
        match self.direction {
            Direction::Capture => self
                .ready
                .iter()
                .filter(|&&frame| !self.slot(frame).borrowed)
                .count() as u32,
            Direction::Playout => self
                .slots
                .iter()
                .filter(|slot| slot.role == SlotRole::Free && !slot.borrowed)
                .count() as u32,
        }
    }

    /// Frame the next transfer would use
    pub fn next_transfer(&self) -> Option<u32> {
        match self.direction {
            Direction::Capture => self
                .ready
                .iter()
                .copied()
                .find(|&frame| !self.slot(frame).borrowed),
            Direction::Playout => {
                let slot = self.slot(self.write);
                if slot.role == SlotRole::Free && !slot.borrowed {
                    Some(self.write)
                } else {
                    None
                }
            }
        }
    }

    pub fn borrow(&mut self, frame: u32) {
        self.slot_mut(frame).borrowed = true;
    }

    /// Returns a slot untouched after a failed transfer
    pub fn give_back(&mut self, frame: u32) {
        self.slot_mut(frame).borrowed = false;
    }

    /// Hands a transferred slot back, updating its role
    ///
    /// Returns `false` when a flush or restart discarded the slot while it was borrowed.
    pub fn complete(&mut self, frame: u32) -> bool {
        self.slot_mut(frame).borrowed = false;
        match self.direction {
            Direction::Capture => {
                let kept = self.remove_ready(frame);
                if self.slot(frame).role == SlotRole::Captured {
                    self.slot_mut(frame).role = SlotRole::Free;
                }
                kept
            }
            Direction::Playout => {
                if frame != self.write || self.slot(frame).role != SlotRole::Free {
                    return false;
                }
                self.slot_mut(frame).role = SlotRole::Queued;
                self.ready.push_back(frame);
                self.write = self.range.next(frame);
                true
            }
        }
    }

    /// Puts the device on its first frame
    ///
    /// Returns whether that slot already held data.
    pub fn begin(&mut self, first: u32) -> bool {
        let held = self.remove_ready(first);
        self.slot_mut(first).role = SlotRole::Active;
        self.active = Some(first);
        self.skip_write(first, held);
        held
    }

    /// Moves the device to its next frame, or to `redirect` when one was requested
    pub fn advance(&mut self, redirect: Option<u32>) -> Option<Advance> {
        let current = self.active?;

        if let Some(to) = redirect {
            if to == current {
                return Some(Advance::Stayed { at: current });
            }
            if !self.slot(to).borrowed {
                self.move_to(current, to);
                return Some(Advance::Moved { from: current, to });
            }
        }

        let next = self.range.next(current);
        let slot = self.slot(next);
        let ready = match self.direction {
            Direction::Capture => slot.role == SlotRole::Free,
            Direction::Playout => slot.role == SlotRole::Queued,
        };
        if ready && !slot.borrowed {
            self.move_to(current, next);
            Some(Advance::Moved {
                from: current,
                to: next,
            })
        } else {
            Some(Advance::Held { at: current })
        }
    }

    fn move_to(&mut self, from: u32, to: u32) {
        match self.direction {
            Direction::Capture => {
                self.slot_mut(from).role = SlotRole::Captured;
                self.ready.push_back(from);
            }
            Direction::Playout => self.slot_mut(from).role = SlotRole::Free,
        }

        let held = self.remove_ready(to);
        self.slot_mut(to).role = SlotRole::Active;
        self.active = Some(to);
        self.skip_write(to, held);
    }

    /// Keeps the playout write cursor off a free slot the device jumped onto
    fn skip_write(&mut self, frame: u32, held: bool) {
        if self.direction == Direction::Playout && self.write == frame && !held {
            self.write = self.range.next(frame);
        }
    }

    /// Marks up to `count` slots ahead of the device as queued without a transfer
    pub fn preroll(&mut self, count: u32) -> u32 {
        let mut added = 0;
        while self.level() < count {
            let slot = self.slot(self.write);
            if slot.role != SlotRole::Free || slot.borrowed {
                break;
            }
            let frame = self.write;
            self.slot_mut(frame).role = SlotRole::Queued;
            self.ready.push_back(frame);
            self.write = self.range.next(frame);
            added += 1;
        }
        added
    }

    /// Frees every captured or queued slot that is not borrowed
    ///
    /// The active slot is left alone. Returns the number of discarded frames.
    pub fn flush(&mut self) -> u32 {
        let mut kept = VecDeque::new();
        let mut discarded = 0;
        while let Some(frame) = self.ready.pop_front() {
            if self.slot(frame).borrowed {
                kept.push_back(frame);
            } else {
                self.slot_mut(frame).role = SlotRole::Free;
                discarded += 1;
            }
        }
        self.ready = kept;

        if self.direction == Direction::Playout {
            self.write = match self.active {
                Some(active) => self.range.next(active),
                None => self.range.start,
            };
        }
        discarded
    }

    /// Returns the ring to its freshly initialized layout
    ///
    /// Borrowed slots are freed too. Their transfers belong to the previous session and
    /// never complete into this one.
    pub fn reset(&mut self) {
        while let Some(frame) = self.ready.pop_front() {
            self.slot_mut(frame).role = SlotRole::Free;
        }
        if let Some(active) = self.active.take() {
            self.slot_mut(active).role = SlotRole::Free;
        }
        self.write = self.range.start;
    }

    fn remove_ready(&mut self, frame: u32) -> bool {
        match self.ready.iter().position(|&f| f == frame) {
            Some(pos) => {
                self.ready.remove(pos);
                true
            }
            None => false,
        }
    }
}
