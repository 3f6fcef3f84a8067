//! Blocking streams over a circulating channel
//!
//! A [`Stream`] owns the session of one channel: it initializes the channel on creation,
//! starts circulation on first use and stops it when dropped.

pub mod traits;

mod stream;
pub use stream::Stream;
