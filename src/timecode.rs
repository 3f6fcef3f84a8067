use std::fmt;

/// Word value the hardware uses to mark an invalid timecode
const INVALID_WORD: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// RP188 timecode as carried in the device registers
///
/// `low` holds the frames and seconds BCD digits, `high` the minutes and hours.
/// `dbb` carries the distributed binary bits (source and status flags).
pub struct Timecode {
    pub dbb: u32,
    pub low: u32,
    pub high: u32,
}

impl Timecode {
    /// Returns a timecode from its raw register words
    ///
    /// # Arguments
    ///
    /// * `dbb` - Distributed binary bits
    /// * `low` - Frames and seconds word
    /// * `high` - Minutes and hours word
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::Timecode;
    /// let tc = Timecode::new(0, 0x0000_0000, 0x0000_0001);
    /// assert!(tc.is_valid());
    /// ```
    pub fn new(dbb: u32, low: u32, high: u32) -> Self {
        Timecode { dbb, low, high }
    }

    /// Returns the marker value the hardware reports when no timecode is present
    pub fn invalid() -> Self {
        Timecode {
            dbb: 0,
            low: INVALID_WORD,
            high: INVALID_WORD,
        }
    }

    /// Builds a non-drop-frame timecode from its components
    ///
    /// Components past their range are clamped to its top.
    ///
    /// # Arguments
    ///
    /// * `hours` - 0..=23
    /// * `minutes` - 0..=59
    /// * `seconds` - 0..=59
    /// * `frames` - 0..=39, the widest frame count the register field holds
    ///
    /// # Example
    ///
    /// ```
    /// use framecirc::Timecode;
    /// let tc = Timecode::from_hmsf(1, 2, 3, 4);
    /// assert_eq!(tc.to_string(), "01:02:03:04");
    /// ```
    pub fn from_hmsf(hours: u8, minutes: u8, seconds: u8, frames: u8) -> Self {
        let (hours, minutes) = (hours.min(23), minutes.min(59));
        let (seconds, frames) = (seconds.min(59), frames.min(39));
        let low = bcd(frames) as u32 | (bcd(seconds) as u32) << 16;
        let high = bcd(minutes) as u32 | (bcd(hours) as u32) << 16;
        Timecode { dbb: 0, low, high }
    }

    pub fn is_valid(&self) -> bool {
        self.low != INVALID_WORD && self.high != INVALID_WORD
    }

    /// Splits a valid timecode into hours, minutes, seconds and frames
    pub fn hmsf(&self) -> Option<(u8, u8, u8, u8)> {
        if !self.is_valid() {
            return None;
        }

        Some((
            unbcd((self.high >> 16) as u8 & 0x3F),
            unbcd(self.high as u8 & 0x7F),
            unbcd((self.low >> 16) as u8 & 0x7F),
            unbcd(self.low as u8 & 0x3F),
        ))
    }
}

impl Default for Timecode {
    fn default() -> Self {
        Timecode::invalid()
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hmsf() {
            Some((h, m, s, fr)) => write!(f, "{:02}:{:02}:{:02}:{:02}", h, m, s, fr),
            None => write!(f, "--:--:--:--"),
        }
    }
}

fn bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

fn unbcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}
