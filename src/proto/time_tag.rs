//! NTP-style 64-bit fixed-point time tags
//!
//! Seconds since 1900-01-01 in the high 32 bits, fraction of a second in
//! the low 32 bits. The wire sentinel `1` means "dispatch immediately";
//! `0` appears in the wild with the same meaning and is accepted too.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01)
const UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;

/// 64-bit fixed-point wall-clock timestamp controlling deferred dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeTag(u64);

impl TimeTag {
    /// The canonical "dispatch without delay" sentinel
    pub const IMMEDIATE: TimeTag = TimeTag(1);

    /// Wrap a raw 64-bit wire value
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        TimeTag(raw)
    }

    /// Raw 64-bit wire value
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// True for the immediate sentinel (0 and 1 both count on the wire)
    #[inline]
    pub const fn is_immediate(self) -> bool {
        self.0 <= 1
    }

    /// Current wall-clock time as a time tag
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// A tag `delay` into the future from now
    pub fn after(delay: Duration) -> Self {
        Self::from_system_time(SystemTime::now() + delay)
    }

    /// Convert from wall-clock time
    ///
    /// Times before the Unix epoch saturate to the epoch.
    pub fn from_system_time(t: SystemTime) -> Self {
        let since_unix = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let secs = since_unix.as_secs() + UNIX_EPOCH_OFFSET;
        let frac = (u64::from(since_unix.subsec_nanos()) << 32) / 1_000_000_000;
        TimeTag((secs << 32) | frac)
    }

    /// Convert to wall-clock time
    ///
    /// Tags before the Unix epoch (including the immediate sentinel)
    /// saturate to the Unix epoch.
    pub fn to_system_time(self) -> SystemTime {
        let secs = self.0 >> 32;
        if secs < UNIX_EPOCH_OFFSET {
            return UNIX_EPOCH;
        }
        let nanos = ((self.0 & 0xFFFF_FFFF) * 1_000_000_000) >> 32;
        UNIX_EPOCH + Duration::new(secs - UNIX_EPOCH_OFFSET, nanos as u32)
    }

    /// True once the tag's nominal time has arrived
    pub fn is_due(self) -> bool {
        self.is_immediate() || self.to_system_time() <= SystemTime::now()
    }

    /// Time remaining until the tag is due, or `None` if already due
    pub fn until_due(self) -> Option<Duration> {
        if self.is_immediate() {
            return None;
        }
        self.to_system_time()
            .duration_since(SystemTime::now())
            .ok()
            .filter(|d| !d.is_zero())
    }
}
