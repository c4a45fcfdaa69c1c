//! Shared media types for the fieldline crates.
//!
//! These are the seam between fieldline and its host framework: timed byte
//! buffers, rational framerates, and the per-frame caption metadata list.
//! The host owns pads, events, and negotiation; everything here is plain
//! data that the vbi/cc/mxf crates push and pull.

use bytes::Bytes;
use smallvec::SmallVec;

mod timecode;

pub use timecode::Timecode;

/// A point in or span of stream time, in nanoseconds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClockTime(pub u64);

pub const SECOND: ClockTime = ClockTime(1_000_000_000);
pub const MSECOND: ClockTime = ClockTime(1_000_000);
pub const USECOND: ClockTime = ClockTime(1_000);

impl ClockTime {
    pub fn nanos(self) -> u64 {
        self.0
    }

    /// `self * num / denom` with the intermediate kept in u128.
    pub fn scale(self, num: u64, denom: u64) -> ClockTime {
        assert!(denom != 0);
        ClockTime(((self.0 as u128) * (num as u128) / (denom as u128)) as u64)
    }

    pub fn scale_round(self, num: u64, denom: u64) -> ClockTime {
        assert!(denom != 0);
        let v = (self.0 as u128) * (num as u128) + (denom as u128) / 2;
        ClockTime((v / (denom as u128)) as u64)
    }

    pub fn saturating_sub(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Add for ClockTime {
    type Output = ClockTime;
    fn add(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for ClockTime {
    type Output = ClockTime;
    fn sub(self, rhs: ClockTime) -> ClockTime {
        ClockTime(self.0 - rhs.0)
    }
}

impl std::ops::Mul<u64> for ClockTime {
    type Output = ClockTime;
    fn mul(self, rhs: u64) -> ClockTime {
        ClockTime(self.0 * rhs)
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0 / SECOND.0;
        let ns = self.0 % SECOND.0;
        write!(f, "{}:{:02}:{:02}.{:09}", s / 3600, (s / 60) % 60, s % 60, ns)
    }
}

/// `val * num / denom` on plain u64 values, without overflow on the product.
pub fn u64_scale(val: u64, num: u64, denom: u64) -> u64 {
    assert!(denom != 0);
    ((val as u128) * (num as u128) / (denom as u128)) as u64
}

pub fn u64_scale_round(val: u64, num: u64, denom: u64) -> u64 {
    assert!(denom != 0);
    (((val as u128) * (num as u128) + (denom as u128) / 2) / (denom as u128)) as u64
}

/// A rational number, typically a framerate or edit rate.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Fraction {
    pub n: i32,
    pub d: i32,
}

impl Fraction {
    pub const fn new(n: i32, d: i32) -> Fraction {
        Fraction { n, d }
    }

    pub fn is_valid(self) -> bool {
        self.n > 0 && self.d > 0
    }

    /// `a * b`, reduced. `None` if the reduced result leaves i32 range.
    pub fn multiply(a: Fraction, b: Fraction) -> Option<Fraction> {
        let mut n = (a.n as i64) * (b.n as i64);
        let mut d = (a.d as i64) * (b.d as i64);
        if d == 0 {
            return None;
        }
        let g = gcd(n.unsigned_abs(), d.unsigned_abs());
        if g > 1 {
            n /= g as i64;
            d /= g as i64;
        }
        if n > i32::MAX as i64 || n < i32::MIN as i64 || d > i32::MAX as i64 {
            return None;
        }
        Some(Fraction { n: n as i32, d: d as i32 })
    }

    /// Compares `a` and `b` by cross-multiplication.
    pub fn compare(a: Fraction, b: Fraction) -> std::cmp::Ordering {
        ((a.n as i64) * (b.d as i64)).cmp(&((b.n as i64) * (a.d as i64)))
    }

    pub fn as_f64(self) -> f64 {
        self.n as f64 / self.d as f64
    }
}

impl std::fmt::Display for Fraction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.n, self.d)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Buffer flags, matching the subset of host-framework flags fieldline
/// actually inspects.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct BufferFlags(pub u32);

impl BufferFlags {
    pub const DISCONT: BufferFlags = BufferFlags(1 << 0);
    /// Not an independently decodable unit.
    pub const DELTA_UNIT: BufferFlags = BufferFlags(1 << 1);
    pub const GAP: BufferFlags = BufferFlags(1 << 2);
    pub const INTERLACED: BufferFlags = BufferFlags(1 << 3);
    pub const TOP_FIELD: BufferFlags = BufferFlags(1 << 4);
    pub const BOTTOM_FIELD: BufferFlags = BufferFlags(1 << 5);
    /// Buffer carries a single field of interlaced video.
    pub const ONEFIELD: BufferFlags = BufferFlags(1 << 6);

    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: BufferFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: BufferFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for BufferFlags {
    type Output = BufferFlags;
    fn bitor(self, rhs: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for BufferFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (bit, name) in &[
            (BufferFlags::DISCONT, "DISCONT"),
            (BufferFlags::DELTA_UNIT, "DELTA_UNIT"),
            (BufferFlags::GAP, "GAP"),
            (BufferFlags::INTERLACED, "INTERLACED"),
            (BufferFlags::TOP_FIELD, "TOP_FIELD"),
            (BufferFlags::BOTTOM_FIELD, "BOTTOM_FIELD"),
            (BufferFlags::ONEFIELD, "ONEFIELD"),
        ] {
            if self.contains(*bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "(empty)")?;
        }
        Ok(())
    }
}

/// A timed buffer of bytes.
#[derive(Clone, Debug, Default)]
pub struct Buffer {
    pub data: Bytes,
    pub pts: Option<ClockTime>,
    pub dts: Option<ClockTime>,
    pub duration: Option<ClockTime>,
    pub flags: BufferFlags,
    /// Attached timecode meta, if any.
    pub timecode: Option<Timecode>,
}

impl Buffer {
    pub fn new(data: Bytes) -> Buffer {
        Buffer {
            data,
            pts: None,
            dts: None,
            duration: None,
            flags: BufferFlags::default(),
            timecode: None,
        }
    }

    pub fn with_pts(mut self, pts: ClockTime) -> Buffer {
        self.pts = Some(pts);
        self
    }

    pub fn with_duration(mut self, duration: ClockTime) -> Buffer {
        self.duration = Some(duration);
        self
    }

    pub fn is_keyframe(&self) -> bool {
        !self.flags.contains(BufferFlags::DELTA_UNIT)
    }
}

/// The four closed caption wire formats fieldline understands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CaptionType {
    /// Two CEA-608 bytes per frame, field association from configuration.
    Cea608Raw,
    /// CEA-608 byte pairs with a field flag, SMPTE 334-1 Annex A.
    Cea608S3341a,
    /// Raw cc_data byte triplets, CEA-708.
    Cea708CcData,
    /// Caption Distribution Packet, SMPTE 334-2.
    Cea708Cdp,
}

/// Caption bytes attached to one video frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptionMeta {
    pub caption_type: CaptionType,
    pub data: Bytes,
}

/// A video frame with attached metadata, as fieldline sees it.
///
/// Pixel data (when a component needs it) rides in `buffer.data`; the cc
/// components mostly only look at timing, flags, and the meta lists.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub buffer: Buffer,
    pub captions: SmallVec<[CaptionMeta; 2]>,
}

impl Frame {
    pub fn new(buffer: Buffer) -> Frame {
        Frame {
            buffer,
            captions: SmallVec::new(),
        }
    }

    pub fn add_caption(&mut self, caption_type: CaptionType, data: Bytes) {
        self.captions.push(CaptionMeta { caption_type, data });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_multiply_reduces() {
        let a = Fraction::new(1001, 30000);
        let b = Fraction::new(30000, 1);
        assert_eq!(Fraction::multiply(a, b), Some(Fraction::new(1001, 1)));
    }

    #[test]
    fn fraction_compare() {
        use std::cmp::Ordering;
        let a = Fraction::new(30000, 1001);
        let b = Fraction::new(30, 1);
        assert_eq!(Fraction::compare(a, b), Ordering::Less);
        assert_eq!(Fraction::compare(b, a), Ordering::Greater);
        assert_eq!(Fraction::compare(a, a), Ordering::Equal);
    }

    #[test]
    fn clock_time_scale() {
        // One frame of 30000/1001 video.
        let t = SECOND.scale(1001, 30000);
        assert_eq!(t.0, 33_366_666);
    }

    #[test]
    fn flags() {
        let mut f = BufferFlags::default();
        f.insert(BufferFlags::INTERLACED | BufferFlags::TOP_FIELD);
        assert!(f.contains(BufferFlags::INTERLACED));
        assert!(!f.contains(BufferFlags::BOTTOM_FIELD));
        f.remove(BufferFlags::TOP_FIELD);
        assert!(!f.contains(BufferFlags::TOP_FIELD));
    }
}
