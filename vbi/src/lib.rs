//! Raw VBI decoding: recover digitally encoded data services (closed
//! captions, teletext, VPS, WSS) from sampled analog scan lines.
//!
//! The [bit_slicer] works on a single line; the [raw_decoder] drives up to
//! eight slicers across a whole VBI image and learns which lines carry
//! which service. [sim] goes the other way and synthesizes raw lines from
//! sliced data, which is how the line-21 encoder paints captions back into
//! a frame.

pub mod bit_slicer;
pub mod raw_decoder;
pub mod sampling;
pub mod services;
pub mod sim;

pub use bit_slicer::{BitSlicer, Modulation, SampleFormat};
pub use raw_decoder::RawDecoder;
pub use sampling::SamplingPar;

/// Set of data services, one bit per service.
pub type ServiceSet = u32;

pub const SLICED_TELETEXT_B_L10_625: ServiceSet = 0x0000_0001;
pub const SLICED_TELETEXT_B_L25_625: ServiceSet = 0x0000_0002;
pub const SLICED_TELETEXT_B: ServiceSet =
    SLICED_TELETEXT_B_L10_625 | SLICED_TELETEXT_B_L25_625;
pub const SLICED_VPS: ServiceSet = 0x0000_0004;
pub const SLICED_CAPTION_625_F1: ServiceSet = 0x0000_0008;
pub const SLICED_CAPTION_625_F2: ServiceSet = 0x0000_0010;
pub const SLICED_CAPTION_625: ServiceSet = SLICED_CAPTION_625_F1 | SLICED_CAPTION_625_F2;
pub const SLICED_CAPTION_525_F1: ServiceSet = 0x0000_0020;
pub const SLICED_CAPTION_525_F2: ServiceSet = 0x0000_0040;
pub const SLICED_CAPTION_525: ServiceSet = SLICED_CAPTION_525_F1 | SLICED_CAPTION_525_F2;
pub const SLICED_2X_CAPTION_525: ServiceSet = 0x0000_0080;
pub const SLICED_TELETEXT_C_525: ServiceSet = 0x0000_0100;
pub const SLICED_WSS_625: ServiceSet = 0x0000_0400;
pub const SLICED_VPS_F2: ServiceSet = 0x0000_1000;
pub const SLICED_TELETEXT_A: ServiceSet = 0x0000_2000;
pub const SLICED_TELETEXT_C_625: ServiceSet = 0x0000_4000;
pub const SLICED_TELETEXT_D_625: ServiceSet = 0x0000_8000;
pub const SLICED_TELETEXT_B_525: ServiceSet = 0x0001_0000;
pub const SLICED_TELETEXT_D_525: ServiceSet = 0x0002_0000;
pub const SLICED_VBI_625: ServiceSet = 0x2000_0000;
pub const SLICED_VBI_525: ServiceSet = 0x4000_0000;

/// Set of video standards; only the two scan systems matter here.
pub type VideoStdSet = u32;

pub const VIDEOSTD_SET_EMPTY: VideoStdSet = 0;
pub const VIDEOSTD_SET_625_50: VideoStdSet = 1;
pub const VIDEOSTD_SET_PAL_BG: VideoStdSet = 1;
pub const VIDEOSTD_SET_525_60: VideoStdSet = 2;
pub const VIDEOSTD_SET_ALL: VideoStdSet = 3;

pub fn videostd_set_from_scanning(scanning: u32) -> VideoStdSet {
    match scanning {
        525 => VIDEOSTD_SET_525_60,
        625 => VIDEOSTD_SET_625_50,
        _ => VIDEOSTD_SET_EMPTY,
    }
}

/// Maximum payload of any service in the table, in bytes.
pub const MAX_SLICED_BYTES: usize = 42;

/// One decoded line of VBI data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sliced {
    /// The service (or service set) this line carries.
    pub id: ServiceSet,
    /// ITU-R line number, 0 if unknown.
    pub line: u32,
    /// Payload, LSB first per service definition.
    pub data: [u8; MAX_SLICED_BYTES],
}

impl Sliced {
    pub fn new(id: ServiceSet, line: u32) -> Sliced {
        Sliced {
            id,
            line,
            data: [0; MAX_SLICED_BYTES],
        }
    }

    /// Payload length in bytes, rounded up from the service's bit count.
    pub fn payload_len(&self) -> usize {
        (services::payload_bits(self.id) as usize + 7) / 8
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.payload_len()]
    }
}
