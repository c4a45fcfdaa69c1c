//! MXF primitive types: universal labels, UMIDs, timestamps, BER
//! lengths, and KLV plumbing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use failure::{bail, Error};

/// A 16-byte SMPTE universal label.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Ul(pub [u8; 16]);

impl Ul {
    pub const fn new(bytes: [u8; 16]) -> Ul {
        Ul(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn parse(data: &[u8]) -> Result<Ul, Error> {
        if data.len() < 16 {
            bail!("UL needs 16 bytes, have {}", data.len());
        }
        let mut u = [0u8; 16];
        u.copy_from_slice(&data[..16]);
        Ok(Ul(u))
    }

    /// Whether `self` matches `other` up to `prefix` bytes.
    pub fn matches_prefix(&self, other: &Ul, prefix: usize) -> bool {
        self.0[..prefix] == other.0[..prefix]
    }
}

impl std::fmt::Debug for Ul {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Random (v4) UUID used for metadata instance uids.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    pub fn generate() -> Uuid {
        Uuid(*uuid::Uuid::new_v4().as_bytes())
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn parse(data: &[u8]) -> Result<Uuid, Error> {
        if data.len() < 16 {
            bail!("UUID needs 16 bytes, have {}", data.len());
        }
        let mut u = [0u8; 16];
        u.copy_from_slice(&data[..16]);
        Ok(Uuid(u))
    }
}

impl std::fmt::Debug for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0))
    }
}

/// A 32-byte SMPTE 330M unique material identifier.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Umid(pub [u8; 32]);

impl Umid {
    /// A fresh basic UMID with a random material number.
    pub fn generate() -> Umid {
        let mut u = [0u8; 32];
        u[..12].copy_from_slice(&[
            0x06, 0x0a, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x05, 0x01, 0x01, 0x0d, 0x00,
        ]);
        u[12] = 0x13;
        u[16..32].copy_from_slice(&Uuid::generate().0);
        Umid(u)
    }

    pub fn parse(data: &[u8]) -> Result<Umid, Error> {
        if data.len() < 32 {
            bail!("UMID needs 32 bytes, have {}", data.len());
        }
        let mut u = [0u8; 32];
        u.copy_from_slice(&data[..32]);
        Ok(Umid(u))
    }
}

impl std::fmt::Debug for Umid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// MXF timestamp: date and time with 1/4 ms resolution, 8 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct MxfTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub quarter_msecond: u8,
}

impl MxfTimestamp {
    pub fn now() -> MxfTimestamp {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        MxfTimestamp::from_unix(secs)
    }

    /// Civil date from a unix timestamp (days algorithm of Howard
    /// Hinnant's date library).
    pub fn from_unix(secs: u64) -> MxfTimestamp {
        let days = (secs / 86400) as i64;
        let rem = secs % 86400;

        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
        let y = yoe + era * 400;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let d = doy - (153 * mp + 2) / 5 + 1;
        let m = if mp < 10 { mp + 3 } else { mp - 9 };
        let y = if m <= 2 { y + 1 } else { y };

        MxfTimestamp {
            year: y as u16,
            month: m as u8,
            day: d as u8,
            hour: (rem / 3600) as u8,
            minute: ((rem / 60) % 60) as u8,
            second: (rem % 60) as u8,
            quarter_msecond: 0,
        }
    }

    pub fn put(&self, out: &mut BytesMut) {
        out.put_u16(self.year);
        out.put_u8(self.month);
        out.put_u8(self.day);
        out.put_u8(self.hour);
        out.put_u8(self.minute);
        out.put_u8(self.second);
        out.put_u8(self.quarter_msecond);
    }

    pub fn parse(data: &[u8]) -> Result<MxfTimestamp, Error> {
        if data.len() < 8 {
            bail!("timestamp needs 8 bytes");
        }
        Ok(MxfTimestamp {
            year: u16::from_be_bytes([data[0], data[1]]),
            month: data[2],
            day: data[3],
            hour: data[4],
            minute: data[5],
            second: data[6],
            quarter_msecond: data[7],
        })
    }
}

/// Product version of an Identification set, 10 bytes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProductVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u16,
    pub release: u16,
}

impl ProductVersion {
    pub fn put(&self, out: &mut BytesMut) {
        out.put_u16(self.major);
        out.put_u16(self.minor);
        out.put_u16(self.patch);
        out.put_u16(self.build);
        out.put_u16(self.release);
    }

    pub fn parse(data: &[u8]) -> Result<ProductVersion, Error> {
        if data.len() < 10 {
            bail!("product version needs 10 bytes");
        }
        let mut r = data;
        Ok(ProductVersion {
            major: r.get_u16(),
            minor: r.get_u16(),
            patch: r.get_u16(),
            build: r.get_u16(),
            release: r.get_u16(),
        })
    }
}

/// Encodes a BER length: short form up to 0x7f, otherwise `0x80 | n`
/// followed by `n` big-endian bytes.
pub fn ber_encode_len(len: usize, out: &mut BytesMut) {
    if len <= 0x7f {
        out.put_u8(len as u8);
        return;
    }
    let bytes = (64 - (len as u64).leading_zeros() as usize + 7) / 8;
    out.put_u8(0x80 | bytes as u8);
    for i in (0..bytes).rev() {
        out.put_u8((len >> (i * 8)) as u8);
    }
}

/// Number of bytes `ber_encode_len` will produce.
pub fn ber_encoded_size(len: usize) -> usize {
    if len <= 0x7f {
        1
    } else {
        1 + (64 - (len as u64).leading_zeros() as usize + 7) / 8
    }
}

/// Decodes a BER length; returns (length, bytes consumed).
pub fn ber_decode_len(data: &[u8]) -> Result<(u64, usize), Error> {
    if data.is_empty() {
        bail!("empty BER length");
    }
    let first = data[0];
    if first & 0x80 == 0 {
        return Ok((first as u64, 1));
    }
    let n = (first & 0x7f) as usize;
    if n == 0 || n > 8 {
        bail!("invalid BER length prefix 0x{:02x}", first);
    }
    if data.len() < 1 + n {
        bail!("truncated BER length");
    }
    let mut len = 0u64;
    for &b in &data[1..1 + n] {
        len = (len << 8) | b as u64;
    }
    Ok((len, 1 + n))
}

/// Appends one KLV triple.
pub fn put_klv(out: &mut BytesMut, key: &Ul, value: &[u8]) {
    out.put_slice(&key.0);
    ber_encode_len(value.len(), out);
    out.put_slice(value);
}

/// Splits one KLV triple off the front of `data`; returns
/// (key, value, bytes consumed).
pub fn take_klv(data: &[u8]) -> Result<(Ul, &[u8], usize), Error> {
    let key = Ul::parse(data)?;
    let (len, len_size) = ber_decode_len(&data[16..])?;
    let start = 16 + len_size;
    let end = start + len as usize;
    if data.len() < end {
        bail!("truncated KLV value: need {} bytes, have {}", end, data.len());
    }
    Ok((key, &data[start..end], end))
}

/// Serializes a string as UTF-16BE, the MXF string encoding.
pub fn put_utf16(out: &mut BytesMut, s: &str) {
    for unit in s.encode_utf16() {
        out.put_u16(unit);
    }
}

pub fn parse_utf16(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

// ---------------------------------------------------------------------
// Known labels.

/// Prefix of all partition pack keys; byte 13 encodes the partition kind
/// and byte 14 its open/closed and complete/incomplete status.
pub const PARTITION_PACK_PREFIX: [u8; 13] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01,
];

pub const PRIMER_PACK_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x05,
    0x01, 0x00,
]);

pub const RANDOM_INDEX_PACK_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x11,
    0x01, 0x00,
]);

pub const INDEX_TABLE_SEGMENT_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x10,
    0x01, 0x00,
]);

pub const FILL_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x03, 0x01, 0x02, 0x10, 0x01, 0x00,
    0x00, 0x00,
]);

/// Prefix of all structural metadata set keys; bytes 13..15 carry the
/// two-byte set type.
pub const METADATA_SET_PREFIX: [u8; 13] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0d, 0x01, 0x01, 0x01, 0x01,
];

pub fn metadata_set_key(set_type: u16) -> Ul {
    let mut u = [0u8; 16];
    u[..13].copy_from_slice(&METADATA_SET_PREFIX);
    u[13] = (set_type >> 8) as u8;
    u[14] = (set_type & 0xff) as u8;
    Ul(u)
}

pub fn parse_metadata_set_key(key: &Ul) -> Option<u16> {
    if key.0[..13] != METADATA_SET_PREFIX {
        return None;
    }
    Some(((key.0[13] as u16) << 8) | key.0[14] as u16)
}

/// Operational pattern 1a, single item single package, internal essence.
pub const OP_1A_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0d, 0x01, 0x02, 0x01, 0x01, 0x01,
    0x09, 0x00,
]);

/// Generic container essence element key; bytes 12..15 are patched with
/// the track number.
pub const GC_ESSENCE_ELEMENT_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x00, 0x00,
    0x00, 0x00,
]);

/// Generic container, frame-wrapped uncompressed picture.
pub const EC_UNCOMPRESSED_PICTURE_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x02, 0x05,
    0x00, 0x01,
]);

/// Generic container, frame-wrapped broadcast wave audio.
pub const EC_BWF_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01, 0x02, 0x06,
    0x01, 0x00,
]);

/// Generic container, multiple wrappings; used by the multiple
/// descriptor when a package mixes essence kinds.
pub const EC_MULTIPLE_WRAPPINGS_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x03, 0x0d, 0x01, 0x03, 0x01, 0x02, 0x7f,
    0x01, 0x00,
]);

// Track data definitions (SMPTE RP224).

pub const DD_TIMECODE_12M_INACTIVE_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x01, 0x01, 0x00,
    0x00, 0x00,
]);

pub const DD_PICTURE_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x02, 0x01, 0x00,
    0x00, 0x00,
]);

pub const DD_SOUND_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x02, 0x02, 0x00,
    0x00, 0x00,
]);

pub const DD_DATA_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x02, 0x03, 0x00,
    0x00, 0x00,
]);

/// Track kinds, in the order the muxer interleaves them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrackType {
    Unknown,
    Timecode12MInactive,
    Timecode12MActive,
    Timecode309M,
    Metadata,
    PictureEssence,
    SoundEssence,
    DataEssence,
    AuxiliaryData,
    ParsedText,
}

/// Classifies a track's data definition label.
pub fn track_type_for_data_definition(ul: &Ul) -> TrackType {
    if ul.0[..8] != [0x06, 0x0e, 0x2b, 0x34, 0x04, 0x01, 0x01, 0x01]
        || ul.0[8] != 0x01
        || ul.0[9] != 0x03
        || ul.0[10] != 0x02
    {
        return TrackType::Unknown;
    }
    match (ul.0[11], ul.0[12]) {
        (0x01, 0x01) => TrackType::Timecode12MInactive,
        (0x01, 0x02) => TrackType::Timecode12MActive,
        (0x01, 0x03) => TrackType::Timecode309M,
        (0x01, 0x10) => TrackType::Metadata,
        (0x02, 0x01) => TrackType::PictureEssence,
        (0x02, 0x02) => TrackType::SoundEssence,
        (0x02, 0x03) => TrackType::DataEssence,
        (0x02, 0x04) => TrackType::AuxiliaryData,
        (0x02, 0x05) => TrackType::ParsedText,
        _ => TrackType::Unknown,
    }
}

/// Frames a payload as a generic container essence element.
pub fn wrap_essence_element(track_number: u32, payload: &[u8]) -> Bytes {
    let mut out =
        BytesMut::with_capacity(16 + ber_encoded_size(payload.len()) + payload.len());
    let mut key = GC_ESSENCE_ELEMENT_UL;
    key.0[12..16].copy_from_slice(&track_number.to_be_bytes());
    out.put_slice(&key.0);
    ber_encode_len(payload.len(), &mut out);
    out.put_slice(payload);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ber_round_trip() {
        for &len in &[0usize, 1, 127, 128, 255, 256, 65535, 65536, 1 << 24] {
            let mut buf = BytesMut::new();
            ber_encode_len(len, &mut buf);
            assert_eq!(buf.len(), ber_encoded_size(len));
            let (decoded, consumed) = ber_decode_len(&buf).unwrap();
            assert_eq!(decoded as usize, len);
            assert_eq!(consumed, buf.len());
        }
        // Short form stays one byte.
        let mut buf = BytesMut::new();
        ber_encode_len(0x7f, &mut buf);
        assert_eq!(&buf[..], &[0x7f]);
    }

    #[test]
    fn klv_round_trip() {
        let mut buf = BytesMut::new();
        put_klv(&mut buf, &PRIMER_PACK_UL, &[1, 2, 3, 4]);
        let (key, value, consumed) = take_klv(&buf).unwrap();
        assert_eq!(key, PRIMER_PACK_UL);
        assert_eq!(value, &[1, 2, 3, 4]);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn metadata_set_keys() {
        let key = metadata_set_key(0x012f);
        assert_eq!(key.0[13], 0x01);
        assert_eq!(key.0[14], 0x2f);
        assert_eq!(parse_metadata_set_key(&key), Some(0x012f));
        assert_eq!(parse_metadata_set_key(&PRIMER_PACK_UL), None);
    }

    #[test]
    fn track_types_order_picture_before_sound() {
        let picture = track_type_for_data_definition(&DD_PICTURE_UL);
        let sound = track_type_for_data_definition(&DD_SOUND_UL);
        let tc = track_type_for_data_definition(&DD_TIMECODE_12M_INACTIVE_UL);
        assert!(tc < picture);
        assert!(picture < sound);
        assert_eq!(track_type_for_data_definition(&OP_1A_UL), TrackType::Unknown);
    }

    #[test]
    fn essence_element_framing() {
        let elem = wrap_essence_element(0x1501_0501, &[0xaa; 10]);
        assert_eq!(
            &elem[..16],
            &[
                0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01,
                0x15, 0x01, 0x05, 0x01
            ]
        );
        assert_eq!(elem[16], 10);
        assert_eq!(elem.len(), 16 + 1 + 10);
    }

    #[test]
    fn timestamp_from_unix() {
        // 2026-08-01 00:00:00 UTC.
        let ts = MxfTimestamp::from_unix(1_785_456_000);
        assert_eq!((ts.year, ts.month, ts.day), (2026, 7, 31));
        let ts = MxfTimestamp::from_unix(0);
        assert_eq!((ts.year, ts.month, ts.day), (1970, 1, 1));
    }

    #[test]
    fn umid_shape() {
        let a = Umid::generate();
        let b = Umid::generate();
        assert_eq!(&a.0[..12], &b.0[..12]);
        assert_ne!(&a.0[16..], &b.0[16..]);
    }
}
