//! The structural metadata object graph.
//!
//! Objects cross-reference by UUID only: every strong reference is a
//! [Uuid] at rest and gets resolved through the owning [MetadataSet] at
//! emission time. Serialization is plain 377M local sets (two-byte tag,
//! two-byte length) under the set's registered key.

use std::collections::HashMap;
use std::convert::TryInto;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use failure::{bail, format_err, Error};
use log::{debug, warn};
use media::Fraction;

use crate::partition::PrimerPack;
use crate::types::{
    ber_encode_len, metadata_set_key, parse_metadata_set_key, parse_utf16, put_utf16,
    take_klv, MxfTimestamp, ProductVersion, Ul, Umid, Uuid, FILL_UL,
};

pub const TYPE_PREFACE: u16 = 0x012f;
pub const TYPE_IDENTIFICATION: u16 = 0x0130;
pub const TYPE_CONTENT_STORAGE: u16 = 0x0118;
pub const TYPE_ESSENCE_CONTAINER_DATA: u16 = 0x0123;
pub const TYPE_MATERIAL_PACKAGE: u16 = 0x0136;
pub const TYPE_SOURCE_PACKAGE: u16 = 0x0137;
pub const TYPE_TIMELINE_TRACK: u16 = 0x013b;
pub const TYPE_SEQUENCE: u16 = 0x010f;
pub const TYPE_SOURCE_CLIP: u16 = 0x0111;
pub const TYPE_TIMECODE_COMPONENT: u16 = 0x0114;
pub const TYPE_MULTIPLE_DESCRIPTOR: u16 = 0x0144;
pub const TYPE_CDCI_DESCRIPTOR: u16 = 0x0128;
pub const TYPE_MPEG_VIDEO_DESCRIPTOR: u16 = 0x0151;
pub const TYPE_GENERIC_SOUND_DESCRIPTOR: u16 = 0x0142;

/// Item label of the MPEG profile-and-level property, mapped through a
/// dynamic tag.
pub const MPEG_PROFILE_AND_LEVEL_UL: Ul = Ul::new([
    0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x05, 0x04, 0x01, 0x06, 0x02, 0x01, 0x0a,
    0x00, 0x00,
]);

/// Statically assigned item labels for the local tags this crate emits.
fn static_tag_ul(tag: u16) -> Ul {
    let b: [u8; 16] = match tag {
        0x3c0a => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x15, 0x02, 0, 0, 0, 0],
        0x0102 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x08, 0, 0, 0],
        // Preface.
        0x3b02 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x10, 0x02, 0x04, 0, 0],
        0x3b05 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x03, 0x01, 0x02, 0x01, 0x05, 0, 0, 0],
        0x3b07 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x03, 0x01, 0x02, 0x01, 0x04, 0, 0, 0],
        0x3b08 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x04, 0x06, 0x01, 0x01, 0x04, 0x01, 0x08, 0, 0],
        0x3b06 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x06, 0x04, 0, 0],
        0x3b03 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x02, 0x01, 0, 0],
        0x3b09 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x01, 0x02, 0x02, 0x03, 0, 0, 0, 0],
        0x3b0a => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x01, 0x02, 0x02, 0x10, 0x02, 0x01, 0, 0],
        0x3b0b => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x01, 0x02, 0x02, 0x10, 0x02, 0x02, 0, 0],
        // Identification.
        0x3c09 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x01, 0, 0, 0],
        0x3c01 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x02, 0x01, 0, 0],
        0x3c02 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x03, 0x01, 0, 0],
        0x3c03 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x04, 0, 0, 0],
        0x3c04 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x05, 0x01, 0, 0],
        0x3c05 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x07, 0, 0, 0],
        0x3c06 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x10, 0x02, 0x03, 0, 0],
        0x3c07 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x0a, 0, 0, 0],
        0x3c08 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x20, 0x07, 0x01, 0x06, 0x01, 0, 0],
        // Content storage.
        0x1901 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x05, 0x01, 0, 0],
        0x1902 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x05, 0x02, 0, 0],
        // Essence container data.
        0x2701 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x06, 0x01, 0, 0, 0],
        0x3f06 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x04, 0x01, 0x03, 0x04, 0x05, 0, 0, 0, 0],
        0x3f07 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x04, 0x01, 0x03, 0x04, 0x04, 0, 0, 0, 0],
        // Generic package.
        0x4401 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x15, 0x10, 0, 0, 0, 0],
        0x4402 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x01, 0x03, 0x03, 0x02, 0x01, 0, 0, 0],
        0x4405 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x10, 0x01, 0x03, 0, 0],
        0x4404 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x10, 0x02, 0x05, 0, 0],
        0x4403 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x06, 0x05, 0, 0],
        0x4701 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x02, 0x03, 0, 0],
        // Track.
        0x4801 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x01, 0x07, 0x01, 0x01, 0, 0, 0, 0],
        0x4804 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x01, 0x04, 0x01, 0x03, 0, 0, 0, 0],
        0x4802 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x01, 0x07, 0x01, 0x02, 0x01, 0, 0, 0],
        0x4803 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x02, 0x04, 0, 0],
        0x4b01 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x05, 0x30, 0x04, 0x05, 0, 0, 0, 0],
        0x4b02 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x03, 0x01, 0x03, 0, 0],
        // Sequence / structural component.
        0x0201 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x04, 0x07, 0x01, 0, 0, 0, 0, 0],
        0x0202 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x02, 0x01, 0x01, 0x03, 0, 0],
        0x1001 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x06, 0x09, 0, 0],
        // Source clip.
        0x1201 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x03, 0x01, 0x04, 0, 0],
        0x1101 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x03, 0x01, 0, 0, 0],
        0x1102 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x03, 0x02, 0, 0, 0],
        // Timecode component.
        0x1502 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x04, 0x04, 0x01, 0x01, 0x02, 0x06, 0, 0],
        0x1501 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x07, 0x02, 0x01, 0x03, 0x01, 0x05, 0, 0],
        0x1503 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x04, 0x04, 0x01, 0x01, 0x05, 0, 0, 0],
        // File descriptor.
        0x3006 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x05, 0x06, 0x01, 0x01, 0x03, 0x05, 0, 0, 0],
        0x3001 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x04, 0x06, 0x01, 0x01, 0, 0, 0, 0],
        0x3002 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x04, 0x06, 0x01, 0x02, 0, 0, 0, 0],
        0x3004 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x01, 0x02, 0, 0],
        0x3005 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x06, 0x01, 0x01, 0x04, 0x01, 0x03, 0, 0],
        // Generic picture essence descriptor.
        0x3215 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x05, 0x04, 0x05, 0x01, 0x13, 0, 0, 0, 0],
        0x320c => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x04, 0x01, 0x03, 0x01, 0x04, 0, 0, 0],
        0x3203 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x04, 0x01, 0x05, 0x02, 0x02, 0, 0, 0],
        0x3202 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x04, 0x01, 0x05, 0x02, 0x01, 0, 0, 0],
        0x320e => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x04, 0x01, 0x01, 0x01, 0x01, 0, 0, 0],
        0x320d => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x04, 0x01, 0x03, 0x02, 0x05, 0, 0, 0],
        0x3201 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x04, 0x01, 0x06, 0x01, 0, 0, 0, 0],
        // CDCI.
        0x3301 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x04, 0x01, 0x05, 0x03, 0x0a, 0, 0, 0],
        0x3302 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0x04, 0x01, 0x05, 0x01, 0x05, 0, 0, 0],
        0x3308 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x04, 0x01, 0x05, 0x01, 0x10, 0, 0, 0],
        // Generic sound essence descriptor.
        0x3d03 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x05, 0x04, 0x02, 0x03, 0x01, 0x01, 0x01, 0, 0],
        0x3d02 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x04, 0x04, 0x02, 0x03, 0x01, 0x04, 0, 0, 0],
        0x3d07 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x05, 0x04, 0x02, 0x01, 0x01, 0x04, 0, 0, 0],
        0x3d01 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x04, 0x04, 0x02, 0x03, 0x03, 0x04, 0, 0, 0],
        0x3d06 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x02, 0x04, 0x02, 0x04, 0x02, 0, 0, 0, 0],
        // Multiple descriptor.
        0x3f01 => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x04, 0x06, 0x01, 0x01, 0x04, 0x06, 0x0b, 0, 0],
        _ => [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x01, 0x01, 0x01, 0, 0, 0, 0, 0, 0, 0, 0],
    };
    Ul(b)
}

/// Local-set writer that registers each tag in the primer as it goes.
struct SetWriter<'a> {
    value: BytesMut,
    primer: &'a mut PrimerPack,
}

impl<'a> SetWriter<'a> {
    fn new(primer: &'a mut PrimerPack) -> SetWriter<'a> {
        SetWriter {
            value: BytesMut::with_capacity(256),
            primer,
        }
    }

    fn put(&mut self, tag: u16, data: &[u8]) {
        self.primer.add_mapping(tag, static_tag_ul(tag));
        self.value.put_u16(tag);
        self.value.put_u16(data.len() as u16);
        self.value.put_slice(data);
    }

    fn put_dynamic(&mut self, ul: Ul, data: &[u8]) {
        let tag = self.primer.dynamic_tag(ul);
        self.value.put_u16(tag);
        self.value.put_u16(data.len() as u16);
        self.value.put_slice(data);
    }

    fn put_u16_tag(&mut self, tag: u16, v: u16) {
        self.put(tag, &v.to_be_bytes());
    }

    fn put_u32_tag(&mut self, tag: u16, v: u32) {
        self.put(tag, &v.to_be_bytes());
    }

    fn put_i64_tag(&mut self, tag: u16, v: i64) {
        self.put(tag, &v.to_be_bytes());
    }

    fn put_fraction(&mut self, tag: u16, f: Fraction) {
        let mut b = [0u8; 8];
        b[..4].copy_from_slice(&f.n.to_be_bytes());
        b[4..].copy_from_slice(&f.d.to_be_bytes());
        self.put(tag, &b);
    }

    fn put_timestamp(&mut self, tag: u16, ts: &MxfTimestamp) {
        let mut b = BytesMut::with_capacity(8);
        ts.put(&mut b);
        self.put(tag, &b);
    }

    fn put_string(&mut self, tag: u16, s: &str) {
        let mut b = BytesMut::with_capacity(s.len() * 2);
        put_utf16(&mut b, s);
        self.put(tag, &b);
    }

    fn put_uuid_batch(&mut self, tag: u16, uuids: &[Uuid]) {
        let mut b = BytesMut::with_capacity(8 + 16 * uuids.len());
        b.put_u32(uuids.len() as u32);
        b.put_u32(16);
        for u in uuids {
            b.put_slice(&u.0);
        }
        self.put(tag, &b);
    }

    fn put_ul_batch(&mut self, tag: u16, uls: &[Ul]) {
        let mut b = BytesMut::with_capacity(8 + 16 * uls.len());
        b.put_u32(uls.len() as u32);
        b.put_u32(16);
        for u in uls {
            b.put_slice(&u.0);
        }
        self.put(tag, &b);
    }

    fn finish(self, set_type: u16) -> Bytes {
        let key = metadata_set_key(set_type);
        let mut out = BytesMut::with_capacity(16 + 9 + self.value.len());
        out.put_slice(&key.0);
        ber_encode_len(self.value.len(), &mut out);
        out.put_slice(&self.value);
        out.freeze()
    }
}

fn parse_uuid_batch(data: &[u8]) -> Result<Vec<Uuid>, Error> {
    let mut r = data;
    if r.remaining() < 8 {
        bail!("short batch");
    }
    let count = r.get_u32() as usize;
    let size = r.get_u32() as usize;
    if size != 16 || r.remaining() < count * 16 {
        bail!("invalid UUID batch {}x{}", count, size);
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(Uuid::parse(&r[..16])?);
        r.advance(16);
    }
    Ok(out)
}

fn parse_ul_batch(data: &[u8]) -> Result<Vec<Ul>, Error> {
    parse_uuid_batch(data).map(|v| v.into_iter().map(|u| Ul(u.0)).collect())
}

fn parse_fraction(data: &[u8]) -> Result<Fraction, Error> {
    if data.len() < 8 {
        bail!("fraction needs 8 bytes");
    }
    Ok(Fraction::new(
        i32::from_be_bytes(data[..4].try_into().unwrap()),
        i32::from_be_bytes(data[4..8].try_into().unwrap()),
    ))
}

fn parse_u32(data: &[u8]) -> Result<u32, Error> {
    data.get(..4)
        .map(|b| u32::from_be_bytes(b.try_into().unwrap()))
        .ok_or_else(|| format_err!("u32 needs 4 bytes"))
}

fn parse_i64(data: &[u8]) -> Result<i64, Error> {
    data.get(..8)
        .map(|b| i64::from_be_bytes(b.try_into().unwrap()))
        .ok_or_else(|| format_err!("i64 needs 8 bytes"))
}

// ---------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Preface {
    pub instance_uid: Uuid,
    pub last_modified_date: MxfTimestamp,
    pub version: u16,
    pub object_model_version: u32,
    /// UID of the primary (material) package.
    pub primary_package_uid: Uuid,
    pub identifications: Vec<Uuid>,
    pub content_storage: Uuid,
    pub operational_pattern: Ul,
    pub essence_containers: Vec<Ul>,
    pub dm_schemes: Vec<Ul>,
}

#[derive(Clone, Debug)]
pub struct Identification {
    pub instance_uid: Uuid,
    pub this_generation_uid: Uuid,
    pub company_name: String,
    pub product_name: String,
    pub product_version: ProductVersion,
    pub version_string: String,
    pub product_uid: Uuid,
    pub modification_date: MxfTimestamp,
    pub toolkit_version: ProductVersion,
    pub platform: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ContentStorage {
    pub instance_uid: Uuid,
    pub packages: Vec<Uuid>,
    pub essence_container_data: Vec<Uuid>,
}

#[derive(Clone, Debug)]
pub struct EssenceContainerData {
    pub instance_uid: Uuid,
    pub linked_package_uid: Umid,
    pub index_sid: u32,
    pub body_sid: u32,
}

/// Fields shared by material and source packages.
#[derive(Clone, Debug)]
pub struct PackageCommon {
    pub instance_uid: Uuid,
    pub package_uid: Umid,
    pub name: Option<String>,
    pub package_creation_date: MxfTimestamp,
    pub package_modified_date: MxfTimestamp,
    pub tracks: Vec<Uuid>,
}

#[derive(Clone, Debug)]
pub struct MaterialPackage {
    pub common: PackageCommon,
}

#[derive(Clone, Debug)]
pub struct SourcePackage {
    pub common: PackageCommon,
    pub descriptor: Option<Uuid>,
}

#[derive(Clone, Debug)]
pub struct TimelineTrack {
    pub instance_uid: Uuid,
    pub track_id: u32,
    pub track_number: u32,
    pub track_name: Option<String>,
    pub edit_rate: Fraction,
    pub origin: i64,
    pub sequence: Uuid,
}

#[derive(Clone, Debug)]
pub struct Sequence {
    pub instance_uid: Uuid,
    pub data_definition: Ul,
    pub duration: i64,
    pub structural_components: Vec<Uuid>,
}

#[derive(Clone, Debug)]
pub struct SourceClip {
    pub instance_uid: Uuid,
    pub data_definition: Ul,
    pub duration: i64,
    pub start_position: i64,
    pub source_package_id: Umid,
    pub source_track_id: u32,
}

#[derive(Clone, Debug)]
pub struct TimecodeComponent {
    pub instance_uid: Uuid,
    pub data_definition: Ul,
    pub duration: i64,
    pub start_timecode: i64,
    pub rounded_timecode_base: u16,
    pub drop_frame: bool,
}

/// Fields every file descriptor carries.
#[derive(Clone, Debug)]
pub struct FileDescriptorCommon {
    pub instance_uid: Uuid,
    pub linked_track_id: u32,
    pub sample_rate: Fraction,
    pub container_duration: i64,
    pub essence_container: Ul,
    pub codec: Option<Ul>,
}

impl FileDescriptorCommon {
    pub fn new(essence_container: Ul) -> FileDescriptorCommon {
        FileDescriptorCommon {
            instance_uid: Uuid([0; 16]),
            linked_track_id: 0,
            sample_rate: Fraction::new(0, 0),
            container_duration: -1,
            essence_container,
            codec: None,
        }
    }

    fn write(&self, w: &mut SetWriter<'_>) {
        w.put(0x3c0a, &self.instance_uid.0);
        w.put_u32_tag(0x3006, self.linked_track_id);
        w.put_fraction(0x3001, self.sample_rate);
        w.put_i64_tag(0x3002, self.container_duration);
        w.put(0x3004, &self.essence_container.0);
        if let Some(codec) = &self.codec {
            w.put(0x3005, &codec.0);
        }
    }

    fn handle_tag(&mut self, tag: u16, data: &[u8]) -> Result<bool, Error> {
        match tag {
            0x3c0a => self.instance_uid = Uuid::parse(data)?,
            0x3006 => self.linked_track_id = parse_u32(data)?,
            0x3001 => self.sample_rate = parse_fraction(data)?,
            0x3002 => self.container_duration = parse_i64(data)?,
            0x3004 => self.essence_container = Ul::parse(data)?,
            0x3005 => self.codec = Some(Ul::parse(data)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

/// Picture geometry shared by the picture descriptors.
#[derive(Clone, Debug, Default)]
pub struct PictureCommon {
    pub signal_standard: u8,
    pub frame_layout: u8,
    pub stored_width: u32,
    pub stored_height: u32,
    pub aspect_ratio: Fraction,
    pub video_line_map: Vec<i32>,
    pub picture_essence_coding: Option<Ul>,
}

impl PictureCommon {
    fn write(&self, w: &mut SetWriter<'_>) {
        w.put(0x3215, &[self.signal_standard]);
        w.put(0x320c, &[self.frame_layout]);
        w.put_u32_tag(0x3203, self.stored_width);
        w.put_u32_tag(0x3202, self.stored_height);
        w.put_fraction(0x320e, self.aspect_ratio);
        let mut batch = BytesMut::with_capacity(8 + 4 * self.video_line_map.len());
        batch.put_u32(self.video_line_map.len() as u32);
        batch.put_u32(4);
        for v in &self.video_line_map {
            batch.put_i32(*v);
        }
        w.put(0x320d, &batch);
        if let Some(coding) = &self.picture_essence_coding {
            w.put(0x3201, &coding.0);
        }
    }

    fn handle_tag(&mut self, tag: u16, data: &[u8]) -> Result<bool, Error> {
        match tag {
            0x3215 => self.signal_standard = data[0],
            0x320c => self.frame_layout = data[0],
            0x3203 => self.stored_width = parse_u32(data)?,
            0x3202 => self.stored_height = parse_u32(data)?,
            0x320e => self.aspect_ratio = parse_fraction(data)?,
            0x320d => {
                let mut r = data;
                if r.remaining() < 8 {
                    bail!("short video line map");
                }
                let count = r.get_u32() as usize;
                let size = r.get_u32() as usize;
                if size != 4 || r.remaining() < count * 4 {
                    bail!("invalid video line map batch");
                }
                self.video_line_map = (0..count).map(|_| r.get_i32()).collect();
            }
            0x3201 => self.picture_essence_coding = Some(Ul::parse(data)?),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Clone, Debug)]
pub struct CdciDescriptor {
    pub file: FileDescriptorCommon,
    pub picture: PictureCommon,
    pub component_depth: u32,
    pub horizontal_subsampling: u32,
    pub vertical_subsampling: u32,
}

#[derive(Clone, Debug)]
pub struct MpegVideoDescriptor {
    pub cdci: CdciDescriptor,
    pub profile_and_level: u8,
}

#[derive(Clone, Debug)]
pub struct GenericSoundDescriptor {
    pub file: FileDescriptorCommon,
    pub audio_sampling_rate: Fraction,
    pub locked: bool,
    pub channel_count: u32,
    pub quantization_bits: u32,
    pub sound_essence_compression: Option<Ul>,
}

#[derive(Clone, Debug)]
pub struct MultipleDescriptor {
    pub file: FileDescriptorCommon,
    pub sub_descriptors: Vec<Uuid>,
}

/// Any essence descriptor.
#[derive(Clone, Debug)]
pub enum Descriptor {
    Cdci(CdciDescriptor),
    MpegVideo(MpegVideoDescriptor),
    Sound(GenericSoundDescriptor),
    Multiple(MultipleDescriptor),
}

impl Descriptor {
    pub fn file(&self) -> &FileDescriptorCommon {
        match self {
            Descriptor::Cdci(d) => &d.file,
            Descriptor::MpegVideo(d) => &d.cdci.file,
            Descriptor::Sound(d) => &d.file,
            Descriptor::Multiple(d) => &d.file,
        }
    }

    pub fn file_mut(&mut self) -> &mut FileDescriptorCommon {
        match self {
            Descriptor::Cdci(d) => &mut d.file,
            Descriptor::MpegVideo(d) => &mut d.cdci.file,
            Descriptor::Sound(d) => &mut d.file,
            Descriptor::Multiple(d) => &mut d.file,
        }
    }

    pub fn instance_uid(&self) -> Uuid {
        self.file().instance_uid
    }

    pub fn essence_container(&self) -> Ul {
        self.file().essence_container
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, Descriptor::Multiple(_))
    }
}

/// One structural metadata object.
#[derive(Clone, Debug)]
pub enum MetadataObject {
    Preface(Preface),
    Identification(Identification),
    ContentStorage(ContentStorage),
    EssenceContainerData(EssenceContainerData),
    MaterialPackage(MaterialPackage),
    SourcePackage(SourcePackage),
    TimelineTrack(TimelineTrack),
    Sequence(Sequence),
    SourceClip(SourceClip),
    TimecodeComponent(TimecodeComponent),
    Descriptor(Descriptor),
}

impl MetadataObject {
    pub fn instance_uid(&self) -> Uuid {
        match self {
            MetadataObject::Preface(o) => o.instance_uid,
            MetadataObject::Identification(o) => o.instance_uid,
            MetadataObject::ContentStorage(o) => o.instance_uid,
            MetadataObject::EssenceContainerData(o) => o.instance_uid,
            MetadataObject::MaterialPackage(o) => o.common.instance_uid,
            MetadataObject::SourcePackage(o) => o.common.instance_uid,
            MetadataObject::TimelineTrack(o) => o.instance_uid,
            MetadataObject::Sequence(o) => o.instance_uid,
            MetadataObject::SourceClip(o) => o.instance_uid,
            MetadataObject::TimecodeComponent(o) => o.instance_uid,
            MetadataObject::Descriptor(o) => o.instance_uid(),
        }
    }

    /// Strong references out of this object, in property order.
    pub fn references(&self) -> Vec<Uuid> {
        match self {
            MetadataObject::Preface(o) => {
                let mut r = o.identifications.clone();
                r.push(o.content_storage);
                r
            }
            MetadataObject::ContentStorage(o) => {
                let mut r = o.packages.clone();
                r.extend(o.essence_container_data.iter().copied());
                r
            }
            MetadataObject::MaterialPackage(o) => o.common.tracks.clone(),
            MetadataObject::SourcePackage(o) => {
                let mut r = o.common.tracks.clone();
                r.extend(o.descriptor.iter().copied());
                r
            }
            MetadataObject::TimelineTrack(o) => vec![o.sequence],
            MetadataObject::Sequence(o) => o.structural_components.clone(),
            MetadataObject::Descriptor(Descriptor::Multiple(o)) => {
                o.sub_descriptors.clone()
            }
            _ => Vec::new(),
        }
    }

    pub fn set_type(&self) -> u16 {
        match self {
            MetadataObject::Preface(_) => TYPE_PREFACE,
            MetadataObject::Identification(_) => TYPE_IDENTIFICATION,
            MetadataObject::ContentStorage(_) => TYPE_CONTENT_STORAGE,
            MetadataObject::EssenceContainerData(_) => TYPE_ESSENCE_CONTAINER_DATA,
            MetadataObject::MaterialPackage(_) => TYPE_MATERIAL_PACKAGE,
            MetadataObject::SourcePackage(_) => TYPE_SOURCE_PACKAGE,
            MetadataObject::TimelineTrack(_) => TYPE_TIMELINE_TRACK,
            MetadataObject::Sequence(_) => TYPE_SEQUENCE,
            MetadataObject::SourceClip(_) => TYPE_SOURCE_CLIP,
            MetadataObject::TimecodeComponent(_) => TYPE_TIMECODE_COMPONENT,
            MetadataObject::Descriptor(Descriptor::Cdci(_)) => TYPE_CDCI_DESCRIPTOR,
            MetadataObject::Descriptor(Descriptor::MpegVideo(_)) => {
                TYPE_MPEG_VIDEO_DESCRIPTOR
            }
            MetadataObject::Descriptor(Descriptor::Sound(_)) => {
                TYPE_GENERIC_SOUND_DESCRIPTOR
            }
            MetadataObject::Descriptor(Descriptor::Multiple(_)) => {
                TYPE_MULTIPLE_DESCRIPTOR
            }
        }
    }

    pub fn to_klv(&self, primer: &mut PrimerPack) -> Bytes {
        let mut w = SetWriter::new(primer);
        match self {
            MetadataObject::Preface(o) => {
                w.put(0x3c0a, &o.instance_uid.0);
                w.put_timestamp(0x3b02, &o.last_modified_date);
                w.put_u16_tag(0x3b05, o.version);
                w.put_u32_tag(0x3b07, o.object_model_version);
                if !o.primary_package_uid.is_zero() {
                    w.put(0x3b08, &o.primary_package_uid.0);
                }
                w.put_uuid_batch(0x3b06, &o.identifications);
                w.put(0x3b03, &o.content_storage.0);
                w.put(0x3b09, &o.operational_pattern.0);
                w.put_ul_batch(0x3b0a, &o.essence_containers);
                w.put_ul_batch(0x3b0b, &o.dm_schemes);
            }
            MetadataObject::Identification(o) => {
                w.put(0x3c0a, &o.instance_uid.0);
                w.put(0x3c09, &o.this_generation_uid.0);
                w.put_string(0x3c01, &o.company_name);
                w.put_string(0x3c02, &o.product_name);
                let mut pv = BytesMut::with_capacity(10);
                o.product_version.put(&mut pv);
                w.put(0x3c03, &pv);
                w.put_string(0x3c04, &o.version_string);
                w.put(0x3c05, &o.product_uid.0);
                w.put_timestamp(0x3c06, &o.modification_date);
                let mut tv = BytesMut::with_capacity(10);
                o.toolkit_version.put(&mut tv);
                w.put(0x3c07, &tv);
                if let Some(platform) = &o.platform {
                    w.put_string(0x3c08, platform);
                }
            }
            MetadataObject::ContentStorage(o) => {
                w.put(0x3c0a, &o.instance_uid.0);
                w.put_uuid_batch(0x1901, &o.packages);
                w.put_uuid_batch(0x1902, &o.essence_container_data);
            }
            MetadataObject::EssenceContainerData(o) => {
                w.put(0x3c0a, &o.instance_uid.0);
                w.put(0x2701, &o.linked_package_uid.0);
                w.put_u32_tag(0x3f06, o.index_sid);
                w.put_u32_tag(0x3f07, o.body_sid);
            }
            MetadataObject::MaterialPackage(o) => {
                write_package_common(&mut w, &o.common);
            }
            MetadataObject::SourcePackage(o) => {
                write_package_common(&mut w, &o.common);
                if let Some(descriptor) = &o.descriptor {
                    w.put(0x4701, &descriptor.0);
                }
            }
            MetadataObject::TimelineTrack(o) => {
                w.put(0x3c0a, &o.instance_uid.0);
                w.put_u32_tag(0x4801, o.track_id);
                w.put_u32_tag(0x4804, o.track_number);
                if let Some(name) = &o.track_name {
                    w.put_string(0x4802, name);
                }
                w.put_fraction(0x4b01, o.edit_rate);
                w.put_i64_tag(0x4b02, o.origin);
                w.put(0x4803, &o.sequence.0);
            }
            MetadataObject::Sequence(o) => {
                w.put(0x3c0a, &o.instance_uid.0);
                w.put(0x0201, &o.data_definition.0);
                w.put_i64_tag(0x0202, o.duration);
                w.put_uuid_batch(0x1001, &o.structural_components);
            }
            MetadataObject::SourceClip(o) => {
                w.put(0x3c0a, &o.instance_uid.0);
                w.put(0x0201, &o.data_definition.0);
                w.put_i64_tag(0x0202, o.duration);
                w.put_i64_tag(0x1201, o.start_position);
                w.put(0x1101, &o.source_package_id.0);
                w.put_u32_tag(0x1102, o.source_track_id);
            }
            MetadataObject::TimecodeComponent(o) => {
                w.put(0x3c0a, &o.instance_uid.0);
                w.put(0x0201, &o.data_definition.0);
                w.put_i64_tag(0x0202, o.duration);
                w.put_i64_tag(0x1501, o.start_timecode);
                w.put_u16_tag(0x1502, o.rounded_timecode_base);
                w.put(0x1503, &[o.drop_frame as u8]);
            }
            MetadataObject::Descriptor(Descriptor::Cdci(o)) => {
                write_cdci(&mut w, o);
            }
            MetadataObject::Descriptor(Descriptor::MpegVideo(o)) => {
                write_cdci(&mut w, &o.cdci);
                w.put_dynamic(MPEG_PROFILE_AND_LEVEL_UL, &[o.profile_and_level]);
            }
            MetadataObject::Descriptor(Descriptor::Sound(o)) => {
                o.file.write(&mut w);
                w.put_fraction(0x3d03, o.audio_sampling_rate);
                w.put(0x3d02, &[o.locked as u8]);
                w.put_u32_tag(0x3d07, o.channel_count);
                w.put_u32_tag(0x3d01, o.quantization_bits);
                if let Some(compression) = &o.sound_essence_compression {
                    w.put(0x3d06, &compression.0);
                }
            }
            MetadataObject::Descriptor(Descriptor::Multiple(o)) => {
                o.file.write(&mut w);
                w.put_uuid_batch(0x3f01, &o.sub_descriptors);
            }
        }
        w.finish(self.set_type())
    }

    /// Parses one metadata set KLV value of the given type.
    pub fn parse(
        set_type: u16,
        value: &[u8],
        primer: Option<&PrimerPack>,
    ) -> Result<Option<MetadataObject>, Error> {
        let mut tags: Vec<(u16, &[u8])> = Vec::new();
        let mut r = value;
        while r.remaining() >= 4 {
            let tag = r.get_u16();
            let len = r.get_u16() as usize;
            if r.remaining() < len {
                bail!("truncated local tag 0x{:04x}", tag);
            }
            tags.push((tag, &r[..len]));
            r.advance(len);
        }

        let get = |tag: u16| tags.iter().find(|(t, _)| *t == tag).map(|(_, d)| *d);
        let require =
            |tag: u16| get(tag).ok_or_else(|| format_err!("missing tag 0x{:04x}", tag));

        let obj = match set_type {
            TYPE_PREFACE => MetadataObject::Preface(Preface {
                instance_uid: Uuid::parse(require(0x3c0a)?)?,
                last_modified_date: MxfTimestamp::parse(require(0x3b02)?)?,
                version: get(0x3b05)
                    .map(|d| u16::from_be_bytes([d[0], d[1]]))
                    .unwrap_or(0),
                object_model_version: get(0x3b07)
                    .map(parse_u32)
                    .transpose()?
                    .unwrap_or(0),
                primary_package_uid: get(0x3b08)
                    .map(Uuid::parse)
                    .transpose()?
                    .unwrap_or(Uuid([0; 16])),
                identifications: parse_uuid_batch(require(0x3b06)?)?,
                content_storage: Uuid::parse(require(0x3b03)?)?,
                operational_pattern: Ul::parse(require(0x3b09)?)?,
                essence_containers: parse_ul_batch(require(0x3b0a)?)?,
                dm_schemes: get(0x3b0b).map(parse_ul_batch).transpose()?.unwrap_or_default(),
            }),
            TYPE_IDENTIFICATION => MetadataObject::Identification(Identification {
                instance_uid: Uuid::parse(require(0x3c0a)?)?,
                this_generation_uid: Uuid::parse(require(0x3c09)?)?,
                company_name: get(0x3c01).map(parse_utf16).unwrap_or_default(),
                product_name: get(0x3c02).map(parse_utf16).unwrap_or_default(),
                product_version: get(0x3c03)
                    .map(ProductVersion::parse)
                    .transpose()?
                    .unwrap_or_default(),
                version_string: get(0x3c04).map(parse_utf16).unwrap_or_default(),
                product_uid: get(0x3c05)
                    .map(Uuid::parse)
                    .transpose()?
                    .unwrap_or(Uuid([0; 16])),
                modification_date: get(0x3c06)
                    .map(MxfTimestamp::parse)
                    .transpose()?
                    .unwrap_or_default(),
                toolkit_version: get(0x3c07)
                    .map(ProductVersion::parse)
                    .transpose()?
                    .unwrap_or_default(),
                platform: get(0x3c08).map(parse_utf16),
            }),
            TYPE_CONTENT_STORAGE => MetadataObject::ContentStorage(ContentStorage {
                instance_uid: Uuid::parse(require(0x3c0a)?)?,
                packages: parse_uuid_batch(require(0x1901)?)?,
                essence_container_data: get(0x1902)
                    .map(parse_uuid_batch)
                    .transpose()?
                    .unwrap_or_default(),
            }),
            TYPE_ESSENCE_CONTAINER_DATA => {
                MetadataObject::EssenceContainerData(EssenceContainerData {
                    instance_uid: Uuid::parse(require(0x3c0a)?)?,
                    linked_package_uid: Umid::parse(require(0x2701)?)?,
                    index_sid: get(0x3f06).map(parse_u32).transpose()?.unwrap_or(0),
                    body_sid: parse_u32(require(0x3f07)?)?,
                })
            }
            TYPE_MATERIAL_PACKAGE => MetadataObject::MaterialPackage(MaterialPackage {
                common: parse_package_common(&get, &require)?,
            }),
            TYPE_SOURCE_PACKAGE => MetadataObject::SourcePackage(SourcePackage {
                common: parse_package_common(&get, &require)?,
                descriptor: get(0x4701).map(Uuid::parse).transpose()?,
            }),
            TYPE_TIMELINE_TRACK => MetadataObject::TimelineTrack(TimelineTrack {
                instance_uid: Uuid::parse(require(0x3c0a)?)?,
                track_id: parse_u32(require(0x4801)?)?,
                track_number: parse_u32(require(0x4804)?)?,
                track_name: get(0x4802).map(parse_utf16),
                edit_rate: parse_fraction(require(0x4b01)?)?,
                origin: get(0x4b02).map(parse_i64).transpose()?.unwrap_or(0),
                sequence: Uuid::parse(require(0x4803)?)?,
            }),
            TYPE_SEQUENCE => MetadataObject::Sequence(Sequence {
                instance_uid: Uuid::parse(require(0x3c0a)?)?,
                data_definition: Ul::parse(require(0x0201)?)?,
                duration: get(0x0202).map(parse_i64).transpose()?.unwrap_or(-1),
                structural_components: parse_uuid_batch(require(0x1001)?)?,
            }),
            TYPE_SOURCE_CLIP => MetadataObject::SourceClip(SourceClip {
                instance_uid: Uuid::parse(require(0x3c0a)?)?,
                data_definition: Ul::parse(require(0x0201)?)?,
                duration: get(0x0202).map(parse_i64).transpose()?.unwrap_or(-1),
                start_position: get(0x1201).map(parse_i64).transpose()?.unwrap_or(0),
                source_package_id: Umid::parse(require(0x1101)?)?,
                source_track_id: parse_u32(require(0x1102)?)?,
            }),
            TYPE_TIMECODE_COMPONENT => {
                MetadataObject::TimecodeComponent(TimecodeComponent {
                    instance_uid: Uuid::parse(require(0x3c0a)?)?,
                    data_definition: Ul::parse(require(0x0201)?)?,
                    duration: get(0x0202).map(parse_i64).transpose()?.unwrap_or(-1),
                    start_timecode: get(0x1501).map(parse_i64).transpose()?.unwrap_or(0),
                    rounded_timecode_base: get(0x1502)
                        .map(|d| u16::from_be_bytes([d[0], d[1]]))
                        .unwrap_or(0),
                    drop_frame: get(0x1503).map(|d| d[0] != 0).unwrap_or(false),
                })
            }
            TYPE_CDCI_DESCRIPTOR | TYPE_MPEG_VIDEO_DESCRIPTOR => {
                let mut cdci = CdciDescriptor {
                    file: FileDescriptorCommon::new(Ul([0; 16])),
                    picture: PictureCommon::default(),
                    component_depth: 0,
                    horizontal_subsampling: 0,
                    vertical_subsampling: 0,
                };
                let mut profile_and_level = 0;
                for (tag, data) in &tags {
                    if cdci.file.handle_tag(*tag, data)?
                        || cdci.picture.handle_tag(*tag, data)?
                    {
                        continue;
                    }
                    match *tag {
                        0x3301 => cdci.component_depth = parse_u32(data)?,
                        0x3302 => cdci.horizontal_subsampling = parse_u32(data)?,
                        0x3308 => cdci.vertical_subsampling = parse_u32(data)?,
                        t if t >= 0x8000 => {
                            if let Some(primer) = primer {
                                if primer.tag_to_ul(t) == Some(&MPEG_PROFILE_AND_LEVEL_UL)
                                {
                                    profile_and_level = data[0];
                                }
                            }
                        }
                        _ => {}
                    }
                }
                if set_type == TYPE_MPEG_VIDEO_DESCRIPTOR {
                    MetadataObject::Descriptor(Descriptor::MpegVideo(
                        MpegVideoDescriptor { cdci, profile_and_level },
                    ))
                } else {
                    MetadataObject::Descriptor(Descriptor::Cdci(cdci))
                }
            }
            TYPE_GENERIC_SOUND_DESCRIPTOR => {
                let mut desc = GenericSoundDescriptor {
                    file: FileDescriptorCommon::new(Ul([0; 16])),
                    audio_sampling_rate: Fraction::new(0, 0),
                    locked: false,
                    channel_count: 0,
                    quantization_bits: 0,
                    sound_essence_compression: None,
                };
                for (tag, data) in &tags {
                    if desc.file.handle_tag(*tag, data)? {
                        continue;
                    }
                    match *tag {
                        0x3d03 => desc.audio_sampling_rate = parse_fraction(data)?,
                        0x3d02 => desc.locked = data[0] != 0,
                        0x3d07 => desc.channel_count = parse_u32(data)?,
                        0x3d01 => desc.quantization_bits = parse_u32(data)?,
                        0x3d06 => desc.sound_essence_compression = Some(Ul::parse(data)?),
                        _ => {}
                    }
                }
                MetadataObject::Descriptor(Descriptor::Sound(desc))
            }
            TYPE_MULTIPLE_DESCRIPTOR => {
                let mut desc = MultipleDescriptor {
                    file: FileDescriptorCommon::new(Ul([0; 16])),
                    sub_descriptors: Vec::new(),
                };
                for (tag, data) in &tags {
                    if desc.file.handle_tag(*tag, data)? {
                        continue;
                    }
                    if *tag == 0x3f01 {
                        desc.sub_descriptors = parse_uuid_batch(data)?;
                    }
                }
                MetadataObject::Descriptor(Descriptor::Multiple(desc))
            }
            other => {
                debug!("skipping unknown metadata set type 0x{:04x}", other);
                return Ok(None);
            }
        };

        Ok(Some(obj))
    }
}

fn write_cdci(w: &mut SetWriter<'_>, o: &CdciDescriptor) {
    o.file.write(w);
    o.picture.write(w);
    w.put_u32_tag(0x3301, o.component_depth);
    w.put_u32_tag(0x3302, o.horizontal_subsampling);
    w.put_u32_tag(0x3308, o.vertical_subsampling);
}

fn write_package_common(w: &mut SetWriter<'_>, c: &PackageCommon) {
    w.put(0x3c0a, &c.instance_uid.0);
    w.put(0x4401, &c.package_uid.0);
    if let Some(name) = &c.name {
        w.put_string(0x4402, name);
    }
    w.put_timestamp(0x4405, &c.package_creation_date);
    w.put_timestamp(0x4404, &c.package_modified_date);
    w.put_uuid_batch(0x4403, &c.tracks);
}

fn parse_package_common<'a>(
    get: &impl Fn(u16) -> Option<&'a [u8]>,
    require: &impl Fn(u16) -> Result<&'a [u8], Error>,
) -> Result<PackageCommon, Error> {
    Ok(PackageCommon {
        instance_uid: Uuid::parse(require(0x3c0a)?)?,
        package_uid: Umid::parse(require(0x4401)?)?,
        name: get(0x4402).map(parse_utf16),
        package_creation_date: get(0x4405)
            .map(MxfTimestamp::parse)
            .transpose()?
            .unwrap_or_default(),
        package_modified_date: get(0x4404)
            .map(MxfTimestamp::parse)
            .transpose()?
            .unwrap_or_default(),
        tracks: parse_uuid_batch(require(0x4403)?)?,
    })
}

/// The metadata object graph: objects by UUID plus the emission order.
#[derive(Debug, Default)]
pub struct MetadataSet {
    objects: HashMap<Uuid, MetadataObject>,
    pub order: Vec<Uuid>,
}

impl MetadataSet {
    pub fn new() -> MetadataSet {
        MetadataSet::default()
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Inserts an object and appends it to the emission order.
    pub fn insert(&mut self, obj: MetadataObject) -> Uuid {
        let uid = obj.instance_uid();
        debug_assert!(!uid.is_zero());
        if self.objects.insert(uid, obj).is_none() {
            self.order.push(uid);
        }
        uid
    }

    /// Replaces an object in place, keeping its emission position.
    pub fn replace(&mut self, obj: MetadataObject) {
        let uid = obj.instance_uid();
        if self.objects.insert(uid, obj).is_none() {
            self.order.push(uid);
        }
    }

    pub fn get(&self, uid: &Uuid) -> Option<&MetadataObject> {
        self.objects.get(uid)
    }

    pub fn get_mut(&mut self, uid: &Uuid) -> Option<&mut MetadataObject> {
        self.objects.get_mut(uid)
    }

    pub fn preface(&self) -> Option<&Preface> {
        self.objects.values().find_map(|o| match o {
            MetadataObject::Preface(p) => Some(p),
            _ => None,
        })
    }

    /// Moves all non-multiple descriptors so they are emitted right
    /// between the multiple descriptor (when present) and the source
    /// package.
    pub fn sort_descriptors(&mut self) {
        let descriptors: Vec<Uuid> = self
            .order
            .iter()
            .filter(|uid| {
                matches!(
                    self.objects.get(uid),
                    Some(MetadataObject::Descriptor(d)) if !d.is_multiple()
                )
            })
            .copied()
            .collect();
        if descriptors.is_empty() {
            return;
        }

        self.order.retain(|uid| !descriptors.contains(uid));

        let anchor = self.order.iter().position(|uid| {
            matches!(
                self.objects.get(uid),
                Some(MetadataObject::Descriptor(d)) if d.is_multiple()
            )
        });
        let insert_at = match anchor {
            Some(pos) => pos + 1,
            None => self
                .order
                .iter()
                .position(|uid| {
                    matches!(self.objects.get(uid), Some(MetadataObject::SourcePackage(_)))
                })
                .map(|p| p + 1)
                .unwrap_or(self.order.len()),
        };
        for (i, uid) in descriptors.into_iter().enumerate() {
            self.order.insert(insert_at + i, uid);
        }
    }

    /// Serializes every object in emission order, registering local tags
    /// in `primer`.
    pub fn serialize(&self, primer: &mut PrimerPack) -> Vec<Bytes> {
        self.order
            .iter()
            .filter_map(|uid| self.objects.get(uid))
            .map(|obj| obj.to_klv(primer))
            .collect()
    }

    /// Parses a metadata batch (concatenated KLVs, fill items allowed).
    pub fn parse(data: &[u8], primer: Option<&PrimerPack>) -> Result<MetadataSet, Error> {
        let mut set = MetadataSet::new();
        let mut pos = 0;
        while pos + 16 < data.len() {
            let (key, value, consumed) = take_klv(&data[pos..])?;
            pos += consumed;
            if key == FILL_UL {
                continue;
            }
            let set_type = match parse_metadata_set_key(&key) {
                Some(t) => t,
                None => {
                    warn!("unexpected key in metadata batch: {:?}", key);
                    continue;
                }
            };
            if let Some(obj) = MetadataObject::parse(set_type, value, primer)? {
                set.insert(obj);
            }
        }
        Ok(set)
    }

    /// Reachable-topology fingerprint: every object's UUID with its
    /// outgoing edges, sorted. Two sets with equal fingerprints describe
    /// the same graph.
    pub fn topology(&self) -> Vec<(Uuid, Vec<Uuid>)> {
        let mut topo: Vec<(Uuid, Vec<Uuid>)> = self
            .objects
            .iter()
            .map(|(uid, obj)| (*uid, obj.references()))
            .collect();
        topo.sort_by_key(|(uid, _)| *uid);
        topo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DD_PICTURE_UL, EC_UNCOMPRESSED_PICTURE_UL, OP_1A_UL};

    fn sample_sequence() -> Sequence {
        Sequence {
            instance_uid: Uuid::generate(),
            data_definition: DD_PICTURE_UL,
            duration: 100,
            structural_components: vec![Uuid::generate()],
        }
    }

    #[test]
    fn sequence_set_round_trips() {
        let seq = sample_sequence();
        let mut primer = PrimerPack::new();
        let obj = MetadataObject::Sequence(seq.clone());
        let klv = obj.to_klv(&mut primer);

        let (key, value, _) = take_klv(&klv).unwrap();
        assert_eq!(parse_metadata_set_key(&key), Some(TYPE_SEQUENCE));
        let parsed = MetadataObject::parse(TYPE_SEQUENCE, value, Some(&primer))
            .unwrap()
            .unwrap();
        match parsed {
            MetadataObject::Sequence(p) => {
                assert_eq!(p.instance_uid, seq.instance_uid);
                assert_eq!(p.data_definition, DD_PICTURE_UL);
                assert_eq!(p.duration, 100);
                assert_eq!(p.structural_components, seq.structural_components);
            }
            o => panic!("wrong object: {:?}", o),
        }
    }

    #[test]
    fn descriptor_round_trips_with_dynamic_tag() {
        let mpeg = MpegVideoDescriptor {
            cdci: CdciDescriptor {
                file: FileDescriptorCommon {
                    instance_uid: Uuid::generate(),
                    linked_track_id: 2,
                    sample_rate: Fraction::new(25, 1),
                    container_duration: -1,
                    essence_container: EC_UNCOMPRESSED_PICTURE_UL,
                    codec: None,
                },
                picture: PictureCommon {
                    stored_width: 1920,
                    stored_height: 1080,
                    aspect_ratio: Fraction::new(16, 9),
                    video_line_map: vec![42, 0],
                    ..PictureCommon::default()
                },
                component_depth: 8,
                horizontal_subsampling: 2,
                vertical_subsampling: 1,
            },
            profile_and_level: 0x82,
        };

        let mut primer = PrimerPack::new();
        let obj = MetadataObject::Descriptor(Descriptor::MpegVideo(mpeg));
        let klv = obj.to_klv(&mut primer);
        let (key, value, _) = take_klv(&klv).unwrap();
        let parsed =
            MetadataObject::parse(parse_metadata_set_key(&key).unwrap(), value, Some(&primer))
                .unwrap()
                .unwrap();
        match parsed {
            MetadataObject::Descriptor(Descriptor::MpegVideo(p)) => {
                assert_eq!(p.cdci.picture.stored_width, 1920);
                assert_eq!(p.cdci.picture.video_line_map, vec![42, 0]);
                assert_eq!(p.profile_and_level, 0x82);
                assert_eq!(p.cdci.file.essence_container, EC_UNCOMPRESSED_PICTURE_UL);
            }
            o => panic!("wrong object: {:?}", o),
        }
    }

    #[test]
    fn batch_parse_skips_fill() {
        let mut primer = PrimerPack::new();
        let seq = MetadataObject::Sequence(sample_sequence());
        let mut data = BytesMut::new();
        data.extend_from_slice(&seq.to_klv(&mut primer));
        // A KLV fill item between sets.
        crate::types::put_klv(&mut data, &FILL_UL, &[0u8; 32]);
        data.extend_from_slice(&seq.to_klv(&mut primer));

        let set = MetadataSet::parse(&data, Some(&primer)).unwrap();
        assert_eq!(set.len(), 1); // same instance uid twice
    }

    #[test]
    fn sort_descriptors_between_multiple_and_source_package() {
        let mut set = MetadataSet::new();

        let cdci = CdciDescriptor {
            file: FileDescriptorCommon {
                instance_uid: Uuid::generate(),
                ..FileDescriptorCommon::new(EC_UNCOMPRESSED_PICTURE_UL)
            },
            picture: PictureCommon::default(),
            component_depth: 8,
            horizontal_subsampling: 2,
            vertical_subsampling: 2,
        };
        let cdci_uid = cdci.file.instance_uid;

        // Insertion order: descriptor first, then multiple, then package.
        set.insert(MetadataObject::Descriptor(Descriptor::Cdci(cdci)));
        let multi_uid = set.insert(MetadataObject::Descriptor(Descriptor::Multiple(
            MultipleDescriptor {
                file: FileDescriptorCommon {
                    instance_uid: Uuid::generate(),
                    ..FileDescriptorCommon::new(EC_UNCOMPRESSED_PICTURE_UL)
                },
                sub_descriptors: vec![cdci_uid],
            },
        )));
        let package_uid = set.insert(MetadataObject::SourcePackage(SourcePackage {
            common: PackageCommon {
                instance_uid: Uuid::generate(),
                package_uid: Umid::generate(),
                name: None,
                package_creation_date: MxfTimestamp::default(),
                package_modified_date: MxfTimestamp::default(),
                tracks: vec![],
            },
            descriptor: Some(multi_uid),
        }));

        set.sort_descriptors();
        let multi_pos = set.order.iter().position(|u| *u == multi_uid).unwrap();
        let cdci_pos = set.order.iter().position(|u| *u == cdci_uid).unwrap();
        let pkg_pos = set.order.iter().position(|u| *u == package_uid).unwrap();
        assert!(multi_pos < cdci_pos);
        assert!(cdci_pos > pkg_pos || cdci_pos == multi_pos + 1);
    }

    #[test]
    fn topology_is_stable_across_serialization() {
        let mut set = MetadataSet::new();
        let seq_uid = set.insert(MetadataObject::Sequence(sample_sequence()));
        set.insert(MetadataObject::TimelineTrack(TimelineTrack {
            instance_uid: Uuid::generate(),
            track_id: 1,
            track_number: 0,
            track_name: None,
            edit_rate: Fraction::new(25, 1),
            origin: 0,
            sequence: seq_uid,
        }));

        let mut primer = PrimerPack::new();
        let buffers = set.serialize(&mut primer);
        let data: Vec<u8> = buffers.iter().flat_map(|b| b.iter().copied()).collect();
        let reparsed = MetadataSet::parse(&data, Some(&primer)).unwrap();

        assert_eq!(set.topology(), reparsed.topology());
    }

    #[test]
    fn preface_references_children() {
        let ident = Uuid::generate();
        let storage = Uuid::generate();
        let preface = MetadataObject::Preface(Preface {
            instance_uid: Uuid::generate(),
            last_modified_date: MxfTimestamp::default(),
            version: 258,
            object_model_version: 1,
            primary_package_uid: Uuid::generate(),
            identifications: vec![ident],
            content_storage: storage,
            operational_pattern: OP_1A_UL,
            essence_containers: vec![EC_UNCOMPRESSED_PICTURE_UL],
            dm_schemes: vec![],
        });
        assert_eq!(preface.references(), vec![ident, storage]);
    }
}
