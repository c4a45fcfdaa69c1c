//! Index table segments.

use std::convert::TryInto;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use failure::{bail, Error};
use media::Fraction;

use crate::types::{ber_encode_len, take_klv, Uuid, INDEX_TABLE_SEGMENT_UL};

/// Index entries per segment; more spill over into the next segment.
pub const MAX_INDEX_ENTRIES: usize = 65535 / 11;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeltaEntry {
    pub pos_table_index: i8,
    pub slice: u8,
    pub element_delta: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexEntry {
    pub temporal_offset: i8,
    /// Clamped to [-127, 127].
    pub key_frame_offset: i8,
    /// 0x80 random access, 0x20 forward prediction.
    pub flags: u8,
    pub stream_offset: u64,
}

#[derive(Clone, Debug)]
pub struct IndexTableSegment {
    pub instance_id: Uuid,
    pub index_edit_rate: Fraction,
    pub index_start_position: u64,
    pub index_duration: u64,
    pub edit_unit_byte_count: u32,
    pub index_sid: u32,
    pub body_sid: u32,
    pub slice_count: u8,
    pub pos_table_count: u8,
    pub delta_entries: Vec<DeltaEntry>,
    pub index_entries: Vec<IndexEntry>,
}

impl IndexTableSegment {
    pub fn new(
        instance_id: Uuid,
        index_edit_rate: Fraction,
        index_start_position: u64,
        index_sid: u32,
        body_sid: u32,
    ) -> IndexTableSegment {
        IndexTableSegment {
            instance_id,
            index_edit_rate,
            index_start_position,
            index_duration: 0,
            edit_unit_byte_count: 0,
            index_sid,
            body_sid,
            slice_count: 0,
            pos_table_count: 0,
            delta_entries: Vec::new(),
            index_entries: Vec::new(),
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        debug_assert!(self.index_entries.len() <= MAX_INDEX_ENTRIES);

        let mut value = BytesMut::with_capacity(128 + 11 * self.index_entries.len());

        let mut tag = |value: &mut BytesMut, t: u16, data: &[u8]| {
            value.put_u16(t);
            value.put_u16(data.len() as u16);
            value.put_slice(data);
        };

        tag(&mut value, 0x3c0a, &self.instance_id.0);

        let mut edit_rate = [0u8; 8];
        edit_rate[..4].copy_from_slice(&self.index_edit_rate.n.to_be_bytes());
        edit_rate[4..].copy_from_slice(&self.index_edit_rate.d.to_be_bytes());
        tag(&mut value, 0x3f0b, &edit_rate);

        tag(&mut value, 0x3f0c, &self.index_start_position.to_be_bytes());
        tag(&mut value, 0x3f0d, &self.index_duration.to_be_bytes());
        tag(&mut value, 0x3f05, &self.edit_unit_byte_count.to_be_bytes());
        tag(&mut value, 0x3f06, &self.index_sid.to_be_bytes());
        tag(&mut value, 0x3f07, &self.body_sid.to_be_bytes());
        tag(&mut value, 0x3f08, &[self.slice_count]);
        tag(&mut value, 0x3f0e, &[self.pos_table_count]);

        if !self.delta_entries.is_empty() {
            let mut batch = BytesMut::with_capacity(8 + 6 * self.delta_entries.len());
            batch.put_u32(self.delta_entries.len() as u32);
            batch.put_u32(6);
            for e in &self.delta_entries {
                batch.put_i8(e.pos_table_index);
                batch.put_u8(e.slice);
                batch.put_u32(e.element_delta);
            }
            tag(&mut value, 0x3f09, &batch);
        }

        if !self.index_entries.is_empty() {
            let mut batch = BytesMut::with_capacity(8 + 11 * self.index_entries.len());
            batch.put_u32(self.index_entries.len() as u32);
            batch.put_u32(11);
            for e in &self.index_entries {
                batch.put_i8(e.temporal_offset);
                batch.put_i8(e.key_frame_offset);
                batch.put_u8(e.flags);
                batch.put_u64(e.stream_offset);
            }
            tag(&mut value, 0x3f0a, &batch);
        }

        let mut out = BytesMut::with_capacity(16 + 9 + value.len());
        out.put_slice(&INDEX_TABLE_SEGMENT_UL.0);
        ber_encode_len(value.len(), &mut out);
        out.put_slice(&value);
        out.freeze()
    }

    pub fn parse(data: &[u8]) -> Result<(IndexTableSegment, usize), Error> {
        let (key, value, consumed) = take_klv(data)?;
        if key != INDEX_TABLE_SEGMENT_UL {
            bail!("not an index table segment key: {:?}", key);
        }

        let mut segment = IndexTableSegment::new(
            Uuid([0; 16]),
            Fraction::new(0, 0),
            0,
            0,
            0,
        );

        let mut r = value;
        while r.remaining() >= 4 {
            let tag = r.get_u16();
            let len = r.get_u16() as usize;
            if r.remaining() < len {
                bail!("truncated local tag 0x{:04x}", tag);
            }
            let data = &r[..len];
            match tag {
                0x3c0a => segment.instance_id = Uuid::parse(data)?,
                0x3f0b => {
                    segment.index_edit_rate = Fraction::new(
                        i32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                        i32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                    )
                }
                0x3f0c => {
                    segment.index_start_position = u64::from_be_bytes(
                        data[..8].try_into().map_err(|_| {
                            failure::format_err!("bad index start position")
                        })?,
                    )
                }
                0x3f0d => {
                    segment.index_duration = u64::from_be_bytes(
                        data[..8]
                            .try_into()
                            .map_err(|_| failure::format_err!("bad index duration"))?,
                    )
                }
                0x3f05 => {
                    segment.edit_unit_byte_count =
                        u32::from_be_bytes([data[0], data[1], data[2], data[3]])
                }
                0x3f06 => {
                    segment.index_sid =
                        u32::from_be_bytes([data[0], data[1], data[2], data[3]])
                }
                0x3f07 => {
                    segment.body_sid =
                        u32::from_be_bytes([data[0], data[1], data[2], data[3]])
                }
                0x3f08 => segment.slice_count = data[0],
                0x3f0e => segment.pos_table_count = data[0],
                0x3f09 => {
                    let mut b = data;
                    let count = b.get_u32() as usize;
                    let size = b.get_u32() as usize;
                    if size != 6 || b.remaining() < count * 6 {
                        bail!("invalid delta entry batch {}x{}", count, size);
                    }
                    for _ in 0..count {
                        segment.delta_entries.push(DeltaEntry {
                            pos_table_index: b.get_i8(),
                            slice: b.get_u8(),
                            element_delta: b.get_u32(),
                        });
                    }
                }
                0x3f0a => {
                    let mut b = data;
                    let count = b.get_u32() as usize;
                    let size = b.get_u32() as usize;
                    if size != 11 || b.remaining() < count * 11 {
                        bail!("invalid index entry batch {}x{}", count, size);
                    }
                    for _ in 0..count {
                        segment.index_entries.push(IndexEntry {
                            temporal_offset: b.get_i8(),
                            key_frame_offset: b.get_i8(),
                            flags: b.get_u8(),
                            stream_offset: b.get_u64(),
                        });
                    }
                }
                _ => {}
            }
            r.advance(len);
        }

        Ok((segment, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut segment = IndexTableSegment::new(
            Uuid::generate(),
            Fraction::new(25, 1),
            0,
            2,
            1,
        );
        for i in 0..100u64 {
            segment.index_entries.push(IndexEntry {
                temporal_offset: 0,
                key_frame_offset: 0,
                flags: 0x80,
                stream_offset: i * 1024,
            });
        }
        segment.index_duration = 100;

        let bytes = segment.to_bytes();
        let (parsed, consumed) = IndexTableSegment::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed.instance_id, segment.instance_id);
        assert_eq!(parsed.index_edit_rate, Fraction::new(25, 1));
        assert_eq!(parsed.index_sid, 2);
        assert_eq!(parsed.body_sid, 1);
        assert_eq!(parsed.index_duration, 100);
        assert_eq!(parsed.index_entries.len(), 100);
        assert_eq!(parsed.index_entries[99].stream_offset, 99 * 1024);
    }

    #[test]
    fn entry_cap_is_5957() {
        assert_eq!(MAX_INDEX_ENTRIES, 5957);
    }
}
