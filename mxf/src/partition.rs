//! Partition packs, the primer pack, and the random index pack.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use failure::{bail, Error};
use log::debug;

use crate::types::{
    ber_encode_len, take_klv, Ul, PARTITION_PACK_PREFIX, PRIMER_PACK_UL,
    RANDOM_INDEX_PACK_UL,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PartitionType {
    Header,
    Body,
    Footer,
}

/// A header, body, or footer partition pack.
#[derive(Clone, Debug)]
pub struct PartitionPack {
    pub partition_type: PartitionType,
    pub closed: bool,
    pub complete: bool,
    pub major_version: u16,
    pub minor_version: u16,
    pub kag_size: u32,
    pub this_partition: u64,
    pub prev_partition: u64,
    pub footer_partition: u64,
    pub header_byte_count: u64,
    pub index_byte_count: u64,
    pub index_sid: u32,
    pub body_offset: u64,
    pub body_sid: u32,
    pub operational_pattern: Ul,
    pub essence_containers: Vec<Ul>,
}

impl Default for PartitionPack {
    fn default() -> PartitionPack {
        PartitionPack {
            partition_type: PartitionType::Header,
            closed: false,
            complete: false,
            major_version: 0x0001,
            minor_version: 0x0002,
            kag_size: 1,
            this_partition: 0,
            prev_partition: 0,
            footer_partition: 0,
            header_byte_count: 0,
            index_byte_count: 0,
            index_sid: 0,
            body_offset: 0,
            body_sid: 0,
            operational_pattern: Ul([0; 16]),
            essence_containers: Vec::new(),
        }
    }
}

impl PartitionPack {
    pub fn reset(&mut self) {
        *self = PartitionPack::default();
    }

    fn key(&self) -> Ul {
        let mut u = [0u8; 16];
        u[..13].copy_from_slice(&PARTITION_PACK_PREFIX);
        u[13] = match self.partition_type {
            PartitionType::Header => 0x02,
            PartitionType::Body => 0x03,
            PartitionType::Footer => 0x04,
        };
        u[14] = match (self.closed, self.complete) {
            (false, false) => 0x01,
            (true, false) => 0x02,
            (false, true) => 0x03,
            (true, true) => 0x04,
        };
        Ul(u)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut value = BytesMut::with_capacity(88 + 16 * self.essence_containers.len());
        value.put_u16(self.major_version);
        value.put_u16(self.minor_version);
        value.put_u32(self.kag_size);
        value.put_u64(self.this_partition);
        value.put_u64(self.prev_partition);
        value.put_u64(self.footer_partition);
        value.put_u64(self.header_byte_count);
        value.put_u64(self.index_byte_count);
        value.put_u32(self.index_sid);
        value.put_u64(self.body_offset);
        value.put_u32(self.body_sid);
        value.put_slice(&self.operational_pattern.0);
        value.put_u32(self.essence_containers.len() as u32);
        value.put_u32(16);
        for ec in &self.essence_containers {
            value.put_slice(&ec.0);
        }

        let mut out = BytesMut::with_capacity(16 + 9 + value.len());
        out.put_slice(&self.key().0);
        ber_encode_len(value.len(), &mut out);
        out.put_slice(&value);
        out.freeze()
    }

    /// Parses one partition pack KLV; returns it plus the bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(PartitionPack, usize), Error> {
        let (key, value, consumed) = take_klv(data)?;
        if key.0[..13] != PARTITION_PACK_PREFIX {
            bail!("not a partition pack key: {:?}", key);
        }
        let partition_type = match key.0[13] {
            0x02 => PartitionType::Header,
            0x03 => PartitionType::Body,
            0x04 => PartitionType::Footer,
            b => bail!("unknown partition kind 0x{:02x}", b),
        };
        let (closed, complete) = match key.0[14] {
            0x01 => (false, false),
            0x02 => (true, false),
            0x03 => (false, true),
            0x04 => (true, true),
            b => bail!("unknown partition status 0x{:02x}", b),
        };

        if value.len() < 88 {
            bail!("partition pack value too short: {}", value.len());
        }
        let mut r = value;
        let major_version = r.get_u16();
        let minor_version = r.get_u16();
        let kag_size = r.get_u32();
        let this_partition = r.get_u64();
        let prev_partition = r.get_u64();
        let footer_partition = r.get_u64();
        let header_byte_count = r.get_u64();
        let index_byte_count = r.get_u64();
        let index_sid = r.get_u32();
        let body_offset = r.get_u64();
        let body_sid = r.get_u32();
        let operational_pattern = Ul::parse(&r[..16])?;
        r.advance(16);
        let count = r.get_u32() as usize;
        let item_size = r.get_u32() as usize;
        if item_size != 16 || r.remaining() < count * 16 {
            bail!("invalid essence container batch {}x{}", count, item_size);
        }
        let mut essence_containers = Vec::with_capacity(count);
        for _ in 0..count {
            essence_containers.push(Ul::parse(&r[..16])?);
            r.advance(16);
        }

        Ok((
            PartitionPack {
                partition_type,
                closed,
                complete,
                major_version,
                minor_version,
                kag_size,
                this_partition,
                prev_partition,
                footer_partition,
                header_byte_count,
                index_byte_count,
                index_sid,
                body_offset,
                body_sid,
                operational_pattern,
                essence_containers,
            },
            consumed,
        ))
    }
}

/// Maps two-byte local tags to full item labels. Tags below 0x8000 are
/// statically assigned by SMPTE 377; dynamic tags are allocated from
/// 0x8000 upward.
#[derive(Clone, Debug, Default)]
pub struct PrimerPack {
    mappings: HashMap<u16, Ul>,
    reverse: HashMap<Ul, u16>,
    next_free: u16,
}

impl PrimerPack {
    pub fn new() -> PrimerPack {
        PrimerPack {
            mappings: HashMap::new(),
            reverse: HashMap::new(),
            next_free: 0x8000,
        }
    }

    pub fn reset(&mut self) {
        self.mappings.clear();
        self.reverse.clear();
        self.next_free = 0x8000;
    }

    /// Records a statically assigned tag.
    pub fn add_mapping(&mut self, tag: u16, ul: Ul) {
        self.mappings.entry(tag).or_insert(ul);
        self.reverse.entry(ul).or_insert(tag);
    }

    /// Returns the tag for `ul`, allocating a dynamic one if needed.
    pub fn dynamic_tag(&mut self, ul: Ul) -> u16 {
        if let Some(&tag) = self.reverse.get(&ul) {
            return tag;
        }
        let tag = self.next_free;
        self.next_free += 1;
        self.add_mapping(tag, ul);
        tag
    }

    pub fn tag_to_ul(&self, tag: u16) -> Option<&Ul> {
        self.mappings.get(&tag)
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut tags: Vec<(&u16, &Ul)> = self.mappings.iter().collect();
        tags.sort_by_key(|(tag, _)| **tag);

        let mut value = BytesMut::with_capacity(8 + 18 * tags.len());
        value.put_u32(tags.len() as u32);
        value.put_u32(18);
        for (tag, ul) in tags {
            value.put_u16(*tag);
            value.put_slice(&ul.0);
        }

        let mut out = BytesMut::with_capacity(16 + 9 + value.len());
        out.put_slice(&PRIMER_PACK_UL.0);
        ber_encode_len(value.len(), &mut out);
        out.put_slice(&value);
        out.freeze()
    }

    pub fn parse(data: &[u8]) -> Result<(PrimerPack, usize), Error> {
        let (key, value, consumed) = take_klv(data)?;
        if key != PRIMER_PACK_UL {
            bail!("not a primer pack key: {:?}", key);
        }
        let mut r = value;
        if r.remaining() < 8 {
            bail!("primer pack too short");
        }
        let count = r.get_u32() as usize;
        let item_size = r.get_u32() as usize;
        if item_size != 18 || r.remaining() < count * 18 {
            bail!("invalid primer batch {}x{}", count, item_size);
        }

        let mut primer = PrimerPack::new();
        for _ in 0..count {
            let tag = r.get_u16();
            let ul = Ul::parse(&r[..16])?;
            r.advance(16);
            primer.add_mapping(tag, ul);
            if tag >= 0x8000 && tag >= primer.next_free {
                primer.next_free = tag + 1;
            }
        }
        debug!("parsed primer with {} mappings", count);
        Ok((primer, consumed))
    }
}

/// One random index pack entry: a partition's body SID and offset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RandomIndexEntry {
    pub body_sid: u32,
    pub offset: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RandomIndexPack {
    pub entries: Vec<RandomIndexEntry>,
}

impl RandomIndexPack {
    pub fn to_bytes(&self) -> Bytes {
        let value_len = 12 * self.entries.len() + 4;
        let mut out = BytesMut::with_capacity(16 + 9 + value_len);
        out.put_slice(&RANDOM_INDEX_PACK_UL.0);
        ber_encode_len(value_len, &mut out);
        let total = out.len() + value_len;
        for e in &self.entries {
            out.put_u32(e.body_sid);
            out.put_u64(e.offset);
        }
        // Overall length of the pack, for tail-first scanning.
        out.put_u32(total as u32);
        out.freeze()
    }

    pub fn parse(data: &[u8]) -> Result<(RandomIndexPack, usize), Error> {
        let (key, value, consumed) = take_klv(data)?;
        if key != RANDOM_INDEX_PACK_UL {
            bail!("not a random index pack key: {:?}", key);
        }
        if value.len() < 4 || (value.len() - 4) % 12 != 0 {
            bail!("invalid random index pack size {}", value.len());
        }
        let mut r = value;
        let mut entries = Vec::new();
        for _ in 0..(value.len() - 4) / 12 {
            let body_sid = r.get_u32();
            let offset = r.get_u64();
            entries.push(RandomIndexEntry { body_sid, offset });
        }
        let total = r.get_u32() as usize;
        if total != consumed {
            bail!("random index pack length {} does not match KLV size {}", total, consumed);
        }
        Ok((RandomIndexPack { entries }, consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EC_UNCOMPRESSED_PICTURE_UL, OP_1A_UL};

    #[test]
    fn partition_pack_round_trip() {
        let pack = PartitionPack {
            partition_type: PartitionType::Footer,
            closed: true,
            complete: true,
            this_partition: 12345,
            prev_partition: 100,
            footer_partition: 12345,
            index_byte_count: 77,
            index_sid: 2,
            operational_pattern: OP_1A_UL,
            essence_containers: vec![EC_UNCOMPRESSED_PICTURE_UL],
            ..PartitionPack::default()
        };
        let bytes = pack.to_bytes();
        // Footer, closed and complete.
        assert_eq!(bytes[13], 0x04);
        assert_eq!(bytes[14], 0x04);

        let (parsed, consumed) = PartitionPack::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed.partition_type, PartitionType::Footer);
        assert!(parsed.closed && parsed.complete);
        assert_eq!(parsed.this_partition, 12345);
        assert_eq!(parsed.index_sid, 2);
        assert_eq!(parsed.essence_containers, vec![EC_UNCOMPRESSED_PICTURE_UL]);
    }

    #[test]
    fn open_incomplete_header_key() {
        let pack = PartitionPack::default();
        let bytes = pack.to_bytes();
        assert_eq!(bytes[13], 0x02);
        assert_eq!(bytes[14], 0x01);
    }

    #[test]
    fn primer_round_trip() {
        let mut primer = PrimerPack::new();
        primer.add_mapping(0x3c0a, OP_1A_UL);
        let dynamic = primer.dynamic_tag(EC_UNCOMPRESSED_PICTURE_UL);
        assert!(dynamic >= 0x8000);
        // Repeated requests return the same tag.
        assert_eq!(primer.dynamic_tag(EC_UNCOMPRESSED_PICTURE_UL), dynamic);

        let bytes = primer.to_bytes();
        let (parsed, consumed) = PrimerPack::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed.tag_to_ul(0x3c0a), Some(&OP_1A_UL));
        assert_eq!(parsed.tag_to_ul(dynamic), Some(&EC_UNCOMPRESSED_PICTURE_UL));
    }

    #[test]
    fn rip_round_trip() {
        let rip = RandomIndexPack {
            entries: vec![
                RandomIndexEntry { body_sid: 0, offset: 0 },
                RandomIndexEntry { body_sid: 1, offset: 4321 },
                RandomIndexEntry { body_sid: 0, offset: 99999 },
            ],
        };
        let bytes = rip.to_bytes();
        let (parsed, consumed) = RandomIndexPack::parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed, rip);
    }
}
