//! The MXF muxer: aggregates essence pads into a partitioned, indexed
//! SMPTE ST 377 stream.
//!
//! States run Header -> Data -> Eos; any output or negotiation failure
//! latches Error. The host pushes buffers per pad; the muxer interleaves
//! complete edit units on a generic-container clock derived from the
//! slowest edit rate, indexes the first essence stream, and finalizes
//! the file on EOS (footer, index, random index pack, header rewrite).

use std::collections::VecDeque;

use bytes::Bytes;
use failure::{bail, format_err, Error};
use log::{debug, error, trace, warn};
use pretty_hex::PrettyHex;
use media::{u64_scale, u64_scale_round, Buffer, Fraction, SECOND};

use crate::index::{IndexEntry, IndexTableSegment, MAX_INDEX_ENTRIES};
use crate::metadata::{
    ContentStorage, Descriptor, EssenceContainerData, FileDescriptorCommon,
    Identification, MaterialPackage, MetadataObject, MetadataSet, MultipleDescriptor,
    PackageCommon, Preface, Sequence, SourceClip, SourcePackage, TimecodeComponent,
    TimelineTrack,
};
use crate::partition::{PartitionPack, PartitionType, PrimerPack, RandomIndexEntry, RandomIndexPack};
use crate::types::{
    track_type_for_data_definition, wrap_essence_element, MxfTimestamp, ProductVersion,
    Ul, Umid, Uuid, DD_TIMECODE_12M_INACTIVE_UL, EC_MULTIPLE_WRAPPINGS_UL, OP_1A_UL,
};
use crate::writer::{self, EssenceCaps, EssenceElementWriter, WriteResult};

const INDEX_SID: u32 = 2;
const BODY_SID: u32 = 1;

/// Where the muxed bytes go. `rewind` repositions the write cursor at
/// the start of the output for the header rewrite at EOS.
pub trait MuxOutput {
    fn write(&mut self, data: &[u8]) -> Result<(), Error>;

    fn seekable(&self) -> bool {
        false
    }

    fn rewind(&mut self) -> Result<(), Error> {
        bail!("output is not seekable")
    }
}

/// An in-memory seekable output, used by tests and by hosts that buffer
/// whole files.
#[derive(Debug, Default)]
pub struct SeekableBuffer {
    data: Vec<u8>,
    pos: usize,
}

impl SeekableBuffer {
    pub fn new() -> SeekableBuffer {
        SeekableBuffer::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl MuxOutput for SeekableBuffer {
    fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        let overlap = std::cmp::min(self.data.len() - self.pos, data.len());
        self.data[self.pos..self.pos + overlap].copy_from_slice(&data[..overlap]);
        self.data.extend_from_slice(&data[overlap..]);
        self.pos += data.len();
        Ok(())
    }

    fn seekable(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<(), Error> {
        self.pos = 0;
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MuxState {
    Header,
    Data,
    Eos,
    Error,
}

struct Pad {
    /// Stable handle given out by add_pad; pad order changes on the
    /// first DATA entry.
    id: usize,
    caps: EssenceCaps,
    writer: &'static dyn EssenceElementWriter,
    descriptor: Option<Descriptor>,
    descriptor_uid: Option<Uuid>,
    pending: VecDeque<Buffer>,
    adapter: Vec<u8>,
    have_complete_edit_unit: bool,
    eos: bool,
    /// Edit units written.
    pos: u64,
    /// End of the last written edit unit, in ns.
    last_timestamp: u64,
    edit_rate: Fraction,
    track_number: u32,
    source_sequence_uid: Option<Uuid>,
    source_clip_uid: Option<Uuid>,
    material_sequence_uid: Option<Uuid>,
    material_clip_uid: Option<Uuid>,
}

/// See the module docs.
pub struct MxfMux<O: MuxOutput> {
    output: O,
    state: MuxState,
    pads: Vec<Pad>,

    metadata: MetadataSet,
    primer: PrimerPack,
    partition: PartitionPack,
    source_package_umid: Umid,
    timecode_sequence_uids: Vec<Uuid>,

    min_edit_rate: Fraction,
    last_gc_timestamp: u64,
    last_gc_position: u64,
    offset: u64,
    body_partition_offset: u64,

    index_table: Vec<IndexTableSegment>,
    current_index_pos: usize,
    last_keyframe_pos: u64,
    /// Temporal offsets patched into entries that do not exist yet.
    pending_temporal: Vec<(usize, usize, i8)>,
}

impl<O: MuxOutput> MxfMux<O> {
    pub fn new(output: O) -> MxfMux<O> {
        writer::init();
        MxfMux {
            output,
            state: MuxState::Header,
            pads: Vec::new(),
            metadata: MetadataSet::new(),
            primer: PrimerPack::new(),
            partition: PartitionPack::default(),
            source_package_umid: Umid::generate(),
            timecode_sequence_uids: Vec::new(),
            min_edit_rate: Fraction::new(0, 0),
            last_gc_timestamp: 0,
            last_gc_position: 0,
            offset: 0,
            body_partition_offset: 0,
            index_table: Vec::new(),
            current_index_pos: 0,
            last_keyframe_pos: 0,
            pending_temporal: Vec::new(),
        }
    }

    pub fn state(&self) -> MuxState {
        self.state
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn into_output(self) -> O {
        self.output
    }

    /// Creates a sink pad for the given essence configuration. Pads can
    /// only be requested before the header has been written.
    pub fn add_pad(&mut self, caps: EssenceCaps) -> Result<usize, Error> {
        if self.state != MuxState::Header {
            warn!("can't request pads after writing header");
            bail!("can't request pads after writing header");
        }
        let writer = writer::find(&caps)
            .ok_or_else(|| format_err!("no essence element writer for {:?}", caps))?;
        let descriptor = writer.get_descriptor(&caps)?;

        let id = self.pads.len();
        debug!("created pad {} with writer {}", id, writer.name());
        self.pads.push(Pad {
            id,
            caps,
            writer,
            descriptor: Some(descriptor),
            descriptor_uid: None,
            pending: VecDeque::new(),
            adapter: Vec::new(),
            have_complete_edit_unit: false,
            eos: false,
            pos: 0,
            last_timestamp: 0,
            edit_rate: Fraction::new(0, 0),
            track_number: 0,
            source_sequence_uid: None,
            source_clip_uid: None,
            material_sequence_uid: None,
            material_clip_uid: None,
        });
        Ok(id)
    }

    fn resolve_pad(&self, pad_id: usize) -> Result<usize, Error> {
        self.pads
            .iter()
            .position(|p| p.id == pad_id)
            .ok_or_else(|| format_err!("no pad {}", pad_id))
    }

    /// Re-negotiates a pad. The replacement descriptor takes over the
    /// previous descriptor's instance uid, so every owning reference in
    /// the metadata graph stays valid.
    pub fn set_caps(&mut self, pad_id: usize, caps: EssenceCaps) -> Result<(), Error> {
        let pad_idx = self.resolve_pad(pad_id)?;
        if !self.pads[pad_idx].writer.handles(&caps) {
            self.state = MuxState::Error;
            bail!("caps {:?} not acceptable for writer", caps);
        }

        let mut descriptor = self.pads[pad_idx].writer.get_descriptor(&caps)?;
        if let Some(uid) = self.pads[pad_idx].descriptor_uid {
            descriptor.file_mut().instance_uid = uid;
            descriptor.file_mut().linked_track_id = self
                .metadata
                .get(&uid)
                .and_then(|o| match o {
                    MetadataObject::Descriptor(d) => Some(d.file().linked_track_id),
                    _ => None,
                })
                .unwrap_or(0);
            self.metadata.replace(MetadataObject::Descriptor(descriptor));
        } else {
            self.pads[pad_idx].descriptor = Some(descriptor);
        }
        self.pads[pad_idx].caps = caps;
        Ok(())
    }

    /// Queues one buffer and drives the aggregation loop.
    pub fn push(&mut self, pad_id: usize, buffer: Buffer) -> Result<(), Error> {
        match self.state {
            MuxState::Error => bail!("muxer is in the error state"),
            MuxState::Eos => bail!("muxer is EOS"),
            _ => {}
        }
        let pad_idx = self.resolve_pad(pad_id)?;
        self.pads[pad_idx].pending.push_back(buffer);
        self.aggregate()
    }

    /// Marks a pad finished; once every pad is finished the file is
    /// finalized.
    pub fn end_of_stream(&mut self, pad_id: usize) -> Result<(), Error> {
        match self.state {
            MuxState::Error => bail!("muxer is in the error state"),
            MuxState::Eos => return Ok(()),
            _ => {}
        }
        let pad_idx = self.resolve_pad(pad_id)?;
        self.pads[pad_idx].eos = true;
        self.aggregate()?;

        if self.state == MuxState::Data && self.pads.iter().all(|p| p.eos) {
            debug!("handling EOS");
            if let Err(e) = self.handle_eos() {
                self.state = MuxState::Error;
                return Err(e);
            }
            self.state = MuxState::Eos;
        }
        Ok(())
    }

    /// Flush-start: drops all queued essence and index state.
    pub fn flush_start(&mut self) {
        for pad in &mut self.pads {
            pad.pending.clear();
            pad.adapter.clear();
            pad.have_complete_edit_unit = false;
        }
        self.index_table.clear();
        self.pending_temporal.clear();
        self.current_index_pos = 0;
    }

    /// Flush-stop: resets positions and the generic container clock.
    pub fn flush_stop(&mut self) {
        for pad in &mut self.pads {
            pad.pos = 0;
            pad.last_timestamp = 0;
        }
        self.last_gc_position = 0;
        self.last_gc_timestamp = 0;
        self.last_keyframe_pos = 0;
    }

    fn push_bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        if let Err(e) = self.output.write(data) {
            error!("output write failed: {}", e);
            self.state = MuxState::Error;
            return Err(e);
        }
        self.offset += data.len() as u64;
        Ok(())
    }

    fn next_gc_timestamp(&self) -> u64 {
        u64_scale(
            (self.last_gc_position + 1) * SECOND.nanos(),
            self.min_edit_rate.d as u64,
            self.min_edit_rate.n as u64,
        )
    }

    fn aggregate(&mut self) -> Result<(), Error> {
        if self.state == MuxState::Error {
            bail!("muxer had an error before");
        }

        if self.state == MuxState::Header {
            if self.pads.is_empty() {
                self.state = MuxState::Error;
                bail!("no input streams configured");
            }
            // Descriptors may want to look at the first buffer; hold off
            // until every live pad has one.
            if self.pads.iter().any(|p| !p.eos && p.pending.is_empty()) {
                return Ok(());
            }

            if let Err(e) = self.start_header() {
                self.state = MuxState::Error;
                return Err(e);
            }
            self.state = MuxState::Data;
        }

        loop {
            // Interleaving decisions need a buffer on every live pad.
            if self
                .pads
                .iter()
                .any(|p| !p.eos && p.pending.is_empty() && !p.have_complete_edit_unit)
            {
                return Ok(());
            }

            let next_gc = self.next_gc_timestamp();
            let mut best = None;
            let mut any_data = false;
            for (i, pad) in self.pads.iter().enumerate() {
                let has_data = pad.have_complete_edit_unit
                    || !pad.adapter.is_empty()
                    || !pad.pending.is_empty();
                if !has_data && pad.eos {
                    continue;
                }
                any_data |= has_data;
                if has_data && pad.last_timestamp < next_gc {
                    best = Some(i);
                    break;
                }
            }

            match best {
                Some(i) => {
                    if let Err(e) = self.handle_buffer(i) {
                        self.state = MuxState::Error;
                        return Err(e);
                    }
                }
                None if any_data => {
                    // All due pads are past the clock; advance it.
                    self.last_gc_position += 1;
                    self.last_gc_timestamp = next_gc;
                }
                None => return Ok(()),
            }
        }
    }

    fn start_header(&mut self) -> Result<(), Error> {
        self.create_metadata()?;
        self.init_partition_pack();
        self.write_header_metadata()?;

        // Pads are written in (track type, track number) order for the
        // remainder of the stream.
        self.pads.sort_by_key(|p| {
            (
                track_type_for_data_definition(&p.writer.data_definition()),
                p.track_number,
            )
        });

        self.write_body_partition()
    }

    fn create_metadata(&mut self) -> Result<(), Error> {
        debug!("creating MXF metadata");

        for pad in &mut self.pads {
            let descriptor = pad
                .descriptor
                .as_mut()
                .ok_or_else(|| format_err!("pad without descriptor"))?;
            pad.writer
                .update_descriptor(descriptor, &pad.caps, pad.pending.front());
        }

        let now = MxfTimestamp::now();
        let n_pads = self.pads.len();

        // Unique essence containers across all descriptors.
        let mut essence_containers: Vec<Ul> = Vec::new();
        for pad in &self.pads {
            let ec = pad.descriptor.as_ref().unwrap().essence_container();
            if ec.is_zero() {
                bail!("descriptor without essence container label");
            }
            if !essence_containers.contains(&ec) {
                essence_containers.push(ec);
            }
        }

        let preface_uid = Uuid::generate();
        // Doubles as the material package's instance uid.
        let primary_package_uid = Uuid::generate();
        let content_storage_uid = Uuid::generate();
        let identification_uid = Uuid::generate();
        let ecd_uid = Uuid::generate();
        let source_package_uid = Uuid::generate();
        let multiple_descriptor_uid =
            if n_pads > 1 { Some(Uuid::generate()) } else { None };

        self.metadata.insert(MetadataObject::Preface(Preface {
            instance_uid: preface_uid,
            last_modified_date: now,
            version: 258,
            object_model_version: 1,
            primary_package_uid,
            identifications: vec![identification_uid],
            content_storage: content_storage_uid,
            operational_pattern: OP_1A_UL,
            essence_containers: essence_containers.clone(),
            dm_schemes: Vec::new(),
        }));

        // Identification.
        {
            let version = parse_crate_version();
            self.metadata.insert(MetadataObject::Identification(Identification {
                instance_uid: identification_uid,
                this_generation_uid: Uuid::generate(),
                company_name: "Fieldline".to_string(),
                product_name: "Fieldline MXF library".to_string(),
                product_version: version,
                version_string: env!("CARGO_PKG_VERSION").to_string(),
                product_uid: Uuid([
                    0xe5, 0xde, 0xcd, 0x04, 0x24, 0x90, 0x69, 0x18, 0x8a, 0xc9, 0xb5,
                    0xd7, 0x02, 0x58, 0x46, 0x78,
                ]),
                modification_date: now,
                toolkit_version: version,
                platform: Some(format!(
                    "{} {}",
                    std::env::consts::OS,
                    std::env::consts::ARCH
                )),
            }));
        }

        self.metadata.insert(MetadataObject::ContentStorage(ContentStorage {
            instance_uid: content_storage_uid,
            packages: vec![primary_package_uid, source_package_uid],
            essence_container_data: vec![ecd_uid],
        }));

        // Source package: timecode track plus one essence track per pad.
        let mut source_tracks = vec![Uuid([0; 16])]; // timecode placeholder
        let mut min_edit_rate = Fraction::new(0, 0);
        let mut min_edit_rate_value = f64::MAX;

        for (n, pad) in self.pads.iter_mut().enumerate() {
            let n = n + 1;
            let descriptor = pad.descriptor.as_mut().unwrap();

            let edit_rate =
                pad.writer
                    .get_edit_rate(descriptor, &pad.caps, pad.pending.front());
            if edit_rate.n <= 0 || edit_rate.d <= 0 {
                bail!("invalid edit rate {} for pad {}", edit_rate, n - 1);
            }
            pad.edit_rate = edit_rate;
            if edit_rate.as_f64() < min_edit_rate_value {
                min_edit_rate_value = edit_rate.as_f64();
                min_edit_rate = edit_rate;
            }

            pad.track_number = pad.writer.get_track_number_template(descriptor, &pad.caps);

            let clip_uid = Uuid::generate();
            let sequence_uid = Uuid::generate();
            let track_uid = Uuid::generate();
            let data_definition = pad.writer.data_definition();

            self.metadata.insert(MetadataObject::SourceClip(SourceClip {
                instance_uid: clip_uid,
                data_definition,
                duration: -1,
                start_position: 0,
                // The chain ends here: a zero package id marks original
                // material.
                source_package_id: Umid([0; 32]),
                source_track_id: 0,
            }));
            self.metadata.insert(MetadataObject::Sequence(Sequence {
                instance_uid: sequence_uid,
                data_definition,
                duration: -1,
                structural_components: vec![clip_uid],
            }));
            self.metadata.insert(MetadataObject::TimelineTrack(TimelineTrack {
                instance_uid: track_uid,
                track_id: n as u32 + 1,
                track_number: pad.track_number,
                track_name: None,
                edit_rate,
                origin: 0,
                sequence: sequence_uid,
            }));

            descriptor.file_mut().linked_track_id = n as u32 + 1;
            let descriptor_uid = Uuid::generate();
            descriptor.file_mut().instance_uid = descriptor_uid;
            pad.descriptor_uid = Some(descriptor_uid);
            pad.source_sequence_uid = Some(sequence_uid);
            pad.source_clip_uid = Some(clip_uid);
            source_tracks.push(track_uid);
        }
        self.min_edit_rate = min_edit_rate;

        // Timecode tracks at index 0 of both packages.
        let source_timecode_uid = self.insert_timecode_track(min_edit_rate, 1)?;
        source_tracks[0] = source_timecode_uid;

        // Move descriptors into the graph, wrapped when there is more
        // than one essence track.
        let package_descriptor_uid = if let Some(multi_uid) = multiple_descriptor_uid {
            let mut subs = Vec::with_capacity(n_pads);
            for pad in &mut self.pads {
                let descriptor = pad.descriptor.take().unwrap();
                subs.push(descriptor.instance_uid());
                self.metadata.insert(MetadataObject::Descriptor(descriptor));
            }
            self.metadata.insert(MetadataObject::Descriptor(Descriptor::Multiple(
                MultipleDescriptor {
                    file: FileDescriptorCommon {
                        instance_uid: multi_uid,
                        sample_rate: min_edit_rate,
                        ..FileDescriptorCommon::new(EC_MULTIPLE_WRAPPINGS_UL)
                    },
                    sub_descriptors: subs,
                },
            )));
            multi_uid
        } else {
            let pad = &mut self.pads[0];
            let descriptor = pad.descriptor.take().unwrap();
            let uid = descriptor.instance_uid();
            self.metadata.insert(MetadataObject::Descriptor(descriptor));
            uid
        };

        self.metadata.insert(MetadataObject::SourcePackage(SourcePackage {
            common: PackageCommon {
                instance_uid: source_package_uid,
                package_uid: self.source_package_umid,
                name: Some("Source package".to_string()),
                package_creation_date: now,
                package_modified_date: now,
                tracks: source_tracks,
            },
            descriptor: Some(package_descriptor_uid),
        }));

        // Material package mirrors the source package track for track.
        let mut material_tracks = vec![self.insert_timecode_track(min_edit_rate, 1)?];
        for (n, pad) in self.pads.iter_mut().enumerate() {
            let n = n + 1;
            let clip_uid = Uuid::generate();
            let sequence_uid = Uuid::generate();
            let track_uid = Uuid::generate();
            let data_definition = pad.writer.data_definition();

            self.metadata.insert(MetadataObject::SourceClip(SourceClip {
                instance_uid: clip_uid,
                data_definition,
                duration: -1,
                start_position: 0,
                source_package_id: self.source_package_umid,
                source_track_id: n as u32 + 1,
            }));
            self.metadata.insert(MetadataObject::Sequence(Sequence {
                instance_uid: sequence_uid,
                data_definition,
                duration: -1,
                structural_components: vec![clip_uid],
            }));
            self.metadata.insert(MetadataObject::TimelineTrack(TimelineTrack {
                instance_uid: track_uid,
                track_id: n as u32 + 1,
                track_number: 0,
                track_name: None,
                edit_rate: pad.edit_rate,
                origin: 0,
                sequence: sequence_uid,
            }));

            pad.material_sequence_uid = Some(sequence_uid);
            pad.material_clip_uid = Some(clip_uid);
            material_tracks.push(track_uid);
        }

        self.metadata.insert(MetadataObject::MaterialPackage(MaterialPackage {
            common: PackageCommon {
                instance_uid: primary_package_uid,
                package_uid: Umid::generate(),
                name: Some("Material package".to_string()),
                package_creation_date: now,
                package_modified_date: now,
                tracks: material_tracks,
            },
        }));

        // Sibling tracks of the same essence kind share a template; the
        // final number is (kind count << 16) | ordinal.
        {
            let templates: Vec<u32> = self.pads.iter().map(|p| p.track_number).collect();
            for i in 0..self.pads.len() {
                let templ = templates[i];
                if templ & 0x00ff_00ff != 0 {
                    continue;
                }
                let n_type =
                    templates.iter().filter(|t| **t == templ).count() as u32;
                let mut ordinal = 0u32;
                for (j, t) in templates.iter().enumerate() {
                    if *t == templ {
                        ordinal += 1;
                        if j == i {
                            break;
                        }
                    }
                }
                let number = templ | (n_type << 16) | ordinal;
                self.pads[i].track_number = number;
                // Propagate to the source track.
                let track_uid = self.metadata.order.iter().copied().find(|uid| {
                    matches!(
                        self.metadata.get(uid),
                        Some(MetadataObject::TimelineTrack(t))
                            if t.track_number == templ && t.track_id == i as u32 + 2
                    )
                });
                if let Some(uid) = track_uid {
                    if let Some(MetadataObject::TimelineTrack(t)) =
                        self.metadata.get_mut(&uid)
                    {
                        t.track_number = number;
                    }
                }
            }
        }

        self.metadata.insert(MetadataObject::EssenceContainerData(
            EssenceContainerData {
                instance_uid: ecd_uid,
                linked_package_uid: self.source_package_umid,
                index_sid: INDEX_SID,
                body_sid: BODY_SID,
            },
        ));

        // Descriptors are emitted between the multiple descriptor and the
        // source package.
        self.metadata.sort_descriptors();

        Ok(())
    }

    fn insert_timecode_track(
        &mut self,
        edit_rate: Fraction,
        track_id: u32,
    ) -> Result<Uuid, Error> {
        let component_uid = Uuid::generate();
        let sequence_uid = Uuid::generate();
        let track_uid = Uuid::generate();

        let rounded_timecode_base = if edit_rate.d == 0 {
            1
        } else {
            (edit_rate.as_f64() + 0.5) as u16
        };

        self.metadata.insert(MetadataObject::TimecodeComponent(TimecodeComponent {
            instance_uid: component_uid,
            data_definition: DD_TIMECODE_12M_INACTIVE_UL,
            duration: -1,
            start_timecode: 0,
            rounded_timecode_base,
            drop_frame: false,
        }));
        self.metadata.insert(MetadataObject::Sequence(Sequence {
            instance_uid: sequence_uid,
            data_definition: DD_TIMECODE_12M_INACTIVE_UL,
            duration: -1,
            structural_components: vec![component_uid],
        }));
        self.metadata.insert(MetadataObject::TimelineTrack(TimelineTrack {
            instance_uid: track_uid,
            track_id,
            track_number: 0,
            track_name: Some("Timecode track".to_string()),
            edit_rate,
            origin: 0,
            sequence: sequence_uid,
        }));
        self.timecode_sequence_uids.push(sequence_uid);
        Ok(track_uid)
    }

    fn init_partition_pack(&mut self) {
        self.partition.reset();
        self.partition.partition_type = PartitionType::Header;
        self.partition.closed = false;
        self.partition.complete = false;
        self.partition.operational_pattern = OP_1A_UL;

        let mut essence_containers = Vec::new();
        for pad in &self.pads {
            let ec = self
                .metadata
                .get(&pad.descriptor_uid.unwrap())
                .map(|o| match o {
                    MetadataObject::Descriptor(d) => d.essence_container(),
                    _ => Ul([0; 16]),
                })
                .unwrap_or(Ul([0; 16]));
            if !essence_containers.contains(&ec) {
                essence_containers.push(ec);
            }
        }
        self.partition.essence_containers = essence_containers;
    }

    fn write_header_metadata(&mut self) -> Result<(), Error> {
        let buffers = self.metadata.serialize(&mut self.primer);
        let primer_bytes = self.primer.to_bytes();
        let header_byte_count =
            primer_bytes.len() as u64 + buffers.iter().map(|b| b.len() as u64).sum::<u64>();

        self.partition.header_byte_count = header_byte_count;
        let partition_bytes = self.partition.to_bytes();
        self.push_bytes(&partition_bytes)?;
        self.push_bytes(&primer_bytes)?;
        for buf in buffers {
            self.push_bytes(&buf)?;
        }
        Ok(())
    }

    fn write_body_partition(&mut self) -> Result<(), Error> {
        self.partition.partition_type = PartitionType::Body;
        self.partition.closed = true;
        self.partition.complete = true;
        self.partition.this_partition = self.offset;
        self.partition.prev_partition = 0;
        self.partition.footer_partition = 0;
        self.partition.header_byte_count = 0;
        self.partition.index_byte_count = 0;
        self.partition.index_sid = 0;
        self.partition.body_offset = 0;
        self.partition.body_sid = BODY_SID;
        self.body_partition_offset = self.offset;

        let bytes = self.partition.to_bytes();
        self.push_bytes(&bytes)
    }

    fn new_index_segment(&mut self, edit_rate: Fraction) -> IndexTableSegment {
        let start = self
            .index_table
            .last()
            .map(|s| s.index_start_position + s.index_duration)
            .unwrap_or(0);
        IndexTableSegment::new(Uuid::generate(), edit_rate, start, INDEX_SID, BODY_SID)
    }

    /// Indexes one edit unit of the first sink pad.
    fn index_edit_unit(
        &mut self,
        pad_pos: u64,
        edit_rate: Fraction,
        is_keyframe: bool,
        pts: Option<media::ClockTime>,
        dts: Option<media::ClockTime>,
    ) {
        if self.index_table.is_empty()
            || self.index_table[self.current_index_pos].index_entries.len()
                >= MAX_INDEX_ENTRIES
        {
            if !self.index_table.is_empty() {
                self.current_index_pos += 1;
            }
            if self.index_table.len() <= self.current_index_pos {
                let segment = self.new_index_segment(edit_rate);
                self.index_table.push(segment);
            }
        }

        // Back-patch the temporal offset when presentation and stream
        // order diverge.
        if let (Some(pts), Some(_dts)) = (pts, dts) {
            let pts_pos = u64_scale_round(
                pts.nanos(),
                edit_rate.n as u64,
                edit_rate.d as u64 * SECOND.nanos(),
            );

            let mut diff = pts_pos as i64 - pad_pos as i64;
            let mut target_index = self.current_index_pos;
            let mut target_slot =
                self.index_table[target_index].index_entries.len() as i64;
            let mut in_range = true;

            if diff >= 0 {
                while target_slot + diff >= MAX_INDEX_ENTRIES as i64 {
                    diff -= MAX_INDEX_ENTRIES as i64 - target_slot;
                    target_slot = 0;
                    target_index += 1;
                    if target_index >= self.index_table.len() {
                        let segment = self.new_index_segment(edit_rate);
                        self.index_table.push(segment);
                    }
                }
            } else {
                while target_slot + diff < 0 {
                    if target_index == 0 {
                        in_range = false;
                        break;
                    }
                    diff += target_slot;
                    target_slot = MAX_INDEX_ENTRIES as i64;
                    target_index -= 1;
                }
            }

            if in_range && diff != 0 {
                let slot = (target_slot + diff) as usize;
                let offset = (-diff).max(-127).min(127) as i8;
                let segment = &mut self.index_table[target_index];
                if slot < segment.index_entries.len() {
                    segment.index_entries[slot].temporal_offset = offset;
                } else {
                    self.pending_temporal.push((target_index, slot, offset));
                }
            }
        }

        if is_keyframe {
            self.last_keyframe_pos = pad_pos;
        }

        let key_frame_offset =
            std::cmp::min(pad_pos - self.last_keyframe_pos, 127) as i8;
        let slot = self.index_table[self.current_index_pos].index_entries.len();
        let mut entry = IndexEntry {
            temporal_offset: 0,
            key_frame_offset,
            flags: if is_keyframe { 0x80 } else { 0x20 },
            stream_offset: self.partition.body_offset,
        };
        if let Some(i) = self
            .pending_temporal
            .iter()
            .position(|(seg, s, _)| *seg == self.current_index_pos && *s == slot)
        {
            entry.temporal_offset = self.pending_temporal.remove(i).2;
        }

        let segment = &mut self.index_table[self.current_index_pos];
        segment.index_entries.push(entry);
        segment.index_duration += 1;
    }

    fn handle_buffer(&mut self, pad_idx: usize) -> Result<(), Error> {
        let (flush, buf, is_keyframe, pts, dts) = {
            let pad = &mut self.pads[pad_idx];
            let flush =
                pad.eos && !pad.have_complete_edit_unit && pad.pending.is_empty();
            let buf = if pad.have_complete_edit_unit {
                None
            } else {
                pad.pending.pop_front()
            };
            let is_keyframe = buf.as_ref().map(|b| b.is_keyframe()).unwrap_or(true);
            let pts = buf.as_ref().and_then(|b| b.pts);
            let dts = buf.as_ref().and_then(|b| b.dts);
            (flush || buf.is_none(), buf, is_keyframe, pts, dts)
        };

        debug!(
            "handling {} for pad {} at position {}",
            if buf.is_some() { "buffer" } else { "drain" },
            pad_idx,
            self.pads[pad_idx].pos
        );

        let result = {
            let pad = &mut self.pads[pad_idx];
            pad.writer.write(buf, &mut pad.adapter, &pad.caps, flush)?
        };

        let data = match result {
            WriteResult::Partial => {
                self.pads[pad_idx].have_complete_edit_unit = false;
                return Ok(());
            }
            WriteResult::CompleteEditUnit { data, more } => {
                self.pads[pad_idx].have_complete_edit_unit = more;
                data
            }
        };

        // Only the first essence stream is indexed.
        if pad_idx == 0 {
            let (pos, edit_rate) = {
                let pad = &self.pads[pad_idx];
                (pad.pos, pad.edit_rate)
            };
            self.index_edit_unit(pos, edit_rate, is_keyframe, pts, dts);
        }

        let element = wrap_essence_element(self.pads[pad_idx].track_number, &data);
        trace!("essence element key {:?}", (&element[..16]).hex_dump());
        self.partition.body_offset += element.len() as u64;
        self.push_bytes(&element)?;

        let pad = &mut self.pads[pad_idx];
        pad.pos += 1;
        pad.last_timestamp = u64_scale(
            SECOND.nanos() * pad.pos,
            pad.edit_rate.d as u64,
            pad.edit_rate.n as u64,
        );

        Ok(())
    }

    fn handle_eos(&mut self) -> Result<(), Error> {
        // Drain every pad on the generic container clock.
        loop {
            let next_gc = self.next_gc_timestamp();
            let mut best = None;
            let mut have_data = false;
            for (i, pad) in self.pads.iter().enumerate() {
                let has_data = pad.have_complete_edit_unit
                    || !pad.adapter.is_empty()
                    || !pad.pending.is_empty();
                if !has_data {
                    continue;
                }
                have_data = true;
                if pad.last_timestamp < next_gc {
                    best = Some(i);
                    break;
                }
            }
            match best {
                Some(i) => self.handle_buffer(i)?,
                None if have_data => {
                    self.last_gc_position += 1;
                    self.last_gc_timestamp = next_gc;
                }
                None => break,
            }
        }

        self.last_gc_position += 1;
        self.last_gc_timestamp = u64_scale(
            self.last_gc_position * SECOND.nanos(),
            self.min_edit_rate.d as u64,
            self.min_edit_rate.n as u64,
        );
        debug!(
            "container clock stopped at {} ns, {} edit units",
            self.last_gc_timestamp, self.last_gc_position
        );

        // Finalize durations: essence tracks take the pad position.
        for pad_idx in 0..self.pads.len() {
            let pos = self.pads[pad_idx].pos as i64;
            for uid in [
                self.pads[pad_idx].source_sequence_uid,
                self.pads[pad_idx].material_sequence_uid,
            ]
            .iter()
            .flatten()
            {
                if let Some(MetadataObject::Sequence(s)) = self.metadata.get_mut(uid) {
                    s.duration = pos;
                }
            }
            for uid in [
                self.pads[pad_idx].source_clip_uid,
                self.pads[pad_idx].material_clip_uid,
            ]
            .iter()
            .flatten()
            {
                if let Some(MetadataObject::SourceClip(c)) = self.metadata.get_mut(uid) {
                    c.duration = pos;
                }
            }
        }

        // Timecode tracks of both packages run to the container clock.
        let timecode_uids = self.timecode_sequence_uids.clone();
        for uid in timecode_uids {
            let component_uid = match self.metadata.get_mut(&uid) {
                Some(MetadataObject::Sequence(s)) => {
                    s.duration = self.last_gc_position as i64;
                    s.structural_components.first().copied()
                }
                _ => None,
            };
            if let Some(cuid) = component_uid {
                if let Some(MetadataObject::TimecodeComponent(c)) =
                    self.metadata.get_mut(&cuid)
                {
                    c.duration = self.last_gc_position as i64;
                }
            }
        }

        let body_partition = self.body_partition_offset;
        let footer_offset = self.offset;

        let index_buffers: Vec<Bytes> =
            self.index_table.iter().map(|s| s.to_bytes()).collect();
        let index_byte_count: u64 = index_buffers.iter().map(|b| b.len() as u64).sum();

        self.partition.partition_type = PartitionType::Footer;
        self.partition.closed = true;
        self.partition.complete = true;
        self.partition.this_partition = footer_offset;
        self.partition.prev_partition = body_partition;
        self.partition.footer_partition = footer_offset;
        self.partition.header_byte_count = 0;
        self.partition.index_byte_count = index_byte_count;
        self.partition.index_sid = INDEX_SID;
        self.partition.body_offset = 0;
        self.partition.body_sid = 0;

        self.write_header_metadata()?;

        for buf in index_buffers {
            self.push_bytes(&buf)?;
        }

        let rip = RandomIndexPack {
            entries: vec![
                RandomIndexEntry { body_sid: 0, offset: 0 },
                RandomIndexEntry { body_sid: BODY_SID, offset: body_partition },
                RandomIndexEntry { body_sid: 0, offset: footer_offset },
            ],
        };
        self.push_bytes(&rip.to_bytes())?;

        // Rewrite the header partition with the final offsets and the
        // recomputed metadata.
        if self.output.seekable() {
            self.output.rewind()?;
            self.offset = 0;

            self.partition.partition_type = PartitionType::Header;
            self.partition.closed = true;
            self.partition.complete = true;
            self.partition.this_partition = 0;
            self.partition.prev_partition = 0;
            self.partition.footer_partition = footer_offset;
            self.partition.header_byte_count = 0;
            self.partition.index_byte_count = 0;
            self.partition.index_sid = 0;
            self.partition.body_offset = 0;
            self.partition.body_sid = 0;

            self.write_header_metadata()?;

            if self.offset != body_partition {
                bail!(
                    "rewritten header size {} does not match body partition offset {}",
                    self.offset,
                    body_partition
                );
            }

            self.partition.partition_type = PartitionType::Body;
            self.partition.closed = true;
            self.partition.complete = true;
            self.partition.this_partition = self.offset;
            self.partition.prev_partition = 0;
            self.partition.footer_partition = footer_offset;
            self.partition.body_sid = BODY_SID;
            let bytes = self.partition.to_bytes();
            self.push_bytes(&bytes)?;
        } else {
            warn!("can't rewrite header partition");
        }

        Ok(())
    }

    /// The constructed metadata graph, for inspection and tests.
    pub fn metadata(&self) -> &MetadataSet {
        &self.metadata
    }

    pub fn index_table(&self) -> &[IndexTableSegment] {
        &self.index_table
    }
}

fn parse_crate_version() -> ProductVersion {
    let mut parts = env!("CARGO_PKG_VERSION").split('.');
    let mut next = || parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    ProductVersion {
        major: next(),
        minor: next(),
        patch: next(),
        build: 0,
        release: 1,
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use super::*;
    use crate::partition::PartitionPack;
    use crate::types::take_klv;
    use media::ClockTime;

    fn video_caps() -> EssenceCaps {
        EssenceCaps {
            media_type: "video/x-raw".to_string(),
            width: 720,
            height: 576,
            fps: Fraction::new(25, 1),
            ..EssenceCaps::default()
        }
    }

    fn audio_caps() -> EssenceCaps {
        EssenceCaps {
            media_type: "audio/x-raw".to_string(),
            rate: 48000,
            channels: 2,
            fps: Fraction::new(25, 1),
            ..EssenceCaps::default()
        }
    }

    fn video_buffer(n: u64, keyframe: bool) -> Buffer {
        let pts = ClockTime(n * SECOND.nanos() / 25);
        let mut buf = Buffer::new(Bytes::from(vec![n as u8; 16]))
            .with_pts(pts)
            .with_duration(ClockTime(SECOND.nanos() / 25));
        buf.dts = Some(pts);
        if !keyframe {
            buf.flags.insert(media::BufferFlags::DELTA_UNIT);
        }
        buf
    }

    fn mux_single_video(n_frames: u64) -> (Vec<u8>, Vec<(Uuid, Vec<Uuid>)>) {
        let mut mux = MxfMux::new(SeekableBuffer::new());
        let pad = mux.add_pad(video_caps()).unwrap();
        for n in 0..n_frames {
            mux.push(pad, video_buffer(n, true)).unwrap();
        }
        mux.end_of_stream(pad).unwrap();
        assert_eq!(mux.state(), MuxState::Eos);
        let topology = mux.metadata().topology();
        (mux.into_output().data().to_vec(), topology)
    }

    /// Walks the file, returning partition offsets and essence elements.
    fn scan_file(data: &[u8]) -> (Vec<(u64, PartitionPack)>, Vec<(usize, Vec<u8>)>) {
        let mut partitions = Vec::new();
        let mut elements = Vec::new();
        let mut pos = 0usize;
        while pos + 16 <= data.len() {
            if let Ok((pack, _)) = PartitionPack::parse(&data[pos..]) {
                partitions.push((pos as u64, pack));
            }
            let (key, value, consumed) = take_klv(&data[pos..]).unwrap();
            if key.0[..12]
                == [0x06, 0x0e, 0x2b, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0d, 0x01, 0x03, 0x01]
            {
                elements.push((pos, key.0[12..16].to_vec()));
                let _ = value;
            }
            pos += consumed;
        }
        (partitions, elements)
    }

    /// One 25 fps video track, 100 keyframes: header at 0, body, 100
    /// essence elements with the patched track number, footer with one
    /// 100-entry index segment, RIP, rewritten header.
    #[test]
    fn single_video_track_file_layout() {
        let (data, _) = mux_single_video(100);
        let (partitions, elements) = scan_file(&data);

        assert_eq!(partitions.len(), 3);
        let (h_off, header) = &partitions[0];
        let (b_off, body) = &partitions[1];
        let (f_off, footer) = &partitions[2];

        assert_eq!(*h_off, 0);
        assert_eq!(header.partition_type, PartitionType::Header);
        // Rewritten closed and complete, pointing at the footer.
        assert!(header.closed && header.complete);
        assert_eq!(header.footer_partition, *f_off);

        assert_eq!(body.partition_type, PartitionType::Body);
        assert_eq!(body.body_sid, 1);
        assert_eq!(body.this_partition, *b_off);

        assert_eq!(footer.partition_type, PartitionType::Footer);
        assert_eq!(footer.prev_partition, *b_off);
        assert_eq!(footer.index_sid, 2);
        assert!(footer.index_byte_count > 0);

        // 100 essence elements, each keyed 15 01 <hi> <lo>.
        assert_eq!(elements.len(), 100);
        for (_, tn) in &elements {
            assert_eq!(tn, &vec![0x15, 0x01, 0x05, 0x01]);
        }

        // Index segment: 100 entries, all keyframes.
        let footer_start = *f_off as usize;
        let mut pos = footer_start;
        let mut segment = None;
        while pos + 16 <= data.len() {
            let (key, _, consumed) = take_klv(&data[pos..]).unwrap();
            if key == crate::types::INDEX_TABLE_SEGMENT_UL {
                segment = Some(IndexTableSegment::parse(&data[pos..]).unwrap().0);
                break;
            }
            pos += consumed;
        }
        let segment = segment.expect("no index segment in footer");
        assert_eq!(segment.index_entries.len(), 100);
        assert_eq!(segment.index_sid, 2);
        assert_eq!(segment.body_sid, 1);
        for e in &segment.index_entries {
            assert_eq!(e.flags, 0x80);
            assert_eq!(e.key_frame_offset, 0);
        }

        // RIP at the tail: [(0, 0), (body, 1), (footer, 0)].
        let rip_len = u32::from_be_bytes(
            data[data.len() - 4..].try_into().unwrap(),
        ) as usize;
        let (rip, _) = RandomIndexPack::parse(&data[data.len() - rip_len..]).unwrap();
        assert_eq!(
            rip.entries,
            vec![
                RandomIndexEntry { body_sid: 0, offset: 0 },
                RandomIndexEntry { body_sid: 1, offset: *b_off },
                RandomIndexEntry { body_sid: 0, offset: *f_off },
            ]
        );
    }

    /// Reparsing the emitted header metadata yields the same object
    /// graph topology.
    #[test]
    fn metadata_reparse_same_topology() {
        let (data, topology) = mux_single_video(10);

        // Header partition pack, then primer, then metadata sets up to
        // header_byte_count.
        let (header, consumed) = PartitionPack::parse(&data).unwrap();
        let (primer, primer_len) =
            crate::partition::PrimerPack::parse(&data[consumed..]).unwrap();
        let meta_start = consumed + primer_len;
        let meta_end = consumed + header.header_byte_count as usize;
        let set = MetadataSet::parse(&data[meta_start..meta_end], Some(&primer)).unwrap();

        assert_eq!(set.topology(), topology);

        // Structural invariants.
        let preface = set.preface().expect("no preface");
        assert_eq!(preface.identifications.len(), 1);
        let storage = match set.get(&preface.content_storage) {
            Some(MetadataObject::ContentStorage(c)) => c,
            o => panic!("bad content storage: {:?}", o),
        };
        assert_eq!(storage.packages.len(), 2);
        // Material and source package have matching track counts.
        let mut track_counts = Vec::new();
        for uid in &storage.packages {
            match set.get(uid) {
                Some(MetadataObject::MaterialPackage(p)) => {
                    track_counts.push(p.common.tracks.len())
                }
                Some(MetadataObject::SourcePackage(p)) => {
                    track_counts.push(p.common.tracks.len())
                }
                o => panic!("bad package: {:?}", o),
            }
        }
        assert_eq!(track_counts[0], track_counts[1]);
    }

    /// Audio + video interleave on the generic container clock; the
    /// video (picture) pad sorts first and is the indexed one.
    #[test]
    fn audio_video_interleave() {
        let mut mux = MxfMux::new(SeekableBuffer::new());
        let vpad = mux.add_pad(video_caps()).unwrap();
        let apad = mux.add_pad(audio_caps()).unwrap();

        let samples_per_frame = 48000 / 25 * 4;
        for n in 0..25u64 {
            mux.push(vpad, video_buffer(n, n % 5 == 0)).unwrap();
            let mut abuf = Buffer::new(Bytes::from(vec![0u8; samples_per_frame]));
            abuf.pts = Some(ClockTime(n * SECOND.nanos() / 25));
            mux.push(apad, abuf).unwrap();
        }
        mux.end_of_stream(vpad).unwrap();
        mux.end_of_stream(apad).unwrap();
        assert_eq!(mux.state(), MuxState::Eos);

        let data = mux.into_output().data().to_vec();
        let (partitions, elements) = scan_file(&data);
        assert_eq!(partitions.len(), 3);
        assert_eq!(elements.len(), 50);

        // Picture (0x15) and sound (0x16) elements alternate closely;
        // the first element is picture because picture tracks sort first.
        assert_eq!(elements[0].1[0], 0x15);
        assert!(elements.iter().any(|(_, tn)| tn[0] == 0x16));
    }

    /// Delta frames index with key-frame offsets and prediction flags.
    #[test]
    fn index_flags_and_key_frame_offsets() {
        let mut mux = MxfMux::new(SeekableBuffer::new());
        let pad = mux.add_pad(video_caps()).unwrap();
        for n in 0..10u64 {
            mux.push(pad, video_buffer(n, n % 5 == 0)).unwrap();
        }
        mux.end_of_stream(pad).unwrap();

        let segment = &mux.index_table()[0];
        assert_eq!(segment.index_entries.len(), 10);
        assert_eq!(segment.index_entries[0].flags, 0x80);
        assert_eq!(segment.index_entries[1].flags, 0x20);
        assert_eq!(segment.index_entries[1].key_frame_offset, 1);
        assert_eq!(segment.index_entries[4].key_frame_offset, 4);
        assert_eq!(segment.index_entries[5].flags, 0x80);
        assert_eq!(segment.index_entries[5].key_frame_offset, 0);
    }

    /// PTS/DTS skew back-patches temporal offsets.
    #[test]
    fn temporal_offset_backpatch() {
        let mut mux = MxfMux::new(SeekableBuffer::new());
        let pad = mux.add_pad(video_caps()).unwrap();

        let frame = |pts_n: u64, dts_n: u64, keyframe: bool| {
            let mut buf = video_buffer(dts_n, keyframe);
            buf.pts = Some(ClockTime(pts_n * SECOND.nanos() / 25));
            buf.dts = Some(ClockTime(dts_n * SECOND.nanos() / 25));
            buf
        };

        // Stream order I P B with presentation order I B P.
        mux.push(pad, frame(0, 0, true)).unwrap();
        mux.push(pad, frame(2, 1, false)).unwrap();
        mux.push(pad, frame(1, 2, false)).unwrap();
        mux.end_of_stream(pad).unwrap();

        let entries = &mux.index_table()[0].index_entries;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].temporal_offset, 0);
        assert_eq!(entries[1].temporal_offset, 1);
        assert_eq!(entries[2].temporal_offset, -1);
    }

    /// Index segments cap at 5957 entries and spill over.
    #[test]
    fn index_segment_spill() {
        let mut mux = MxfMux::new(SeekableBuffer::new());
        let pad = mux.add_pad(video_caps()).unwrap();
        let n = MAX_INDEX_ENTRIES as u64 + 10;
        for i in 0..n {
            mux.push(pad, video_buffer(i, true)).unwrap();
        }
        mux.end_of_stream(pad).unwrap();

        let table = mux.index_table();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].index_entries.len(), MAX_INDEX_ENTRIES);
        assert_eq!(table[1].index_entries.len(), 10);
        assert_eq!(
            table[1].index_start_position,
            table[0].index_start_position + table[0].index_duration
        );
    }

    #[test]
    fn pads_after_header_are_rejected() {
        let mut mux = MxfMux::new(SeekableBuffer::new());
        let pad = mux.add_pad(video_caps()).unwrap();
        mux.push(pad, video_buffer(0, true)).unwrap();
        assert!(mux.add_pad(audio_caps()).is_err());
    }

    #[test]
    fn push_without_pads_is_an_error() {
        let mut mux: MxfMux<SeekableBuffer> = MxfMux::new(SeekableBuffer::new());
        assert!(mux.push(0, video_buffer(0, true)).is_err());
    }
}
