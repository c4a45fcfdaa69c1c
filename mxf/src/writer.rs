//! Essence element writers and their process-wide registry.
//!
//! A writer knows how to turn buffers of one essence kind into complete
//! edit units and how to describe that essence in the metadata graph.
//! Concrete codec writers live with their codecs and register themselves
//! once at plugin initialization; two reference writers for raw picture
//! and PCM audio ship here.

use bytes::Bytes;
use failure::{bail, Error};
use log::debug;
use media::{Buffer, Fraction, SECOND};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::metadata::{
    CdciDescriptor, Descriptor, FileDescriptorCommon, GenericSoundDescriptor,
    PictureCommon,
};
use crate::types::{Ul, DD_PICTURE_UL, DD_SOUND_UL, EC_BWF_UL, EC_UNCOMPRESSED_PICTURE_UL};

/// The essence configuration of one sink pad, as negotiated by the host.
#[derive(Clone, Debug, Default)]
pub struct EssenceCaps {
    /// E.g. "video/x-raw" or "audio/x-raw".
    pub media_type: String,
    pub width: u32,
    pub height: u32,
    pub fps: Fraction,
    /// Audio sample rate.
    pub rate: u32,
    pub channels: u32,
}

/// Outcome of feeding one buffer to a writer.
#[derive(Debug)]
pub enum WriteResult {
    /// Input consumed, no complete edit unit yet.
    Partial,
    /// One complete edit unit; `more` when further complete units are
    /// still buffered in the adapter.
    CompleteEditUnit { data: Bytes, more: bool },
}

/// One registered essence kind.
pub trait EssenceElementWriter: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, caps: &EssenceCaps) -> bool;

    /// Data definition label of tracks carrying this essence.
    fn data_definition(&self) -> Ul;

    fn get_descriptor(&self, caps: &EssenceCaps) -> Result<Descriptor, Error>;

    fn get_edit_rate(
        &self,
        descriptor: &Descriptor,
        caps: &EssenceCaps,
        first_buffer: Option<&Buffer>,
    ) -> Fraction;

    /// Track number template: item and element type in the outer bytes,
    /// middle bytes zero, e.g. `0x15000500`.
    fn get_track_number_template(&self, descriptor: &Descriptor, caps: &EssenceCaps)
        -> u32;

    /// Refines the descriptor once the first buffer is available.
    fn update_descriptor(
        &self,
        _descriptor: &mut Descriptor,
        _caps: &EssenceCaps,
        _buffer: Option<&Buffer>,
    ) {
    }

    /// Feeds one buffer (`None` when only draining the adapter). `flush`
    /// forces out a final, possibly short, edit unit.
    fn write(
        &self,
        buffer: Option<Buffer>,
        adapter: &mut Vec<u8>,
        caps: &EssenceCaps,
        flush: bool,
    ) -> Result<WriteResult, Error>;
}

static REGISTRY: Lazy<RwLock<Vec<&'static dyn EssenceElementWriter>>> =
    Lazy::new(|| RwLock::new(Vec::new()));

/// Appends a writer to the process-wide registry. Writers are consulted
/// in registration order.
pub fn register(writer: &'static dyn EssenceElementWriter) {
    debug!("registering essence element writer {}", writer.name());
    REGISTRY.write().push(writer);
}

/// Registers the built-in reference writers; idempotent.
pub fn init() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        register(&RawPictureWriter);
        register(&PcmWriter);
    });
}

/// Finds the writer for a pad's caps.
pub fn find(caps: &EssenceCaps) -> Option<&'static dyn EssenceElementWriter> {
    REGISTRY.read().iter().copied().find(|w| w.handles(caps))
}

// ---------------------------------------------------------------------

/// Frame-wrapped uncompressed picture; one input buffer is one edit unit.
pub struct RawPictureWriter;

impl EssenceElementWriter for RawPictureWriter {
    fn name(&self) -> &'static str {
        "raw picture"
    }

    fn handles(&self, caps: &EssenceCaps) -> bool {
        caps.media_type == "video/x-raw"
    }

    fn data_definition(&self) -> Ul {
        DD_PICTURE_UL
    }

    fn get_descriptor(&self, caps: &EssenceCaps) -> Result<Descriptor, Error> {
        if !caps.fps.is_valid() {
            bail!("raw picture needs a framerate");
        }
        Ok(Descriptor::Cdci(CdciDescriptor {
            file: FileDescriptorCommon {
                sample_rate: caps.fps,
                ..FileDescriptorCommon::new(EC_UNCOMPRESSED_PICTURE_UL)
            },
            picture: PictureCommon {
                signal_standard: 1,
                frame_layout: 0,
                stored_width: caps.width,
                stored_height: caps.height,
                aspect_ratio: reduce_aspect(caps.width, caps.height),
                video_line_map: vec![0, 0],
                picture_essence_coding: None,
            },
            component_depth: 8,
            horizontal_subsampling: 2,
            vertical_subsampling: 2,
        }))
    }

    fn get_edit_rate(
        &self,
        _descriptor: &Descriptor,
        caps: &EssenceCaps,
        _first_buffer: Option<&Buffer>,
    ) -> Fraction {
        caps.fps
    }

    fn get_track_number_template(
        &self,
        _descriptor: &Descriptor,
        _caps: &EssenceCaps,
    ) -> u32 {
        0x1500_0500
    }

    fn write(
        &self,
        buffer: Option<Buffer>,
        _adapter: &mut Vec<u8>,
        _caps: &EssenceCaps,
        _flush: bool,
    ) -> Result<WriteResult, Error> {
        match buffer {
            Some(buf) => Ok(WriteResult::CompleteEditUnit {
                data: buf.data,
                more: false,
            }),
            None => Ok(WriteResult::Partial),
        }
    }
}

/// Frame-wrapped broadcast wave PCM; buffers are chopped into edit units
/// of one video frame's worth of samples.
pub struct PcmWriter;

impl PcmWriter {
    fn edit_rate_for(caps: &EssenceCaps, first_buffer: Option<&Buffer>) -> Fraction {
        if caps.fps.is_valid() {
            return caps.fps;
        }
        // Without a frame reference, derive the edit rate from the first
        // buffer's duration so one input buffer makes one edit unit.
        if let Some(duration) = first_buffer.and_then(|b| b.duration) {
            if duration.nanos() > 0 {
                return Fraction::new(
                    SECOND.nanos() as i32,
                    duration.nanos().min(i32::MAX as u64) as i32,
                );
            }
        }
        Fraction::new(25, 1)
    }

    fn edit_unit_bytes(&self, caps: &EssenceCaps) -> usize {
        let edit_rate = if caps.fps.is_valid() { caps.fps } else { Fraction::new(25, 1) };
        let samples = (caps.rate as u64 * edit_rate.d as u64 / edit_rate.n as u64) as usize;
        samples * caps.channels as usize * 2
    }
}

impl EssenceElementWriter for PcmWriter {
    fn name(&self) -> &'static str {
        "pcm audio"
    }

    fn handles(&self, caps: &EssenceCaps) -> bool {
        caps.media_type == "audio/x-raw"
    }

    fn data_definition(&self) -> Ul {
        DD_SOUND_UL
    }

    fn get_descriptor(&self, caps: &EssenceCaps) -> Result<Descriptor, Error> {
        if caps.rate == 0 || caps.channels == 0 {
            bail!("pcm audio needs rate and channels");
        }
        Ok(Descriptor::Sound(GenericSoundDescriptor {
            file: FileDescriptorCommon::new(EC_BWF_UL),
            audio_sampling_rate: Fraction::new(caps.rate as i32, 1),
            locked: true,
            channel_count: caps.channels,
            quantization_bits: 16,
            sound_essence_compression: None,
        }))
    }

    fn get_edit_rate(
        &self,
        _descriptor: &Descriptor,
        caps: &EssenceCaps,
        first_buffer: Option<&Buffer>,
    ) -> Fraction {
        Self::edit_rate_for(caps, first_buffer)
    }

    fn get_track_number_template(
        &self,
        _descriptor: &Descriptor,
        _caps: &EssenceCaps,
    ) -> u32 {
        0x1600_0100
    }

    fn write(
        &self,
        buffer: Option<Buffer>,
        adapter: &mut Vec<u8>,
        caps: &EssenceCaps,
        flush: bool,
    ) -> Result<WriteResult, Error> {
        if let Some(buf) = buffer {
            adapter.extend_from_slice(&buf.data);
        }

        let unit = self.edit_unit_bytes(caps);
        if unit > 0 && adapter.len() >= unit {
            let data = Bytes::copy_from_slice(&adapter[..unit]);
            adapter.drain(..unit);
            return Ok(WriteResult::CompleteEditUnit {
                data,
                more: adapter.len() >= unit || (flush && !adapter.is_empty()),
            });
        }

        if flush && !adapter.is_empty() {
            let data = Bytes::copy_from_slice(adapter);
            adapter.clear();
            return Ok(WriteResult::CompleteEditUnit { data, more: false });
        }

        Ok(WriteResult::Partial)
    }
}

fn reduce_aspect(width: u32, height: u32) -> Fraction {
    if width == 0 || height == 0 {
        return Fraction::new(4, 3);
    }
    let mut a = width;
    let mut b = height;
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    Fraction::new((width / a) as i32, (height / a) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_caps() -> EssenceCaps {
        EssenceCaps {
            media_type: "video/x-raw".to_string(),
            width: 1920,
            height: 1080,
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

    #[test]
    fn registry_resolves_by_caps() {
        init();
        assert_eq!(find(&video_caps()).unwrap().name(), "raw picture");
        assert_eq!(find(&audio_caps()).unwrap().name(), "pcm audio");
        assert!(find(&EssenceCaps {
            media_type: "application/x-subtitles".to_string(),
            ..EssenceCaps::default()
        })
        .is_none());
    }

    #[test]
    fn track_number_templates_have_zero_middle_bytes() {
        init();
        let caps = video_caps();
        let w = find(&caps).unwrap();
        let desc = w.get_descriptor(&caps).unwrap();
        let templ = w.get_track_number_template(&desc, &caps);
        assert_eq!(templ & 0x00ff_00ff, 0);
    }

    #[test]
    fn raw_picture_frame_is_one_edit_unit() {
        let caps = video_caps();
        let mut adapter = Vec::new();
        let buf = Buffer::new(Bytes::from_static(b"frame"));
        match RawPictureWriter.write(Some(buf), &mut adapter, &caps, false).unwrap() {
            WriteResult::CompleteEditUnit { data, more } => {
                assert_eq!(&data[..], b"frame");
                assert!(!more);
            }
            r => panic!("unexpected {:?}", r),
        }
    }

    #[test]
    fn pcm_buffers_accumulate_to_edit_units() {
        let caps = audio_caps();
        // 1920 samples * 2ch * 2 bytes per 25 fps edit unit.
        let unit = PcmWriter.edit_unit_bytes(&caps);
        assert_eq!(unit, 48000 / 25 * 4);

        let mut adapter = Vec::new();
        let half = vec![0u8; unit / 2];
        match PcmWriter
            .write(Some(Buffer::new(Bytes::from(half.clone()))), &mut adapter, &caps, false)
            .unwrap()
        {
            WriteResult::Partial => {}
            r => panic!("unexpected {:?}", r),
        }
        match PcmWriter
            .write(Some(Buffer::new(Bytes::from(half))), &mut adapter, &caps, false)
            .unwrap()
        {
            WriteResult::CompleteEditUnit { data, more } => {
                assert_eq!(data.len(), unit);
                assert!(!more);
            }
            r => panic!("unexpected {:?}", r),
        }
        assert!(adapter.is_empty());
    }

    #[test]
    fn pcm_flush_emits_short_unit() {
        let caps = audio_caps();
        let mut adapter = vec![0u8; 100];
        match PcmWriter.write(None, &mut adapter, &caps, true).unwrap() {
            WriteResult::CompleteEditUnit { data, more } => {
                assert_eq!(data.len(), 100);
                assert!(!more);
            }
            r => panic!("unexpected {:?}", r),
        }
    }
}
