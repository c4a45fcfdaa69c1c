//! Line 21 closed caption injection into SD video frames.

use failure::{bail, Error};
use log::{error, warn};
use media::{CaptionType, Frame};
use vbi::bit_slicer::SampleFormat;
use vbi::sampling::SamplingPar;
use vbi::sim;
use vbi::{Sliced, SLICED_CAPTION_525_F1, SLICED_CAPTION_525_F2};

use crate::cdp;
use crate::line21dec::{VideoFormat, VideoInfo};

/// Paints the first CEA-608-bearing caption meta of each frame into
/// lines 21/284.
#[derive(Debug)]
pub struct Line21Encoder {
    pub remove_caption_meta: bool,
    info: Option<VideoInfo>,
    sp: Option<SamplingPar>,
}

impl Line21Encoder {
    pub fn new(remove_caption_meta: bool) -> Line21Encoder {
        Line21Encoder {
            remove_caption_meta,
            info: None,
            sp: None,
        }
    }

    pub fn set_info(&mut self, info: VideoInfo) -> Result<(), Error> {
        let sample_format = match info.format {
            VideoFormat::I420 => SampleFormat::Y8,
            VideoFormat::Yuy2 => SampleFormat::Yuyv,
            VideoFormat::Yvyu => SampleFormat::Yvyu,
            VideoFormat::Uyvy => SampleFormat::Uyvy,
            VideoFormat::Vyuy => SampleFormat::Vyuy,
            VideoFormat::V210 => bail!("v210 output is not supported"),
        };

        self.sp = Some(SamplingPar {
            sample_format,
            // Blank / black / white levels fit for NTSC.
            scanning: 525,
            // BT.601 luma rate.
            sampling_rate: 13_500_000,
            bytes_per_line: info.stride,
            // Horizontal offset of the VBI image.
            offset: 122,
            start: [21, 284],
            count: [1, 1],
            interlaced: false,
            synchronous: true,
        });
        self.info = Some(info);
        Ok(())
    }

    /// Encodes captions into `pixels` and optionally removes the encoded
    /// meta from the frame.
    pub fn encode(&mut self, frame: &mut Frame, pixels: &mut [u8]) -> Result<(), Error> {
        let info = match self.info {
            Some(i) => i,
            None => bail!("encode before set_info"),
        };
        let sp = self.sp.as_ref().unwrap();

        let mut sliced = [
            Sliced::new(SLICED_CAPTION_525_F1, sp.start[0]),
            Sliced::new(SLICED_CAPTION_525_F2, sp.start[1]),
        ];
        sliced[0].data[0] = 0x80;
        sliced[0].data[1] = 0x80;
        sliced[1].data[0] = 0x80;
        sliced[1].data[1] = 0x80;

        // Loop over the caption metas until the first one carrying
        // CEA-608 data.
        let mut encoded_meta = None;
        for (idx, meta) in frame.captions.iter().enumerate() {
            match meta.caption_type {
                CaptionType::Cea708Cdp => {
                    let cc_data = match cdp::parse(&meta.data) {
                        Ok((parsed, _)) => parsed.cc_data,
                        Err(e) => {
                            warn!("unparseable CDP meta: {}", e);
                            continue;
                        }
                    };
                    let cc_data = compact_cc_data(&cc_data);
                    let (field1, field2) = cc_data_extract_cea608(&cc_data)?;

                    if field1.len() >= 2 {
                        sliced[0].data[0] = field1[0];
                        sliced[0].data[1] = field1[1];
                    }
                    if field2.len() >= 2 {
                        sliced[1].data[0] = field2[0];
                        sliced[1].data[1] = field2[1];
                    }
                    encoded_meta = Some(idx);
                    break;
                }
                CaptionType::Cea608S3341a => {
                    let n = meta.data.len();
                    if n % 3 != 0 {
                        error!("invalid S334-1A CEA608 buffer size {}", n);
                        bail!("invalid S334-1A CEA608 buffer size {}", n);
                    }
                    let n = n / 3;
                    if n >= 3 {
                        error!("too many S334-1A CEA608 triplets {}", n);
                        bail!("too many S334-1A CEA608 triplets {}", n);
                    }
                    for triplet in meta.data.chunks_exact(3) {
                        let field = if triplet[0] & 0x80 != 0 { 0 } else { 1 };
                        sliced[field].data[0] = triplet[1];
                        sliced[field].data[1] = triplet[2];
                    }
                    encoded_meta = Some(idx);
                    break;
                }
                _ => continue,
            }
        }

        if let Some(idx) = encoded_meta {
            if self.remove_caption_meta {
                frame.captions.remove(idx);
            }
        }

        // With standard NTSC resolution field 1 goes at line 21; reduced
        // heights carry 3 VBI lines at the top and field 1 goes at line 1.
        let offset = if info.height == 525 { 21 } else { 1 };
        let stride = info.stride as usize;
        let start = offset * stride;
        let end = start + 2 * stride;
        if end > pixels.len() {
            bail!("frame too short for VBI lines at offset {}", offset);
        }

        sim::raw_video_image(&mut pixels[start..end], sp, 0x0000_00ff, 0, &sliced)?;

        Ok(())
    }
}

/// Strips invalid triplets from a cc_data stream, keeping 608 ahead of
/// any CCP data. Empty result on 608-after-708 ordering violations.
fn compact_cc_data(cc_data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(cc_data.len());
    let mut started_ccp = false;
    let len = cc_data.len() - cc_data.len() % 3;

    for triplet in cc_data[..len].chunks_exact(3) {
        let cc_valid = triplet[0] & 0x04 == 0x04;
        let cc_type = triplet[0] & 0x03;

        if !started_ccp && (cc_type == 0x00 || cc_type == 0x01) {
            if cc_valid {
                out.extend_from_slice(triplet);
            }
            continue;
        }

        if cc_type & 0x02 != 0 {
            started_ccp = true;
        }
        if !cc_valid {
            continue;
        }
        if cc_type == 0x00 || cc_type == 0x01 {
            warn!("invalid cc_data: cea608 bytes after cea708");
            return Vec::new();
        }
        out.extend_from_slice(triplet);
    }

    out
}

/// Pulls the CEA-608 pairs of both fields off the front of a cc_data
/// stream.
fn cc_data_extract_cea608(cc_data: &[u8]) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let mut field1 = Vec::new();
    let mut field2 = Vec::new();
    let len = cc_data.len() - cc_data.len() % 3;

    for triplet in cc_data[..len].chunks_exact(3) {
        let cc_valid = triplet[0] & 0x04 == 0x04;
        let cc_type = triplet[0] & 0x03;

        match cc_type {
            0x00 => {
                if !cc_valid {
                    continue;
                }
                if field1.len() + 2 > crate::MAX_CEA608_LEN {
                    bail!("too many cea608 input bytes for field 1");
                }
                field1.extend_from_slice(&triplet[1..3]);
            }
            0x01 => {
                if !cc_valid {
                    continue;
                }
                if field2.len() + 2 > crate::MAX_CEA608_LEN {
                    bail!("too many cea608 input bytes for field 2");
                }
                field2.extend_from_slice(&triplet[1..3]);
            }
            // All cea608 packets sit at the beginning of a cc_data.
            _ => break,
        }
    }

    Ok((field1, field2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use media::Buffer;
    use vbi::raw_decoder::decoder_for_services;
    use vbi::SLICED_CAPTION_525;

    fn ntsc_info() -> VideoInfo {
        VideoInfo {
            format: VideoFormat::I420,
            width: 720,
            height: 525,
            stride: 720,
            interlaced: true,
        }
    }

    fn decode_lines(pixels: &[u8]) -> Vec<Sliced> {
        let sp = SamplingPar {
            sample_format: SampleFormat::Y8,
            scanning: 525,
            sampling_rate: 13_500_000,
            bytes_per_line: 720,
            offset: 122,
            start: [21, 284],
            count: [1, 1],
            interlaced: true,
            synchronous: true,
        };
        let (mut rd, _) = decoder_for_services(sp, SLICED_CAPTION_525, 0).unwrap();
        let mut sliced = Vec::new();
        rd.decode(&pixels[21 * 720..23 * 720], &mut sliced, 2);
        sliced
    }

    /// The encoded signal decodes back to the S334-1A meta's pairs.
    #[test]
    fn s334_meta_round_trips_through_the_signal() {
        let mut enc = Line21Encoder::new(false);
        enc.set_info(ntsc_info()).unwrap();

        let mut frame = Frame::new(Buffer::new(Bytes::new()));
        frame.add_caption(
            CaptionType::Cea608S3341a,
            Bytes::from_static(&[0x80, 0x94, 0x2c, 0x00, 0x15, 0x2c]),
        );

        let mut pixels = vec![16u8; 720 * 525];
        enc.encode(&mut frame, &mut pixels).unwrap();
        assert_eq!(frame.captions.len(), 1);

        let sliced = decode_lines(&pixels);
        assert_eq!(sliced.len(), 2);
        assert_eq!(&sliced[0].data[..2], &[0x94, 0x2c]);
        assert_eq!(&sliced[1].data[..2], &[0x15, 0x2c]);
    }

    #[test]
    fn cdp_meta_is_extracted_and_removed() {
        let mut enc = Line21Encoder::new(true);
        enc.set_info(ntsc_info()).unwrap();

        let entry = crate::tables::cdp_fps_entry_from_fps(30000, 1001);
        let cdp = cdp::to_cdp(
            cdp::CdpMode::CC_DATA,
            0,
            &[0xfc, 0x91, 0x52, 0xfd, 0x15, 0x2c],
            None,
            entry,
        );

        let mut frame = Frame::new(Buffer::new(Bytes::new()));
        frame.add_caption(CaptionType::Cea708Cdp, cdp);

        let mut pixels = vec![16u8; 720 * 525];
        enc.encode(&mut frame, &mut pixels).unwrap();
        assert!(frame.captions.is_empty());

        let sliced = decode_lines(&pixels);
        assert_eq!(sliced.len(), 2);
        assert_eq!(&sliced[0].data[..2], &[0x91, 0x52]);
        assert_eq!(&sliced[1].data[..2], &[0x15, 0x2c]);
    }

    /// Without any 608-bearing meta the encoder paints null pairs.
    #[test]
    fn no_meta_paints_nulls() {
        let mut enc = Line21Encoder::new(false);
        enc.set_info(ntsc_info()).unwrap();

        let mut frame = Frame::new(Buffer::new(Bytes::new()));
        let mut pixels = vec![16u8; 720 * 525];
        enc.encode(&mut frame, &mut pixels).unwrap();

        let sliced = decode_lines(&pixels);
        assert_eq!(sliced.len(), 2);
        assert_eq!(&sliced[0].data[..2], &[0x80, 0x80]);
        assert_eq!(&sliced[1].data[..2], &[0x80, 0x80]);
    }
}
