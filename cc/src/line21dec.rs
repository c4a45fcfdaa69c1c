//! Line 21 closed caption recovery from SD video frames.

use failure::{bail, Error};
use log::{debug, trace};
use media::{CaptionType, Frame};
use vbi::bit_slicer::SampleFormat;
use vbi::raw_decoder::RawDecoder;
use vbi::sampling::SamplingPar;
use vbi::{Sliced, SLICED_CAPTION_525};

/// How a newly detected caption interacts with metas already on the frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Line21DecoderMode {
    /// Add a new meta on top of other CC metas, if any.
    Add,
    /// Ignore detected CC if a CC meta was already present.
    Drop,
    /// Replace existing CC metas.
    Replace,
}

/// Pixel layouts the decoder reads directly. Everything else has to be
/// converted by the caller; v210 gets its luma unpacked internally.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VideoFormat {
    I420,
    Yuy2,
    Yvyu,
    Uyvy,
    Vyuy,
    V210,
}

#[derive(Copy, Clone, Debug)]
pub struct VideoInfo {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per video line of the first (luma) plane.
    pub stride: u32,
    pub interlaced: bool,
}

/// Extracts CEA-608 byte pairs from the VBI region of SD frames and
/// attaches them as an S334-1A caption meta.
#[derive(Debug)]
pub struct Line21Decoder {
    pub ntsc_only: bool,
    pub mode: Line21DecoderMode,
    max_line_probes: usize,
    line21_offset: Option<usize>,
    info: Option<VideoInfo>,
    compatible_format: bool,
    convert_v210: bool,
    decoder: Option<RawDecoder>,
}

impl Line21Decoder {
    pub fn new(ntsc_only: bool, mode: Line21DecoderMode) -> Line21Decoder {
        Line21Decoder {
            ntsc_only,
            mode,
            max_line_probes: 40,
            line21_offset: None,
            info: None,
            compatible_format: false,
            convert_v210: false,
            decoder: None,
        }
    }

    /// Configures for a video format. Incompatible formats are accepted
    /// but every frame passes through untouched.
    pub fn set_info(&mut self, info: VideoInfo) -> Result<(), Error> {
        self.info = Some(info);
        self.compatible_format = false;
        self.convert_v210 = false;
        self.decoder = None;
        // Scan the next frame from the first line.
        self.line21_offset = None;

        if !info.interlaced {
            debug!("only interlaced formats are supported");
            return Ok(());
        }
        if info.width != 720 {
            debug!("only 720 pixel wide formats are supported");
            return Ok(());
        }
        if self.ntsc_only && info.height != 525 && info.height != 486 {
            debug!("NTSC-only, only 525 or 486 pixel high formats are supported");
            return Ok(());
        }
        if info.height < 200 {
            return Ok(());
        }

        let (sample_format, stride) = match info.format {
            VideoFormat::I420 => (SampleFormat::Y8, info.stride),
            VideoFormat::Yuy2 => (SampleFormat::Yuyv, info.stride),
            VideoFormat::Yvyu => (SampleFormat::Yvyu, info.stride),
            VideoFormat::Uyvy => (SampleFormat::Uyvy, info.stride),
            VideoFormat::Vyuy => (SampleFormat::Vyuy, info.stride),
            VideoFormat::V210 => {
                // The v210 luma is unpacked to 8-bit first.
                self.convert_v210 = true;
                (SampleFormat::Y8, info.width)
            }
        };

        let sp = SamplingPar {
            sample_format,
            // Blank / black / white levels fit for NTSC; no actual
            // relation with the height of the video.
            scanning: 525,
            // BT.601 luma rate.
            sampling_rate: 13_500_000,
            bytes_per_line: stride,
            // Sampling starts 9.7 us from the front edge of the
            // horizontal sync pulse.
            offset: (9.7e-6 * 13.5e6) as u32,
            // The decoder is fed a window of two adjacent lines and told
            // they are lines 21 and 284; the probe loop below supplies
            // the window offset.
            start: [21, 284],
            count: [1, 1],
            interlaced: true,
            synchronous: true,
        };

        let mut decoder = RawDecoder::new(sp)?;
        if decoder.add_services(SLICED_CAPTION_525, 0) == 0 {
            bail!("caption service rejected by raw decoder");
        }
        self.decoder = Some(decoder);
        self.compatible_format = true;
        debug!("compatible format {:?}", info);
        Ok(())
    }

    fn line_window(&mut self, pixels: &[u8], line: usize) -> Vec<u8> {
        let info = self.info.as_ref().unwrap();
        let stride = info.stride as usize;
        if !self.convert_v210 {
            return pixels[line * stride..(line + 2) * stride].to_vec();
        }

        let width = info.width as usize;
        let mut out = vec![0u8; 2 * width];
        for l in 0..2 {
            let v210 = &pixels[(line + l) * stride..];
            convert_line_v210_luma(v210, &mut out[l * width..(l + 1) * width]);
        }
        out
    }

    /// Scans the frame for a (field 1, field 2) caption line pair and, on
    /// success, attaches one S334-1A meta. Returns whether CC was found.
    pub fn scan(&mut self, frame: &mut Frame, pixels: &[u8]) -> Result<bool, Error> {
        if !self.compatible_format {
            return Ok(false);
        }

        if self.mode == Line21DecoderMode::Drop && !frame.captions.is_empty() {
            debug!("mode drop and buffer had CC meta, ignoring");
            return Ok(false);
        }

        let info = *self.info.as_ref().unwrap();
        let height = info.height as usize;
        let stride = info.stride as usize;
        debug!("starting probing, max_line_probes: {}", self.max_line_probes);

        let mut sliced: Vec<Sliced> = Vec::new();
        let mut found = None;
        let mut i = self.line21_offset.unwrap_or(0);
        let mut wrapped = false;

        while i < self.max_line_probes && i + 1 < height {
            if (i + 2) * stride > pixels.len() {
                break;
            }
            sliced.clear();
            let window = self.line_window(pixels, i);
            let n = self.decoder.as_mut().unwrap().decode(&window, &mut sliced, 2);
            trace!("i: {} n_lines: {}", i, n);
            if n == 2 {
                debug!("found 2 CC lines at offset {}", i);
                self.line21_offset = Some(i);
                found = Some(i);
                break;
            } else if Some(i) == self.line21_offset && !wrapped {
                // The previously probed offset went dark; start searching
                // again from the beginning.
                i = 0;
                wrapped = true;
                self.line21_offset = None;
                continue;
            }
            i += 1;
        }

        let i = match found {
            Some(i) => i,
            None => {
                self.line21_offset = None;
                return Ok(false);
            }
        };

        let (base_line1, base_line2): (usize, usize) = match info.height {
            525 => (9, 272),
            625 => (5, 318),
            _ => (0, 0),
        };

        if self.mode == Line21DecoderMode::Replace {
            debug!("mode replace and new CC meta, removing existing CC meta");
            frame.captions.clear();
        }

        let line_offset = |base: usize| -> u8 {
            if base < i { (i - base) as u8 & 0x1f } else { 0 }
        };
        let mut ccdata = [0x80u8, 0x80, 0x80, 0x00, 0x80, 0x80];
        ccdata[0] |= line_offset(base_line1);
        ccdata[1] = sliced[0].data[0];
        ccdata[2] = sliced[0].data[1];
        ccdata[3] |= line_offset(base_line2);
        ccdata[4] = sliced[1].data[0];
        ccdata[5] = sliced[1].data[1];

        trace!(
            "got CC 0x{:02x} 0x{:02x} / 0x{:02x} 0x{:02x}",
            ccdata[1],
            ccdata[2],
            ccdata[4],
            ccdata[5]
        );

        frame.add_caption(
            CaptionType::Cea608S3341a,
            bytes::Bytes::copy_from_slice(&ccdata),
        );

        Ok(true)
    }
}

/// Unpacks the 10-bit luma of one v210 line to 8 bits.
fn convert_line_v210_luma(orig: &[u8], dest: &mut [u8]) {
    let width = dest.len();
    let mut y = 0;
    let mut i = 0;
    while i + 5 < width {
        let base = (i / 6) * 16;
        let a = u32::from_le_bytes([orig[base], orig[base + 1], orig[base + 2], orig[base + 3]]);
        let b = u32::from_le_bytes([orig[base + 4], orig[base + 5], orig[base + 6], orig[base + 7]]);
        let c = u32::from_le_bytes([orig[base + 8], orig[base + 9], orig[base + 10], orig[base + 11]]);
        let d = u32::from_le_bytes([orig[base + 12], orig[base + 13], orig[base + 14], orig[base + 15]]);

        dest[y] = (a >> 12) as u8;
        dest[y + 1] = (b >> 2) as u8;
        dest[y + 2] = (b >> 22) as u8;
        dest[y + 3] = (c >> 12) as u8;
        dest[y + 4] = (d >> 2) as u8;
        dest[y + 5] = (d >> 22) as u8;
        y += 6;
        i += 6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use media::Buffer;
    use vbi::sim;
    use vbi::{SLICED_CAPTION_525_F1, SLICED_CAPTION_525_F2};

    fn ntsc_info() -> VideoInfo {
        VideoInfo {
            format: VideoFormat::I420,
            width: 720,
            height: 525,
            stride: 720,
            interlaced: true,
        }
    }

    /// Paints a caption signal into lines 21/22 of a black NTSC frame.
    fn ntsc_frame_with_cc(f1: (u8, u8), f2: (u8, u8)) -> Vec<u8> {
        let mut pixels = vec![16u8; 720 * 525];

        let sp = SamplingPar {
            sample_format: SampleFormat::Y8,
            scanning: 525,
            sampling_rate: 13_500_000,
            bytes_per_line: 720,
            offset: (9.7e-6 * 13.5e6) as u32,
            start: [21, 284],
            count: [1, 1],
            interlaced: false,
            synchronous: true,
        };

        let mut s1 = Sliced::new(SLICED_CAPTION_525_F1, 21);
        s1.data[0] = f1.0;
        s1.data[1] = f1.1;
        let mut s2 = Sliced::new(SLICED_CAPTION_525_F2, 284);
        s2.data[0] = f2.0;
        s2.data[1] = f2.1;

        // Captured frames start at the top of the blanking interval;
        // line 21 lands at frame row 9.
        let offset = 9 * 720;
        sim::raw_video_image(
            &mut pixels[offset..offset + 2 * 720],
            &sp,
            0x0000_00ff,
            0,
            &[s1, s2],
        )
        .unwrap();
        pixels
    }

    /// An NTSC frame with `91 52` on line 21 and `00 00` on line 284
    /// yields one S334-1A meta with the second triplet null.
    #[test]
    fn add_mode_attaches_meta() {
        let mut dec = Line21Decoder::new(true, Line21DecoderMode::Add);
        dec.set_info(ntsc_info()).unwrap();

        let pixels = ntsc_frame_with_cc((0x91, 0x52), (0x00, 0x00));
        let mut frame = Frame::new(Buffer::new(Bytes::new()));
        assert!(dec.scan(&mut frame, &pixels).unwrap());
        assert_eq!(frame.captions.len(), 1);
        assert_eq!(frame.captions[0].caption_type, CaptionType::Cea608S3341a);
        assert_eq!(&frame.captions[0].data[..], &[0x80, 0x91, 0x52, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn drop_mode_keeps_existing_meta() {
        let mut dec = Line21Decoder::new(true, Line21DecoderMode::Drop);
        dec.set_info(ntsc_info()).unwrap();

        let pixels = ntsc_frame_with_cc((0x91, 0x52), (0x00, 0x00));
        let mut frame = Frame::new(Buffer::new(Bytes::new()));
        frame.add_caption(CaptionType::Cea608Raw, Bytes::from_static(&[0x94, 0x2c]));
        assert!(!dec.scan(&mut frame, &pixels).unwrap());
        assert_eq!(frame.captions.len(), 1);
        assert_eq!(frame.captions[0].caption_type, CaptionType::Cea608Raw);
    }

    #[test]
    fn replace_mode_replaces_meta() {
        let mut dec = Line21Decoder::new(true, Line21DecoderMode::Replace);
        dec.set_info(ntsc_info()).unwrap();

        let pixels = ntsc_frame_with_cc((0x91, 0x52), (0x00, 0x00));
        let mut frame = Frame::new(Buffer::new(Bytes::new()));
        frame.add_caption(CaptionType::Cea608Raw, Bytes::from_static(&[0x94, 0x2c]));
        assert!(dec.scan(&mut frame, &pixels).unwrap());
        assert_eq!(frame.captions.len(), 1);
        assert_eq!(frame.captions[0].caption_type, CaptionType::Cea608S3341a);
    }

    #[test]
    fn incompatible_format_passes_through() {
        let mut dec = Line21Decoder::new(true, Line21DecoderMode::Add);
        dec.set_info(VideoInfo {
            width: 1920,
            height: 1080,
            stride: 1920,
            ..ntsc_info()
        })
        .unwrap();
        let mut frame = Frame::new(Buffer::new(Bytes::new()));
        assert!(!dec.scan(&mut frame, &[0u8; 16]).unwrap());
    }
}
