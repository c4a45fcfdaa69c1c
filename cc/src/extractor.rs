//! Splits caption metas off a video stream onto a secondary output.

use failure::{bail, Error};
use log::{debug, trace};
use media::{Buffer, CaptionType, ClockTime, Frame};

/// One caption-side event produced while handling a frame.
#[derive(Debug)]
pub enum CaptionOutput {
    Buffer(Buffer),
    /// No caption meta covered this stretch of the stream.
    Gap { pts: ClockTime, duration: Option<ClockTime> },
}

/// See [CcExtractor::push_frame].
#[derive(Debug, Default)]
pub struct CcExtractor {
    /// Strip the extracted metas from the forwarded video.
    pub remove_caption_meta: bool,
    caption_type: Option<CaptionType>,
    have_caption_pad: bool,
}

impl CcExtractor {
    pub fn new(remove_caption_meta: bool) -> CcExtractor {
        CcExtractor {
            remove_caption_meta,
            ..CcExtractor::default()
        }
    }

    /// The caption type currently flowing on the caption side.
    pub fn caption_type(&self) -> Option<CaptionType> {
        self.caption_type
    }

    /// Handles one video frame: emits one caption buffer per caption meta
    /// (preserving the video buffer's timestamps, flags, and timecode
    /// meta), or a gap when a caption pad exists but the frame carries no
    /// meta. Returns the forwarded frame and the caption-side outputs.
    pub fn push_frame(&mut self, mut frame: Frame) -> Result<(Frame, Vec<CaptionOutput>), Error> {
        let mut outputs = Vec::new();

        for meta in &frame.captions {
            if !self.have_caption_pad {
                debug!("creating caption pad for {:?}", meta.caption_type);
                self.have_caption_pad = true;
                self.caption_type = Some(meta.caption_type);
            } else if Some(meta.caption_type) != self.caption_type {
                // The caption side renegotiates to the new type.
                debug!(
                    "caption type changed from {:?} to {:?}",
                    self.caption_type, meta.caption_type
                );
                self.caption_type = Some(meta.caption_type);
            }

            trace!("extracting {} caption bytes", meta.data.len());
            let mut out = Buffer::new(meta.data.clone());
            out.pts = frame.buffer.pts;
            out.dts = frame.buffer.dts;
            out.duration = frame.buffer.duration;
            out.flags = frame.buffer.flags;
            out.timecode = frame.buffer.timecode;
            outputs.push(CaptionOutput::Buffer(out));
        }

        if outputs.is_empty() && self.have_caption_pad {
            match frame.buffer.pts {
                Some(pts) => outputs.push(CaptionOutput::Gap {
                    pts,
                    duration: frame.buffer.duration,
                }),
                None => bail!("frame without PTS and without caption meta"),
            }
        }

        if self.remove_caption_meta {
            frame.captions.clear();
        }

        Ok((frame, outputs))
    }

    /// Stream restart: forget the caption pad.
    pub fn reset(&mut self) {
        self.caption_type = None;
        self.have_caption_pad = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use media::{BufferFlags, Fraction, Timecode, SECOND};

    fn frame_with_captions(pts: u64, captions: &[(CaptionType, &[u8])]) -> Frame {
        let mut frame = Frame::new(
            Buffer::new(Bytes::from_static(b"video"))
                .with_pts(ClockTime(pts))
                .with_duration(SECOND.scale(1001, 30000)),
        );
        for (t, d) in captions {
            frame.add_caption(*t, Bytes::copy_from_slice(d));
        }
        frame
    }

    #[test]
    fn extracts_one_buffer_per_meta() {
        let mut x = CcExtractor::new(false);
        let mut frame = frame_with_captions(
            0,
            &[
                (CaptionType::Cea608S3341a, &[0x80, 0x94, 0x2c]),
                (CaptionType::Cea608S3341a, &[0x80, 0x94, 0x2d]),
            ],
        );
        frame.buffer.flags.insert(BufferFlags::DISCONT);
        frame.buffer.timecode =
            Some(Timecode::new(Fraction::new(30000, 1001), true, 0, 0, 1, 0, 1));

        let (video, outputs) = x.push_frame(frame).unwrap();
        // Meta stays on the video by default.
        assert_eq!(video.captions.len(), 2);
        assert_eq!(outputs.len(), 2);
        match &outputs[0] {
            CaptionOutput::Buffer(b) => {
                assert_eq!(&b.data[..], &[0x80, 0x94, 0x2c]);
                assert_eq!(b.pts, Some(ClockTime(0)));
                assert!(b.flags.contains(BufferFlags::DISCONT));
                assert!(b.timecode.is_some());
            }
            o => panic!("expected buffer, got {:?}", o),
        }
    }

    #[test]
    fn gap_when_no_meta() {
        let mut x = CcExtractor::new(false);
        let (_, outputs) = x
            .push_frame(frame_with_captions(
                0,
                &[(CaptionType::Cea608Raw, &[0x94, 0x2c])],
            ))
            .unwrap();
        assert_eq!(outputs.len(), 1);

        // Next frame has no meta; the caption side gets a gap instead.
        let (_, outputs) = x.push_frame(frame_with_captions(33_366_666, &[])).unwrap();
        match &outputs[0] {
            CaptionOutput::Gap { pts, .. } => assert_eq!(*pts, ClockTime(33_366_666)),
            o => panic!("expected gap, got {:?}", o),
        }
    }

    #[test]
    fn no_gap_before_first_meta() {
        let mut x = CcExtractor::new(false);
        let (_, outputs) = x.push_frame(frame_with_captions(0, &[])).unwrap();
        assert!(outputs.is_empty());
    }

    #[test]
    fn remove_caption_meta_strips_video() {
        let mut x = CcExtractor::new(true);
        let (video, outputs) = x
            .push_frame(frame_with_captions(
                0,
                &[(CaptionType::Cea708Cdp, &[0x96, 0x69])],
            ))
            .unwrap();
        assert!(video.captions.is_empty());
        assert_eq!(outputs.len(), 1);
    }
}
