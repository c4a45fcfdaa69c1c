//! Attaches caption buffers to video frames as per-frame metadata.
//!
//! The host delivers video frames and caption buffers with their running
//! times already computed into `pts`. Caption buffers must arrive before
//! the video frame that follows them; in schedule mode underruns are
//! padded with canonical null captions so every output frame carries
//! exactly one caption meta per configured field.

use std::collections::VecDeque;

use bytes::Bytes;
use failure::{bail, Error};
use log::{debug, trace, warn};
use media::{
    Buffer, BufferFlags, CaptionMeta, CaptionType, ClockTime, Fraction, Frame, Timecode,
    MSECOND, SECOND,
};

use crate::cdp::{self, CdpMode};
use crate::tables::{cdp_fps_entry_from_fps, CdpFpsEntry, NULL_FPS_ENTRY};

pub const DEFAULT_MAX_SCHEDULED: usize = 30;

#[derive(Debug)]
struct ScheduledCaption {
    buffer: Buffer,
    running_time: Option<ClockTime>,
}

/// See the module docs.
#[derive(Debug)]
pub struct CcCombiner {
    schedule: bool,
    max_scheduled: usize,

    caption_type: Option<CaptionType>,
    video_fps: Fraction,
    progressive: bool,
    cdp_fps_entry: &'static CdpFpsEntry,

    cdp_hdr_sequence_cntr: u16,

    /// Pending caption buffers, in arrival order.
    caption_queue: VecDeque<Buffer>,
    caption_eos: bool,

    /// Scheduled captions per field.
    scheduled: [VecDeque<ScheduledCaption>; 2],

    current_video: Option<Frame>,
    current_video_running_time: Option<ClockTime>,
    current_video_running_time_end: Option<ClockTime>,
    previous_video_running_time_end: Option<ClockTime>,

    /// Captions collected for the frame being finished.
    current_frame_captions: Vec<CaptionMeta>,

    /// QoS: captions dropped because the scheduled queue ran too long.
    pub scheduled_drops: u64,
}

impl Default for CcCombiner {
    fn default() -> Self {
        CcCombiner::new(true, DEFAULT_MAX_SCHEDULED)
    }
}

impl CcCombiner {
    pub fn new(schedule: bool, max_scheduled: usize) -> CcCombiner {
        CcCombiner {
            schedule,
            max_scheduled,
            caption_type: None,
            video_fps: Fraction::new(0, 0),
            progressive: true,
            cdp_fps_entry: &NULL_FPS_ENTRY,
            cdp_hdr_sequence_cntr: 0,
            caption_queue: VecDeque::new(),
            caption_eos: false,
            scheduled: [VecDeque::new(), VecDeque::new()],
            current_video: None,
            current_video_running_time: None,
            current_video_running_time_end: None,
            previous_video_running_time_end: None,
            current_frame_captions: Vec::new(),
            scheduled_drops: 0,
        }
    }

    /// Video caps: framerate and interlacing.
    pub fn set_video_info(&mut self, fps: Fraction, progressive: bool) {
        self.video_fps = fps;
        self.progressive = progressive;
        self.cdp_fps_entry = cdp_fps_entry_from_fps(fps.n as u32, fps.d as u32);
    }

    /// Caption caps. The caption type cannot change mid-stream.
    pub fn set_caption_type(&mut self, caption_type: CaptionType) -> Result<(), Error> {
        if let Some(t) = self.caption_type {
            if t != caption_type {
                bail!("changing caption type is not allowed");
            }
        }
        self.caption_type = Some(caption_type);
        Ok(())
    }

    /// Queues a caption buffer. Its `pts` must be a valid running time.
    pub fn push_caption(&mut self, buffer: Buffer) -> Result<(), Error> {
        if self.caption_type.is_none() {
            bail!("caption buffer before caption caps");
        }
        if buffer.pts.is_none() {
            bail!("caption buffer without PTS");
        }
        self.caption_queue.push_back(buffer);
        Ok(())
    }

    /// Marks the caption side finished; the combiner degrades to padding
    /// with nulls forever.
    pub fn caption_eos(&mut self) {
        self.caption_eos = true;
    }

    /// Queues a video frame and emits every frame whose captions are now
    /// determined, in input order.
    pub fn push_video(&mut self, frame: Frame) -> Result<Vec<Frame>, Error> {
        let video_start = match frame.buffer.pts {
            Some(t) => t,
            None => bail!("video buffer without PTS"),
        };

        let mut out = Vec::new();

        if self.current_video.is_some() && self.current_video_running_time_end.is_none() {
            // The queued frame was missing its end time; the new frame's
            // start supplies it.
            self.current_video_running_time_end = Some(video_start);
            if let Some(finished) = self.collect_captions()? {
                out.push(finished);
            }
        }

        let end = frame
            .buffer
            .duration
            .map(|d| video_start + d)
            .or_else(|| {
                if self.video_fps.is_valid() {
                    Some(
                        video_start
                            + SECOND
                                .scale(self.video_fps.d as u64, self.video_fps.n as u64),
                    )
                } else {
                    None
                }
            });

        trace!("queued video buffer {} - {:?}", video_start, end);
        self.current_video = Some(frame);
        self.current_video_running_time = Some(video_start);
        self.current_video_running_time_end = end;

        if end.is_some() {
            if let Some(finished) = self.collect_captions()? {
                out.push(finished);
            }
        }

        Ok(out)
    }

    /// Video EOS: finishes the pending frame, assuming it lasted 50 ms.
    pub fn finish(&mut self) -> Result<Option<Frame>, Error> {
        if self.current_video.is_none() {
            return Ok(None);
        }
        if self.current_video_running_time_end.is_none() {
            self.current_video_running_time_end =
                self.current_video_running_time.map(|t| t + MSECOND * 50);
        }
        self.collect_captions()
    }

    /// Flush-start: drops all queued data.
    pub fn flush(&mut self) {
        self.current_video = None;
        self.current_video_running_time = None;
        self.current_video_running_time_end = None;
        self.previous_video_running_time_end = None;
        self.current_frame_captions.clear();
        self.caption_queue.clear();
        self.scheduled[0].clear();
        self.scheduled[1].clear();
        self.cdp_hdr_sequence_cntr = 0;
    }

    fn collect_captions(&mut self) -> Result<Option<Frame>, Error> {
        let mut frame = self.current_video.take().expect("no queued video frame");
        let end = self.current_video_running_time_end.expect("no end time");
        let tc = frame.buffer.timecode;

        if self.caption_type.is_none() {
            // No caption pad; pass the video through.
            self.advance_past(end);
            return Ok(Some(frame));
        }

        debug!("collecting captions for video buffer ending at {}", end);

        while let Some(caption_buf) = self.caption_queue.front() {
            let caption_time = caption_buf.pts.expect("caption buffer without PTS");

            if caption_buf.data.is_empty()
                && caption_buf.flags.contains(BufferFlags::GAP)
            {
                // Gaps are consumed once their end point is behind the
                // current video frame; a gap without duration cannot be
                // placed.
                let duration = match caption_buf.duration {
                    Some(d) => d,
                    None => bail!("gap buffer without a duration"),
                };
                if caption_time + duration < end {
                    self.caption_queue.pop_front();
                    continue;
                }
                break;
            }

            // Collected all caption buffers for this video buffer.
            if caption_time >= end {
                break;
            }

            if !self.schedule {
                let late = match self.previous_video_running_time_end {
                    Some(prev_end) => caption_time < prev_end,
                    None => Some(caption_time) < self.current_video_running_time,
                };
                if late {
                    warn!("caption buffer before end of last video frame, dropping");
                    self.caption_queue.pop_front();
                    continue;
                }
            }

            let caption_buf = self.caption_queue.pop_front().unwrap();
            trace!("collecting caption buffer at {}", caption_time);

            if self.schedule {
                self.schedule_caption(&caption_buf, tc.as_ref());
            } else {
                self.current_frame_captions.push(CaptionMeta {
                    caption_type: self.caption_type.unwrap(),
                    data: caption_buf.data,
                });
            }
        }

        if self.schedule {
            debug_assert!(self.current_frame_captions.is_empty());
            let drain = self.caption_eos;
            let flags = frame.buffer.flags;

            match self.caption_type.unwrap() {
                CaptionType::Cea708Cdp => {
                    // Only relevant in alternate and mixed interlacing.
                    if flags.contains(BufferFlags::INTERLACED) {
                        if !flags.contains(BufferFlags::BOTTOM_FIELD) {
                            self.dequeue_one_field(tc.as_ref(), 0, drain);
                        }
                    } else {
                        self.dequeue_one_field(tc.as_ref(), 0, drain);
                    }
                }
                CaptionType::Cea708CcData | CaptionType::Cea608S3341a => {
                    if self.progressive {
                        self.dequeue_one_field(tc.as_ref(), 0, drain);
                    } else if flags.contains(BufferFlags::INTERLACED)
                        && flags.contains(BufferFlags::ONEFIELD)
                    {
                        if flags.contains(BufferFlags::TOP_FIELD) {
                            self.dequeue_one_field(tc.as_ref(), 0, drain);
                        } else {
                            self.dequeue_one_field(tc.as_ref(), 1, drain);
                        }
                    } else {
                        self.dequeue_both_fields(tc.as_ref(), drain);
                    }
                }
                CaptionType::Cea608Raw => {
                    if self.progressive {
                        self.dequeue_one_field(tc.as_ref(), 0, drain);
                    } else if flags.contains(BufferFlags::INTERLACED) {
                        if !flags.contains(BufferFlags::BOTTOM_FIELD) {
                            self.dequeue_one_field(tc.as_ref(), 0, drain);
                        }
                    } else {
                        self.dequeue_one_field(tc.as_ref(), 0, drain);
                    }
                }
            }
        }

        debug!("attaching {} captions", self.current_frame_captions.len());
        frame.captions.extend(self.current_frame_captions.drain(..));

        self.advance_past(end);
        Ok(Some(frame))
    }

    fn advance_past(&mut self, end: ClockTime) {
        self.previous_video_running_time_end = Some(end);
        self.current_video = None;
        self.current_video_running_time = None;
        self.current_video_running_time_end = None;
    }

    fn make_cdp(&mut self, cc_data: &[u8], tc: Option<&Timecode>) -> Bytes {
        let cdp = cdp::to_cdp(
            CdpMode::TIME_CODE | CdpMode::CC_DATA,
            self.cdp_hdr_sequence_cntr,
            cc_data,
            tc,
            self.cdp_fps_entry,
        );
        self.cdp_hdr_sequence_cntr = self.cdp_hdr_sequence_cntr.wrapping_add(1);
        cdp
    }

    fn make_padding(&mut self, tc: Option<&Timecode>, field: u32) -> Bytes {
        match self.caption_type.unwrap() {
            CaptionType::Cea708Cdp => {
                let cc_data = [0xfc, 0x80, 0x80, 0xf9, 0x80, 0x80];
                self.make_cdp(&cc_data, tc)
            }
            CaptionType::Cea708CcData => {
                Bytes::copy_from_slice(&[0xfc | (field as u8 & 0x01), 0x80, 0x80])
            }
            CaptionType::Cea608S3341a => {
                Bytes::copy_from_slice(&[if field == 0 { 0x80 } else { 0x00 }, 0x80, 0x80])
            }
            CaptionType::Cea608Raw => Bytes::copy_from_slice(&[0x80, 0x80]),
        }
    }

    fn queue_caption(&mut self, buffer: Buffer, field: usize) {
        if self.progressive && field == 1 {
            return;
        }

        debug_assert!(self.scheduled[field].len() <= self.max_scheduled);
        if self.scheduled[field].len() == self.max_scheduled {
            let dropped = self.scheduled[field].pop_front().unwrap();
            warn!(
                "scheduled queue runs too long, dropping caption at {:?}",
                dropped.running_time
            );
            self.scheduled_drops += 1;
        }

        let running_time = buffer.pts;
        self.scheduled[field].push_back(ScheduledCaption { buffer, running_time });
    }

    fn schedule_caption(&mut self, caption_buf: &Buffer, tc: Option<&Timecode>) {
        let data = &caption_buf.data;
        match self.caption_type.unwrap() {
            CaptionType::Cea708Cdp => self.schedule_cdp(caption_buf, tc),
            CaptionType::Cea708CcData => self.schedule_cea708_raw(caption_buf),
            CaptionType::Cea608S3341a => self.schedule_cea608_s334_1a(caption_buf),
            CaptionType::Cea608Raw => {
                if data.len() >= 2 && (data[0] != 0x80 || data[1] != 0x80) {
                    self.queue_caption(caption_buf.clone(), 0);
                }
            }
        }
    }

    fn schedule_cdp(&mut self, caption_buf: &Buffer, tc: Option<&Timecode>) {
        let cc_data = match cdp::parse(&caption_buf.data) {
            Ok((parsed, _)) => parsed.cc_data,
            Err(e) => {
                warn!("dropping invalid cdp: {}", e);
                return;
            }
        };

        // Only inject if there is anything but 608 nulls in there.
        let mut inject = false;
        for triplet in cc_data.chunks_exact(3) {
            let cc_valid = triplet[0] & 0x04 == 0x04;
            let cc_type = triplet[0] & 0x03;
            if !cc_valid {
                continue;
            }
            if cc_type == 0x00 || cc_type == 0x01 {
                if triplet[1] != 0x80 || triplet[2] != 0x80 {
                    inject = true;
                    break;
                }
                continue;
            }
            inject = true;
            break;
        }

        if inject {
            let data = self.make_cdp(&cc_data, tc);
            let mut buf = Buffer::new(data);
            // Timing is only kept for QoS reporting.
            buf.pts = caption_buf.pts;
            buf.duration = caption_buf.duration;
            self.queue_caption(buf, 0);
        }
    }

    fn schedule_cea608_s334_1a(&mut self, caption_buf: &Buffer) {
        let mut len = caption_buf.data.len();
        if len % 3 != 0 {
            warn!("invalid S334-1A buffer size {}, truncating to a multiple of 3", len);
            len -= len % 3;
        }

        let mut field_data: [Vec<u8>; 2] = [Vec::new(), Vec::new()];
        let mut field_seen = [false, false];

        for triplet in caption_buf.data[..len].chunks_exact(3) {
            let field = if triplet[0] & 0x80 != 0 { 0 } else { 1 };
            if field_seen[field] {
                continue;
            }
            field_seen[field] = true;
            if triplet[1] == 0x80 && triplet[2] == 0x80 {
                continue;
            }
            field_data[field].extend_from_slice(triplet);
        }

        for (field, data) in field_data.iter().enumerate() {
            if !data.is_empty() {
                let mut buf = Buffer::new(Bytes::copy_from_slice(data));
                buf.pts = caption_buf.pts;
                buf.duration = caption_buf.duration;
                self.queue_caption(buf, field);
            }
        }
    }

    fn schedule_cea708_raw(&mut self, caption_buf: &Buffer) {
        let mut len = caption_buf.data.len();
        if len % 3 != 0 {
            warn!("invalid cc_data buffer size {}, truncating to a multiple of 3", len);
            len -= len % 3;
        }

        let mut field0 = Vec::new();
        let mut field1 = Vec::new();
        let mut field0_608 = false;
        let mut field1_608 = false;
        let mut started_ccp = false;

        for triplet in caption_buf.data[..len].chunks_exact(3) {
            let cc_valid = triplet[0] & 0x04 == 0x04;
            let cc_type = triplet[0] & 0x03;

            if !started_ccp {
                if cc_type == 0x00 {
                    if !cc_valid || field0_608 {
                        continue;
                    }
                    field0_608 = true;
                    if triplet[1] == 0x80 && triplet[2] == 0x80 {
                        continue;
                    }
                    field0.extend_from_slice(triplet);
                    continue;
                } else if cc_type == 0x01 {
                    if !cc_valid || field1_608 {
                        continue;
                    }
                    field1_608 = true;
                    if triplet[1] == 0x80 && triplet[2] == 0x80 {
                        continue;
                    }
                    field1.extend_from_slice(triplet);
                    continue;
                }
            }

            if cc_type & 0x02 != 0 {
                started_ccp = true;
            }
            if !cc_valid || cc_type == 0x00 || cc_type == 0x01 {
                continue;
            }
            field0.extend_from_slice(triplet);
        }

        for (field, data) in [field0, field1].iter().enumerate() {
            if !data.is_empty() {
                let mut buf = Buffer::new(Bytes::copy_from_slice(data));
                buf.pts = caption_buf.pts;
                buf.duration = caption_buf.duration;
                self.queue_caption(buf, field);
            }
        }
    }

    fn dequeue_one_field(&mut self, tc: Option<&Timecode>, field: usize, drain: bool) {
        if let Some(scheduled) = self.scheduled[field].pop_front() {
            self.current_frame_captions.push(CaptionMeta {
                caption_type: self.caption_type.unwrap(),
                data: scheduled.buffer.data,
            });
        } else if !drain {
            let data = self.make_padding(tc, field as u32);
            self.current_frame_captions.push(CaptionMeta {
                caption_type: self.caption_type.unwrap(),
                data,
            });
        }
    }

    fn dequeue_both_fields(&mut self, tc: Option<&Timecode>, drain: bool) {
        let field0 = self.scheduled[0].pop_front();
        let field1 = self.scheduled[1].pop_front();

        if drain && field0.is_none() && field1.is_none() {
            return;
        }

        let field0_data = match field0 {
            Some(s) => s.buffer.data,
            None => self.make_padding(tc, 0),
        };
        let field1_data = match field1 {
            Some(s) => s.buffer.data,
            None => self.make_padding(tc, 1),
        };

        let mut combined = Vec::with_capacity(field0_data.len() + field1_data.len());
        combined.extend_from_slice(&field0_data);
        combined.extend_from_slice(&field1_data);

        self.current_frame_captions.push(CaptionMeta {
            caption_type: self.caption_type.unwrap(),
            data: Bytes::from(combined),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use media::u64_scale;

    fn video_frame(n: u64) -> Frame {
        // 30000/1001 fps frame timing.
        let pts = ClockTime(u64_scale(n * SECOND.0, 1001, 30000));
        let dur = ClockTime(u64_scale(SECOND.0, 1001, 30000));
        Frame::new(Buffer::new(Bytes::new()).with_pts(pts).with_duration(dur))
    }

    fn caption_buffer(pts: ClockTime, data: &[u8]) -> Buffer {
        Buffer::new(Bytes::copy_from_slice(data)).with_pts(pts)
    }

    fn combiner_608() -> CcCombiner {
        let mut c = CcCombiner::new(true, DEFAULT_MAX_SCHEDULED);
        c.set_video_info(Fraction::new(30000, 1001), true);
        c.set_caption_type(CaptionType::Cea608Raw).unwrap();
        c
    }

    /// Schedule-mode underrun: one caption for frame 0, none after; the
    /// following frames carry exactly one synthetic null caption each.
    #[test]
    fn schedule_mode_underrun_pads() {
        let mut c = combiner_608();
        c.push_caption(caption_buffer(ClockTime(0), &[0x94, 0x2c])).unwrap();

        let mut out = Vec::new();
        for n in 0..5 {
            out.extend(c.push_video(video_frame(n)).unwrap());
        }
        assert_eq!(out.len(), 5);

        assert_eq!(out[0].captions.len(), 1);
        assert_eq!(&out[0].captions[0].data[..], &[0x94, 0x2c]);
        for frame in &out[1..] {
            assert_eq!(frame.captions.len(), 1);
            assert_eq!(&frame.captions[0].data[..], &[0x80, 0x80]);
        }
    }

    /// One video buffer out per video buffer in, in input order, with
    /// strictly increasing running times.
    #[test]
    fn output_order_is_monotonic() {
        let mut c = combiner_608();
        let mut out = Vec::new();
        for n in 0..10 {
            out.extend(c.push_video(video_frame(n)).unwrap());
        }
        assert_eq!(out.len(), 10);
        for pair in out.windows(2) {
            assert!(pair[0].buffer.pts.unwrap() < pair[1].buffer.pts.unwrap());
        }
    }

    /// Passthrough mode attaches captions whose running time falls within
    /// the video frame, and drops late ones.
    #[test]
    fn passthrough_attaches_in_window() {
        let mut c = CcCombiner::new(false, DEFAULT_MAX_SCHEDULED);
        c.set_video_info(Fraction::new(30000, 1001), true);
        c.set_caption_type(CaptionType::Cea608Raw).unwrap();

        let frame_dur = u64_scale(SECOND.0, 1001, 30000);
        c.push_caption(caption_buffer(ClockTime(0), &[0x94, 0x2c])).unwrap();
        c.push_caption(caption_buffer(ClockTime(frame_dur / 2), &[0x94, 0x2d])).unwrap();
        c.push_caption(caption_buffer(ClockTime(frame_dur + 1), &[0x94, 0x2e])).unwrap();

        let out = c.push_video(video_frame(0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].captions.len(), 2);

        // A late caption (before the previous frame's end) is dropped.
        c.push_caption(caption_buffer(ClockTime(0), &[0x10, 0x20])).unwrap();
        let out = c.push_video(video_frame(1)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].captions.len(), 1);
        assert_eq!(&out[0].captions[0].data[..], &[0x94, 0x2e]);
    }

    #[test]
    fn caption_type_change_is_fatal() {
        let mut c = combiner_608();
        assert!(c.set_caption_type(CaptionType::Cea608Raw).is_ok());
        assert!(c.set_caption_type(CaptionType::Cea708Cdp).is_err());
    }

    /// Schedule-queue overflow drops from the head and counts the loss.
    #[test]
    fn scheduled_queue_overflow_drops() {
        let mut c = CcCombiner::new(true, 2);
        c.set_video_info(Fraction::new(30000, 1001), true);
        c.set_caption_type(CaptionType::Cea608Raw).unwrap();

        for n in 0..4u64 {
            c.push_caption(caption_buffer(ClockTime(n), &[0x94, 0x20 + n as u8]))
                .unwrap();
        }
        let out = c.push_video(video_frame(0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(c.scheduled_drops, 2);
        // The oldest captions were dropped; the first survivor is 0x22.
        assert_eq!(&out[0].captions[0].data[..], &[0x94, 0x22]);
    }

    /// Caption EOS degrades to pure passthrough of video (drain); frames
    /// after the queue runs dry carry no padding while draining.
    #[test]
    fn caption_eos_stops_padding_on_drain() {
        let mut c = combiner_608();
        c.caption_eos();
        let out = c.push_video(video_frame(0)).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].captions.is_empty());
    }

    /// CDP scheduling rebuilds the packet against the video framerate and
    /// pads with a null CDP on underrun.
    #[test]
    fn cdp_schedule_and_padding() {
        let mut c = CcCombiner::new(true, DEFAULT_MAX_SCHEDULED);
        c.set_video_info(Fraction::new(30000, 1001), true);
        c.set_caption_type(CaptionType::Cea708Cdp).unwrap();

        let entry = cdp_fps_entry_from_fps(30000, 1001);
        let cdp = cdp::to_cdp(CdpMode::CC_DATA, 9, &[0xfc, 0x94, 0x2c], None, entry);
        c.push_caption(caption_buffer(ClockTime(0), &cdp)).unwrap();

        let out0 = c.push_video(video_frame(0)).unwrap();
        assert_eq!(out0[0].captions.len(), 1);
        let (parsed, _) = cdp::parse(&out0[0].captions[0].data).unwrap();
        assert_eq!(&parsed.cc_data[..3], &[0xfc, 0x94, 0x2c]);
        // Rebuilt with the combiner's own sequence counter.
        assert_eq!(parsed.sequence_cntr, 0);

        let out1 = c.push_video(video_frame(1)).unwrap();
        assert_eq!(out1[0].captions.len(), 1);
        let (parsed, _) = cdp::parse(&out1[0].captions[0].data).unwrap();
        assert_eq!(&parsed.cc_data[..6], &[0xfc, 0x80, 0x80, 0xf9, 0x80, 0x80]);
        assert_eq!(parsed.sequence_cntr, 1);
    }

    /// Interlaced S334-1A video without field flags gets both fields in
    /// one meta, padded per field.
    #[test]
    fn s334_both_fields_combined() {
        let mut c = CcCombiner::new(true, DEFAULT_MAX_SCHEDULED);
        c.set_video_info(Fraction::new(30000, 1001), false);
        c.set_caption_type(CaptionType::Cea608S3341a).unwrap();

        c.push_caption(caption_buffer(ClockTime(0), &[0x80, 0x94, 0x2c])).unwrap();
        let out = c.push_video(video_frame(0)).unwrap();
        assert_eq!(out[0].captions.len(), 1);
        assert_eq!(&out[0].captions[0].data[..], &[0x80, 0x94, 0x2c, 0x00, 0x80, 0x80]);
    }
}
