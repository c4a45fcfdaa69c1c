//! Closed caption wire-format conversion, including framerate rescaling.

use bytes::Bytes;
use failure::{bail, Error};
use log::{debug, trace, warn};
use media::{Buffer, CaptionType, Fraction, Timecode};

use crate::cc_buffer::CcBuffer;
use crate::cdp::{self, CdpMode};
use crate::eia608_parity_strip;
use crate::tables::{cdp_fps_entry_from_fps, CdpFpsEntry, NULL_FPS_ENTRY};

/// Converter configuration. Framerates may be left invalid (0/0) except
/// where a CDP end requires one of the CDP framerates.
#[derive(Clone, Debug)]
pub struct Config {
    pub input: CaptionType,
    pub output: CaptionType,
    /// Field carried by raw CEA-608 input (0 or 1).
    pub in_field: u32,
    /// Field selected for raw CEA-608 output.
    pub out_field: u32,
    pub in_fps: Fraction,
    pub out_fps: Fraction,
    pub cdp_mode: CdpMode,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            input: CaptionType::Cea708Cdp,
            output: CaptionType::Cea708CcData,
            in_field: 0,
            out_field: 0,
            in_fps: Fraction::new(0, 0),
            out_fps: Fraction::new(0, 0),
            cdp_mode: CdpMode::default(),
        }
    }
}

/// Transcodes caption buffers between the four wire formats.
///
/// Push input buffers with [CcConverter::push]; each push returns zero or
/// more output buffers (rescaling may hold data back or release queued
/// data). Call [CcConverter::drain] at EOS.
#[derive(Debug)]
pub struct CcConverter {
    config: Config,
    cc_buffer: CcBuffer,
    input_frames: u64,
    output_frames: u64,
    cdp_hdr_sequence_cntr: u16,
    current_output_timecode: Option<Timecode>,
    previous_meta: Option<Buffer>,
}

impl CcConverter {
    pub fn new(config: Config) -> Result<CcConverter, Error> {
        if config.output == CaptionType::Cea708Cdp {
            let out = cdp_fps_entry_from_fps(config.out_fps.n as u32, config.out_fps.d as u32);
            if out.is_null() {
                bail!("CDP output requires a CDP framerate, not {}", config.out_fps);
            }
            if config.input != CaptionType::Cea708Cdp {
                let inp =
                    cdp_fps_entry_from_fps(config.in_fps.n as u32, config.in_fps.d as u32);
                if inp.is_null() {
                    bail!(
                        "conversion into CDP requires a CDP input framerate, not {}",
                        config.in_fps
                    );
                }
            }
        }
        if config.input == CaptionType::Cea608Raw && config.in_field > 1 {
            bail!("invalid CEA-608 input field {}", config.in_field);
        }
        if config.out_field > 1 {
            bail!("invalid CEA-608 output field {}", config.out_field);
        }

        let mut cc_buffer = CcBuffer::new();
        cc_buffer.set_output_padding(true, false);

        Ok(CcConverter {
            config,
            cc_buffer,
            input_frames: 0,
            output_frames: 1,
            cdp_hdr_sequence_cntr: 0,
            current_output_timecode: None,
            previous_meta: None,
        })
    }

    /// Whether input and output format are identical, in which case
    /// buffers pass through untouched.
    pub fn is_passthrough(&self) -> bool {
        self.config.input == self.config.output
            && (self.config.input != CaptionType::Cea608Raw
                || self.config.in_field == self.config.out_field)
    }

    fn in_fps_entry(&self) -> &'static CdpFpsEntry {
        cdp_fps_entry_from_fps(self.config.in_fps.n as u32, self.config.in_fps.d as u32)
    }

    fn out_fps_entry(&self) -> &'static CdpFpsEntry {
        cdp_fps_entry_from_fps(self.config.out_fps.n as u32, self.config.out_fps.d as u32)
    }

    fn reset_counters(&mut self) {
        self.input_frames = 0;
        self.output_frames = 1;
        self.current_output_timecode = None;
        self.previous_meta = None;
        self.cc_buffer.discard();
    }

    /// Flush-start: drop every queued byte and reset the rescale grid.
    pub fn flush(&mut self) {
        self.reset_counters();
    }

    /// Relative rate of the output grid against the input framerate.
    fn framerate_output_scale(&self, in_fps_entry: &CdpFpsEntry) -> Fraction {
        if in_fps_entry.is_null() || self.config.in_fps.n == 0 || self.config.out_fps.d == 0
        {
            return Fraction::new(1, 1);
        }
        Fraction::multiply(
            Fraction::new(in_fps_entry.fps_d as i32, in_fps_entry.fps_n as i32),
            self.config.out_fps,
        )
        .expect("framerate scale overflow")
    }

    fn interpolate_time_code(
        &self,
        tc: Option<&Timecode>,
        out_fps: Fraction,
        scale: Fraction,
    ) -> Option<Timecode> {
        let tc = tc?;
        if tc.fps.n == 0 {
            return None;
        }

        let scaled = Fraction::multiply(Fraction::new(tc.frames as i32, 1), scale)?;
        trace!(
            "interpolating time code {} with scale {} to frame {}/{}",
            tc,
            scale,
            scaled.n,
            scaled.d
        );

        let out_fps = if out_fps.n == 0 || out_fps.d == 0 { tc.fps } else { out_fps };

        let mut drop_frame = tc.drop_frame;
        if drop_frame && out_fps.d != 1001 && out_fps.n != 60000 && out_fps.n != 30000 {
            drop_frame = false;
        } else if !drop_frame
            && out_fps.d == 1001
            && (out_fps.n == 60000 || out_fps.n == 30000)
        {
            // These framerates are assumed drop-framed throughout.
            drop_frame = true;
        }

        let mut output_frame = (scaled.n / scaled.d) as u32;
        let mut out;
        loop {
            out = Timecode::new(
                out_fps,
                drop_frame,
                tc.hours,
                tc.minutes,
                tc.seconds,
                output_frame,
                tc.field_count,
            );
            output_frame += 1;
            // Dropped frame numbers sit at the start of each minute;
            // step past them to the next valid position.
            if !(drop_frame && output_frame < 10 && !out.is_valid()) {
                break;
            }
        }

        trace!("interpolated to {}", out);
        Some(out)
    }

    /// Advances the rescale counters; true when an output buffer is due.
    fn can_take_buffer(
        &mut self,
        out_fps_entry: &CdpFpsEntry,
        in_tc: Option<&Timecode>,
    ) -> bool {
        let (input_time, output_time) = self.relative_times();
        let cmp = Fraction::compare(input_time, output_time);

        if cmp == std::cmp::Ordering::Equal {
            self.output_frames = 0;
            self.input_frames = 0;
        }

        // The scale always derives from the configured input framerate,
        // not from whatever a CDP packet happened to carry.
        let scale = self.framerate_output_scale(self.in_fps_entry());
        trace!("performing conversion at scale {}, time comparison {:?}", scale, cmp);

        if cmp == std::cmp::Ordering::Less {
            // Cannot generate an output yet.
            return false;
        }
        if let Some(tc) = self.interpolate_time_code(in_tc, out_fps_entry.fps(), scale) {
            self.current_output_timecode = Some(tc);
        }
        true
    }

    fn relative_times(&self) -> (Fraction, Fraction) {
        if self.config.in_fps.n == 0 {
            (
                Fraction::new(self.input_frames as i32, 1),
                Fraction::new(self.output_frames as i32, 1),
            )
        } else {
            let input = Fraction::multiply(
                Fraction::new(self.config.in_fps.d, self.config.in_fps.n),
                Fraction::new(self.input_frames as i32, 1),
            )
            .expect("input frame count overflow");
            let out_fps = if self.config.out_fps.is_valid() {
                self.config.out_fps
            } else {
                self.config.in_fps
            };
            let output = Fraction::multiply(
                Fraction::new(out_fps.d, out_fps.n),
                Fraction::new(self.output_frames as i32, 1),
            )
            .expect("output frame count overflow");
            (input, output)
        }
    }

    /// Whether queued data plus elapsed input time allows another output
    /// without new input.
    fn can_generate_output(&mut self) -> bool {
        if self.config.in_fps.n == 0 || self.config.out_fps.n == 0 {
            return false;
        }
        let (input_time, output_time) = self.relative_times();
        let cmp = Fraction::compare(input_time, output_time);
        if cmp == std::cmp::Ordering::Equal {
            self.output_frames = 0;
            self.input_frames = 0;
        }
        cmp != std::cmp::Ordering::Less
    }

    fn write_cdp_from_cc_data(&mut self, cc_data: &[u8], fps_entry: &CdpFpsEntry) -> Bytes {
        let cdp = cdp::to_cdp(
            self.config.cdp_mode,
            self.cdp_hdr_sequence_cntr,
            cc_data,
            self.current_output_timecode.as_ref(),
            fps_entry,
        );
        self.cdp_hdr_sequence_cntr = self.cdp_hdr_sequence_cntr.wrapping_add(1);
        cdp
    }

    /// Parses a CDP input buffer into the cc buffer; returns the embedded
    /// timecode and framerate entry.
    fn push_cdp(
        &mut self,
        inbuf: Option<&Buffer>,
    ) -> (Option<Timecode>, &'static CdpFpsEntry) {
        let mut tc = None;
        let mut fps_entry = &NULL_FPS_ENTRY;
        if let Some(buf) = inbuf {
            match cdp::parse(&buf.data) {
                Ok((parsed, entry)) => {
                    self.cc_buffer.push_cc_data(&parsed.cc_data);
                    tc = parsed.tc;
                    fps_entry = entry;
                }
                Err(e) => {
                    warn!("dropping invalid cdp packet: {}", e);
                }
            }
            self.input_frames += 1;
        }
        (tc, fps_entry)
    }

    /// One conversion step. `inbuf` is `None` while draining.
    fn transform(&mut self, inbuf: Option<&Buffer>) -> Result<Option<Vec<u8>>, Error> {
        use CaptionType::*;

        let tc_meta = inbuf.and_then(|b| b.timecode);

        if let Some(tc) = tc_meta.as_ref() {
            if self.current_output_timecode.is_none() {
                // Input time codes are assumed well formed and advancing
                // one frame per input buffer.
                let in_fps_entry = self.in_fps_entry();
                let scale = if in_fps_entry.is_null() {
                    Fraction::new(1, 1)
                } else {
                    self.framerate_output_scale(in_fps_entry)
                };
                self.current_output_timecode =
                    self.interpolate_time_code(Some(tc), self.config.out_fps, scale);
            }
        }

        let out = match (self.config.input, self.config.output) {
            (Cea608Raw, Cea608S3341a) => self.convert_608_raw_to_s334(inbuf),
            (Cea608Raw, Cea708CcData) => self.convert_608_raw_to_cc_data(inbuf),
            (Cea608Raw, Cea708Cdp) => self.convert_608_raw_to_cdp(inbuf, tc_meta.as_ref()),
            (Cea608Raw, Cea608Raw) => self.convert_608_raw_to_608_raw(inbuf),
            (Cea608S3341a, Cea608Raw) => self.convert_s334_to_608_raw(inbuf),
            (Cea608S3341a, Cea708CcData) => self.convert_s334_to_cc_data(inbuf),
            (Cea608S3341a, Cea708Cdp) => self.convert_s334_to_cdp(inbuf, tc_meta.as_ref()),
            (Cea608S3341a, Cea608S3341a) => inbuf.map(|b| b.data.to_vec()),
            (Cea708CcData, Cea608Raw) => self.convert_cc_data_to_608_raw(inbuf),
            (Cea708CcData, Cea608S3341a) => self.convert_cc_data_to_s334(inbuf),
            (Cea708CcData, Cea708Cdp) => {
                self.convert_cc_data_to_cdp(inbuf, tc_meta.as_ref())
            }
            (Cea708CcData, Cea708CcData) => inbuf.map(|b| b.data.to_vec()),
            (Cea708Cdp, Cea608Raw) => self.convert_cdp_to_608_raw(inbuf, tc_meta.as_ref()),
            (Cea708Cdp, Cea608S3341a) => self.convert_cdp_to_s334(inbuf, tc_meta.as_ref()),
            (Cea708Cdp, Cea708CcData) => {
                self.convert_cdp_to_cc_data(inbuf, tc_meta.as_ref())
            }
            (Cea708Cdp, Cea708Cdp) => self.convert_cdp_to_cdp(inbuf, tc_meta.as_ref()),
        };

        Ok(out.filter(|o| !o.is_empty()))
    }

    /// Reads at most `max` CEA-608 pairs from a raw 608 buffer.
    fn raw_608_pairs<'a>(data: &'a [u8], max: usize) -> Option<&'a [u8]> {
        if data.len() & 1 != 0 {
            warn!("invalid raw CEA608 buffer size {}", data.len());
            return None;
        }
        let mut n = data.len() / 2;
        if n > max {
            warn!("too many CEA608 pairs {}, truncating to {}", n, max);
            n = max;
        }
        Some(&data[..n * 2])
    }

    /// Reads at most `max` triplets from an S334-1A or cc_data buffer.
    fn triplets(data: &[u8], max: usize, kind: &str) -> Vec<u8> {
        let mut len = data.len();
        if len % 3 != 0 {
            warn!("invalid {} buffer size {}", kind, len);
            len -= len % 3;
        }
        if len / 3 > max {
            warn!("too many {} triplets {}", kind, len / 3);
            len = max * 3;
        }
        data[..len].to_vec()
    }

    fn convert_608_raw_to_s334(&mut self, inbuf: Option<&Buffer>) -> Option<Vec<u8>> {
        let data = Self::raw_608_pairs(&inbuf?.data, 3)?;
        let mut out = Vec::with_capacity(data.len() / 2 * 3);
        for pair in data.chunks_exact(2) {
            // The original line offset is unknown.
            out.push(if self.config.in_field == 0 { 0x80 } else { 0x00 });
            out.extend_from_slice(pair);
        }
        Some(out)
    }

    fn convert_608_raw_to_608_raw(&mut self, inbuf: Option<&Buffer>) -> Option<Vec<u8>> {
        let data = Self::raw_608_pairs(&inbuf?.data, 3)?;
        let mut out = data.to_vec();

        // EIA/CEA-608-B 8.4: on field 2 the non-printing character of the
        // miscellaneous control-character pairs 14h/1Ch 20h-2Fh becomes
        // 15h/1Dh, and vice versa going back to field 1.
        for pair in out.chunks_exact_mut(2) {
            let cc1 = eia608_parity_strip(pair[0]);
            let cc2 = eia608_parity_strip(pair[1]);

            if self.config.in_field == 0 && self.config.out_field == 1 {
                if cc1 == 0x14 && (0x20..=0x2f).contains(&cc2) {
                    pair[0] = 0x15;
                } else if cc1 == 0x1c && (0x20..=0x2f).contains(&cc2) {
                    pair[0] = 0x9d;
                }
            } else if self.config.in_field == 1 && self.config.out_field == 0 {
                if cc1 == 0x15 && (0x20..=0x2f).contains(&cc2) {
                    pair[0] = 0x94;
                } else if cc1 == 0x1d && (0x20..=0x2f).contains(&cc2) {
                    pair[0] = 0x1c;
                }
            }
        }

        Some(out)
    }

    fn convert_608_raw_to_cc_data(&mut self, inbuf: Option<&Buffer>) -> Option<Vec<u8>> {
        let data = Self::raw_608_pairs(&inbuf?.data, 3)?;
        let mut out = Vec::with_capacity(data.len() / 2 * 3);
        for pair in data.chunks_exact(2) {
            out.push(if self.config.in_field == 0 { 0xfc } else { 0xfd });
            out.extend_from_slice(pair);
        }
        Some(out)
    }

    fn convert_608_raw_to_cdp(
        &mut self,
        inbuf: Option<&Buffer>,
        tc_meta: Option<&Timecode>,
    ) -> Option<Vec<u8>> {
        let in_fps_entry = self.in_fps_entry();
        debug_assert!(!in_fps_entry.is_null());

        if let Some(buf) = inbuf {
            let data = Self::raw_608_pairs(&buf.data, in_fps_entry.max_cea608_count)?;
            if self.config.in_field == 0 {
                self.cc_buffer.push_separated(data, &[], &[]);
            } else {
                self.cc_buffer.push_separated(&[], data, &[]);
            }
            self.input_frames += 1;
        }

        let out_fps_entry = self.out_fps_entry();
        if !self.can_take_buffer(out_fps_entry, tc_meta) {
            return None;
        }

        let cc_data = self.cc_buffer.take_cc_data(out_fps_entry, true);
        let cdp = self.write_cdp_from_cc_data(&cc_data, out_fps_entry);
        self.output_frames += 1;
        Some(cdp.to_vec())
    }

    fn convert_s334_to_608_raw(&mut self, inbuf: Option<&Buffer>) -> Option<Vec<u8>> {
        let data = Self::triplets(&inbuf?.data, 3, "S334-1A CEA608");
        let mut out = Vec::new();
        for triplet in data.chunks_exact(3) {
            let field1 = triplet[0] & 0x80 != 0;
            if (field1 && self.config.out_field == 0)
                || (!field1 && self.config.out_field == 1)
            {
                out.extend_from_slice(&triplet[1..3]);
            }
        }
        Some(out)
    }

    fn convert_s334_to_cc_data(&mut self, inbuf: Option<&Buffer>) -> Option<Vec<u8>> {
        let data = Self::triplets(&inbuf?.data, 3, "S334-1A CEA608");
        let mut out = Vec::with_capacity(data.len());
        for triplet in data.chunks_exact(3) {
            out.push(if triplet[0] & 0x80 != 0 { 0xfc } else { 0xfd });
            out.extend_from_slice(&triplet[1..3]);
        }
        Some(out)
    }

    fn convert_s334_to_cdp(
        &mut self,
        inbuf: Option<&Buffer>,
        tc_meta: Option<&Timecode>,
    ) -> Option<Vec<u8>> {
        let in_fps_entry = self.in_fps_entry();
        debug_assert!(!in_fps_entry.is_null());

        if let Some(buf) = inbuf {
            let data =
                Self::triplets(&buf.data, in_fps_entry.max_cea608_count, "S334-1A CEA608");
            let mut field1 = Vec::new();
            let mut field2 = Vec::new();
            for triplet in data.chunks_exact(3) {
                if triplet[1] == 0x80 && triplet[2] == 0x80 {
                    continue;
                }
                if triplet[0] & 0x80 != 0 {
                    field1.extend_from_slice(&triplet[1..3]);
                } else {
                    field2.extend_from_slice(&triplet[1..3]);
                }
            }
            self.cc_buffer.push_separated(&field1, &field2, &[]);
            self.input_frames += 1;
        }

        let out_fps_entry = self.out_fps_entry();
        if !self.can_take_buffer(out_fps_entry, tc_meta) {
            return None;
        }

        let cc_data = self.cc_buffer.take_cc_data(out_fps_entry, true);
        let cdp = self.write_cdp_from_cc_data(&cc_data, out_fps_entry);
        self.output_frames += 1;
        Some(cdp.to_vec())
    }

    fn convert_cc_data_to_608_raw(&mut self, inbuf: Option<&Buffer>) -> Option<Vec<u8>> {
        let data = Self::triplets(&inbuf?.data, 25, "raw CEA708");
        let mut out = Vec::new();
        for triplet in data.chunks_exact(3) {
            if (triplet[0] == 0xfc && self.config.out_field == 0)
                || (triplet[0] == 0xfd && self.config.out_field == 1)
            {
                out.extend_from_slice(&triplet[1..3]);
            }
        }
        Some(out)
    }

    fn convert_cc_data_to_s334(&mut self, inbuf: Option<&Buffer>) -> Option<Vec<u8>> {
        let data = Self::triplets(&inbuf?.data, 25, "raw CEA708");
        let mut out = Vec::new();
        for triplet in data.chunks_exact(3) {
            if triplet[0] == 0xfc || triplet[0] == 0xfd {
                // A line offset of 0 has to be assumed.
                out.push(if triplet[0] == 0xfc { 0x80 } else { 0x00 });
                out.extend_from_slice(&triplet[1..3]);
            }
        }
        Some(out)
    }

    fn convert_cc_data_to_cdp(
        &mut self,
        inbuf: Option<&Buffer>,
        tc_meta: Option<&Timecode>,
    ) -> Option<Vec<u8>> {
        let in_fps_entry = self.in_fps_entry();
        debug_assert!(!in_fps_entry.is_null());

        if let Some(buf) = inbuf {
            self.cc_buffer.push_cc_data(&buf.data);
            self.input_frames += 1;
        }

        let out_fps_entry = self.out_fps_entry();
        if !self.can_take_buffer(out_fps_entry, tc_meta) {
            return None;
        }

        let cc_data = self.cc_buffer.take_cc_data(out_fps_entry, true);
        let cdp = self.write_cdp_from_cc_data(&cc_data, out_fps_entry);
        self.output_frames += 1;
        Some(cdp.to_vec())
    }

    fn cdp_out_fps_entry(&self, in_fps_entry: &'static CdpFpsEntry) -> &'static CdpFpsEntry {
        let out = self.out_fps_entry();
        if out.is_null() { in_fps_entry } else { out }
    }

    fn convert_cdp_to_608_raw(
        &mut self,
        inbuf: Option<&Buffer>,
        tc_meta: Option<&Timecode>,
    ) -> Option<Vec<u8>> {
        let (tc, in_fps_entry) = self.push_cdp(inbuf);
        if inbuf.is_some() && in_fps_entry.is_null() {
            return None;
        }
        let out_fps_entry = self.cdp_out_fps_entry(in_fps_entry);
        if !self.can_take_buffer(out_fps_entry, tc.as_ref().or(tc_meta)) {
            return None;
        }

        let (f1, f2, _ccp) = self.cc_buffer.take_separated(out_fps_entry, true);
        self.output_frames += 1;
        Some(if self.config.out_field == 0 { f1 } else { f2 })
    }

    fn convert_cdp_to_s334(
        &mut self,
        inbuf: Option<&Buffer>,
        tc_meta: Option<&Timecode>,
    ) -> Option<Vec<u8>> {
        let (tc, in_fps_entry) = self.push_cdp(inbuf);
        if inbuf.is_some() && in_fps_entry.is_null() {
            return None;
        }
        let out_fps_entry = self.cdp_out_fps_entry(in_fps_entry);
        if !self.can_take_buffer(out_fps_entry, tc.as_ref().or(tc_meta)) {
            return None;
        }

        let cc_data = self.cc_buffer.take_cc_data(out_fps_entry, false);
        let cea608 = drop_ccp_from_cc_data(&cc_data);
        let mut out = Vec::with_capacity(cea608.len());
        for triplet in cea608.chunks_exact(3) {
            // A line offset of 0 has to be assumed.
            let byte = triplet[0];
            out.push(if byte == 0xfc || byte == 0xf8 { 0x80 } else { 0x00 });
            out.extend_from_slice(&triplet[1..3]);
        }
        self.output_frames += 1;
        Some(out)
    }

    fn convert_cdp_to_cc_data(
        &mut self,
        inbuf: Option<&Buffer>,
        tc_meta: Option<&Timecode>,
    ) -> Option<Vec<u8>> {
        let (tc, in_fps_entry) = self.push_cdp(inbuf);
        if inbuf.is_some() && in_fps_entry.is_null() {
            return None;
        }
        let out_fps_entry = self.cdp_out_fps_entry(in_fps_entry);
        if !self.can_take_buffer(out_fps_entry, tc.as_ref().or(tc_meta)) {
            return None;
        }

        let out = self.cc_buffer.take_cc_data(out_fps_entry, true);
        self.output_frames += 1;
        Some(out)
    }

    fn convert_cdp_to_cdp(
        &mut self,
        inbuf: Option<&Buffer>,
        tc_meta: Option<&Timecode>,
    ) -> Option<Vec<u8>> {
        let (tc, in_fps_entry) = self.push_cdp(inbuf);
        if inbuf.is_some() && in_fps_entry.is_null() {
            return None;
        }
        let out_fps_entry = self.cdp_out_fps_entry(in_fps_entry);
        if !self.can_take_buffer(out_fps_entry, tc.as_ref().or(tc_meta)) {
            return None;
        }

        let cc_data = self.cc_buffer.take_cc_data(out_fps_entry, true);
        let cdp = self.write_cdp_from_cc_data(&cc_data, out_fps_entry);
        self.output_frames += 1;
        Some(cdp.to_vec())
    }

    fn finish_output(&mut self, data: Vec<u8>, meta_from: Option<&Buffer>) -> Buffer {
        let meta = meta_from.or(self.previous_meta.as_ref());
        let mut out = Buffer::new(Bytes::from(data));
        if let Some(m) = meta {
            out.pts = m.pts;
            out.dts = m.dts;
            out.duration = m.duration;
        }
        if let Some(tc) = self.current_output_timecode.as_mut() {
            out.timecode = Some(*tc);
            tc.increment();
        }
        out
    }

    /// Feeds one input buffer, returning the outputs it releases.
    ///
    /// A DISCONT input first drains everything queued, then resets the
    /// rescale counters.
    pub fn push(&mut self, inbuf: &Buffer) -> Result<Vec<Buffer>, Error> {
        if self.is_passthrough() {
            return Ok(vec![inbuf.clone()]);
        }

        let mut out = Vec::new();
        if inbuf.flags.contains(media::BufferFlags::DISCONT) {
            out = self.drain()?;
            self.reset_counters();
        }

        debug!(
            "converting buffer of {} bytes from {:?} to {:?}",
            inbuf.data.len(),
            self.config.input,
            self.config.output
        );

        if let Some(data) = self.transform(Some(inbuf))? {
            out.push(self.finish_output(data, Some(inbuf)));
        }
        self.previous_meta = Some(Buffer {
            data: Bytes::new(),
            ..inbuf.clone()
        });
        Ok(out)
    }

    /// Walks the internal buffer dry; call at EOS.
    pub fn drain(&mut self) -> Result<Vec<Buffer>, Error> {
        let mut out = Vec::new();
        loop {
            let (f1, f2, ccp) = self.cc_buffer.stored_sizes();
            if f1 == 0 && f2 == 0 && ccp == 0 && !self.can_generate_output() {
                break;
            }

            match self.transform(None)? {
                Some(data) => out.push(self.finish_output(data, None)),
                None => {
                    // Move the output grid along.
                    self.input_frames += 1;
                }
            }
        }
        Ok(out)
    }
}

fn drop_ccp_from_cc_data(cc_data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for triplet in cc_data.chunks_exact(3) {
        let cc_valid = triplet[0] & 0x04 == 0x04;
        let cc_type = triplet[0] & 0x03;
        if cc_type >= 2 {
            break;
        }
        if !cc_valid {
            continue;
        }
        out.extend_from_slice(triplet);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn buffer(data: &[u8]) -> Buffer {
        Buffer::new(Bytes::copy_from_slice(data))
    }

    fn converter(input: CaptionType, output: CaptionType) -> CcConverter {
        CcConverter::new(Config {
            input,
            output,
            ..Config::default()
        })
        .unwrap()
    }

    /// S334-1A triplets to raw 608: field-1 bytes only.
    #[test]
    fn s334_to_raw_field1() {
        let mut c = converter(CaptionType::Cea608S3341a, CaptionType::Cea608Raw);
        let out = c
            .push(&buffer(&[0x80, 0x14, 0x20, 0x00, 0x91, 0x52, 0x80, 0x3c, 0x41]))
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &[0x14, 0x20, 0x3c, 0x41]);
    }

    #[test]
    fn s334_to_cc_data() {
        let mut c = converter(CaptionType::Cea608S3341a, CaptionType::Cea708CcData);
        let out = c.push(&buffer(&[0x80, 0x94, 0x20, 0x00, 0x61, 0x62])).unwrap();
        assert_eq!(&out[0].data[..], &[0xfc, 0x94, 0x20, 0xfd, 0x61, 0x62]);
    }

    #[test]
    fn raw_to_s334_marks_field() {
        let mut c = converter(CaptionType::Cea608Raw, CaptionType::Cea608S3341a);
        let out = c.push(&buffer(&[0x94, 0x20])).unwrap();
        assert_eq!(&out[0].data[..], &[0x80, 0x94, 0x20]);

        let mut c = CcConverter::new(Config {
            input: CaptionType::Cea608Raw,
            output: CaptionType::Cea608S3341a,
            in_field: 1,
            ..Config::default()
        })
        .unwrap();
        let out = c.push(&buffer(&[0x94, 0x20])).unwrap();
        assert_eq!(&out[0].data[..], &[0x00, 0x94, 0x20]);
    }

    #[test]
    fn raw_field_swap_rewrites_control_codes() {
        let mut c = CcConverter::new(Config {
            input: CaptionType::Cea608Raw,
            output: CaptionType::Cea608Raw,
            in_field: 0,
            out_field: 1,
            ..Config::default()
        })
        .unwrap();
        // EDM on field 1 becomes field-2 flavored.
        let out = c.push(&buffer(&[0x14, 0x2c])).unwrap();
        assert_eq!(&out[0].data[..], &[0x15, 0x2c]);
        // Printable characters pass unchanged.
        let out = c.push(&buffer(&[0x61, 0x62])).unwrap();
        assert_eq!(&out[0].data[..], &[0x61, 0x62]);
    }

    /// CDP -> cc_data extracts the embedded triplets verbatim.
    #[test]
    fn cdp_to_cc_data_known_packet() {
        let entry = crate::tables::cdp_fps_entry_from_fps(30, 1);
        let cdp = cdp::to_cdp(
            CdpMode::CC_DATA,
            0,
            &[0xfc, 0x94, 0x20, 0xfd, 0x61, 0x62, 0xfc, 0x00, 0x00],
            None,
            entry,
        );

        let mut c = CcConverter::new(Config {
            input: CaptionType::Cea708Cdp,
            output: CaptionType::Cea708CcData,
            in_fps: Fraction::new(30, 1),
            out_fps: Fraction::new(30, 1),
            ..Config::default()
        })
        .unwrap();
        let out = c.push(&buffer(&cdp)).unwrap();
        assert_eq!(out.len(), 1);
        // The non-null payload triplets come through in order, ahead of
        // any filler.
        assert_eq!(&out[0].data[..9], &[0xfc, 0x94, 0x20, 0xfc, 0x00, 0x00, 0xfd, 0x61, 0x62]);
    }

    /// cc_data -> CDP -> cc_data at the same framerate keeps the non-null
    /// payload; the CDP sequence counter advances per packet.
    #[test]
    fn cc_data_cdp_round_trip() {
        let mut to_cdp_conv = CcConverter::new(Config {
            input: CaptionType::Cea708CcData,
            output: CaptionType::Cea708Cdp,
            in_fps: Fraction::new(30, 1),
            out_fps: Fraction::new(30, 1),
            ..Config::default()
        })
        .unwrap();

        let cc_data = [0xfc, 0x94, 0x20, 0xfd, 0x61, 0x62];
        let out1 = to_cdp_conv.push(&buffer(&cc_data)).unwrap();
        assert_eq!(out1.len(), 1);
        let out2 = to_cdp_conv.push(&buffer(&cc_data)).unwrap();
        assert_eq!(out2.len(), 1);

        let seq1 = u16::from_be_bytes([out1[0].data[5], out1[0].data[6]]);
        let seq2 = u16::from_be_bytes([out2[0].data[5], out2[0].data[6]]);
        assert_eq!(seq2, seq1.wrapping_add(1));

        let mut back = CcConverter::new(Config {
            input: CaptionType::Cea708Cdp,
            output: CaptionType::Cea708CcData,
            in_fps: Fraction::new(30, 1),
            out_fps: Fraction::new(30, 1),
            ..Config::default()
        })
        .unwrap();
        let out = back.push(&out1[0]).unwrap();
        // Field slots re-pad on the way out; the payload pairs survive in
        // field order.
        assert_eq!(&out[0].data[..3], &cc_data[..3]);
        assert_eq!(&out[0].data[6..9], &cc_data[3..6]);
    }

    /// 60 fps CDP input to 30 fps CDP output emits half as many packets.
    #[test]
    fn framerate_downscale_halves_output() {
        let entry60 = crate::tables::cdp_fps_entry_from_fps(60, 1);
        let mut c = CcConverter::new(Config {
            input: CaptionType::Cea708Cdp,
            output: CaptionType::Cea708Cdp,
            in_fps: Fraction::new(60, 1),
            out_fps: Fraction::new(30, 1),
            ..Config::default()
        })
        .unwrap();

        let mut n_out = 0;
        for i in 0..20u16 {
            let cdp = cdp::to_cdp(
                CdpMode::CC_DATA,
                i,
                &[0xfc, 0x94, 0x20 + (i as u8 & 0xf)],
                None,
                entry60,
            );
            n_out += c.push(&buffer(&cdp)).unwrap().len();
        }
        assert_eq!(n_out, 10);
    }

    /// 30 fps input to 60 fps output doubles, drawing padding from the
    /// buffer when input runs behind.
    #[test]
    fn framerate_upscale_doubles_output() {
        let entry30 = crate::tables::cdp_fps_entry_from_fps(30, 1);
        let mut c = CcConverter::new(Config {
            input: CaptionType::Cea708Cdp,
            output: CaptionType::Cea708Cdp,
            in_fps: Fraction::new(30, 1),
            out_fps: Fraction::new(60, 1),
            ..Config::default()
        })
        .unwrap();

        let mut n_out = 0;
        for i in 0..10u16 {
            let cdp =
                cdp::to_cdp(CdpMode::CC_DATA, i, &[0xfc, 0x94, 0x20], None, entry30);
            n_out += c.push(&buffer(&cdp)).unwrap().len();
            n_out += c.drain_pending_for_test();
        }
        assert_eq!(n_out, 20);
    }

    #[test]
    fn timecode_interpolation_drop_frame_inference() {
        let c = CcConverter::new(Config {
            input: CaptionType::Cea708Cdp,
            output: CaptionType::Cea708Cdp,
            in_fps: Fraction::new(30, 1),
            out_fps: Fraction::new(30000, 1001),
            ..Config::default()
        })
        .unwrap();
        let tc = Timecode::new(Fraction::new(30, 1), false, 0, 1, 0, 0, 1);
        let out = c
            .interpolate_time_code(
                Some(&tc),
                Fraction::new(30000, 1001),
                Fraction::new(1, 1),
            )
            .unwrap();
        // 30000/1001 output infers drop-frame and skips the dropped
        // frame numbers at the top of the minute.
        assert!(out.drop_frame);
        assert_eq!(out.frames, 2);
    }

    #[test]
    fn cdp_output_requires_cdp_framerate() {
        assert!(CcConverter::new(Config {
            input: CaptionType::Cea708CcData,
            output: CaptionType::Cea708Cdp,
            in_fps: Fraction::new(30, 1),
            out_fps: Fraction::new(17, 1),
            ..Config::default()
        })
        .is_err());
    }

    #[test]
    fn invalid_cdp_is_dropped_not_fatal() {
        let mut c = CcConverter::new(Config {
            input: CaptionType::Cea708Cdp,
            output: CaptionType::Cea708CcData,
            in_fps: Fraction::new(30, 1),
            out_fps: Fraction::new(30, 1),
            ..Config::default()
        })
        .unwrap();
        let out = c.push(&buffer(&[0x12, 0x34, 0x56])).unwrap();
        assert!(out.is_empty());
        // And the stream continues.
        let entry = crate::tables::cdp_fps_entry_from_fps(30, 1);
        let cdp = cdp::to_cdp(CdpMode::CC_DATA, 0, &[0xfc, 0x94, 0x20], None, entry);
        let out = c.push(&buffer(&cdp)).unwrap();
        assert_eq!(out.len(), 1);
    }

    impl CcConverter {
        /// Pulls outputs that became due without new input (upscale).
        fn drain_pending_for_test(&mut self) -> usize {
            let mut n = 0;
            while self.can_generate_output() {
                match self.transform(None).unwrap() {
                    Some(data) => {
                        let _ = self.finish_output(data, None);
                        n += 1;
                    }
                    None => break,
                }
            }
            n
        }
    }
}
