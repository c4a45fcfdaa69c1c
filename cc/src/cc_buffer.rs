//! Accumulates CEA-608 field bytes and CEA-708 caption channel packets
//! and re-emits canonical cc_data triplets at an output framerate.

use std::collections::VecDeque;

use log::{trace, warn};
use media::{ClockTime, SECOND};

use crate::tables::CdpFpsEntry;

/// Canonical null bytes for a CEA-608 pair.
pub const CEA608_NULL: [u8; 2] = [0x80, 0x80];
/// Canonical filler triplet for unused cc_data slots.
pub const CC_DATA_FILLER: [u8; 3] = [0xfa, 0x00, 0x00];

/// Worst-case byte rates used to turn the buffered-time cap into fifo
/// byte budgets: 60 frames of 2 bytes per field, or of max cc_data.
const CEA608_BYTES_PER_SEC: u64 = 60 * 2;
const CCP_BYTES_PER_SEC: u64 = 60 * 3 * 25;

/// Three fifos of raw caption bytes: 608 field 1, 608 field 2, and
/// whole CCP triplets (cc_type 2 and 3).
///
/// Output always orders 608 field-1 triplets before field-2 triplets
/// before any CCP triplet; within a field input order is preserved.
#[derive(Debug, Default)]
pub struct CcBuffer {
    cea608_1: VecDeque<u8>,
    cea608_2: VecDeque<u8>,
    ccp: VecDeque<u8>,
    output_padding: bool,
    output_ccp_padding: bool,
    max_buffer_time: Option<ClockTime>,
}

impl CcBuffer {
    pub fn new() -> CcBuffer {
        CcBuffer {
            cea608_1: VecDeque::new(),
            cea608_2: VecDeque::new(),
            ccp: VecDeque::new(),
            output_padding: true,
            output_ccp_padding: false,
            max_buffer_time: Some(SECOND * 30),
        }
    }

    /// Selects whether short 608 fields / CCP slots are padded with
    /// canonical nulls on take.
    pub fn set_output_padding(&mut self, padding_608: bool, padding_ccp: bool) {
        self.output_padding = padding_608;
        self.output_ccp_padding = padding_ccp;
    }

    /// Bounds how much caption data may pile up when the output runs
    /// behind; `None` removes the bound.
    pub fn set_max_buffer_time(&mut self, time: Option<ClockTime>) {
        self.max_buffer_time = time;
    }

    pub fn is_empty(&self) -> bool {
        self.cea608_1.is_empty() && self.cea608_2.is_empty() && self.ccp.is_empty()
    }

    /// Stored bytes per fifo: (608 field 1, 608 field 2, ccp).
    pub fn stored_sizes(&self) -> (usize, usize, usize) {
        (self.cea608_1.len(), self.cea608_2.len(), self.ccp.len())
    }

    /// Clears all three fifos without emitting anything.
    pub fn discard(&mut self) {
        self.cea608_1.clear();
        self.cea608_2.clear();
        self.ccp.clear();
    }

    fn fifo_caps(&self) -> (usize, usize) {
        match self.max_buffer_time {
            None => (usize::MAX, usize::MAX),
            Some(t) => {
                let secs = t.nanos() / SECOND.nanos() + 1;
                (
                    (secs * CEA608_BYTES_PER_SEC) as usize,
                    (secs * CCP_BYTES_PER_SEC) as usize,
                )
            }
        }
    }

    /// Appends to the named fifos directly. Bytes that would overrun the
    /// buffered-time cap are dropped with a warning.
    pub fn push_separated(&mut self, field1: &[u8], field2: &[u8], ccp: &[u8]) {
        let (cap_608, cap_ccp) = self.fifo_caps();

        if field1.len() & 1 != 0 || field2.len() & 1 != 0 {
            warn!("odd number of cea608 bytes, truncating");
        }
        if ccp.len() % 3 != 0 {
            warn!("ccp data is not a whole number of triplets, truncating");
        }

        for (fifo, data) in &mut [
            (&mut self.cea608_1, &field1[..field1.len() & !1]),
            (&mut self.cea608_2, &field2[..field2.len() & !1]),
        ] {
            if fifo.len() + data.len() > cap_608 {
                warn!("cea608 fifo over the buffered-time cap, dropping {} bytes", data.len());
                continue;
            }
            fifo.extend(data.iter().copied());
        }

        let ccp = &ccp[..ccp.len() - ccp.len() % 3];
        if self.ccp.len() + ccp.len() > cap_ccp {
            warn!("ccp fifo over the buffered-time cap, dropping {} bytes", ccp.len());
        } else {
            self.ccp.extend(ccp.iter().copied());
        }
    }

    /// Parses cc_data triplets into the three fifos. Invalid triplets are
    /// skipped; 608 triplets that follow the start of a CCP violate the
    /// cc_data ordering and are dropped with a warning.
    pub fn push_cc_data(&mut self, cc_data: &[u8]) {
        let mut len = cc_data.len();
        if len % 3 != 0 {
            warn!("cc_data buffer size {} is not a multiple of 3, truncating", len);
            len -= len % 3;
        }

        let mut field1 = Vec::new();
        let mut field2 = Vec::new();
        let mut ccp = Vec::new();
        let mut started_ccp = false;

        for triplet in cc_data[..len].chunks_exact(3) {
            let cc_valid = triplet[0] & 0x04 == 0x04;
            let cc_type = triplet[0] & 0x03;
            trace!(
                "0x{:02x} 0x{:02x} 0x{:02x}, valid: {}, type: {}",
                triplet[0],
                triplet[1],
                triplet[2],
                cc_valid,
                cc_type
            );

            if cc_type & 0x02 != 0 {
                if cc_type == 0x03 {
                    started_ccp = true;
                }
                if !cc_valid {
                    continue;
                }
                ccp.extend_from_slice(triplet);
                continue;
            }

            if started_ccp {
                warn!("cea608 triplet after the start of a ccp, dropping");
                continue;
            }
            if !cc_valid {
                continue;
            }
            if cc_type == 0x00 {
                field1.extend_from_slice(&triplet[1..3]);
            } else {
                field2.extend_from_slice(&triplet[1..3]);
            }
        }

        self.push_separated(&field1, &field2, &ccp);
    }

    fn take_field(
        fifo: &mut VecDeque<u8>,
        max_pairs: usize,
        pad: bool,
        header: u8,
        out: &mut Vec<u8>,
    ) {
        let mut pairs = 0;
        while pairs < max_pairs && fifo.len() >= 2 {
            out.push(header);
            out.push(fifo.pop_front().unwrap());
            out.push(fifo.pop_front().unwrap());
            pairs += 1;
        }
        if pad {
            while pairs < max_pairs {
                out.push(header);
                out.extend_from_slice(&CEA608_NULL);
                pairs += 1;
            }
        }
    }

    /// Emits cc_data triplets for one output frame: up to
    /// `max_cea608_count` pairs per 608 field and `max_ccp_count` CCP
    /// triplets, 608 before 708.
    ///
    /// `nul_padding` enables padding for this take; it is additionally
    /// gated by [CcBuffer::set_output_padding].
    pub fn take_cc_data(&mut self, fps_entry: &CdpFpsEntry, nul_padding: bool) -> Vec<u8> {
        let pad_608 = nul_padding && self.output_padding;
        let pad_ccp = nul_padding && self.output_ccp_padding;
        let mut out = Vec::with_capacity(3 * fps_entry.max_cc_count);

        Self::take_field(&mut self.cea608_1, fps_entry.max_cea608_count, pad_608, 0xfc, &mut out);
        Self::take_field(&mut self.cea608_2, fps_entry.max_cea608_count, pad_608, 0xfd, &mut out);

        let mut triplets = 0;
        while triplets < fps_entry.max_ccp_count && self.ccp.len() >= 3 {
            for _ in 0..3 {
                out.push(self.ccp.pop_front().unwrap());
            }
            triplets += 1;
        }
        if pad_ccp {
            while triplets < fps_entry.max_ccp_count && out.len() + 3 <= 3 * fps_entry.max_cc_count {
                out.extend_from_slice(&CC_DATA_FILLER);
                triplets += 1;
            }
        }

        out
    }

    /// Emits the three streams separately: bare 608 bytes per field plus
    /// whole CCP triplets.
    pub fn take_separated(
        &mut self,
        fps_entry: &CdpFpsEntry,
        nul_padding: bool,
    ) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let pad_608 = nul_padding && self.output_padding;

        let mut take_608 = |fifo: &mut VecDeque<u8>| {
            let mut out = Vec::with_capacity(2 * fps_entry.max_cea608_count);
            let mut pairs = 0;
            while pairs < fps_entry.max_cea608_count && fifo.len() >= 2 {
                out.push(fifo.pop_front().unwrap());
                out.push(fifo.pop_front().unwrap());
                pairs += 1;
            }
            if pad_608 {
                while pairs < fps_entry.max_cea608_count {
                    out.extend_from_slice(&CEA608_NULL);
                    pairs += 1;
                }
            }
            out
        };

        let f1 = take_608(&mut self.cea608_1);
        let f2 = take_608(&mut self.cea608_2);

        let mut ccp = Vec::new();
        let mut triplets = 0;
        while triplets < fps_entry.max_ccp_count && self.ccp.len() >= 3 {
            for _ in 0..3 {
                ccp.push(self.ccp.pop_front().unwrap());
            }
            triplets += 1;
        }

        (f1, f2, ccp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::cdp_fps_entry_from_fps;

    #[test]
    fn ordering_contract() {
        let mut buf = CcBuffer::new();
        // CCP first in the push; 608 of both fields afterwards would be
        // invalid cc_data, so push them separated.
        buf.push_separated(&[0x94, 0x20], &[0x15, 0x2c], &[0xff, 0x02, 0x21, 0xfe, 0x41, 0x00]);
        let entry = cdp_fps_entry_from_fps(30000, 1001);
        let out = buf.take_cc_data(entry, true);

        // All 608 triplets before any 708 triplet, field 1 before field 2.
        let types: Vec<u8> = out.chunks_exact(3).map(|t| t[0] & 3).collect();
        let first_708 = types.iter().position(|&t| t >= 2).unwrap();
        assert!(types[..first_708].windows(2).all(|w| w[0] <= w[1]));
        assert!(types[first_708..].iter().all(|&t| t >= 2));

        assert_eq!(&out[0..3], &[0xfc, 0x94, 0x20]);
        // Field 1 padded to the framerate's two pairs.
        assert_eq!(&out[3..6], &[0xfc, 0x80, 0x80]);
        assert_eq!(&out[6..9], &[0xfd, 0x15, 0x2c]);
        assert_eq!(&out[9..12], &[0xfd, 0x80, 0x80]);
        assert_eq!(&out[12..18], &[0xff, 0x02, 0x21, 0xfe, 0x41, 0x00]);
    }

    #[test]
    fn push_cc_data_splits_fifos() {
        let mut buf = CcBuffer::new();
        buf.push_cc_data(&[
            0xfc, 0x94, 0x20, // 608 F1
            0xfd, 0x61, 0x62, // 608 F2
            0xfa, 0x00, 0x00, // filler, invalid, dropped
            0xff, 0x02, 0x21, // CCP start
            0xfe, 0x41, 0x00, // CCP add
        ]);
        assert_eq!(buf.stored_sizes(), (2, 2, 6));

        // 608 after CCP start violates ordering and is dropped.
        let mut buf = CcBuffer::new();
        buf.push_cc_data(&[0xff, 0x02, 0x21, 0xfc, 0x94, 0x20]);
        assert_eq!(buf.stored_sizes(), (0, 0, 3));
    }

    #[test]
    fn take_without_padding_is_verbatim() {
        let mut buf = CcBuffer::new();
        buf.push_separated(&[0x94, 0x20], &[], &[]);
        let entry = cdp_fps_entry_from_fps(30, 1);
        let out = buf.take_cc_data(entry, false);
        assert_eq!(out, vec![0xfc, 0x94, 0x20]);
        assert!(buf.is_empty());
    }

    #[test]
    fn take_separated_keeps_fields_apart() {
        let mut buf = CcBuffer::new();
        buf.push_separated(&[0x94, 0x20, 0x94, 0x21, 0x94, 0x22], &[0x15, 0x2c], &[]);
        let entry = cdp_fps_entry_from_fps(30000, 1001);
        let (f1, f2, ccp) = buf.take_separated(entry, false);
        // Two pairs max per frame at 29.97; the third stays queued.
        assert_eq!(f1, vec![0x94, 0x20, 0x94, 0x21]);
        assert_eq!(f2, vec![0x15, 0x2c]);
        assert!(ccp.is_empty());
        assert_eq!(buf.stored_sizes(), (2, 0, 0));
    }

    #[test]
    fn discard_clears_everything() {
        let mut buf = CcBuffer::new();
        buf.push_separated(&[0x94, 0x20], &[0x15, 0x2c], &[0xff, 0x02, 0x21]);
        assert!(!buf.is_empty());
        buf.discard();
        assert!(buf.is_empty());
        assert_eq!(buf.stored_sizes(), (0, 0, 0));
    }
}
