//! Raw VBI sampling parameters.

use failure::{bail, Error};
use log::info;

use crate::bit_slicer::SampleFormat;
use crate::services::{ServicePar, SERVICE_TABLE, SP_FIELD_NUM, SP_LINE_NUM};
use crate::{
    videostd_set_from_scanning, ServiceSet, VideoStdSet, SLICED_VBI_525, SLICED_VBI_625,
    SLICED_WSS_625, VIDEOSTD_SET_525_60, VIDEOSTD_SET_625_50,
};

/// Describes how a raw VBI image was sampled.
#[derive(Clone, Debug)]
pub struct SamplingPar {
    pub sample_format: SampleFormat,
    /// Samples per second.
    pub sampling_rate: u32,
    /// Bytes of one scan line, including padding; samples per line is
    /// `bytes_per_line / bytes-per-sample`.
    pub bytes_per_line: u32,
    /// Distance from the leading edge of hsync to the first sample, in
    /// samples.
    pub offset: u32,
    /// First sampled ITU-R line per field, 0 if unknown.
    pub start: [u32; 2],
    /// Sampled lines per field.
    pub count: [u32; 2],
    /// Lines of the two fields are interleaved in memory.
    pub interlaced: bool,
    /// Field order is known (top field first).
    pub synchronous: bool,
    /// 525 or 625.
    pub scanning: u32,
}

impl SamplingPar {
    pub fn bytes_per_sample(&self) -> u32 {
        match self.sample_format {
            SampleFormat::Y8 => 1,
            SampleFormat::Yuyv
            | SampleFormat::Yvyu
            | SampleFormat::Uyvy
            | SampleFormat::Vyuy
            | SampleFormat::Rgb16Le
            | SampleFormat::Rgb16Be => 2,
            SampleFormat::Rgb24Le | SampleFormat::Bgr24Le => 3,
            SampleFormat::Rgba32Le | SampleFormat::Bgra32Le => 4,
        }
    }

    pub fn samples_per_line(&self) -> u32 {
        self.bytes_per_line / self.bytes_per_sample()
    }

    pub fn videostd_set(&self) -> VideoStdSet {
        videostd_set_from_scanning(self.scanning)
    }

    /// Sanity-checks the line ranges against the scan system.
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_format != SampleFormat::Y8
            && self.bytes_per_line % self.bytes_per_sample() != 0
        {
            bail!(
                "bytes_per_line {} is no multiple of the sample size {}",
                self.bytes_per_line,
                self.bytes_per_sample()
            );
        }
        if self.bytes_per_line == 0 {
            bail!("samples_per_line is zero");
        }
        if self.count[0] == 0 && self.count[1] == 0 {
            bail!("no lines sampled");
        }

        let range_ok = |start: u32, count: u32, min: u32, max: u32| {
            start >= min && start + count <= max && start + count >= start
        };

        match self.videostd_set() {
            VIDEOSTD_SET_525_60 => {
                if self.start[0] != 0 && !range_ok(self.start[0], self.count[0], 1, 262) {
                    bail!("invalid 525 field 1 range {}+{}", self.start[0], self.count[0]);
                }
                if self.start[1] != 0 && !range_ok(self.start[1], self.count[1], 263, 525)
                {
                    bail!("invalid 525 field 2 range {}+{}", self.start[1], self.count[1]);
                }
            }
            VIDEOSTD_SET_625_50 => {
                if self.start[0] != 0 && !range_ok(self.start[0], self.count[0], 1, 311) {
                    bail!("invalid 625 field 1 range {}+{}", self.start[0], self.count[0]);
                }
                if self.start[1] != 0 && !range_ok(self.start[1], self.count[1], 312, 625)
                {
                    bail!("invalid 625 field 2 range {}+{}", self.start[1], self.count[1]);
                }
            }
            _ => bail!("ambiguous scanning {}", self.scanning),
        }

        if self.interlaced && (self.count[0] != self.count[1] || self.count[0] == 0) {
            bail!(
                "line counts {}, {} must be equal and non-zero for interlaced data",
                self.count[0],
                self.count[1]
            );
        }

        Ok(())
    }

    /// Whether `par` can be decoded from data sampled like this.
    ///
    /// `strict` 0 accepts everything plausible, 1 requires the signal to
    /// fit with a 1 µs margin, 2 additionally requires every line the
    /// service may use to be sampled.
    pub fn permits(&self, par: &ServicePar, strict: u32) -> bool {
        let videostd_set = self.videostd_set();
        if par.videostd_set & videostd_set == 0 {
            info!(
                "service 0x{:08x} ({}) requires videostd_set 0x{:x}, have 0x{:x}",
                par.id, par.label, par.videostd_set, videostd_set
            );
            return false;
        }

        if par.flags & SP_LINE_NUM != 0
            && ((par.first[0] > 0 && self.start[0] == 0)
                || (par.first[1] > 0 && self.start[1] == 0))
        {
            info!(
                "service 0x{:08x} ({}) requires known line numbers",
                par.id, par.label
            );
            return false;
        }

        {
            let mut rate = std::cmp::max(par.cri_rate, par.bit_rate);
            // The effective WSS bit rate is only a third of the maximum,
            // so the maximum itself suffices.
            if par.id != SLICED_WSS_625 {
                rate = (rate * 3) >> 1;
            }
            if rate > self.sampling_rate {
                info!(
                    "sampling rate {} Hz too low for service 0x{:08x} ({})",
                    self.sampling_rate, par.id, par.label
                );
                return false;
            }
        }

        let signal = par.cri_bits as f64 / par.cri_rate as f64
            + (par.frc_bits + par.payload_bits) as f64 / par.bit_rate as f64;

        {
            let mut samples = self.samples_per_line() as f64 / self.sampling_rate as f64;
            if strict > 0 {
                samples -= 1e-6; // headroom
            }
            if samples < signal {
                info!(
                    "service 0x{:08x} ({}) signal length {:.2} us exceeds {:.2} us \
                     sampling length",
                    par.id,
                    par.label,
                    signal * 1e6,
                    samples * 1e6
                );
                return false;
            }
        }

        if par.flags & SP_FIELD_NUM != 0 && !self.synchronous {
            info!(
                "service 0x{:08x} ({}) requires synchronous field order",
                par.id, par.label
            );
            return false;
        }

        for field in 0..2 {
            if par.first[field] == 0 || par.last[field] == 0 {
                // No data on this field.
                continue;
            }
            if self.count[field] == 0 {
                info!(
                    "service 0x{:08x} ({}) requires data from field {}",
                    par.id,
                    par.label,
                    field + 1
                );
                return false;
            }
            if strict == 0 || self.start[field] == 0 {
                continue;
            }
            if strict == 1 && par.first[field] > par.last[field] {
                // May still work if not all lines available to the
                // service are actually used.
                continue;
            }
            let start = self.start[field];
            let end = start + self.count[field] - 1;
            if start > par.first[field] || end < par.last[field] {
                info!(
                    "service 0x{:08x} ({}) requires lines {}-{}, have {}-{}",
                    par.id, par.label, par.first[field], par.last[field], start, end
                );
                return false;
            }
        }

        true
    }

    /// Subset of `services` decodable with these sampling parameters.
    pub fn check_services(&self, services: ServiceSet, strict: u32) -> ServiceSet {
        let mut rservices = 0;
        for par in SERVICE_TABLE {
            if par.id & services == 0 {
                continue;
            }
            if self.permits(par, strict) {
                rservices |= par.id;
            }
        }
        rservices
    }
}

/// Calculates sampling parameters that cover the requested services.
///
/// Returns the parameters, the highest data bit rate of the covered
/// services, and the subset actually covered. `videostd_set` 0 derives
/// the standard from the services themselves.
pub fn from_services(
    videostd_set_req: VideoStdSet,
    services: ServiceSet,
) -> Result<(SamplingPar, u32, ServiceSet), Error> {
    let mut videostd_set = 0;
    if videostd_set_req != 0 {
        if videostd_set_req & crate::VIDEOSTD_SET_ALL == 0
            || (videostd_set_req & VIDEOSTD_SET_525_60 != 0
                && videostd_set_req & VIDEOSTD_SET_625_50 != 0)
        {
            bail!("ambiguous videostd_set 0x{:x}", videostd_set_req);
        }
        videostd_set = videostd_set_req;
    }

    let mut sp = SamplingPar {
        sample_format: SampleFormat::Y8,
        sampling_rate: 27_000_000, // ITU-R BT.601
        bytes_per_line: 0,
        offset: (64e-6 * 27e6) as u32,
        start: [30000, 30000],
        count: [0, 0],
        interlaced: false,
        synchronous: true,
        scanning: 0,
    };

    let mut samples_per_line: u32 = 0;
    let mut rservices = 0;
    let mut rate = 0;

    for par in SERVICE_TABLE {
        if par.id & services == 0 {
            continue;
        }

        if videostd_set_req == 0 {
            let set = par.videostd_set | videostd_set;
            if set & !VIDEOSTD_SET_525_60 == 0 || set & !VIDEOSTD_SET_625_50 == 0 {
                videostd_set |= par.videostd_set;
            }
        }

        if par.videostd_set & videostd_set == 0 {
            info!(
                "service 0x{:08x} ({}) requires videostd_set 0x{:x}, have 0x{:x}",
                par.id, par.label, par.videostd_set, videostd_set
            );
            continue;
        }

        rate = rate.max(par.cri_rate).max(par.bit_rate);

        let signal = par.cri_bits as f64 / par.cri_rate as f64
            + (par.frc_bits + par.payload_bits) as f64 / par.bit_rate as f64;

        let offset = (par.offset_ns as f64 / 1e9 * sp.sampling_rate as f64) as u32;
        let samples = ((signal + 1.0e-6) * sp.sampling_rate as f64) as u32;

        sp.offset = sp.offset.min(offset);
        samples_per_line =
            (samples_per_line + sp.offset).max(samples + offset) - sp.offset;

        for field in 0..2 {
            if par.first[field] > 0 && par.last[field] > 0 {
                sp.start[field] = sp.start[field].min(par.first[field]);
                sp.count[field] =
                    (sp.start[field] + sp.count[field]).max(par.last[field] + 1)
                        - sp.start[field];
            }
        }

        rservices |= par.id;
    }

    if rservices == 0 {
        bail!("no services covered by videostd_set 0x{:x}", videostd_set);
    }

    if sp.count[1] == 0 {
        sp.start[1] = 0;
        if sp.count[0] == 0 {
            sp.start[0] = 0;
            sp.offset = 0;
        }
    } else if sp.count[0] == 0 {
        sp.start[0] = 0;
    }

    sp.scanning = if videostd_set & VIDEOSTD_SET_525_60 != 0 { 525 } else { 625 };
    // Note bytes per sample is 1 for Y8.
    sp.bytes_per_line = samples_per_line.max(1440);

    Ok((sp, rate, rservices))
}

/// Services that only mark lines as sampled, without any payload.
pub fn blank_services() -> ServiceSet {
    SLICED_VBI_525 | SLICED_VBI_625
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SLICED_CAPTION_525, SLICED_TELETEXT_B};

    #[test]
    fn from_caption_services() {
        let (sp, max_rate, enrolled) =
            from_services(0, SLICED_CAPTION_525).unwrap();
        assert_eq!(enrolled, SLICED_CAPTION_525);
        assert_eq!(sp.scanning, 525);
        assert_eq!(max_rate, 1_006_976);
        assert_eq!(sp.start, [21, 284]);
        assert_eq!(sp.count, [1, 1]);
        sp.validate().unwrap();
    }

    #[test]
    fn teletext_needs_625() {
        assert!(from_services(VIDEOSTD_SET_525_60, SLICED_TELETEXT_B).is_err());
        let (sp, _, enrolled) = from_services(0, SLICED_TELETEXT_B).unwrap();
        assert_eq!(enrolled, SLICED_TELETEXT_B);
        assert_eq!(sp.scanning, 625);
    }

    #[test]
    fn check_services_rejects_low_rate() {
        let (mut sp, _, _) = from_services(0, SLICED_CAPTION_525).unwrap();
        assert_eq!(sp.check_services(SLICED_CAPTION_525, 1), SLICED_CAPTION_525);
        sp.sampling_rate = 1_000_000;
        assert_eq!(sp.check_services(SLICED_CAPTION_525, 1), 0);
    }

    #[test]
    fn validate_rejects_bad_ranges() {
        let (mut sp, _, _) = from_services(0, SLICED_CAPTION_525).unwrap();
        sp.start[0] = 400;
        assert!(sp.validate().is_err());
    }
}
