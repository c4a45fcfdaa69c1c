//! Bit slicer: recovers a bit pattern from one scan line of raw samples.
//!
//! The slicer hunts for the Clock Run-In with a phase-locked loop and an
//! adaptive 0/1 threshold, verifies the Framing Code, then samples the
//! payload bits at interpolated positions. All arithmetic is integer
//! fixed point: the threshold carries `thresh_frac` fractional bits, bit
//! positions are in 1/256 sample units.

use failure::{bail, Error};
use log::warn;

/// Default fractional bits of the adaptive threshold.
const DEF_THR_FRAC: u32 = 9;

/// log2 of the averaging window in low-pass mode.
const LP_AVG: u32 = 4;

/// Raw sample formats the slicer accepts. Only the green (or luma)
/// component is ever inspected.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// Luma-only or planar YUV; one byte per sample.
    Y8,
    Yuyv,
    Yvyu,
    Uyvy,
    Vyuy,
    Rgb24Le,
    Bgr24Le,
    Rgba32Le,
    Bgra32Le,
    Rgb16Le,
    Rgb16Be,
}

/// Payload modulation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Modulation {
    NrzLsb,
    NrzMsb,
    BiphaseLsb,
    BiphaseMsb,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Func {
    /// set_params() not called or failed; slice() always fails.
    Null,
    /// Gray / packed formats, green sample is one byte.
    Gray,
    Green16Le,
    Green16Be,
    LowPass,
}

/// A compiled scan-line decoding rule. See [BitSlicer::set_params].
#[derive(Debug)]
pub struct BitSlicer {
    func: Func,
    sample_format: SampleFormat,
    cri: u32,
    cri_mask: u32,
    thresh: i32,
    thresh_frac: u32,
    cri_samples: u32,
    cri_rate: u32,
    oversampling: u32,
    oversampling_rate: u32,
    phase_shift: u32,
    step: u32,
    frc: u32,
    frc_bits: u32,
    total_bits: u32,
    /// Bits for the bitwise endian modes, bytes for the octet modes.
    payload: u32,
    payload_bits: u32,
    endian: u32,
    bytes_per_sample: usize,
    skip: usize,
    green_mask: u32,
}

impl Default for BitSlicer {
    fn default() -> Self {
        BitSlicer::new()
    }
}

trait Pixel {
    const BPP: usize;
    fn green(raw: &[u8], mask: u32) -> i32;
}

struct Gray<const BPP: usize>;

impl<const BPP: usize> Pixel for Gray<BPP> {
    const BPP: usize = BPP;
    fn green(raw: &[u8], _mask: u32) -> i32 {
        raw[0] as i32
    }
}

struct Green16Le;

impl Pixel for Green16Le {
    const BPP: usize = 2;
    fn green(raw: &[u8], mask: u32) -> i32 {
        ((raw[0] as u32 + raw[1] as u32 * 256) & mask) as i32
    }
}

struct Green16Be;

impl Pixel for Green16Be {
    const BPP: usize = 2;
    fn green(raw: &[u8], mask: u32) -> i32 {
        ((raw[1] as u32 + raw[0] as u32 * 256) & mask) as i32
    }
}

/// Reads the green value at `byte_idx`; reads past the last full sample
/// are clamped to it.
fn green_at<P: Pixel>(raw: &[u8], byte_idx: usize, mask: u32) -> i32 {
    let last = raw.len().saturating_sub(P::BPP);
    P::green(&raw[byte_idx.min(last)..], mask)
}

impl BitSlicer {
    pub fn new() -> BitSlicer {
        BitSlicer {
            func: Func::Null,
            sample_format: SampleFormat::Y8,
            cri: 0,
            cri_mask: 0,
            thresh: 0,
            thresh_frac: DEF_THR_FRAC,
            cri_samples: 0,
            cri_rate: 0,
            oversampling: 4,
            oversampling_rate: 0,
            phase_shift: 0,
            step: 0,
            frc: 0,
            frc_bits: 0,
            total_bits: 0,
            payload: 0,
            payload_bits: 0,
            endian: 0,
            bytes_per_sample: 1,
            skip: 0,
            green_mask: 0,
        }
    }

    /// Number of CRI + FRC + payload bits, useful for sizing diagnostics.
    pub fn total_bits(&self) -> u32 {
        self.total_bits
    }

    /// Compiles the slicer for one decoding rule.
    ///
    /// `cri`/`cri_mask` describe the Clock Run-In, last transmitted bit in
    /// the LSB; only bits set in the mask must match. `cri_end` bounds the
    /// CRI search (pass `!0` to derive the bound from the line length).
    /// `frc` must match exactly; it is assumed to share the payload's
    /// modulation and rate. On error the slicer is left unusable and every
    /// subsequent [BitSlicer::slice] returns false.
    #[allow(clippy::too_many_arguments)]
    pub fn set_params(
        &mut self,
        sample_format: SampleFormat,
        sampling_rate: u32,
        sample_offset: u32,
        samples_per_line: u32,
        cri: u32,
        cri_mask: u32,
        cri_bits: u32,
        cri_rate: u32,
        cri_end: u32,
        frc: u32,
        frc_bits: u32,
        payload_bits: u32,
        payload_rate: u32,
        modulation: Modulation,
    ) -> Result<(), Error> {
        self.func = Func::Null;

        if cri_bits > 32 || frc_bits > 32 {
            bail!("cri_bits {} / frc_bits {} must not exceed 32", cri_bits, frc_bits);
        }
        if payload_bits > 32767 || samples_per_line > 32767 {
            bail!(
                "payload_bits {} / samples_per_line {} out of range",
                payload_bits,
                samples_per_line
            );
        }
        if cri_rate > sampling_rate {
            bail!("cri_rate {} > sampling_rate {}", cri_rate, sampling_rate);
        }
        if payload_rate > sampling_rate {
            bail!("payload_rate {} > sampling_rate {}", payload_rate, sampling_rate);
        }

        let min_samples_per_bit = sampling_rate / std::cmp::max(cri_rate, payload_rate);

        self.sample_format = sample_format;

        let c_mask = if cri_bits == 32 { !0u32 } else { (1u32 << cri_bits) - 1 };
        let f_mask = if frc_bits == 32 { !0u32 } else { (1u32 << frc_bits) - 1 };

        let mut oversampling = 4u32;
        let mut skip = 0usize;

        // 0/1 threshold, start value.
        self.thresh = 105 << DEF_THR_FRAC;
        self.thresh_frac = DEF_THR_FRAC;
        self.green_mask = 0;

        let low_pass = min_samples_per_bit > (3 << (LP_AVG - 1));
        match sample_format {
            SampleFormat::Y8 => {
                self.bytes_per_sample = 1;
                self.func = Func::Gray;
            }
            SampleFormat::Yuyv | SampleFormat::Yvyu => {
                self.bytes_per_sample = 2;
                self.func = Func::Gray;
            }
            SampleFormat::Uyvy | SampleFormat::Vyuy => {
                skip = 1;
                self.bytes_per_sample = 2;
                self.func = Func::Gray;
            }
            SampleFormat::Rgb24Le | SampleFormat::Bgr24Le => {
                skip = 1;
                self.bytes_per_sample = 3;
                self.func = Func::Gray;
            }
            SampleFormat::Rgba32Le | SampleFormat::Bgra32Le => {
                skip = 1;
                self.bytes_per_sample = 4;
                self.func = Func::Gray;
            }
            SampleFormat::Rgb16Le => {
                self.func = Func::Green16Le;
                self.green_mask = 0x07e0;
                self.thresh = 105 << (5 - 2 + 12);
                self.thresh_frac = 12;
                self.bytes_per_sample = 2;
            }
            SampleFormat::Rgb16Be => {
                self.func = Func::Green16Be;
                self.green_mask = 0x07e0;
                self.thresh = 105 << (5 - 2 + 12);
                self.thresh_frac = 12;
                self.bytes_per_sample = 2;
            }
        }

        if self.func == Func::Gray && low_pass {
            self.func = Func::LowPass;
            oversampling = 1;
            self.thresh <<= LP_AVG - 2;
            self.thresh_frac += LP_AVG - 2;
        }

        self.skip = sample_offset as usize * self.bytes_per_sample + skip;

        self.cri_mask = cri_mask & c_mask;
        self.cri = cri & self.cri_mask;

        // Stop searching for the CRI when CRI, FRC and payload can no
        // longer fit; this also removes a data end check from the
        // payload loop.
        let cri_samples =
            ((sampling_rate as u64 * cri_bits as u64) / cri_rate as u64) as u32;
        let data_bits = payload_bits + frc_bits;
        let data_samples =
            ((sampling_rate as u64 * data_bits as u64) / payload_rate as u64) as u32;

        self.total_bits = cri_bits + data_bits;

        if sample_offset > samples_per_line
            || cri_samples + data_samples > samples_per_line - sample_offset
        {
            bail!(
                "{} samples_per_line too small for sample_offset {} + {} cri_bits \
                 ({} samples) + {} frc_bits and {} payload_bits ({} samples)",
                samples_per_line,
                sample_offset,
                cri_bits,
                cri_samples,
                frc_bits,
                payload_bits,
                data_samples
            );
        }

        let cri_end = std::cmp::min(cri_end, samples_per_line - data_samples);

        self.cri_samples = cri_end - sample_offset;
        self.cri_rate = cri_rate;

        self.oversampling = oversampling;
        self.oversampling_rate = sampling_rate * oversampling;

        self.frc = frc & f_mask;
        self.frc_bits = frc_bits;

        // Payload bit distance in 1/256 raw samples.
        self.step = ((sampling_rate as u64 * 256) / payload_rate as u64) as u32;
        self.payload_bits = payload_bits;

        if payload_bits & 7 != 0 {
            // Bit routines.
            self.payload = payload_bits;
            self.endian = 3;
        } else {
            // Faster octet routines.
            self.payload = payload_bits >> 3;
            self.endian = 1;
        }

        match modulation {
            Modulation::NrzMsb | Modulation::NrzLsb => {
                if modulation == Modulation::NrzMsb {
                    self.endian -= 1;
                }
                self.phase_shift = (sampling_rate as f64 * 256.0 / cri_rate as f64 * 0.5
                    + self.step as f64 * 0.5
                    + 128.0) as u32;
            }
            Modulation::BiphaseMsb | Modulation::BiphaseLsb => {
                if modulation == Modulation::BiphaseMsb {
                    self.endian -= 1;
                }
                // Phase shift between the NRZ modulated CRI and the
                // biphase modulated rest.
                self.phase_shift = (sampling_rate as f64 * 256.0 / cri_rate as f64 * 0.5
                    + self.step as f64 * 0.25
                    + 128.0) as u32;
            }
        }

        Ok(())
    }

    /// Decodes one scan line of raw samples into `out`.
    ///
    /// Returns false when `out` is too small or the line does not carry
    /// the expected CRI/FRC; `out` is left unmodified in that case. The
    /// slicer adapts to the signal amplitude, so one instance should not
    /// be fed lines from different sources.
    pub fn slice(&mut self, raw: &[u8], out: &mut [u8]) -> bool {
        if self.payload_bits as usize > out.len() * 8 {
            warn!(
                "output buffer of {} bytes < {} bits of payload",
                out.len(),
                self.payload_bits
            );
            return false;
        }

        match self.func {
            Func::Null => {
                warn!("BitSlicer::set_params() not called");
                false
            }
            Func::Gray => match self.bytes_per_sample {
                1 => self.slice_core::<Gray<1>>(raw, out),
                2 => self.slice_core::<Gray<2>>(raw, out),
                3 => self.slice_core::<Gray<3>>(raw, out),
                _ => self.slice_core::<Gray<4>>(raw, out),
            },
            Func::Green16Le => self.slice_core::<Green16Le>(raw, out),
            Func::Green16Be => self.slice_core::<Green16Be>(raw, out),
            Func::LowPass => self.slice_low_pass(raw, out),
        }
    }

    fn slice_core<P: Pixel>(&mut self, raw: &[u8], out: &mut [u8]) -> bool {
        let thresh0 = self.thresh;
        let oversampling = self.oversampling as i32;
        let mut pos = self.skip;
        let mut cl: u32 = 0;
        let mut c: u32 = 0;
        let mut b1: u32 = 0;

        for _ in 0..self.cri_samples {
            let tr = self.thresh >> self.thresh_frac;
            let raw0 = green_at::<P>(raw, pos, self.green_mask);
            let raw1 = green_at::<P>(raw, pos + P::BPP, self.green_mask) - raw0;
            self.thresh += (raw0 - tr) * raw1.abs();
            let mut t = raw0 * oversampling;

            for _ in 0..oversampling {
                let tavg = (t + oversampling / 2) / oversampling;
                let b = (tavg >= tr) as u32;

                if b != b1 {
                    cl = self.oversampling_rate >> 1;
                } else {
                    cl += self.cri_rate;
                    if cl >= self.oversampling_rate {
                        cl -= self.oversampling_rate;
                        c = c.wrapping_mul(2).wrapping_add(b);
                        if c & self.cri_mask == self.cri {
                            return self.payload::<P>(raw, pos, tr, out);
                        }
                    }
                }

                b1 = b;
                if oversampling > 1 {
                    t += raw1;
                }
            }

            pos += P::BPP;
        }

        self.thresh = thresh0;
        false
    }

    /// Samples FRC and payload bits starting at the CRI match point.
    fn payload<P: Pixel>(&self, raw: &[u8], pos: usize, tr: i32, out: &mut [u8]) -> bool {
        let tr = tr * 256;
        let sample = |i: u32| -> i32 {
            let byte = pos + (i >> 8) as usize * P::BPP;
            let raw0 = green_at::<P>(raw, byte, self.green_mask);
            let raw1 = green_at::<P>(raw, byte + P::BPP, self.green_mask);
            (raw1 - raw0) * (i & 255) as i32 + (raw0 << 8)
        };

        let mut i = self.phase_shift;
        let mut c: u32 = 0;
        for _ in 0..self.frc_bits {
            c = c * 2 + (sample(i) >= tr) as u32;
            i += self.step;
        }
        if c != self.frc {
            return false;
        }

        let mut o = 0usize;
        match self.endian {
            3 => {
                // Bitwise, LSB first.
                let mut c: u32 = 0;
                for j in 0..self.payload {
                    c = (c >> 1) + (((sample(i) >= tr) as u32) << 7);
                    i += self.step;
                    if j & 7 == 7 {
                        out[o] = c as u8;
                        o += 1;
                    }
                }
                out[o] = (c >> ((8 - (self.payload % 8)) % 8)) as u8;
            }
            2 => {
                // Bitwise, MSB first.
                let mut c: u32 = 0;
                for j in 0..self.payload {
                    c = c * 2 + (sample(i) >= tr) as u32;
                    i += self.step;
                    if j & 7 == 7 {
                        out[o] = c as u8;
                        o += 1;
                    }
                }
                out[o] = (c & ((1 << (self.payload & 7)) - 1)) as u8;
            }
            1 => {
                // Octets, LSB first.
                for _ in 0..self.payload {
                    let mut c: u32 = 0;
                    for k in 0..8 {
                        c += ((sample(i) >= tr) as u32) << k;
                        i += self.step;
                    }
                    out[o] = c as u8;
                    o += 1;
                }
            }
            _ => {
                // Octets, MSB first.
                for _ in 0..self.payload {
                    let mut c: u32 = 0;
                    for _ in 0..8 {
                        c = c * 2 + (sample(i) >= tr) as u32;
                        i += self.step;
                    }
                    out[o] = c as u8;
                    o += 1;
                }
            }
        }

        true
    }

    /// Filtered path for high sampling rates: averages `1 << LP_AVG`
    /// adjacent samples instead of oversampling.
    fn slice_low_pass(&mut self, raw: &[u8], out: &mut [u8]) -> bool {
        let bps = self.bytes_per_sample;
        let window = bps << LP_AVG;
        let thresh0 = self.thresh;

        let at = |idx: usize| -> i32 {
            raw[idx.min(raw.len() - 1)] as i32
        };

        let mut base = self.skip;
        let mut cl: u32 = 0;
        let mut c: u32 = !0;
        let mut b1: u32 = 0;

        let mut raw0sum: i32 = at(base);
        {
            let mut m = bps;
            while m < window {
                raw0sum += at(base + m);
                m += bps;
            }
        }

        let mut i = self.cri_samples;
        loop {
            let tr = self.thresh >> self.thresh_frac;
            let raw0 = raw0sum;
            raw0sum = raw0sum + at(base + window) - at(base);
            base += bps;
            self.thresh += (raw0 - tr) * (raw0sum - raw0).abs();

            let b = (raw0 >= tr) as u32;

            if b != b1 {
                cl = self.oversampling_rate >> 1;
            } else {
                cl += self.cri_rate;
                if cl >= self.oversampling_rate {
                    cl -= self.oversampling_rate;
                    c = c.wrapping_mul(2).wrapping_add(b);
                    if c & self.cri_mask == self.cri {
                        break;
                    }
                }
            }

            b1 = b;

            i -= 1;
            if i == 0 {
                self.thresh = thresh0;
                return false;
            }
        }

        let tr = self.thresh >> self.thresh_frac;
        let lp_sample = |i: u32| -> i32 {
            let ii = (i >> 8) as usize * bps;
            let mut v = at(base + ii);
            let mut m = bps;
            while m < window {
                v += at(base + ii + m);
                m += bps;
            }
            v
        };

        let mut i = self.phase_shift;
        let mut c: u32 = 0;
        for _ in 0..self.frc_bits {
            c = c * 2 + (lp_sample(i) >= tr) as u32;
            i += self.step;
        }
        if c != self.frc {
            return false;
        }

        let mut o = 0usize;
        match self.endian {
            3 => {
                let mut c: u32 = 0;
                for j in 0..self.payload {
                    c = (c >> 1) + (((lp_sample(i) >= tr) as u32) << 7);
                    i += self.step;
                    if j & 7 == 7 {
                        out[o] = c as u8;
                        o += 1;
                    }
                }
                out[o] = (c >> ((8 - (self.payload % 8)) % 8)) as u8;
            }
            2 => {
                let mut c: u32 = 0;
                for j in 0..self.payload {
                    c = c * 2 + (lp_sample(i) >= tr) as u32;
                    i += self.step;
                    if j & 7 == 7 {
                        out[o] = c as u8;
                        o += 1;
                    }
                }
                out[o] = (c & ((1 << (self.payload & 7)) - 1)) as u8;
            }
            1 => {
                for _ in 0..self.payload {
                    let mut c: u32 = 0;
                    for k in 0..8 {
                        c += ((lp_sample(i) >= tr) as u32) << k;
                        i += self.step;
                    }
                    out[o] = c as u8;
                    o += 1;
                }
            }
            _ => {
                for _ in 0..self.payload {
                    let mut c: u32 = 0;
                    for _ in 0..8 {
                        c = c * 2 + (lp_sample(i) >= tr) as u32;
                        i += self.step;
                    }
                    out[o] = c as u8;
                    o += 1;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_rates() {
        let mut bs = BitSlicer::new();
        assert!(bs
            .set_params(
                SampleFormat::Y8,
                1_000_000,
                0,
                1440,
                0x5551,
                0x7ff,
                14,
                2_000_000,
                !0,
                3,
                2,
                16,
                500_000,
                Modulation::NrzLsb,
            )
            .is_err());
        // After a failed set_params slicing must fail and leave the
        // output untouched.
        let raw = [0u8; 1440];
        let mut out = [0xaau8; 4];
        assert!(!bs.slice(&raw, &mut out));
        assert_eq!(out, [0xaa; 4]);
    }

    #[test]
    fn rejects_short_line() {
        let mut bs = BitSlicer::new();
        // 14 CRI bits at 1 MHz + 18 payload bits at 0.5 MHz cannot fit
        // into 40 samples at 13.5 MHz.
        assert!(bs
            .set_params(
                SampleFormat::Y8,
                13_500_000,
                0,
                40,
                0x5551,
                0x7ff,
                14,
                1_006_976,
                !0,
                3,
                2,
                16,
                503_488,
                Modulation::NrzLsb,
            )
            .is_err());
    }

    #[test]
    fn no_cri_in_blank_line() {
        let mut bs = BitSlicer::new();
        bs.set_params(
            SampleFormat::Y8,
            13_500_000,
            0,
            1440,
            0x5551,
            0x7ff,
            14,
            1_006_976,
            !0,
            3,
            2,
            16,
            503_488,
            Modulation::NrzLsb,
        )
        .unwrap();
        let raw = [60u8; 1440];
        let mut out = [0u8; 2];
        assert!(!bs.slice(&raw, &mut out));
    }

    #[test]
    fn small_output_buffer_fails() {
        let mut bs = BitSlicer::new();
        bs.set_params(
            SampleFormat::Y8,
            13_500_000,
            0,
            1440,
            0x5551,
            0x7ff,
            14,
            1_006_976,
            !0,
            3,
            2,
            16,
            503_488,
            Modulation::NrzLsb,
        )
        .unwrap();
        let raw = [60u8; 1440];
        let mut out = [0u8; 1];
        assert!(!bs.slice(&raw, &mut out));
    }

    // End-to-end decode tests against synthesized signals live in
    // crate::sim.
}
