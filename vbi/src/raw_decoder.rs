//! Raw VBI decoder: drives up to eight bit slicers across a raw VBI
//! image and learns which scan lines carry which data service.

use failure::{bail, Error};
use log::{info, warn};

use crate::bit_slicer::BitSlicer;
use crate::sampling::SamplingPar;
use crate::services::{ServicePar, SERVICE_TABLE};
use crate::{
    ServiceSet, Sliced, MAX_SLICED_BYTES, SLICED_CAPTION_525, SLICED_CAPTION_625,
    SLICED_TELETEXT_B, SLICED_VBI_525, SLICED_VBI_625, SLICED_VPS, SLICED_VPS_F2,
};

/// Candidate services tried per scan line.
pub const MAX_WAYS: usize = 8;
/// Simultaneously decodable services.
pub const MAX_JOBS: usize = 8;

/// One slot in a pattern row.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Cell {
    /// Nothing known about this slot.
    Blank,
    /// Index into the job array.
    Job(u8),
    /// Line predicted blank; the counter is historic and never advanced,
    /// the slot still forces a full re-scan while present.
    Decay(i8),
}

impl Cell {
    fn is_job(self) -> bool {
        matches!(self, Cell::Job(_))
    }
}

#[derive(Debug)]
struct Job {
    id: ServiceSet,
    slicer: BitSlicer,
}

/// See [RawDecoder::decode].
#[derive(Debug)]
pub struct RawDecoder {
    sampling: SamplingPar,
    services: ServiceSet,
    jobs: Vec<Job>,
    /// One row per scan line, up to [MAX_WAYS] candidate slots each.
    pattern: Vec<[Cell; MAX_WAYS]>,
    /// Rolls 0..16; a blank row rotates one way when it hits zero.
    readjust: u32,
}

impl RawDecoder {
    pub fn new(sampling: SamplingPar) -> Result<RawDecoder, Error> {
        sampling.validate()?;
        Ok(RawDecoder {
            sampling,
            services: 0,
            jobs: Vec::new(),
            pattern: Vec::new(),
            readjust: 1,
        })
    }

    pub fn services(&self) -> ServiceSet {
        self.services
    }

    pub fn sampling_par(&self) -> &SamplingPar {
        &self.sampling
    }

    /// Removes all services and forgets everything learned.
    pub fn reset(&mut self) {
        self.pattern.clear();
        self.services = 0;
        self.jobs.clear();
        self.readjust = 1;
    }

    /// Replaces the sampling parameters, keeping whichever already-added
    /// services remain decodable.
    pub fn set_sampling_par(
        &mut self,
        sampling: SamplingPar,
        strict: u32,
    ) -> Result<ServiceSet, Error> {
        let services = self.services;
        self.reset();
        sampling.validate()?;
        self.sampling = sampling;
        Ok(self.add_services(services, strict))
    }

    fn scan_lines(&self) -> usize {
        (self.sampling.count[0] + self.sampling.count[1]) as usize
    }

    /// Adds services to decode; returns the set now enrolled. Services
    /// that cannot be decoded with the current sampling parameters or
    /// that exceed the decoder capacity are silently eliminated.
    pub fn add_services(&mut self, services: ServiceSet, strict: u32) -> ServiceSet {
        let mut services = services & !(SLICED_VBI_525 | SLICED_VBI_625);

        if self.services & services != 0 {
            info!("already decoding services 0x{:08x}", self.services & services);
            services &= !self.services;
        }
        if services == 0 {
            return self.services;
        }

        if self.pattern.is_empty() {
            self.pattern = vec![[Cell::Blank; MAX_WAYS]; self.scan_lines()];
        }

        for par in SERVICE_TABLE {
            if par.id & services == 0 {
                continue;
            }

            // Some jobs can be merged: Teletext-B levels share a slicer,
            // as do the two caption fields and VPS with its pseudo-F2.
            let mut job_idx = self.jobs.len();
            for (j, job) in self.jobs.iter().enumerate() {
                let id = job.id | par.id;
                if id & !SLICED_TELETEXT_B == 0
                    || id & !SLICED_CAPTION_525 == 0
                    || id & !SLICED_CAPTION_625 == 0
                    || id & !(SLICED_VPS | SLICED_VPS_F2) == 0
                {
                    job_idx = j;
                    break;
                }
            }

            if job_idx >= MAX_JOBS {
                warn!(
                    "set 0x{:08x} exceeds number of simultaneously decodable \
                     services ({})",
                    services, MAX_JOBS
                );
                break;
            }

            if self.sampling.check_services(par.id, strict) == 0 {
                continue;
            }

            let mut slicer = BitSlicer::new();
            let frc_mask = if par.frc_bits == 0 { 0 } else { (1u32 << par.frc_bits) - 1 };
            if let Err(e) = slicer.set_params(
                self.sampling.sample_format,
                self.sampling.sampling_rate,
                /* sample_offset */ 0,
                self.sampling.samples_per_line(),
                par.cri_frc >> par.frc_bits,
                par.cri_frc_mask >> par.frc_bits,
                par.cri_bits,
                par.cri_rate,
                /* cri_end */ !0,
                par.cri_frc & frc_mask,
                par.frc_bits,
                par.payload_bits,
                par.bit_rate,
                par.modulation,
            ) {
                warn!("slicer rejected service 0x{:08x} ({}): {}", par.id, par.label, e);
                continue;
            }

            let (start, count) = lines_containing_data(&self.sampling, par);

            let is_new = job_idx == self.jobs.len();
            if is_new {
                self.jobs.push(Job { id: 0, slicer });
            } else {
                self.jobs[job_idx].slicer = slicer;
            }

            if !self.add_job_to_pattern(job_idx, &start, &count) {
                warn!(
                    "out of decoder pattern space for service 0x{:08x} ({})",
                    par.id, par.label
                );
                if is_new {
                    self.jobs.pop();
                }
                continue;
            }

            self.jobs[job_idx].id |= par.id;
            self.services |= par.id;
        }

        self.services
    }

    /// Removes services; returns the set still decoded.
    pub fn remove_services(&mut self, services: ServiceSet) -> ServiceSet {
        let mut job_num = 0;
        while job_num < self.jobs.len() {
            if self.jobs[job_num].id & services != 0 {
                for row in &mut self.pattern {
                    let mut dst = 0;
                    for way in 0..MAX_WAYS {
                        match row[way] {
                            Cell::Job(n) if n as usize == job_num => {}
                            Cell::Job(n) if (n as usize) > job_num => {
                                row[dst] = Cell::Job(n - 1);
                                dst += 1;
                            }
                            cell => {
                                row[dst] = cell;
                                dst += 1;
                            }
                        }
                    }
                    for slot in row[dst..].iter_mut() {
                        *slot = Cell::Blank;
                    }
                }
                self.jobs.remove(job_num);
            } else {
                job_num += 1;
            }
        }

        self.services &= !services;
        self.services
    }

    /// Verifies way capacity, then inscribes `job_idx` into every
    /// candidate row. One null way per row is kept in reserve.
    fn add_job_to_pattern(
        &mut self,
        job_idx: usize,
        start: &[u32; 2],
        count: &[u32; 2],
    ) -> bool {
        for field in 0..2 {
            for i in 0..count[field] {
                let row = &mut self.pattern[(start[field] + i) as usize];
                let mut free = 0;
                let mut dst = 0;
                for way in 0..MAX_WAYS {
                    match row[way] {
                        Cell::Job(n) => {
                            if n as usize == job_idx {
                                free += 1;
                            }
                            row[dst] = Cell::Job(n);
                            dst += 1;
                        }
                        _ => free += 1,
                    }
                }
                for slot in row[dst..].iter_mut() {
                    *slot = Cell::Blank;
                }
                if free <= 1 {
                    return false;
                }
            }
        }

        for field in 0..2 {
            for i in 0..count[field] {
                let row = &mut self.pattern[(start[field] + i) as usize];
                let mut way = 0;
                while let Cell::Job(n) = row[way] {
                    if n as usize == job_idx {
                        break;
                    }
                    way += 1;
                }
                row[way] = Cell::Job(job_idx as u8);
                row[MAX_WAYS - 1] = Cell::Decay(-128);
            }
        }

        true
    }

    /// Decodes a raw VBI image into sliced lines, sorted by ascending
    /// line number. Returns the number of lines decoded.
    ///
    /// The image must match the sampling parameters; with interlaced
    /// sampling the two fields are woven line by line.
    pub fn decode(&mut self, raw: &[u8], sliced: &mut Vec<Sliced>, max_lines: usize) -> usize {
        if self.services == 0 {
            return 0;
        }

        let scan_lines = self.scan_lines();
        let bpl = self.sampling.bytes_per_line as usize;
        let pitch = bpl << self.sampling.interlaced as usize;
        let count0 = self.sampling.count[0] as usize;

        let before = sliced.len();

        for i in 0..scan_lines {
            if sliced.len() - before >= max_lines {
                break;
            }

            let offset = if self.sampling.interlaced {
                if i < count0 {
                    i * pitch
                } else {
                    bpl + (i - count0) * pitch
                }
            } else {
                i * bpl
            };
            if offset + bpl > raw.len() {
                warn!("raw image too short at scan line {}", i);
                break;
            }

            self.decode_pattern(i, &raw[offset..offset + bpl], sliced);
        }

        self.readjust = (self.readjust + 1) & 15;

        sliced[before..].sort_by_key(|s| s.line);
        sliced.len() - before
    }

    fn line_number(&self, row: usize) -> u32 {
        let sp = &self.sampling;
        if row >= sp.count[0] as usize {
            if sp.synchronous && sp.start[1] != 0 {
                sp.start[1] + row as u32 - sp.count[0]
            } else {
                0
            }
        } else if sp.synchronous && sp.start[0] != 0 {
            sp.start[0] + row as u32
        } else {
            0
        }
    }

    fn decode_pattern(&mut self, row_idx: usize, line: &[u8], sliced: &mut Vec<Sliced>) {
        let line_number = self.line_number(row_idx);
        let row = &mut self.pattern[row_idx];
        let mut way = 0;

        loop {
            let cell = row[way];

            if let Cell::Job(jn) = cell {
                let job = &mut self.jobs[jn as usize];
                let mut data = [0u8; MAX_SLICED_BYTES];
                if !job.slicer.slice(line, &mut data) {
                    // No match, try the next data service.
                    way += 1;
                    continue;
                }

                // Positive match, output the decoded line.
                sliced.push(Sliced {
                    id: job.id,
                    line: line_number,
                    data,
                });

                // Predict the line as non-blank and force testing all
                // data services over the next frames.
                row[MAX_WAYS - 1] = Cell::Decay(-128);
            } else if way == 0 {
                // Line was predicted blank; once in 16 frames look for
                // data services again.
                if self.readjust == 0 {
                    row.rotate_left(1);
                }
                break;
            } else if matches!(row[MAX_WAYS - 1], Cell::Decay(_)) {
                break;
            }

            // Try the found data service first next time.
            row[way] = row[0];
            row[0] = cell;
            break;
        }
    }
}

/// Rows of the pattern matrix that may carry `par`'s data.
fn lines_containing_data(sp: &SamplingPar, par: &ServicePar) -> ([u32; 2], [u32; 2]) {
    let mut start = [0, sp.count[0]];
    let mut count = [sp.count[0], sp.count[1]];

    if !sp.synchronous {
        // Without known field order every line may carry the data.
        return (start, count);
    }

    for field in 0..2 {
        if par.first[field] == 0 || par.last[field] == 0 {
            // No data on this field.
            count[field] = 0;
            continue;
        }

        let sp_first = sp.start[field];
        let sp_last = sp_first + sp.count[field].saturating_sub(1);

        if sp_first > 0 && sp.count[field] > 0 {
            if par.first[field] > sp_last || par.last[field] < sp_first {
                continue;
            }
            let first = sp_first.max(par.first[field]);
            let last = sp_last.min(par.last[field]);
            start[field] += first - sp_first;
            count[field] = last + 1 - first;
        }
    }

    (start, count)
}

/// Convenience constructor used when the caller already knows both the
/// sampling parameters and the services.
pub fn decoder_for_services(
    sampling: SamplingPar,
    services: ServiceSet,
    strict: u32,
) -> Result<(RawDecoder, ServiceSet), Error> {
    let mut rd = RawDecoder::new(sampling)?;
    let enrolled = rd.add_services(services, strict);
    if enrolled == 0 {
        bail!("none of services 0x{:08x} can be decoded", services);
    }
    Ok((rd, enrolled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::from_services;
    use crate::{SLICED_CAPTION_525_F1, SLICED_CAPTION_525_F2};

    fn caption_decoder() -> RawDecoder {
        let (sp, _, _) = from_services(0, SLICED_CAPTION_525).unwrap();
        let (rd, enrolled) = decoder_for_services(sp, SLICED_CAPTION_525, 1).unwrap();
        assert_eq!(enrolled, SLICED_CAPTION_525);
        rd
    }

    #[test]
    fn caption_fields_merge_into_one_job() {
        let rd = caption_decoder();
        assert_eq!(rd.jobs.len(), 1);
        assert_eq!(rd.jobs[0].id, SLICED_CAPTION_525);
        // Both caption rows carry the job and the forced re-scan marker.
        assert_eq!(rd.pattern.len(), 2);
        for row in &rd.pattern {
            assert_eq!(row[0], Cell::Job(0));
            assert_eq!(row[MAX_WAYS - 1], Cell::Decay(-128));
        }
    }

    #[test]
    fn remove_services_clears_pattern() {
        let mut rd = caption_decoder();
        assert_eq!(rd.remove_services(SLICED_CAPTION_525_F1 | SLICED_CAPTION_525_F2), 0);
        assert!(rd.jobs.is_empty());
        for row in &rd.pattern {
            assert!(!row.iter().any(|c| c.is_job()));
        }
    }

    #[test]
    fn blank_image_decodes_nothing() {
        let mut rd = caption_decoder();
        let sp = rd.sampling_par().clone();
        let raw = vec![50u8; (sp.bytes_per_line * (sp.count[0] + sp.count[1])) as usize];
        let mut sliced = Vec::new();
        assert_eq!(rd.decode(&raw, &mut sliced, 52), 0);
    }

    // Positive decode tests against synthesized images live in crate::sim.
}
