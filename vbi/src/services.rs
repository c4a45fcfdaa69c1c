//! The closed catalog of VBI data services.

use crate::bit_slicer::Modulation;
use crate::{ServiceSet, VideoStdSet};

/// Service requires field order to be known.
pub const SP_FIELD_NUM: u32 = 1 << 0;
/// Service requires line numbers to be known.
pub const SP_LINE_NUM: u32 = 1 << 1;

/// One row of the service table.
#[derive(Debug)]
pub struct ServicePar {
    pub id: ServiceSet,
    pub label: &'static str,
    pub videostd_set: VideoStdSet,
    /// Most scan systems send data in both fields; first/last ITU-R line
    /// numbers per field, 0 if the field carries no data.
    pub first: [u32; 2],
    pub last: [u32; 2],
    /// Leading edge of hsync to leading edge of data, in nanoseconds.
    pub offset_ns: u32,
    pub cri_rate: u32,
    pub bit_rate: u32,
    /// CRI and FRC concatenated, lsb = last FRC bit transmitted.
    pub cri_frc: u32,
    pub cri_frc_mask: u32,
    pub cri_bits: u32,
    pub frc_bits: u32,
    pub payload_bits: u32,
    pub modulation: Modulation,
    pub flags: u32,
}

use crate::*;

pub static SERVICE_TABLE: &[ServicePar] = &[
    ServicePar {
        id: SLICED_TELETEXT_A,
        label: "Teletext System A",
        videostd_set: VIDEOSTD_SET_625_50,
        first: [6, 318],
        last: [22, 335],
        offset_ns: 10500,
        cri_rate: 6_203_125,
        bit_rate: 6_203_125,
        cri_frc: 0x00aa_aae7,
        cri_frc_mask: 0xffff,
        cri_bits: 18,
        frc_bits: 6,
        payload_bits: 37 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
    ServicePar {
        id: SLICED_TELETEXT_B_L10_625,
        label: "Teletext System B 625 Level 1.5",
        videostd_set: VIDEOSTD_SET_625_50,
        first: [7, 320],
        last: [22, 335],
        offset_ns: 10300,
        cri_rate: 6_937_500,
        bit_rate: 6_937_500,
        cri_frc: 0x00aa_aae4,
        cri_frc_mask: 0xffff,
        cri_bits: 18,
        frc_bits: 6,
        payload_bits: 42 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
    ServicePar {
        id: SLICED_TELETEXT_B,
        label: "Teletext System B, 625",
        videostd_set: VIDEOSTD_SET_625_50,
        first: [6, 318],
        last: [22, 335],
        offset_ns: 10300,
        cri_rate: 6_937_500,
        bit_rate: 6_937_500,
        cri_frc: 0x00aa_aae4,
        cri_frc_mask: 0xffff,
        cri_bits: 18,
        frc_bits: 6,
        payload_bits: 42 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
    ServicePar {
        id: SLICED_TELETEXT_C_625,
        label: "Teletext System C 625",
        videostd_set: VIDEOSTD_SET_625_50,
        first: [6, 318],
        last: [22, 335],
        offset_ns: 10480,
        cri_rate: 5_734_375,
        bit_rate: 5_734_375,
        cri_frc: 0x00aa_aae7,
        cri_frc_mask: 0xffff,
        cri_bits: 18,
        frc_bits: 6,
        payload_bits: 33 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
    ServicePar {
        id: SLICED_TELETEXT_D_625,
        label: "Teletext System D 625",
        videostd_set: VIDEOSTD_SET_625_50,
        first: [6, 318],
        last: [22, 335],
        offset_ns: 10500,
        cri_rate: 5_642_787,
        bit_rate: 5_642_787,
        cri_frc: 0x00aa_aae5,
        cri_frc_mask: 0xffff,
        cri_bits: 18,
        frc_bits: 6,
        payload_bits: 34 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
    ServicePar {
        id: SLICED_VPS,
        label: "Video Program System",
        videostd_set: VIDEOSTD_SET_PAL_BG,
        first: [16, 0],
        last: [16, 0],
        offset_ns: 12500,
        cri_rate: 5_000_000,
        bit_rate: 2_500_000,
        cri_frc: 0xaaaa_8a99,
        cri_frc_mask: 0xff_ffff,
        cri_bits: 32,
        frc_bits: 0,
        payload_bits: 13 * 8,
        modulation: Modulation::BiphaseMsb,
        flags: SP_FIELD_NUM,
    },
    ServicePar {
        id: SLICED_VPS_F2,
        label: "Pseudo-VPS on field 2",
        videostd_set: VIDEOSTD_SET_PAL_BG,
        first: [0, 329],
        last: [0, 329],
        offset_ns: 12500,
        cri_rate: 5_000_000,
        bit_rate: 2_500_000,
        cri_frc: 0xaaaa_8a99,
        cri_frc_mask: 0xff_ffff,
        cri_bits: 32,
        frc_bits: 0,
        payload_bits: 13 * 8,
        modulation: Modulation::BiphaseMsb,
        flags: SP_FIELD_NUM,
    },
    ServicePar {
        id: SLICED_WSS_625,
        label: "Wide Screen Signalling 625",
        videostd_set: VIDEOSTD_SET_625_50,
        first: [23, 0],
        last: [23, 0],
        offset_ns: 11000,
        cri_rate: 5_000_000,
        bit_rate: 833_333,
        cri_frc: 0x8e3c_783e,
        cri_frc_mask: 0x2499_339c,
        cri_bits: 32,
        frc_bits: 0,
        payload_bits: 14,
        modulation: Modulation::BiphaseLsb,
        flags: SP_FIELD_NUM | SP_LINE_NUM,
    },
    ServicePar {
        id: SLICED_CAPTION_625_F1,
        label: "Closed Caption 625, field 1",
        videostd_set: VIDEOSTD_SET_625_50,
        first: [22, 0],
        last: [22, 0],
        offset_ns: 10500,
        cri_rate: 1_000_000,
        bit_rate: 500_000,
        cri_frc: 0x0000_5551,
        cri_frc_mask: 0x7ff,
        cri_bits: 14,
        frc_bits: 2,
        payload_bits: 2 * 8,
        modulation: Modulation::NrzLsb,
        flags: SP_FIELD_NUM,
    },
    ServicePar {
        id: SLICED_CAPTION_625_F2,
        label: "Closed Caption 625, field 2",
        videostd_set: VIDEOSTD_SET_625_50,
        first: [0, 335],
        last: [0, 335],
        offset_ns: 10500,
        cri_rate: 1_000_000,
        bit_rate: 500_000,
        cri_frc: 0x0000_5551,
        cri_frc_mask: 0x7ff,
        cri_bits: 14,
        frc_bits: 2,
        payload_bits: 2 * 8,
        modulation: Modulation::NrzLsb,
        flags: SP_FIELD_NUM,
    },
    ServicePar {
        id: SLICED_VBI_625,
        label: "VBI 625",
        videostd_set: VIDEOSTD_SET_625_50,
        first: [6, 318],
        last: [22, 335],
        offset_ns: 10000,
        cri_rate: 1_510_000,
        bit_rate: 1_510_000,
        cri_frc: 0,
        cri_frc_mask: 0,
        cri_bits: 0,
        frc_bits: 0,
        payload_bits: 10 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
    ServicePar {
        id: SLICED_TELETEXT_B_525,
        label: "Teletext System B 525",
        videostd_set: VIDEOSTD_SET_525_60,
        first: [10, 272],
        last: [21, 284],
        offset_ns: 10500,
        cri_rate: 5_727_272,
        bit_rate: 5_727_272,
        cri_frc: 0x00aa_aae4,
        cri_frc_mask: 0xffff,
        cri_bits: 18,
        frc_bits: 6,
        payload_bits: 34 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
    ServicePar {
        id: SLICED_TELETEXT_C_525,
        label: "Teletext System C 525",
        videostd_set: VIDEOSTD_SET_525_60,
        first: [10, 272],
        last: [21, 284],
        offset_ns: 10480,
        cri_rate: 5_727_272,
        bit_rate: 5_727_272,
        cri_frc: 0x00aa_aae7,
        cri_frc_mask: 0xffff,
        cri_bits: 18,
        frc_bits: 6,
        payload_bits: 33 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
    ServicePar {
        id: SLICED_TELETEXT_D_525,
        label: "Teletext System D 525",
        videostd_set: VIDEOSTD_SET_525_60,
        first: [10, 272],
        last: [21, 284],
        offset_ns: 9780,
        cri_rate: 5_727_272,
        bit_rate: 5_727_272,
        cri_frc: 0x00aa_aae5,
        cri_frc_mask: 0xffff,
        cri_bits: 18,
        frc_bits: 6,
        payload_bits: 34 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
    ServicePar {
        id: SLICED_CAPTION_525_F1,
        label: "Closed Caption 525, field 1",
        videostd_set: VIDEOSTD_SET_525_60,
        first: [21, 0],
        last: [21, 0],
        offset_ns: 10500,
        cri_rate: 1_006_976,
        bit_rate: 503_488,
        // CC signals have been observed on other lines; the full CRI is
        // needed to tell them apart from the transmitted data.
        cri_frc: 0x0000_5551,
        cri_frc_mask: 0x7ff,
        cri_bits: 14,
        frc_bits: 2,
        payload_bits: 2 * 8,
        modulation: Modulation::NrzLsb,
        flags: SP_FIELD_NUM | SP_LINE_NUM,
    },
    ServicePar {
        id: SLICED_CAPTION_525_F2,
        label: "Closed Caption 525, field 2",
        videostd_set: VIDEOSTD_SET_525_60,
        first: [0, 284],
        last: [0, 284],
        offset_ns: 10500,
        cri_rate: 1_006_976,
        bit_rate: 503_488,
        cri_frc: 0x0000_5551,
        cri_frc_mask: 0x7ff,
        cri_bits: 14,
        frc_bits: 2,
        payload_bits: 2 * 8,
        modulation: Modulation::NrzLsb,
        flags: SP_FIELD_NUM | SP_LINE_NUM,
    },
    ServicePar {
        id: SLICED_2X_CAPTION_525,
        label: "2xCaption 525",
        videostd_set: VIDEOSTD_SET_525_60,
        first: [10, 0],
        last: [21, 0],
        offset_ns: 10500,
        cri_rate: 1_006_976,
        bit_rate: 1_006_976,
        cri_frc: 0x0005_54ed,
        cri_frc_mask: 0xffff,
        cri_bits: 12,
        frc_bits: 8,
        payload_bits: 4 * 8,
        modulation: Modulation::NrzLsb,
        flags: SP_FIELD_NUM,
    },
    ServicePar {
        id: SLICED_VBI_525,
        label: "VBI 525",
        videostd_set: VIDEOSTD_SET_525_60,
        first: [10, 272],
        last: [21, 284],
        offset_ns: 9500,
        cri_rate: 1_510_000,
        bit_rate: 1_510_000,
        cri_frc: 0,
        cri_frc_mask: 0,
        cri_bits: 0,
        frc_bits: 0,
        payload_bits: 10 * 8,
        modulation: Modulation::NrzLsb,
        flags: 0,
    },
];

pub fn find(service: ServiceSet) -> Option<&'static ServicePar> {
    SERVICE_TABLE.iter().find(|par| par.id == service)
}

/// Human readable name of a service (set).
pub fn name(service: ServiceSet) -> Option<&'static str> {
    // These sets are ambiguous in the table.
    if service == SLICED_CAPTION_525 {
        return Some("Closed Caption 525");
    }
    if service == SLICED_CAPTION_625 {
        return Some("Closed Caption 625");
    }
    if service == SLICED_VPS | SLICED_VPS_F2 {
        return Some("Video Program System");
    }
    if service == SLICED_TELETEXT_B_L25_625 {
        return Some("Teletext System B 625 Level 2.5");
    }
    find(service).map(|par| par.label)
}

/// Number of payload bits of a service, 0 if unknown.
pub fn payload_bits(service: ServiceSet) -> u32 {
    if service == SLICED_CAPTION_525 || service == SLICED_CAPTION_625 {
        return 16;
    }
    if service == SLICED_VPS | SLICED_VPS_F2 {
        return 13 * 8;
    }
    if service == SLICED_TELETEXT_B_L25_625 {
        return 42 * 8;
    }
    find(service).map(|par| par.payload_bits).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        assert_eq!(name(SLICED_CAPTION_525_F1), Some("Closed Caption 525, field 1"));
        assert_eq!(name(SLICED_CAPTION_525), Some("Closed Caption 525"));
        assert_eq!(payload_bits(SLICED_CAPTION_525), 16);
        assert_eq!(payload_bits(SLICED_TELETEXT_B), 42 * 8);
        assert_eq!(payload_bits(0x1234_5678), 0);
    }

    #[test]
    fn caption_constants() {
        let par = find(SLICED_CAPTION_525_F1).unwrap();
        assert_eq!(par.cri_rate, 1_006_976);
        assert_eq!(par.bit_rate, 503_488);
        assert_eq!(par.cri_frc >> par.frc_bits, 0x1554);
        assert_eq!(par.cri_frc & ((1 << par.frc_bits) - 1), 0x1);
    }
}
