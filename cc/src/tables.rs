//! The CDP framerate table.

use media::Fraction;

/// One row of the closed CDP framerate set: byte counts per frame are a
/// function of the output framerate.
#[derive(Debug, PartialEq, Eq)]
pub struct CdpFpsEntry {
    /// Value stored in the CDP framing.
    pub fps_idx: u8,
    pub fps_n: u32,
    pub fps_d: u32,
    pub max_cc_count: usize,
    pub max_ccp_count: usize,
    pub max_cea608_count: usize,
}

impl CdpFpsEntry {
    pub fn fps(&self) -> Fraction {
        Fraction::new(self.fps_n as i32, self.fps_d as i32)
    }

    pub fn is_null(&self) -> bool {
        self.fps_n == 0
    }
}

pub static CDP_FPS_TABLE: &[CdpFpsEntry] = &[
    // FIXME: alternating max cea608 count at 24000/1001!
    CdpFpsEntry { fps_idx: 0x1f, fps_n: 24000, fps_d: 1001, max_cc_count: 25, max_ccp_count: 22, max_cea608_count: 3 },
    CdpFpsEntry { fps_idx: 0x2f, fps_n: 24, fps_d: 1, max_cc_count: 25, max_ccp_count: 22, max_cea608_count: 2 },
    CdpFpsEntry { fps_idx: 0x3f, fps_n: 25, fps_d: 1, max_cc_count: 24, max_ccp_count: 22, max_cea608_count: 2 },
    CdpFpsEntry { fps_idx: 0x4f, fps_n: 30000, fps_d: 1001, max_cc_count: 20, max_ccp_count: 18, max_cea608_count: 2 },
    CdpFpsEntry { fps_idx: 0x5f, fps_n: 30, fps_d: 1, max_cc_count: 20, max_ccp_count: 18, max_cea608_count: 2 },
    CdpFpsEntry { fps_idx: 0x6f, fps_n: 50, fps_d: 1, max_cc_count: 12, max_ccp_count: 11, max_cea608_count: 1 },
    CdpFpsEntry { fps_idx: 0x7f, fps_n: 60000, fps_d: 1001, max_cc_count: 10, max_ccp_count: 9, max_cea608_count: 1 },
    CdpFpsEntry { fps_idx: 0x8f, fps_n: 60, fps_d: 1, max_cc_count: 10, max_ccp_count: 9, max_cea608_count: 1 },
];

pub static NULL_FPS_ENTRY: CdpFpsEntry = CdpFpsEntry {
    fps_idx: 0,
    fps_n: 0,
    fps_d: 0,
    max_cc_count: 0,
    max_ccp_count: 0,
    max_cea608_count: 0,
};

pub fn cdp_fps_entry_from_fps(fps_n: u32, fps_d: u32) -> &'static CdpFpsEntry {
    CDP_FPS_TABLE
        .iter()
        .find(|e| e.fps_n == fps_n && e.fps_d == fps_d)
        .unwrap_or(&NULL_FPS_ENTRY)
}

pub fn cdp_fps_entry_from_id(id: u8) -> &'static CdpFpsEntry {
    CDP_FPS_TABLE
        .iter()
        .find(|e| e.fps_idx == id)
        .unwrap_or(&NULL_FPS_ENTRY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup() {
        assert_eq!(cdp_fps_entry_from_fps(30000, 1001).fps_idx, 0x4f);
        assert_eq!(cdp_fps_entry_from_id(0x3f).fps_n, 25);
        assert!(cdp_fps_entry_from_fps(30000, 1000).is_null());
        assert!(cdp_fps_entry_from_id(0x00).is_null());
    }

    #[test]
    fn counts_are_consistent() {
        for e in CDP_FPS_TABLE {
            assert!(e.max_ccp_count + e.max_cea608_count <= e.max_cc_count);
        }
    }
}
