//! SMPTE timecode handling.
//!
//! Only what the caption and MXF paths need: validity under drop-frame
//! rules, frame stepping, and conversion to/from a flat frame count.

use crate::Fraction;

/// A video timecode at a given frame rate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Timecode {
    pub fps: Fraction,
    pub drop_frame: bool,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
    pub frames: u32,
    /// 1 for the first (or only) field, 2 for the second.
    pub field_count: u32,
}

impl Timecode {
    pub fn new(
        fps: Fraction,
        drop_frame: bool,
        hours: u32,
        minutes: u32,
        seconds: u32,
        frames: u32,
        field_count: u32,
    ) -> Timecode {
        Timecode {
            fps,
            drop_frame,
            hours,
            minutes,
            seconds,
            frames,
            field_count,
        }
    }

    /// Frames per second rounded up; frame numbers must stay below this.
    fn frames_per_second(&self) -> u32 {
        ((self.fps.n as u64 + self.fps.d as u64 - 1) / self.fps.d as u64) as u32
    }

    /// Whether every field is in range, including the drop-frame rule:
    /// frame numbers 0 and 1 do not exist in the first second of any
    /// minute not divisible by ten.
    pub fn is_valid(&self) -> bool {
        if !self.fps.is_valid() {
            return false;
        }
        if self.hours >= 24
            || self.minutes >= 60
            || self.seconds >= 60
            || self.frames >= self.frames_per_second()
        {
            return false;
        }
        if self.field_count != 1 && self.field_count != 2 {
            return false;
        }
        if self.drop_frame
            && self.seconds == 0
            && self.minutes % 10 != 0
            && self.frames < 2
        {
            return false;
        }
        true
    }

    /// Steps one frame forward, skipping dropped frame numbers.
    pub fn increment(&mut self) {
        self.frames += 1;
        let fps = self.frames_per_second();
        if self.frames >= fps {
            self.frames = 0;
            self.seconds += 1;
            if self.seconds >= 60 {
                self.seconds = 0;
                self.minutes += 1;
                if self.minutes >= 60 {
                    self.minutes = 0;
                    self.hours = (self.hours + 1) % 24;
                }
            }
        }
        if self.drop_frame
            && self.seconds == 0
            && self.minutes % 10 != 0
            && self.frames < 2
        {
            self.frames = 2;
        }
    }

    /// Flat frame count since 00:00:00:00, honoring dropped frames.
    pub fn to_frames(&self) -> u64 {
        let fps = self.frames_per_second() as u64;
        let total_minutes = (self.hours * 60 + self.minutes) as u64;
        let mut frames =
            total_minutes * 60 * fps + self.seconds as u64 * fps + self.frames as u64;
        if self.drop_frame {
            // Two frames dropped every minute except every tenth.
            frames -= 2 * (total_minutes - total_minutes / 10);
        }
        frames
    }
}

impl std::fmt::Display for Timecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours,
            self.minutes,
            self.seconds,
            if self.drop_frame { ';' } else { ':' },
            self.frames
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ntsc() -> Fraction {
        Fraction::new(30000, 1001)
    }

    #[test]
    fn drop_frame_validity() {
        let tc = Timecode::new(ntsc(), true, 0, 1, 0, 0, 1);
        assert!(!tc.is_valid());
        let tc = Timecode::new(ntsc(), true, 0, 1, 0, 2, 1);
        assert!(tc.is_valid());
        // Every tenth minute keeps frames 0 and 1.
        let tc = Timecode::new(ntsc(), true, 0, 10, 0, 0, 1);
        assert!(tc.is_valid());
        // Non-drop has no holes.
        let tc = Timecode::new(Fraction::new(30, 1), false, 0, 1, 0, 0, 1);
        assert!(tc.is_valid());
    }

    #[test]
    fn increment_skips_dropped_frames() {
        let mut tc = Timecode::new(ntsc(), true, 0, 0, 59, 29, 1);
        tc.increment();
        assert_eq!((tc.minutes, tc.seconds, tc.frames), (1, 0, 2));
        let mut tc = Timecode::new(ntsc(), true, 0, 9, 59, 29, 1);
        tc.increment();
        assert_eq!((tc.minutes, tc.seconds, tc.frames), (10, 0, 0));
    }

    #[test]
    fn frame_count_round_trip() {
        // 00:01:00;02 is the 1798th frame of drop-frame NTSC.
        let tc = Timecode::new(ntsc(), true, 0, 1, 0, 2, 1);
        assert_eq!(tc.to_frames(), 1800 - 2);
    }

    #[test]
    fn display() {
        let tc = Timecode::new(ntsc(), true, 1, 2, 3, 4, 1);
        assert_eq!(tc.to_string(), "01:02:03;04");
        let tc = Timecode::new(Fraction::new(25, 1), false, 1, 2, 3, 4, 1);
        assert_eq!(tc.to_string(), "01:02:03:04");
    }
}
