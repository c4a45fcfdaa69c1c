//! CEA-708 service stream decoding: DTVCC packets, service blocks, and
//! the per-service eight-window state machine.

use log::{debug, trace, warn};

/// Windows per service.
pub const MAX_WINDOWS: usize = 8;
/// Maximum DTVCC packet payload.
pub const DTVCC_LENGTH: usize = 128;

/// The nine anchor positions of a caption window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnchorPoint {
    TopLeft,
    TopCenter,
    TopRight,
    MiddleLeft,
    Center,
    MiddleRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl AnchorPoint {
    fn from_code(code: u8) -> AnchorPoint {
        match code & 0x0f {
            0 => AnchorPoint::TopLeft,
            1 => AnchorPoint::TopCenter,
            2 => AnchorPoint::TopRight,
            3 => AnchorPoint::MiddleLeft,
            4 => AnchorPoint::Center,
            5 => AnchorPoint::MiddleRight,
            6 => AnchorPoint::BottomLeft,
            7 => AnchorPoint::BottomCenter,
            _ => AnchorPoint::BottomRight,
        }
    }

    pub fn is_left(self) -> bool {
        matches!(
            self,
            AnchorPoint::TopLeft | AnchorPoint::MiddleLeft | AnchorPoint::BottomLeft
        )
    }

    pub fn is_center(self) -> bool {
        matches!(
            self,
            AnchorPoint::TopCenter | AnchorPoint::Center | AnchorPoint::BottomCenter
        )
    }

    pub fn is_top(self) -> bool {
        matches!(
            self,
            AnchorPoint::TopLeft | AnchorPoint::TopCenter | AnchorPoint::TopRight
        )
    }

    pub fn is_middle(self) -> bool {
        matches!(
            self,
            AnchorPoint::MiddleLeft | AnchorPoint::Center | AnchorPoint::MiddleRight
        )
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum JustifyMode {
    Left,
    Right,
    Center,
    Full,
}

/// Rasterized text of a window, pre-multiplied ARGB.
#[derive(Clone, Default)]
pub struct TextImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for TextImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// One caption window.
#[derive(Clone, Debug)]
pub struct Window {
    pub visible: bool,
    pub deleted: bool,
    /// Needs redraw.
    pub updated: bool,
    pub anchor_point: AnchorPoint,
    pub relative_position: bool,
    /// Vertical / horizontal anchor as a screen fraction in percent.
    pub screen_vertical: u32,
    pub screen_horizontal: u32,
    pub justify_mode: JustifyMode,
    pub row_count: u32,
    pub column_count: u32,
    pub v_offset: i32,
    pub h_offset: i32,
    pub image_width: u32,
    pub image_height: u32,
    pub text_image: Option<TextImage>,
    /// Text rows accumulated since the last clear.
    pub rows: Vec<String>,
    pub pen_row: usize,
    pub pen_column: usize,
    /// Latest pen color command, packed as (fg, bg, edge).
    pub pen_color: (u8, u8, u8),
    /// Latest pen attributes command, packed as (size/offset, style).
    pub pen_attributes: (u8, u8),
}

impl Default for Window {
    fn default() -> Window {
        Window {
            visible: false,
            deleted: true,
            updated: false,
            anchor_point: AnchorPoint::BottomCenter,
            relative_position: false,
            screen_vertical: 0,
            screen_horizontal: 0,
            justify_mode: JustifyMode::Left,
            row_count: 0,
            column_count: 0,
            v_offset: 0,
            h_offset: 0,
            image_width: 0,
            image_height: 0,
            text_image: None,
            rows: Vec::new(),
            pen_row: 0,
            pen_column: 0,
            pen_color: (0, 0, 0),
            pen_attributes: (0, 0),
        }
    }
}

impl Window {
    fn clear_text(&mut self) {
        self.rows.clear();
        self.pen_row = 0;
        self.pen_column = 0;
    }

    fn put_char(&mut self, c: char) {
        while self.rows.len() <= self.pen_row {
            self.rows.push(String::new());
        }
        let row = &mut self.rows[self.pen_row];
        while row.chars().count() < self.pen_column {
            row.push(' ');
        }
        row.push(c);
        self.pen_column = row.chars().count();
        self.updated = true;
    }

    /// The rows joined for the rasterizer.
    pub fn text(&self) -> String {
        self.rows.join("\n")
    }
}

/// Decoder for one selected CEA-708 caption service.
#[derive(Debug)]
pub struct Cea708Dec {
    /// 1..63; 1 is the primary caption service.
    pub desired_service: i32,
    current_window: usize,
    pub windows: [Window; MAX_WINDOWS],
}

impl Cea708Dec {
    pub fn new(desired_service: i32) -> Cea708Dec {
        Cea708Dec {
            desired_service,
            current_window: 0,
            windows: Default::default(),
        }
    }

    pub fn set_service(&mut self, service: i32) {
        self.desired_service = service;
        self.reset();
    }

    fn reset(&mut self) {
        for w in &mut self.windows {
            *w = Window::default();
        }
        self.current_window = 0;
    }

    /// Handles one complete DTVCC packet. Returns true when any window
    /// needs redraw (visible, not deleted, updated).
    pub fn process_dtvcc_packet(&mut self, packet: &[u8]) -> bool {
        if packet.is_empty() {
            return false;
        }

        // sequence_number (2 bits) | packet_size (6 bits); a size of 0
        // means the maximum of 127 bytes.
        let packet_size = match packet[0] & 0x3f {
            0 => 127,
            n => (n as usize) * 2 - 1,
        };
        let mut payload = &packet[1..];
        if payload.len() > packet_size {
            payload = &payload[..packet_size];
        }
        trace!(
            "dtvcc packet seq {} payload {} bytes",
            packet[0] >> 6,
            payload.len()
        );

        let mut pos = 0;
        while pos < payload.len() {
            let b = payload[pos];
            if b == 0 {
                break;
            }
            let mut service_number = (b >> 5) as i32;
            let block_size = (b & 0x1f) as usize;
            pos += 1;

            if service_number == 7 {
                // Extended service number.
                if pos >= payload.len() {
                    break;
                }
                service_number = (payload[pos] & 0x3f) as i32;
                pos += 1;
            }

            if pos + block_size > payload.len() {
                warn!(
                    "service block of {} bytes exceeds packet payload ({})",
                    block_size,
                    payload.len() - pos
                );
                break;
            }

            if service_number == self.desired_service {
                self.process_service_block(&payload[pos..pos + block_size]);
            }
            pos += block_size;
        }

        self.windows
            .iter()
            .any(|w| w.updated && w.visible && !w.deleted)
    }

    fn window_bitmap(&mut self, bits: u8, f: impl Fn(&mut Window)) {
        for (i, w) in self.windows.iter_mut().enumerate() {
            if bits & (1 << i) != 0 {
                f(w);
            }
        }
    }

    fn process_service_block(&mut self, block: &[u8]) {
        let mut i = 0;
        while i < block.len() {
            let c = block[i];
            match c {
                0x00 => i += 1, // NUL
                0x03 => {
                    // ETX: end of text.
                    self.windows[self.current_window].updated = true;
                    i += 1;
                }
                0x08 => {
                    // Backspace.
                    let w = &mut self.windows[self.current_window];
                    if let Some(row) = w.rows.get_mut(w.pen_row) {
                        row.pop();
                        w.pen_column = w.pen_column.saturating_sub(1);
                        w.updated = true;
                    }
                    i += 1;
                }
                0x0c => {
                    // FF: clear and home.
                    let w = &mut self.windows[self.current_window];
                    w.clear_text();
                    w.updated = true;
                    i += 1;
                }
                0x0d => {
                    // CR.
                    let w = &mut self.windows[self.current_window];
                    w.pen_row += 1;
                    w.pen_column = 0;
                    w.updated = true;
                    i += 1;
                }
                0x0e => {
                    // HCR: erase the current row.
                    let w = &mut self.windows[self.current_window];
                    if let Some(row) = w.rows.get_mut(w.pen_row) {
                        row.clear();
                    }
                    w.pen_column = 0;
                    w.updated = true;
                    i += 1;
                }
                0x10 => {
                    // EXT1: G2/G3 character set.
                    if i + 1 < block.len() {
                        let g2 = match block[i + 1] {
                            0x20 => Some(' '),   // transparent space
                            0x21 => Some(' '),   // non-breaking transparent space
                            0x25 => Some('\u{2026}'),
                            0x2a => Some('\u{160}'),
                            0x39 => Some('\u{2122}'),
                            0x3c => Some('\u{153}'),
                            0x3d => Some('\u{2120}'),
                            0x76 => Some('\u{215b}'),
                            0x7f => Some('\u{266a}'),
                            _ => None,
                        };
                        if let Some(ch) = g2 {
                            self.windows[self.current_window].put_char(ch);
                        }
                    }
                    i += 2;
                }
                0x18 => {
                    // P16: two byte code, unsupported glyphs are skipped.
                    i += 3;
                }
                0x01..=0x0f => i += 1,
                0x11..=0x17 => i += 2,
                0x19..=0x1f => i += 3,
                0x20..=0x7f => {
                    let ch = if c == 0x7f { '\u{266a}' } else { c as char };
                    self.windows[self.current_window].put_char(ch);
                    i += 1;
                }
                0x80..=0x87 => {
                    self.current_window = (c & 0x07) as usize;
                    i += 1;
                }
                0x88 => {
                    // ClearWindows.
                    if i + 1 < block.len() {
                        self.window_bitmap(block[i + 1], |w| {
                            w.clear_text();
                            w.updated = true;
                        });
                    }
                    i += 2;
                }
                0x89 => {
                    // DisplayWindows.
                    if i + 1 < block.len() {
                        self.window_bitmap(block[i + 1], |w| {
                            if !w.visible {
                                w.visible = true;
                                w.updated = true;
                            }
                        });
                    }
                    i += 2;
                }
                0x8a => {
                    // HideWindows.
                    if i + 1 < block.len() {
                        self.window_bitmap(block[i + 1], |w| {
                            if w.visible {
                                w.visible = false;
                                w.updated = true;
                            }
                        });
                    }
                    i += 2;
                }
                0x8b => {
                    // ToggleWindows.
                    if i + 1 < block.len() {
                        self.window_bitmap(block[i + 1], |w| {
                            w.visible = !w.visible;
                            w.updated = true;
                        });
                    }
                    i += 2;
                }
                0x8c => {
                    // DeleteWindows.
                    if i + 1 < block.len() {
                        self.window_bitmap(block[i + 1], |w| {
                            if !w.deleted {
                                w.deleted = true;
                                w.visible = false;
                                w.updated = true;
                                w.clear_text();
                            }
                        });
                    }
                    i += 2;
                }
                0x8d => i += 2, // Delay
                0x8e => i += 1, // DelayCancel
                0x93..=0x96 => i += 1, // reserved
                0x8f => {
                    debug!("service reset");
                    self.reset();
                    i += 1;
                }
                0x90 => {
                    // SetPenAttributes.
                    if i + 2 < block.len() {
                        let w = &mut self.windows[self.current_window];
                        w.pen_attributes = (block[i + 1], block[i + 2]);
                    }
                    i += 3;
                }
                0x91 => {
                    // SetPenColor.
                    if i + 3 < block.len() {
                        let w = &mut self.windows[self.current_window];
                        w.pen_color = (block[i + 1], block[i + 2], block[i + 3]);
                    }
                    i += 4;
                }
                0x92 => {
                    // SetPenLocation.
                    if i + 2 < block.len() {
                        let w = &mut self.windows[self.current_window];
                        w.pen_row = (block[i + 1] & 0x0f) as usize;
                        w.pen_column = (block[i + 2] & 0x3f) as usize;
                    }
                    i += 3;
                }
                0x97 => {
                    // SetWindowAttributes.
                    if i + 4 < block.len() {
                        let w = &mut self.windows[self.current_window];
                        w.justify_mode = match block[i + 3] & 0x03 {
                            0 => JustifyMode::Left,
                            1 => JustifyMode::Right,
                            2 => JustifyMode::Center,
                            _ => JustifyMode::Full,
                        };
                        w.updated = true;
                    }
                    i += 5;
                }
                0x98..=0x9f => {
                    // DefineWindow.
                    if i + 6 < block.len() {
                        self.define_window((c & 0x07) as usize, &block[i + 1..i + 7]);
                    }
                    i += 7;
                }
                0xa0..=0xff => {
                    // G1: Latin-1.
                    self.windows[self.current_window].put_char(c as char);
                    i += 1;
                }
            }
        }
    }

    fn define_window(&mut self, window_id: usize, params: &[u8]) {
        self.current_window = window_id;
        let w = &mut self.windows[window_id];

        let was_deleted = w.deleted;
        w.deleted = false;
        w.visible = params[0] & 0x20 != 0;
        w.relative_position = params[1] & 0x80 != 0;

        let anchor_vertical = (params[1] & 0x7f) as u32;
        let anchor_horizontal = params[2] as u32;
        // Absolute coordinates span 0-74 vertically and 0-209
        // horizontally; relative ones are already percentages.
        if w.relative_position {
            w.screen_vertical = anchor_vertical;
            w.screen_horizontal = anchor_horizontal;
        } else {
            w.screen_vertical = anchor_vertical * 100 / 75;
            w.screen_horizontal = anchor_horizontal * 100 / 210;
        }

        w.anchor_point = AnchorPoint::from_code(params[3] >> 4);
        w.row_count = (params[3] & 0x0f) as u32 + 1;
        w.column_count = (params[4] & 0x3f) as u32 + 1;
        w.updated = true;

        if was_deleted {
            w.clear_text();
        }

        debug!(
            "define window {}: visible {} anchor {:?} at {}%/{}% ({}x{})",
            window_id,
            w.visible,
            w.anchor_point,
            w.screen_vertical,
            w.screen_horizontal,
            w.row_count,
            w.column_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A DTVCC packet defining window 0 at mid-screen and writing "HI".
    fn define_and_text_packet() -> Vec<u8> {
        let block: Vec<u8> = vec![
            0x98, // DefineWindow 0
            0x38, // visible, priority 0
            50,   // absolute anchor vertical 50
            105,  // absolute anchor horizontal 105
            0x70, // anchor point 7 (bottom center), row count 1
            0x1f, // column count 32
            0x00, // window/pen style
            b'H', b'I',
        ];
        let mut packet = Vec::new();
        // packet_size such that size*2-1 >= payload
        let payload_len = block.len() + 1;
        packet.push(((payload_len + 2) / 2) as u8); // seq 0 | size
        packet.push(0x20 | block.len() as u8); // service 1, block size
        packet.extend_from_slice(&block);
        packet
    }

    #[test]
    fn define_window_and_text() {
        let mut dec = Cea708Dec::new(1);
        let need_render = dec.process_dtvcc_packet(&define_and_text_packet());
        assert!(need_render);

        let w = &dec.windows[0];
        assert!(w.visible && !w.deleted && w.updated);
        assert_eq!(w.anchor_point, AnchorPoint::BottomCenter);
        assert_eq!(w.screen_vertical, 50 * 100 / 75);
        assert_eq!(w.text(), "HI");
    }

    #[test]
    fn other_service_is_ignored() {
        let mut dec = Cea708Dec::new(2);
        assert!(!dec.process_dtvcc_packet(&define_and_text_packet()));
        assert!(dec.windows[0].deleted);
    }

    #[test]
    fn carriage_return_starts_new_row() {
        let mut dec = Cea708Dec::new(1);
        dec.process_dtvcc_packet(&define_and_text_packet());

        let block: Vec<u8> = vec![0x80, b'A', 0x0d, b'B'];
        let mut packet = vec![((block.len() + 3) / 2) as u8, 0x20 | block.len() as u8];
        packet.extend_from_slice(&block);
        dec.process_dtvcc_packet(&packet);

        assert_eq!(dec.windows[0].text(), "HIA\nB");
    }

    #[test]
    fn delete_windows_clears() {
        let mut dec = Cea708Dec::new(1);
        dec.process_dtvcc_packet(&define_and_text_packet());

        let block: Vec<u8> = vec![0x8c, 0x01]; // DeleteWindows, window 0
        let mut packet = vec![((block.len() + 3) / 2) as u8, 0x20 | block.len() as u8];
        packet.extend_from_slice(&block);
        // Deleted windows do not require rendering by themselves.
        dec.process_dtvcc_packet(&packet);
        assert!(dec.windows[0].deleted);
        assert!(dec.windows[0].rows.is_empty());
    }
}
