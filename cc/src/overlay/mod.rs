//! CEA-708 caption overlay: decodes a caption stream into windowed text
//! and rasterizes it to overlay rectangles for blending onto video.
//!
//! Text shaping itself is delegated to a [TextRenderer] (normally a
//! Pango/Cairo wrapper in the host); this module owns packet assembly,
//! the window state machine, color conversion, placement, and the
//! double-buffered handoff between the caption and video paths.

pub mod service;

use std::sync::Arc;

use failure::{bail, Error};
use log::{debug, trace, warn};
use media::{Buffer, ClockTime};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::cdp;
use service::{Cea708Dec, TextImage, Window};

const CCTYPE_VALID_MASK: u8 = 0x04;
const CCTYPE_TYPE_MASK: u8 = 0x03;
const CCTYPE_608_CC1: u8 = 0;
const CCTYPE_608_CC2: u8 = 1;
const CCTYPE_708_ADD: u8 = 2;
const CCTYPE_708_START: u8 = 3;

/// Horizontal placement policy for caption windows.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WindowHPos {
    Left,
    Center,
    Right,
    /// Derive from the window's own anchor point.
    Auto,
}

/// Rasterizes a window's text into a pre-multiplied ARGB image
/// (byte order A, R, G, B per pixel). External collaborator.
pub trait TextRenderer: Send {
    fn render(&mut self, text: &str, font_desc: &str) -> Option<TextImage>;
}

/// Output pixel format of overlay rectangles.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OverlayFormat {
    Argb,
    Ayuv,
}

/// One positioned rectangle of rendered caption text.
#[derive(Clone)]
pub struct OverlayRectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub format: OverlayFormat,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for OverlayRectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayRectangle")
            .field("x", &self.x)
            .field("y", &self.y)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

/// The set of rectangles to draw onto one stretch of video.
#[derive(Clone, Debug, Default)]
pub struct Composition {
    pub rectangles: Vec<OverlayRectangle>,
}

struct Inner<R: TextRenderer> {
    decoder: Cea708Dec,
    renderer: R,

    is_cdp: bool,
    use_argb: bool,
    video_width: u32,
    video_height: u32,
    font_desc: String,
    window_h_pos: WindowHPos,
    silent: bool,

    cea608_buffer: [[u8; service::DTVCC_LENGTH]; 2],
    cea608_index: [usize; 2],
    cea708_buffer: [u8; service::DTVCC_LENGTH],
    cea708_index: usize,

    current_composition: Option<Arc<Composition>>,
    current_comp_start_time: Option<ClockTime>,
    next_composition: Option<Arc<Composition>>,
    next_comp_start_time: Option<ClockTime>,

    current_time: ClockTime,
    flushing: bool,
    eos: bool,
}

/// See the module docs. The caption path may block in
/// [CcOverlay::push_caption] until the video path consumes the pending
/// composition.
pub struct CcOverlay<R: TextRenderer> {
    inner: Mutex<Inner<R>>,
    cond: Condvar,
}

impl<R: TextRenderer> CcOverlay<R> {
    pub fn new(renderer: R, service_number: i32) -> CcOverlay<R> {
        CcOverlay {
            inner: Mutex::new(Inner {
                decoder: Cea708Dec::new(service_number),
                renderer,
                is_cdp: false,
                use_argb: true,
                video_width: 0,
                video_height: 0,
                font_desc: String::new(),
                window_h_pos: WindowHPos::Center,
                silent: false,
                cea608_buffer: [[0; service::DTVCC_LENGTH]; 2],
                cea608_index: [0; 2],
                cea708_buffer: [0; service::DTVCC_LENGTH],
                cea708_index: 0,
                current_composition: None,
                current_comp_start_time: None,
                next_composition: None,
                next_comp_start_time: None,
                current_time: ClockTime(0),
                flushing: false,
                eos: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn set_video_info(&self, width: u32, height: u32, use_argb: bool) {
        let mut inner = self.inner.lock();
        inner.video_width = width;
        inner.video_height = height;
        inner.use_argb = use_argb;
    }

    pub fn set_caption_format(&self, is_cdp: bool) {
        self.inner.lock().is_cdp = is_cdp;
    }

    pub fn set_font_desc(&self, font_desc: &str) {
        self.inner.lock().font_desc = font_desc.to_string();
    }

    pub fn set_window_h_pos(&self, pos: WindowHPos) {
        self.inner.lock().window_h_pos = pos;
    }

    pub fn set_silent(&self, silent: bool) {
        self.inner.lock().silent = silent;
    }

    pub fn set_service_number(&self, service: i32) {
        self.inner.lock().decoder.set_service(service);
    }

    /// Feeds one caption buffer. Blocks while a previously produced
    /// composition has not been consumed by the video path yet.
    pub fn push_caption(&self, buffer: &Buffer) -> Result<(), Error> {
        let mut guard = self.inner.lock();
        if guard.flushing {
            bail!("flushing");
        }
        if guard.eos {
            bail!("caption pad is EOS");
        }

        let cc_data;
        if guard.is_cdp {
            match cdp::parse(&buffer.data) {
                Ok((parsed, _)) => cc_data = parsed.cc_data,
                Err(e) => {
                    warn!("dropping invalid CDP: {}", e);
                    return Ok(());
                }
            }
        } else {
            cc_data = buffer.data.to_vec();
        }

        if let Some(pts) = buffer.pts {
            guard.current_time = pts;
        }

        self.user_data_decode(&mut guard, &cc_data);
        Ok(())
    }

    /// Consumes caption state for one video frame and returns what to
    /// draw on it.
    pub fn push_video(&self, running_time: ClockTime) -> Option<Arc<Composition>> {
        let mut inner = self.inner.lock();

        if let Some(next_start) = inner.next_comp_start_time {
            if running_time >= next_start {
                debug!("advancing to composition at {}", next_start);
                inner.current_composition = inner.next_composition.take();
                inner.current_comp_start_time = Some(next_start);
                inner.next_comp_start_time = None;
                // The caption path may be waiting for the slot.
                self.cond.notify_all();
            }
        }

        match (inner.current_composition.as_ref(), inner.current_comp_start_time) {
            (Some(comp), Some(start)) if running_time >= start && !inner.silent => {
                Some(comp.clone())
            }
            _ => None,
        }
    }

    /// Releases the displayed composition, promoting a queued successor
    /// if there is one.
    pub fn pop_composition(&self) {
        let mut inner = self.inner.lock();
        inner.current_composition = inner.next_composition.take();
        inner.current_comp_start_time = inner.next_comp_start_time.take();
        self.cond.notify_all();
    }

    /// Flush-start: drops all state and wakes any blocked caption push.
    pub fn flush_start(&self) {
        let mut inner = self.inner.lock();
        inner.flushing = true;
        inner.current_composition = None;
        inner.current_comp_start_time = None;
        inner.next_composition = None;
        inner.next_comp_start_time = None;
        inner.cea608_index = [0; 2];
        inner.cea708_index = 0;
        self.cond.notify_all();
    }

    pub fn flush_stop(&self) {
        let mut inner = self.inner.lock();
        inner.flushing = false;
        inner.eos = false;
    }

    pub fn caption_eos(&self) {
        let mut inner = self.inner.lock();
        inner.eos = true;
        self.cond.notify_all();
    }

    /// cc_data triplet stream disassembly: accumulates DTVCC packets and
    /// processes each complete one.
    fn user_data_decode(&self, guard: &mut MutexGuard<'_, Inner<R>>, cc_data: &[u8]) {
        let len = cc_data.len() - cc_data.len() % 3;

        for chunk in 0..len / 3 {
            let triplet: [u8; 3] = [
                cc_data[chunk * 3],
                cc_data[chunk * 3 + 1],
                cc_data[chunk * 3 + 2],
            ];
            let cc_valid = triplet[0] & CCTYPE_VALID_MASK != 0;
            let cc_type = triplet[0] & CCTYPE_TYPE_MASK;

            trace!(
                "cc_data_pkt: valid {} type {} 0x{:02x} 0x{:02x}",
                cc_valid,
                cc_type,
                triplet[1],
                triplet[2]
            );

            match cc_type {
                CCTYPE_608_CC1 | CCTYPE_608_CC2 => {
                    if !cc_valid {
                        continue;
                    }
                    let field = cc_type as usize;
                    if guard.cea608_index[field] <= service::DTVCC_LENGTH - 2 {
                        for &byte in &triplet[1..3] {
                            if !(b' '..=b'~').contains(&byte) {
                                self.process_packet(guard, cc_type);
                            }
                            let idx = guard.cea608_index[field];
                            guard.cea608_buffer[field][idx] = byte;
                            guard.cea608_index[field] += 1;
                        }
                    } else {
                        warn!("cea608 buffer {} overflow", field);
                    }
                }
                _ => {
                    if cc_valid {
                        if cc_type == CCTYPE_708_START {
                            // The previous packet is complete.
                            self.process_packet(guard, cc_type);
                        }
                        if guard.cea708_index <= service::DTVCC_LENGTH - 2 {
                            let idx = guard.cea708_index;
                            guard.cea708_buffer[idx] = triplet[1];
                            guard.cea708_buffer[idx + 1] = triplet[2];
                            guard.cea708_index += 2;
                        } else {
                            warn!("cea708 buffer overflow");
                        }
                    } else if cc_type == CCTYPE_708_ADD {
                        // Ignored, but it ends any packet in progress.
                        self.process_packet(guard, cc_type);
                    }
                }
            }
        }
    }

    fn process_packet(&self, guard: &mut MutexGuard<'_, Inner<R>>, cc_type: u8) {
        match cc_type {
            CCTYPE_608_CC1 | CCTYPE_608_CC2 => {
                // Only the 708 stream is decoded for display.
                guard.cea608_index[cc_type as usize] = 0;
            }
            _ => {
                if guard.cea708_index > 0 {
                    let packet: Vec<u8> = guard.cea708_buffer[..guard.cea708_index].to_vec();
                    let need_render = guard.decoder.process_dtvcc_packet(&packet);
                    if need_render {
                        self.create_and_push_composition(guard);
                    }
                }
                guard.cea708_index = 0;
            }
        }
    }

    fn create_and_push_composition(&self, guard: &mut MutexGuard<'_, Inner<R>>) {
        let mut rectangles = Vec::new();
        let inner = &mut **guard;
        let (width, height) = (inner.video_width, inner.video_height);
        let (h_pos, use_argb) = (inner.window_h_pos, inner.use_argb);

        for window_id in 0..service::MAX_WINDOWS {
            if !inner.decoder.windows[window_id].updated {
                continue;
            }

            let (deleted, visible, text) = {
                let w = &inner.decoder.windows[window_id];
                (w.deleted, w.visible, w.text())
            };

            if !deleted && visible && !text.is_empty() {
                let image = inner.renderer.render(&text, &inner.font_desc);
                let w = &mut inner.decoder.windows[window_id];
                w.text_image = image;

                if let Some(image) = w.text_image.clone() {
                    w.image_width = image.width;
                    w.image_height = image.height;
                    place_window(w, width, height, h_pos);

                    let pixels = if use_argb {
                        image_to_argb(&image)
                    } else {
                        image_to_ayuv(&image)
                    };

                    debug!(
                        "window {} anchor {:?} at ({}, {}) size {}x{}",
                        window_id,
                        w.anchor_point,
                        w.h_offset,
                        w.v_offset,
                        image.width,
                        image.height
                    );

                    rectangles.push(OverlayRectangle {
                        x: w.h_offset,
                        y: w.v_offset,
                        width: image.width,
                        height: image.height,
                        format: if use_argb {
                            OverlayFormat::Argb
                        } else {
                            OverlayFormat::Ayuv
                        },
                        pixels,
                    });
                }
            }
            inner.decoder.windows[window_id].updated = false;
        }

        let comp = if rectangles.is_empty() {
            None
        } else {
            Some(Arc::new(Composition { rectangles }))
        };

        // Single-slot rendezvous: while a composition is displayed, the
        // new one goes into the next slot and this path blocks until the
        // video path takes it over.
        if guard.current_comp_start_time.is_some() {
            guard.next_composition = comp;
            guard.next_comp_start_time = Some(guard.current_time);
            debug!("has a caption composition queued, waiting");
            while guard.next_comp_start_time.is_some() && !guard.flushing && !guard.eos {
                self.cond.wait(guard);
            }
            return;
        }

        guard.current_composition = comp;
        guard.current_comp_start_time = Some(guard.current_time);
        debug!("composition at {}", guard.current_time);

        // In case the video chain is waiting for caption data.
        self.cond.notify_all();
    }
}

/// Resolves a window's on-screen offsets from its anchor.
fn place_window(w: &mut Window, video_width: u32, video_height: u32, h_pos: WindowHPos) {
    let v_anchor = (w.screen_vertical * video_height / 100) as i32;
    let h_anchor = (w.screen_horizontal * video_width / 100) as i32;

    w.h_offset = match h_pos {
        WindowHPos::Left => 0,
        WindowHPos::Center => (video_width as i32 - w.image_width as i32) / 2,
        WindowHPos::Right => video_width as i32 - w.image_width as i32,
        WindowHPos::Auto => {
            if w.anchor_point.is_left() {
                h_anchor
            } else if w.anchor_point.is_center() {
                h_anchor - w.image_width as i32 / 2
            } else {
                h_anchor - w.image_width as i32
            }
        }
    };

    w.v_offset = if w.anchor_point.is_top() {
        v_anchor
    } else if w.anchor_point.is_middle() {
        v_anchor - w.image_height as i32 / 2
    } else {
        v_anchor - w.image_height as i32
    };
}

fn unpremultiply(a: u8, c: u8) -> u8 {
    if a == 0 {
        0
    } else {
        std::cmp::min((c as u32 * 255 + a as u32 / 2) / a as u32, 255) as u8
    }
}

/// Pre-multiplied ARGB to straight ARGB.
fn image_to_argb(image: &TextImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(image.data.len());
    for px in image.data.chunks_exact(4) {
        let (a, r, g, b) = (px[0], px[1], px[2], px[3]);
        out.push(a);
        out.push(unpremultiply(a, r));
        out.push(unpremultiply(a, g));
        out.push(unpremultiply(a, b));
    }
    out
}

/// Pre-multiplied ARGB to straight AYUV, BT.601.
fn image_to_ayuv(image: &TextImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(image.data.len());
    for px in image.data.chunks_exact(4) {
        let a = px[0];
        let r = unpremultiply(a, px[1]) as i32;
        let g = unpremultiply(a, px[2]) as i32;
        let b = unpremultiply(a, px[3]) as i32;

        let y = ((19595 * r) >> 16) + ((38470 * g) >> 16) + ((7471 * b) >> 16);
        let u = -((11059 * r) >> 16) - ((21709 * g) >> 16) + ((32768 * b) >> 16) + 128;
        let v = ((32768 * r) >> 16) - ((27439 * g) >> 16) - ((5329 * b) >> 16) + 128;

        out.push(a);
        out.push(y.max(0).min(255) as u8);
        out.push(u.max(0).min(255) as u8);
        out.push(v.max(0).min(255) as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use media::SECOND;
    use service::AnchorPoint;

    /// Renders every text as a fixed-size opaque block.
    struct BlockRenderer {
        width: u32,
        height: u32,
    }

    impl TextRenderer for BlockRenderer {
        fn render(&mut self, _text: &str, _font_desc: &str) -> Option<TextImage> {
            Some(TextImage {
                data: vec![0xff; (self.width * self.height * 4) as usize],
                width: self.width,
                height: self.height,
            })
        }
    }

    fn caption_packet() -> Vec<u8> {
        // DefineWindow 0 (visible) + "HI", wrapped as a service-1 block.
        let block: Vec<u8> =
            vec![0x98, 0x38, 50, 105, 0x40, 0x1f, 0x00, b'H', b'I'];
        let mut packet = Vec::new();
        packet.push(((block.len() + 3) / 2) as u8);
        packet.push(0x20 | block.len() as u8);
        packet.extend_from_slice(&block);
        packet
    }

    /// Wraps a DTVCC packet into cc_data triplets (start + adds).
    fn cc_data_for_packet(packet: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, pair) in packet.chunks(2).enumerate() {
            out.push(if i == 0 { 0xff } else { 0xfe });
            out.push(pair[0]);
            out.push(*pair.get(1).unwrap_or(&0));
        }
        // A second packet start flushes the previous one.
        out
    }

    fn push_two_packets(overlay: &CcOverlay<BlockRenderer>, pts: ClockTime) {
        let mut data = cc_data_for_packet(&caption_packet());
        // Terminate with the start of an empty follow-up packet.
        data.extend_from_slice(&[0xff, 0x01, 0x00]);
        let buf = Buffer::new(Bytes::from(data)).with_pts(pts);
        overlay.push_caption(&buf).unwrap();
    }

    /// Worked anchor example: 720x480, screen fractions 50/50, CENTER
    /// anchor, 200x40 image.
    #[test]
    fn anchor_math() {
        let mut w = Window {
            screen_vertical: 50,
            screen_horizontal: 50,
            anchor_point: AnchorPoint::Center,
            image_width: 200,
            image_height: 40,
            ..Window::default()
        };
        place_window(&mut w, 720, 480, WindowHPos::Center);
        assert_eq!(w.v_offset, 220);
        assert_eq!(w.h_offset, 260);

        place_window(&mut w, 720, 480, WindowHPos::Left);
        assert_eq!(w.h_offset, 0);
        place_window(&mut w, 720, 480, WindowHPos::Right);
        assert_eq!(w.h_offset, 520);
        // AUTO derives from the anchor point.
        place_window(&mut w, 720, 480, WindowHPos::Auto);
        assert_eq!(w.h_offset, 360 - 100);
    }

    #[test]
    fn composition_becomes_visible_at_its_time() {
        let overlay = CcOverlay::new(BlockRenderer { width: 200, height: 40 }, 1);
        overlay.set_video_info(720, 480, true);

        push_two_packets(&overlay, SECOND);

        // Before the caption time nothing is drawn.
        assert!(overlay.push_video(ClockTime(0)).is_none());
        let comp = overlay.push_video(SECOND).expect("composition due");
        assert_eq!(comp.rectangles.len(), 1);
        assert_eq!(comp.rectangles[0].width, 200);
        assert_eq!(comp.rectangles[0].format, OverlayFormat::Argb);
    }

    #[test]
    fn silent_suppresses_drawing() {
        let overlay = CcOverlay::new(BlockRenderer { width: 200, height: 40 }, 1);
        overlay.set_video_info(720, 480, true);
        overlay.set_silent(true);

        push_two_packets(&overlay, SECOND);
        assert!(overlay.push_video(SECOND).is_none());
    }

    /// The caption path blocks on the second composition until the video
    /// path consumes the first.
    #[test]
    fn double_buffer_rendezvous() {
        let overlay = Arc::new(CcOverlay::new(
            BlockRenderer { width: 200, height: 40 },
            1,
        ));
        overlay.set_video_info(720, 480, true);

        push_two_packets(&overlay, SECOND);

        let pusher = {
            let overlay = overlay.clone();
            std::thread::spawn(move || {
                // Blocks until the video side consumes the first
                // composition.
                push_two_packets(&overlay, SECOND * 2);
            })
        };

        // Give the pusher time to reach the wait.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!pusher.is_finished());

        // Video at t=2s promotes the next composition and wakes the
        // caption path.
        let comp = overlay.push_video(SECOND * 2);
        assert!(comp.is_some());
        pusher.join().unwrap();
    }

    #[test]
    fn flush_wakes_blocked_caption_path() {
        let overlay = Arc::new(CcOverlay::new(
            BlockRenderer { width: 200, height: 40 },
            1,
        ));
        overlay.set_video_info(720, 480, true);
        push_two_packets(&overlay, SECOND);

        let pusher = {
            let overlay = overlay.clone();
            std::thread::spawn(move || {
                push_two_packets(&overlay, SECOND * 2);
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        overlay.flush_start();
        pusher.join().unwrap();
        overlay.flush_stop();
        assert!(overlay.push_video(SECOND * 2).is_none());
    }

    #[test]
    fn ayuv_conversion_is_bt601() {
        let image = TextImage {
            // One opaque white pixel, premultiplied.
            data: vec![0xff, 0xff, 0xff, 0xff],
            width: 1,
            height: 1,
        };
        let ayuv = image_to_ayuv(&image);
        assert_eq!(ayuv[0], 0xff);
        // White: Y near 255, chroma at the midpoint.
        assert!(ayuv[1] >= 0xfc);
        assert!((ayuv[2] as i32 - 128).abs() <= 1);
        assert!((ayuv[3] as i32 - 128).abs() <= 1);
    }
}
