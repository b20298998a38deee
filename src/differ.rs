//! Temporal Differ
//!
//! Tracks what a decoder shows on screen and turns every quantized frame
//! into the smallest image block that reproduces it. The most recent block is
//! retained until its successor is known, so that zero-change frames can be
//! folded into its delay and its disposal can still be changed when the
//! successor needs transparent pixels where the screen is opaque.
use tracing::trace;

use crate::palette::Palette;
use crate::types::{DisposalMethod, Rect, MAX_COLOR_DIFF};

/// Image block ready for the muxer
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDelta {
    pub rect: Rect,
    /// Palette indices of `rect`, row by row
    pub indices: Vec<u8>,
    pub transparent: Option<u8>,
    pub dispose: DisposalMethod,
    /// Hundredths of a second
    pub delay: u16,
}

pub struct Differ {
    width: u16,
    height: u16,
    /// Palette indices currently displayed, `None` before the first frame
    screen: Option<Vec<u8>>,
    retained: Option<FrameDelta>,
    /// Colors closer than this count as unchanged
    threshold: u32,
    lossy_threshold: Option<u32>,
    merge: bool,
    merged: usize,
}

impl Differ {
    pub fn new(width: u16, height: u16, motion_quality: Option<u8>, lossy_quality: Option<u8>) -> Differ {
        let threshold = motion_quality.map_or(0, |q| {
            let q = 100 - u32::from(q.min(100));
            (q * q * 6).min(MAX_COLOR_DIFF)
        });
        let lossy_threshold = lossy_quality.map(|q| {
            let q = 100 - u32::from(q.min(100));
            q * q * 3
        });
        Differ {
            width,
            height,
            screen: None,
            retained: None,
            threshold,
            lossy_threshold,
            merge: motion_quality.is_some(),
            merged: 0,
        }
    }

    /// Number of frames folded into their predecessor so far
    pub fn merged(&self) -> usize {
        self.merged
    }

    fn is_changed(&self, palette: &Palette, old: u8, new: u8) -> bool {
        if old == new {
            return false;
        }
        match (palette.color(old), palette.color(new)) {
            (Some(a), Some(b)) => a.diff(b) > self.threshold,
            _ => true,
        }
    }

    /// Adds the next frame, displayed for `delay`. Returns the previously
    /// retained block once it can no longer change.
    pub fn push(&mut self, palette: &Palette, current: &[u8], delay: u16) -> Option<FrameDelta> {
        let transparent = palette.transparent_index();
        let width = self.width as usize;
        debug_assert_eq!(current.len(), width * self.height as usize);

        let mut screen = match self.screen.take() {
            None => {
                let delta = FrameDelta {
                    rect: Rect::full(self.width, self.height),
                    indices: current.to_vec(),
                    transparent,
                    dispose: DisposalMethod::Keep,
                    delay,
                };
                self.screen = Some(current.to_vec());
                return self.retain(delta);
            }
            Some(screen) => screen,
        };

        // holes in the new frame can only be shown by clearing the previous one
        if let Some(t) = transparent {
            let needs_clear = current.iter().zip(&screen).any(|(&c, &s)| c == t && s != t);
            if needs_clear {
                if let Some(prev) = self.retained.as_mut() {
                    prev.rect = Rect::full(self.width, self.height);
                    prev.indices = screen.clone();
                    prev.dispose = DisposalMethod::Background;
                    screen.iter_mut().for_each(|s| *s = t);
                }
            }
        }

        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for (y, (row, screen_row)) in current.chunks_exact(width).zip(screen.chunks_exact(width)).enumerate() {
            for (x, (&c, &s)) in row.iter().zip(screen_row).enumerate() {
                if self.is_changed(palette, s, c) {
                    bounds = Some(match bounds {
                        None => (x, y, x, y),
                        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                    });
                }
            }
        }

        let (x0, y0, x1, y1) = match bounds {
            Some(b) => b,
            None => {
                self.screen = Some(screen);
                return self.unchanged(palette, delay);
            }
        };
        let rect = Rect {
            left: x0 as u16,
            top: y0 as u16,
            width: (x1 - x0 + 1) as u16,
            height: (y1 - y0 + 1) as u16,
        };
        trace!(?rect, "dirty rectangle");

        let mut indices = Vec::with_capacity(rect.area());
        for y in y0..=y1 {
            let row_start = indices.len();
            for x in x0..=x1 {
                let i = y * width + x;
                let (c, s) = (current[i], screen[i]);
                let mut out = if self.is_changed(palette, s, c) { c } else { transparent.unwrap_or(s) };
                if let (Some(limit), Some(color)) = (self.lossy_threshold, palette.color(c)) {
                    // extend the run of the left neighbour when it is close enough
                    if x > x0 && Some(out) != transparent {
                        let left = indices[row_start + x - x0 - 1];
                        if let Some(left_color) = palette.color(left) {
                            if left != out && color.diff(left_color) <= limit {
                                out = left;
                            }
                        }
                    }
                }
                if Some(out) != transparent {
                    screen[i] = out;
                }
                indices.push(out);
            }
        }
        self.screen = Some(screen);
        self.retain(FrameDelta {
            rect,
            indices,
            transparent,
            dispose: DisposalMethod::Keep,
            delay,
        })
    }

    /// Frame identical to the screen
    fn unchanged(&mut self, palette: &Palette, delay: u16) -> Option<FrameDelta> {
        if self.merge {
            if let Some(prev) = self.retained.as_mut() {
                if let Some(sum) = prev.delay.checked_add(delay) {
                    prev.delay = sum;
                    self.merged += 1;
                    trace!(delay = sum, "merged unchanged frame");
                    return None;
                }
            }
        }
        let transparent = palette.transparent_index();
        let screen = self.screen.as_deref().unwrap_or(&[]);
        let pixel = transparent.or_else(|| screen.first().copied()).unwrap_or(0);
        self.retain(FrameDelta {
            rect: Rect { left: 0, top: 0, width: 1, height: 1 },
            indices: vec![pixel],
            transparent,
            dispose: DisposalMethod::Keep,
            delay,
        })
    }

    fn retain(&mut self, delta: FrameDelta) -> Option<FrameDelta> {
        self.retained.replace(delta)
    }

    /// Releases the last retained block
    pub fn finish(&mut self) -> Option<FrameDelta> {
        self.retained.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rgb;

    fn palette() -> Palette {
        Palette::new(
            vec![Rgb::new(0, 0, 0), Rgb::new(255, 255, 255), Rgb::new(250, 250, 250)],
            true,
        )
        .unwrap()
    }

    const T: u8 = 3;

    #[test]
    fn first_frame_is_full() {
        let mut differ = Differ::new(2, 2, None, None);
        assert_eq!(differ.push(&palette(), &[0, 1, 1, 0], 10), None);
        let delta = differ.finish().unwrap();
        assert_eq!(delta.rect, Rect::full(2, 2));
        assert_eq!(delta.indices, vec![0, 1, 1, 0]);
        assert_eq!(delta.delay, 10);
    }

    #[test]
    fn dirty_rect_and_transparency() {
        let pal = palette();
        let mut differ = Differ::new(3, 3, None, None);
        differ.push(&pal, &[0; 9], 5);
        let first = differ.push(&pal, &[0, 0, 0, 0, 1, 1, 0, 0, 1], 7).unwrap();
        assert_eq!(first.delay, 5);
        let second = differ.finish().unwrap();
        assert_eq!(second.rect, Rect { left: 1, top: 1, width: 2, height: 2 });
        assert_eq!(second.indices, vec![1, 1, T, 1]);
        assert_eq!(second.dispose, DisposalMethod::Keep);
    }

    #[test]
    fn identical_frames_stay_separate_without_motion_quality() {
        let pal = palette();
        let mut differ = Differ::new(2, 1, None, None);
        differ.push(&pal, &[0, 1], 4);
        assert!(differ.push(&pal, &[0, 1], 4).is_some());
        let still = differ.finish().unwrap();
        assert_eq!(still.rect.area(), 1);
        assert_eq!(still.indices, vec![T]);
        assert_eq!(differ.merged(), 0);
    }

    #[test]
    fn identical_frames_merge_with_motion_quality() {
        let pal = palette();
        let mut differ = Differ::new(2, 1, Some(100), None);
        differ.push(&pal, &[0, 1], 4);
        assert_eq!(differ.push(&pal, &[0, 1], 6), None);
        assert_eq!(differ.push(&pal, &[0, 1], 3), None);
        assert_eq!(differ.merged(), 2);
        assert_eq!(differ.finish().unwrap().delay, 13);
    }

    #[test]
    fn low_motion_quality_ignores_small_changes() {
        let pal = palette();
        let mut differ = Differ::new(2, 1, Some(90), None);
        differ.push(&pal, &[0, 1], 4);
        // 255 -> 250 is below the threshold
        assert_eq!(differ.push(&pal, &[0, 2], 4), None);

        let mut strict = Differ::new(2, 1, Some(100), None);
        strict.push(&pal, &[0, 1], 4);
        assert!(strict.push(&pal, &[0, 2], 4).is_some());
    }

    #[test]
    fn new_hole_clears_previous_frame() {
        let pal = palette();
        let mut differ = Differ::new(2, 1, None, None);
        differ.push(&pal, &[0, 1], 4);
        let prev = differ.push(&pal, &[0, T], 4).unwrap();
        assert_eq!(prev.dispose, DisposalMethod::Background);
        assert_eq!(prev.rect, Rect::full(2, 1));
        assert_eq!(prev.indices, vec![0, 1]);
        let next = differ.finish().unwrap();
        assert_eq!(next.indices, vec![0]);
        assert_eq!(next.rect, Rect { left: 0, top: 0, width: 1, height: 1 });
    }

    #[test]
    fn lossy_extends_runs() {
        let pal = palette();
        let mut differ = Differ::new(3, 1, None, Some(50));
        differ.push(&pal, &[0, 0, 0], 4);
        differ.push(&pal, &[1, 2, 1], 4);
        let delta = differ.finish().unwrap();
        assert_eq!(delta.indices, vec![1, 1, 1]);
    }
}
