//! Palette Builder
//!
//! Frames of the warm-up window are sampled into a [`PaletteBuilder`]; the
//! resulting [`Palette`] is shared by every frame of the animation and never
//! changes after the global color table has been written.
use std::collections::{HashMap, HashSet};

use color_quant::NeuQuant;
use tracing::debug;

use crate::error::{Error, GifResult};
use crate::frame::RgbaFrame;
use crate::types::Rgb;

/// Maximum number of entries in a GIF color table
pub const MAX_COLORS: usize = 256;

/// Fixed palette of up to 256 entries. If present, the transparent entry is
/// always the last one.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: Vec<Rgb>,
    transparent: Option<u8>,
    exact: HashMap<Rgb, u8>,
}

impl Palette {
    pub fn new(mut colors: Vec<Rgb>, reserve_transparent: bool) -> GifResult<Palette> {
        // opaque pixels must always have a color to map to
        if colors.is_empty() {
            colors.push(Rgb::default());
        }
        let total = colors.len() + reserve_transparent as usize;
        if total > MAX_COLORS {
            return Err(Error::Quant(format!("palette of {} entries exceeds {}", total, MAX_COLORS)));
        }
        let mut exact = HashMap::with_capacity(colors.len());
        for (i, &c) in colors.iter().enumerate() {
            exact.entry(c).or_insert(i as u8);
        }
        let transparent = if reserve_transparent { Some(colors.len() as u8) } else { None };
        Ok(Palette { colors, transparent, exact })
    }

    /// Number of entries, including the transparent one
    pub fn len(&self) -> usize {
        self.colors.len() + self.transparent.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opaque colors
    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }

    pub fn transparent_index(&self) -> Option<u8> {
        self.transparent
    }

    /// Color of an index, `None` for the transparent entry
    #[inline]
    pub fn color(&self, index: u8) -> Option<Rgb> {
        self.colors.get(index as usize).copied()
    }

    /// Index of a color that is a palette member
    #[inline]
    pub fn exact(&self, c: Rgb) -> Option<u8> {
        self.exact.get(&c).copied()
    }

    /// Index of the closest opaque color
    pub fn nearest(&self, c: Rgb) -> u8 {
        if let Some(&i) = self.exact.get(&c) {
            return i;
        }
        let mut best = (u32::MAX, 0);
        for (i, &p) in self.colors.iter().enumerate() {
            let d = c.diff(p);
            if d < best.0 {
                best = (d, i);
                if d == 0 {
                    break;
                }
            }
        }
        best.1 as u8
    }

    /// RGB triplets as stored in a GIF color table
    pub fn to_rgb_table(&self) -> Vec<u8> {
        let mut table = Vec::with_capacity(self.len() * 3);
        for c in &self.colors {
            table.extend_from_slice(&[c.r, c.g, c.b]);
        }
        if self.transparent.is_some() {
            table.extend_from_slice(&[0, 0, 0]);
        }
        table
    }
}

/// Accumulates pixel samples of the warm-up frames
#[derive(Debug)]
pub struct PaletteBuilder {
    quality: u8,
    fast: bool,
    extra_effort: bool,
    samples_per_frame: usize,
    /// Opaque RGBA samples for NeuQuant
    samples: Vec<u8>,
    distinct: HashSet<Rgb>,
    overflow: bool,
    saw_transparency: bool,
    frames: usize,
}

impl PaletteBuilder {
    pub fn new(quality: u8, fast: bool, extra_effort: bool) -> PaletteBuilder {
        PaletteBuilder {
            quality,
            fast,
            extra_effort,
            samples_per_frame: if extra_effort { 65_536 } else { 16_384 },
            samples: Vec::new(),
            distinct: HashSet::new(),
            overflow: false,
            saw_transparency: false,
            frames: 0,
        }
    }

    /// Whether any opaque pixel has been sampled so far
    pub fn has_opaque(&self) -> bool {
        !self.samples.is_empty()
    }

    pub fn add_frame(&mut self, frame: &RgbaFrame) {
        self.frames += 1;
        let step = (frame.pixels.len() / self.samples_per_frame).max(1);
        for px in frame.pixels.iter().step_by(step) {
            if px[3] == 0 {
                self.saw_transparency = true;
                continue;
            }
            self.samples.extend_from_slice(&[px[0], px[1], px[2], 0xFF]);
            if !self.overflow {
                self.distinct.insert(Rgb::new(px[0], px[1], px[2]));
                if self.distinct.len() > MAX_COLORS {
                    self.overflow = true;
                    self.distinct.clear();
                }
            }
        }
        if step > 1 && !self.saw_transparency {
            self.saw_transparency = frame.pixels.iter().any(|px| px[3] == 0);
        }
    }

    /// Colors available to clustering, excluding the transparent slot
    fn color_budget(&self, reserve_transparent: bool) -> usize {
        let q = usize::from(self.quality.clamp(1, 100));
        let budget = 16 + (q - 1) * 240 / 99;
        budget.min(MAX_COLORS - reserve_transparent as usize)
    }

    fn sample_factor(&self) -> i32 {
        if self.extra_effort {
            1
        } else if self.fast {
            20
        } else {
            1 + (100 - i32::from(self.quality.clamp(1, 100))) / 10
        }
    }

    pub fn build(self) -> GifResult<Palette> {
        // the differ needs a transparent entry as soon as there is more than one frame
        let reserve = self.saw_transparency || self.frames > 1;
        let exact_limit = MAX_COLORS - reserve as usize;

        if !self.overflow && self.distinct.len() <= exact_limit {
            let mut colors: Vec<Rgb> = self.distinct.into_iter().collect();
            colors.sort_by_key(|c| (c.r, c.g, c.b));
            debug!(colors = colors.len(), transparent = reserve, "exact palette");
            return Palette::new(colors, reserve);
        }

        let budget = self.color_budget(reserve);
        let nq = NeuQuant::new(self.sample_factor(), budget, &self.samples);
        let mut seen = HashSet::with_capacity(budget);
        let colors: Vec<Rgb> = nq
            .color_map_rgb()
            .chunks_exact(3)
            .map(|c| Rgb::new(c[0], c[1], c[2]))
            .filter(|c| seen.insert(*c))
            .collect();
        debug!(colors = colors.len(), budget, transparent = reserve, "clustered palette");
        Palette::new(colors, reserve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaFrame {
        let pixels = (0..width * height)
            .map(|i| {
                let (x, y) = (i % width, i / width);
                [(x * 255 / width) as u8, (y * 255 / height) as u8, ((x + y) % 256) as u8, 255]
            })
            .collect();
        RgbaFrame::new(width, height, pixels).unwrap()
    }

    #[test]
    fn few_colors_are_exact() {
        let colors = [[10, 20, 30, 255], [200, 0, 0, 255], [0, 0, 255, 255]];
        let pixels = (0..30).map(|i| colors[i % 3]).collect();
        let frame = RgbaFrame::new(6, 5, pixels).unwrap();
        let mut builder = PaletteBuilder::new(1, false, false);
        builder.add_frame(&frame);
        let palette = builder.build().unwrap();
        assert_eq!(palette.colors().len(), 3);
        assert_eq!(palette.transparent_index(), None);
        for c in colors {
            let rgb = Rgb::new(c[0], c[1], c[2]);
            assert_eq!(palette.color(palette.nearest(rgb)), Some(rgb));
        }
    }

    #[test]
    fn transparency_reserves_last_slot() {
        let frame = RgbaFrame::new(2, 1, vec![[1, 2, 3, 255], [0, 0, 0, 0]]).unwrap();
        let mut builder = PaletteBuilder::new(90, false, false);
        builder.add_frame(&frame);
        let palette = builder.build().unwrap();
        assert_eq!(palette.len(), 2);
        assert_eq!(palette.transparent_index(), Some(1));
        assert_eq!(palette.color(1), None);
        assert_eq!(palette.to_rgb_table(), vec![1, 2, 3, 0, 0, 0]);
    }

    #[test]
    fn multiple_frames_reserve_slot() {
        let frame = RgbaFrame::new(1, 1, vec![[5, 5, 5, 255]]).unwrap();
        let mut builder = PaletteBuilder::new(90, false, false);
        builder.add_frame(&frame);
        builder.add_frame(&frame);
        assert_eq!(builder.frames, 2);
        assert_eq!(builder.build().unwrap().transparent_index(), Some(1));
    }

    #[test]
    fn many_colors_are_clustered_within_limit() {
        for quality in [1, 50, 100] {
            let mut builder = PaletteBuilder::new(quality, false, false);
            builder.add_frame(&gradient(64, 64));
            builder.add_frame(&gradient(64, 64));
            let palette = builder.build().unwrap();
            assert!(palette.len() <= MAX_COLORS, "{}", palette.len());
            assert!(palette.colors().len() >= 4);
            assert_eq!(palette.transparent_index(), Some(palette.colors().len() as u8));
        }
    }

    #[test]
    fn transparent_only_warmup_keeps_an_opaque_entry() {
        let frame = RgbaFrame::new(2, 2, vec![[0, 0, 0, 0]; 4]).unwrap();
        let mut builder = PaletteBuilder::new(90, false, false);
        builder.add_frame(&frame);
        builder.add_frame(&frame);
        assert!(!builder.has_opaque());
        let palette = builder.build().unwrap();
        assert_eq!(palette.colors().len(), 1);
        assert_eq!(palette.transparent_index(), Some(1));
        assert_eq!(palette.nearest(Rgb::new(200, 0, 0)), 0);
    }

    #[test]
    fn overflowing_palette_is_rejected() {
        let colors = (0..=255).map(|i| Rgb::new(i as u8, 0, 0)).collect();
        assert!(Palette::new(colors, true).is_err());
    }

    #[test]
    fn nearest_picks_closest() {
        let palette = Palette::new(vec![Rgb::new(0, 0, 0), Rgb::new(255, 255, 255)], false).unwrap();
        assert_eq!(palette.nearest(Rgb::new(30, 30, 30)), 0);
        assert_eq!(palette.nearest(Rgb::new(200, 220, 200)), 1);
    }
}
