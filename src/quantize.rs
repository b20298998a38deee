//! Frame Quantizer
//!
//! Maps RGBA frames onto indices of the committed palette. Error diffusion
//! only ever looks at pixels of the frame being quantized.
use crate::frame::RgbaFrame;
use crate::palette::Palette;
use crate::types::Rgb;

const UNSET: u16 = u16::MAX;

/// Floyd-Steinberg kernel: (dx, dy, weight/16)
///
/// ```text
///        X   7
///    3   5   1
/// ```
const FLOYD_STEINBERG: [(isize, usize, f32); 4] = [
    (1, 0, 7. / 16.),
    (-1, 1, 3. / 16.),
    (0, 1, 5. / 16.),
    (1, 1, 1. / 16.),
];

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Dither {
    /// Nearest color only
    None,
    /// Error diffusion, the value scales the propagated error
    FloydSteinberg { strength: f32, serpentine: bool },
}

impl Dither {
    pub fn for_settings(quality: u8, fast: bool, extra_effort: bool) -> Dither {
        if fast {
            Dither::None
        } else {
            Dither::FloydSteinberg {
                strength: 0.5 + f32::from(quality.min(100)) / 200.,
                serpentine: extra_effort,
            }
        }
    }
}

pub struct Quantizer {
    palette: Palette,
    dither: Dither,
    /// Nearest index per 15-bit color, filled lazily
    cache: Vec<u16>,
}

impl Quantizer {
    pub fn new(palette: Palette, dither: Dither) -> Quantizer {
        Quantizer {
            palette,
            dither,
            cache: vec![UNSET; 1 << 15],
        }
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    #[inline]
    fn lookup(&mut self, c: Rgb) -> u8 {
        let key = (usize::from(c.r >> 3) << 10) | (usize::from(c.g >> 3) << 5) | usize::from(c.b >> 3);
        match self.cache[key] {
            UNSET => {
                let idx = self.palette.nearest(c);
                self.cache[key] = u16::from(idx);
                idx
            }
            idx => idx as u8,
        }
    }

    /// Exact palette members map onto themselves, everything else goes through the cache
    #[inline]
    fn index_of(&mut self, c: Rgb) -> u8 {
        match self.palette.exact(c) {
            Some(idx) => idx,
            None => self.lookup(c),
        }
    }

    /// Pixel with alpha 0 that has to be mapped anyway
    fn transparent_pixel(&mut self, px: [u8; 4]) -> u8 {
        match self.palette.transparent_index() {
            Some(t) => t,
            None => self.index_of(Rgb::new(px[0], px[1], px[2])),
        }
    }

    pub fn quantize(&mut self, frame: &RgbaFrame) -> Vec<u8> {
        match self.dither {
            Dither::None => frame
                .pixels
                .iter()
                .map(|&px| {
                    if px[3] == 0 {
                        self.transparent_pixel(px)
                    } else {
                        self.index_of(Rgb::new(px[0], px[1], px[2]))
                    }
                })
                .collect(),
            Dither::FloydSteinberg { strength, serpentine } => self.diffuse(frame, strength, serpentine),
        }
    }

    fn diffuse(&mut self, frame: &RgbaFrame, strength: f32, serpentine: bool) -> Vec<u8> {
        let width = frame.width as usize;
        let mut out = vec![0u8; frame.pixels.len()];
        // one pixel of padding on each side
        let mut cur = vec![[0f32; 3]; width + 2];
        let mut next = vec![[0f32; 3]; width + 2];

        for (y, row) in frame.pixels.chunks_exact(width).enumerate() {
            let reverse = serpentine && y % 2 == 1;
            for i in 0..width {
                let x = if reverse { width - 1 - i } else { i };
                let px = row[x];
                if px[3] == 0 {
                    out[y * width + x] = self.transparent_pixel(px);
                    continue;
                }
                let err = cur[x + 1];
                let target = [
                    (f32::from(px[0]) + err[0]).clamp(0., 255.),
                    (f32::from(px[1]) + err[1]).clamp(0., 255.),
                    (f32::from(px[2]) + err[2]).clamp(0., 255.),
                ];
                let wanted = Rgb::new(target[0].round() as u8, target[1].round() as u8, target[2].round() as u8);
                let idx = self.index_of(wanted);
                out[y * width + x] = idx;
                let got = self.palette.color(idx).unwrap_or(wanted);
                let e = [
                    (target[0] - f32::from(got.r)) * strength,
                    (target[1] - f32::from(got.g)) * strength,
                    (target[2] - f32::from(got.b)) * strength,
                ];
                for &(dx, dy, w) in &FLOYD_STEINBERG {
                    let dx = if reverse { -dx } else { dx };
                    let col = (x as isize + 1 + dx) as usize;
                    let buf = if dy == 0 { &mut cur } else { &mut next };
                    for c in 0..3 {
                        buf[col][c] += e[c] * w;
                    }
                }
            }
            std::mem::swap(&mut cur, &mut next);
            next.iter_mut().for_each(|e| *e = [0.; 3]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bw() -> Palette {
        Palette::new(vec![Rgb::new(0, 0, 0), Rgb::new(255, 255, 255)], true).unwrap()
    }

    fn gray(width: u32, height: u32, v: u8) -> RgbaFrame {
        RgbaFrame::new(width, height, vec![[v, v, v, 255]; (width * height) as usize]).unwrap()
    }

    #[test]
    fn nearest_without_dithering() {
        let mut q = Quantizer::new(bw(), Dither::None);
        let frame = RgbaFrame::new(3, 1, vec![[10, 10, 10, 255], [240, 240, 240, 255], [0, 0, 0, 0]]).unwrap();
        assert_eq!(q.quantize(&frame), vec![0, 1, 2]);
    }

    #[test]
    fn diffusion_mixes_for_mid_gray() {
        let mut q = Quantizer::new(bw(), Dither::FloydSteinberg { strength: 1., serpentine: false });
        let out = q.quantize(&gray(16, 16, 77));
        let white = out.iter().filter(|&&i| i == 1).count() as f32 / out.len() as f32;
        assert!((white - 0.3).abs() < 0.1, "{}", white);
    }

    #[test]
    fn exact_colors_have_no_error() {
        let palette = Palette::new(vec![Rgb::new(1, 2, 3), Rgb::new(4, 5, 6), Rgb::new(7, 8, 9)], false).unwrap();
        let mut q = Quantizer::new(palette, Dither::FloydSteinberg { strength: 1., serpentine: true });
        let frame = RgbaFrame::new(3, 2, vec![
            [1, 2, 3, 255], [4, 5, 6, 255], [7, 8, 9, 255],
            [7, 8, 9, 255], [1, 2, 3, 255], [4, 5, 6, 255],
        ]).unwrap();
        assert_eq!(q.quantize(&frame), vec![0, 1, 2, 2, 0, 1]);
    }

    #[test]
    fn transparent_without_slot_maps_to_nearest() {
        let palette = Palette::new(vec![Rgb::new(0, 0, 0), Rgb::new(255, 255, 255)], false).unwrap();
        let mut q = Quantizer::new(palette, Dither::None);
        let frame = RgbaFrame::new(1, 1, vec![[250, 250, 250, 0]]).unwrap();
        assert_eq!(q.quantize(&frame), vec![1]);
    }

    #[test]
    fn deterministic() {
        let mut q = Quantizer::new(bw(), Dither::for_settings(90, false, false));
        let frame = gray(9, 7, 130);
        assert_eq!(q.quantize(&frame), q.quantize(&frame));
    }
}
