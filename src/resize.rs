//! Resampling to the output size and alpha binarisation
use crate::frame::RgbaFrame;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Bilinear,
}

/// Stretches `frame` to exactly `width`×`height`
pub fn resize(frame: &RgbaFrame, width: u32, height: u32, filter: Filter) -> RgbaFrame {
    if frame.width == width && frame.height == height {
        return frame.clone();
    }
    let pixels = match filter {
        Filter::Nearest => nearest(frame, width, height),
        Filter::Bilinear => bilinear(frame, width, height),
    };
    RgbaFrame { width, height, pixels }
}

fn nearest(frame: &RgbaFrame, width: u32, height: u32) -> Vec<[u8; 4]> {
    let (sw, sh) = (frame.width as usize, frame.height as usize);
    let (dw, dh) = (width as usize, height as usize);
    let mut out = Vec::with_capacity(dw * dh);
    for y in 0..dh {
        let sy = (y * sh / dh).min(sh - 1);
        let row = &frame.pixels[sy * sw..(sy + 1) * sw];
        out.extend((0..dw).map(|x| row[(x * sw / dw).min(sw - 1)]));
    }
    out
}

/// Source coordinate and blend factor for a destination sample
#[inline]
fn sample_pos(dst: usize, src_len: usize, dst_len: usize) -> (usize, usize, f32) {
    let pos = ((dst as f32 + 0.5) * src_len as f32 / dst_len as f32 - 0.5).max(0.);
    let lo = (pos.floor() as usize).min(src_len - 1);
    let hi = (lo + 1).min(src_len - 1);
    (lo, hi, pos - lo as f32)
}

fn bilinear(frame: &RgbaFrame, width: u32, height: u32) -> Vec<[u8; 4]> {
    let (sw, sh) = (frame.width as usize, frame.height as usize);
    let (dw, dh) = (width as usize, height as usize);
    let px = |x: usize, y: usize| frame.pixels[y * sw + x];
    let columns: Vec<_> = (0..dw).map(|x| sample_pos(x, sw, dw)).collect();
    let mut out = Vec::with_capacity(dw * dh);
    for y in 0..dh {
        let (y0, y1, fy) = sample_pos(y, sh, dh);
        for &(x0, x1, fx) in &columns {
            let taps = [
                (px(x0, y0), (1. - fx) * (1. - fy)),
                (px(x1, y0), fx * (1. - fy)),
                (px(x0, y1), (1. - fx) * fy),
                (px(x1, y1), fx * fy),
            ];
            // colors are weighted by alpha so transparent pixels don't bleed
            let mut acc = [0f32; 4];
            for (p, w) in taps {
                let wa = w * f32::from(p[3]);
                acc[0] += f32::from(p[0]) * wa;
                acc[1] += f32::from(p[1]) * wa;
                acc[2] += f32::from(p[2]) * wa;
                acc[3] += wa;
            }
            out.push(if acc[3] > 0. {
                [
                    (acc[0] / acc[3]).round().min(255.) as u8,
                    (acc[1] / acc[3]).round().min(255.) as u8,
                    (acc[2] / acc[3]).round().min(255.) as u8,
                    acc[3].round().min(255.) as u8,
                ]
            } else {
                [0, 0, 0, 0]
            });
        }
    }
    out
}

const DITHER: [u8; 64] = [
     0*2+8,48*2+8,12*2+8,60*2+8, 3*2+8,51*2+8,15*2+8,63*2+8,
    32*2+8,16*2+8,44*2+8,28*2+8,35*2+8,19*2+8,47*2+8,31*2+8,
     8*2+8,56*2+8, 4*2+8,52*2+8,11*2+8,59*2+8, 7*2+8,55*2+8,
    40*2+8,24*2+8,36*2+8,20*2+8,43*2+8,27*2+8,39*2+8,23*2+8,
     2*2+8,50*2+8,14*2+8,62*2+8, 1*2+8,49*2+8,13*2+8,61*2+8,
    34*2+8,18*2+8,46*2+8,30*2+8,33*2+8,17*2+8,45*2+8,29*2+8,
    10*2+8,58*2+8, 6*2+8,54*2+8, 9*2+8,57*2+8, 5*2+8,53*2+8,
    42*2+8,26*2+8,38*2+8,22*2+8,41*2+8,25*2+8,37*2+8,21*2+8];

/// GIF has 1-bit transparency: partial alpha is turned into 0 or 255
/// with an ordered dither pattern.
pub fn binarize_alpha(frame: &mut RgbaFrame) {
    let width = frame.width as usize;
    for (i, px) in frame.pixels.iter_mut().enumerate() {
        if px[3] < 255 {
            let (x, y) = (i % width, i / width);
            if px[3] < DITHER[(y & 7) * 8 + (x & 7)] {
                *px = [0, 0, 0, 0];
            } else {
                px[3] = 255;
            }
        }
    }
}
