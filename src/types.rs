//! Common types shared by the pipeline stages and the muxer

enum_from_primitive!{
/// Disposal method
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum DisposalMethod {
    Any = 0,
    Keep = 1,
    Background = 2,
    Previous = 3
}
}

enum_from_primitive!{
/// Known block types
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Block {
    Image = 0x2C,
    Extension = 0x21,
    Trailer = 0x3B
}
}

enum_from_primitive!{
/// Known GIF extensions
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Extension {
    Text = 0x01,
    Control = 0xF9,
    Comment = 0xFE,
    Application = 0xFF
}
}

/// 8-bit RGB color
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Rgb {
        Rgb { r, g, b }
    }

    /// Weighted squared distance, green counts most
    #[inline]
    pub fn diff(self, other: Rgb) -> u32 {
        let dr = i32::from(self.r) - i32::from(other.r);
        let dg = i32::from(self.g) - i32::from(other.g);
        let db = i32::from(self.b) - i32::from(other.b);
        (dr * dr * 2 + dg * dg * 3 + db * db) as u32
    }
}

/// Largest value `Rgb::diff` can return
pub const MAX_COLOR_DIFF: u32 = 255 * 255 * 6;

/// Rectangle on the logical screen
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Rect {
    pub left: u16,
    pub top: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn full(width: u16, height: u16) -> Rect {
        Rect { left: 0, top: 0, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enum_primitive::FromPrimitive;

    #[test]
    fn disposal_from_flag_bits() {
        let flags = 0b0000_1001u8;
        assert_eq!(DisposalMethod::from_u8((flags >> 2) & 0b111), Some(DisposalMethod::Background));
        assert_eq!(DisposalMethod::from_u8(7), None);
        assert_eq!(Block::from_u8(0x3B), Some(Block::Trailer));
        assert_eq!(Extension::from_u8(0xF9), Some(Extension::Control));
    }

    #[test]
    fn color_diff() {
        let black = Rgb::new(0, 0, 0);
        assert_eq!(black.diff(black), 0);
        assert_eq!(black.diff(Rgb::new(255, 255, 255)), MAX_COLOR_DIFF);
        assert!(black.diff(Rgb::new(0, 10, 0)) > black.diff(Rgb::new(0, 0, 10)));
    }
}
