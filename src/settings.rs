//! Encoder configuration
use crate::error::{Error, GifResult};
use crate::traits::{HasParameters, Parameter};

/// Loop behaviour of the animation.
///
/// The raw C convention is kept by [`Repeat::from_raw`]: `0` loops forever,
/// negative values disable looping and positive values repeat that many times.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Repeat {
    #[default]
    Infinite,
    Finite(u16),
    Disabled,
}

impl Repeat {
    pub fn from_raw(raw: i16) -> Repeat {
        match raw {
            0 => Repeat::Infinite,
            n if n < 0 => Repeat::Disabled,
            n => Repeat::Finite(n as u16),
        }
    }

    pub fn to_raw(self) -> i16 {
        match self {
            Repeat::Infinite => 0,
            Repeat::Disabled => -1,
            Repeat::Finite(n) => n.min(i16::MAX as u16) as i16,
        }
    }

    /// Loop count stored in the NETSCAPE2.0 extension, `None` if it is omitted
    pub(crate) fn loop_count(self) -> Option<u16> {
        match self {
            Repeat::Infinite => Some(0),
            Repeat::Finite(n) => Some(n),
            Repeat::Disabled => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Output width, 0 keeps the width of the first frame
    pub width: u32,
    /// Output height, 0 keeps the height of the first frame. Aspect ratio is not preserved.
    pub height: u32,
    /// 1-100
    pub quality: u8,
    /// Lower quality, but faster encode
    pub fast: bool,
    pub repeat: Repeat,
    /// Slower, more exhaustive palette search
    pub extra_effort: bool,
    /// 1-100, lower values suppress low-amplitude changes between frames
    pub motion_quality: Option<u8>,
    /// 1-100, lower values trade pixel accuracy for LZW compressibility
    pub lossy_quality: Option<u8>,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            width: 0,
            height: 0,
            quality: 90,
            fast: false,
            repeat: Repeat::Infinite,
            extra_effort: false,
            motion_quality: None,
            lossy_quality: None,
        }
    }
}

impl HasParameters for Settings {}

impl Settings {
    pub fn validate(&self) -> GifResult<()> {
        check_percent("quality", self.quality)?;
        if let Some(q) = self.motion_quality {
            check_percent("motion quality", q)?;
        }
        if let Some(q) = self.lossy_quality {
            check_percent("lossy quality", q)?;
        }
        if self.width > u32::from(u16::MAX) || self.height > u32::from(u16::MAX) {
            return Err(Error::InvalidInput(format!(
                "output size {}x{} exceeds the GIF limit of 65535",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Canvas size for a source frame of the given dimensions
    pub(crate) fn output_size(&self, src_width: u32, src_height: u32) -> (u32, u32) {
        let width = if self.width > 0 { self.width } else { src_width };
        let height = if self.height > 0 { self.height } else { src_height };
        (width, height)
    }
}

fn check_percent(what: &str, value: u8) -> GifResult<()> {
    if (1..=100).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("{} must be within 1-100, got {}", what, value)))
    }
}

/// Encoding quality, 1-100
#[derive(Debug, Copy, Clone)]
pub struct Quality(pub u8);

/// Fast, lower quality mode
#[derive(Debug, Copy, Clone)]
pub struct Fast(pub bool);

#[derive(Debug, Copy, Clone)]
pub struct ExtraEffort(pub bool);

#[derive(Debug, Copy, Clone)]
pub struct MotionQuality(pub u8);

#[derive(Debug, Copy, Clone)]
pub struct LossyQuality(pub u8);

/// Output dimensions, 0 keeps the source dimension
#[derive(Debug, Copy, Clone)]
pub struct Size(pub u32, pub u32);

impl Parameter<Settings> for Quality {
    fn set_param(self, this: &mut Settings) {
        this.quality = self.0
    }
}

impl Parameter<Settings> for Fast {
    fn set_param(self, this: &mut Settings) {
        this.fast = self.0
    }
}

impl Parameter<Settings> for ExtraEffort {
    fn set_param(self, this: &mut Settings) {
        this.extra_effort = self.0
    }
}

impl Parameter<Settings> for MotionQuality {
    fn set_param(self, this: &mut Settings) {
        this.motion_quality = Some(self.0)
    }
}

impl Parameter<Settings> for LossyQuality {
    fn set_param(self, this: &mut Settings) {
        this.lossy_quality = Some(self.0)
    }
}

impl Parameter<Settings> for Size {
    fn set_param(self, this: &mut Settings) {
        this.width = self.0;
        this.height = self.1;
    }
}

impl Parameter<Settings> for Repeat {
    fn set_param(self, this: &mut Settings) {
        this.repeat = self
    }
}
