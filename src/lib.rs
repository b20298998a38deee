//! # Animated GIF encoder
//!
//! Frames are submitted with a presentation timestamp, one by one, while a
//! background thread builds a shared palette, quantizes and diffs the frames
//! and writes the GIF to the selected output as it goes.
//!
//! ```rust,no_run
//! use gifweave::{Session, Settings, HasParameters, Quality};
//!
//! let mut settings = Settings::default();
//! settings.set(Quality(80));
//! let mut session = Session::new(settings).unwrap();
//! session.set_file_output("out.gif").unwrap();
//! let pixels = vec![0u8; 64 * 64 * 4];
//! for i in 0..10 {
//!     session.add_frame_rgba(i, 64, 64, &pixels, f64::from(i) * 0.1).unwrap();
//! }
//! session.finish().unwrap();
//! ```

#[macro_use] extern crate enum_primitive;

mod traits;
mod types;
mod error;
mod settings;
mod frame;
mod resize;
mod palette;
mod quantize;
mod differ;
mod writer;
mod session;

#[cfg(feature = "c_api")]
pub mod c_api;

pub use traits::{HasParameters, Parameter};
pub use types::{Block, Extension, DisposalMethod, Rect, Rgb};
pub use error::{Error, GifResult, ResultCode};

/// Encoder configuration parameters
pub use settings::{Settings, Repeat, Quality, Fast, ExtraEffort, MotionQuality, LossyQuality, Size};

pub use frame::{PixelFormat, RgbaFrame};
pub use palette::{Palette, MAX_COLORS};
pub use differ::FrameDelta;
pub use writer::{Muxer, MuxState, ExtensionData, Sink};
pub use session::{Session, ProgressCallback, ErrorMessageCallback, QUEUE_DEPTH};
pub use session::{CallbackSink, FileSink, WriterSink, WriteCallback};
