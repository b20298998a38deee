//! GIF muxer

use crate::error::GifResult;

mod encoder;

pub use self::encoder::{ExtensionData, MuxState, Muxer};

/// Destination of the encoded byte stream.
///
/// Blocks arrive complete: a sink never sees a partial GIF block.
pub trait Sink {
	/// Receives one complete block
	fn write_block(&mut self, data: &[u8]) -> GifResult<()>;
	/// Called once after the trailer
	fn flush(&mut self) -> GifResult<()>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
	fn write_block(&mut self, data: &[u8]) -> GifResult<()> {
		(**self).write_block(data)
	}

	fn flush(&mut self) -> GifResult<()> {
		(**self).flush()
	}
}
