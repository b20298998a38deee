use std::io;
use std::io::prelude::*;

use tracing::debug;

use crate::differ::FrameDelta;
use crate::error::{Error, GifResult};
use crate::palette::Palette;
use crate::settings::Repeat;
use super::Sink;
use crate::traits::WriteBytesExt;
use crate::types::{Block, DisposalMethod, Extension};

pub enum ExtensionData {
	Control { flags: u8, delay: u16, trns: u8 },
	Repetitions(u16),
}

impl ExtensionData {
	pub fn new_control_ext(delay: u16, dispose: DisposalMethod,
						   needs_user_input: bool, trns: Option<u8>) -> ExtensionData {
		let mut flags = 0;
		let trns = match trns {
			Some(trns) => {
				flags |= 1;
				trns
			},
			None => 0
		};
		flags |= (needs_user_input as u8) << 1;
		flags |= (dispose as u8) << 2;
		ExtensionData::Control {
			flags,
			delay,
			trns
		}
	}
}

/// Muxer progress
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MuxState {
	Uninitialized,
	HeaderWritten,
	ImageBlockWritten,
	Finalized,
}

/// Serialises GIF blocks into a [`Sink`].
///
/// Every block is assembled in memory first and handed to the sink in one
/// piece, so a failing or aborted sink never sees half a block.
pub struct Muxer<S: Sink> {
	sink: S,
	state: MuxState,
	repeat: Repeat,
	buf: Vec<u8>,
	frames: usize,
}

impl<S: Sink> Muxer<S> {
	pub fn new(sink: S, repeat: Repeat) -> Self {
		Muxer {
			sink,
			state: MuxState::Uninitialized,
			repeat,
			buf: Vec::new(),
			frames: 0,
		}
	}

	pub fn state(&self) -> MuxState {
		self.state
	}

	/// Number of image blocks written
	pub fn frames(&self) -> usize {
		self.frames
	}

	/// Writes signature, screen descriptor, the global palette and the loop extension
	pub fn write_header(&mut self, width: u16, height: u16, palette: &Palette) -> GifResult<()> {
		if self.state != MuxState::Uninitialized {
			return Err(Error::Gif(format!("header written in state {:?}", self.state)));
		}
		if palette.is_empty() {
			return Err(Error::Gif("the global color table is empty".into()));
		}
		self.buf.clear();
		write_screen_desc(&mut self.buf, width, height, Some(&palette.to_rgb_table()))?;
		if let Some(count) = self.repeat.loop_count() {
			write_extension(&mut self.buf, ExtensionData::Repetitions(count))?;
		}
		self.emit()?;
		debug!(width, height, colors = palette.len(), repeat = ?self.repeat, "GIF header written");
		self.state = MuxState::HeaderWritten;
		Ok(())
	}

	/// Writes a complete frame: control extension, image descriptor and image data
	pub fn write_frame(&mut self, frame: &FrameDelta) -> GifResult<()> {
		match self.state {
			MuxState::HeaderWritten | MuxState::ImageBlockWritten => (),
			state => return Err(Error::Gif(format!("frame written in state {:?}", state))),
		}
		if frame.rect.is_empty() || frame.indices.len() != frame.rect.area() {
			return Err(Error::Gif(format!(
				"{} indices for a {}x{} image block",
				frame.indices.len(), frame.rect.width, frame.rect.height
			)));
		}
		let trns = frame.transparent.filter(|t| frame.indices.contains(t));
		self.buf.clear();
		write_extension(&mut self.buf, ExtensionData::new_control_ext(
			frame.delay.max(1),
			frame.dispose,
			false,
			trns
		))?;
		self.buf.write_le(Block::Image as u8)?;
		self.buf.write_le(frame.rect.left)?;
		self.buf.write_le(frame.rect.top)?;
		self.buf.write_le(frame.rect.width)?;
		self.buf.write_le(frame.rect.height)?;
		// no local color table, not interlaced
		self.buf.write_le(0u8)?;
		write_image_block(&mut self.buf, &frame.indices)?;
		self.emit()?;
		self.frames += 1;
		self.state = MuxState::ImageBlockWritten;
		Ok(())
	}

	/// Writes the trailer and flushes the sink. Without any frame, a
	/// header-only GIF of the given canvas size is produced.
	pub fn finish(&mut self, empty_width: u16, empty_height: u16) -> GifResult<()> {
		self.buf.clear();
		match self.state {
			MuxState::Finalized => return Err(Error::InvalidState("GIF already finalized")),
			MuxState::Uninitialized => {
				write_screen_desc(&mut self.buf, empty_width.max(1), empty_height.max(1), None)?;
			},
			MuxState::HeaderWritten | MuxState::ImageBlockWritten => (),
		}
		self.buf.write_le(Block::Trailer as u8)?;
		self.emit()?;
		self.sink.flush()?;
		self.state = MuxState::Finalized;
		debug!(frames = self.frames, "GIF finalized");
		Ok(())
	}

	pub fn into_sink(self) -> S {
		self.sink
	}

	fn emit(&mut self) -> GifResult<()> {
		self.sink.write_block(&self.buf)
	}
}

/// Writes the signature and the logical screen descriptor
fn write_screen_desc(w: &mut Vec<u8>, width: u16, height: u16, palette: Option<&[u8]>) -> io::Result<()> {
	w.write_all(b"GIF89a")?;
	w.write_le(width)?;
	w.write_le(height)?;
	match palette {
		Some(table) => {
			let size = flag_size(table.len() / 3);
			w.write_le(0b1000_0000 | size << 4 | size)?; // packed field
			w.write_le(0u8)?; // bg index
			w.write_le(0u8)?; // aspect ratio
			write_color_table(w, table)
		},
		None => {
			w.write_le(0u8)?;
			w.write_le(0u8)?;
			w.write_le(0u8)
		}
	}
}

fn write_image_block(w: &mut Vec<u8>, data: &[u8]) -> io::Result<()> {
	// GIF89a requires a minimal code size of at least 2
	let min_code_size: u8 = (flag_size(*data.iter().max().unwrap_or(&0) as usize + 1) + 1).max(2);
	let mut compressed = Vec::with_capacity(data.len() / 2 + 16);
	{
		let mut enc = lzw::Encoder::new(lzw::LsbWriter::new(&mut compressed), min_code_size)?;
		enc.encode_bytes(data)?;
	}
	w.write_le(min_code_size)?;
	write_sub_blocks(w, &compressed)?;
	w.write_le(0u8)
}

fn write_sub_blocks(w: &mut Vec<u8>, data: &[u8]) -> io::Result<()> {
	for chunk in data.chunks(0xFF) {
		w.write_le(chunk.len() as u8)?;
		w.write_all(chunk)?;
	}
	Ok(())
}

fn write_color_table(w: &mut Vec<u8>, table: &[u8]) -> io::Result<()> {
	let num_colors = table.len() / 3;
	let size = flag_size(num_colors);
	w.write_all(&table[..num_colors * 3])?;
	// tables always hold a power of two entries
	for _ in 0..((2 << size) - num_colors) {
		w.write_all(&[0, 0, 0])?
	}
	Ok(())
}

fn write_extension(w: &mut Vec<u8>, extension: ExtensionData) -> io::Result<()> {
	use self::ExtensionData::*;
	match extension {
		Control { flags, delay, trns } => {
			w.write_le(Block::Extension as u8)?;
			w.write_le(Extension::Control as u8)?;
			w.write_le(4u8)?;
			w.write_le(flags)?;
			w.write_le(delay)?;
			w.write_le(trns)?;
			w.write_le(0u8)
		},
		Repetitions(count) => {
			let count = count.to_le_bytes();
			write_raw_extension(w, Extension::Application as u8, &[b"NETSCAPE2.0", &[1, count[0], count[1]]])
		}
	}
}

/// Writes an extension made of the given sub-blocks
fn write_raw_extension(w: &mut Vec<u8>, func: u8, data: &[&[u8]]) -> io::Result<()> {
	w.write_le(Block::Extension as u8)?;
	w.write_le(func)?;
	for block in data {
		write_sub_blocks(w, block)?;
	}
	w.write_le(0u8)
}

// Color table size converted to flag bits
fn flag_size(size: usize) -> u8 {
	match size {
		0  ..=2   => 0,
		3  ..=4   => 1,
		5  ..=8   => 2,
		9  ..=16  => 3,
		17 ..=32  => 4,
		33 ..=64  => 5,
		65 ..=128 => 6,
		_ => 7
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::types::{Rect, Rgb};

	#[derive(Default)]
	struct Recorder {
		blocks: Vec<Vec<u8>>,
		flushes: usize,
	}

	impl Sink for Recorder {
		fn write_block(&mut self, data: &[u8]) -> GifResult<()> {
			self.blocks.push(data.to_vec());
			Ok(())
		}

		fn flush(&mut self) -> GifResult<()> {
			self.flushes += 1;
			Ok(())
		}
	}

	fn palette(n: usize) -> Palette {
		Palette::new((0..n).map(|i| Rgb::new(i as u8, 0, 0)).collect(), true).unwrap()
	}

	#[test]
	fn flag_sizes() {
		assert_eq!(flag_size(1), 0);
		assert_eq!(flag_size(2), 0);
		assert_eq!(flag_size(7), 2);
		assert_eq!(flag_size(16), 3);
		assert_eq!(flag_size(17), 4);
		assert_eq!(flag_size(256), 7);
	}

	#[test]
	fn header_layout() {
		let mut mux = Muxer::new(Recorder::default(), Repeat::Finite(3));
		mux.write_header(300, 2, &palette(2)).unwrap();
		let header = &mux.into_sink().blocks[0];
		assert_eq!(&header[..6], b"GIF89a");
		assert_eq!(&header[6..10], &[44, 1, 2, 0]);
		// 3 colors padded to 4
		assert_eq!(header[10], 0b1001_0001);
		assert_eq!(header.len(), 13 + 4 * 3 + 19);
		let app = &header[25..];
		assert_eq!(&app[..3], &[0x21, 0xFF, 11]);
		assert_eq!(&app[3..14], b"NETSCAPE2.0");
		assert_eq!(&app[14..], &[3, 1, 3, 0, 0]);
	}

	#[test]
	fn disabled_loop_has_no_extension() {
		let mut mux = Muxer::new(Recorder::default(), Repeat::Disabled);
		mux.write_header(1, 1, &palette(1)).unwrap();
		assert_eq!(mux.into_sink().blocks[0].len(), 13 + 2 * 3);
	}

	#[test]
	fn image_data_is_split_into_sub_blocks() {
		let mut mux = Muxer::new(Recorder::default(), Repeat::Infinite);
		let pal = palette(200);
		mux.write_header(64, 64, &pal).unwrap();
		// noise compresses badly, so the data spans several sub-blocks
		let mut state = 12345u32;
		let indices: Vec<u8> = (0..64 * 64).map(|_| {
			state = state.wrapping_mul(1103515245).wrapping_add(12345);
			((state >> 16) % 200) as u8
		}).collect();
		mux.write_frame(&FrameDelta {
			rect: Rect::full(64, 64),
			indices,
			transparent: Some(200),
			dispose: DisposalMethod::Keep,
			delay: 7,
		}).unwrap();
		let frame = &mux.into_sink().blocks[1];
		// control extension
		assert_eq!(&frame[..4], &[0x21, 0xF9, 4, 1 << 2]);
		assert_eq!(&frame[4..8], &[7, 0, 0, 0]);
		assert_eq!(frame[8], 0x2C);
		assert_eq!(frame[17], 0);
		assert_eq!(frame[18], 8);
		let mut pos = 19;
		let mut blocks = 0;
		loop {
			let len = frame[pos] as usize;
			pos += 1 + len;
			if len == 0 {
				break;
			}
			assert!(len <= 255);
			blocks += 1;
		}
		assert!(blocks > 1);
		assert_eq!(pos, frame.len());
	}

	#[test]
	fn state_machine() {
		let mut mux = Muxer::new(Recorder::default(), Repeat::Infinite);
		let delta = FrameDelta {
			rect: Rect::full(1, 1),
			indices: vec![0],
			transparent: None,
			dispose: DisposalMethod::Keep,
			delay: 1,
		};
		assert!(mux.write_frame(&delta).is_err());
		mux.write_header(1, 1, &palette(1)).unwrap();
		assert!(mux.write_header(1, 1, &palette(1)).is_err());
		mux.write_frame(&delta).unwrap();
		assert_eq!(mux.state(), MuxState::ImageBlockWritten);
		mux.finish(1, 1).unwrap();
		assert_eq!(mux.state(), MuxState::Finalized);
		assert_eq!(mux.finish(1, 1).unwrap_err().code(), crate::ResultCode::INVALID_STATE);
		assert!(mux.write_frame(&delta).is_err());
		let sink = mux.into_sink();
		assert_eq!(sink.flushes, 1);
		assert_eq!(sink.blocks.last().unwrap(), &vec![0x3B]);
	}

	#[test]
	fn empty_gif() {
		let mut mux = Muxer::new(Recorder::default(), Repeat::Infinite);
		mux.finish(0, 0).unwrap();
		let sink = mux.into_sink();
		assert_eq!(sink.blocks, vec![b"GIF89a\x01\x00\x01\x00\x00\x00\x00\x3B".to_vec()]);
	}
}
