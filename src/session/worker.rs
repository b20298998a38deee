//! Background encoder thread
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, trace, warn};

use super::{ErrorMessageCallback, ProgressCallback, Shared};
use crate::differ::Differ;
use crate::error::{Error, GifResult};
use crate::frame::RgbaFrame;
use crate::palette::PaletteBuilder;
use crate::quantize::{Dither, Quantizer};
use crate::resize::{binarize_alpha, resize, Filter};
use crate::settings::Settings;
use crate::writer::{Muxer, Sink};

/// Delay of a lone frame, in hundredths of a second
const DEFAULT_DELAY: u16 = 10;

/// Limit on how far the warm-up stretches while every frame is transparent
const MAX_WARMUP_FACTOR: usize = 4;

pub(crate) struct Job {
    pub index: u32,
    pub pts: f64,
    pub frame: RgbaFrame,
}

enum Stage {
    /// Collecting palette samples, frames are held back
    Warmup {
        builder: PaletteBuilder,
        frames: Vec<(f64, RgbaFrame)>,
    },
    /// Palette committed and header written
    Encoding(Pipeline),
}

/// Quantizes and diffs frames once the palette is fixed
struct Pipeline {
    quantizer: Quantizer,
    differ: Differ,
    /// Last quantized frame, written once the next timestamp gives its delay
    held: Option<Vec<u8>>,
    /// Timestamp of the first frame, in hundredths of a second
    start: u64,
    /// Delay written so far, counted from `start`
    emitted: u64,
    last_delay: Option<u16>,
    skipped: usize,
}

impl Pipeline {
    fn push<S: Sink>(&mut self, muxer: &mut Muxer<S>, pts: f64, frame: &RgbaFrame) -> GifResult<()> {
        let indices = self.quantizer.quantize(frame);
        match self.held.replace(indices) {
            Some(prev) => {
                let end = centiseconds(pts);
                let delay = end.saturating_sub(self.start + self.emitted);
                self.emit(muxer, prev, delay)
            }
            None => {
                self.start = centiseconds(pts);
                Ok(())
            }
        }
    }

    fn emit<S: Sink>(&mut self, muxer: &mut Muxer<S>, indices: Vec<u8>, delay: u64) -> GifResult<()> {
        if delay == 0 {
            // shorter than the GIF timer resolution
            self.skipped += 1;
            trace!("frame skipped, zero delay");
            return Ok(());
        }
        let delay = delay.min(u64::from(u16::MAX)) as u16;
        self.emitted += u64::from(delay);
        self.last_delay = Some(delay);
        if let Some(delta) = self.differ.push(self.quantizer.palette(), &indices, delay) {
            trace!(rect = ?delta.rect, delay = delta.delay, "writing frame");
            muxer.write_frame(&delta)?;
        }
        Ok(())
    }

    /// Writes the held frame and the block retained by the differ
    fn flush<S: Sink>(&mut self, muxer: &mut Muxer<S>) -> GifResult<()> {
        if let Some(last) = self.held.take() {
            let delay = if self.start > 0 {
                self.start
            } else {
                u64::from(self.last_delay.unwrap_or(DEFAULT_DELAY))
            };
            self.emit(muxer, last, delay)?;
        }
        if let Some(delta) = self.differ.finish() {
            muxer.write_frame(&delta)?;
        }
        debug!(merged = self.differ.merged(), skipped = self.skipped, "frames flushed");
        Ok(())
    }
}

fn centiseconds(pts: f64) -> u64 {
    (pts * 100.).round() as u64
}

pub(crate) struct Worker<S: Sink> {
    settings: Settings,
    muxer: Muxer<S>,
    progress: Option<ProgressCallback>,
    on_error: Option<ErrorMessageCallback>,
    shared: Arc<Shared>,
    /// Output size, taken from the first frame unless configured
    canvas: Option<(u32, u32)>,
    filter: Filter,
    warmup_len: usize,
    stage: Stage,
}

impl<S: Sink> Worker<S> {
    pub fn new(
        settings: Settings,
        sink: S,
        progress: Option<ProgressCallback>,
        on_error: Option<ErrorMessageCallback>,
        shared: Arc<Shared>,
    ) -> Worker<S> {
        Worker {
            muxer: Muxer::new(sink, settings.repeat),
            progress,
            on_error,
            shared,
            canvas: None,
            filter: if settings.fast { Filter::Nearest } else { Filter::Bilinear },
            warmup_len: if settings.extra_effort { 24 } else { 8 },
            stage: Stage::Warmup {
                builder: PaletteBuilder::new(settings.quality, settings.fast, settings.extra_effort),
                frames: Vec::new(),
            },
            settings,
        }
    }

    /// Drains `jobs` until every sender is gone. After a failure the queue is
    /// still drained so producers never block, but nothing is written.
    pub fn run(mut self, jobs: Receiver<Job>) -> GifResult<()> {
        let mut result = Ok(());
        for job in jobs.iter() {
            if result.is_ok() && self.shared.stopped() {
                result = Err(Error::Aborted);
            }
            if result.is_err() {
                continue;
            }
            trace!(index = job.index, pts = job.pts, "frame dequeued");
            result = self.handle(job).and_then(|_| self.report_progress());
            if let Err(err) = &result {
                self.fail(err);
            }
        }
        if result.is_ok() && self.shared.stopped() {
            result = Err(Error::Aborted);
        }
        if result.is_ok() {
            result = self.finish();
            if let Err(err) = &result {
                self.fail(err);
            }
        }
        result
    }

    fn handle(&mut self, job: Job) -> GifResult<()> {
        let (width, height) = match self.canvas {
            Some(size) => size,
            None => {
                let size = self.settings.output_size(job.frame.width, job.frame.height);
                self.canvas = Some(size);
                size
            }
        };
        let mut frame = resize(&job.frame, width, height, self.filter);
        binarize_alpha(&mut frame);

        let commit = match &mut self.stage {
            Stage::Warmup { builder, frames } => {
                builder.add_frame(&frame);
                frames.push((job.pts, frame));
                // a warm-up with no opaque pixel yet would fix a palette with no real colors
                let warm = builder.has_opaque() || frames.len() >= self.warmup_len * MAX_WARMUP_FACTOR;
                warm && frames.len() >= self.warmup_len
            }
            Stage::Encoding(pipeline) => {
                return pipeline.push(&mut self.muxer, job.pts, &frame);
            }
        };
        if commit {
            self.commit()?;
        }
        Ok(())
    }

    /// Fixes the palette, writes the header and encodes the held back frames
    fn commit(&mut self) -> GifResult<()> {
        let (width, height) = self.canvas.unwrap_or((1, 1));
        let settings = self.settings;
        let placeholder = Stage::Warmup {
            builder: PaletteBuilder::new(settings.quality, settings.fast, settings.extra_effort),
            frames: Vec::new(),
        };
        let (builder, frames) = match std::mem::replace(&mut self.stage, placeholder) {
            Stage::Warmup { builder, frames } => (builder, frames),
            encoding => {
                self.stage = encoding;
                return Ok(());
            }
        };
        let palette = builder.build()?;
        self.muxer.write_header(width as u16, height as u16, &palette)?;
        info!(width, height, colors = palette.len(), "palette committed");

        let dither = Dither::for_settings(settings.quality, settings.fast, settings.extra_effort);
        let mut pipeline = Pipeline {
            quantizer: Quantizer::new(palette, dither),
            differ: Differ::new(width as u16, height as u16, settings.motion_quality, settings.lossy_quality),
            held: None,
            start: 0,
            emitted: 0,
            last_delay: None,
            skipped: 0,
        };
        for (pts, frame) in &frames {
            pipeline.push(&mut self.muxer, *pts, frame)?;
        }
        self.stage = Stage::Encoding(pipeline);
        Ok(())
    }

    fn finish(&mut self) -> GifResult<()> {
        if matches!(&self.stage, Stage::Warmup { frames, .. } if !frames.is_empty()) {
            self.commit()?;
        }
        let skipped = match &mut self.stage {
            Stage::Encoding(pipeline) => {
                pipeline.flush(&mut self.muxer)?;
                pipeline.skipped
            }
            Stage::Warmup { .. } => 0,
        };
        if skipped > 0 {
            self.message(&format!("{} frames were skipped because their duration rounds to zero", skipped));
        }
        let (width, height) = (self.settings.width as u16, self.settings.height as u16);
        self.muxer.finish(width, height)?;
        info!(frames = self.muxer.frames(), "GIF complete");
        Ok(())
    }

    fn report_progress(&mut self) -> GifResult<()> {
        let progress = match self.progress.as_mut() {
            Some(progress) => progress,
            None => return Ok(()),
        };
        match panic::catch_unwind(AssertUnwindSafe(|| progress())) {
            Ok(true) => Ok(()),
            Ok(false) => {
                info!("aborted by progress callback");
                Err(Error::Aborted)
            }
            Err(_) => {
                warn!("progress callback panicked, aborting");
                Err(Error::Aborted)
            }
        }
    }

    fn fail(&mut self, err: &Error) {
        self.shared.fail(err);
        if let Error::Aborted = err {
            return;
        }
        error!(%err, "encoding failed");
        self.message(&err.to_string());
    }

    /// Forwards a message to the error callback, ignoring its panics
    fn message(&mut self, text: &str) {
        if let Some(on_error) = self.on_error.as_mut() {
            if panic::catch_unwind(AssertUnwindSafe(|| on_error(text))).is_err() {
                warn!("error message callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Memory(Arc<Mutex<Vec<u8>>>);

    impl Sink for Memory {
        fn write_block(&mut self, data: &[u8]) -> GifResult<()> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(())
        }

        fn flush(&mut self) -> GifResult<()> {
            Ok(())
        }
    }

    fn frame(v: u8) -> RgbaFrame {
        RgbaFrame::new(4, 4, vec![[v, 255 - v, v / 2, 255]; 16]).unwrap()
    }

    fn encode(settings: Settings, pts: &[f64], on_error: Option<ErrorMessageCallback>) -> (GifResult<()>, Vec<u8>) {
        let out = Memory::default();
        let worker = Worker::new(settings, out.clone(), None, on_error, Arc::default());
        let (sender, receiver) = bounded(pts.len().max(1));
        for (i, &pts) in pts.iter().enumerate() {
            sender.send(Job { index: i as u32, pts, frame: frame(i as u8 * 20) }).unwrap();
        }
        drop(sender);
        let result = worker.run(receiver);
        let data = out.0.lock().unwrap().clone();
        (result, data)
    }

    fn delays(data: &[u8]) -> Vec<u16> {
        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options.read_info(data).unwrap();
        let mut delays = Vec::new();
        while let Some(frame) = decoder.read_next_frame().unwrap() {
            delays.push(frame.delay);
        }
        delays
    }

    #[test]
    fn empty_stream() {
        let (result, data) = encode(Settings::default(), &[], None);
        result.unwrap();
        assert_eq!(data, b"GIF89a\x01\x00\x01\x00\x00\x00\x00\x3B".to_vec());
    }

    #[test]
    fn delays_follow_timestamps() {
        let (result, data) = encode(Settings::default(), &[0., 0.05, 0.12, 0.3], None);
        result.unwrap();
        assert_eq!(delays(&data), vec![5, 7, 18, 18]);
    }

    #[test]
    fn leading_offset_is_the_last_delay() {
        let (result, data) = encode(Settings::default(), &[0.2, 0.3], None);
        result.unwrap();
        assert_eq!(delays(&data), vec![10, 20]);
    }

    #[test]
    fn single_frame_gets_default_delay() {
        let (result, data) = encode(Settings::default(), &[0.], None);
        result.unwrap();
        assert_eq!(delays(&data), vec![DEFAULT_DELAY]);
    }

    #[test]
    fn zero_delay_frames_are_skipped_with_a_warning() {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let log = messages.clone();
        let on_error: ErrorMessageCallback = Box::new(move |text: &str| log.lock().unwrap().push(text.to_owned()));
        let (result, data) = encode(Settings::default(), &[0., 0.001, 0.1], Some(on_error));
        result.unwrap();
        assert_eq!(delays(&data), vec![10, 10]);
        assert_eq!(messages.lock().unwrap().len(), 1);
    }

    #[test]
    fn frames_after_the_warmup_window() {
        let pts: Vec<f64> = (0..12).map(|i| f64::from(i) * 0.04).collect();
        let (result, data) = encode(Settings::default(), &pts, None);
        result.unwrap();
        assert_eq!(delays(&data), vec![4; 12]);
    }

    #[test]
    fn stop_flag_prevents_writes() {
        let out = Memory::default();
        let shared: Arc<Shared> = Arc::default();
        shared.stop();
        let worker = Worker::new(Settings::default(), out.clone(), None, None, shared);
        let (sender, receiver) = bounded(1);
        sender.send(Job { index: 0, pts: 0., frame: frame(1) }).unwrap();
        drop(sender);
        assert_eq!(worker.run(receiver).unwrap_err().code(), crate::ResultCode::ABORTED);
        assert!(out.0.lock().unwrap().is_empty());
    }
}
