//! Encoding session
//!
//! A [`Session`] accepts frames on the caller's thread and hands them to a
//! single background worker through a bounded queue. The worker owns the
//! palette, the differ and the muxer; the only state shared between the two
//! threads is the queue and the stop flag.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, info};

use crate::error::{Error, GifResult};
use crate::frame::{PixelFormat, RgbaFrame};
use crate::settings::Settings;
use crate::traits::{HasParameters, Parameter};
use crate::writer::Sink;

mod sink;
mod worker;

pub use self::sink::{CallbackSink, FileSink, WriteCallback, WriterSink};
use self::worker::{Job, Worker};

/// Frames buffered between producer and worker before `add_frame_*` blocks
pub const QUEUE_DEPTH: usize = 4;

/// Called on the worker thread after every frame. Returning `false` aborts.
pub type ProgressCallback = Box<dyn FnMut() -> bool + Send>;

/// Receives error and warning messages on the worker thread
pub type ErrorMessageCallback = Box<dyn FnMut(&str) + Send>;

/// State visible to both threads
#[derive(Default)]
pub(crate) struct Shared {
    stop: AtomicBool,
    failure: Mutex<Option<Error>>,
}

impl Shared {
    pub(crate) fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release)
    }

    /// Records the error that terminated the worker
    pub(crate) fn fail(&self, err: &Error) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert_with(|| err.duplicate());
        }
        self.stop();
    }

    /// Error reported to producers once the worker stopped
    fn terminal_error(&self) -> Error {
        match self.failure.lock() {
            Ok(failure) => failure.as_ref().map_or(Error::Aborted, Error::duplicate),
            Err(_) => Error::ThreadLost,
        }
    }
}

enum State {
    /// No sink yet, callbacks can still be registered
    Configuring {
        progress: Option<ProgressCallback>,
        on_error: Option<ErrorMessageCallback>,
    },
    Running {
        jobs: Sender<Job>,
        worker: JoinHandle<GifResult<()>>,
    },
    Finished,
}

/// Animated GIF encoding session
pub struct Session {
    settings: Settings,
    state: State,
    shared: Arc<Shared>,
    /// Index expected for the next frame
    next_index: u32,
    last_pts: Option<f64>,
}

impl Session {
    pub fn new(settings: Settings) -> GifResult<Session> {
        settings.validate()?;
        debug!(?settings, "session created");
        Ok(Session {
            settings,
            state: State::Configuring {
                progress: None,
                on_error: None,
            },
            shared: Arc::default(),
            next_index: 0,
            last_pts: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Changes a setting. Only possible until the output is selected.
    pub fn set<T: Parameter<Settings>>(&mut self, param: T) -> GifResult<()> {
        self.check_configuring()?;
        let mut settings = self.settings;
        settings.set(param);
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// Number of frames accepted so far
    pub fn frames(&self) -> u32 {
        self.next_index
    }

    pub fn set_progress_callback<F>(&mut self, callback: F) -> GifResult<()>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        match &mut self.state {
            State::Configuring { progress, .. } => {
                *progress = Some(Box::new(callback));
                Ok(())
            }
            _ => Err(Error::InvalidState("callbacks must be set before the output")),
        }
    }

    pub fn set_error_message_callback<F>(&mut self, callback: F) -> GifResult<()>
    where
        F: FnMut(&str) + Send + 'static,
    {
        match &mut self.state {
            State::Configuring { on_error, .. } => {
                *on_error = Some(Box::new(callback));
                Ok(())
            }
            _ => Err(Error::InvalidState("callbacks must be set before the output")),
        }
    }

    /// Writes the GIF to a newly created file
    pub fn set_file_output<P: AsRef<Path>>(&mut self, path: P) -> GifResult<()> {
        self.check_configuring()?;
        let path = path.as_ref();
        let sink = FileSink::create(path)?;
        info!(path = %path.display(), "writing to file");
        self.start(Box::new(sink))
    }

    /// Streams the GIF into `callback`, see [`WriteCallback`]
    pub fn set_write_callback<F>(&mut self, callback: F) -> GifResult<()>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.check_configuring()?;
        self.start(Box::new(CallbackSink::new(Box::new(callback))))
    }

    /// Streams the GIF into any writer
    pub fn set_writer<W: std::io::Write + Send + 'static>(&mut self, writer: W) -> GifResult<()> {
        self.check_configuring()?;
        self.start(Box::new(WriterSink::new(writer)))
    }

    /// Streams the GIF into a custom sink
    pub fn set_output<S: Sink + Send + 'static>(&mut self, sink: S) -> GifResult<()> {
        self.check_configuring()?;
        self.start(Box::new(sink))
    }

    fn check_configuring(&self) -> GifResult<()> {
        match self.state {
            State::Configuring { .. } => Ok(()),
            State::Running { .. } => Err(Error::InvalidState("output already set")),
            State::Finished => Err(Error::InvalidState("session already finished")),
        }
    }

    fn start(&mut self, sink: Box<dyn Sink + Send>) -> GifResult<()> {
        let (progress, on_error) = match &mut self.state {
            State::Configuring { progress, on_error } => (progress.take(), on_error.take()),
            _ => return Err(Error::InvalidState("output already set")),
        };
        let (sender, receiver) = bounded(QUEUE_DEPTH);
        let worker = Worker::new(self.settings, sink, progress, on_error, self.shared.clone());
        let handle = thread::Builder::new()
            .name("gifweave".into())
            .spawn(move || worker.run(receiver))?;
        self.state = State::Running {
            jobs: sender,
            worker: handle,
        };
        Ok(())
    }

    /// Contiguous RGBA pixels, `width * height * 4` bytes
    pub fn add_frame_rgba(&mut self, index: u32, width: u32, height: u32, pixels: &[u8], pts: f64) -> GifResult<()> {
        let stride = width as usize * 4;
        self.add_frame_raw(PixelFormat::Rgba, index, width, height, stride, pixels, pts)
    }

    /// RGBA pixels with `stride` bytes per row
    pub fn add_frame_rgba_stride(&mut self, index: u32, width: u32, height: u32, stride: usize, pixels: &[u8], pts: f64) -> GifResult<()> {
        self.add_frame_raw(PixelFormat::Rgba, index, width, height, stride, pixels, pts)
    }

    /// ARGB pixels with `stride` bytes per row
    pub fn add_frame_argb(&mut self, index: u32, width: u32, height: u32, stride: usize, pixels: &[u8], pts: f64) -> GifResult<()> {
        self.add_frame_raw(PixelFormat::Argb, index, width, height, stride, pixels, pts)
    }

    /// RGB pixels with `stride` bytes per row
    pub fn add_frame_rgb(&mut self, index: u32, width: u32, height: u32, stride: usize, pixels: &[u8], pts: f64) -> GifResult<()> {
        self.add_frame_raw(PixelFormat::Rgb, index, width, height, stride, pixels, pts)
    }

    /// Decodes a PNG file on the calling thread and queues it
    pub fn add_frame_png_file<P: AsRef<Path>>(&mut self, index: u32, path: P, pts: f64) -> GifResult<()> {
        self.check_frame(index, pts)?;
        let frame = RgbaFrame::from_png_file(path.as_ref())?;
        self.queue(index, pts, frame)
    }

    #[allow(clippy::too_many_arguments)]
    fn add_frame_raw(&mut self, format: PixelFormat, index: u32, width: u32, height: u32, stride: usize, pixels: &[u8], pts: f64) -> GifResult<()> {
        self.check_frame(index, pts)?;
        let frame = RgbaFrame::from_raw(format, width, height, stride, pixels)?;
        self.queue(index, pts, frame)
    }

    /// Queues an already decoded frame
    pub fn add_frame(&mut self, index: u32, frame: RgbaFrame, pts: f64) -> GifResult<()> {
        self.check_frame(index, pts)?;
        self.queue(index, pts, frame)
    }

    /// Validation that must pass before any pixel is touched
    fn check_frame(&self, index: u32, pts: f64) -> GifResult<()> {
        match self.state {
            State::Running { .. } => (),
            State::Configuring { .. } => return Err(Error::InvalidState("output must be set before adding frames")),
            State::Finished => return Err(Error::InvalidState("session already finished")),
        }
        if self.shared.stopped() {
            return Err(self.shared.terminal_error());
        }
        if index != self.next_index {
            return Err(Error::InvalidInput(format!(
                "frame {} submitted out of order, expected frame {}",
                index, self.next_index
            )));
        }
        if !pts.is_finite() || pts < 0. {
            return Err(Error::InvalidInput(format!("invalid timestamp {} for frame {}", pts, index)));
        }
        if let Some(last) = self.last_pts {
            if pts <= last {
                return Err(Error::InvalidInput(format!(
                    "timestamp {} of frame {} does not follow {}",
                    pts, index, last
                )));
            }
        }
        Ok(())
    }

    fn queue(&mut self, index: u32, pts: f64, frame: RgbaFrame) -> GifResult<()> {
        let jobs = match &self.state {
            State::Running { jobs, .. } => jobs,
            _ => return Err(Error::InvalidState("output must be set before adding frames")),
        };
        // blocks while the queue is full
        if jobs.send(Job { index, pts, frame }).is_err() {
            return Err(if self.shared.stopped() {
                self.shared.terminal_error()
            } else {
                Error::ThreadLost
            });
        }
        self.next_index += 1;
        self.last_pts = Some(pts);
        Ok(())
    }

    /// Waits until every queued frame has been encoded and the GIF is complete.
    ///
    /// Only the first call does anything, later calls fail with
    /// [`Error::InvalidState`].
    pub fn finish(&mut self) -> GifResult<()> {
        match std::mem::replace(&mut self.state, State::Finished) {
            State::Running { jobs, worker } => {
                drop(jobs);
                let result = worker.join().unwrap_or(Err(Error::ThreadLost));
                info!(frames = self.next_index, ok = result.is_ok(), "session finished");
                result
            }
            State::Finished => Err(Error::InvalidState("finish called twice")),
            configuring @ State::Configuring { .. } => {
                self.state = configuring;
                Err(Error::InvalidState("no output set"))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let State::Running { jobs, worker } = std::mem::replace(&mut self.state, State::Finished) {
            self.shared.stop();
            drop(jobs);
            let _ = worker.join();
        }
    }
}
