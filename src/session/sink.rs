//! Output sinks selectable on a session
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use tracing::warn;

use crate::error::{Error, GifResult};
use crate::writer::Sink;

/// Callback receiving encoded bytes. An empty slice asks for a flush.
/// Returning `false` stops the encoder.
pub type WriteCallback = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Buffered file target, created when the sink is selected
pub struct FileSink {
    file: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> GifResult<FileSink> {
        let file = File::create(path)?;
        Ok(FileSink {
            file: BufWriter::new(file),
        })
    }
}

impl Sink for FileSink {
    fn write_block(&mut self, data: &[u8]) -> GifResult<()> {
        Ok(self.file.write_all(data)?)
    }

    fn flush(&mut self) -> GifResult<()> {
        self.file.flush()?;
        Ok(self.file.get_ref().sync_all()?)
    }
}

/// Any `Write` implementation
pub struct WriterSink {
    writer: Box<dyn Write + Send>,
}

impl WriterSink {
    pub fn new<W: Write + Send + 'static>(writer: W) -> WriterSink {
        WriterSink {
            writer: Box::new(writer),
        }
    }
}

impl Sink for WriterSink {
    fn write_block(&mut self, data: &[u8]) -> GifResult<()> {
        Ok(self.writer.write_all(data)?)
    }

    fn flush(&mut self) -> GifResult<()> {
        Ok(self.writer.flush()?)
    }
}

/// Streams blocks into a caller-supplied callback
pub struct CallbackSink {
    callback: WriteCallback,
}

impl CallbackSink {
    pub fn new(callback: WriteCallback) -> CallbackSink {
        CallbackSink { callback }
    }

    fn call(&mut self, data: &[u8]) -> GifResult<()> {
        let callback = &mut self.callback;
        match panic::catch_unwind(AssertUnwindSafe(|| callback(data))) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Io(io::Error::new(
                io::ErrorKind::Interrupted,
                "write callback refused the data",
            ))),
            Err(_) => {
                warn!("write callback panicked");
                Err(Error::Aborted)
            }
        }
    }
}

impl Sink for CallbackSink {
    fn write_block(&mut self, data: &[u8]) -> GifResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.call(data)
    }

    fn flush(&mut self) -> GifResult<()> {
        self.call(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResultCode;
    use std::sync::{Arc, Mutex};

    #[test]
    fn callback_sees_blocks_then_flush() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let mut sink = CallbackSink::new(Box::new(move |data: &[u8]| {
            log.lock().unwrap().push(data.len());
            true
        }));
        sink.write_block(b"GIF89a").unwrap();
        sink.write_block(&[]).unwrap();
        sink.flush().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![6, 0]);
    }

    #[test]
    fn refusing_callback_interrupts() {
        let mut sink = CallbackSink::new(Box::new(|_: &[u8]| false));
        assert_eq!(sink.write_block(&[1]).unwrap_err().code(), ResultCode::INTERRUPTED);
    }

    #[test]
    fn panicking_callback_aborts() {
        let mut sink = CallbackSink::new(Box::new(|_: &[u8]| panic!("boom")));
        assert_eq!(sink.write_block(&[1]).unwrap_err().code(), ResultCode::ABORTED);
    }

    #[test]
    fn missing_directory() {
        let err = FileSink::create(Path::new("/nonexistent/dir/out.gif")).err().unwrap();
        assert_eq!(err.code(), ResultCode::NOT_FOUND);
    }
}
