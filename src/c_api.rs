//! C interface
//!
//! ```c
//! GifweaveSettings settings = { .quality = 90 };
//! gifweave *g = gifweave_new(&settings);
//! gifweave_set_file_output(g, "out.gif");
//! gifweave_add_frame_rgba(g, 0, width, height, pixels, 0.0);
//! gifweave_finish(g);
//! ```
//!
//! Every function returns a [`ResultCode`]. Callbacks run on the encoder
//! thread and receive the `user_data` pointer they were registered with.
use std::ffi::CStr;
use std::path::Path;
use std::ptr;
use std::slice;

use libc::{c_char, c_int, c_void};

use crate::error::{Error, GifResult, ResultCode};
use crate::session::Session;
use crate::settings::{ExtraEffort, LossyQuality, MotionQuality, Repeat, Settings};

/// Settings for `gifweave_new`
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct GifweaveSettings {
    /// Output width, 0 keeps the width of the first frame
    pub width: u32,
    /// Output height, 0 keeps the height of the first frame
    pub height: u32,
    /// 1-100
    pub quality: u8,
    pub fast: bool,
    /// 0 loops forever, -1 disables looping, n > 0 repeats n times
    pub repeat: i16,
}

/// Opaque handle
pub struct GifweaveHandle {
    session: Session,
}

pub type ProgressFn = unsafe extern "C" fn(user_data: *mut c_void) -> c_int;
pub type ErrorMessageFn = unsafe extern "C" fn(message: *const c_char, user_data: *mut c_void);
pub type WriteFn = unsafe extern "C" fn(len: usize, buffer: *const u8, user_data: *mut c_void) -> c_int;

/// Caller-owned context pointer, only ever dereferenced by the caller's callbacks
struct UserData(*mut c_void);

unsafe impl Send for UserData {}

impl UserData {
    fn get(&self) -> *mut c_void {
        self.0
    }
}

/// Returns NULL if the settings are invalid
#[no_mangle]
pub unsafe extern "C" fn gifweave_new(settings: *const GifweaveSettings) -> *mut GifweaveHandle {
    let settings = match settings.as_ref() {
        Some(s) => s,
        None => return ptr::null_mut(),
    };
    let settings = Settings {
        width: settings.width,
        height: settings.height,
        quality: settings.quality,
        fast: settings.fast,
        repeat: Repeat::from_raw(settings.repeat),
        ..Settings::default()
    };
    match Session::new(settings) {
        Ok(session) => Box::into_raw(Box::new(GifweaveHandle { session })),
        Err(_) => ptr::null_mut(),
    }
}

unsafe fn with_session<F>(handle: *mut GifweaveHandle, f: F) -> ResultCode
where
    F: FnOnce(&mut Session) -> GifResult<()>,
{
    match handle.as_mut() {
        Some(g) => f(&mut g.session).into(),
        None => ResultCode::NULL_ARG,
    }
}

unsafe fn path_arg<'a>(path: *const c_char) -> GifResult<&'a Path> {
    CStr::from_ptr(path)
        .to_str()
        .map(Path::new)
        .map_err(|_| Error::InvalidInput("path is not valid UTF-8".into()))
}

/// Bytes covered by `height` rows `stride` apart whose last row holds
/// `width * bpp` bytes. Padding after the last row is not required.
fn buffer_len(stride: usize, width: u32, bpp: usize, height: u32) -> GifResult<usize> {
    if height == 0 {
        return Ok(0);
    }
    (width as usize)
        .checked_mul(bpp)
        .and_then(|row| stride.checked_mul(height as usize - 1)?.checked_add(row))
        .ok_or_else(|| Error::InvalidInput("frame buffer size overflows".into()))
}

#[no_mangle]
pub unsafe extern "C" fn gifweave_set_extra_effort(handle: *mut GifweaveHandle, extra: bool) -> ResultCode {
    with_session(handle, |s| s.set(ExtraEffort(extra)))
}

#[no_mangle]
pub unsafe extern "C" fn gifweave_set_motion_quality(handle: *mut GifweaveHandle, quality: u8) -> ResultCode {
    with_session(handle, |s| s.set(MotionQuality(quality)))
}

#[no_mangle]
pub unsafe extern "C" fn gifweave_set_lossy_quality(handle: *mut GifweaveHandle, quality: u8) -> ResultCode {
    with_session(handle, |s| s.set(LossyQuality(quality)))
}

/// The callback returns 1 to continue, 0 to abort
#[no_mangle]
pub unsafe extern "C" fn gifweave_set_progress_callback(handle: *mut GifweaveHandle, cb: Option<ProgressFn>, user_data: *mut c_void) -> ResultCode {
    let cb = match cb {
        Some(cb) => cb,
        None => return ResultCode::NULL_ARG,
    };
    let user_data = UserData(user_data);
    with_session(handle, move |s| s.set_progress_callback(move || unsafe { cb(user_data.get()) != 0 }))
}

/// Messages are NUL-terminated UTF-8, valid only during the call
#[no_mangle]
pub unsafe extern "C" fn gifweave_set_error_message_callback(handle: *mut GifweaveHandle, cb: Option<ErrorMessageFn>, user_data: *mut c_void) -> ResultCode {
    let cb = match cb {
        Some(cb) => cb,
        None => return ResultCode::NULL_ARG,
    };
    let user_data = UserData(user_data);
    with_session(handle, move |s| {
        s.set_error_message_callback(move |text: &str| {
            let mut message = text.replace('\0', " ").into_bytes();
            message.push(0);
            unsafe { cb(message.as_ptr() as *const c_char, user_data.get()) }
        })
    })
}

/// Creates the file and starts encoding into it
#[no_mangle]
pub unsafe extern "C" fn gifweave_set_file_output(handle: *mut GifweaveHandle, destination: *const c_char) -> ResultCode {
    if destination.is_null() {
        return ResultCode::NULL_ARG;
    }
    with_session(handle, |s| s.set_file_output(path_arg(destination)?))
}

/// The callback returns 0 (`OK`) to continue. A zero length call asks for a flush.
#[no_mangle]
pub unsafe extern "C" fn gifweave_set_write_callback(handle: *mut GifweaveHandle, cb: Option<WriteFn>, user_data: *mut c_void) -> ResultCode {
    let cb = match cb {
        Some(cb) => cb,
        None => return ResultCode::NULL_ARG,
    };
    let user_data = UserData(user_data);
    with_session(handle, move |s| {
        s.set_write_callback(move |data: &[u8]| unsafe { cb(data.len(), data.as_ptr(), user_data.get()) == 0 })
    })
}

/// File path must be valid UTF-8. Timestamp is in seconds.
#[no_mangle]
pub unsafe extern "C" fn gifweave_add_frame_png_file(handle: *mut GifweaveHandle, index: u32, file_path: *const c_char, pts: f64) -> ResultCode {
    if file_path.is_null() {
        return ResultCode::NULL_ARG;
    }
    with_session(handle, |s| s.add_frame_png_file(index, path_arg(file_path)?, pts))
}

/// `pixels` is `width * height * 4` bytes and is copied before returning.
/// May block until the encoder thread needs more frames.
#[no_mangle]
pub unsafe extern "C" fn gifweave_add_frame_rgba(handle: *mut GifweaveHandle, index: u32, width: u32, height: u32, pixels: *const u8, pts: f64) -> ResultCode {
    if pixels.is_null() {
        return ResultCode::NULL_ARG;
    }
    with_session(handle, |s| {
        let len = buffer_len(width as usize * 4, width, 4, height)?;
        s.add_frame_rgba(index, width, height, slice::from_raw_parts(pixels, len), pts)
    })
}

#[no_mangle]
pub unsafe extern "C" fn gifweave_add_frame_rgba_stride(handle: *mut GifweaveHandle, index: u32, width: u32, height: u32, bytes_per_row: u32, pixels: *const u8, pts: f64) -> ResultCode {
    if pixels.is_null() {
        return ResultCode::NULL_ARG;
    }
    with_session(handle, |s| {
        let len = buffer_len(bytes_per_row as usize, width, 4, height)?;
        s.add_frame_rgba_stride(index, width, height, bytes_per_row as usize, slice::from_raw_parts(pixels, len), pts)
    })
}

#[no_mangle]
pub unsafe extern "C" fn gifweave_add_frame_argb(handle: *mut GifweaveHandle, index: u32, width: u32, bytes_per_row: u32, height: u32, pixels: *const u8, pts: f64) -> ResultCode {
    if pixels.is_null() {
        return ResultCode::NULL_ARG;
    }
    with_session(handle, |s| {
        let len = buffer_len(bytes_per_row as usize, width, 4, height)?;
        s.add_frame_argb(index, width, height, bytes_per_row as usize, slice::from_raw_parts(pixels, len), pts)
    })
}

#[no_mangle]
pub unsafe extern "C" fn gifweave_add_frame_rgb(handle: *mut GifweaveHandle, index: u32, width: u32, bytes_per_row: u32, height: u32, pixels: *const u8, pts: f64) -> ResultCode {
    if pixels.is_null() {
        return ResultCode::NULL_ARG;
    }
    with_session(handle, |s| {
        let len = buffer_len(bytes_per_row as usize, width, 3, height)?;
        s.add_frame_rgb(index, width, height, bytes_per_row as usize, slice::from_raw_parts(pixels, len), pts)
    })
}

/// Waits for the encoder and frees the handle, which must not be used afterwards
#[no_mangle]
pub unsafe extern "C" fn gifweave_finish(handle: *mut GifweaveHandle) -> ResultCode {
    if handle.is_null() {
        return ResultCode::NULL_ARG;
    }
    let mut g = Box::from_raw(handle);
    g.session.finish().into()
}
