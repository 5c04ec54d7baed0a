/*!
C API for the Stream interface.

The three ETSI GS QKD 004 calls are exposed with their C names. Each
takes a context handle created by `qkd_stream_init_from_env`, reports
its outcome through the `status` out-parameter and returns the same code.
*/

use std::ffi::{CStr, c_void};
use std::{ptr, slice};

use libc::c_char;
use log::error;

use crate::core::config::QkdContext;
use crate::core::constants::sizes::{KSID_SIZE, MIMETYPE_SIZE};
use crate::core::error::{Error, Result};
use crate::stream::api::StreamApi;
use crate::stream::types::{Ksid, MetadataBuffer, Qos, StreamStatus};

/// QoS block, laid out as `struct qkd_qos_s`
#[repr(C)]
pub struct QkdQos {
    pub key_chunk_size: u32,
    pub max_bps: u32,
    pub min_bps: u32,
    pub jitter: u32,
    pub priority: u32,
    pub timeout: u32,
    pub ttl: u32,
    pub metadata_mimetype: [c_char; MIMETYPE_SIZE],
}

/// Caller metadata buffer, laid out as `struct qkd_metadata_s`
#[repr(C)]
pub struct QkdMetadata {
    /// Capacity on input; bytes written (or bytes required) on output
    pub metadata_size: u32,
    pub metadata_buffer: *mut u8,
}

/// Opaque stream context handle
#[repr(C)]
pub struct QkdStreamHandle(*mut c_void);

impl QkdQos {
    fn to_qos(&self) -> Qos {
        let bytes: Vec<u8> = self
            .metadata_mimetype
            .iter()
            .take_while(|c| **c != 0)
            .map(|c| *c as u8)
            .collect();
        Qos {
            key_chunk_size: self.key_chunk_size,
            max_bps: self.max_bps,
            min_bps: self.min_bps,
            jitter: self.jitter,
            priority: self.priority,
            timeout: self.timeout,
            ttl: self.ttl,
            metadata_mimetype: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    fn update_from(&mut self, qos: &Qos) {
        self.key_chunk_size = qos.key_chunk_size;
        self.max_bps = qos.max_bps;
        self.min_bps = qos.min_bps;
        self.jitter = qos.jitter;
        self.priority = qos.priority;
        self.timeout = qos.timeout;
        self.ttl = qos.ttl;
        let mime = qos.metadata_mimetype.as_bytes();
        let len = mime.len().min(MIMETYPE_SIZE - 1);
        self.metadata_mimetype = [0; MIMETYPE_SIZE];
        for (dst, src) in self.metadata_mimetype.iter_mut().zip(&mime[..len]) {
            *dst = *src as c_char;
        }
    }
}

fn report(status: *mut u32, code: StreamStatus) -> u32 {
    if !status.is_null() {
        unsafe { *status = code.as_u32() };
    }
    code.as_u32()
}

fn report_err(status: *mut u32, operation: &str, err: &Error) -> u32 {
    error!("{operation} failed: {err}");
    report(status, err.stream_status())
}

fn api<'a>(handle: &QkdStreamHandle) -> Option<&'a mut StreamApi> {
    if handle.0.is_null() {
        return None;
    }
    Some(unsafe { &mut *(handle.0 as *mut StreamApi) })
}

pub(super) fn c_str<'a>(value: *const c_char) -> Result<&'a str> {
    if value.is_null() {
        return Err(Error::InvalidArgument("null string argument".into()));
    }
    unsafe { CStr::from_ptr(value) }
        .to_str()
        .map_err(|_| Error::InvalidArgument("string argument is not UTF-8".into()))
}

/// Create a stream context configured from the `QKD_*` environment
///
/// @return A handle to the context, or a null handle on error
#[unsafe(no_mangle)]
pub extern "C" fn qkd_stream_init_from_env() -> QkdStreamHandle {
    match QkdContext::from_env() {
        Ok(context) => QkdStreamHandle(Box::into_raw(Box::new(context.stream)) as *mut c_void),
        Err(err) => {
            error!("Cannot build QKD context: {err}");
            QkdStreamHandle(ptr::null_mut())
        }
    }
}

/// Release a stream context
///
/// @param handle Handle returned by `qkd_stream_init_from_env`
#[unsafe(no_mangle)]
pub extern "C" fn qkd_stream_free(handle: QkdStreamHandle) {
    if !handle.0.is_null() {
        unsafe {
            drop(Box::from_raw(handle.0 as *mut StreamApi));
        }
    }
}

/// Open a key stream
///
/// @param handle Stream context
/// @param source Source URI, NUL-terminated
/// @param destination Destination URI, NUL-terminated
/// @param qos Requested QoS; updated with the QoS in effect
/// @param key_stream_id 16-byte KSID: all zero to initiate, receives the new KSID
/// @param status Receives the status code
/// @return The status code
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "C" fn OPEN_CONNECT(
    handle: QkdStreamHandle,
    source: *const c_char,
    destination: *const c_char,
    qos: *mut QkdQos,
    key_stream_id: *mut u8,
    status: *mut u32,
) -> u32 {
    let Some(api) = api(&handle) else {
        return report(status, StreamStatus::NoConnection);
    };
    if qos.is_null() || key_stream_id.is_null() {
        return report(status, StreamStatus::NoConnection);
    }

    let result = (|| {
        let source = c_str(source)?;
        let destination = c_str(destination)?;
        let requested = unsafe { (*qos).to_qos() };
        let ksid = Ksid::from_slice(unsafe { slice::from_raw_parts(key_stream_id, KSID_SIZE) })?;
        api.open_connect(source, destination, &requested, ksid)
    })();

    match result {
        Ok(opened) => {
            unsafe {
                (*qos).update_from(&opened.qos);
                ptr::copy_nonoverlapping(opened.ksid.as_bytes().as_ptr(), key_stream_id, KSID_SIZE);
            }
            report(status, opened.status)
        }
        Err(err) => report_err(status, "OPEN_CONNECT", &err),
    }
}

/// Fetch one key chunk
///
/// @param handle Stream context
/// @param key_stream_id 16-byte KSID
/// @param index Chunk index to fetch
/// @param key_buffer Receives the key chunk
/// @param key_buffer_len Capacity of `key_buffer` in bytes
/// @param metadata Optional metadata buffer, may be null
/// @param status Receives the status code
/// @return The status code
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "C" fn GET_KEY(
    handle: QkdStreamHandle,
    key_stream_id: *const u8,
    index: *mut u32,
    key_buffer: *mut u8,
    key_buffer_len: u32,
    metadata: *mut QkdMetadata,
    status: *mut u32,
) -> u32 {
    let Some(api) = api(&handle) else {
        return report(status, StreamStatus::NoConnection);
    };
    if key_stream_id.is_null() || index.is_null() || key_buffer.is_null() {
        return report(status, StreamStatus::NoConnection);
    }

    let ksid = match Ksid::from_slice(unsafe { slice::from_raw_parts(key_stream_id, KSID_SIZE) }) {
        Ok(ksid) => ksid,
        Err(err) => return report_err(status, "GET_KEY", &err),
    };
    let wanted = unsafe { *index };

    let mut buffer = if metadata.is_null() || unsafe { (*metadata).metadata_buffer.is_null() } {
        None
    } else {
        Some(MetadataBuffer::with_capacity(unsafe { (*metadata).metadata_size } as usize))
    };

    match api.get_key(&ksid, wanted, buffer.as_mut()) {
        Ok(key) => {
            if key.len() > key_buffer_len as usize {
                error!("GET_KEY: {} byte chunk does not fit a {key_buffer_len} byte buffer", key.len());
                return report(status, StreamStatus::NoConnection);
            }
            unsafe {
                ptr::copy_nonoverlapping(key.as_ptr(), key_buffer, key.len());
                if let Some(buffer) = &buffer {
                    ptr::copy_nonoverlapping(buffer.as_bytes().as_ptr(), (*metadata).metadata_buffer, buffer.len());
                    (*metadata).metadata_size = buffer.len() as u32;
                }
            }
            report(status, StreamStatus::Success)
        }
        Err(err) => {
            if let (Error::MetadataSizeInsufficient { required, .. }, false) = (&err, metadata.is_null()) {
                unsafe { (*metadata).metadata_size = *required as u32 };
            }
            report_err(status, "GET_KEY", &err)
        }
    }
}

/// Close a key stream
///
/// @param handle Stream context
/// @param key_stream_id 16-byte KSID
/// @param status Receives the status code
/// @return The status code
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "C" fn CLOSE(handle: QkdStreamHandle, key_stream_id: *const u8, status: *mut u32) -> u32 {
    let Some(api) = api(&handle) else {
        return report(status, StreamStatus::NoConnection);
    };
    if key_stream_id.is_null() {
        return report(status, StreamStatus::NoConnection);
    }

    let result = Ksid::from_slice(unsafe { slice::from_raw_parts(key_stream_id, KSID_SIZE) })
        .and_then(|ksid| api.close(&ksid));
    match result {
        Ok(()) => report(status, StreamStatus::Success),
        Err(err) => report_err(status, "CLOSE", &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::simulated::SimulatedStreamBackend;

    fn handle() -> QkdStreamHandle {
        let api = StreamApi::new(Box::new(SimulatedStreamBackend::default()));
        QkdStreamHandle(Box::into_raw(Box::new(api)) as *mut c_void)
    }

    fn copy(handle: &QkdStreamHandle) -> QkdStreamHandle {
        QkdStreamHandle(handle.0)
    }

    fn qos() -> QkdQos {
        let mut qos = QkdQos {
            key_chunk_size: 0,
            max_bps: 0,
            min_bps: 0,
            jitter: 0,
            priority: 0,
            timeout: 0,
            ttl: 0,
            metadata_mimetype: [0; MIMETYPE_SIZE],
        };
        qos.update_from(&Qos::default());
        qos
    }

    #[test]
    fn test_null_arguments_report_no_connection() {
        let mut status = 99u32;
        let code = OPEN_CONNECT(
            QkdStreamHandle(ptr::null_mut()),
            ptr::null(),
            ptr::null(),
            ptr::null_mut(),
            ptr::null_mut(),
            &mut status,
        );
        assert_eq!(code, StreamStatus::NoConnection.as_u32());
        assert_eq!(status, code);
        assert_eq!(CLOSE(QkdStreamHandle(ptr::null_mut()), ptr::null(), ptr::null_mut()), 4);
    }

    #[test]
    fn test_open_get_close_round() {
        let handle = handle();
        let mut qos = qos();
        let mut ksid = [0u8; KSID_SIZE];
        let mut status = 0u32;

        let code = OPEN_CONNECT(
            copy(&handle),
            c"qkd://alice".as_ptr(),
            c"qkd://bob".as_ptr(),
            &mut qos,
            ksid.as_mut_ptr(),
            &mut status,
        );
        assert_eq!(code, StreamStatus::PeerDisconnected.as_u32());
        assert_ne!(ksid, [0u8; KSID_SIZE]);

        let mut index = 0u32;
        let mut key = [0u8; 32];
        let mut meta_bytes = [0u8; 8];
        let mut metadata = QkdMetadata {
            metadata_size: meta_bytes.len() as u32,
            metadata_buffer: meta_bytes.as_mut_ptr(),
        };
        let code = GET_KEY(
            copy(&handle),
            ksid.as_ptr(),
            &mut index,
            key.as_mut_ptr(),
            key.len() as u32,
            &mut metadata,
            &mut status,
        );
        assert_eq!(code, StreamStatus::MetadataSizeInsufficient.as_u32());
        assert!(metadata.metadata_size > 8);

        let code = GET_KEY(
            copy(&handle),
            ksid.as_ptr(),
            &mut index,
            key.as_mut_ptr(),
            key.len() as u32,
            ptr::null_mut(),
            &mut status,
        );
        assert_eq!(code, StreamStatus::Success.as_u32());
        assert_ne!(key, [0u8; 32]);

        assert_eq!(CLOSE(copy(&handle), ksid.as_ptr(), &mut status), 0);
        qkd_stream_free(handle);
    }
}
