/*!
C API for the Vault interface.

The ETSI GS QKD 014 calls are exported with a `VAULT_` prefix, so they
can live in the same library as the Stream API's `GET_KEY`. Each returns
an HTTP-style status code. Strings and key arrays handed to the caller
are owned by the library until released with `qkd_status_free` or
`qkd_key_container_free`; they must not be passed to `free()`.
*/

use std::ffi::{CString, c_void};
use std::{ptr, slice};

use libc::c_char;
use log::error;

use super::c_api::c_str;
use crate::core::config::QkdContext;
use crate::core::error::{Error, Result, invalid_arg};
use crate::vault::api::VaultApi;
use crate::vault::types::{KeyContainer, KeyIds, KeyRequest, Status, VaultStatus};

/// Status record, laid out as `qkd_status_t`
#[repr(C)]
pub struct QkdStatus {
    pub source_kme_id: *mut c_char,
    pub target_kme_id: *mut c_char,
    pub master_sae_id: *mut c_char,
    pub slave_sae_id: *mut c_char,
    pub key_size: i32,
    pub stored_key_count: i32,
    pub max_key_count: i32,
    pub max_key_per_request: i32,
    pub max_key_size: i32,
    pub min_key_size: i32,
    pub max_sae_id_count: i32,
    pub status_extension: *mut c_void,
}

/// Key request, laid out as `qkd_key_request_t`.
///
/// `number` and `size` of zero or less mean "not set".
#[repr(C)]
pub struct QkdKeyRequest {
    pub number: i32,
    pub size: i32,
    pub additional_slave_sae_ids: *mut *mut c_char,
    pub additional_sae_count: i32,
    pub extension_mandatory: *mut c_void,
    pub extension_optional: *mut c_void,
}

/// One key, laid out as `qkd_key_t`
#[repr(C)]
pub struct QkdKey {
    pub key_id: *mut c_char,
    pub key_id_extension: *mut c_void,
    /// Base64 key material
    pub key: *mut c_char,
    pub key_extension: *mut c_void,
}

/// Key container, laid out as `qkd_key_container_t`
#[repr(C)]
pub struct QkdKeyContainer {
    pub keys: *mut QkdKey,
    pub key_count: i32,
    pub key_container_extension: *mut c_void,
}

/// Key identifier, laid out as `qkd_key_id_t`
#[repr(C)]
pub struct QkdKeyId {
    pub key_id: *mut c_char,
    pub key_id_extension: *mut c_void,
}

/// Key identifier set, laid out as `qkd_key_ids_t`
#[repr(C)]
pub struct QkdKeyIds {
    pub key_ids: *mut QkdKeyId,
    pub key_id_count: i32,
    pub key_ids_extension: *mut c_void,
}

/// Opaque vault context handle
#[repr(C)]
pub struct QkdVaultHandle(*mut c_void);

fn api<'a>(handle: &QkdVaultHandle) -> Option<&'a mut VaultApi> {
    if handle.0.is_null() {
        return None;
    }
    Some(unsafe { &mut *(handle.0 as *mut VaultApi) })
}

fn code(operation: &str, result: Result<()>) -> u32 {
    match result {
        Ok(()) => VaultStatus::Ok.as_u32(),
        Err(err) => {
            error!("{operation} failed: {err}");
            err.vault_status().as_u32()
        }
    }
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| Error::Decode(format!("{value:?} contains a NUL byte")))
}

fn into_raw(value: Option<CString>) -> *mut c_char {
    value.map_or(ptr::null_mut(), CString::into_raw)
}

fn free_c_string(value: *mut c_char) {
    if !value.is_null() {
        drop(unsafe { CString::from_raw(value) });
    }
}

fn c_int(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn export_status(status: &Status, out: &mut QkdStatus) -> Result<()> {
    let text = |value: &Option<String>| value.as_deref().map(c_string).transpose();
    let source = text(&status.source_kme_id)?;
    let target = text(&status.target_kme_id)?;
    let master = text(&status.master_sae_id)?;
    let slave = text(&status.slave_sae_id)?;

    *out = QkdStatus {
        source_kme_id: into_raw(source),
        target_kme_id: into_raw(target),
        master_sae_id: into_raw(master),
        slave_sae_id: into_raw(slave),
        key_size: c_int(status.key_size),
        stored_key_count: c_int(status.stored_key_count),
        max_key_count: c_int(status.max_key_count),
        max_key_per_request: c_int(status.max_key_per_request),
        max_key_size: c_int(status.max_key_size),
        min_key_size: c_int(status.min_key_size),
        max_sae_id_count: c_int(status.max_sae_id_count),
        status_extension: ptr::null_mut(),
    };
    Ok(())
}

fn export_container(container: &KeyContainer, out: &mut QkdKeyContainer) -> Result<()> {
    // convert everything first so a bad entry leaks nothing
    let strings = container
        .keys
        .iter()
        .map(|key| Ok((c_string(&key.key_id)?, c_string(&key.key)?)))
        .collect::<Result<Vec<_>>>()?;
    let keys: Box<[QkdKey]> = strings
        .into_iter()
        .map(|(key_id, key)| QkdKey {
            key_id: key_id.into_raw(),
            key_id_extension: ptr::null_mut(),
            key: key.into_raw(),
            key_extension: ptr::null_mut(),
        })
        .collect();

    out.key_count = c_int(keys.len() as u32);
    out.keys = Box::into_raw(keys) as *mut QkdKey;
    out.key_container_extension = ptr::null_mut();
    Ok(())
}

fn import_request(request: &QkdKeyRequest) -> Result<KeyRequest> {
    let mut additional_slave_sae_ids = Vec::new();
    if !request.additional_slave_sae_ids.is_null() && request.additional_sae_count > 0 {
        let ids = unsafe {
            slice::from_raw_parts(request.additional_slave_sae_ids, request.additional_sae_count as usize)
        };
        for id in ids {
            additional_slave_sae_ids.push(c_str(*id)?.to_string());
        }
    }
    Ok(KeyRequest {
        number: u32::try_from(request.number).ok().filter(|n| *n > 0),
        size: u32::try_from(request.size).ok().filter(|n| *n > 0),
        additional_slave_sae_ids,
        ..KeyRequest::default()
    })
}

fn import_key_ids(key_ids: &QkdKeyIds) -> Result<KeyIds> {
    if key_ids.key_ids.is_null() || key_ids.key_id_count <= 0 {
        return invalid_arg("key ID set must be non-empty");
    }
    let entries = unsafe { slice::from_raw_parts(key_ids.key_ids, key_ids.key_id_count as usize) };
    let ids = entries
        .iter()
        .map(|entry| c_str(entry.key_id).map(str::to_string))
        .collect::<Result<Vec<_>>>()?;
    Ok(ids.into_iter().collect())
}

/// Create a vault context configured from the `QKD_*` environment
///
/// @return A handle to the context, or a null handle on error
#[unsafe(no_mangle)]
pub extern "C" fn qkd_vault_init_from_env() -> QkdVaultHandle {
    match QkdContext::from_env() {
        Ok(context) => QkdVaultHandle(Box::into_raw(Box::new(context.vault)) as *mut c_void),
        Err(err) => {
            error!("Cannot build QKD context: {err}");
            QkdVaultHandle(ptr::null_mut())
        }
    }
}

/// Release a vault context
#[unsafe(no_mangle)]
pub extern "C" fn qkd_vault_free(handle: QkdVaultHandle) {
    if !handle.0.is_null() {
        unsafe {
            drop(Box::from_raw(handle.0 as *mut VaultApi));
        }
    }
}

/// Query the link status towards `slave_sae_id`
///
/// @param handle Vault context
/// @param kme_hostname KME host, NUL-terminated
/// @param slave_sae_id Peer SAE, NUL-terminated
/// @param status Receives the status record; release with `qkd_status_free`
/// @return 200 on success, otherwise 400, 401 or 503
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "C" fn VAULT_GET_STATUS(
    handle: QkdVaultHandle,
    kme_hostname: *const c_char,
    slave_sae_id: *const c_char,
    status: *mut QkdStatus,
) -> u32 {
    let Some(api) = api(&handle) else {
        return VaultStatus::ServerError.as_u32();
    };
    if status.is_null() {
        return VaultStatus::BadRequest.as_u32();
    }

    let result = (|| {
        let record = api.get_status(c_str(kme_hostname)?, c_str(slave_sae_id)?)?;
        export_status(&record, unsafe { &mut *status })
    })();
    code("GET_STATUS", result)
}

/// Fetch keys to share with `slave_sae_id`
///
/// @param handle Vault context
/// @param kme_hostname KME host, NUL-terminated
/// @param slave_sae_id Peer SAE, NUL-terminated
/// @param request Optional request, may be null for one default-size key
/// @param container Receives the keys; release with `qkd_key_container_free`
/// @return 200 on success, otherwise 400, 401 or 503
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "C" fn VAULT_GET_KEY(
    handle: QkdVaultHandle,
    kme_hostname: *const c_char,
    slave_sae_id: *const c_char,
    request: *const QkdKeyRequest,
    container: *mut QkdKeyContainer,
) -> u32 {
    let Some(api) = api(&handle) else {
        return VaultStatus::ServerError.as_u32();
    };
    if container.is_null() {
        return VaultStatus::BadRequest.as_u32();
    }

    let result = (|| {
        let request = match unsafe { request.as_ref() } {
            Some(request) => Some(import_request(request)?),
            None => None,
        };
        let keys = api.get_key(c_str(kme_hostname)?, c_str(slave_sae_id)?, request.as_ref())?;
        export_container(&keys, unsafe { &mut *container })
    })();
    code("GET_KEY", result)
}

/// Fetch keys `master_sae_id` obtained earlier, by ID
///
/// @param handle Vault context
/// @param kme_hostname KME host, NUL-terminated
/// @param master_sae_id Initiating SAE, NUL-terminated
/// @param key_ids Identifiers to fetch
/// @param container Receives the keys; release with `qkd_key_container_free`
/// @return 200 on success, otherwise 400, 401 or 503
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "C" fn VAULT_GET_KEY_WITH_IDS(
    handle: QkdVaultHandle,
    kme_hostname: *const c_char,
    master_sae_id: *const c_char,
    key_ids: *const QkdKeyIds,
    container: *mut QkdKeyContainer,
) -> u32 {
    let Some(api) = api(&handle) else {
        return VaultStatus::ServerError.as_u32();
    };
    let Some(key_ids) = (unsafe { key_ids.as_ref() }) else {
        return VaultStatus::BadRequest.as_u32();
    };
    if container.is_null() {
        return VaultStatus::BadRequest.as_u32();
    }

    let result = (|| {
        let ids = import_key_ids(key_ids)?;
        let keys = api.get_key_with_ids(c_str(kme_hostname)?, c_str(master_sae_id)?, &ids)?;
        export_container(&keys, unsafe { &mut *container })
    })();
    code("GET_KEY_WITH_IDS", result)
}

/// Release the strings of a status record filled by `VAULT_GET_STATUS`
#[unsafe(no_mangle)]
pub extern "C" fn qkd_status_free(status: *mut QkdStatus) {
    let Some(status) = (unsafe { status.as_mut() }) else {
        return;
    };
    for field in [
        &mut status.source_kme_id,
        &mut status.target_kme_id,
        &mut status.master_sae_id,
        &mut status.slave_sae_id,
    ] {
        free_c_string(*field);
        *field = ptr::null_mut();
    }
}

/// Release the keys of a container filled by `VAULT_GET_KEY` or
/// `VAULT_GET_KEY_WITH_IDS`
#[unsafe(no_mangle)]
pub extern "C" fn qkd_key_container_free(container: *mut QkdKeyContainer) {
    let Some(container) = (unsafe { container.as_mut() }) else {
        return;
    };
    if !container.keys.is_null() {
        let len = usize::try_from(container.key_count).unwrap_or(0);
        let keys = unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(container.keys, len)) };
        for key in keys.iter() {
            free_c_string(key.key_id);
            free_c_string(key.key);
        }
    }
    container.keys = ptr::null_mut();
    container.key_count = 0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::simulated::SimulatedVaultBackend;
    use std::ffi::CStr;

    fn handle() -> QkdVaultHandle {
        let api = VaultApi::new(Box::new(SimulatedVaultBackend::new()));
        QkdVaultHandle(Box::into_raw(Box::new(api)) as *mut c_void)
    }

    fn copy(handle: &QkdVaultHandle) -> QkdVaultHandle {
        QkdVaultHandle(handle.0)
    }

    fn empty_container() -> QkdKeyContainer {
        QkdKeyContainer {
            keys: ptr::null_mut(),
            key_count: 0,
            key_container_extension: ptr::null_mut(),
        }
    }

    fn text(value: *const c_char) -> String {
        unsafe { CStr::from_ptr(value) }.to_str().unwrap().to_string()
    }

    #[test]
    fn test_get_status() {
        let handle = handle();
        let mut status = QkdStatus {
            source_kme_id: ptr::null_mut(),
            target_kme_id: ptr::null_mut(),
            master_sae_id: ptr::null_mut(),
            slave_sae_id: ptr::null_mut(),
            key_size: 0,
            stored_key_count: 0,
            max_key_count: 0,
            max_key_per_request: 0,
            max_key_size: 0,
            min_key_size: 0,
            max_sae_id_count: 0,
            status_extension: ptr::null_mut(),
        };

        let code = VAULT_GET_STATUS(copy(&handle), c"kme.local".as_ptr(), c"sae-b".as_ptr(), &mut status);
        assert_eq!(code, 200);
        assert_eq!(status.key_size, 256);
        assert_eq!(text(status.slave_sae_id), "sae-b");
        assert!(status.master_sae_id.is_null());

        qkd_status_free(&mut status);
        assert!(status.slave_sae_id.is_null());
        qkd_vault_free(handle);
    }

    #[test]
    fn test_get_key_then_by_ids() {
        let handle = handle();
        let request = QkdKeyRequest {
            number: 2,
            size: 512,
            additional_slave_sae_ids: ptr::null_mut(),
            additional_sae_count: 0,
            extension_mandatory: ptr::null_mut(),
            extension_optional: ptr::null_mut(),
        };
        let mut issued = empty_container();
        let code = VAULT_GET_KEY(
            copy(&handle),
            c"kme.local".as_ptr(),
            c"sae-b".as_ptr(),
            &request,
            &mut issued,
        );
        assert_eq!(code, 200);
        assert_eq!(issued.key_count, 2);
        let issued_keys = unsafe { slice::from_raw_parts(issued.keys, 2) };

        // ask for the second key only
        let mut wanted = [QkdKeyId {
            key_id: issued_keys[1].key_id,
            key_id_extension: ptr::null_mut(),
        }];
        let key_ids = QkdKeyIds {
            key_ids: wanted.as_mut_ptr(),
            key_id_count: 1,
            key_ids_extension: ptr::null_mut(),
        };
        let mut fetched = empty_container();
        let code = VAULT_GET_KEY_WITH_IDS(
            copy(&handle),
            c"kme.local".as_ptr(),
            c"sae-a".as_ptr(),
            &key_ids,
            &mut fetched,
        );
        assert_eq!(code, 200);
        assert_eq!(fetched.key_count, 1);
        let fetched_key = unsafe { &*fetched.keys };
        assert_eq!(text(fetched_key.key_id), text(issued_keys[1].key_id));
        assert_eq!(text(fetched_key.key), text(issued_keys[1].key));

        qkd_key_container_free(&mut fetched);
        qkd_key_container_free(&mut issued);
        assert!(issued.keys.is_null());
        assert_eq!(issued.key_count, 0);
        qkd_vault_free(handle);
    }

    #[test]
    fn test_invalid_calls() {
        let mut container = empty_container();
        let code = VAULT_GET_KEY(
            QkdVaultHandle(ptr::null_mut()),
            c"kme".as_ptr(),
            c"sae".as_ptr(),
            ptr::null(),
            &mut container,
        );
        assert_eq!(code, 503);

        let handle = handle();
        let code = VAULT_GET_KEY(copy(&handle), c"kme".as_ptr(), c"sae".as_ptr(), ptr::null(), ptr::null_mut());
        assert_eq!(code, 400);

        let code = VAULT_GET_KEY(copy(&handle), ptr::null(), c"sae".as_ptr(), ptr::null(), &mut container);
        assert_eq!(code, 400);

        let no_ids = QkdKeyIds {
            key_ids: ptr::null_mut(),
            key_id_count: 0,
            key_ids_extension: ptr::null_mut(),
        };
        let code = VAULT_GET_KEY_WITH_IDS(copy(&handle), c"kme".as_ptr(), c"sae".as_ptr(), &no_ids, &mut container);
        assert_eq!(code, 400);
        assert!(container.keys.is_null());

        // a null request fetches one key of the default size
        let code = VAULT_GET_KEY(copy(&handle), c"kme".as_ptr(), c"sae".as_ptr(), ptr::null(), &mut container);
        assert_eq!(code, 200);
        assert_eq!(container.key_count, 1);
        qkd_key_container_free(&mut container);
        qkd_vault_free(handle);
    }
}
