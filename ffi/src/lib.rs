/*
 * lib.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magnet, a client SDK for the Magnet messaging platform.
 *
 * Magnet is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magnet is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magnet.  If not, see <http://www.gnu.org/licenses/>.
 */

//! C FFI for the Magnet client core. Clients are identified by an opaque
//! non-zero handle. Attributes, options, results and response details cross
//! the boundary as JSON. All string parameters are UTF-8 NUL-terminated.
//! Completion callbacks run on a runtime worker thread; shells must marshal
//! to their main thread.

use libc::{c_char, c_int, c_void};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fmt::Display;
use std::path::PathBuf;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use magnet_core::call::Call;
use magnet_core::call_manager::XmppLink;
use magnet_core::config::DeviceIdentity;
use magnet_core::cookie::{CookieStore, EncryptedFileCookieStore, KeychainCookieStore, MemoryCookieStore};
use magnet_core::{CallFailure, CallOptions, CallOutcome, ClientConfig, Connectivity, MagnetClient, Payload};

/// Wrapper so *mut c_void can be moved into spawned tasks.
struct SendableUserData(*mut c_void);
unsafe impl Send for SendableUserData {}
unsafe impl Sync for SendableUserData {}

/// Call completion: call_id, ok (1/0), result_json (value on success, error
/// payload on failure), details_json, from_cache (1/0), user_data.
type OnCallComplete = extern "C" fn(*const c_char, c_int, *const c_char, *const c_char, c_int, *mut c_void);

/// Session operation completion: ok (1/0), error message or NULL, user_data.
type OnSessionComplete = extern "C" fn(c_int, *const c_char, *mut c_void);

/// Real-time link state reported by the shell's messaging connection.
#[derive(Default)]
struct FlagLink(AtomicBool);

impl XmppLink for FlagLink {
    fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct ClientHolder {
    client: MagnetClient,
    realtime: Arc<FlagLink>,
    /// In-flight calls by id, for cancellation.
    calls: Mutex<HashMap<String, Arc<Call>>>,
}

/// Registry of clients keyed by handle. Hosts the shared tokio runtime.
struct Registry {
    runtime: tokio::runtime::Runtime,
    clients: RwLock<HashMap<u64, Arc<ClientHolder>>>,
    counter: AtomicU64,
}

fn registry() -> Option<&'static Registry> {
    static REGISTRY: once_cell::sync::OnceCell<Registry> = once_cell::sync::OnceCell::new();
    REGISTRY
        .get_or_try_init(|| {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()?;
            Ok::<_, std::io::Error>(Registry {
                runtime,
                clients: RwLock::new(HashMap::new()),
                counter: AtomicU64::new(0),
            })
        })
        .map_err(|e| tracing::error!(error = %e, "could not start runtime"))
        .ok()
}

fn client(handle: u64) -> Option<Arc<ClientHolder>> {
    let found = registry().and_then(|r| r.clients.read().ok().and_then(|g| g.get(&handle).cloned()));
    if found.is_none() {
        set_last_error("client not found");
    }
    found
}

fn ptr_to_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string()) }
}

fn required(ptr: *const c_char, name: &str) -> Option<String> {
    let s = ptr_to_str(ptr);
    if s.is_none() {
        set_last_error(format!("{} is null or not valid UTF-8", name));
    }
    s
}

/// Interior NULs cannot cross; they are dropped.
fn c_string(s: String) -> CString {
    CString::new(s).unwrap_or_else(|e| {
        let mut bytes = e.into_vec();
        bytes.retain(|b| *b != 0);
        CString::new(bytes).unwrap_or_default()
    })
}

thread_local! {
    static LAST_ERROR: std::cell::RefCell<Option<CString>> = std::cell::RefCell::new(None);
}

fn set_last_error(err: impl Display) {
    let msg = c_string(err.to_string());
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(msg));
}

fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// Version string (static, do not free).
#[no_mangle]
pub extern "C" fn magnet_version() -> *const c_char {
    b"0.1.0\0".as_ptr() as *const c_char
}

/// Last error message from a failed call on this thread. Valid until the
/// next FFI call. Do not free.
#[no_mangle]
pub extern "C" fn magnet_last_error() -> *const c_char {
    LAST_ERROR.with(|e| e.borrow().as_ref().map(|s| s.as_ptr()).unwrap_or(ptr::null()))
}

/// Free a string returned by this library. No-op if ptr is NULL.
#[no_mangle]
pub unsafe extern "C" fn magnet_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------- Client ----------

fn open_cookie_store(path: Option<String>) -> Arc<dyn CookieStore> {
    if let Some(path) = path {
        return Arc::new(EncryptedFileCookieStore::new(PathBuf::from(path)));
    }
    let keychain = KeychainCookieStore::new();
    if keychain.available() {
        return Arc::new(keychain);
    }
    match EncryptedFileCookieStore::default_path() {
        Some(path) => Arc::new(EncryptedFileCookieStore::new(path)),
        None => {
            tracing::warn!(target: "magnet::session", "no persistent cookie store, session will not survive restart");
            Arc::new(MemoryCookieStore::new())
        }
    }
}

/// Create a client from an XML configuration document. cookie_path: encrypted
/// cookie file, or NULL to use the keychain when available. Returns a handle,
/// or 0 on error.
#[no_mangle]
pub unsafe extern "C" fn magnet_client_new(config_xml: *const c_char, cookie_path: *const c_char) -> u64 {
    let Some(xml) = required(config_xml, "config_xml") else {
        return 0;
    };
    let config = match ClientConfig::from_xml(&xml) {
        Ok(c) => c,
        Err(e) => {
            set_last_error(e);
            return 0;
        }
    };
    let Some(reg) = registry() else {
        set_last_error("runtime unavailable");
        return 0;
    };
    let cookies = open_cookie_store(ptr_to_str(cookie_path));
    let client = match MagnetClient::new(config, cookies) {
        Ok(c) => c,
        Err(e) => {
            set_last_error(e);
            return 0;
        }
    };
    let realtime = Arc::new(FlagLink::default());
    let link: Arc<dyn XmppLink> = realtime.clone();
    client.set_xmpp_link(Some(link));
    let holder = ClientHolder {
        client,
        realtime,
        calls: Mutex::new(HashMap::new()),
    };
    let handle = reg.counter.fetch_add(1, Ordering::SeqCst) + 1;
    match reg.clients.write() {
        Ok(mut guard) => {
            guard.insert(handle, Arc::new(holder));
        }
        Err(_) => {
            set_last_error("client registry unavailable");
            return 0;
        }
    }
    clear_last_error();
    handle
}

/// Release a client. Calls already in flight still complete.
#[no_mangle]
pub extern "C" fn magnet_client_free(handle: u64) {
    if let Some(reg) = registry() {
        if let Ok(mut guard) = reg.clients.write() {
            guard.remove(&handle);
        }
    }
}

/// Identify the native shell. Both NULL clears the device.
#[no_mangle]
pub unsafe extern "C" fn magnet_client_set_device(handle: u64, device_id: *const c_char, user_agent: *const c_char) -> c_int {
    let Some(holder) = client(handle) else {
        return -1;
    };
    let device = match (ptr_to_str(device_id), ptr_to_str(user_agent)) {
        (None, None) => None,
        (Some(device_id), user_agent) => Some(DeviceIdentity {
            device_id,
            user_agent: user_agent.unwrap_or_else(magnet_core::config::default_user_agent),
        }),
        (None, Some(_)) => {
            set_last_error("device_id is null or not valid UTF-8");
            return -1;
        }
    };
    holder.client.set_device(device);
    clear_last_error();
    0
}

/// Report connectivity: "none", "wifi", "cellular", "ethernet" or "unknown".
#[no_mangle]
pub unsafe extern "C" fn magnet_client_set_connectivity(handle: u64, state: *const c_char) -> c_int {
    let Some(holder) = client(handle) else {
        return -1;
    };
    let Some(state) = required(state, "state") else {
        return -1;
    };
    holder.client.set_connectivity(Connectivity::parse(&state));
    clear_last_error();
    0
}

/// Report whether the real-time messaging link is up.
#[no_mangle]
pub extern "C" fn magnet_client_set_realtime_connected(handle: u64, connected: c_int) -> c_int {
    let Some(holder) = client(handle) else {
        return -1;
    };
    holder.realtime.0.store(connected != 0, Ordering::SeqCst);
    clear_last_error();
    0
}

fn parse_json<T: serde::de::DeserializeOwned + Default>(ptr: *const c_char, name: &str) -> Result<T, ()> {
    match ptr_to_str(ptr) {
        None => Ok(T::default()),
        Some(s) if s.trim().is_empty() => Ok(T::default()),
        Some(s) => serde_json::from_str(&s).map_err(|e| set_last_error(format!("{}: {}", name, e))),
    }
}

fn complete_call(
    cb: OnCallComplete,
    user: &SendableUserData,
    call_id: &str,
    result: Result<CallOutcome, CallFailure>,
) {
    let (ok, value, details, from_cache) = match result {
        Ok(outcome) => (1, outcome.value.to_json(), outcome.details, outcome.from_cache),
        Err(failure) => (0, failure.error.to_payload().to_json(), failure.details, false),
    };
    let id_c = c_string(call_id.to_string());
    let value_c = c_string(value.to_string());
    let details_c = c_string(serde_json::to_string(&details).unwrap_or_else(|_| "{}".to_string()));
    (cb)(
        id_c.as_ptr(),
        ok,
        value_c.as_ptr(),
        details_c.as_ptr(),
        if from_cache { 1 } else { 0 },
        user.0,
    );
}

/// Invoke a catalogued method. attributes_json: JSON object (NULL for none).
/// options_json: call options such as {"cacheAge":60,"constraint":"wifi",
/// "isReliable":true} (NULL for defaults). Returns the call id (free with
/// magnet_free_string), or NULL on error; on_complete fires exactly once.
#[no_mangle]
pub unsafe extern "C" fn magnet_client_invoke(
    handle: u64,
    controller: *const c_char,
    method: *const c_char,
    attributes_json: *const c_char,
    options_json: *const c_char,
    on_complete: OnCallComplete,
    user_data: *mut c_void,
) -> *mut c_char {
    let Some(holder) = client(handle) else {
        return ptr::null_mut();
    };
    let (Some(controller), Some(method)) = (required(controller, "controller"), required(method, "method")) else {
        return ptr::null_mut();
    };
    let Ok(attributes) = parse_json::<serde_json::Value>(attributes_json, "attributes_json") else {
        return ptr::null_mut();
    };
    let Ok(options) = parse_json::<CallOptions>(options_json, "options_json") else {
        return ptr::null_mut();
    };
    let attributes = match attributes {
        serde_json::Value::Null => Payload::object(),
        other => Payload::from_json(other),
    };
    let Some(reg) = registry() else {
        set_last_error("runtime unavailable");
        return ptr::null_mut();
    };

    let _enter = reg.runtime.enter();
    let call_handle = match holder.client.invoke(&controller, &method, attributes, options) {
        Ok(h) => h,
        Err(e) => {
            set_last_error(e);
            return ptr::null_mut();
        }
    };
    let call_id = call_handle.id().to_string();
    holder
        .calls
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(call_id.clone(), call_handle.call().clone());

    let user = SendableUserData(user_data);
    let id = call_id.clone();
    reg.runtime.spawn(async move {
        let result = call_handle.await;
        holder.calls.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
        complete_call(on_complete, &user, &id, result);
    });
    clear_last_error();
    c_string(call_id).into_raw()
}

/// Cancel a call by id. Queued calls settle at once; in-flight calls settle
/// with call-cancelled when their exchange ends. Returns 0 if found, 1 if not.
#[no_mangle]
pub unsafe extern "C" fn magnet_client_cancel(handle: u64, call_id: *const c_char) -> c_int {
    let Some(holder) = client(handle) else {
        return -1;
    };
    let Some(call_id) = required(call_id, "call_id") else {
        return -1;
    };
    clear_last_error();
    if holder.client.pipeline().cancel(&call_id) {
        return 0;
    }
    let in_flight = holder.calls.lock().unwrap_or_else(|e| e.into_inner()).get(&call_id).cloned();
    match in_flight {
        Some(call) if call.cancel() => 0,
        _ => 1,
    }
}

/// Send queued reliable calls whose constraint is now met. Returns the number
/// sent, or -1 on error.
#[no_mangle]
pub extern "C" fn magnet_client_replay_queued(handle: u64) -> c_int {
    let Some(holder) = client(handle) else {
        return -1;
    };
    let Some(reg) = registry() else {
        set_last_error("runtime unavailable");
        return -1;
    };
    let _enter = reg.runtime.enter();
    let sent = holder.client.replay_queued();
    clear_last_error();
    c_int::try_from(sent).unwrap_or(c_int::MAX)
}

fn spawn_session_op<F>(handle: u64, on_complete: OnSessionComplete, user_data: *mut c_void, op: F) -> c_int
where
    F: FnOnce(Arc<ClientHolder>) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), String>> + Send>>,
{
    let Some(holder) = client(handle) else {
        return -1;
    };
    let Some(reg) = registry() else {
        set_last_error("runtime unavailable");
        return -1;
    };
    let user = SendableUserData(user_data);
    let fut = op(holder);
    reg.runtime.spawn(async move {
        let user = user;
        match fut.await {
            Ok(()) => (on_complete)(1, ptr::null(), user.0),
            Err(msg) => {
                let msg_c = c_string(msg);
                (on_complete)(0, msg_c.as_ptr(), user.0);
            }
        }
    });
    clear_last_error();
    0
}

/// Obtain an application token with the configured client credentials.
#[no_mangle]
pub extern "C" fn magnet_client_app_session(handle: u64, on_complete: OnSessionComplete, user_data: *mut c_void) -> c_int {
    spawn_session_op(handle, on_complete, user_data, |holder| {
        Box::pin(async move { holder.client.app_session().await.map(|_| ()).map_err(|f| f.error.to_string()) })
    })
}

/// Log a user in. remember_me non-zero persists the refresh token.
#[no_mangle]
pub unsafe extern "C" fn magnet_client_login(
    handle: u64,
    username: *const c_char,
    password: *const c_char,
    remember_me: c_int,
    on_complete: OnSessionComplete,
    user_data: *mut c_void,
) -> c_int {
    let (Some(username), Some(password)) = (required(username, "username"), required(password, "password")) else {
        return -1;
    };
    spawn_session_op(handle, on_complete, user_data, move |holder| {
        Box::pin(async move {
            holder
                .client
                .login(&username, &password, remember_me != 0)
                .await
                .map(|_| ())
                .map_err(|f| f.error.to_string())
        })
    })
}

/// Log the user out. Local session state is cleared even if the server call fails.
#[no_mangle]
pub extern "C" fn magnet_client_logout(handle: u64, on_complete: OnSessionComplete, user_data: *mut c_void) -> c_int {
    spawn_session_op(handle, on_complete, user_data, |holder| {
        Box::pin(async move { holder.client.logout().await.map_err(|f| f.error.to_string()) })
    })
}
