//!
//! Photo AutoSync - periodic image upload with a C FFI for native hosts
//!
//! The sync workflow (scan, upload, delete-on-success, counters) lives in the
//! Rust modules below. A host UI links the static library and drives it
//! through the `autosync_*` functions; each started session runs the
//! periodic loop on its own background thread.
//!

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use log::{error, info, warn};

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod notifier;
pub mod scanner;
pub mod uploader;
pub mod uri;

pub use config::{Endpoint, SettingsFile, StatusSnapshot, SyncConfig};
pub use db::PreferenceStore;
pub use engine::{RunOutcome, RunSummary, SyncEngine};
pub use error::SyncError;
pub use events::{EventBus, SyncEvent};
pub use notifier::{ConsoleNotifier, Notification, Notifier};
pub use uploader::{HttpUploader, Uploader};
pub use uri::format_uri;

// C function pointer type for notifications shown by the host
pub type NotificationCallback = Option<extern "C" fn(
    u32,                    // notification id (always the same, replaces the previous one)
    *const c_char,          // kind: "progress", "complete", "error"
    *const c_char,          // title
    *const c_char,          // text
    u32,                    // current (progress only, else 0)
    u32                     // total (progress only, else 0)
)>;

// C function pointer type for UI update events
pub type EventCallback = Option<extern "C" fn(
    *const c_char,          // kind: "sync_time" or "upload_count"
    *const c_char           // human readable message
)>;

// Global registry of running sync sessions
lazy_static::lazy_static! {
    static ref SESSIONS: Arc<Mutex<HashMap<String, SessionHandle>>> = Arc::new(Mutex::new(HashMap::new()));
}

struct SessionHandle {
    thread_handle: Option<thread::JoinHandle<()>>,
    shutdown_signal: Arc<AtomicBool>,
    engine: Arc<SyncEngine>,
    // Canonical database path, at most one live session per file
    db_key: Option<PathBuf>,
}

fn sessions() -> MutexGuard<'static, HashMap<String, SessionHandle>> {
    SESSIONS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Forwards notifications to the host's callback.
struct CallbackNotifier {
    callback: extern "C" fn(u32, *const c_char, *const c_char, *const c_char, u32, u32),
}

impl Notifier for CallbackNotifier {
    fn notify(&self, id: u32, notification: &Notification) {
        let (current, total) = match notification {
            Notification::Progress { current, total } => (
                u32::try_from(*current).unwrap_or(u32::MAX),
                u32::try_from(*total).unwrap_or(u32::MAX),
            ),
            _ => (0, 0),
        };

        let kind = CString::new(notification.kind()).unwrap_or_default();
        let title = CString::new(notification.title()).unwrap_or_default();
        let text = CString::new(notification.text()).unwrap_or_default();

        (self.callback)(id, kind.as_ptr(), title.as_ptr(), text.as_ptr(), current, total);
    }
}

/// Copy a C string argument; `None` for null or invalid UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn c_str_arg(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn into_c_string(value: String) -> *mut c_char {
    match CString::new(value) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

fn notifier_for(callback: NotificationCallback) -> Arc<dyn Notifier> {
    match callback {
        Some(callback) => Arc::new(CallbackNotifier { callback }),
        None => Arc::new(ConsoleNotifier),
    }
}

fn open_store(db_path: &str) -> Option<PreferenceStore> {
    match PreferenceStore::open(Path::new(db_path)) {
        Ok(store) => Some(store),
        Err(e) => {
            error!("Failed to open preference store {}: {}", db_path, e);
            None
        }
    }
}

/// Start periodic syncing for the settings stored at `db_path`
///
/// Marks sync as enabled and spawns the session thread. Fails with -3 when
/// the session id is taken and -7 when another session already syncs the
/// same database file.
///
/// Returns 0 on success, non-zero on error
#[no_mangle]
pub extern "C" fn autosync_start(
    db_path: *const c_char,
    session_id: *const c_char,
    notification_callback: NotificationCallback,
    event_callback: EventCallback,
) -> i32 {
    let db_str = match unsafe { c_str_arg(db_path) } {
        Some(s) => s,
        None => return -1,
    };
    let id_str = match unsafe { c_str_arg(session_id) } {
        Some(s) => s,
        None => return -2,
    };

    // Held until the new session is registered
    let mut registry = sessions();
    if registry.contains_key(&id_str) {
        warn!("Session {} already running", id_str);
        return -3;
    }

    let store = match open_store(&db_str) {
        Some(store) => Arc::new(store),
        None => return -4,
    };
    let db_key = store.path().map(Path::to_path_buf);
    if let Some((other, _)) = registry.iter().find(|(_, s)| s.db_key == db_key) {
        warn!("Session {} already syncs {}", other, db_str);
        return -7;
    }

    if let Err(e) = store.set_sync_enabled(true) {
        error!("Failed to enable sync: {}", e);
        return -5;
    }

    let uploader = match HttpUploader::new(None) {
        Ok(uploader) => uploader,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return -6;
        }
    };

    let engine = Arc::new(SyncEngine::new(store, Box::new(uploader), notifier_for(notification_callback)));

    // Event forwarder exits once the engine (and its bus) is dropped
    if let Some(callback) = event_callback {
        let events = engine.events().subscribe();
        thread::spawn(move || {
            while let Ok(event) = events.recv() {
                let kind = CString::new(event.kind()).unwrap_or_default();
                let message = CString::new(event.message()).unwrap_or_default();
                callback(kind.as_ptr(), message.as_ptr());
            }
        });
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    let engine_clone = engine.clone();

    let handle = thread::spawn(move || engine_clone.run_periodic(&shutdown_clone));

    info!("Started sync session {}", id_str);
    registry.insert(
        id_str,
        SessionHandle {
            thread_handle: Some(handle),
            shutdown_signal: shutdown,
            engine,
            db_key,
        },
    );

    0 // Success
}

/// Stop a sync session and switch sync off
/// Returns 0 on success, non-zero on error
#[no_mangle]
pub extern "C" fn autosync_stop(session_id: *const c_char) -> i32 {
    let id_str = match unsafe { c_str_arg(session_id) } {
        Some(s) => s,
        None => return -1,
    };

    let session = sessions().remove(&id_str);
    match session {
        Some(session) => {
            session.shutdown_signal.store(true, Ordering::SeqCst);
            if let Err(e) = session.engine.store().set_sync_enabled(false) {
                warn!("Failed to persist disabled sync: {}", e);
            }

            // Don't join: an upload in flight would block the UI thread.
            // The loop exits on its own once it sees the signal.
            drop(session.thread_handle);
            info!("Stopped sync session {}", id_str);
            0 // Success
        }
        None => -3, // Session not found
    }
}

/// Run one sync immediately for the settings at `db_path`
///
/// Uses the live session's engine (and its notifier) for that database when
/// there is one, otherwise a temporary engine reporting to
/// `notification_callback`. Either way the run shares the database's
/// single-flight guard. Blocks until the run finishes. Returns 0 when every
/// file uploaded, 1 when skipped because a run was already in progress,
/// 2 when some files failed, negative on error.
#[no_mangle]
pub extern "C" fn autosync_run_now(
    db_path: *const c_char,
    notification_callback: NotificationCallback,
) -> i32 {
    let db_str = match unsafe { c_str_arg(db_path) } {
        Some(s) => s,
        None => return -1,
    };

    let store = match open_store(&db_str) {
        Some(store) => store,
        None => return -2,
    };

    let live = store.path().and_then(|key| {
        sessions()
            .values()
            .find(|s| s.db_key.as_deref() == Some(key))
            .map(|s| s.engine.clone())
    });
    let engine = match live {
        Some(engine) => engine,
        None => match HttpUploader::new(None) {
            Ok(uploader) => Arc::new(SyncEngine::new(
                Arc::new(store),
                Box::new(uploader),
                notifier_for(notification_callback),
            )),
            Err(e) => {
                error!("Failed to build HTTP client: {}", e);
                return -3;
            }
        },
    };

    match engine.run_once() {
        Ok(RunOutcome::Skipped) => 1,
        Ok(RunOutcome::Finished(summary)) if summary.is_success() => 0,
        Ok(RunOutcome::Finished(_)) => 2,
        Err(e) => {
            error!("Manual sync failed: {}", e);
            -4
        }
    }
}

/// Get status for the settings at `db_path` as JSON
/// Returns JSON string (must be freed with autosync_free_string)
/// Returns null pointer on error
#[no_mangle]
pub extern "C" fn autosync_get_status(db_path: *const c_char) -> *mut c_char {
    let db_str = match unsafe { c_str_arg(db_path) } {
        Some(s) => s,
        None => return std::ptr::null_mut(),
    };

    let store = match open_store(&db_str) {
        Some(store) => store,
        None => return std::ptr::null_mut(),
    };

    match StatusSnapshot::load(&store, store.run_in_progress())
        .map_err(|e| e.to_string())
        .and_then(|status| serde_json::to_string(&status).map_err(|e| e.to_string()))
    {
        Ok(json) => into_c_string(json),
        Err(e) => {
            error!("Failed to read status: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Save endpoint URL, token and interval (minutes) exactly as entered
/// Returns 0 on success, non-zero on error
#[no_mangle]
pub extern "C" fn autosync_save_parameters(
    db_path: *const c_char,
    api_url: *const c_char,
    token: *const c_char,
    interval: *const c_char,
) -> i32 {
    let (db_str, url, token, interval) = unsafe {
        match (c_str_arg(db_path), c_str_arg(api_url), c_str_arg(token), c_str_arg(interval)) {
            (Some(d), Some(u), Some(t), Some(i)) => (d, u, t, i),
            _ => return -1,
        }
    };

    let store = match open_store(&db_str) {
        Some(store) => store,
        None => return -2,
    };

    match store.save_parameters(&url, &token, &interval) {
        Ok(()) => 0,
        Err(e) => {
            error!("Failed to save parameters: {}", e);
            -3
        }
    }
}

/// Remember the directory the user picked
/// Returns 0 on success, non-zero on error
#[no_mangle]
pub extern "C" fn autosync_set_directory(db_path: *const c_char, directory: *const c_char) -> i32 {
    let (db_str, directory) = unsafe {
        match (c_str_arg(db_path), c_str_arg(directory)) {
            (Some(d), Some(dir)) => (d, dir),
            _ => return -1,
        }
    };

    let store = match open_store(&db_str) {
        Some(store) => store,
        None => return -2,
    };

    match store.set_directory(&directory) {
        Ok(()) => {
            info!("Directory set to {}", format_uri(&directory));
            0
        }
        Err(e) => {
            error!("Failed to save directory: {}", e);
            -3
        }
    }
}

/// Display form of a directory reference
/// Returns string (must be freed with autosync_free_string)
#[no_mangle]
pub extern "C" fn autosync_format_uri(uri: *const c_char) -> *mut c_char {
    let uri_str = unsafe { c_str_arg(uri) }.unwrap_or_default();
    into_c_string(format_uri(&uri_str))
}

/// Free a string allocated by Rust
#[no_mangle]
pub extern "C" fn autosync_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

/// Initialize the library
/// Should be called once at app startup
#[no_mangle]
pub extern "C" fn autosync_init() -> i32 {
    // Initialize logging
    let _ = env_logger::try_init();
    0
}

/// Stop every session and wait for the threads to finish
/// Should be called at app shutdown
#[no_mangle]
pub extern "C" fn autosync_shutdown() -> i32 {
    let drained: Vec<SessionHandle> = sessions().drain().map(|(_, s)| s).collect();
    for mut session in drained {
        session.shutdown_signal.store(true, Ordering::SeqCst);
        if let Some(handle) = session.thread_handle.take() {
            let _ = handle.join();
        }
    }
    0
}
