//! C-linkage control façade
//!
//! Stable entry points for host processes in any language:
//!
//! ```c
//! int Init(void);                    // 0 ok, 1 already running,
//!                                    // -1 WebRTC init, -2 MQTT connect
//! int SwitchCamera(int camera);      // 0 ok, -1 not initialized, -2 bad camera
//! int Stop(void);                    // always 0
//! int GetStatus(void);               // 1 running, 0 not
//! int SetLogFile(const char *path);  // 0 ok, -1 open failed
//! ```
//!
//! One instance per process, guarded by a lock; the library survives
//! repeated init/stop cycles under the same host.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::config::StreamConfig;
use crate::error::Error;
use crate::logging;
use crate::service::StreamService;

struct Instance {
    runtime: Runtime,
    service: Arc<StreamService>,
}

static INSTANCE: Mutex<Option<Instance>> = Mutex::new(None);

/// Initialize the backend with configuration from `RMCS_*` environment
/// variables. Idempotent while running.
#[no_mangle]
pub extern "C" fn Init() -> c_int {
    logging::init();

    let mut guard = INSTANCE.lock().unwrap();
    if guard.is_some() {
        tracing::info!("Already initialized");
        return 1;
    }

    let runtime = match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build runtime");
            return -1;
        }
    };

    let config = StreamConfig::from_env();
    match runtime.block_on(StreamService::start(config)) {
        Ok(service) => {
            *guard = Some(Instance {
                runtime,
                service: Arc::new(service),
            });
            0
        }
        Err(Error::Signaling(e)) => {
            tracing::error!(error = %e, "MQTT connect failed");
            -2
        }
        Err(e) => {
            tracing::error!(error = %e, "Initialization failed");
            -1
        }
    }
}

/// Switch the active camera by table index
#[no_mangle]
pub extern "C" fn SwitchCamera(camera: c_int) -> c_int {
    let guard = INSTANCE.lock().unwrap();
    let Some(instance) = guard.as_ref() else {
        tracing::warn!("SwitchCamera before Init");
        return -1;
    };

    match instance
        .runtime
        .block_on(instance.service.switch_source(camera))
    {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(camera = camera, error = %e, "Camera switch failed");
            -2
        }
    }
}

/// Stop the backend and release all process state
#[no_mangle]
pub extern "C" fn Stop() -> c_int {
    let instance = INSTANCE.lock().unwrap().take();

    if let Some(instance) = instance {
        instance.runtime.block_on(instance.service.stop());
        instance.runtime.shutdown_timeout(Duration::from_secs(2));
    }

    0
}

/// 1 while the backend is running, 0 otherwise
#[no_mangle]
pub extern "C" fn GetStatus() -> c_int {
    let guard = INSTANCE.lock().unwrap();
    match guard.as_ref() {
        Some(instance) if instance.service.is_running() => 1,
        _ => 0,
    }
}

/// Redirect the log to append to `path`
///
/// # Safety
/// `path` must be a NUL-terminated C string or null.
#[no_mangle]
pub unsafe extern "C" fn SetLogFile(path: *const c_char) -> c_int {
    if path.is_null() {
        return -1;
    }

    let path = unsafe { CStr::from_ptr(path) };
    let Ok(path) = path.to_str() else {
        return -1;
    };

    match logging::set_log_file(path) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}
