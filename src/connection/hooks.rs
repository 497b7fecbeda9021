#![allow(unsafe_code)]

//! Process exit and fork notifications for connection handles.
//!
//! The process handlers are installed the first time any cache opens a
//! client, and every handle opened afterwards is tracked for teardown: at
//! process exit each live client is closed. After a fork the child bumps a
//! process generation counter; caches and handles compare against it and
//! discard parent state without closing it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once, Weak};

use parking_lot::Mutex;
use tracing::debug;

/// Something holding a client that must be closed at process exit.
pub(crate) trait ExitClose: Send + Sync {
    fn close_at_exit(&self);
}

static GENERATION: AtomicU64 = AtomicU64::new(0);
static REGISTERED: Mutex<Vec<Weak<dyn ExitClose>>> = parking_lot::const_mutex(Vec::new());
static INSTALL: Once = Once::new();

/// Current process generation. Incremented in every forked child.
pub fn generation() -> u64 {
    GENERATION.load(Ordering::Acquire)
}

/// Installs the process exit and fork handlers. Idempotent; caches call it
/// before opening their first client.
pub fn install() {
    INSTALL.call_once(register_process_hooks);
}

/// Whether the process handlers have been installed.
pub fn installed() -> bool {
    INSTALL.is_completed()
}

pub(crate) fn track(target: Weak<dyn ExitClose>) {
    install();
    let mut registered = REGISTERED.lock();
    registered.retain(|weak| weak.strong_count() > 0);
    registered.push(target);
}

/// Closes every client still open in this process generation.
pub fn run_exit_hooks() {
    let live: Vec<Arc<dyn ExitClose>> = REGISTERED
        .lock()
        .iter()
        .filter_map(Weak::upgrade)
        .collect();
    debug!(live = live.len(), "connection.hooks.exit");
    for target in live {
        target.close_at_exit();
    }
}

/// Marks the current process as a fresh fork child.
///
/// Only touches an atomic, so it is safe to call from a `pthread_atfork`
/// child handler.
pub fn after_fork_in_child() {
    GENERATION.fetch_add(1, Ordering::AcqRel);
}

#[cfg(unix)]
fn register_process_hooks() {
    extern "C" fn on_exit() {
        run_exit_hooks();
    }

    unsafe extern "C" fn on_fork_child() {
        after_fork_in_child();
    }

    // SAFETY: both callbacks are plain functions with 'static lifetime; the
    // fork handler only performs an atomic increment.
    let (exit_rc, fork_rc) = unsafe {
        (
            libc::atexit(on_exit),
            libc::pthread_atfork(None, None, Some(on_fork_child as unsafe extern "C" fn())),
        )
    };
    debug!(exit_rc, fork_rc, "connection.hooks.install");
}

#[cfg(not(unix))]
fn register_process_hooks() {
    debug!("connection.hooks.unsupported_platform");
}
