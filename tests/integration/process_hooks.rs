//! Runs in its own binary: exit hooks and fork handlers are process-wide, so
//! every test here holds `PROCESS` for its whole body.
#![allow(unsafe_code)]

use std::sync::Arc;

use docbag::{
    connection::{hooks, ConnectionCache, ConnectionConfig},
    store::MemoryConnector,
    Result,
};
use parking_lot::Mutex;

static PROCESS: Mutex<()> = parking_lot::const_mutex(());

#[test]
fn clients_open_installs_process_hooks() -> Result<()> {
    let _process = PROCESS.lock();
    let cache = ConnectionCache::new(Arc::new(MemoryConnector::new()));
    let _handle = cache.get(&ConnectionConfig::new().with("host", "auto"))?;
    assert!(hooks::installed());
    Ok(())
}

#[test]
fn exit_hooks_close_live_clients_once() -> Result<()> {
    let _process = PROCESS.lock();
    let connector = Arc::new(MemoryConnector::new());
    let cache = ConnectionCache::new(connector.clone());
    let cached = cache.get(&ConnectionConfig::new().with("host", "exit"))?;
    let held = cache.get(&ConnectionConfig::new().with("host", "held"))?;

    hooks::run_exit_hooks();
    assert!(cached.is_closed());
    assert!(held.is_closed());
    assert_eq!(connector.closed(), 2);

    hooks::run_exit_hooks();
    drop((cached, held));
    drop(cache);
    assert_eq!(connector.closed(), 2);
    Ok(())
}

#[test]
fn closed_entries_are_reopened() -> Result<()> {
    let _process = PROCESS.lock();
    let connector = Arc::new(MemoryConnector::new());
    let cache = ConnectionCache::new(connector.clone());
    let config = ConnectionConfig::new().with("host", "again");
    let first = cache.get(&config)?;
    hooks::run_exit_hooks();
    assert!(first.is_closed());

    let second = cache.get(&config)?;
    assert!(!second.is_closed());
    assert!(!second.same_client(&first));
    assert_eq!(connector.opened(), 2);
    assert_eq!(cache.len(), 1);
    Ok(())
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::raw::c_int;

    use docbag::store::{Client, Collection, Connector};

    fn wait_for(pid: libc::pid_t) -> c_int {
        let mut status: c_int = 0;
        // SAFETY: `pid` is a child of this process and `status` outlives the call.
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        assert_eq!(rc, pid, "waitpid failed");
        assert!(libc::WIFEXITED(status), "child did not exit normally: {status}");
        libc::WEXITSTATUS(status)
    }

    // Child-side checks. Returns the failing check's number, 0 when all pass.
    fn child_checks(
        connector: &MemoryConnector,
        cache: &ConnectionCache,
        config: &ConnectionConfig,
        inherited: docbag::connection::ConnectionHandle,
        parent_generation: u64,
    ) -> c_int {
        if hooks::generation() != parent_generation + 1 {
            return 1;
        }
        let Ok(fresh) = cache.get(config) else {
            return 2;
        };
        if fresh.same_client(&inherited) || cache.len() != 1 {
            return 3;
        }
        let closed_before = connector.closed();
        drop(inherited);
        if connector.closed() != closed_before {
            return 4;
        }
        if fresh.collection("db", "c").is_err() {
            return 5;
        }
        0
    }

    #[test]
    fn forked_child_opens_its_own_client() -> Result<()> {
        let _process = PROCESS.lock();
        let connector = Arc::new(MemoryConnector::new());
        let cache = ConnectionCache::new(connector.clone());
        let config = ConnectionConfig::new().with("host", "parent");
        let inherited = cache.get(&config)?;
        let parent_generation = hooks::generation();

        // SAFETY: every other test in this binary is parked on `PROCESS`, and
        // the child leaves through `_exit` without unwinding.
        match unsafe { libc::fork() } {
            -1 => panic!("fork failed"),
            0 => {
                let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    child_checks(&connector, &cache, &config, inherited, parent_generation)
                }))
                .unwrap_or(100);
                // SAFETY: terminates the child without running parent-owned destructors.
                unsafe { libc::_exit(code) }
            }
            pid => {
                assert_eq!(wait_for(pid), 0, "child check failed");
                assert_eq!(hooks::generation(), parent_generation);
                assert!(!inherited.is_closed());
                assert!(inherited.same_client(&cache.get(&config)?));
                assert_eq!(connector.opened(), 1);
                assert_eq!(connector.closed(), 0);
            }
        }
        Ok(())
    }

    // Writes one byte to a pipe whenever a client closes, so the parent can
    // observe closes that happen inside the child.
    struct PipeConnector {
        inner: MemoryConnector,
        fd: c_int,
    }

    struct PipeClient {
        inner: Arc<dyn Client>,
        fd: c_int,
    }

    impl Connector for PipeConnector {
        fn connect(&self, app_name: &str, config: &ConnectionConfig) -> Result<Arc<dyn Client>> {
            Ok(Arc::new(PipeClient {
                inner: self.inner.connect(app_name, config)?,
                fd: self.fd,
            }))
        }
    }

    impl Client for PipeClient {
        fn collection(&self, database: &str, collection: &str) -> Result<Arc<dyn Collection>> {
            self.inner.collection(database, collection)
        }

        fn close(&self) {
            // SAFETY: `fd` is the write end of a pipe open for the child's lifetime.
            unsafe { libc::write(self.fd, b"c".as_ptr().cast(), 1) };
            self.inner.close();
        }
    }

    #[test]
    fn process_exit_closes_each_client_once() -> Result<()> {
        let _process = PROCESS.lock();
        let mut fds: [c_int; 2] = [0; 2];
        // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0, "pipe failed");
        let [read_fd, write_fd] = fds;

        // SAFETY: see `forked_child_opens_its_own_client`.
        match unsafe { libc::fork() } {
            -1 => panic!("fork failed"),
            0 => {
                let opened = std::panic::catch_unwind(|| {
                    let cache = ConnectionCache::new(Arc::new(PipeConnector {
                        inner: MemoryConnector::new(),
                        fd: write_fd,
                    }));
                    let cached = cache.get(&ConnectionConfig::new().with("host", "a")).is_ok();
                    let held = cache.get(&ConnectionConfig::new().with("host", "b"));
                    // Leaked so only the exit handler can close them.
                    std::mem::forget(cache);
                    std::mem::forget(held);
                    cached
                });
                // SAFETY: `exit` runs the registered atexit handlers in the child.
                unsafe { libc::exit(if matches!(opened, Ok(true)) { 0 } else { 1 }) }
            }
            pid => {
                // SAFETY: closes the parent's copy of the write end.
                unsafe { libc::close(write_fd) };
                assert_eq!(wait_for(pid), 0, "child failed to open clients");
                let mut buf = [0u8; 16];
                let mut closes = Vec::new();
                loop {
                    // SAFETY: `buf` is valid for `buf.len()` bytes.
                    let n = unsafe { libc::read(read_fd, buf.as_mut_ptr().cast(), buf.len()) };
                    if n <= 0 {
                        break;
                    }
                    closes.extend_from_slice(&buf[..n as usize]);
                }
                // SAFETY: closes the read end opened above.
                unsafe { libc::close(read_fd) };
                assert_eq!(closes, b"cc");
            }
        }
        Ok(())
    }
}
