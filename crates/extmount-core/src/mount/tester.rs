//! Connectivity testing.
//!
//! Status checks run against configuration supplied by administrators and
//! users for hosts that may be unreachable. A tester never propagates a
//! backend failure: everything is folded into a [`StorageStatus`].

use crate::config::{BackendOptions, StorageStatus};
use crate::definition::{BackendDefinition, StorageContext};
use crate::storage::{StorageError, StorageResult};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

/// Decides whether a backend configuration is usable.
pub trait ConnectivityTester: Send + Sync {
    /// Construct the backend and test it
    fn test(
        &self,
        backend: &BackendDefinition,
        options: &BackendOptions,
        context: &StorageContext,
    ) -> StorageStatus;
}

/// Reports success without touching the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTester;

impl ConnectivityTester for NoopTester {
    fn test(&self, _: &BackendDefinition, _: &BackendOptions, _: &StorageContext) -> StorageStatus {
        StorageStatus::Success
    }
}

/// Runs construction and `test()` on a worker thread with a deadline.
///
/// A backend that hangs or panics is reported as [`StorageStatus::Error`];
/// the worker is left to finish on its own.
#[derive(Debug, Clone)]
pub struct TimeoutTester {
    timeout: Duration,
}

impl TimeoutTester {
    /// Tester with the given deadline
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Configured deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn run(
        &self,
        backend: &BackendDefinition,
        options: &BackendOptions,
        context: &StorageContext,
    ) -> StorageResult<()> {
        let (tx, rx) = mpsc::channel();
        let backend = backend.clone();
        let options = options.clone();
        let context = context.clone();

        std::thread::spawn(move || {
            let result = backend
                .instantiate(&options, &context)
                .and_then(|storage| storage.test());
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(StorageError::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(StorageError::not_available(
                "connectivity test terminated unexpectedly",
                crate::storage::error::code::ERROR,
            )),
        }
    }
}

impl ConnectivityTester for TimeoutTester {
    fn test(
        &self,
        backend: &BackendDefinition,
        options: &BackendOptions,
        context: &StorageContext,
    ) -> StorageStatus {
        classify(backend.id(), self.run(backend, options, context))
    }
}

/// Fold a test outcome into a status, logging failures.
pub fn classify(backend: &str, result: StorageResult<()>) -> StorageStatus {
    match result {
        Ok(()) => {
            debug!(backend, "Backend test succeeded");
            StorageStatus::Success
        }
        Err(e) if e.is_indeterminate() => {
            debug!(app = "files_external", backend, error = %e, "Backend status indeterminate");
            StorageStatus::Indeterminate
        }
        Err(e) => {
            warn!(app = "files_external", backend, code = e.code(), error = %e, "Backend test failed");
            StorageStatus::Error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalStorage, Storage};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context() -> StorageContext {
        StorageContext::new("/tmp", Duration::from_secs(1))
    }

    #[test]
    fn test_local_directory_succeeds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        let backend = BackendDefinition::new("local", "Local", move |_, _| {
            Ok(Arc::new(LocalStorage::new(path.clone())) as Arc<dyn Storage>)
        });
        let tester = TimeoutTester::new(Duration::from_secs(5));
        assert_eq!(
            tester.test(&backend, &BackendOptions::new(), &context()),
            StorageStatus::Success
        );
    }

    #[test]
    fn test_construction_failure_is_error() {
        let backend = BackendDefinition::new("broken", "Broken", |_, _| {
            Err(StorageError::InvalidConfig("host missing".into()))
        });
        let tester = TimeoutTester::new(Duration::from_secs(5));
        assert_eq!(
            tester.test(&backend, &BackendOptions::new(), &context()),
            StorageStatus::Error
        );
    }

    #[test]
    fn test_panicking_backend_is_error() {
        let backend = BackendDefinition::new("panics", "Panics", |_, _| panic!("backend bug"));
        let tester = TimeoutTester::new(Duration::from_secs(5));
        assert_eq!(
            tester.test(&backend, &BackendOptions::new(), &context()),
            StorageStatus::Error
        );
    }

    #[test]
    fn test_hanging_backend_times_out() {
        let backend = BackendDefinition::new("slow", "Slow", |_, _| {
            std::thread::sleep(Duration::from_secs(2));
            Err(StorageError::NotSupported("never reached".into()))
        });
        let tester = TimeoutTester::new(Duration::from_millis(50));
        assert_eq!(
            tester.test(&backend, &BackendOptions::new(), &context()),
            StorageStatus::Error
        );
    }

    #[test]
    fn test_insufficient_data_is_indeterminate() {
        assert_eq!(
            classify("x", Err(StorageError::InsufficientData("no session".into()))),
            StorageStatus::Indeterminate
        );
        assert_eq!(classify("x", Ok(())), StorageStatus::Success);
    }

    #[test]
    fn test_noop_tester() {
        let backend = BackendDefinition::new("broken", "Broken", |_, _| {
            Err(StorageError::InvalidConfig("x".into()))
        });
        assert_eq!(
            NoopTester.test(&backend, &BackendOptions::new(), &context()),
            StorageStatus::Success
        );
    }
}
