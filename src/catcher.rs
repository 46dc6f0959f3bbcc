//! The [`ErrorCatcher`], where every stream and the coordinator drop their
//! failures.

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// A thread-safe, append-only sink for errors produced while streaming.
///
/// Supervisors append from their own tasks, the coordinator appends during
/// cleanup. The collected entries are only turned into a single error by
/// [`ErrorCatcher::resolve`], which the coordinator calls after every
/// supervisor has been joined.
#[derive(Debug, Default)]
pub struct ErrorCatcher {
    errors: Mutex<Vec<eyre::Report>>,
}

impl ErrorCatcher {
    /// Create an empty catcher.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<eyre::Report>> {
        // A panic while holding this lock can only come from `Vec::push`, so
        // the contents are still consistent.
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an error.
    pub fn add(&self, err: eyre::Report) {
        self.entries().push(err);
    }

    /// Record the error of `res`, if any.
    pub fn check<T>(&self, res: eyre::Result<T>) {
        if let Err(err) = res {
            self.add(err);
        }
    }

    /// True if at least one error has been recorded.
    pub fn has_errors(&self) -> bool {
        !self.entries().is_empty()
    }

    /// Number of recorded errors.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Take every recorded error and combine them into one.
    ///
    /// Returns `Ok(())` if nothing was recorded. The catcher is left empty.
    pub fn resolve(&self) -> Result<(), CollectedErrors> {
        let errors = std::mem::take(&mut *self.entries());
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CollectedErrors { errors })
        }
    }
}

/// One or more errors collected over the lifetime of a collector.
#[derive(Debug)]
pub struct CollectedErrors {
    errors: Vec<eyre::Report>,
}

impl CollectedErrors {
    /// The individual errors, in the order they were recorded.
    pub fn errors(&self) -> &[eyre::Report] {
        &self.errors
    }

    /// Number of collected errors. Never zero.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always false, a resolved error holds at least one entry.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consume this, returning the individual errors.
    pub fn into_inner(self) -> Vec<eyre::Report> {
        self.errors
    }
}

impl fmt::Display for CollectedErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            return write!(f, "{only:#}");
        }
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {err:#}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CollectedErrors {}

#[cfg(test)]
mod test {
    use super::*;
    use eyre::eyre;
    use std::sync::Arc;

    #[test]
    fn empty_resolves_ok() {
        let catcher = ErrorCatcher::new();
        assert!(!catcher.has_errors());
        assert!(catcher.resolve().is_ok());
    }

    #[test]
    fn check_ignores_ok() {
        let catcher = ErrorCatcher::new();
        catcher.check(Ok::<_, eyre::Report>(3));
        catcher.check::<()>(Err(eyre!("boom")));
        assert_eq!(catcher.len(), 1);
    }

    #[test]
    fn single_error_displays_alone() {
        let catcher = ErrorCatcher::new();
        catcher.add(eyre!("disk full"));
        let err = catcher.resolve().unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert!(catcher.is_empty());
    }

    #[test]
    fn multiple_errors_are_listed() {
        let catcher = ErrorCatcher::new();
        catcher.add(eyre!("first"));
        catcher.add(eyre!("second"));
        let err = catcher.resolve().unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("2 errors occurred:"));
        assert!(msg.contains("* first"));
        assert!(msg.contains("* second"));
    }

    #[test]
    fn wrapped_context_is_kept() {
        use eyre::WrapErr;

        let catcher = ErrorCatcher::new();
        catcher.check(Err::<(), _>(eyre!("connection reset")).wrap_err("problem writing"));
        let msg = catcher.resolve().unwrap_err().to_string();
        assert!(msg.contains("problem writing"));
        assert!(msg.contains("connection reset"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_not_lost() {
        let catcher = Arc::new(ErrorCatcher::new());
        let handles: Vec<_> = (0..16)
            .map(|task| {
                let catcher = Arc::clone(&catcher);
                tokio::spawn(async move {
                    for i in 0..50 {
                        catcher.add(eyre!("task {task} error {i}"));
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(catcher.resolve().unwrap_err().len(), 16 * 50);
    }
}
