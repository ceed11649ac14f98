//! Reactive Runtime
//!
//! The runtime is the access point for the per-thread [`TrackingStack`].
//! Cells and computations never touch the stack directly; they go through
//! [`Runtime`] to push frames, register reads, and inspect depth.
//!
//! # How It Works
//!
//! 1. A computation evaluates its derivation inside [`Runtime::run_tracked`],
//!    which pushes a fresh frame.
//!
//! 2. Every cell or computation read while that frame is on top registers
//!    itself, along with the revision it currently has.
//!
//! 3. When the derivation returns, the frame is popped and handed back as the
//!    computation's new dependency list. On an error or a panic the frame is
//!    popped all the same and its reads are discarded.
//!
//! Computations also report every read of themselves through
//! [`Runtime::enter_evaluation`], so a long chain of computations hits
//! [`RuntimeConfig::max_depth`] at the same length whether it is evaluated
//! for the first time or only checked for staleness.
//!
//! # Thread Model
//!
//! Evaluation is single-threaded and synchronous. Each thread gets its own
//! stack, and handles are `Rc`-based, so a graph never spans threads.

use std::cell::RefCell;

use tracing::warn;

use super::context::{ReadSet, TrackingStack};
use super::node::Dependency;
use crate::error::Error;

/// Default maximum nesting depth, counted both in tracking frames and in
/// computations reading other computations.
pub const DEFAULT_MAX_DEPTH: usize = 1024;

/// Per-thread runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of nested tracking frames, and of nested computation
    /// reads, before [`Error::DepthExceeded`] is returned.
    ///
    /// Each level of nesting uses native stack, so a limit far above the
    /// default needs a thread with a larger stack.
    pub max_depth: usize,
}

impl RuntimeConfig {
    /// Set the maximum nesting depth.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

thread_local! {
    static STACK: RefCell<TrackingStack> = RefCell::new(TrackingStack::new());
}

/// The per-thread reactive runtime.
pub struct Runtime;

impl Runtime {
    /// Run `f` inside a fresh tracking frame.
    ///
    /// Returns the value produced by `f` together with every node it read.
    /// If `f` fails, the frame is still popped, the partial read set is
    /// dropped, and the error is returned as is.
    pub fn run_tracked<T, E, F>(f: F) -> Result<(T, ReadSet), E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<Error>,
    {
        let frame = FrameGuard::push().map_err(|err| {
            warn!(%err, "refusing to push tracking frame");
            E::from(err)
        })?;
        let value = f()?;
        Ok((value, frame.finish()))
    }

    /// Record a read into the active frame, if there is one.
    pub(crate) fn register_read(dependency: Dependency) {
        STACK.with(|stack| stack.borrow_mut().record(dependency));
    }

    /// Count a computation read for as long as the returned guard lives.
    pub(crate) fn enter_evaluation() -> Result<EvaluationGuard, Error> {
        STACK
            .with(|stack| stack.borrow_mut().enter_evaluation())
            .map_err(|err| {
                warn!(%err, "refusing to nest another computation read");
                err
            })?;
        Ok(EvaluationGuard)
    }

    /// Current number of active frames on this thread.
    pub fn depth() -> usize {
        STACK.with(|stack| stack.borrow().depth())
    }

    /// Whether a tracked evaluation is running on this thread.
    pub fn is_tracking() -> bool {
        STACK.with(|stack| stack.borrow().is_tracking())
    }

    /// Replace this thread's configuration.
    pub fn configure(config: RuntimeConfig) {
        STACK.with(|stack| stack.borrow_mut().set_config(config));
    }

    /// This thread's current configuration.
    pub fn config() -> RuntimeConfig {
        STACK.with(|stack| stack.borrow().config().clone())
    }

    /// Install `stack` as this thread's stack while `f` runs.
    ///
    /// The previous stack is restored afterwards, even if `f` panics, and the
    /// installed stack is handed back so callers can inspect it. Frames that
    /// were active outside do not see reads made inside.
    pub fn with_stack<R, F>(stack: TrackingStack, f: F) -> (R, TrackingStack)
    where
        F: FnOnce() -> R,
    {
        let mut restore = RestoreStack {
            previous: Some(STACK.with(|current| current.replace(stack))),
        };
        let result = f();
        let installed = restore.restore();
        (result, installed)
    }
}

/// Pops its frame on drop, so every exit path out of a tracked evaluation
/// leaves the stack as it found it.
struct FrameGuard {
    depth: usize,
    active: bool,
}

impl FrameGuard {
    fn push() -> Result<Self, Error> {
        let depth = STACK.with(|stack| stack.borrow_mut().push())?;
        Ok(Self {
            depth,
            active: true,
        })
    }

    fn finish(mut self) -> ReadSet {
        self.active = false;
        STACK.with(|stack| stack.borrow_mut().pop(self.depth))
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        // A second panic while unwinding would abort, so a corrupted stack is
        // only reported on the normal path.
        if std::thread::panicking() {
            let _ = STACK.try_with(|stack| {
                let mut stack = stack.borrow_mut();
                if stack.depth() == self.depth {
                    stack.pop(self.depth);
                }
            });
        } else {
            STACK.with(|stack| {
                stack.borrow_mut().pop(self.depth);
            });
        }
    }
}

/// Leaves an evaluation counted by [`Runtime::enter_evaluation`].
pub(crate) struct EvaluationGuard;

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        let _ = STACK.try_with(|stack| stack.borrow_mut().exit_evaluation());
    }
}

struct RestoreStack {
    previous: Option<TrackingStack>,
}

impl RestoreStack {
    fn restore(&mut self) -> TrackingStack {
        let previous = self.previous.take().unwrap_or_default();
        STACK.with(|current| current.replace(previous))
    }
}

impl Drop for RestoreStack {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let _ = STACK.try_with(|current| current.replace(previous));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::reactive::node::{NodeId, Revision, Source};
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::rc::Rc;

    struct Fixed(NodeId);

    impl Source for Fixed {
        fn id(&self) -> NodeId {
            self.0
        }

        fn refresh(&self) -> Result<Revision> {
            Ok(Revision::INITIAL)
        }
    }

    fn read(id: NodeId) {
        Runtime::register_read(Dependency::new(Rc::new(Fixed(id)), Revision::INITIAL));
    }

    #[test]
    fn run_tracked_collects_reads() {
        let a = NodeId::new();
        let b = NodeId::new();

        let (value, reads) = Runtime::run_tracked(|| -> Result<i32> {
            assert_eq!(Runtime::depth(), 1);
            read(a);
            read(b);
            Ok(7)
        })
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(reads.ids().collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(Runtime::depth(), 0);
    }

    #[test]
    fn nested_frames_are_isolated() {
        let outer = NodeId::new();
        let inner = NodeId::new();

        let ((inner_reads, depth_inside), outer_reads) = Runtime::run_tracked(|| -> Result<_> {
            read(outer);
            let (depth, reads) = Runtime::run_tracked(|| -> Result<usize> {
                read(inner);
                Ok(Runtime::depth())
            })?;
            Ok((reads, depth))
        })
        .unwrap();

        assert_eq!(depth_inside, 2);
        assert!(inner_reads.contains(inner));
        assert!(!inner_reads.contains(outer));
        assert!(outer_reads.contains(outer));
        assert!(!outer_reads.contains(inner));
    }

    #[test]
    fn untracked_reads_are_ignored() {
        assert!(!Runtime::is_tracking());
        read(NodeId::new());
        assert_eq!(Runtime::depth(), 0);
    }

    #[test]
    fn frame_is_popped_on_error() {
        let result = Runtime::run_tracked(|| -> Result<()> {
            read(NodeId::new());
            Err(Error::failed("nope"))
        });

        assert!(result.unwrap_err().is_computation_failure());
        assert_eq!(Runtime::depth(), 0);
    }

    #[test]
    fn frame_is_popped_on_panic() {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _ = Runtime::run_tracked(|| -> Result<()> { panic!("derivation exploded") });
        }));

        assert!(outcome.is_err());
        assert_eq!(Runtime::depth(), 0);
    }

    #[test]
    fn depth_limit_is_enforced() {
        let stack = TrackingStack::with_config(RuntimeConfig::default().with_max_depth(1));

        let (result, stack) = Runtime::with_stack(stack, || {
            Runtime::run_tracked(|| -> Result<()> {
                Runtime::run_tracked(|| -> Result<()> { Ok(()) })?;
                Ok(())
            })
        });

        assert!(matches!(result, Err(Error::DepthExceeded { limit: 1 })));
        assert_eq!(stack.depth(), 0);
        assert_eq!(Runtime::config(), RuntimeConfig::default());
    }

    #[test]
    fn with_stack_hides_outer_frames() {
        let (_, reads) = Runtime::run_tracked(|| -> Result<()> {
            let (depth, _) = Runtime::with_stack(TrackingStack::new(), Runtime::depth);
            assert_eq!(depth, 0);
            read(NodeId::new());
            Ok(())
        })
        .unwrap();

        assert_eq!(reads.len(), 1);
    }

    #[test]
    fn configure_updates_thread_config() {
        let original = Runtime::config();
        Runtime::configure(RuntimeConfig::default().with_max_depth(9));
        assert_eq!(Runtime::config().max_depth, 9);
        Runtime::configure(original);
    }
}
