//! Engine error taxonomy.
//!
//! Only conditions that escape their originating layer appear here. Control
//! transfers (local/non-local returns, process switches) and recoverable
//! representation mismatches are handled internally and never surface as
//! `VmError`.

use thiserror::Error;

/// An error surfaced by the execution engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// Indexed access outside an object's bounds. Reported to the caller,
    /// never clamped.
    #[error("index {index} is out of bounds for size {size}")]
    IndexOutOfBounds {
        /// The offending zero-based index
        index: usize,
        /// The object's current size
        size: usize,
    },

    /// A message was not understood and no `doesNotUnderstand:` handler
    /// exists anywhere in the receiver's hierarchy.
    #[error("message {selector:?} not understood by an instance of {class}")]
    DoesNotUnderstand {
        /// Spelling of the unhandled selector
        selector: String,
        /// Name of the receiver's class
        class: String,
    },

    /// A non-local return targeted a home context that was already
    /// terminated or is no longer reachable from the running stack.
    #[error("block cannot return: home context is dead")]
    BlockCannotReturn,

    /// The scheduler was asked for a runnable process and every ready list
    /// was empty. Fatal; the VM has no recovery path.
    #[error("scheduler could not find a runnable process")]
    NoRunnableProcess,

    /// An attempt to rewrite state of a context that is live on the native
    /// stack in a way the activation model cannot honor.
    #[error("cannot modify {field} of a context that is live on the stack")]
    InvalidContextMutation {
        /// The rejected field
        field: &'static str,
    },

    /// An object handle whose referent has been collected.
    #[error("stale object handle")]
    StaleHandle,

    /// A send or activation with the wrong number of arguments.
    #[error("wrong number of arguments: expected {expected}, got {actual}")]
    WrongArgumentCount {
        /// Arguments the code object declares
        expected: usize,
        /// Arguments actually supplied
        actual: usize,
    },

    /// An internal invariant did not hold. Indicates an engine bug, not a
    /// guest error.
    #[error("invariant violated: {0}")]
    Invariant(&'static str),
}
