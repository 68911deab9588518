//! The result field of a native event.

/// The result of a native event: either not produced yet or produced once.
///
/// Every native event record starts with its result `Pending`. The first
/// party to perform the memory operation (a handler emulating it, or the
/// engine calling the genuine primitive) completes it; after that the value
/// is frozen for the rest of the dispatch.
///
/// A handler that observes [`Outcome::Done`] must treat the operation as
/// already performed and refrain from side effects.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome<T> {
    /// No result has been produced yet.
    #[default]
    Pending,
    /// The operation was performed and returned this value.
    Done(T),
}

impl<T: Copy> Outcome<T> {
    /// Whether a result has been produced.
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    /// Whether the result is still missing.
    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    /// The produced value, if any.
    pub fn get(&self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(*value),
            Outcome::Pending => None,
        }
    }

    /// Store `value` if the outcome is still pending.
    ///
    /// Returns `false` and leaves the stored value untouched when a result
    /// was already produced.
    pub fn complete(&mut self, value: T) -> bool {
        match self {
            Outcome::Pending => {
                *self = Outcome::Done(value);
                true
            }
            Outcome::Done(_) => false,
        }
    }

    /// Produce the value with `f` only if the outcome is still pending.
    ///
    /// `f` is not called at all once a result exists, which is how the
    /// genuine operation is guaranteed to run at most once.
    pub fn complete_with(&mut self, f: impl FnOnce() -> T) -> bool {
        if self.is_done() {
            return false;
        }
        *self = Outcome::Done(f());
        true
    }
}
