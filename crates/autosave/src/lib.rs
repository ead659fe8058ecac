//! `formsync-autosave` — debounced persistence of changing form state.
//!
//! A [`DebounceScheduler`] watches a value and calls a save callback with the
//! latest value once changes pause for the configured delay. At most one
//! window is pending at a time; the save itself runs detached on the smol
//! executor and cannot be cancelled once started.

pub mod scheduler;
pub mod status;

pub use scheduler::{DebounceScheduler, SaveResult, SchedulerOptions, DEFAULT_DELAY};
pub use status::SaveStatus;
