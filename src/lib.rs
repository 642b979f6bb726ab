//! Waits for a removable volume to be attached, then mirrors a source tree onto it.

pub mod backup;
pub mod utils;
pub mod volume;
