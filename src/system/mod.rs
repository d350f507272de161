//! System-level primitives shared by the daemon's concurrency model.

mod locker;

pub use locker::{Locker, LockerGuard};
