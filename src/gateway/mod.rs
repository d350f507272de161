//! Route compilation and gateway request dispatch.

pub mod compiler;
pub mod dispatch;

pub use compiler::RouteCache;
