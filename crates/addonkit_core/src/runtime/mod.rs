//! Work that outlives a single native call.
//!
//! # Responsibility
//! - `async_work`: run CPU-bound tasks off the JS thread and settle a
//!   promise with the result.
//! - `threadsafe`: let any thread queue calls into a JS function.
//!
//! # Invariants
//! - JS values are only touched on the JS thread; worker threads see plain
//!   Rust data.

pub mod async_work;
pub mod threadsafe;

pub use async_work::{spawn_task, AsyncTask, Task};
pub use threadsafe::ThreadsafeFunction;
