//! # scheduler-runner
//!
//! 调度执行层：处理器注册表、带执行预算的调度循环以及按标识划分的工作队列。

pub mod registry;
pub mod runner;
pub mod work_queue;

#[cfg(test)]
pub mod test_utils;

pub use registry::{CallbackRegistry, HandlerInfo};
pub use runner::{Execution, RunSummary, Runner};
pub use work_queue::WorkQueue;
