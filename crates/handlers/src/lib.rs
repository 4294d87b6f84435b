//! # scheduler-handlers
//!
//! 内置任务处理器：日志轮转和分批文件清理，通过 [`BuiltinHandlers`] 提供给注册表。

pub mod builtin;
pub mod file_cleanup;
pub mod log_rotate;

pub use builtin::BuiltinHandlers;
pub use file_cleanup::{FileCleanupHandler, FILE_CLEANUP_TYPE};
pub use log_rotate::{LogRotateHandler, LOG_ROTATE_TYPE};
