//! # 数据模型
//!
//! 定义任务调度引擎的核心数据结构：任务、运行状态、一次性运行策略、任务存储和工作队列项。
//!
//! ## 核心模型
//!
//! ### Task - 任务定义
//! 持久化的 cron 调度单元，对应 `tasks` 表的一行。锁字段和计数器只由引擎修改，
//! 操作员只能编辑类型、表达式、参数、优先级、启用状态和一次性运行策略。
//!
//! ### TaskStatus - 运行结果
//! 固定且完备的状态集合，`times_failed` 的计数规则由 [`TaskStatus::is_failure`] 决定。
//!
//! ### CompletionPlan - 完成计划
//! 一次运行结束之后的纯计算结果：计数器、下次执行时间以及 `RunOnce` 处置。
//!
//! ### QueueItem - 工作队列项
//! 处理器用来把大批量工作拆分到多次调度调用中的辅助队列。
//!
//! ## 状态流转
//!
//! ```text
//! INITIAL_SCHEDULE → RUNNING → OK / WILL_RESUME / EXCEPTION / TIMEOUT / ...
//!                       ↑                 │
//!                       └─────────────────┘  (下一次调度调用重新认领)
//! ```
//!
//! ## 数据库映射
//!
//! - `params` 与 `storage` 以JSON文本存储
//! - `last_exit_code` 和 `run_once` 以大写名称存储
//! - 所有时间字段使用 `DateTime<Utc>`

pub mod completion;
pub mod queue_item;
pub mod run_once;
pub mod storage;
pub mod task;
pub mod task_status;

pub use completion::*;
pub use queue_item::*;
pub use run_once::*;
pub use storage::*;
pub use task::*;
pub use task_status::*;
