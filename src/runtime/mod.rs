//! Runtime backends
//!
//! Only the CPU backend exists; workers are host threads and working memory is host
//! memory bounded by the partition plan's budget.

pub mod cpu;
