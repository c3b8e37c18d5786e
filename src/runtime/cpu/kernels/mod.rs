//! CPU kernel implementations
//!
//! Low-level compute kernels for batch-norm statistics. Kernels operate on slices in
//! working precision (`W: WorkingFloat`) and are usable on their own, outside the
//! engine that sequences them.

pub mod binary_tree;
pub mod normalize;
pub mod rsqrt;
pub mod running;
pub mod sum_reduce;
pub mod welford;

pub use binary_tree::{floor_pow2, tree_fold_in_place, tree_reduce, tree_sum};
pub use normalize::{ChannelAffine, normalize_outer_rows, normalize_row};
pub use rsqrt::{RSQRT_FLOOR, rsqrt, rsqrt_into};
pub use running::RunningStatsUpdater;
pub use sum_reduce::{tree_mean, two_pass_row, two_pass_tile};
pub use welford::{WelfordLanes, WelfordPartial, WelfordState};
