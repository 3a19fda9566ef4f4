mod quorum_set;
mod quorum_set_impl;
mod util;

#[cfg(test)] mod util_test;

pub use quorum_set::QuorumSet;
pub use util::majority_of;
