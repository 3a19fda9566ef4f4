#[path = "../fixtures/mod.rs"]
mod fixtures;

mod t10_grow_cluster;
mod t11_change_on_follower;
mod t12_concurrent_write_and_change_membership;
