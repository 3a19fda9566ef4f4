#[path = "../fixtures/mod.rs"]
mod fixtures;

mod t10_singleton_commit;
mod t11_replicate_to_followers;
mod t12_follower_rejoins_after_partition;
