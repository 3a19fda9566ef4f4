#[path = "../fixtures/mod.rs"]
mod fixtures;

mod t10_initial_election;
mod t11_leader_failover;
mod t12_leadership_transfer;
