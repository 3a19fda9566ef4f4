#[path = "../fixtures/mod.rs"]
mod fixtures;

mod t10_linearizable_read;
mod t11_read_policies;
