// Consolidated integration test suite, compiled by `tests/tests.rs`.
mod checkpoints;
mod memory;
mod protocol;
mod sessions;
mod snapshots;
