//! End-to-end scenarios for the checkpoint engine.

mod harness;
