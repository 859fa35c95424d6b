//! ledgersync: keeps an off-chain mirror of a binary prediction-market
//! contract in step with the chain, computes claimable payouts from it, and
//! drives user actions through simulate → submit → confirm → resync.
//!
//! Shared by the `ledgersync` daemon and the `resync` CLI.

pub mod actions;
pub mod api;
pub mod chain;
pub mod config;
pub mod mirror;
pub mod reconcile;
pub mod rewards;
pub mod runtime;
pub mod settlement;
pub mod sync;
