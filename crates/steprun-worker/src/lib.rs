// Agent runtime worker
//
// Hosts the expiry sweeper: on a fixed interval it asks the coordinator to
// drop operations that outlived their TTL or went inactive, together with
// their event streams.

pub mod sweeper;

pub use sweeper::{run_sweeper, sweep_once};
