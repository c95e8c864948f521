//! Cooperative shutdown coordination shared by the daemon's scheduler and
//! executor coroutines.

pub mod shutdown;
