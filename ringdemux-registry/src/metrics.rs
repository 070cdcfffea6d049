//! Registry metrics.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "ringdemux/registry/created",
    description = "Total connections registered"
)]
pub static CONNECTIONS_CREATED: Counter = Counter::new();

#[metric(
    name = "ringdemux/registry/deleted",
    description = "Total connections removed from the registry"
)]
pub static CONNECTIONS_DELETED: Counter = Counter::new();

#[metric(
    name = "ringdemux/registry/rejected",
    description = "Create calls rejected (duplicate key or limit reached)"
)]
pub static CONNECTIONS_REJECTED: Counter = Counter::new();

#[metric(
    name = "ringdemux/registry/active",
    description = "Currently registered connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();
