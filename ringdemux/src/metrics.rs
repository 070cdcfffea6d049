//! Multiplexer metrics, process-wide across all instances.

use metriken::{Counter, Gauge, metric};

#[metric(
    name = "ringdemux/mux/sockets",
    description = "UDP sockets currently bound by open multiplexers"
)]
pub static SOCKETS_OPEN: Gauge = Gauge::new();

#[metric(
    name = "ringdemux/mux/datagrams/received",
    description = "Datagrams delivered by receive"
)]
pub static DATAGRAMS_RECEIVED: Counter = Counter::new();

#[metric(
    name = "ringdemux/mux/datagrams/sent",
    description = "Datagrams fully written by send"
)]
pub static DATAGRAMS_SENT: Counter = Counter::new();

#[metric(
    name = "ringdemux/mux/bytes/received",
    description = "Payload bytes delivered by receive"
)]
pub static BYTES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "ringdemux/mux/bytes/sent",
    description = "Payload bytes written by send"
)]
pub static BYTES_SENT: Counter = Counter::new();

#[metric(
    name = "ringdemux/mux/datagrams/truncated",
    description = "Datagrams longer than the receive buffer"
)]
pub static DATAGRAMS_TRUNCATED: Counter = Counter::new();

#[metric(
    name = "ringdemux/mux/short_writes",
    description = "Sends the kernel accepted only partially"
)]
pub static SHORT_WRITES: Counter = Counter::new();

#[metric(
    name = "ringdemux/mux/recv_errors",
    description = "recvmsg completions that failed"
)]
pub static RECV_ERRORS: Counter = Counter::new();
