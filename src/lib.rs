// BBO-RX — CRATE ROOT (LIBRARY)
// Kernel-bypass BBO ingest: busy-poll a user-space NIC queue, parse BBO
// datagrams with zero allocation, publish to a cross-process SPSC ring.
//
// Module hierarchy:
//   engine/    — TSC clock, branch/prefetch hints, slot pool
//   protocol/  — Wire headers (Ethernet/IPv4/UDP), BBO record
//   nic/       — Kernel-bypass substrate: RxPort contract, AF_XDP engine,
//                sim port, raw frame builder
//   rx/        — BBO payload parser, burst receive engine
//   shm/       — Shared-memory SPSC ring + publisher
//
// main.rs (binary crate) owns CLI parsing, privilege setup and signals.

pub mod engine;
pub mod protocol;
pub mod nic;
pub mod rx;
pub mod shm;
