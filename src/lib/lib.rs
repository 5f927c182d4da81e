//! TEE-coordinated confidential multi-party contract calls.
//!
//! Several parties each supply part of a contract function's arguments. The
//! orchestrator collects them under a target digest, fetches the contract's
//! sealed storage through an off-chain agent, executes the call inside the
//! TEE and writes the re-sealed result back to the ledger as a signed
//! `set_states` transaction bound to the policy and state snapshot it used.
//!
//! Layout follows ports and adapters: `ports` are the external collaborators
//! (ledger, execution engine, agent channel), `adapters` are the in-process
//! implementations used by tests and the demo binary.

pub mod adapters;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod orchestrator;
pub mod ports;
pub mod registry;
pub mod tee;
