pub mod memory_ledger;
pub mod mock_engine;
pub mod recording_agent;
