//! In-memory fakes for the external capability traits (`DbCapability`,
//! `LlmClient`), used by unit and integration tests in place of a real
//! driver or provider.

pub mod fake_db;
pub mod fake_llm;
