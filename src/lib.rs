//! Outbound technical-recruiting automation: sourcing, verification, and
//! scripted outreach for a job requisition, plus the live signal-driven
//! ranking and candidate-profile views built on top of it.
//!
//! This crate is the core: matching, the pre-resume FSM, scoring, signal
//! ingestion, the outbound dispatcher, and the HTTP orchestrator that ties
//! them together behind a storage-agnostic [`repository::Repository`].
//! Concrete channel/LLM/interview adapters are injected by the binary that
//! composes this crate; see [`providers`].

pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod fsm;
pub mod matching;
pub mod orchestrator;
pub mod profile;
pub mod providers;
pub mod repository;
pub mod scoring;
pub mod signals;
