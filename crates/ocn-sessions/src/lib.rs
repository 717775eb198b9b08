//! Session Manager (spec §4.3): the per-`(device_id, session_id)` state
//! machine, sequence discipline, and inbound audio reassembly that sits
//! between the southbound adapter and the orchestrator's turn logic.

pub mod audio_buffer;
pub mod manager;
pub mod state_machine;

pub use audio_buffer::AudioBuffer;
pub use manager::{InboundOutcome, SequenceVerdict, SessionManager};
pub use state_machine::{transition, SideEffect, Trigger};
