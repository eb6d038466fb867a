//! # SegKV
//!
//! A log-structured key-value storage engine with:
//! - Append-only segment files with an in-memory offset index each
//! - Size-based segment rotation
//! - Background compaction that never blocks foreground traffic
//! - Crash recovery that truncates torn tails
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │          set / get / delete        (Single Writer)          │
//! └─────────────────────┬──────────────────────┬────────────────┘
//!                       │                      │ Trigger (channel)
//!                       ▼                      ▼
//! ┌─────────────────────────────────┐  ┌────────────────────────┐
//! │           SegmentSet            │◄─│   Compaction Worker    │
//! │   snapshot: RwLock<Arc<...>>    │  │  merge CLOSED runs,    │
//! └─────┬─────────┬─────────┬───────┘  │  commit by swap        │
//!       │         │         │          └────────────────────────┘
//!       ▼         ▼         ▼
//!  ┌────────┐┌────────┐┌────────┐
//!  │ CLOSED ││ CLOSED ││ ACTIVE │   newest ──► oldest on reads
//!  │ 1..=4  ││   5    ││   6    │
//!  └────────┘└────────┘└────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod segment;
pub mod compaction;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, SegKvError};
pub use config::{Config, SyncStrategy};
pub use engine::{Engine, EngineStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SegKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
