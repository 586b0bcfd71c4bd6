//! # Tierstack I/O
//!
//! Persistence around the core model: raw LEF/DEF parse trees and their
//! conversion passes, the parser boundary with a JSON backend, the tier map
//! and partition side tables, flow configuration and the file-level flow
//! steps.

pub mod config;
pub mod export;
pub mod flow;
pub mod format;
pub mod import;
pub mod keyword;
pub mod raw;
pub mod tables;

pub use config::FlowConfig;
pub use export::{export_design, export_technology};
pub use format::{FormatError, JsonFormat, LayoutFormat};
pub use import::{import_design, import_technology};
pub use raw::{RawDesignTree, RawTechTree};
pub use tables::TierTable;
