//! # Language model
//!
//! Types shared by every compiler stage: value types, the symbol tree,
//! diagnostics and compile flags.

pub mod data_type;
pub mod diagnostic;
pub mod flags;
pub mod symbol;

pub use data_type::{DataType, DataTypeValue};
pub use diagnostic::{AlertLevel, Diagnostic, Diagnostics, ErrorCode};
pub use flags::CompileFlags;
pub use symbol::{Symbol, SymbolId, SymbolKind, SymbolTable};
