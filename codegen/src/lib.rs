//! MOSA code generation library.
//!
//! An ahead-of-time compiler back-end translating managed CIL-style
//! bytecode into native sections for bare-metal targets. The front door
//! is [`Compiler`]: it consumes a parsed [`typesys::TypeSystem`], drives
//! the per-method stage pipeline across a worker pool, and feeds the
//! [`linker::ObjectLinker`] that lays the final image out.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub use crate::compiler::{CompiledMethod, Compiler, MethodCompiler, Stage};
pub use crate::result::{CodegenError, CodegenResult};

pub mod binemit;
pub mod cil;
pub mod counters;
pub mod cursor;
pub mod dominator_tree;
pub mod flowgraph;
pub mod ir;
pub mod isa;
pub mod linker;
pub mod multiboot;
pub mod settings;
pub mod stages;
pub mod trace;
pub mod type_layout;
pub mod typesys;

mod compiler;
mod result;
mod scoped_hash_map;
#[cfg(test)]
pub(crate) mod testutil;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
