//! Compiler options.
//!
//! A plain struct passed to the compiler by the launcher. Every
//! optimization stage can be toggled independently; the defaults match the
//! shipped configuration.

/// Shared compiler settings.
#[derive(Clone, Debug)]
pub struct Options {
    /// Fold constant expressions.
    pub enable_constant_folding: bool,
    /// Sparse conditional constant propagation.
    pub enable_sccp: bool,
    /// Global value numbering.
    pub enable_value_numbering: bool,
    /// Dead-code elimination.
    pub enable_dce: bool,
    /// Inline small eligible callees during decode.
    pub enable_inlining: bool,
    /// Maximum callee instruction count considered for inlining.
    pub inline_threshold: usize,
    /// Run the optimization pack a second time.
    pub two_pass_optimizations: bool,
    /// Abort the whole build on the first per-method failure.
    pub stop_on_error: bool,
    /// Number of worker threads; 0 picks the parallelism the host reports.
    pub threads: usize,
    /// Stages whose dumps the trace retains; empty retains nothing.
    pub trace_stages: Vec<String>,
    /// Image base address used by the linker.
    pub base_address: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            enable_constant_folding: true,
            enable_sccp: true,
            enable_value_numbering: true,
            enable_dce: true,
            enable_inlining: true,
            inline_threshold: 16,
            two_pass_optimizations: false,
            stop_on_error: false,
            threads: 0,
            trace_stages: Vec::new(),
            base_address: 0x0040_0000,
        }
    }
}

impl Options {
    /// A configuration with every optional optimization disabled, used by
    /// tests that want to look at raw decoder output.
    pub fn no_opt() -> Self {
        Self {
            enable_constant_folding: false,
            enable_sccp: false,
            enable_value_numbering: false,
            enable_dce: false,
            enable_inlining: false,
            ..Self::default()
        }
    }
}
