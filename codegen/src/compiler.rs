//! The per-method compiler and its stage pipeline.
//!
//! A `MethodCompiler` owns everything one method needs: the IR function,
//! counters, and references to the shared services. The pipeline is a
//! plain list of boxed stages run in order; a failing stage is fatal for
//! the method and the driver short-circuits.

use crate::binemit::RelocRecord;
use crate::counters::{Counters, GlobalCounters};
use crate::ir::{Function, SymbolName};
use crate::isa::TargetIsa;
use crate::result::CodegenResult;
use crate::settings::Options;
use crate::stages;
use crate::trace::Trace;
use crate::type_layout::TypeLayout;
use crate::typesys::{MethodRef, TypeSystem};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One method's compilation state, threaded through the stages.
pub struct MethodCompiler<'a> {
    /// The method being compiled.
    pub method: MethodRef,
    /// The IR under construction and transformation.
    pub func: Function,
    /// Shared type system (read-only).
    pub type_system: &'a TypeSystem,
    /// Shared layout engine.
    pub type_layout: &'a TypeLayout,
    /// The platform back-end.
    pub isa: &'a dyn TargetIsa,
    /// Compiler options.
    pub options: &'a Options,
    /// Per-method counters, merged globally at method end.
    pub counters: Counters,
    /// Emission result, filled by the final stage.
    pub emitted: Option<(Vec<u8>, Vec<RelocRecord>)>,
}

/// A pipeline stage.
///
/// Stages may mutate any part of the IR graph but must leave it well
/// formed before `finish` returns.
pub trait Stage {
    /// Stage name, used for trace keys and error events.
    fn name(&self) -> &'static str;

    /// Pre-run hook.
    fn initialize(&mut self, _compiler: &mut MethodCompiler) -> CodegenResult<()> {
        Ok(())
    }

    /// The transformation itself.
    fn run(&mut self, compiler: &mut MethodCompiler) -> CodegenResult<()>;

    /// Post-run hook.
    fn finish(&mut self, _compiler: &mut MethodCompiler) -> CodegenResult<()> {
        Ok(())
    }
}

/// The finished artifact of one method.
pub struct CompiledMethod {
    /// Linker symbol.
    pub name: SymbolName,
    /// Encoded bytes.
    pub code: Vec<u8>,
    /// Relocation requests against the code.
    pub relocs: Vec<RelocRecord>,
    /// Frame size, for the debug map.
    pub frame_size: u32,
    /// The method's counters.
    pub counters: Counters,
}

impl<'a> MethodCompiler<'a> {
    /// Create the compiler for `method`.
    pub fn new(
        method: MethodRef,
        type_system: &'a TypeSystem,
        type_layout: &'a TypeLayout,
        isa: &'a dyn TargetIsa,
        options: &'a Options,
    ) -> Self {
        let name = SymbolName::new(type_system.symbol_name(method));
        Self {
            method,
            func: Function::new(name),
            type_system,
            type_layout,
            isa,
            options,
            counters: Counters::new(),
            emitted: None,
        }
    }

    /// The canonical stage pipeline for the current options.
    fn pipeline(&self) -> Vec<Box<dyn Stage>> {
        let opts = self.options;
        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(stages::decode::DecodeStage),
            Box::new(stages::protected_regions::ProtectedRegionsStage),
            Box::new(stages::ssa_construction::SsaConstructionStage),
        ];
        let passes = if opts.two_pass_optimizations { 2 } else { 1 };
        for _ in 0..passes {
            if opts.enable_constant_folding {
                stages.push(Box::new(stages::constant_fold::ConstantFoldStage));
            }
            if opts.enable_sccp {
                stages.push(Box::new(stages::sccp::SccpStage));
            }
            if opts.enable_value_numbering {
                stages.push(Box::new(stages::gvn::GvnStage));
            }
            if opts.enable_dce {
                stages.push(Box::new(stages::dce::DceStage));
            }
        }
        if self.isa.ptr_size() == 4 {
            stages.push(Box::new(stages::lower64::Lower64Stage));
        }
        stages.push(Box::new(stages::leave_ssa::LeaveSsaStage));
        stages.push(Box::new(stages::lowering::LoweringStage));
        stages.push(Box::new(stages::tweak::TweakStage));
        stages.push(Box::new(stages::fixed_regs::FixedRegistersStage));
        stages.push(Box::new(stages::regalloc::RegAllocStage));
        stages.push(Box::new(stages::stack_layout::StackLayoutStage));
        stages.push(Box::new(stages::emit::EmitStage));
        stages
    }

    /// Run the pipeline to completion.
    ///
    /// In-flight work completes the current stage before honoring
    /// `cancel`; a cancelled method reports no artifact and no error.
    pub fn compile(
        mut self,
        trace: &Trace,
        cancel: &AtomicBool,
    ) -> CodegenResult<Option<CompiledMethod>> {
        let name = self.func.name.clone();
        for mut stage in self.pipeline() {
            if cancel.load(Ordering::Relaxed) {
                return Ok(None);
            }
            let result = stage
                .initialize(&mut self)
                .and_then(|()| stage.run(&mut self))
                .and_then(|()| stage.finish(&mut self));
            if let Err(err) = result {
                trace.error(name.as_str(), stage.name(), &err.to_string());
                return Err(err);
            }
            let live = self.live_inst_count();
            self.counters
                .update(format!("{}.instructions", stage.name()), live);
            trace.publish(name.as_str(), stage.name(), self.func.display());
        }
        let (code, relocs) = self.emitted.take().expect("emission stage ran");
        Ok(Some(CompiledMethod {
            name,
            code,
            relocs,
            frame_size: self.func.frame_size,
            counters: self.counters,
        }))
    }

    fn live_inst_count(&self) -> u64 {
        let mut count = 0;
        for block in self.func.layout.blocks() {
            for inst in self.func.layout.block_insts(block) {
                if !self.func.dfg.insts[inst].is_empty_node() {
                    count += 1;
                }
            }
        }
        count
    }
}

/// The whole-assembly driver: a pool of workers draws methods from a
/// queue, per-method state stays thread-local, and the shared layout
/// engine and linker absorb the results. All methods finish before the
/// linker lays the image out.
pub struct Compiler {
    type_system: Arc<TypeSystem>,
    type_layout: Arc<TypeLayout>,
    isa: Box<dyn TargetIsa>,
    options: Options,
    trace: Trace,
    counters: GlobalCounters,
    cancel: AtomicBool,
}

/// Runtime helpers the generated code may call; the boot packager links
/// their real addresses.
const RUNTIME_HELPERS: &[&str] = &[
    "mosa_rt_memcpy",
    "mosa_rt_allocate",
    "mosa_rt_get_exception",
    "mosa_rt_sdiv32",
    "mosa_rt_udiv32",
    "mosa_rt_srem32",
    "mosa_rt_urem32",
    "mosa_rt_sdiv64",
    "mosa_rt_udiv64",
    "mosa_rt_srem64",
    "mosa_rt_urem64",
    "mosa_rt_shl64",
    "mosa_rt_shr64",
    "mosa_rt_sar64",
    "mosa_rt_l2d",
    "mosa_rt_i2r4",
    "mosa_rt_r42i",
    "mosa_rt_addr4",
    "mosa_rt_subr4",
    "mosa_rt_mulr4",
    "mosa_rt_divr4",
    "mosa_rt_feq4",
    "mosa_rt_flt4",
    "mosa_rt_fle4",
];

impl Compiler {
    /// Create a compiler for the given target triple.
    pub fn new(
        type_system: Arc<TypeSystem>,
        triple: &target_lexicon::Triple,
        options: Options,
    ) -> CodegenResult<Self> {
        let isa = crate::isa::lookup(triple)?;
        let type_layout = Arc::new(TypeLayout::new(
            type_system.clone(),
            isa.ptr_size(),
            isa.ptr_align(),
        ));
        let trace = Trace::new(crate::trace::TraceFilter::stages(
            options.trace_stages.iter().cloned(),
        ));
        Ok(Self {
            type_system,
            type_layout,
            isa,
            options,
            trace,
            counters: GlobalCounters::new(),
            cancel: AtomicBool::new(false),
        })
    }

    /// The shared layout engine.
    pub fn type_layout(&self) -> &TypeLayout {
        &self.type_layout
    }

    /// The trace sink.
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    /// The merged counter registry.
    pub fn counters(&self) -> &GlobalCounters {
        &self.counters
    }

    /// Ask the build to stop: queued methods are abandoned, in-flight
    /// stage runs complete first.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Methods eligible for compilation: concrete bodies, no open
    /// generics.
    fn work_list(&self) -> Vec<MethodRef> {
        let ts = &self.type_system;
        let mut work = Vec::new();
        for t in ts.all_types() {
            let td = ts.ty(t);
            if td.generic_params > 0 {
                continue;
            }
            for &m in &td.methods {
                let md = ts.method(m);
                if md.body.is_some() && md.generic_params == 0 {
                    work.push(m);
                }
            }
        }
        work
    }

    /// Compile every eligible method into `linker`. Per-method failures
    /// are collected and do not abort the queue unless
    /// `Options::stop_on_error` is set; the caller runs
    /// `ObjectLinker::finalize` afterwards.
    pub fn compile_all(
        &self,
        linker: &crate::linker::ObjectLinker,
    ) -> Vec<(MethodRef, crate::result::CodegenError)> {
        for helper in RUNTIME_HELPERS {
            linker.declare_external(helper, 0);
        }
        // Static field storage.
        let ts = &self.type_system;
        for t in ts.all_types() {
            let td = ts.ty(t);
            for &f in &td.fields {
                let fd = ts.field(f);
                if fd.is_static {
                    let size = self.type_layout.field_type_size(fd.ty).max(1);
                    let name = format!("{}::{}", td.name, fd.name);
                    linker.allocate(&name, crate::linker::SectionKind::Bss, size, size.min(8));
                }
            }
        }

        let queue = std::sync::Mutex::new(std::collections::VecDeque::from(self.work_list()));
        let errors = std::sync::Mutex::new(Vec::new());
        let threads = if self.options.threads > 0 {
            self.options.threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };

        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| loop {
                    if self.cancel.load(Ordering::Relaxed) {
                        break;
                    }
                    let method = match queue.lock().unwrap().pop_front() {
                        Some(method) => method,
                        None => break,
                    };
                    let mc = MethodCompiler::new(
                        method,
                        &self.type_system,
                        &self.type_layout,
                        &*self.isa,
                        &self.options,
                    );
                    match mc.compile(&self.trace, &self.cancel) {
                        Ok(Some(compiled)) => {
                            self.counters.merge(&compiled.counters);
                            let name = compiled.name.as_str();
                            linker.allocate(
                                name,
                                crate::linker::SectionKind::Text,
                                compiled.code.len() as u32,
                                16,
                            );
                            linker.write(name, 0, &compiled.code);
                            for reloc in &compiled.relocs {
                                linker.link(
                                    reloc.kind,
                                    name,
                                    reloc.offset,
                                    reloc.name.as_str(),
                                    reloc.addend,
                                );
                            }
                        }
                        Ok(None) => {}
                        Err(err) => {
                            errors.lock().unwrap().push((method, err));
                            if self.options.stop_on_error {
                                self.cancel();
                            }
                        }
                    }
                });
            }
        });
        errors.into_inner().unwrap()
    }
}
