//! The instruction table.
//!
//! Every instruction node references a descriptor in a single flat catalog
//! spanning the generic IR and each platform instruction set. Descriptors
//! are `const` data: the table is built at compile time and is read-only
//! process-wide state, so no init step is needed at startup.
//!
//! The descriptor records the default arity, flow-control kind, CPU-flag
//! effects, and memory-access class of each opcode. Encoders are not stored
//! here; each platform's emitter dispatches on the opcode directly.

use core::fmt;

/// How control continues after an instruction.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FlowControl {
    /// Falls through to the next node.
    Normal,
    /// Unconditional transfer to the node's target block.
    Branch,
    /// Transfer to the target block when the condition holds, else fall
    /// through to the next node in the terminator group.
    ConditionalBranch,
    /// Multi-way transfer indexed by the operand.
    Switch,
    /// Leaves the method.
    Return,
}

/// Memory access class of an opcode.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemAccess {
    /// Does not touch memory.
    None,
    /// Reads memory.
    Read,
    /// Writes memory.
    Write,
}

/// CPU flag bits, for the `flags_read`/`flags_written` descriptor fields.
pub mod flags {
    /// Zero flag.
    pub const Z: u8 = 1 << 0;
    /// Carry flag.
    pub const C: u8 = 1 << 1;
    /// Sign flag.
    pub const S: u8 = 1 << 2;
    /// Overflow flag.
    pub const O: u8 = 1 << 3;
    /// Parity flag.
    pub const P: u8 = 1 << 4;
    /// All arithmetic flags.
    pub const ALL: u8 = Z | C | S | O | P;
}

/// Static descriptor for one opcode.
pub struct OpDesc {
    /// Lower-case mnemonic used in stage dumps.
    pub name: &'static str,
    /// Default result count.
    pub results: u8,
    /// Default operand count.
    pub operands: u8,
    /// Flow-control kind.
    pub flow: FlowControl,
    /// Flag bits this opcode reads.
    pub flags_read: u8,
    /// Flag bits this opcode modifies.
    pub flags_written: u8,
    /// Memory access class.
    pub mem: MemAccess,
    /// Node shape may deviate from the default arity (calls, phis,
    /// returns, switches). Validated structurally instead.
    pub variadic: bool,
    /// Operands commute; value numbering may canonicalize their order.
    pub commutative: bool,
}

const fn op(name: &'static str, results: u8, operands: u8) -> OpDesc {
    OpDesc {
        name,
        results,
        operands,
        flow: FlowControl::Normal,
        flags_read: 0,
        flags_written: 0,
        mem: MemAccess::None,
        variadic: false,
        commutative: false,
    }
}

impl OpDesc {
    const fn flow(mut self, flow: FlowControl) -> Self {
        self.flow = flow;
        self
    }

    const fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    const fn commutative(mut self) -> Self {
        self.commutative = true;
        self
    }

    const fn mem(mut self, mem: MemAccess) -> Self {
        self.mem = mem;
        self
    }

    const fn flags(mut self, read: u8, written: u8) -> Self {
        self.flags_read = read;
        self.flags_written = written;
        self
    }
}

macro_rules! declare_opcodes {
    ($( $(#[$attr:meta])* $variant:ident => $desc:expr; )+) => {
        /// An opcode identity, indexing the descriptor catalog.
        #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
        #[repr(u16)]
        pub enum Opcode {
            $( $(#[$attr])* $variant, )+
        }

        /// The descriptor catalog, in discriminant order.
        const DESCRIPTORS: &[OpDesc] = &[
            $( $desc, )+
        ];

        impl Opcode {
            /// Number of opcodes in the catalog.
            pub const COUNT: usize = DESCRIPTORS.len();
        }
    };
}

declare_opcodes! {
    // ==================== Generic IR ====================

    /// Empty placeholder left behind when a node is emptied; traversals
    /// skip it.
    Nop => op("nop", 0, 0);
    /// SSA join. Operand count equals the block's predecessor count; the
    /// node's aux block list names each source block.
    Phi => op("phi", 1, 0).variadic();

    /// 32-bit register move.
    Move32 => op("move32", 1, 1);
    /// 64-bit register move.
    Move64 => op("move64", 1, 1);
    /// Single-precision move.
    MoveR4 => op("mover4", 1, 1);
    /// Double-precision move.
    MoveR8 => op("mover8", 1, 1);
    /// Pointer-width move (pointers and object references).
    MoveObject => op("moveobject", 1, 1);
    /// Multi-word copy of a stack-resident value type.
    MoveCompound => op("movecompound", 1, 1).mem(MemAccess::Write);
    /// Load an incoming parameter into a virtual register.
    LoadParam => op("loadparam", 1, 1).mem(MemAccess::Read);
    /// Address of a stack slot.
    AddressOf => op("addressof", 1, 1);

    /// 32-bit integer add.
    Add32 => op("add32", 1, 2).commutative();
    /// 64-bit integer add.
    Add64 => op("add64", 1, 2).commutative();
    /// 32-bit subtract.
    Sub32 => op("sub32", 1, 2);
    /// 64-bit subtract.
    Sub64 => op("sub64", 1, 2);
    /// 32-bit add producing a carry-out result.
    AddCarryOut32 => op("addcarryout32", 2, 2).commutative();
    /// 32-bit add consuming a carry-in operand.
    AddWithCarry32 => op("addwithcarry32", 1, 3);
    /// 32-bit subtract producing a borrow-out result.
    SubCarryOut32 => op("subcarryout32", 2, 2);
    /// 32-bit subtract consuming a borrow-in operand.
    SubWithCarry32 => op("subwithcarry32", 1, 3);
    /// 32-bit multiply, low half.
    MulSigned32 => op("mulsigned32", 1, 2).commutative();
    /// 64-bit multiply, low half.
    MulSigned64 => op("mulsigned64", 1, 2).commutative();
    /// 32-bit unsigned multiply producing the high half as second result.
    MulHighUnsigned32 => op("mulhighunsigned32", 2, 2).commutative();
    /// Signed 32-bit division.
    DivSigned32 => op("divsigned32", 1, 2);
    /// Signed 64-bit division.
    DivSigned64 => op("divsigned64", 1, 2);
    /// Unsigned 32-bit division.
    DivUnsigned32 => op("divunsigned32", 1, 2);
    /// Unsigned 64-bit division.
    DivUnsigned64 => op("divunsigned64", 1, 2);
    /// Signed 32-bit remainder.
    RemSigned32 => op("remsigned32", 1, 2);
    /// Signed 64-bit remainder.
    RemSigned64 => op("remsigned64", 1, 2);
    /// Unsigned 32-bit remainder.
    RemUnsigned32 => op("remunsigned32", 1, 2);
    /// Unsigned 64-bit remainder.
    RemUnsigned64 => op("remunsigned64", 1, 2);
    /// 32-bit bitwise and.
    And32 => op("and32", 1, 2).commutative();
    /// 64-bit bitwise and.
    And64 => op("and64", 1, 2).commutative();
    /// 32-bit bitwise or.
    Or32 => op("or32", 1, 2).commutative();
    /// 64-bit bitwise or.
    Or64 => op("or64", 1, 2).commutative();
    /// 32-bit bitwise xor.
    Xor32 => op("xor32", 1, 2).commutative();
    /// 64-bit bitwise xor.
    Xor64 => op("xor64", 1, 2).commutative();
    /// 32-bit bitwise not.
    Not32 => op("not32", 1, 1);
    /// 64-bit bitwise not.
    Not64 => op("not64", 1, 1);
    /// 32-bit shift left.
    ShiftLeft32 => op("shiftleft32", 1, 2);
    /// 64-bit shift left.
    ShiftLeft64 => op("shiftleft64", 1, 2);
    /// 32-bit logical shift right.
    ShiftRight32 => op("shiftright32", 1, 2);
    /// 64-bit logical shift right.
    ShiftRight64 => op("shiftright64", 1, 2);
    /// 32-bit arithmetic shift right.
    ArithShiftRight32 => op("arithshiftright32", 1, 2);
    /// 64-bit arithmetic shift right.
    ArithShiftRight64 => op("arithshiftright64", 1, 2);

    /// Single-precision add.
    AddR4 => op("addr4", 1, 2).commutative();
    /// Double-precision add.
    AddR8 => op("addr8", 1, 2).commutative();
    /// Single-precision subtract.
    SubR4 => op("subr4", 1, 2);
    /// Double-precision subtract.
    SubR8 => op("subr8", 1, 2);
    /// Single-precision multiply.
    MulR4 => op("mulr4", 1, 2).commutative();
    /// Double-precision multiply.
    MulR8 => op("mulr8", 1, 2).commutative();
    /// Single-precision divide.
    DivR4 => op("divr4", 1, 2);
    /// Double-precision divide.
    DivR8 => op("divr8", 1, 2);

    /// 32-bit integer comparison materializing 0/1; condition in the node.
    CompareInt32 => op("compareint32", 1, 2);
    /// 64-bit integer comparison materializing 0/1.
    CompareInt64 => op("compareint64", 1, 2);
    /// Single-precision comparison materializing 0/1.
    CompareR4 => op("comparer4", 1, 2);
    /// Double-precision comparison materializing 0/1.
    CompareR8 => op("comparer8", 1, 2);
    /// Compare two 32-bit integers and branch on the node's condition.
    CompareIntBranch32 => op("compareintbranch32", 0, 2)
        .flow(FlowControl::ConditionalBranch);
    /// Compare two 64-bit integers and branch on the node's condition.
    CompareIntBranch64 => op("compareintbranch64", 0, 2)
        .flow(FlowControl::ConditionalBranch);

    /// Unconditional jump to the node's target block.
    Jmp => op("jmp", 0, 0).flow(FlowControl::Branch);
    /// Multi-way branch; aux block list holds the case targets, the last
    /// entry being the default.
    Switch => op("switch", 0, 1).flow(FlowControl::Switch).variadic();
    /// Return a value. Variadic: long expansion splits a 64-bit return
    /// value into a low/high pair on 32-bit targets.
    Return => op("return", 0, 1).flow(FlowControl::Return).variadic();
    /// Return without a value.
    ReturnVoid => op("returnvoid", 0, 0).flow(FlowControl::Return);
    /// Call; first operand is the target (symbol or register), the rest are
    /// arguments. Zero or one result.
    Call => op("call", 1, 1).variadic();

    /// Sign-extend the low 8 bits to 32.
    SignExtend8x32 => op("signextend8x32", 1, 1);
    /// Sign-extend the low 16 bits to 32.
    SignExtend16x32 => op("signextend16x32", 1, 1);
    /// Sign-extend 32 bits to 64.
    SignExtend32x64 => op("signextend32x64", 1, 1);
    /// Zero-extend the low 8 bits to 32.
    ZeroExtend8x32 => op("zeroextend8x32", 1, 1);
    /// Zero-extend the low 16 bits to 32.
    ZeroExtend16x32 => op("zeroextend16x32", 1, 1);
    /// Zero-extend 32 bits to 64.
    ZeroExtend32x64 => op("zeroextend32x64", 1, 1);
    /// Discard the high 32 bits of a 64-bit value.
    Truncate64x32 => op("truncate64x32", 1, 1);
    /// Low 32-bit word of a 64-bit value (long expansion).
    GetLow64 => op("getlow64", 1, 1);
    /// High 32-bit word of a 64-bit value (long expansion).
    GetHigh64 => op("gethigh64", 1, 1);
    /// Combine two 32-bit words into a 64-bit value (long expansion).
    Pack64 => op("pack64", 1, 2);
    /// i32 → r4.
    ConvertI32ToR4 => op("converti32tor4", 1, 1);
    /// i32 → r8.
    ConvertI32ToR8 => op("converti32tor8", 1, 1);
    /// i64 → r8.
    ConvertI64ToR8 => op("converti64tor8", 1, 1);
    /// r4 → i32, truncating.
    ConvertR4ToI32 => op("convertr4toi32", 1, 1);
    /// r8 → i32, truncating.
    ConvertR8ToI32 => op("convertr8toi32", 1, 1);
    /// r4 → r8.
    ConvertR4ToR8 => op("convertr4tor8", 1, 1);
    /// r8 → r4.
    ConvertR8ToR4 => op("convertr8tor4", 1, 1);

    /// 32-bit load from `[base + offset]`.
    Load32 => op("load32", 1, 2).mem(MemAccess::Read);
    /// 64-bit load.
    Load64 => op("load64", 1, 2).mem(MemAccess::Read);
    /// Single-precision load.
    LoadR4 => op("loadr4", 1, 2).mem(MemAccess::Read);
    /// Double-precision load.
    LoadR8 => op("loadr8", 1, 2).mem(MemAccess::Read);
    /// Load 8 bits, sign-extended to 32.
    LoadSignExtend8x32 => op("loadsignextend8x32", 1, 2).mem(MemAccess::Read);
    /// Load 16 bits, sign-extended to 32.
    LoadSignExtend16x32 => op("loadsignextend16x32", 1, 2).mem(MemAccess::Read);
    /// Load 8 bits, zero-extended to 32.
    LoadZeroExtend8x32 => op("loadzeroextend8x32", 1, 2).mem(MemAccess::Read);
    /// Load 16 bits, zero-extended to 32.
    LoadZeroExtend16x32 => op("loadzeroextend16x32", 1, 2).mem(MemAccess::Read);
    /// Load a compound value.
    LoadCompound => op("loadcompound", 1, 2).mem(MemAccess::Read);
    /// 8-bit store of `operands[2]` to `[base + offset]`.
    Store8 => op("store8", 0, 3).mem(MemAccess::Write);
    /// 16-bit store.
    Store16 => op("store16", 0, 3).mem(MemAccess::Write);
    /// 32-bit store.
    Store32 => op("store32", 0, 3).mem(MemAccess::Write);
    /// 64-bit store.
    Store64 => op("store64", 0, 3).mem(MemAccess::Write);
    /// Single-precision store.
    StoreR4 => op("storer4", 0, 3).mem(MemAccess::Write);
    /// Double-precision store.
    StoreR8 => op("storer8", 0, 3).mem(MemAccess::Write);
    /// Compound store.
    StoreCompound => op("storecompound", 0, 3).mem(MemAccess::Write);

    // ==================== x86 / x64 ====================
    //
    // Operand width is taken from the node type; 64-bit forms emit a REX.W
    // prefix. Register/constant/stack residences are resolved by the
    // encoder, memory forms through `[base + disp]` use the *Load/*Store
    // opcodes.

    /// `mov` between registers, from a constant, or to/from a stack slot.
    X86Mov => op("x86.mov", 1, 1);
    /// `movss` register move.
    X86Movss => op("x86.movss", 1, 1);
    /// `movsd` register move.
    X86Movsd => op("x86.movsd", 1, 1);
    /// `mov r, [base+disp]`.
    X86MovLoad => op("x86.mov.load", 1, 2).mem(MemAccess::Read);
    /// `mov [base+disp], r/imm` (width from node type; 8/16-bit via type).
    X86MovStore => op("x86.mov.store", 0, 3).mem(MemAccess::Write);
    /// `movsx r32, r/m8`.
    X86Movsx8 => op("x86.movsx8", 1, 1);
    /// `movsx r32, r/m16`.
    X86Movsx16 => op("x86.movsx16", 1, 1);
    /// `movzx r32, r/m8`.
    X86Movzx8 => op("x86.movzx8", 1, 1);
    /// `movzx r32, r/m16`.
    X86Movzx16 => op("x86.movzx16", 1, 1);
    /// `movsxd r64, r/m32`.
    X86Movsxd => op("x86.movsxd", 1, 1);
    /// `movsx r32, byte [base+disp]`.
    X86MovsxLoad8 => op("x86.movsx8.load", 1, 2).mem(MemAccess::Read);
    /// `movsx r32, word [base+disp]`.
    X86MovsxLoad16 => op("x86.movsx16.load", 1, 2).mem(MemAccess::Read);
    /// `movzx r32, byte [base+disp]`.
    X86MovzxLoad8 => op("x86.movzx8.load", 1, 2).mem(MemAccess::Read);
    /// `movzx r32, word [base+disp]`.
    X86MovzxLoad16 => op("x86.movzx16.load", 1, 2).mem(MemAccess::Read);
    /// `movss xmm, [base+disp]`.
    X86MovssLoad => op("x86.movss.load", 1, 2).mem(MemAccess::Read);
    /// `movss [base+disp], xmm`.
    X86MovssStore => op("x86.movss.store", 0, 3).mem(MemAccess::Write);
    /// `movsd xmm, [base+disp]`.
    X86MovsdLoad => op("x86.movsd.load", 1, 2).mem(MemAccess::Read);
    /// `movsd [base+disp], xmm`.
    X86MovsdStore => op("x86.movsd.store", 0, 3).mem(MemAccess::Write);
    /// `lea r, [stack slot]`.
    X86Lea => op("x86.lea", 1, 1);

    /// `add`.
    X86Add => op("x86.add", 1, 2).flags(0, flags::ALL).commutative();
    /// `adc`.
    X86Adc => op("x86.adc", 1, 2).flags(flags::C, flags::ALL);
    /// `sub`.
    X86Sub => op("x86.sub", 1, 2).flags(0, flags::ALL);
    /// `sbb`.
    X86Sbb => op("x86.sbb", 1, 2).flags(flags::C, flags::ALL);
    /// Two-operand `imul`.
    X86Imul => op("x86.imul", 1, 2).flags(0, flags::ALL).commutative();
    /// `mul` producing EDX:EAX; operands `[lo, multiplier]`.
    X86Mul => op("x86.mul", 2, 2).flags(0, flags::ALL);
    /// `idiv`; operands `[hi, lo, divisor]`, results `[quot, rem]`.
    X86Idiv => op("x86.idiv", 2, 3).flags(0, flags::ALL);
    /// `div`; operands `[hi, lo, divisor]`, results `[quot, rem]`.
    X86Div => op("x86.div", 2, 3).flags(0, flags::ALL);
    /// `cdq`/`cqo`: sign-extend EAX into EDX.
    X86Cdq => op("x86.cdq", 1, 1);
    /// `and`.
    X86And => op("x86.and", 1, 2).flags(0, flags::ALL).commutative();
    /// `or`.
    X86Or => op("x86.or", 1, 2).flags(0, flags::ALL).commutative();
    /// `xor`.
    X86Xor => op("x86.xor", 1, 2).flags(0, flags::ALL).commutative();
    /// `not`.
    X86Not => op("x86.not", 1, 1);
    /// `shl`; count in CL or an 8-bit immediate.
    X86Shl => op("x86.shl", 1, 2).flags(0, flags::ALL);
    /// `shr`.
    X86Shr => op("x86.shr", 1, 2).flags(0, flags::ALL);
    /// `sar`.
    X86Sar => op("x86.sar", 1, 2).flags(0, flags::ALL);
    /// `cmp`.
    X86Cmp => op("x86.cmp", 0, 2).flags(0, flags::ALL);
    /// `ucomiss`.
    X86Ucomiss => op("x86.ucomiss", 0, 2).flags(0, flags::ALL);
    /// `ucomisd`.
    X86Ucomisd => op("x86.ucomisd", 0, 2).flags(0, flags::ALL);
    /// `setcc r8` + zero-extension; condition in the node.
    X86Setcc => op("x86.setcc", 1, 0).flags(flags::ALL, 0);
    /// `jcc`; condition in the node, target in the aux block list.
    X86Jcc => op("x86.jcc", 0, 0)
        .flags(flags::ALL, 0)
        .flow(FlowControl::ConditionalBranch);
    /// `jmp`.
    X86Jmp => op("x86.jmp", 0, 0).flow(FlowControl::Branch);
    /// `call`; target symbol or register.
    X86Call => op("x86.call", 1, 1).variadic();
    /// Epilogue and `ret`. Variadic: return values ride along as operands
    /// until the fixed-register stage pins them.
    X86Ret => op("x86.ret", 0, 0).flow(FlowControl::Return).variadic();
    /// `push`.
    X86Push => op("x86.push", 0, 1).mem(MemAccess::Write);
    /// `pop`.
    X86Pop => op("x86.pop", 1, 0).mem(MemAccess::Read);

    /// `addss`.
    X86Addss => op("x86.addss", 1, 2).commutative();
    /// `addsd`.
    X86Addsd => op("x86.addsd", 1, 2).commutative();
    /// `subss`.
    X86Subss => op("x86.subss", 1, 2);
    /// `subsd`.
    X86Subsd => op("x86.subsd", 1, 2);
    /// `mulss`.
    X86Mulss => op("x86.mulss", 1, 2).commutative();
    /// `mulsd`.
    X86Mulsd => op("x86.mulsd", 1, 2).commutative();
    /// `divss`.
    X86Divss => op("x86.divss", 1, 2);
    /// `divsd`.
    X86Divsd => op("x86.divsd", 1, 2);
    /// `cvtsi2ss`.
    X86Cvtsi2ss => op("x86.cvtsi2ss", 1, 1);
    /// `cvtsi2sd`.
    X86Cvtsi2sd => op("x86.cvtsi2sd", 1, 1);
    /// `cvttss2si`.
    X86Cvttss2si => op("x86.cvttss2si", 1, 1);
    /// `cvttsd2si`.
    X86Cvttsd2si => op("x86.cvttsd2si", 1, 1);
    /// `cvtss2sd`.
    X86Cvtss2sd => op("x86.cvtss2sd", 1, 1);
    /// `cvtsd2ss`.
    X86Cvtsd2ss => op("x86.cvtsd2ss", 1, 1);

    // ==================== ARMv6 (A32) ====================
    //
    // ARMv6 has no integer divide and this port uses soft-float, so
    // division and all floating point lower to runtime helper calls before
    // these opcodes are reached.

    /// `mov` register or expanded immediate.
    A32Mov => op("a32.mov", 1, 1);
    /// `add`.
    A32Add => op("a32.add", 1, 2).flags(0, flags::ALL).commutative();
    /// `adc`.
    A32Adc => op("a32.adc", 1, 2).flags(flags::C, flags::ALL);
    /// `sub`.
    A32Sub => op("a32.sub", 1, 2).flags(0, flags::ALL);
    /// `sbc`.
    A32Sbc => op("a32.sbc", 1, 2).flags(flags::C, flags::ALL);
    /// `mul`.
    A32Mul => op("a32.mul", 1, 2).commutative();
    /// `umull`; results are the low and high product words.
    A32Umull => op("a32.umull", 2, 2).commutative();
    /// `and`.
    A32And => op("a32.and", 1, 2).commutative();
    /// `orr`.
    A32Orr => op("a32.orr", 1, 2).commutative();
    /// `eor`.
    A32Eor => op("a32.eor", 1, 2).commutative();
    /// `mvn`.
    A32Mvn => op("a32.mvn", 1, 1);
    /// `lsl` by register or immediate.
    A32Lsl => op("a32.lsl", 1, 2);
    /// `lsr`.
    A32Lsr => op("a32.lsr", 1, 2);
    /// `asr`.
    A32Asr => op("a32.asr", 1, 2);
    /// `cmp`.
    A32Cmp => op("a32.cmp", 0, 2).flags(0, flags::ALL);
    /// `mov rd, #0` + conditional `mov rd, #1`; condition in the node.
    A32Cset => op("a32.cset", 1, 0).flags(flags::ALL, 0);
    /// Frame-slot address: `add rd, fp, #offset`.
    A32Lea => op("a32.lea", 1, 1);
    /// `b`.
    A32B => op("a32.b", 0, 0).flow(FlowControl::Branch);
    /// `b<cond>`; condition in the node.
    A32Bcc => op("a32.bcc", 0, 0)
        .flags(flags::ALL, 0)
        .flow(FlowControl::ConditionalBranch);
    /// `bl` to a symbol.
    A32Bl => op("a32.bl", 1, 1).variadic();
    /// `blx` to a register.
    A32Blx => op("a32.blx", 1, 1).variadic();
    /// Epilogue and return (`bx lr`). Variadic like `x86.ret`.
    A32Ret => op("a32.ret", 0, 0).flow(FlowControl::Return).variadic();
    /// `ldr r, [base, #disp]`.
    A32Ldr => op("a32.ldr", 1, 2).mem(MemAccess::Read);
    /// `ldrb`.
    A32Ldrb => op("a32.ldrb", 1, 2).mem(MemAccess::Read);
    /// `ldrh`.
    A32Ldrh => op("a32.ldrh", 1, 2).mem(MemAccess::Read);
    /// `ldrsb`.
    A32Ldrsb => op("a32.ldrsb", 1, 2).mem(MemAccess::Read);
    /// `ldrsh`.
    A32Ldrsh => op("a32.ldrsh", 1, 2).mem(MemAccess::Read);
    /// `str r, [base, #disp]`.
    A32Str => op("a32.str", 0, 3).mem(MemAccess::Write);
    /// `strb`.
    A32Strb => op("a32.strb", 0, 3).mem(MemAccess::Write);
    /// `strh`.
    A32Strh => op("a32.strh", 0, 3).mem(MemAccess::Write);
    /// `sxtb`.
    A32Sxtb => op("a32.sxtb", 1, 1);
    /// `sxth`.
    A32Sxth => op("a32.sxth", 1, 1);
    /// `uxtb`.
    A32Uxtb => op("a32.uxtb", 1, 1);
    /// `uxth`.
    A32Uxth => op("a32.uxth", 1, 1);

    // ==================== ARMv8 (A64) ====================

    /// `mov` register or expanded `movz`/`movk` immediate.
    A64Mov => op("a64.mov", 1, 1);
    /// `add`.
    A64Add => op("a64.add", 1, 2).commutative();
    /// `sub`.
    A64Sub => op("a64.sub", 1, 2);
    /// `mul` (`madd` with xzr).
    A64Mul => op("a64.mul", 1, 2).commutative();
    /// `sdiv`.
    A64Sdiv => op("a64.sdiv", 1, 2);
    /// `udiv`.
    A64Udiv => op("a64.udiv", 1, 2);
    /// `msub`: `rd = ra - rn*rm`, used for remainders.
    A64Msub => op("a64.msub", 1, 3);
    /// `and`.
    A64And => op("a64.and", 1, 2).commutative();
    /// `orr`.
    A64Orr => op("a64.orr", 1, 2).commutative();
    /// `eor`.
    A64Eor => op("a64.eor", 1, 2).commutative();
    /// `mvn` (`orn` with xzr).
    A64Mvn => op("a64.mvn", 1, 1);
    /// `lslv`.
    A64Lsl => op("a64.lsl", 1, 2);
    /// `lsrv`.
    A64Lsr => op("a64.lsr", 1, 2);
    /// `asrv`.
    A64Asr => op("a64.asr", 1, 2);
    /// `cmp` (`subs` to zr); condition consumed by `b.cond`/`cset`.
    A64Cmp => op("a64.cmp", 0, 2).flags(0, flags::ALL);
    /// `cset`; condition in the node.
    A64Cset => op("a64.cset", 1, 0).flags(flags::ALL, 0);
    /// Frame-slot address: `add rd, x29, #offset`.
    A64Lea => op("a64.lea", 1, 1);
    /// `b`.
    A64B => op("a64.b", 0, 0).flow(FlowControl::Branch);
    /// `b.<cond>`.
    A64Bcc => op("a64.bcc", 0, 0)
        .flags(flags::ALL, 0)
        .flow(FlowControl::ConditionalBranch);
    /// `bl`.
    A64Bl => op("a64.bl", 1, 1).variadic();
    /// `blr`.
    A64Blr => op("a64.blr", 1, 1).variadic();
    /// Epilogue and `ret`. Variadic like `x86.ret`.
    A64Ret => op("a64.ret", 0, 0).flow(FlowControl::Return).variadic();
    /// `ldr`.
    A64Ldr => op("a64.ldr", 1, 2).mem(MemAccess::Read);
    /// `ldrb`.
    A64Ldrb => op("a64.ldrb", 1, 2).mem(MemAccess::Read);
    /// `ldrh`.
    A64Ldrh => op("a64.ldrh", 1, 2).mem(MemAccess::Read);
    /// `ldrsb`.
    A64Ldrsb => op("a64.ldrsb", 1, 2).mem(MemAccess::Read);
    /// `ldrsh`.
    A64Ldrsh => op("a64.ldrsh", 1, 2).mem(MemAccess::Read);
    /// `str`.
    A64Str => op("a64.str", 0, 3).mem(MemAccess::Write);
    /// `strb`.
    A64Strb => op("a64.strb", 0, 3).mem(MemAccess::Write);
    /// `strh`.
    A64Strh => op("a64.strh", 0, 3).mem(MemAccess::Write);
    /// `sxtb`/`sxth`/`sxtw` by node type.
    A64Sxt => op("a64.sxt", 1, 1);
    /// `uxtb`/`uxth` by node type.
    A64Uxt => op("a64.uxt", 1, 1);
    /// Scalar float `fadd`.
    A64FAdd => op("a64.fadd", 1, 2).commutative();
    /// `fsub`.
    A64FSub => op("a64.fsub", 1, 2);
    /// `fmul`.
    A64FMul => op("a64.fmul", 1, 2).commutative();
    /// `fdiv`.
    A64FDiv => op("a64.fdiv", 1, 2);
    /// `fcmp`.
    A64FCmp => op("a64.fcmp", 0, 2).flags(0, flags::ALL);
    /// Float register move.
    A64FMov => op("a64.fmov", 1, 1);
    /// `scvtf`.
    A64Scvtf => op("a64.scvtf", 1, 1);
    /// `fcvtzs`.
    A64Fcvtzs => op("a64.fcvtzs", 1, 1);
    /// `fcvt` between single and double.
    A64Fcvt => op("a64.fcvt", 1, 1);
    /// `ldr` into a float register.
    A64LdrF => op("a64.ldrf", 1, 2).mem(MemAccess::Read);
    /// `str` from a float register.
    A64StrF => op("a64.strf", 0, 3).mem(MemAccess::Write);
}

impl Opcode {
    /// The static descriptor for this opcode.
    pub fn desc(self) -> &'static OpDesc {
        &DESCRIPTORS[self as usize]
    }

    /// Mnemonic.
    pub fn name(self) -> &'static str {
        self.desc().name
    }

    /// Default result count.
    pub fn result_count(self) -> usize {
        self.desc().results as usize
    }

    /// Default operand count.
    pub fn operand_count(self) -> usize {
        self.desc().operands as usize
    }

    /// Flow-control kind.
    pub fn flow_control(self) -> FlowControl {
        self.desc().flow
    }

    /// True when the node shape may deviate from the default arity.
    pub fn is_variadic(self) -> bool {
        self.desc().variadic
    }

    /// True for opcodes that may end a block.
    pub fn is_terminator(self) -> bool {
        !matches!(self.flow_control(), FlowControl::Normal)
    }

    /// True for any branch kind, including switches.
    pub fn is_branch(self) -> bool {
        matches!(
            self.flow_control(),
            FlowControl::Branch | FlowControl::ConditionalBranch | FlowControl::Switch
        )
    }

    /// True for the SSA join pseudo-instruction.
    pub fn is_phi(self) -> bool {
        self == Self::Phi
    }

    /// True when operands commute.
    pub fn is_commutative(self) -> bool {
        self.desc().commutative
    }

    /// Memory access class.
    pub fn mem_access(self) -> MemAccess {
        self.desc().mem
    }

    /// True when the opcode modifies CPU flags.
    pub fn writes_flags(self) -> bool {
        self.desc().flags_written != 0
    }

    /// True when the opcode observes CPU flags.
    pub fn reads_flags(self) -> bool {
        self.desc().flags_read != 0
    }

    /// True for opcodes with no side effect beyond their results: these are
    /// the candidates for dead-code elimination and value numbering.
    pub fn is_pure(self) -> bool {
        !self.is_terminator()
            && !self.is_variadic()
            && self.mem_access() == MemAccess::None
            && self != Self::Nop
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_table_is_dense() {
        assert_eq!(Opcode::COUNT, DESCRIPTORS.len());
        assert_eq!(Opcode::Nop as usize, 0);
        assert_eq!(Opcode::Nop.name(), "nop");
        assert_eq!(Opcode::A64StrF as usize, Opcode::COUNT - 1);
    }

    #[test]
    fn arity_matches_descriptor() {
        assert_eq!(Opcode::Add32.result_count(), 1);
        assert_eq!(Opcode::Add32.operand_count(), 2);
        assert_eq!(Opcode::Store32.result_count(), 0);
        assert_eq!(Opcode::Store32.operand_count(), 3);
        assert_eq!(Opcode::X86Idiv.result_count(), 2);
    }

    #[test]
    fn flow_control_kinds() {
        assert!(Opcode::Jmp.is_terminator());
        assert!(Opcode::CompareIntBranch32.is_terminator());
        assert!(Opcode::ReturnVoid.is_terminator());
        assert!(Opcode::Switch.is_terminator());
        assert!(!Opcode::Call.is_terminator());
        assert!(!Opcode::Add32.is_terminator());
    }

    #[test]
    fn flag_effects() {
        assert!(Opcode::X86Add.writes_flags());
        assert!(Opcode::X86Adc.reads_flags());
        assert!(Opcode::X86Jcc.reads_flags());
        assert!(!Opcode::X86Mov.writes_flags());
    }

    #[test]
    fn purity() {
        assert!(Opcode::Add32.is_pure());
        assert!(!Opcode::Store32.is_pure());
        assert!(!Opcode::Call.is_pure());
        assert!(!Opcode::Jmp.is_pure());
        assert!(!Opcode::Nop.is_pure());
    }
}
