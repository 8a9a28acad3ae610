use tracing::debug;

use crate::ast::*;

pub mod alloc;
pub use alloc::{RegisterAllocator, SCRATCH_REGISTERS};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("no free registers: more than {} right operands pending at once", SCRATCH_REGISTERS)]
    NoFreeRegisters,
    #[error("constant pool full: at most {} literals per pool", CONSTANT_POOL_LIMIT)]
    ConstantPoolFull,
    #[error("internal compiler error: register r{register} released but not allocated")]
    RegisterNotAllocated { register: u8 },
}

/// Size of the register file. Register 0 is the accumulator.
pub const REGISTER_COUNT: usize = 256;

/// Constants are addressed by an 8-bit argument.
pub const CONSTANT_POOL_LIMIT: usize = 256;

// ── Instruction set ──────────────────────────────────────────────────
//
// Every arithmetic instruction reads its left operand from and writes its
// result to the accumulator (r0). The argument names the right operand's
// register, the STORE target, or the LOAD constant index.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Nop = 0,
    /// r0 += R[arg]
    Add = 1,
    /// r0 -= R[arg]
    Subtract = 2,
    /// r0 /= R[arg]
    Divide = 3,
    /// r0 *= R[arg]
    Multiply = 4,
    /// r0 *= -1
    Negate = 5,
    /// R[arg] = r0; r0 = 0
    Store = 6,
    /// r0 = K[arg]
    Load = 7,
}

impl OpCode {
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Nop => "NOP",
            OpCode::Add => "ADD",
            OpCode::Subtract => "SUBTRACT",
            OpCode::Divide => "DIVIDE",
            OpCode::Multiply => "MULTIPLY",
            OpCode::Negate => "NEGATE",
            OpCode::Store => "STORE",
            OpCode::Load => "LOAD",
        }
    }

    fn for_binop(op: BinOp) -> Self {
        match op {
            BinOp::Add => OpCode::Add,
            BinOp::Subtract => OpCode::Subtract,
            BinOp::Multiply => OpCode::Multiply,
            BinOp::Divide => OpCode::Divide,
        }
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: OpCode,
    pub arg: u8,
}

impl Instruction {
    pub fn new(op: OpCode, arg: u8) -> Self {
        Instruction { op, arg }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}]", self.op, self.arg)
    }
}

/// One line per instruction, `[LOAD:0]` style.
pub fn disassemble(code: &[Instruction]) -> Vec<String> {
    code.iter().map(Instruction::to_string).collect()
}

// ── VM ───────────────────────────────────────────────────────────────

/// Register file plus constant pool. Each compilation gets its own `Vm`
/// (or an explicitly reused one); nothing is shared between instances.
#[derive(Debug, Clone)]
pub struct Vm {
    constants: Vec<f64>,
    registers: [f64; REGISTER_COUNT],
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm { constants: Vec::new(), registers: [0.0; REGISTER_COUNT] }
    }

    pub fn constants(&self) -> &[f64] {
        &self.constants
    }

    pub fn registers(&self) -> &[f64; REGISTER_COUNT] {
        &self.registers
    }

    /// Zero the register file. The constant pool is kept.
    pub fn reset(&mut self) {
        self.registers = [0.0; REGISTER_COUNT];
    }

    fn make_constant(&mut self, value: f64) -> Result<u8, CompileError> {
        if self.constants.len() >= CONSTANT_POOL_LIMIT {
            return Err(CompileError::ConstantPoolFull);
        }
        self.constants.push(value);
        Ok((self.constants.len() - 1) as u8)
    }

    /// Run `code` to completion and return the accumulator.
    ///
    /// Register arguments are always in range. A LOAD past the end of the
    /// constant pool is a compiler bug and panics.
    pub fn execute(&mut self, code: &[Instruction]) -> f64 {
        for inst in code {
            let arg = inst.arg as usize;
            match inst.op {
                OpCode::Nop => {}
                OpCode::Add => self.registers[0] += self.registers[arg],
                OpCode::Subtract => self.registers[0] -= self.registers[arg],
                OpCode::Divide => self.registers[0] /= self.registers[arg],
                OpCode::Multiply => self.registers[0] *= self.registers[arg],
                OpCode::Negate => self.registers[0] *= -1.0,
                OpCode::Store => {
                    self.registers[arg] = self.registers[0];
                    self.registers[0] = 0.0;
                }
                OpCode::Load => {
                    debug_assert!(arg < self.constants.len(), "LOAD of constant {arg} past pool end");
                    self.registers[0] = self.constants[arg];
                }
            }
        }
        self.registers[0]
    }
}

// ── Compiler ─────────────────────────────────────────────────────────

/// Lowers an expression tree into accumulator bytecode, appending literals
/// to the target VM's constant pool.
pub struct Compiler<'vm> {
    vm: &'vm mut Vm,
    alloc: RegisterAllocator,
    code: Vec<Instruction>,
    /// Most scratch registers held at once during the last compile.
    peak: usize,
}

impl<'vm> Compiler<'vm> {
    pub fn new(vm: &'vm mut Vm) -> Self {
        Compiler { vm, alloc: RegisterAllocator::new(), code: Vec::new(), peak: 0 }
    }

    pub fn allocator(&self) -> &RegisterAllocator {
        &self.alloc
    }

    pub fn peak_registers(&self) -> usize {
        self.peak
    }

    /// Compile one expression. On failure the constant pool is rolled back
    /// to its length before the call.
    pub fn compile(&mut self, expr: &Expr) -> Result<Vec<Instruction>, CompileError> {
        self.alloc = RegisterAllocator::new();
        self.code.clear();
        self.peak = 0;
        let pool_mark = self.vm.constants.len();

        if let Err(e) = self.lower(expr) {
            self.vm.constants.truncate(pool_mark);
            debug!(error = %e, "bytecode compilation failed");
            return Err(e);
        }

        debug_assert!(self.alloc.is_clear(), "scratch registers leaked by compilation");
        debug!(
            instructions = self.code.len(),
            constants = self.vm.constants.len() - pool_mark,
            registers = self.peak,
            "compiled expression to bytecode"
        );
        Ok(std::mem::take(&mut self.code))
    }

    fn emit(&mut self, op: OpCode, arg: u8) {
        self.code.push(Instruction::new(op, arg));
    }

    fn lower(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Number { value, .. } => {
                let k = self.vm.make_constant(*value)?;
                self.emit(OpCode::Load, k);
            }
            Expr::Unary { op: UnaryOp::Negate, operand, .. } => {
                self.lower(operand)?;
                self.emit(OpCode::Negate, 0);
            }
            Expr::Binary { op, left, right, .. } => {
                // Right side first: STORE parks it in a scratch register and
                // zeroes r0, leaving the accumulator free for the left side.
                self.lower(right)?;
                let reg = self.alloc.allocate()?;
                self.peak = self.peak.max(self.alloc.in_use());
                self.emit(OpCode::Store, reg);
                self.lower(left)?;
                self.emit(OpCode::for_binop(*op), reg);
                self.alloc.release(reg)?;
            }
        }
        Ok(())
    }
}

/// Compile `expr` into `vm`'s constant pool.
pub fn compile(vm: &mut Vm, expr: &Expr) -> Result<Vec<Instruction>, CompileError> {
    Compiler::new(vm).compile(expr)
}

/// Compile into a fresh VM.
pub fn compile_expr(expr: &Expr) -> Result<(Vm, Vec<Instruction>), CompileError> {
    let mut vm = Vm::new();
    let code = compile(&mut vm, expr)?;
    Ok((vm, code))
}

pub fn compile_and_run(expr: &Expr) -> Result<f64, CompileError> {
    let (mut vm, code) = compile_expr(expr)?;
    Ok(vm.execute(&code))
}

// ── Tests ────────────────────────────────────────────────────────────
