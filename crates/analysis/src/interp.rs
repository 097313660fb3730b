//! Reference interpreter for routines.
//!
//! Runs a function over 64-bit integers and records what an observer outside the function
//! can see: the returned value, every call it makes with its arguments, and the final
//! values of its output variables. Two runs of a function before and after meshing must
//! produce equal [`Observation`]s.
//!
//! Memory is a flat array of cells. Each activation gets one cell per variable, so `& x`
//! yields the cell address of `x`, and `base [ i ]` reads cell `base + i`. Arguments are
//! bound in push order reversed: the last `param` before a `call` becomes the first input,
//! as on a cdecl stack.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tacmesh_core::Ident;
use tacmesh_core::decoder::{ArithOp, Operand, PointerForm, Statement, UnaryOp};
use tacmesh_core::il::{EdgeKind, Function, Routine, VarIndex, VarRole};
use tracing::trace;

pub const DEFAULT_STEP_LIMIT: usize = 100_000;
const MAX_DEPTH: usize = 256;

/// A call made during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub callee: Ident,
    pub args: Vec<i64>,
    /// `None` for callees outside the routine and for functions returning nothing.
    pub result: Option<i64>,
}

/// Everything a run exposes to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub return_value: Option<i64>,
    pub calls: Vec<CallRecord>,
    /// Output variables by name, in declaration order.
    pub outputs: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub observed: Observation,
    /// Instructions executed, over all activations.
    pub steps: usize,
}

pub struct Interpreter<'r> {
    routine: &'r Routine,
    step_limit: usize,
    memory: Vec<i64>,
    steps: usize,
    calls: Vec<CallRecord>,
}

impl<'r> Interpreter<'r> {
    pub fn new(routine: &'r Routine) -> Self {
        Self {
            routine,
            step_limit: DEFAULT_STEP_LIMIT,
            memory: Vec::new(),
            steps: 0,
            calls: Vec::new(),
        }
    }

    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Places `values` in memory and returns the address of the first one.
    ///
    /// Cells allocated here outlive every run.
    pub fn alloc(&mut self, values: &[i64]) -> i64 {
        let addr = self.memory.len();
        self.memory.extend_from_slice(values);
        addr as i64
    }

    /// Reads `len` cells starting at `addr`.
    pub fn read(&self, addr: i64, len: usize) -> Result<&[i64]> {
        let start = self.cell(addr)?;
        self.memory
            .get(start..start + len)
            .ok_or_else(|| Error::Execution(format!("read of {len} cells at {addr} out of range")))
    }

    /// Runs the function labelled `label` with `args` bound to its inputs in order.
    pub fn run(&mut self, label: &str, args: &[i64]) -> Result<Trace> {
        let routine = self.routine;
        let func = routine
            .function_by_label(label)
            .ok_or_else(|| Error::Execution(format!("no function labelled {label}")))?;
        self.run_function(func, args)
    }

    pub fn run_function(&mut self, func: &Function, args: &[i64]) -> Result<Trace> {
        self.steps = 0;
        self.calls.clear();
        let (return_value, outputs) = self.invoke(func, args, 0)?;
        Ok(Trace {
            observed: Observation {
                return_value,
                calls: std::mem::take(&mut self.calls),
                outputs,
            },
            steps: self.steps,
        })
    }

    fn invoke(
        &mut self,
        func: &Function,
        args: &[i64],
        depth: usize,
    ) -> Result<(Option<i64>, Vec<(String, i64)>)> {
        if depth > MAX_DEPTH {
            return Err(Error::Execution(format!(
                "call depth exceeds {MAX_DEPTH} in {}",
                func.external_label
            )));
        }

        let inputs: Vec<VarIndex> = func
            .variable_indices()
            .filter(|&idx| func.variable(idx).is_some_and(|v| v.role == VarRole::Input))
            .collect();
        if inputs.len() != args.len() {
            return Err(Error::Execution(format!(
                "{} takes {} arguments, got {}",
                func.external_label,
                inputs.len(),
                args.len()
            )));
        }

        let base = self.memory.len();
        self.memory.resize(base + func.variables().len(), 0);
        for (idx, var) in func.variables().iter().enumerate() {
            if var.is_fake_local() {
                self.memory[base + idx] = var.known_value();
            }
        }
        for (idx, value) in inputs.iter().zip(args) {
            self.memory[base + idx.index()] = *value;
        }

        let result = self.execute(func, base, depth);
        let outputs = func
            .variables()
            .iter()
            .enumerate()
            .filter(|(_, var)| depth == 0 && var.role == VarRole::Output)
            .map(|(idx, var)| (var.name.clone(), self.memory[base + idx]))
            .collect();
        self.memory.truncate(base);
        Ok((result?, outputs))
    }

    fn execute(&mut self, func: &Function, base: usize, depth: usize) -> Result<Option<i64>> {
        let mut node = func.entry().ok_or(Error::EmptyCfg)?;
        let mut pending: Vec<i64> = Vec::new();
        let mut retrieved: Option<i64> = None;

        loop {
            let block = func.block(node)?;
            trace!("{}: enter {}", func.external_label, block.id);
            let mut leave = EdgeKind::Fallthrough;
            let last = block.instructions.len().saturating_sub(1);

            for (i, inst) in block.instructions.iter().enumerate() {
                self.tick()?;
                let statement = func.statement(inst)?;
                if statement.kind().is_jump() && i != last {
                    return Err(Error::Execution(format!(
                        "jump {} is not the last instruction of {}",
                        inst.id, block.id
                    )));
                }
                match statement {
                    Statement::Goto { .. } => leave = EdgeKind::Jump,
                    Statement::IfGoto { lhs, relop, rhs, .. } => {
                        let lhs = self.load(base, lhs);
                        let rhs = self.value(base, rhs);
                        leave = if relop.holds(lhs, rhs) {
                            EdgeKind::BranchTrue
                        } else {
                            EdgeKind::BranchFalse
                        };
                    }
                    Statement::FullAssign { dst, lhs, op, rhs } => {
                        let lhs = self.load(base, lhs);
                        let rhs = self.value(base, rhs);
                        let value = arith(op, lhs, rhs).ok_or_else(|| {
                            Error::Execution(format!("division by zero in {}", inst.id))
                        })?;
                        self.store(base, dst, value);
                    }
                    Statement::UnaryAssign { dst, op, src } => {
                        let src = self.load(base, src);
                        let value = match op {
                            UnaryOp::Neg => src.wrapping_neg(),
                            UnaryOp::Not => i64::from(src == 0),
                        };
                        self.store(base, dst, value);
                    }
                    Statement::Copy { dst, src } => {
                        let value = self.value(base, src);
                        self.store(base, dst, value);
                    }
                    Statement::Pointer(PointerForm::AddressOf { dst, src }) => {
                        self.store(base, dst, (base + src.index()) as i64);
                    }
                    Statement::Pointer(PointerForm::Load { dst, ptr }) => {
                        let addr = self.load(base, ptr);
                        let value = self.memory[self.cell(addr)?];
                        self.store(base, dst, value);
                    }
                    Statement::Pointer(PointerForm::Store { ptr, src }) => {
                        let addr = self.cell(self.load(base, ptr))?;
                        let value = self.value(base, src);
                        self.memory[addr] = value;
                    }
                    Statement::IndexedLoad { dst, base: array, index } => {
                        let addr = self
                            .load(base, array)
                            .wrapping_add(self.value(base, index));
                        let value = self.memory[self.cell(addr)?];
                        self.store(base, dst, value);
                    }
                    Statement::IndexedStore { base: array, index, src } => {
                        let addr = self
                            .load(base, array)
                            .wrapping_add(self.value(base, index));
                        let addr = self.cell(addr)?;
                        let value = self.value(base, src);
                        self.memory[addr] = value;
                    }
                    Statement::Param(value) => pending.push(self.value(base, value)),
                    Statement::Call { callee, argc } => {
                        retrieved = self.call(callee, argc, &mut pending, depth)?;
                    }
                    Statement::Return(value) => {
                        return Ok(value.map(|v| self.value(base, v)));
                    }
                    Statement::Retrieve(dst) => self.store(base, dst, retrieved.unwrap_or(0)),
                    Statement::Nop => {}
                }
            }

            node = match func.successor(node, leave) {
                Some(next) => next,
                None if leave == EdgeKind::Fallthrough => return Ok(None),
                None => {
                    return Err(Error::Execution(format!(
                        "block {} has no {leave} successor",
                        block.id
                    )));
                }
            };
        }
    }

    fn call(
        &mut self,
        callee: Ident,
        argc: i64,
        pending: &mut Vec<i64>,
        depth: usize,
    ) -> Result<Option<i64>> {
        let argc = usize::try_from(argc)
            .ok()
            .filter(|&n| n <= pending.len())
            .ok_or_else(|| {
                Error::Execution(format!(
                    "call {callee} with {argc} arguments, {} pushed",
                    pending.len()
                ))
            })?;
        let mut args = pending.split_off(pending.len() - argc);
        args.reverse();

        let slot = self.calls.len();
        self.calls.push(CallRecord {
            callee,
            args: args.clone(),
            result: None,
        });

        let routine = self.routine;
        let result = match routine.function(&callee) {
            Some(func) => self.invoke(func, &args, depth + 1)?.0,
            None => None,
        };
        self.calls[slot].result = result;
        Ok(result)
    }

    fn tick(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(Error::StepLimit(self.step_limit));
        }
        Ok(())
    }

    fn cell(&self, addr: i64) -> Result<usize> {
        usize::try_from(addr)
            .ok()
            .filter(|&cell| cell < self.memory.len())
            .ok_or_else(|| Error::Execution(format!("address {addr} out of range")))
    }

    fn load(&self, base: usize, idx: VarIndex) -> i64 {
        self.memory[base + idx.index()]
    }

    fn store(&mut self, base: usize, idx: VarIndex, value: i64) {
        self.memory[base + idx.index()] = value;
    }

    fn value(&self, base: usize, operand: Operand) -> i64 {
        match operand {
            Operand::Var(idx) => self.load(base, idx),
            Operand::Const(value) => value,
        }
    }
}

fn arith(op: ArithOp, lhs: i64, rhs: i64) -> Option<i64> {
    match op {
        ArithOp::Add => Some(lhs.wrapping_add(rhs)),
        ArithOp::Sub => Some(lhs.wrapping_sub(rhs)),
        ArithOp::Mul => Some(lhs.wrapping_mul(rhs)),
        ArithOp::Div => (rhs != 0).then(|| lhs.wrapping_div(rhs)),
        ArithOp::Mod => (rhs != 0).then(|| lhs.wrapping_rem(rhs)),
    }
}
