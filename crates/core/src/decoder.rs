//! Typed view of the three-address-code text carried by each instruction.
//!
//! The document stores instructions as whitespace-separated text such as
//! `if ID_… < 5 goto ID_…`. The decoder turns that text into a [`Statement`] whose variable
//! operands are [`VarIndex`] handles into the owning function, and renders statements back
//! to text when the meshing engine synthesises or rewrites instructions.

use crate::ident::Ident;
use crate::il::{Function, Instruction, StatementType, VarIndex};
use crate::result::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relational operator of a conditional jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Equals,
    NotEquals,
    Greater,
    GreaterOrEquals,
    Smaller,
    SmallerOrEquals,
}

impl RelOp {
    /// Every operator, in a fixed order used for uniform random choice.
    pub const ALL: [RelOp; 6] = [
        RelOp::Equals,
        RelOp::NotEquals,
        RelOp::Greater,
        RelOp::GreaterOrEquals,
        RelOp::Smaller,
        RelOp::SmallerOrEquals,
    ];

    /// Textual form used in instruction text.
    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Equals => "==",
            RelOp::NotEquals => "!=",
            RelOp::Greater => ">",
            RelOp::GreaterOrEquals => ">=",
            RelOp::Smaller => "<",
            RelOp::SmallerOrEquals => "<=",
        }
    }

    /// Parses the textual form.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    /// Evaluates `lhs op rhs`.
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            RelOp::Equals => lhs == rhs,
            RelOp::NotEquals => lhs != rhs,
            RelOp::Greater => lhs > rhs,
            RelOp::GreaterOrEquals => lhs >= rhs,
            RelOp::Smaller => lhs < rhs,
            RelOp::SmallerOrEquals => lhs <= rhs,
        }
    }
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Binary arithmetic operator of a full assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::Mod => "%",
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(ArithOp::Add),
            "-" => Some(ArithOp::Sub),
            "*" => Some(ArithOp::Mul),
            "/" => Some(ArithOp::Div),
            "%" => Some(ArithOp::Mod),
            _ => None,
        }
    }
}

/// Unary operator of a unary assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation (`-`).
    Neg,
    /// Logical negation (`!`).
    Not,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

/// A value operand: either a variable of the function or an integer literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Var(VarIndex),
    Const(i64),
}

/// A `var relop constant` test, the only shape the meshing engine synthesises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condition {
    pub var: VarIndex,
    pub relop: RelOp,
    pub rhs: i64,
}

impl Condition {
    pub fn new(var: VarIndex, relop: RelOp, rhs: i64) -> Self {
        Self { var, relop, rhs }
    }
}

/// The four pointer assignment shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerForm {
    /// `dst = & src`
    AddressOf { dst: VarIndex, src: VarIndex },
    /// `dst = * ptr`
    Load { dst: VarIndex, ptr: VarIndex },
    /// `* ptr = src`
    Store { ptr: VarIndex, src: Operand },
}

/// Decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Goto {
        target: Ident,
    },
    IfGoto {
        lhs: VarIndex,
        relop: RelOp,
        rhs: Operand,
        target: Ident,
    },
    FullAssign {
        dst: VarIndex,
        lhs: VarIndex,
        op: ArithOp,
        rhs: Operand,
    },
    UnaryAssign {
        dst: VarIndex,
        op: UnaryOp,
        src: VarIndex,
    },
    Copy {
        dst: VarIndex,
        src: Operand,
    },
    Pointer(PointerForm),
    IndexedLoad {
        dst: VarIndex,
        base: VarIndex,
        index: Operand,
    },
    IndexedStore {
        base: VarIndex,
        index: Operand,
        src: Operand,
    },
    Param(Operand),
    Call {
        callee: Ident,
        argc: i64,
    },
    Return(Option<Operand>),
    Retrieve(VarIndex),
    Nop,
}

impl Statement {
    /// The statement-type tag this statement is stored under.
    pub fn kind(&self) -> StatementType {
        match self {
            Statement::Goto { .. } => StatementType::UnconditionalJump,
            Statement::IfGoto { .. } => StatementType::ConditionalJump,
            Statement::FullAssign { .. } => StatementType::FullAssignment,
            Statement::UnaryAssign { .. } => StatementType::UnaryAssignment,
            Statement::Copy { .. } => StatementType::Copy,
            Statement::Pointer(_) => StatementType::PointerAssignment,
            Statement::IndexedLoad { .. } | Statement::IndexedStore { .. } => {
                StatementType::IndexedAssignment
            }
            Statement::Param(_)
            | Statement::Call { .. }
            | Statement::Return(_)
            | Statement::Retrieve(_) => StatementType::Procedural,
            Statement::Nop => StatementType::NoOperation,
        }
    }

    /// The variable this statement writes directly, if any.
    ///
    /// Stores through pointers or into indexed bases are not attributed to a single variable.
    pub fn defined_var(&self) -> Option<VarIndex> {
        match self {
            Statement::FullAssign { dst, .. }
            | Statement::UnaryAssign { dst, .. }
            | Statement::Copy { dst, .. }
            | Statement::IndexedLoad { dst, .. }
            | Statement::Retrieve(dst)
            | Statement::Pointer(PointerForm::AddressOf { dst, .. })
            | Statement::Pointer(PointerForm::Load { dst, .. }) => Some(*dst),
            Statement::IndexedStore { base, .. } => Some(*base),
            _ => None,
        }
    }

    /// Variables whose address escapes (`& x`) or that are written through an index.
    pub fn escaping_var(&self) -> Option<VarIndex> {
        match self {
            Statement::Pointer(PointerForm::AddressOf { src, .. }) => Some(*src),
            _ => None,
        }
    }

    /// Returns the `var relop constant` test of a conditional jump.
    pub fn condition(&self) -> Option<Condition> {
        match self {
            Statement::IfGoto {
                lhs,
                relop,
                rhs: Operand::Const(rhs),
                ..
            } => Some(Condition::new(*lhs, *relop, *rhs)),
            _ => None,
        }
    }

    /// Renders the statement back to instruction text, together with the variables it
    /// references (in order of first appearance).
    pub fn render(&self, func: &Function) -> (String, Vec<VarIndex>) {
        let mut refs = Vec::new();
        let mut var = |idx: VarIndex| {
            if !refs.contains(&idx) {
                refs.push(idx);
            }
            func.variable(idx)
                .map(|v| v.id.to_string())
                .unwrap_or_else(|| format!("<var {}>", idx.index()))
        };
        let text = match self {
            Statement::Goto { target } => format!("goto {target}"),
            Statement::IfGoto {
                lhs,
                relop,
                rhs,
                target,
            } => {
                let lhs = var(*lhs);
                let rhs = operand_text(*rhs, &mut var);
                format!("if {lhs} {relop} {rhs} goto {target}")
            }
            Statement::FullAssign { dst, lhs, op, rhs } => {
                let dst = var(*dst);
                let lhs = var(*lhs);
                let rhs = operand_text(*rhs, &mut var);
                format!("{dst} = {lhs} {} {rhs}", op.symbol())
            }
            Statement::UnaryAssign { dst, op, src } => {
                let dst = var(*dst);
                format!("{dst} = {} {}", op.symbol(), var(*src))
            }
            Statement::Copy { dst, src } => {
                let dst = var(*dst);
                format!("{dst} = {}", operand_text(*src, &mut var))
            }
            Statement::Pointer(PointerForm::AddressOf { dst, src }) => {
                let dst = var(*dst);
                format!("{dst} = & {}", var(*src))
            }
            Statement::Pointer(PointerForm::Load { dst, ptr }) => {
                let dst = var(*dst);
                format!("{dst} = * {}", var(*ptr))
            }
            Statement::Pointer(PointerForm::Store { ptr, src }) => {
                let ptr = var(*ptr);
                format!("* {ptr} = {}", operand_text(*src, &mut var))
            }
            Statement::IndexedLoad { dst, base, index } => {
                let dst = var(*dst);
                let base = var(*base);
                format!("{dst} = {base} [ {} ]", operand_text(*index, &mut var))
            }
            Statement::IndexedStore { base, index, src } => {
                let base = var(*base);
                let index = operand_text(*index, &mut var);
                format!("{base} [ {index} ] = {}", operand_text(*src, &mut var))
            }
            Statement::Param(value) => format!("param {}", operand_text(*value, &mut var)),
            Statement::Call { callee, argc } => format!("call {callee} {argc}"),
            Statement::Return(None) => "return".to_string(),
            Statement::Return(Some(value)) => {
                format!("return {}", operand_text(*value, &mut var))
            }
            Statement::Retrieve(dst) => format!("retrieve {}", var(*dst)),
            Statement::Nop => "nop".to_string(),
        };
        (text, refs)
    }
}

fn operand_text(operand: Operand, var: &mut impl FnMut(VarIndex) -> String) -> String {
    match operand {
        Operand::Var(idx) => var(idx),
        Operand::Const(value) => value.to_string(),
    }
}

/// Decodes an instruction of `func` into a [`Statement`].
pub fn decode(func: &Function, inst: &Instruction) -> Result<Statement> {
    let mut cursor = Cursor::new(func, inst);
    let statement = match inst.kind {
        StatementType::UnconditionalJump => {
            cursor.keyword("goto")?;
            Statement::Goto {
                target: cursor.ident()?,
            }
        }
        StatementType::ConditionalJump => {
            cursor.keyword("if")?;
            let lhs = cursor.var()?;
            let relop = cursor.relop()?;
            let rhs = cursor.operand()?;
            cursor.keyword("goto")?;
            Statement::IfGoto {
                lhs,
                relop,
                rhs,
                target: cursor.ident()?,
            }
        }
        StatementType::FullAssignment => {
            let dst = cursor.var()?;
            cursor.keyword("=")?;
            let lhs = cursor.var()?;
            let op = cursor.arith()?;
            Statement::FullAssign {
                dst,
                lhs,
                op,
                rhs: cursor.operand()?,
            }
        }
        StatementType::UnaryAssignment => {
            let dst = cursor.var()?;
            cursor.keyword("=")?;
            let op = match cursor.next("unary operator")? {
                "-" => UnaryOp::Neg,
                "!" => UnaryOp::Not,
                other => return Err(cursor.fail(format!("unsupported unary operator '{other}'"))),
            };
            Statement::UnaryAssign {
                dst,
                op,
                src: cursor.var()?,
            }
        }
        StatementType::Copy => {
            let dst = cursor.var()?;
            cursor.keyword("=")?;
            Statement::Copy {
                dst,
                src: cursor.operand()?,
            }
        }
        StatementType::PointerAssignment => decode_pointer(&mut cursor)?,
        StatementType::IndexedAssignment => decode_indexed(&mut cursor)?,
        StatementType::Procedural => decode_procedural(&mut cursor)?,
        StatementType::NoOperation => {
            // Any payload is tolerated on a no-op; nothing of it is interpreted.
            cursor.rest();
            Statement::Nop
        }
        StatementType::Invalid => {
            return Err(Error::UnsupportedStatementType {
                instruction: inst.id.to_string(),
                kind: inst.kind,
            });
        }
    };
    cursor.finish()?;
    Ok(statement)
}

fn decode_pointer(cursor: &mut Cursor<'_>) -> Result<Statement> {
    if cursor.peek() == Some("*") {
        cursor.keyword("*")?;
        let ptr = cursor.var()?;
        cursor.keyword("=")?;
        return Ok(Statement::Pointer(PointerForm::Store {
            ptr,
            src: cursor.operand()?,
        }));
    }
    let dst = cursor.var()?;
    cursor.keyword("=")?;
    match cursor.next("'&' or '*'")? {
        "&" => Ok(Statement::Pointer(PointerForm::AddressOf {
            dst,
            src: cursor.var()?,
        })),
        "*" => Ok(Statement::Pointer(PointerForm::Load {
            dst,
            ptr: cursor.var()?,
        })),
        other => Err(cursor.fail(format!("expected '&' or '*', found '{other}'"))),
    }
}

fn decode_indexed(cursor: &mut Cursor<'_>) -> Result<Statement> {
    let first = cursor.var()?;
    if cursor.peek() == Some("[") {
        cursor.keyword("[")?;
        let index = cursor.operand()?;
        cursor.keyword("]")?;
        cursor.keyword("=")?;
        return Ok(Statement::IndexedStore {
            base: first,
            index,
            src: cursor.operand()?,
        });
    }
    cursor.keyword("=")?;
    let base = cursor.var()?;
    cursor.keyword("[")?;
    let index = cursor.operand()?;
    cursor.keyword("]")?;
    Ok(Statement::IndexedLoad {
        dst: first,
        base,
        index,
    })
}

fn decode_procedural(cursor: &mut Cursor<'_>) -> Result<Statement> {
    match cursor.next("procedural keyword")? {
        "param" => Ok(Statement::Param(cursor.operand()?)),
        "call" => {
            let callee = cursor.ident()?;
            Ok(Statement::Call {
                callee,
                argc: cursor.int()?,
            })
        }
        "return" => {
            if cursor.peek().is_some() {
                Ok(Statement::Return(Some(cursor.operand()?)))
            } else {
                Ok(Statement::Return(None))
            }
        }
        "retrieve" => Ok(Statement::Retrieve(cursor.var()?)),
        other => Err(cursor.fail(format!("unknown procedural keyword '{other}'"))),
    }
}

/// Token cursor over one instruction's text.
struct Cursor<'a> {
    func: &'a Function,
    inst: &'a Instruction,
    tokens: std::iter::Peekable<std::str::SplitWhitespace<'a>>,
    used: Vec<VarIndex>,
}

impl<'a> Cursor<'a> {
    fn new(func: &'a Function, inst: &'a Instruction) -> Self {
        Self {
            func,
            inst,
            tokens: inst.text.split_whitespace().peekable(),
            used: Vec::new(),
        }
    }

    fn fail(&self, reason: impl Into<String>) -> Error {
        Error::shape(self.inst.id, reason)
    }

    fn peek(&mut self) -> Option<&'a str> {
        self.tokens.peek().copied()
    }

    fn rest(&mut self) {
        self.tokens.by_ref().for_each(drop);
    }

    fn next(&mut self, expected: &str) -> Result<&'a str> {
        self.tokens
            .next()
            .ok_or_else(|| self.fail(format!("expected {expected}, found end of text")))
    }

    fn keyword(&mut self, keyword: &str) -> Result<()> {
        let token = self.next(&format!("'{keyword}'"))?;
        if token.eq_ignore_ascii_case(keyword) {
            Ok(())
        } else {
            Err(self.fail(format!("expected '{keyword}', found '{token}'")))
        }
    }

    fn ident(&mut self) -> Result<Ident> {
        let token = self.next("identifier")?;
        token.parse()
    }

    fn var(&mut self) -> Result<VarIndex> {
        let id = self.ident()?;
        let found = self
            .inst
            .refs
            .iter()
            .copied()
            .find(|idx| self.func.variable(*idx).is_some_and(|v| v.id == id));
        match found {
            Some(idx) => {
                if !self.used.contains(&idx) {
                    self.used.push(idx);
                }
                Ok(idx)
            }
            None => Err(self.fail(format!(
                "{id} is not among the instruction's referenced variables"
            ))),
        }
    }

    fn int(&mut self) -> Result<i64> {
        let token = self.next("integer")?;
        token
            .parse()
            .map_err(|_| self.fail(format!("expected integer, found '{token}'")))
    }

    fn operand(&mut self) -> Result<Operand> {
        match self.peek() {
            Some(token) if is_ident_token(token) => self.var().map(Operand::Var),
            _ => self.int().map(Operand::Const),
        }
    }

    fn relop(&mut self) -> Result<RelOp> {
        let token = self.next("relational operator")?;
        RelOp::from_symbol(token)
            .ok_or_else(|| self.fail(format!("unknown relational operator '{token}'")))
    }

    fn arith(&mut self) -> Result<ArithOp> {
        let token = self.next("arithmetic operator")?;
        ArithOp::from_symbol(token)
            .ok_or_else(|| self.fail(format!("unknown arithmetic operator '{token}'")))
    }

    /// Rejects trailing tokens and referenced variables the text never mentions.
    fn finish(mut self) -> Result<()> {
        if let Some(extra) = self.tokens.next() {
            return Err(self.fail(format!("unexpected trailing token '{extra}'")));
        }
        if self.inst.kind == StatementType::NoOperation {
            return Ok(());
        }
        match self.inst.refs.iter().find(|r| !self.used.contains(r)) {
            Some(unused) => {
                let id = self
                    .func
                    .variable(*unused)
                    .map(|v| v.id.to_string())
                    .unwrap_or_default();
                Err(self.fail(format!("referenced variable {id} does not occur in text")))
            }
            None => Ok(()),
        }
    }
}

fn is_ident_token(token: &str) -> bool {
    token
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("ID_"))
}
