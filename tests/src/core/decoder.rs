use tacmesh_core::Ident;
use tacmesh_core::decoder::{
    ArithOp, Operand, PointerForm, RelOp, Statement, UnaryOp, decode,
};
use tacmesh_core::document::InstructionDoc;
use tacmesh_core::il::{CalledFrom, Function, StatementType, VarIndex};
use tacmesh_core::result::Error;

use crate::common::{ROUTINE, routine};

/// A function with three locals `a`, `b`, `p` and one (empty) block to host instructions.
struct Fixture {
    func: Function,
    ids: [Ident; 3],
}

impl Fixture {
    fn new() -> Self {
        let doc = format!(
            r#"{{
                "id": "{f}", "external_label": "f", "called_from": "Both",
                "locals": {{ "original": [
                    {{ "id": "{a}", "name": "a", "size": "DWord" }},
                    {{ "id": "{b}", "name": "b", "size": "DWord" }},
                    {{ "id": "{p}", "name": "p", "size": "DWord", "pointer": true }}
                ] }},
                "basic_blocks": [ {{ "id": "{bb}", "instructions": [
                    {{ "id": "{nop}", "statement_type": "NoOperation", "text": "nop" }}
                ] }} ]
            }}"#,
            f = Ident::generate(),
            a = Ident::generate(),
            b = Ident::generate(),
            p = Ident::generate(),
            bb = Ident::generate(),
            nop = Ident::generate(),
        );
        let doc = serde_json::from_str(&doc).unwrap();
        let func = Function::from_document(&doc).unwrap();
        let ids = [0, 1, 2].map(|i| func.variables()[i].id);
        assert_eq!(func.called_from, CalledFrom::Both);
        Self { func, ids }
    }

    /// Decodes `text` with `refs` (indices into a, b, p) as referenced variables.
    fn decode(&self, kind: StatementType, text: &str, refs: &[usize]) -> Result<Statement, Error> {
        let [a, b, p] = self.ids;
        let text = text
            .replace("$a", &a.to_string())
            .replace("$b", &b.to_string())
            .replace("$p", &p.to_string());
        let doc = InstructionDoc {
            id: Ident::generate(),
            statement_type: kind,
            text,
            poly_required: false,
            ref_vars: refs
                .iter()
                .map(|&i| self.ids[i].to_string())
                .collect::<Vec<_>>()
                .join(" "),
        };
        let inst = self.func.build_instruction(&doc)?;
        decode(&self.func, &inst)
    }
}

#[test]
fn test_decode_every_shape() {
    let fx = Fixture::new();
    let a = VarIndex::new(0);
    let b = VarIndex::new(1);
    let p = VarIndex::new(2);
    let target = Ident::generate();

    let cases: Vec<(StatementType, String, &[usize], Statement)> = vec![
        (
            StatementType::UnconditionalJump,
            format!("goto {target}"),
            &[],
            Statement::Goto { target },
        ),
        (
            StatementType::ConditionalJump,
            format!("if $a >= -4 goto {target}"),
            &[0],
            Statement::IfGoto {
                lhs: a,
                relop: RelOp::GreaterOrEquals,
                rhs: Operand::Const(-4),
                target,
            },
        ),
        (
            StatementType::ConditionalJump,
            format!("if $a != $b goto {target}"),
            &[0, 1],
            Statement::IfGoto {
                lhs: a,
                relop: RelOp::NotEquals,
                rhs: Operand::Var(b),
                target,
            },
        ),
        (
            StatementType::FullAssignment,
            "$a = $b % 7".to_string(),
            &[0, 1],
            Statement::FullAssign {
                dst: a,
                lhs: b,
                op: ArithOp::Mod,
                rhs: Operand::Const(7),
            },
        ),
        (
            StatementType::UnaryAssignment,
            "$a = ! $b".to_string(),
            &[0, 1],
            Statement::UnaryAssign {
                dst: a,
                op: UnaryOp::Not,
                src: b,
            },
        ),
        (
            StatementType::Copy,
            "$a = $b".to_string(),
            &[0, 1],
            Statement::Copy {
                dst: a,
                src: Operand::Var(b),
            },
        ),
        (
            StatementType::PointerAssignment,
            "$p = & $a".to_string(),
            &[2, 0],
            Statement::Pointer(PointerForm::AddressOf { dst: p, src: a }),
        ),
        (
            StatementType::PointerAssignment,
            "$a = * $p".to_string(),
            &[0, 2],
            Statement::Pointer(PointerForm::Load { dst: a, ptr: p }),
        ),
        (
            StatementType::PointerAssignment,
            "* $p = 9".to_string(),
            &[2],
            Statement::Pointer(PointerForm::Store {
                ptr: p,
                src: Operand::Const(9),
            }),
        ),
        (
            StatementType::IndexedAssignment,
            "$a = $p [ $b ]".to_string(),
            &[0, 2, 1],
            Statement::IndexedLoad {
                dst: a,
                base: p,
                index: Operand::Var(b),
            },
        ),
        (
            StatementType::IndexedAssignment,
            "$p [ 2 ] = $a".to_string(),
            &[2, 0],
            Statement::IndexedStore {
                base: p,
                index: Operand::Const(2),
                src: Operand::Var(a),
            },
        ),
        (
            StatementType::Procedural,
            "param $a".to_string(),
            &[0],
            Statement::Param(Operand::Var(a)),
        ),
        (
            StatementType::Procedural,
            format!("call {target} 2"),
            &[],
            Statement::Call { callee: target, argc: 2 },
        ),
        (
            StatementType::Procedural,
            "return".to_string(),
            &[],
            Statement::Return(None),
        ),
        (
            StatementType::Procedural,
            "return 0".to_string(),
            &[],
            Statement::Return(Some(Operand::Const(0))),
        ),
        (
            StatementType::Procedural,
            "retrieve $b".to_string(),
            &[1],
            Statement::Retrieve(b),
        ),
        (
            StatementType::NoOperation,
            "nop anything goes".to_string(),
            &[],
            Statement::Nop,
        ),
    ];

    for (kind, text, refs, expected) in cases {
        let statement = fx
            .decode(kind, &text, refs)
            .unwrap_or_else(|e| panic!("{text}: {e}"));
        assert_eq!(statement, expected, "{text}");
        assert_eq!(statement.kind(), kind, "{text}");
    }
}

#[test]
fn test_render_round_trips() {
    let routine = routine(ROUTINE);
    for func in &routine.functions {
        for (_, block) in func.blocks() {
            for inst in &block.instructions {
                let statement = func.statement(inst).unwrap();
                let (text, mut refs) = statement.render(func);
                assert_eq!(text, inst.text);
                let mut expected = inst.refs.clone();
                refs.sort();
                expected.sort();
                expected.dedup();
                assert_eq!(refs, expected, "{text}");
            }
        }
    }
}

#[test]
fn test_shape_errors() {
    let fx = Fixture::new();
    let cases: [(StatementType, &str, &[usize]); 7] = [
        // wrong keyword
        (StatementType::UnconditionalJump, "jump $a", &[0]),
        // trailing token
        (StatementType::Copy, "$a = 1 2", &[0]),
        // referenced variable never mentioned
        (StatementType::Copy, "$a = 1", &[0, 1]),
        // variable missing from the reference list
        (StatementType::Copy, "$a = $b", &[0]),
        // unknown operators
        (StatementType::FullAssignment, "$a = $b ^ 1", &[0, 1]),
        (StatementType::ConditionalJump, "if $a <> 1 goto $b", &[0]),
        (StatementType::Procedural, "yield $a", &[0]),
    ];
    for (kind, text, refs) in cases {
        assert!(
            matches!(
                fx.decode(kind, text, refs),
                Err(Error::InvalidInstructionShape { .. }) | Err(Error::MalformedIdentifier(_))
            ),
            "{text} should not decode"
        );
    }

    assert!(matches!(
        fx.decode(StatementType::Invalid, "whatever", &[]),
        Err(Error::UnsupportedStatementType { .. })
    ));
}

#[test]
fn test_defined_and_escaping_variables() {
    let fx = Fixture::new();
    let a = VarIndex::new(0);
    let p = VarIndex::new(2);

    let addr = fx.decode(StatementType::PointerAssignment, "$p = & $a", &[2, 0]).unwrap();
    assert_eq!(addr.defined_var(), Some(p));
    assert_eq!(addr.escaping_var(), Some(a));

    let store = fx.decode(StatementType::IndexedAssignment, "$p [ 0 ] = 1", &[2]).unwrap();
    assert_eq!(store.defined_var(), Some(p));

    let cond = fx
        .decode(StatementType::ConditionalJump, &format!("if $a < 3 goto {}", Ident::generate()), &[0])
        .unwrap();
    let condition = cond.condition().unwrap();
    assert_eq!((condition.var, condition.relop, condition.rhs), (a, RelOp::Smaller, 3));
    assert_eq!(cond.defined_var(), None);
}

#[test]
fn test_relops() {
    for op in RelOp::ALL {
        assert_eq!(RelOp::from_symbol(op.symbol()), Some(op));
    }
    assert!(RelOp::Greater.holds(2, 1));
    assert!(!RelOp::Greater.holds(1, 1));
    assert!(RelOp::SmallerOrEquals.holds(1, 1));
    assert!(RelOp::NotEquals.holds(0, 1));
    assert_eq!(RelOp::from_symbol("=<"), None);
}
