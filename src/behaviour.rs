//! Statement completion behaviours.
//!
//! For every statement, the set of ways control can leave it. The analysis
//! is purely syntactic and needs no resolved environment; the uniformity
//! analyzer uses it to skip unreachable statements and to decide whether
//! control flow reconverges after a construct.

use bitflags::bitflags;
use std::rc::Rc;

use crate::ast::Statement;

bitflags! {
    /// How control may leave a statement.
    pub struct Behaviours: u8 {
        const NEXT = 1 << 0;
        const BREAK = 1 << 1;
        const CONTINUE = 1 << 2;
        const RETURN = 1 << 3;
        const DISCARD = 1 << 4;
    }
}

impl Behaviours {
    pub fn is_exactly_next(self) -> bool {
        self == Behaviours::NEXT
    }
}

/// Behaviours of a statement sequence: each statement is only analyzed
/// while the previous one can fall through.
pub fn sequence_behaviours(statements: &[Rc<Statement>]) -> Behaviours {
    let mut b = Behaviours::NEXT;
    for statement in statements {
        if !b.contains(Behaviours::NEXT) {
            break;
        }
        b = (b - Behaviours::NEXT) | statement_behaviours(statement);
    }
    b
}

pub fn statement_behaviours(statement: &Statement) -> Behaviours {
    match statement {
        Statement::Compound(compound) => sequence_behaviours(&compound.statements),
        Statement::Empty
        | Statement::ValueDecl { .. }
        | Statement::Variable { .. }
        | Statement::Assignment { .. }
        | Statement::Increment { .. }
        | Statement::Decrement { .. }
        | Statement::FunctionCall { .. }
        | Statement::ConstAssert { .. } => Behaviours::NEXT,
        Statement::Break => Behaviours::BREAK,
        Statement::Continue => Behaviours::CONTINUE,
        Statement::Discard => Behaviours::DISCARD,
        Statement::Return { .. } => Behaviours::RETURN,
        Statement::If {
            then_branch,
            else_branch,
            ..
        } => {
            let then_b = statement_behaviours(then_branch);
            match else_branch {
                Some(else_branch) => then_b | statement_behaviours(else_branch),
                None => then_b | Behaviours::NEXT,
            }
        }
        Statement::Switch { clauses, .. } => {
            let mut b = Behaviours::empty();
            for clause in clauses {
                b = b | statement_behaviours(&clause.body);
            }
            if b.contains(Behaviours::BREAK) {
                b = (b - Behaviours::BREAK) | Behaviours::NEXT;
            }
            b
        }
        Statement::Loop { body, continuing } => {
            let mut b = sequence_behaviours(body);
            if let Some(continuing) = continuing {
                if continuing.break_if.is_some() {
                    b = b | Behaviours::BREAK;
                }
            }
            loop_exit_behaviours(b)
        }
        // `while` and `for` are defined by desugaring to `loop`; a
        // condition makes falling through always possible.
        Statement::While { body, .. } => {
            loop_exit_behaviours(statement_behaviours(body) | Behaviours::BREAK)
        }
        Statement::For {
            condition, body, ..
        } => {
            let mut b = statement_behaviours(body);
            if condition.is_some() {
                b = b | Behaviours::BREAK;
            }
            loop_exit_behaviours(b)
        }
        // Dynamically dead by construction.
        Statement::DeadCodeFragment { .. } => Behaviours::NEXT,
        Statement::ControlFlowWrapper { body, .. }
        | Statement::ControlFlowWrapReturn { body, .. }
        | Statement::ControlFlowWrapHelperStatement { body, .. } => statement_behaviours(body),
    }
}

/// Applies the loop composition rule to the behaviours of a loop body:
/// `Continue` and `Next` restart the loop, `Break` exits it.
fn loop_exit_behaviours(body: Behaviours) -> Behaviours {
    let mut b = body - (Behaviours::CONTINUE | Behaviours::NEXT);
    if b.contains(Behaviours::BREAK) {
        b = (b - Behaviours::BREAK) | Behaviours::NEXT;
    }
    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::GlobalDecl;
    use crate::parser::parse;

    fn body_behaviours(src: &str) -> Behaviours {
        let tu = parse(src).unwrap();
        for decl in &tu.declarations {
            if let GlobalDecl::Function(f) = &**decl {
                return statement_behaviours(&f.body);
            }
        }
        panic!("no function in {:?}", src);
    }

    #[test]
    fn leaves() {
        assert_eq!(body_behaviours("fn f() { }"), Behaviours::NEXT);
        assert_eq!(body_behaviours("fn f() { return; }"), Behaviours::RETURN);
        assert_eq!(body_behaviours("fn f() { discard; }"), Behaviours::DISCARD);
    }

    #[test]
    fn statements_after_return_are_not_analyzed() {
        assert_eq!(
            body_behaviours("fn f() { return; discard; }"),
            Behaviours::RETURN
        );
    }

    #[test]
    fn if_without_else_can_fall_through() {
        assert_eq!(
            body_behaviours("fn f(a : u32) { if a != 0u { return; } }"),
            Behaviours::NEXT | Behaviours::RETURN
        );
        assert_eq!(
            body_behaviours("fn f(a : u32) { if a != 0u { return; } else { return; } }"),
            Behaviours::RETURN
        );
    }

    #[test]
    fn loop_that_always_returns_never_falls_through() {
        assert_eq!(
            body_behaviours("fn f() -> i32 { loop { return 0; } }"),
            Behaviours::RETURN
        );
        assert_eq!(body_behaviours("fn f() { loop { break; } }"), Behaviours::NEXT);
        assert_eq!(
            body_behaviours("fn f() { loop { continue; } }"),
            Behaviours::empty()
        );
    }

    #[test]
    fn while_always_falls_through() {
        assert_eq!(
            body_behaviours("fn f() { var i : i32; while i < 4 { i = i + 1; } }"),
            Behaviours::NEXT
        );
    }

    #[test]
    fn switch_break_becomes_next() {
        assert_eq!(
            body_behaviours("fn f(x : i32) { switch x { case 1: { break; } default: { return; } } }"),
            Behaviours::NEXT | Behaviours::RETURN
        );
    }
}
