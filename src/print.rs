//! WGSL pretty-printer.
//!
//! Prints a translation unit so that reparsing yields a structurally
//! equivalent tree; augmented markers print as the concrete construct they
//! carry and decay to ordinary nodes on reparse. Two-space indentation,
//! attributes before the declarations they annotate.

use std::fmt::Write;
use std::rc::Rc;

use crate::ast::{
    Attribute, AugmentedExpression, CaseSelectors, Expression, GlobalDecl, LhsExpression,
    Statement, TemplateArg, TranslationUnit, TypeDecl,
};

pub fn print(tu: &TranslationUnit) -> String {
    let mut printer = Printer { out: String::new() };
    printer.unit(tu);
    printer.out
}

struct Printer {
    out: String,
}

impl Printer {
    fn indent(&mut self, level: usize) {
        for _ in 0..level {
            self.out.push_str("  ");
        }
    }

    fn unit(&mut self, tu: &TranslationUnit) {
        for directive in &tu.directives {
            let _ = writeln!(self.out, "{}", directive);
        }
        if !tu.directives.is_empty() {
            self.out.push('\n');
        }
        for decl in &tu.declarations {
            self.global_decl(decl);
        }
    }

    fn global_decl(&mut self, decl: &GlobalDecl) {
        match decl {
            GlobalDecl::Constant {
                name,
                ty,
                initializer,
            } => {
                let _ = write!(self.out, "const {}", name);
                self.optional_annotation(ty);
                self.out.push_str(" = ");
                self.expression(initializer);
                self.out.push_str(";\n");
            }
            GlobalDecl::Override {
                attributes,
                name,
                ty,
                initializer,
            } => {
                self.attributes(attributes);
                let _ = write!(self.out, "override {}", name);
                self.optional_annotation(ty);
                if let Some(init) = initializer {
                    self.out.push_str(" = ");
                    self.expression(init);
                }
                self.out.push_str(";\n");
            }
            GlobalDecl::Variable {
                attributes,
                name,
                address_space,
                access_mode,
                ty,
                initializer,
            } => {
                self.attributes(attributes);
                self.out.push_str("var");
                if let Some(space) = address_space {
                    match access_mode {
                        Some(access) => {
                            let _ = write!(self.out, "<{}, {}>", space, access);
                        }
                        None => {
                            let _ = write!(self.out, "<{}>", space);
                        }
                    }
                }
                let _ = write!(self.out, " {}", name);
                self.optional_annotation(ty);
                if let Some(init) = initializer {
                    self.out.push_str(" = ");
                    self.expression(init);
                }
                self.out.push_str(";\n");
            }
            GlobalDecl::Function(function) => {
                self.attributes(&function.attributes);
                let _ = write!(self.out, "fn {}(", function.name);
                for (i, param) in function.parameters.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    for attr in &param.attributes {
                        self.attribute(attr);
                        self.out.push(' ');
                    }
                    let _ = write!(self.out, "{} : ", param.name);
                    self.type_decl(&param.ty);
                }
                self.out.push(')');
                if let Some(ret) = &function.return_type {
                    self.out.push_str(" -> ");
                    for attr in &function.return_attributes {
                        self.attribute(attr);
                        self.out.push(' ');
                    }
                    self.type_decl(ret);
                }
                self.out.push(' ');
                self.statement(&function.body, 0);
                self.out.push('\n');
            }
            GlobalDecl::Struct { name, members } => {
                let _ = writeln!(self.out, "struct {} {{", name);
                for member in members {
                    self.indent(1);
                    for attr in &member.attributes {
                        self.attribute(attr);
                        self.out.push(' ');
                    }
                    let _ = write!(self.out, "{} : ", member.name);
                    self.type_decl(&member.ty);
                    self.out.push_str(",\n");
                }
                self.out.push_str("}\n\n");
            }
            GlobalDecl::TypeAlias { name, ty } => {
                let _ = write!(self.out, "alias {} = ", name);
                self.type_decl(ty);
                self.out.push_str(";\n");
            }
            GlobalDecl::ConstAssert { expression } => {
                self.out.push_str("const_assert ");
                self.expression(expression);
                self.out.push_str(";\n");
            }
            GlobalDecl::Empty => {
                self.out.push_str(";\n");
            }
        }
    }

    fn attributes(&mut self, attributes: &[Attribute]) {
        for attr in attributes {
            self.attribute(attr);
            self.out.push(' ');
        }
    }

    fn attribute(&mut self, attribute: &Attribute) {
        let _ = write!(self.out, "@{}", attribute.name);
        if !attribute.args.is_empty() {
            self.out.push('(');
            for (i, arg) in attribute.args.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(", ");
                }
                self.expression(arg);
            }
            self.out.push(')');
        }
    }

    fn optional_annotation(&mut self, ty: &Option<Rc<TypeDecl>>) {
        if let Some(ty) = ty {
            self.out.push_str(" : ");
            self.type_decl(ty);
        }
    }

    fn type_decl(&mut self, ty: &TypeDecl) {
        self.out.push_str(&ty.name);
        if !ty.template.is_empty() {
            self.out.push('<');
            for (i, arg) in ty.template.iter().enumerate() {
                if i > 0 {
                    self.out.push_str(", ");
                }
                match arg {
                    TemplateArg::Type(t) => self.type_decl(t),
                    TemplateArg::Expression(e) => self.expression(e),
                }
            }
            self.out.push('>');
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Statements
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn statement(&mut self, statement: &Statement, level: usize) {
        match statement {
            Statement::Compound(compound) => {
                self.out.push_str("{\n");
                for s in &compound.statements {
                    self.statement_line(s, level + 1);
                }
                self.indent(level);
                self.out.push('}');
            }
            Statement::If { .. } => self.if_statement(statement, level),
            other => self.simple_statement(other),
        }
    }

    /// A full statement line: indentation, the statement, newline.
    fn statement_line(&mut self, statement: &Statement, level: usize) {
        match statement {
            Statement::Compound(_) => {
                self.indent(level);
                self.statement(statement, level);
                self.out.push('\n');
            }
            Statement::If { .. } => {
                self.indent(level);
                self.if_statement(statement, level);
                self.out.push('\n');
            }
            Statement::Switch { selector, clauses } => {
                self.indent(level);
                self.out.push_str("switch ");
                self.expression(selector);
                self.out.push_str(" {\n");
                for clause in clauses {
                    self.indent(level + 1);
                    match &clause.selectors {
                        CaseSelectors::DefaultAlone => self.out.push_str("default: "),
                        CaseSelectors::Expressions(exprs) => {
                            self.out.push_str("case ");
                            for (i, e) in exprs.iter().enumerate() {
                                if i > 0 {
                                    self.out.push_str(", ");
                                }
                                match e {
                                    Some(e) => self.expression(e),
                                    None => self.out.push_str("default"),
                                }
                            }
                            self.out.push_str(": ");
                        }
                    }
                    self.statement(&clause.body, level + 1);
                    self.out.push('\n');
                }
                self.indent(level);
                self.out.push_str("}\n");
            }
            Statement::Loop { body, continuing } => {
                self.indent(level);
                self.out.push_str("loop {\n");
                for s in body {
                    self.statement_line(s, level + 1);
                }
                if let Some(continuing) = continuing {
                    self.indent(level + 1);
                    self.out.push_str("continuing {\n");
                    for s in &continuing.statements {
                        self.statement_line(s, level + 2);
                    }
                    if let Some(break_if) = &continuing.break_if {
                        self.indent(level + 2);
                        self.out.push_str("break if ");
                        self.expression(break_if);
                        self.out.push_str(";\n");
                    }
                    self.indent(level + 1);
                    self.out.push_str("}\n");
                }
                self.indent(level);
                self.out.push_str("}\n");
            }
            Statement::For {
                initializer,
                condition,
                update,
                body,
            } => {
                self.indent(level);
                self.out.push_str("for (");
                if let Some(init) = initializer {
                    self.simple_statement_no_semicolon(init);
                }
                self.out.push_str("; ");
                if let Some(condition) = condition {
                    self.expression(condition);
                }
                self.out.push_str("; ");
                if let Some(update) = update {
                    self.simple_statement_no_semicolon(update);
                }
                self.out.push_str(") ");
                self.statement(body, level);
                self.out.push('\n');
            }
            Statement::While { condition, body } => {
                self.indent(level);
                self.out.push_str("while ");
                self.expression(condition);
                self.out.push(' ');
                self.statement(body, level);
                self.out.push('\n');
            }
            Statement::DeadCodeFragment { body }
            | Statement::ControlFlowWrapper { body, .. }
            | Statement::ControlFlowWrapReturn { body, .. }
            | Statement::ControlFlowWrapHelperStatement { body, .. } => {
                self.statement_line(body, level);
            }
            other => {
                self.indent(level);
                self.simple_statement(other);
                self.out.push('\n');
            }
        }
    }

    fn if_statement(&mut self, statement: &Statement, level: usize) {
        if let Statement::If {
            condition,
            then_branch,
            else_branch,
        } = statement
        {
            self.out.push_str("if ");
            self.expression(condition);
            self.out.push(' ');
            self.statement(then_branch, level);
            if let Some(else_branch) = else_branch {
                self.out.push_str(" else ");
                match &**else_branch {
                    Statement::If { .. } => self.if_statement(else_branch, level),
                    other => self.statement(other, level),
                }
            }
        }
    }

    /// Single-line statements (terminated with `;`).
    fn simple_statement(&mut self, statement: &Statement) {
        self.simple_statement_no_semicolon(statement);
        self.out.push(';');
    }

    fn simple_statement_no_semicolon(&mut self, statement: &Statement) {
        match statement {
            Statement::Empty => {}
            Statement::Break => self.out.push_str("break"),
            Statement::Continue => self.out.push_str("continue"),
            Statement::Discard => self.out.push_str("discard"),
            Statement::Return { expression } => {
                self.out.push_str("return");
                if let Some(e) = expression {
                    self.out.push(' ');
                    self.expression(e);
                }
            }
            Statement::ValueDecl {
                kind,
                name,
                ty,
                initializer,
            } => {
                let keyword = match kind {
                    crate::ast::ValueDeclKind::Let => "let",
                    crate::ast::ValueDeclKind::Const => "const",
                };
                let _ = write!(self.out, "{} {}", keyword, name);
                self.optional_annotation(ty);
                self.out.push_str(" = ");
                self.expression(initializer);
            }
            Statement::Variable {
                name,
                ty,
                initializer,
            } => {
                let _ = write!(self.out, "var {}", name);
                self.optional_annotation(ty);
                if let Some(init) = initializer {
                    self.out.push_str(" = ");
                    self.expression(init);
                }
            }
            Statement::Assignment { lhs, operator, rhs } => {
                match lhs {
                    Some(lhs) => self.lhs(lhs),
                    None => self.out.push('_'),
                }
                let _ = write!(self.out, " {} ", operator);
                self.expression(rhs);
            }
            Statement::Increment { target } => {
                self.lhs(target);
                self.out.push_str("++");
            }
            Statement::Decrement { target } => {
                self.lhs(target);
                self.out.push_str("--");
            }
            Statement::FunctionCall {
                callee,
                template,
                arguments,
            } => {
                self.out.push_str(callee);
                if let Some(template) = template {
                    self.out.push('<');
                    self.type_decl(template);
                    self.out.push('>');
                }
                self.call_arguments(arguments);
            }
            Statement::ConstAssert { expression } => {
                self.out.push_str("const_assert ");
                self.expression(expression);
            }
            // Structured statements never appear in single-line positions
            // of a well-formed tree.
            _ => {}
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Expressions
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn call_arguments(&mut self, arguments: &[Rc<Expression>]) {
        self.out.push('(');
        for (i, arg) in arguments.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expression(arg);
        }
        self.out.push(')');
    }

    fn expression(&mut self, expression: &Expression) {
        match expression {
            Expression::BoolLiteral(value) => {
                let _ = write!(self.out, "{}", value);
            }
            Expression::IntLiteral(text) | Expression::FloatLiteral(text) => {
                self.out.push_str(text);
            }
            Expression::Identifier(name) => self.out.push_str(name),
            Expression::Paren(inner) => {
                self.out.push('(');
                self.expression(inner);
                self.out.push(')');
            }
            Expression::Unary { operator, operand } => {
                let _ = write!(self.out, "{}", operator);
                self.expression(operand);
            }
            Expression::Binary { operator, lhs, rhs } => {
                self.expression(lhs);
                let _ = write!(self.out, " {} ", operator);
                self.expression(rhs);
            }
            Expression::FunctionCall {
                callee,
                template,
                arguments,
            } => {
                self.out.push_str(callee);
                if let Some(template) = template {
                    self.out.push('<');
                    self.type_decl(template);
                    self.out.push('>');
                }
                self.call_arguments(arguments);
            }
            Expression::TypeConstructor { ty, arguments } => {
                self.type_decl(ty);
                self.call_arguments(arguments);
            }
            Expression::Member { base, member } => {
                self.expression(base);
                let _ = write!(self.out, ".{}", member);
            }
            Expression::Index { base, index } => {
                self.expression(base);
                self.out.push('[');
                self.expression(index);
                self.out.push(']');
            }
            Expression::Augmented(augmented) => self.augmented(augmented),
        }
    }

    /// Augmented markers print their concrete observable form.
    fn augmented(&mut self, augmented: &AugmentedExpression) {
        match augmented {
            AugmentedExpression::AddZero {
                original,
                zero,
                zero_first,
            } => self.wrapped_binary(original, zero, "+", *zero_first),
            AugmentedExpression::SubZero { original, zero } => {
                self.wrapped_binary(original, zero, "-", false)
            }
            AugmentedExpression::MulOne {
                original,
                one,
                one_first,
            } => self.wrapped_binary(original, one, "*", *one_first),
            AugmentedExpression::DivOne { original, one } => {
                self.wrapped_binary(original, one, "/", false)
            }
            AugmentedExpression::KnownValue { expression, .. } => self.expression(expression),
            AugmentedExpression::IdentityOperation { replacement, .. } => {
                self.expression(replacement)
            }
            AugmentedExpression::FalseByConstruction(inner)
            | AugmentedExpression::TrueByConstruction(inner)
            | AugmentedExpression::ArbitraryExpression(inner) => self.expression(inner),
        }
    }

    fn wrapped_binary(
        &mut self,
        original: &Expression,
        neutral: &Expression,
        operator: &str,
        neutral_first: bool,
    ) {
        self.out.push('(');
        if neutral_first {
            self.expression(neutral);
            let _ = write!(self.out, " {} ", operator);
            self.expression(original);
        } else {
            self.expression(original);
            let _ = write!(self.out, " {} ", operator);
            self.expression(neutral);
        }
        self.out.push(')');
    }

    fn lhs(&mut self, lhs: &LhsExpression) {
        match lhs {
            LhsExpression::Identifier(name) => self.out.push_str(name),
            LhsExpression::Paren(inner) => {
                self.out.push('(');
                self.lhs(inner);
                self.out.push(')');
            }
            LhsExpression::Member { base, member } => {
                self.lhs(base);
                let _ = write!(self.out, ".{}", member);
            }
            LhsExpression::Index { base, index } => {
                self.lhs(base);
                self.out.push('[');
                self.expression(index);
                self.out.push(']');
            }
            LhsExpression::Deref(inner) => {
                self.out.push('*');
                self.lhs(inner);
            }
            LhsExpression::AddressOf(inner) => {
                self.out.push('&');
                self.lhs(inner);
            }
        }
    }
}
