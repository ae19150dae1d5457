//! Hand-written recursive-descent parser for WGSL.
//!
//! Produces the [`crate::ast`] tree; all name and type interpretation is
//! deferred to the resolver. Template lists after `>`-ambiguous heads are
//! handled by splitting `>>`-family tokens in place.

use smol_str::SmolStr;
use std::rc::Rc;
use std::str::FromStr;

use crate::ast::{
    AssignmentOperator, Attribute, BinaryOperator, CaseSelectors, Compound, ContinuingBlock,
    Expression, FormalParameter, FunctionDecl, GlobalDecl, LhsExpression, Statement,
    StructMemberDecl, SwitchClause, TemplateArg, TranslationUnit, TypeDecl, UnaryOperator,
    ValueDeclKind,
};
use crate::error::{Error, Result};
use crate::lexer::{tokenize, Token, TokenStream};
use crate::types::{AccessMode, AddressSpace};

/// Parses a whole WGSL source into a translation unit.
pub fn parse(source: &str) -> Result<TranslationUnit> {
    Parser::new(source).translation_unit()
}

/// Type heads that may be followed by a template list.
fn is_template_head(name: &str) -> bool {
    matches!(
        name,
        "vec2"
            | "vec3"
            | "vec4"
            | "mat2x2"
            | "mat2x3"
            | "mat2x4"
            | "mat3x2"
            | "mat3x3"
            | "mat3x4"
            | "mat4x2"
            | "mat4x3"
            | "mat4x4"
            | "array"
            | "ptr"
            | "atomic"
            | "bitcast"
            | "texture_1d"
            | "texture_2d"
            | "texture_2d_array"
            | "texture_3d"
            | "texture_cube"
            | "texture_cube_array"
            | "texture_multisampled_2d"
            | "texture_storage_1d"
            | "texture_storage_2d"
            | "texture_storage_2d_array"
            | "texture_storage_3d"
    )
}

/// Callee names that denote a value constructor even without a template.
fn is_constructor_name(name: &str) -> bool {
    if matches!(
        name,
        "bool" | "i32" | "u32" | "f32" | "f16" | "vec2" | "vec3" | "vec4" | "array"
    ) {
        return true;
    }
    if let Some(head) = name.strip_suffix(|c| matches!(c, 'f' | 'h' | 'i' | 'u')) {
        if matches!(head, "vec2" | "vec3" | "vec4") {
            return true;
        }
        if let Some(dims) = head.strip_prefix("mat") {
            return matches!(
                dims,
                "2x2" | "2x3" | "2x4" | "3x2" | "3x3" | "3x4" | "4x2" | "4x3" | "4x4"
            ) && matches!(name.chars().last(), Some('f' | 'h'));
        }
    }
    if let Some(dims) = name.strip_prefix("mat") {
        return matches!(
            dims,
            "2x2" | "2x3" | "2x4" | "3x2" | "3x3" | "3x4" | "4x2" | "4x3" | "4x4"
        );
    }
    false
}

struct Parser<'a> {
    stream: TokenStream<'a>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Parser<'a> {
        Parser {
            stream: tokenize(source),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<Token> {
        self.stream.tokens.get(self.pos).map(|(t, _)| *t)
    }

    fn peek2(&self) -> Option<Token> {
        self.stream.tokens.get(self.pos + 1).map(|(t, _)| *t)
    }

    fn check(&self, token: Token) -> bool {
        self.peek() == Some(token)
    }

    fn advance(&mut self) -> Option<(Token, std::ops::Range<usize>)> {
        let item = self.stream.tokens.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.check(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> Error {
        let offset = self
            .stream
            .tokens
            .get(self.pos)
            .map(|(_, span)| span.start)
            .unwrap_or(self.stream.source.len());
        let (line, column) = self.stream.line_col(offset);
        Error::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<std::ops::Range<usize>> {
        if self.check(token) {
            Ok(self.advance().unwrap().1)
        } else {
            Err(self.error_here(format!("expected {}", what)))
        }
    }

    fn identifier(&mut self) -> Result<SmolStr> {
        match self.peek() {
            Some(Token::Identifier) => {
                let (_, span) = self.advance().unwrap();
                Ok(SmolStr::new(self.stream.slice(&span)))
            }
            _ => Err(self.error_here("expected identifier")),
        }
    }

    /// Attribute names may collide with keywords (`@const`, `@diagnostic`).
    fn identifier_like(&mut self) -> Result<SmolStr> {
        match self.peek() {
            Some(t) if t == Token::Identifier || is_keyword(t) => {
                let (_, span) = self.advance().unwrap();
                Ok(SmolStr::new(self.stream.slice(&span)))
            }
            _ => Err(self.error_here("expected attribute name")),
        }
    }

    /// Consumes one `>`, splitting `>>`, `>=` and `>>=` tokens in place.
    fn template_end(&mut self) -> Result<()> {
        let (token, span) = match self.stream.tokens.get(self.pos) {
            Some((t, s)) => (*t, s.clone()),
            None => return Err(self.error_here("expected `>`")),
        };
        let rest = span.start + 1..span.end;
        match token {
            Token::GreaterThan => {
                self.pos += 1;
                Ok(())
            }
            Token::ShiftRight => {
                self.stream.tokens[self.pos] = (Token::GreaterThan, rest);
                Ok(())
            }
            Token::GreaterEqual => {
                self.stream.tokens[self.pos] = (Token::Equal, rest);
                Ok(())
            }
            Token::ShiftRightEqual => {
                self.stream.tokens[self.pos] = (Token::GreaterEqual, rest);
                Ok(())
            }
            _ => Err(self.error_here("expected `>`")),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Module level
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn translation_unit(&mut self) -> Result<TranslationUnit> {
        let mut directives = Vec::new();
        while matches!(
            self.peek(),
            Some(Token::Enable | Token::Requires | Token::Diagnostic)
        ) {
            directives.push(self.directive()?);
        }
        let mut declarations = Vec::new();
        while self.peek().is_some() {
            declarations.push(Rc::new(self.global_decl()?));
        }
        Ok(TranslationUnit {
            directives,
            declarations,
        })
    }

    /// Directives are kept as opaque source text, up to and including the
    /// terminating semicolon.
    fn directive(&mut self) -> Result<SmolStr> {
        let start = self.stream.tokens[self.pos].1.start;
        loop {
            match self.advance() {
                Some((Token::Semicolon, span)) => {
                    let text = &self.stream.source[start..span.end];
                    return Ok(SmolStr::new(text.trim()));
                }
                Some(_) => {}
                None => return Err(self.error_here("unterminated directive")),
            }
        }
    }

    fn global_decl(&mut self) -> Result<GlobalDecl> {
        if self.eat(Token::Semicolon) {
            return Ok(GlobalDecl::Empty);
        }
        let attributes = self.attributes()?;
        match self.peek() {
            Some(Token::Const) => {
                self.advance();
                let name = self.identifier()?;
                let ty = self.optional_type_annotation()?;
                self.expect(Token::Equal, "`=`")?;
                let initializer = self.expression()?;
                self.expect(Token::Semicolon, "`;`")?;
                Ok(GlobalDecl::Constant { name, ty, initializer })
            }
            Some(Token::Override) => {
                self.advance();
                let name = self.identifier()?;
                let ty = self.optional_type_annotation()?;
                let initializer = if self.eat(Token::Equal) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect(Token::Semicolon, "`;`")?;
                Ok(GlobalDecl::Override {
                    attributes,
                    name,
                    ty,
                    initializer,
                })
            }
            Some(Token::Var) => {
                self.advance();
                let (address_space, access_mode) = self.var_template()?;
                let name = self.identifier()?;
                let ty = self.optional_type_annotation()?;
                let initializer = if self.eat(Token::Equal) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect(Token::Semicolon, "`;`")?;
                Ok(GlobalDecl::Variable {
                    attributes,
                    name,
                    address_space,
                    access_mode,
                    ty,
                    initializer,
                })
            }
            Some(Token::Fn) => {
                self.advance();
                let name = self.identifier()?;
                self.expect(Token::ParenLeft, "`(`")?;
                let mut parameters = Vec::new();
                while !self.check(Token::ParenRight) {
                    let param_attrs = self.attributes()?;
                    let param_name = self.identifier()?;
                    self.expect(Token::Colon, "`:`")?;
                    let param_ty = self.type_decl()?;
                    parameters.push(FormalParameter {
                        attributes: param_attrs,
                        name: param_name,
                        ty: param_ty,
                    });
                    if !self.eat(Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::ParenRight, "`)`")?;
                let (return_attributes, return_type) = if self.eat(Token::Arrow) {
                    let attrs = self.attributes()?;
                    (attrs, Some(self.type_decl()?))
                } else {
                    (Vec::new(), None)
                };
                let body = self.compound()?;
                Ok(GlobalDecl::Function(Rc::new(FunctionDecl {
                    attributes,
                    name,
                    parameters,
                    return_attributes,
                    return_type,
                    body,
                })))
            }
            Some(Token::Struct) => {
                self.advance();
                let name = self.identifier()?;
                self.expect(Token::BraceLeft, "`{`")?;
                let mut members = Vec::new();
                while !self.check(Token::BraceRight) {
                    let member_attrs = self.attributes()?;
                    let member_name = self.identifier()?;
                    self.expect(Token::Colon, "`:`")?;
                    let member_ty = self.type_decl()?;
                    members.push(StructMemberDecl {
                        attributes: member_attrs,
                        name: member_name,
                        ty: member_ty,
                    });
                    if !self.eat(Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::BraceRight, "`}`")?;
                Ok(GlobalDecl::Struct { name, members })
            }
            Some(Token::Alias) => {
                self.advance();
                let name = self.identifier()?;
                self.expect(Token::Equal, "`=`")?;
                let ty = self.type_decl()?;
                self.expect(Token::Semicolon, "`;`")?;
                Ok(GlobalDecl::TypeAlias { name, ty })
            }
            Some(Token::ConstAssert) => {
                self.advance();
                let expression = self.expression()?;
                self.expect(Token::Semicolon, "`;`")?;
                Ok(GlobalDecl::ConstAssert { expression })
            }
            _ => Err(self.error_here("expected global declaration")),
        }
    }

    fn var_template(&mut self) -> Result<(Option<AddressSpace>, Option<AccessMode>)> {
        if !self.eat(Token::LessThan) {
            return Ok((None, None));
        }
        let space_name = self.identifier()?;
        let space = AddressSpace::from_str(&space_name)
            .map_err(|_| self.error_here(format!("unknown address space `{}`", space_name)))?;
        let access = if self.eat(Token::Comma) {
            let access_name = self.identifier()?;
            Some(
                AccessMode::from_str(&access_name).map_err(|_| {
                    self.error_here(format!("unknown access mode `{}`", access_name))
                })?,
            )
        } else {
            None
        };
        self.template_end()?;
        Ok((Some(space), access))
    }

    fn attributes(&mut self) -> Result<Vec<Attribute>> {
        let mut attributes = Vec::new();
        while self.eat(Token::At) {
            let name = self.identifier_like()?;
            let mut args = Vec::new();
            if self.eat(Token::ParenLeft) {
                while !self.check(Token::ParenRight) {
                    args.push(self.expression()?);
                    if !self.eat(Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::ParenRight, "`)`")?;
            }
            attributes.push(Attribute { name, args });
        }
        Ok(attributes)
    }

    fn optional_type_annotation(&mut self) -> Result<Option<Rc<TypeDecl>>> {
        if self.eat(Token::Colon) {
            Ok(Some(self.type_decl()?))
        } else {
            Ok(None)
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Types
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn type_decl(&mut self) -> Result<Rc<TypeDecl>> {
        let name = self.identifier()?;
        self.type_decl_with_name(name)
    }

    fn type_decl_with_name(&mut self, name: SmolStr) -> Result<Rc<TypeDecl>> {
        let mut template = Vec::new();
        if self.check(Token::LessThan) {
            self.advance();
            loop {
                template.push(self.template_arg()?);
                if !self.eat(Token::Comma) {
                    break;
                }
            }
            self.template_end()?;
        }
        Ok(Rc::new(TypeDecl { name, template }))
    }

    /// An argument starting with an identifier is a (possibly templated)
    /// type; anything else is a restricted expression. The resolver
    /// reinterprets named types as constants where a count is expected.
    fn template_arg(&mut self) -> Result<TemplateArg> {
        if self.check(Token::Identifier) {
            Ok(TemplateArg::Type(self.type_decl()?))
        } else {
            // No relational/shift operators inside template lists; stop at
            // the additive level so `>` closes the template.
            Ok(TemplateArg::Expression(self.additive_expression()?))
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Statements
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn compound(&mut self) -> Result<Rc<Statement>> {
        self.expect(Token::BraceLeft, "`{`")?;
        let mut statements = Vec::new();
        while !self.check(Token::BraceRight) {
            statements.push(self.statement()?);
        }
        self.expect(Token::BraceRight, "`}`")?;
        Ok(Rc::new(Statement::Compound(Compound::new(statements))))
    }

    fn statement(&mut self) -> Result<Rc<Statement>> {
        match self.peek() {
            Some(Token::BraceLeft) => self.compound(),
            Some(Token::Semicolon) => {
                self.advance();
                Ok(Rc::new(Statement::Empty))
            }
            Some(Token::Break) => {
                self.advance();
                self.expect(Token::Semicolon, "`;`")?;
                Ok(Rc::new(Statement::Break))
            }
            Some(Token::Continue) => {
                self.advance();
                self.expect(Token::Semicolon, "`;`")?;
                Ok(Rc::new(Statement::Continue))
            }
            Some(Token::Discard) => {
                self.advance();
                self.expect(Token::Semicolon, "`;`")?;
                Ok(Rc::new(Statement::Discard))
            }
            Some(Token::Return) => {
                self.advance();
                let expression = if self.check(Token::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(Token::Semicolon, "`;`")?;
                Ok(Rc::new(Statement::Return { expression }))
            }
            Some(Token::ConstAssert) => {
                self.advance();
                let expression = self.expression()?;
                self.expect(Token::Semicolon, "`;`")?;
                Ok(Rc::new(Statement::ConstAssert { expression }))
            }
            Some(Token::Let) | Some(Token::Const) => {
                let kind = if self.advance().unwrap().0 == Token::Let {
                    ValueDeclKind::Let
                } else {
                    ValueDeclKind::Const
                };
                let name = self.identifier()?;
                let ty = self.optional_type_annotation()?;
                self.expect(Token::Equal, "`=`")?;
                let initializer = self.expression()?;
                self.expect(Token::Semicolon, "`;`")?;
                Ok(Rc::new(Statement::ValueDecl {
                    kind,
                    name,
                    ty,
                    initializer,
                }))
            }
            Some(Token::Var) => {
                self.advance();
                let name = self.identifier()?;
                let ty = self.optional_type_annotation()?;
                let initializer = if self.eat(Token::Equal) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.expect(Token::Semicolon, "`;`")?;
                Ok(Rc::new(Statement::Variable { name, ty, initializer }))
            }
            Some(Token::If) => self.if_statement(),
            Some(Token::Switch) => self.switch_statement(),
            Some(Token::Loop) => self.loop_statement(),
            Some(Token::For) => self.for_statement(),
            Some(Token::While) => {
                self.advance();
                let condition = self.expression()?;
                let body = self.compound()?;
                Ok(Rc::new(Statement::While { condition, body }))
            }
            Some(
                Token::Identifier
                | Token::Underscore
                | Token::Star
                | Token::Amp
                | Token::ParenLeft,
            ) => {
                let stmt = self.simple_statement()?;
                self.expect(Token::Semicolon, "`;`")?;
                Ok(Rc::new(stmt))
            }
            _ => Err(self.error_here("expected statement")),
        }
    }

    fn if_statement(&mut self) -> Result<Rc<Statement>> {
        self.expect(Token::If, "`if`")?;
        let condition = self.expression()?;
        let then_branch = self.compound()?;
        let else_branch = if self.eat(Token::Else) {
            if self.check(Token::If) {
                Some(self.if_statement()?)
            } else {
                Some(self.compound()?)
            }
        } else {
            None
        };
        Ok(Rc::new(Statement::If {
            condition,
            then_branch,
            else_branch,
        }))
    }

    fn switch_statement(&mut self) -> Result<Rc<Statement>> {
        self.expect(Token::Switch, "`switch`")?;
        let selector = self.expression()?;
        self.expect(Token::BraceLeft, "`{`")?;
        let mut clauses = Vec::new();
        while !self.check(Token::BraceRight) {
            let selectors = match self.peek() {
                Some(Token::Default) => {
                    self.advance();
                    CaseSelectors::DefaultAlone
                }
                Some(Token::Case) => {
                    self.advance();
                    let mut exprs = Vec::new();
                    loop {
                        if self.eat(Token::Default) {
                            exprs.push(None);
                        } else {
                            exprs.push(Some(self.expression()?));
                        }
                        if !self.eat(Token::Comma) {
                            break;
                        }
                    }
                    CaseSelectors::Expressions(exprs)
                }
                _ => return Err(self.error_here("expected `case` or `default`")),
            };
            self.eat(Token::Colon);
            let body = self.compound()?;
            clauses.push(SwitchClause { selectors, body });
        }
        self.expect(Token::BraceRight, "`}`")?;
        Ok(Rc::new(Statement::Switch { selector, clauses }))
    }

    fn loop_statement(&mut self) -> Result<Rc<Statement>> {
        self.expect(Token::Loop, "`loop`")?;
        self.expect(Token::BraceLeft, "`{`")?;
        let mut body = Vec::new();
        let mut continuing = None;
        loop {
            match self.peek() {
                Some(Token::BraceRight) => break,
                Some(Token::Continuing) => {
                    self.advance();
                    continuing = Some(self.continuing_block()?);
                    break;
                }
                _ => body.push(self.statement()?),
            }
        }
        self.expect(Token::BraceRight, "`}`")?;
        Ok(Rc::new(Statement::Loop { body, continuing }))
    }

    fn continuing_block(&mut self) -> Result<ContinuingBlock> {
        self.expect(Token::BraceLeft, "`{`")?;
        let mut statements = Vec::new();
        let mut break_if = None;
        loop {
            match self.peek() {
                Some(Token::BraceRight) => break,
                Some(Token::Break) if self.peek2() == Some(Token::If) => {
                    self.advance();
                    self.advance();
                    break_if = Some(self.expression()?);
                    self.expect(Token::Semicolon, "`;`")?;
                    break;
                }
                _ => statements.push(self.statement()?),
            }
        }
        self.expect(Token::BraceRight, "`}`")?;
        Ok(ContinuingBlock {
            statements,
            break_if,
        })
    }

    fn for_statement(&mut self) -> Result<Rc<Statement>> {
        self.expect(Token::For, "`for`")?;
        self.expect(Token::ParenLeft, "`(`")?;
        let initializer = if self.check(Token::Semicolon) {
            None
        } else {
            Some(Rc::new(self.for_init()?))
        };
        self.expect(Token::Semicolon, "`;`")?;
        let condition = if self.check(Token::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(Token::Semicolon, "`;`")?;
        let update = if self.check(Token::ParenRight) {
            None
        } else {
            Some(Rc::new(self.simple_statement()?))
        };
        self.expect(Token::ParenRight, "`)`")?;
        let body = self.compound()?;
        Ok(Rc::new(Statement::For {
            initializer,
            condition,
            update,
            body,
        }))
    }

    fn for_init(&mut self) -> Result<Statement> {
        match self.peek() {
            Some(Token::Var) => {
                self.advance();
                let name = self.identifier()?;
                let ty = self.optional_type_annotation()?;
                let initializer = if self.eat(Token::Equal) {
                    Some(self.expression()?)
                } else {
                    None
                };
                Ok(Statement::Variable { name, ty, initializer })
            }
            Some(Token::Let) | Some(Token::Const) => {
                let kind = if self.advance().unwrap().0 == Token::Let {
                    ValueDeclKind::Let
                } else {
                    ValueDeclKind::Const
                };
                let name = self.identifier()?;
                let ty = self.optional_type_annotation()?;
                self.expect(Token::Equal, "`=`")?;
                let initializer = self.expression()?;
                Ok(Statement::ValueDecl {
                    kind,
                    name,
                    ty,
                    initializer,
                })
            }
            _ => self.simple_statement(),
        }
    }

    /// Call, assignment, phantom assignment, increment or decrement,
    /// without the trailing semicolon (shared with for-loop headers).
    fn simple_statement(&mut self) -> Result<Statement> {
        if self.eat(Token::Underscore) {
            self.expect(Token::Equal, "`=`")?;
            let rhs = self.expression()?;
            return Ok(Statement::Assignment {
                lhs: None,
                operator: AssignmentOperator::Assign,
                rhs,
            });
        }
        if self.check(Token::Identifier) && self.peek2() == Some(Token::ParenLeft) {
            let callee = self.identifier()?;
            let arguments = self.call_arguments()?;
            return Ok(Statement::FunctionCall {
                callee,
                template: None,
                arguments,
            });
        }
        let lhs = self.lhs_expression()?;
        match self.peek() {
            Some(Token::PlusPlus) => {
                self.advance();
                Ok(Statement::Increment { target: lhs })
            }
            Some(Token::MinusMinus) => {
                self.advance();
                Ok(Statement::Decrement { target: lhs })
            }
            Some(token) => {
                let operator = match token {
                    Token::Equal => AssignmentOperator::Assign,
                    Token::PlusEqual => AssignmentOperator::AddAssign,
                    Token::MinusEqual => AssignmentOperator::SubAssign,
                    Token::StarEqual => AssignmentOperator::MulAssign,
                    Token::SlashEqual => AssignmentOperator::DivAssign,
                    Token::PercentEqual => AssignmentOperator::ModAssign,
                    Token::AmpEqual => AssignmentOperator::AndAssign,
                    Token::PipeEqual => AssignmentOperator::OrAssign,
                    Token::CaretEqual => AssignmentOperator::XorAssign,
                    Token::ShiftLeftEqual => AssignmentOperator::ShlAssign,
                    Token::ShiftRightEqual => AssignmentOperator::ShrAssign,
                    _ => return Err(self.error_here("expected assignment operator")),
                };
                self.advance();
                let rhs = self.expression()?;
                Ok(Statement::Assignment {
                    lhs: Some(lhs),
                    operator,
                    rhs,
                })
            }
            None => Err(self.error_here("expected assignment operator")),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // LHS expressions
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn lhs_expression(&mut self) -> Result<Rc<LhsExpression>> {
        match self.peek() {
            Some(Token::Star) => {
                self.advance();
                Ok(Rc::new(LhsExpression::Deref(self.lhs_expression()?)))
            }
            Some(Token::Amp) => {
                self.advance();
                Ok(Rc::new(LhsExpression::AddressOf(self.lhs_expression()?)))
            }
            _ => self.lhs_postfix(),
        }
    }

    fn lhs_postfix(&mut self) -> Result<Rc<LhsExpression>> {
        let mut base = match self.peek() {
            Some(Token::Identifier) => Rc::new(LhsExpression::Identifier(self.identifier()?)),
            Some(Token::ParenLeft) => {
                self.advance();
                let inner = self.lhs_expression()?;
                self.expect(Token::ParenRight, "`)`")?;
                Rc::new(LhsExpression::Paren(inner))
            }
            _ => return Err(self.error_here("expected assignment target")),
        };
        loop {
            match self.peek() {
                Some(Token::Period) => {
                    self.advance();
                    let member = self.identifier()?;
                    base = Rc::new(LhsExpression::Member { base, member });
                }
                Some(Token::BracketLeft) => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Token::BracketRight, "`]`")?;
                    base = Rc::new(LhsExpression::Index { base, index });
                }
                _ => return Ok(base),
            }
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // Expressions
    ////////////////////////////////////////////////////////////////////////////////////////////////

    fn expression(&mut self) -> Result<Rc<Expression>> {
        self.short_circuit_or_expression()
    }

    fn binary_ladder(
        &mut self,
        next: fn(&mut Self) -> Result<Rc<Expression>>,
        table: &[(Token, BinaryOperator)],
    ) -> Result<Rc<Expression>> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, operator) in table {
                if self.check(*token) {
                    self.advance();
                    let rhs = next(self)?;
                    lhs = Rc::new(Expression::Binary {
                        operator: *operator,
                        lhs,
                        rhs,
                    });
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn short_circuit_or_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::short_circuit_and_expression,
            &[(Token::PipePipe, BinaryOperator::ShortCircuitOr)],
        )
    }

    fn short_circuit_and_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::bitwise_or_expression,
            &[(Token::AmpAmp, BinaryOperator::ShortCircuitAnd)],
        )
    }

    fn bitwise_or_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::bitwise_xor_expression,
            &[(Token::Pipe, BinaryOperator::BitOr)],
        )
    }

    fn bitwise_xor_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::bitwise_and_expression,
            &[(Token::Caret, BinaryOperator::BitXor)],
        )
    }

    fn bitwise_and_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::equality_expression,
            &[(Token::Amp, BinaryOperator::BitAnd)],
        )
    }

    fn equality_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::relational_expression,
            &[
                (Token::EqualEqual, BinaryOperator::Equal),
                (Token::NotEqual, BinaryOperator::NotEqual),
            ],
        )
    }

    fn relational_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::shift_expression,
            &[
                (Token::LessEqual, BinaryOperator::LessEqual),
                (Token::GreaterEqual, BinaryOperator::GreaterEqual),
                (Token::LessThan, BinaryOperator::LessThan),
                (Token::GreaterThan, BinaryOperator::GreaterThan),
            ],
        )
    }

    fn shift_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::additive_expression,
            &[
                (Token::ShiftLeft, BinaryOperator::ShiftLeft),
                (Token::ShiftRight, BinaryOperator::ShiftRight),
            ],
        )
    }

    fn additive_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::multiplicative_expression,
            &[
                (Token::Plus, BinaryOperator::Add),
                (Token::Minus, BinaryOperator::Sub),
            ],
        )
    }

    fn multiplicative_expression(&mut self) -> Result<Rc<Expression>> {
        self.binary_ladder(
            Self::unary_expression,
            &[
                (Token::Star, BinaryOperator::Mul),
                (Token::Slash, BinaryOperator::Div),
                (Token::Percent, BinaryOperator::Mod),
            ],
        )
    }

    fn unary_expression(&mut self) -> Result<Rc<Expression>> {
        let operator = match self.peek() {
            Some(Token::Minus) => UnaryOperator::Negate,
            Some(Token::Bang) => UnaryOperator::Not,
            Some(Token::Tilde) => UnaryOperator::Complement,
            Some(Token::Star) => UnaryOperator::Deref,
            Some(Token::Amp) => UnaryOperator::AddressOf,
            _ => return self.postfix_expression(),
        };
        self.advance();
        let operand = self.unary_expression()?;
        Ok(Rc::new(Expression::Unary { operator, operand }))
    }

    fn postfix_expression(&mut self) -> Result<Rc<Expression>> {
        let mut base = self.primary_expression()?;
        loop {
            match self.peek() {
                Some(Token::Period) => {
                    self.advance();
                    let member = self.identifier()?;
                    base = Rc::new(Expression::Member { base, member });
                }
                Some(Token::BracketLeft) => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Token::BracketRight, "`]`")?;
                    base = Rc::new(Expression::Index { base, index });
                }
                _ => return Ok(base),
            }
        }
    }

    fn primary_expression(&mut self) -> Result<Rc<Expression>> {
        match self.peek() {
            Some(Token::True) => {
                self.advance();
                Ok(Rc::new(Expression::BoolLiteral(true)))
            }
            Some(Token::False) => {
                self.advance();
                Ok(Rc::new(Expression::BoolLiteral(false)))
            }
            Some(Token::IntLiteral) => {
                let (_, span) = self.advance().unwrap();
                Ok(Rc::new(Expression::IntLiteral(SmolStr::new(
                    self.stream.slice(&span),
                ))))
            }
            Some(Token::FloatLiteral) => {
                let (_, span) = self.advance().unwrap();
                Ok(Rc::new(Expression::FloatLiteral(SmolStr::new(
                    self.stream.slice(&span),
                ))))
            }
            Some(Token::ParenLeft) => {
                self.advance();
                let inner = self.expression()?;
                self.expect(Token::ParenRight, "`)`")?;
                Ok(Rc::new(Expression::Paren(inner)))
            }
            Some(Token::Identifier) => {
                let name = self.identifier()?;
                if is_template_head(&name) && self.check(Token::LessThan) {
                    if name == "bitcast" {
                        self.advance();
                        let target = self.type_decl()?;
                        self.template_end()?;
                        let arguments = self.call_arguments()?;
                        return Ok(Rc::new(Expression::FunctionCall {
                            callee: name,
                            template: Some(target),
                            arguments,
                        }));
                    }
                    let ty = self.type_decl_with_name(name)?;
                    let arguments = self.call_arguments()?;
                    return Ok(Rc::new(Expression::TypeConstructor { ty, arguments }));
                }
                if self.check(Token::ParenLeft) {
                    let arguments = self.call_arguments()?;
                    if is_constructor_name(&name) {
                        return Ok(Rc::new(Expression::TypeConstructor {
                            ty: Rc::new(TypeDecl::plain(name)),
                            arguments,
                        }));
                    }
                    return Ok(Rc::new(Expression::FunctionCall {
                        callee: name,
                        template: None,
                        arguments,
                    }));
                }
                Ok(Rc::new(Expression::Identifier(name)))
            }
            _ => Err(self.error_here("expected expression")),
        }
    }

    fn call_arguments(&mut self) -> Result<Vec<Rc<Expression>>> {
        self.expect(Token::ParenLeft, "`(`")?;
        let mut arguments = Vec::new();
        while !self.check(Token::ParenRight) {
            arguments.push(self.expression()?);
            if !self.eat(Token::Comma) {
                break;
            }
        }
        self.expect(Token::ParenRight, "`)`")?;
        Ok(arguments)
    }
}

fn is_keyword(token: Token) -> bool {
    matches!(
        token,
        Token::Alias
            | Token::Break
            | Token::Case
            | Token::Const
            | Token::ConstAssert
            | Token::Continue
            | Token::Continuing
            | Token::Default
            | Token::Diagnostic
            | Token::Discard
            | Token::Else
            | Token::Enable
            | Token::False
            | Token::Fn
            | Token::For
            | Token::If
            | Token::Let
            | Token::Loop
            | Token::Override
            | Token::Requires
            | Token::Return
            | Token::Struct
            | Token::Switch
            | Token::True
            | Token::Var
            | Token::While
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;

    fn parse_ok(src: &str) -> TranslationUnit {
        match parse(src) {
            Ok(tu) => tu,
            Err(e) => panic!("parse failed for {:?}: {}", src, e),
        }
    }

    #[test]
    fn parses_global_shapes() {
        let tu = parse_ok(
            "enable f16;\n\
             const one = 1;\n\
             @group(0) @binding(0) var<storage, read_write> s : i32;\n\
             struct S { a : i32, b : vec3<f32>, }\n\
             alias T = i32;\n\
             fn f(a : u32) -> i32 { return 0; }\n",
        );
        assert_eq!(tu.directives.len(), 1);
        assert_eq!(tu.directives[0], "enable f16;");
        assert_eq!(tu.declarations.len(), 6);
    }

    #[test]
    fn splits_nested_template_close() {
        let tu = parse_ok("var<private> a : array<vec4<f32>>;\nfn f() {}\n");
        match &*tu.declarations[0] {
            GlobalDecl::Variable { ty: Some(ty), .. } => {
                assert_eq!(ty.name, "array");
                match &ty.template[0] {
                    TemplateArg::Type(inner) => assert_eq!(inner.name, "vec4"),
                    other => panic!("unexpected template arg {:?}", other),
                }
            }
            other => panic!("unexpected decl {:?}", other),
        }
    }

    #[test]
    fn constructor_vs_call() {
        let tu = parse_ok("fn f() { let a = vec3<f32>(1.0); let b = vec3f(); let c = g(); }");
        let body = match &*tu.declarations[0] {
            GlobalDecl::Function(f) => &f.body,
            _ => unreachable!(),
        };
        let stmts = match &**body {
            Statement::Compound(c) => &c.statements,
            _ => unreachable!(),
        };
        let init = |i: usize| match &*stmts[i] {
            Statement::ValueDecl { initializer, .. } => initializer.clone(),
            _ => unreachable!(),
        };
        assert!(matches!(&*init(0), Expression::TypeConstructor { .. }));
        assert!(matches!(&*init(1), Expression::TypeConstructor { .. }));
        assert!(matches!(&*init(2), Expression::FunctionCall { .. }));
    }

    #[test]
    fn loop_with_continuing_and_break_if() {
        let tu = parse_ok(
            "fn f() { var i : i32; loop { i = i + 1; continuing { i = i * 2; break if i > 4; } } }",
        );
        let body = match &*tu.declarations[0] {
            GlobalDecl::Function(f) => &f.body,
            _ => unreachable!(),
        };
        let stmts = match &**body {
            Statement::Compound(c) => &c.statements,
            _ => unreachable!(),
        };
        match &*stmts[1] {
            Statement::Loop { body, continuing } => {
                assert_eq!(body.len(), 1);
                let continuing = continuing.as_ref().unwrap();
                assert_eq!(continuing.statements.len(), 1);
                assert!(continuing.break_if.is_some());
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn switch_selectors() {
        let tu = parse_ok(
            "fn f(x : i32) { switch x { case 1, 2: {} case default, 3: {} default: {} } }",
        );
        let body = match &*tu.declarations[0] {
            GlobalDecl::Function(f) => &f.body,
            _ => unreachable!(),
        };
        let stmts = match &**body {
            Statement::Compound(c) => &c.statements,
            _ => unreachable!(),
        };
        match &*stmts[0] {
            Statement::Switch { clauses, .. } => {
                assert_eq!(clauses.len(), 3);
                match &clauses[1].selectors {
                    CaseSelectors::Expressions(exprs) => {
                        assert!(exprs[0].is_none());
                        assert!(exprs[1].is_some());
                    }
                    other => panic!("unexpected selectors {:?}", other),
                }
                assert!(matches!(clauses[2].selectors, CaseSelectors::DefaultAlone));
            }
            other => panic!("unexpected statement {:?}", other),
        }
    }

    #[test]
    fn phantom_assignment_and_lhs_forms() {
        parse_ok("fn f() { var a : i32; _ = a; a = 1; (a) = 2; a += 3; }");
        parse_ok("fn f(p : ptr<function, i32>) { *p = 1; }");
        parse_ok("fn f() { var v : vec3<f32>; v.x = 1.0; v[0] = 2.0; }");
    }

    #[test]
    fn parse_error_carries_position() {
        match parse("fn f( {") {
            Err(Error::Parse { line, column, .. }) => {
                assert_eq!(line, 1);
                assert!(column >= 6);
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
