//! Recursive-descent parser with operator-precedence expression parsing
//! and resync-based error recovery: a malformed definition is skipped to
//! the next top-level identifier or `}` rather than aborting the parse.

use std::fmt;

use std::collections::HashSet;

use crate::ast::{
    Annotation, AnnotationKind, BinOp, Configuration, Definition, DocTable, Position, PragmaTable, TemplateArg,
    TemplateParam, UnaryOp, Value,
};
use crate::lexer::{Lexer, Token, TokenKind};

#[derive(Debug, Clone, PartialEq)]
pub enum ParserDiagnostic {
    ExpectedEquals(Position),
    ExpectedCloseBrace(Position),
    UnexpectedToken(Position, String),
    UnclosedBlock(Position, &'static str),
}

impl fmt::Display for ParserDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserDiagnostic::ExpectedEquals(p) => write!(f, "{p}: expected '='"),
            ParserDiagnostic::ExpectedCloseBrace(p) => write!(f, "{p}: expected '}}'"),
            ParserDiagnostic::UnexpectedToken(p, t) => write!(f, "{p}: unexpected token '{t}'"),
            ParserDiagnostic::UnclosedBlock(p, kind) => write!(f, "{p}: unclosed '{kind}' block"),
        }
    }
}

impl std::error::Error for ParserDiagnostic {}

impl ParserDiagnostic {
    pub fn position(&self) -> Position {
        match self {
            ParserDiagnostic::ExpectedEquals(p)
            | ParserDiagnostic::ExpectedCloseBrace(p)
            | ParserDiagnostic::UnexpectedToken(p, _)
            | ParserDiagnostic::UnclosedBlock(p, _) => *p,
        }
    }

    pub fn to_diagnostic(&self, file: &std::path::Path) -> crate::diagnostics::Diagnostic {
        crate::diagnostics::Diagnostic::error(crate::diagnostics::Kind::Parse, file, self.position(), self.to_string())
    }
}

/// Parses a full source file. Never fails outright: malformed
/// constructs are recorded as diagnostics and parsing resumes.
pub fn parse(text: &str) -> (Configuration, DocTable, PragmaTable, Vec<ParserDiagnostic>) {
    let (tokens, lex_errors) = Lexer::new(text).tokenize();
    let mut errors: Vec<ParserDiagnostic> = lex_errors
        .iter()
        .map(|e| ParserDiagnostic::UnexpectedToken(lex_error_pos(e), e.to_string()))
        .collect();
    let mut parser = Parser::new(tokens);
    let mut config = parser.parse_file();
    errors.extend(parser.errors);

    let first_def_line = config.definitions.first().map(|d| d.pos().line);
    config.header_pragmas = config
        .pragmas
        .iter()
        .filter(|a| !parser.attached_pragma_positions.contains(&(a.pos.line, a.pos.column)))
        .filter(|a| first_def_line.map_or(true, |l| a.pos.line <= l))
        .map(|a| a.text.clone())
        .collect();

    (config, parser.docs, parser.pragma_table, errors)
}

fn lex_error_pos(e: &crate::lexer::LexError) -> Position {
    use crate::lexer::LexError::*;
    match e {
        UnterminatedString(p) | UnterminatedBlockComment(p) | InvalidNumber(p, _) | InvalidCharacter(p, _) => *p,
    }
}

struct Parser {
    tokens: Vec<Token>,
    idx: usize,
    errors: Vec<ParserDiagnostic>,
    docs: DocTable,
    pending_doc: Vec<String>,
    pragma_table: PragmaTable,
    pending_pragma: Vec<(String, Position)>,
    attached_pragma_positions: HashSet<(u32, u32)>,
    last_annotation_line: Option<u32>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            idx: 0,
            errors: Vec::new(),
            docs: DocTable::default(),
            pending_doc: Vec::new(),
            pragma_table: PragmaTable::default(),
            pending_pragma: Vec::new(),
            attached_pragma_positions: HashSet::new(),
            last_annotation_line: None,
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.idx.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn pos(&self) -> Position {
        self.peek().pos
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.idx.min(self.tokens.len() - 1)].clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn is_symbol(&self, c: char) -> bool {
        matches!(self.peek_kind(), TokenKind::Symbol(s) if *s == c)
    }

    fn is_directive(&self, word: &str) -> bool {
        matches!(self.peek_kind(), TokenKind::Directive(w) if w == word)
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if self.is_symbol(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skips comment/doc/pragma tokens, recording them and updating the
    /// pending-doc accumulator. A blank line (gap of more than one line
    /// since the last annotation) breaks a doc chain, per the "exactly
    /// one line, or contiguous chain" attachment rule.
    fn skip_trivia(&mut self, comments: &mut Vec<Annotation>, pragmas: &mut Vec<Annotation>) {
        loop {
            let tok = self.peek().clone();
            match &tok.kind {
                TokenKind::Comment(text) => {
                    comments.push(Annotation { text: text.clone(), pos: tok.pos, kind: AnnotationKind::Comment });
                    self.pending_doc.clear();
                    self.advance();
                }
                TokenKind::Docstring(text) => {
                    if let Some(last) = self.last_annotation_line {
                        if tok.pos.line > last + 1 {
                            self.pending_doc.clear();
                        }
                    }
                    comments.push(Annotation { text: text.clone(), pos: tok.pos, kind: AnnotationKind::Doc });
                    self.pending_doc.push(text.clone());
                    self.last_annotation_line = Some(tok.pos.line);
                    self.advance();
                }
                TokenKind::Pragma(text) => {
                    if let Some(last) = self.last_annotation_line {
                        if tok.pos.line > last + 1 {
                            self.pending_pragma.clear();
                        }
                    }
                    pragmas.push(Annotation { text: text.clone(), pos: tok.pos, kind: AnnotationKind::Pragma });
                    self.pending_pragma.push((text.clone(), tok.pos));
                    self.last_annotation_line = Some(tok.pos.line);
                    self.advance();
                }
                _ => break,
            }
        }
    }

    fn attach_pending_doc(&mut self, target: Position) {
        if self.pending_doc.is_empty() {
            return;
        }
        if let Some(last_line) = self.last_annotation_line {
            if target.line > last_line + 1 {
                self.pending_doc.clear();
                return;
            }
        }
        let doc = self.pending_doc.join("\n");
        self.docs.by_pos.insert((target.line, target.column), doc);
        self.pending_doc.clear();
    }

    fn attach_pending_pragma(&mut self, target: Position) {
        if self.pending_pragma.is_empty() {
            return;
        }
        if let Some(last_line) = self.last_annotation_line {
            if target.line > last_line + 1 {
                self.pending_pragma.clear();
                return;
            }
        }
        let mut texts = Vec::new();
        for (text, pos) in self.pending_pragma.drain(..) {
            self.attached_pragma_positions.insert((pos.line, pos.column));
            texts.push(text);
        }
        self.pragma_table
            .by_pos
            .entry((target.line, target.column))
            .or_default()
            .extend(texts);
    }

    fn parse_file(&mut self) -> Configuration {
        let mut config = Configuration::default();

        if self.is_directive("package") {
            self.advance();
            let mut path = String::new();
            loop {
                match self.peek_kind().clone() {
                    TokenKind::Identifier(name) => {
                        path.push_str(&name);
                        self.advance();
                    }
                    _ => break,
                }
                if self.eat_symbol('.') {
                    path.push('.');
                } else {
                    break;
                }
            }
            config.package = Some(path);
        }

        loop {
            self.skip_trivia(&mut config.comments, &mut config.pragmas);
            if self.at_eof() {
                break;
            }
            if self.is_directive("end") || self.is_directive("else") {
                // Stray block terminator at top level: resync past it.
                self.errors
                    .push(ParserDiagnostic::UnexpectedToken(self.pos(), format!("{:?}", self.peek_kind())));
                self.advance();
                continue;
            }
            match self.parse_definition() {
                Some(def) => config.definitions.push(def),
                None => self.resync(),
            }
        }
        config
    }

    /// Skips to the next top-level identifier or `}` so a single
    /// malformed definition does not abort the rest of the file.
    fn resync(&mut self) {
        loop {
            if self.at_eof() {
                return;
            }
            if self.is_symbol('}') {
                return;
            }
            if matches!(
                self.peek_kind(),
                TokenKind::Identifier(_) | TokenKind::ObjectIdentifier(_) | TokenKind::Directive(_)
            ) {
                return;
            }
            self.advance();
        }
    }

    fn parse_definition(&mut self) -> Option<Definition> {
        let start = self.pos();
        self.attach_pending_pragma(start);
        match self.peek_kind().clone() {
            TokenKind::Directive(word) => self.parse_directive_definition(&word),
            TokenKind::ObjectIdentifier(_) => self.parse_named_definition(start),
            TokenKind::Identifier(_) => self.parse_named_definition(start),
            other => {
                self.errors
                    .push(ParserDiagnostic::UnexpectedToken(start, format!("{other:?}")));
                self.advance();
                None
            }
        }
    }

    fn parse_directive_definition(&mut self, word: &str) -> Option<Definition> {
        match word {
            "var" | "let" => self.parse_variable_definition(word == "let"),
            "if" => self.parse_if(),
            "foreach" => self.parse_foreach(),
            "template" => self.parse_template_definition(),
            "use" => self.parse_use(),
            other => {
                let pos = self.pos();
                self.errors
                    .push(ParserDiagnostic::UnexpectedToken(pos, format!("#{other}")));
                self.advance();
                None
            }
        }
    }

    fn parse_name_token(&mut self) -> Option<(String, Position)> {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Identifier(name) | TokenKind::ObjectIdentifier(name) => {
                self.advance();
                Some((name.clone(), tok.pos))
            }
            _ => None,
        }
    }

    /// `NAME = { body }` or `NAME = value`. Disambiguation: an
    /// object-identifier name is always a node; a bareword name is a
    /// node only if the body's first significant token looks like the
    /// start of a nested definition (`identifier =` or an
    /// object-identifier), otherwise the braces hold an array value.
    fn parse_named_definition(&mut self, start: Position) -> Option<Definition> {
        let is_object_sigil = matches!(self.peek_kind(), TokenKind::ObjectIdentifier(_));
        let (name, name_pos) = self.parse_name_token()?;
        self.attach_pending_doc(name_pos);

        if !self.eat_symbol('=') {
            self.errors.push(ParserDiagnostic::ExpectedEquals(self.pos()));
            return None;
        }

        if self.is_symbol('{') {
            let brace_pos = self.pos();
            if is_object_sigil || self.looks_like_object_body() {
                self.advance(); // '{'
                let body = self.parse_block_body();
                if !self.eat_symbol('}') {
                    self.errors.push(ParserDiagnostic::ExpectedCloseBrace(self.pos()));
                }
                return Some(Definition::ObjectNode {
                    name,
                    name_pos,
                    object_pos: brace_pos,
                    subnode: body,
                    pos: start,
                });
            }
            let value = self.parse_value();
            return Some(Definition::Field { name, value, pos: start });
        }

        let value = self.parse_value();
        Some(Definition::Field { name, value, pos: start })
    }

    /// Looks ahead past `{` to see whether the first significant token
    /// is `identifier =` or an object-identifier — the sole lookahead
    /// rule distinguishing a subnode body from an array value.
    fn looks_like_object_body(&self) -> bool {
        debug_assert!(self.is_symbol('{'));
        let mut i = self.idx + 1;
        while let Some(tok) = self.tokens.get(i) {
            match &tok.kind {
                TokenKind::Comment(_) | TokenKind::Docstring(_) | TokenKind::Pragma(_) => i += 1,
                TokenKind::ObjectIdentifier(_) => return true,
                TokenKind::Identifier(_) => {
                    let mut j = i + 1;
                    while let Some(t) = self.tokens.get(j) {
                        match &t.kind {
                            TokenKind::Comment(_) | TokenKind::Docstring(_) | TokenKind::Pragma(_) => j += 1,
                            TokenKind::Symbol('=') => return true,
                            _ => return false,
                        }
                    }
                    return false;
                }
                _ => return false,
            }
        }
        false
    }

    fn parse_block_body(&mut self) -> Vec<Definition> {
        let mut defs = Vec::new();
        let mut comments = Vec::new();
        let mut pragmas = Vec::new();
        loop {
            self.skip_trivia(&mut comments, &mut pragmas);
            if self.is_symbol('}') || self.at_eof() {
                break;
            }
            if self.is_directive("end") || self.is_directive("else") {
                break;
            }
            match self.parse_definition() {
                Some(def) => defs.push(def),
                None => {
                    if self.is_symbol('}') || self.at_eof() {
                        break;
                    }
                    self.resync();
                }
            }
        }
        defs
    }

    fn parse_variable_definition(&mut self, is_const: bool) -> Option<Definition> {
        let start = self.pos();
        self.advance(); // #var / #let
        let (name, _) = self.parse_name_token()?;
        if !self.eat_symbol(':') {
            self.errors.push(ParserDiagnostic::UnexpectedToken(self.pos(), "expected ':'".into()));
        }
        let mut type_expr = String::new();
        loop {
            match self.peek_kind() {
                TokenKind::Symbol('=') | TokenKind::Eof => break,
                _ => {
                    let tok = self.advance();
                    if !type_expr.is_empty() {
                        type_expr.push(' ');
                    }
                    type_expr.push_str(&token_text(&tok.kind));
                }
            }
        }
        let default = if self.eat_symbol('=') { Some(self.parse_value()) } else { None };
        Some(Definition::VariableDefinition { name, type_expr, default, is_const, pos: start })
    }

    fn parse_if(&mut self) -> Option<Definition> {
        let start = self.pos();
        self.advance(); // #if
        let condition = self.parse_value();
        let then_branch = self.parse_block_body();
        let else_branch = if self.is_directive("else") {
            self.advance();
            self.parse_block_body()
        } else {
            Vec::new()
        };
        if self.is_directive("end") {
            self.advance();
        } else {
            self.errors.push(ParserDiagnostic::UnclosedBlock(start, "if"));
        }
        Some(Definition::If { condition, then_branch, else_branch, pos: start })
    }

    fn parse_foreach(&mut self) -> Option<Definition> {
        let start = self.pos();
        self.advance(); // #foreach
        let (first, _) = self.parse_name_token()?;
        let (key_var, value_var) = if self.is_directive("in") {
            (None, first)
        } else {
            let (second, _) = self.parse_name_token()?;
            (Some(first), second)
        };
        if self.is_directive("in") {
            self.advance();
        } else {
            self.errors.push(ParserDiagnostic::UnexpectedToken(self.pos(), "expected '#in'".into()));
        }
        let iterable = self.parse_value();
        let body = self.parse_block_body();
        if self.is_directive("end") {
            self.advance();
        } else {
            self.errors.push(ParserDiagnostic::UnclosedBlock(start, "foreach"));
        }
        Some(Definition::Foreach { key_var, value_var, iterable, body, pos: start })
    }

    fn parse_template_definition(&mut self) -> Option<Definition> {
        let start = self.pos();
        self.advance(); // #template
        let (name, _) = self.parse_name_token()?;
        let mut parameters = Vec::new();
        if self.eat_symbol('(') {
            while !self.is_symbol(')') && !self.at_eof() {
                let (pname, _) = self.parse_name_token()?;
                let type_expr = if self.eat_symbol(':') {
                    let tok = self.advance();
                    Some(token_text(&tok.kind))
                } else {
                    None
                };
                let default = if self.eat_symbol('=') { Some(self.parse_value()) } else { None };
                parameters.push(TemplateParam { name: pname, type_expr, default });
                if !self.eat_symbol(',') {
                    break;
                }
            }
            if !self.eat_symbol(')') {
                self.errors.push(ParserDiagnostic::ExpectedCloseBrace(self.pos()));
            }
        }
        let body = self.parse_block_body();
        if self.is_directive("end") {
            self.advance();
        } else {
            self.errors.push(ParserDiagnostic::UnclosedBlock(start, "template"));
        }
        Some(Definition::TemplateDefinition { name, parameters, body, pos: start })
    }

    fn parse_use(&mut self) -> Option<Definition> {
        let start = self.pos();
        self.advance(); // #use
        let (template_name, _) = self.parse_name_token()?;
        let instance_name = self.parse_value();
        let mut arguments = Vec::new();
        if self.eat_symbol('(') {
            while !self.is_symbol(')') && !self.at_eof() {
                let arg_pos = self.pos();
                let (aname, _) = self.parse_name_token()?;
                if !self.eat_symbol('=') {
                    self.errors.push(ParserDiagnostic::ExpectedEquals(self.pos()));
                }
                let value = self.parse_value();
                arguments.push(TemplateArg { name: aname, value, pos: arg_pos });
                if !self.eat_symbol(',') {
                    break;
                }
            }
            if !self.eat_symbol(')') {
                self.errors.push(ParserDiagnostic::ExpectedCloseBrace(self.pos()));
            }
        }
        Some(Definition::TemplateInstantiation { instance_name, template_name, arguments, pos: start })
    }

    // ---- expression grammar, precedence climbing, lowest to highest ----
    // unary(-,!) > *,/,% > +,- > concat(..) > comparison > & > |,^
    // parse_value is the entry point (lowest precedence: bitwise or/xor).

    fn parse_value(&mut self) -> Value {
        self.parse_bit_or()
    }

    fn parse_bit_or(&mut self) -> Value {
        let mut lhs = self.parse_bit_and();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Symbol('|') => BinOp::BitOr,
                TokenKind::Symbol('^') => BinOp::BitXor,
                _ => break,
            };
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_bit_and();
            lhs = Value::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), pos };
        }
        lhs
    }

    fn parse_bit_and(&mut self) -> Value {
        let mut lhs = self.parse_comparison();
        while self.is_symbol('&') {
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_comparison();
            lhs = Value::Binary { op: BinOp::BitAnd, lhs: Box::new(lhs), rhs: Box::new(rhs), pos };
        }
        lhs
    }

    fn parse_comparison(&mut self) -> Value {
        let mut lhs = self.parse_concat();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Symbol('<') => BinOp::Lt,
                TokenKind::Symbol('>') => BinOp::Gt,
                TokenKind::Operator(o) if o == "<=" => BinOp::Le,
                TokenKind::Operator(o) if o == ">=" => BinOp::Ge,
                TokenKind::Operator(o) if o == "==" => BinOp::Eq,
                TokenKind::Operator(o) if o == "!=" => BinOp::Ne,
                _ => break,
            };
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_concat();
            lhs = Value::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), pos };
        }
        lhs
    }

    fn parse_concat(&mut self) -> Value {
        let mut lhs = self.parse_additive();
        while matches!(self.peek_kind(), TokenKind::Operator(o) if o == "..") {
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_additive();
            lhs = Value::Binary { op: BinOp::Concat, lhs: Box::new(lhs), rhs: Box::new(rhs), pos };
        }
        lhs
    }

    fn parse_additive(&mut self) -> Value {
        let mut lhs = self.parse_multiplicative();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Symbol('+') => BinOp::Add,
                TokenKind::Symbol('-') => BinOp::Sub,
                _ => break,
            };
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_multiplicative();
            lhs = Value::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), pos };
        }
        lhs
    }

    fn parse_multiplicative(&mut self) -> Value {
        let mut lhs = self.parse_unary();
        loop {
            let op = match self.peek_kind() {
                TokenKind::Symbol('*') => BinOp::Mul,
                TokenKind::Symbol('/') => BinOp::Div,
                TokenKind::Symbol('%') => BinOp::Mod,
                _ => break,
            };
            let pos = self.pos();
            self.advance();
            let rhs = self.parse_unary();
            lhs = Value::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), pos };
        }
        lhs
    }

    fn parse_unary(&mut self) -> Value {
        let pos = self.pos();
        if self.is_symbol('-') {
            self.advance();
            let rhs = self.parse_unary();
            return Value::Unary { op: UnaryOp::Neg, rhs: Box::new(rhs), pos };
        }
        if self.is_symbol('!') {
            self.advance();
            let rhs = self.parse_unary();
            return Value::Unary { op: UnaryOp::Not, rhs: Box::new(rhs), pos };
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Value {
        let tok = self.peek().clone();
        match &tok.kind {
            TokenKind::Int(v, raw) => {
                self.advance();
                Value::Int { value: *v, raw: raw.clone(), pos: tok.pos }
            }
            TokenKind::Float(v, raw) => {
                self.advance();
                Value::Float { value: *v, raw: raw.clone(), pos: tok.pos }
            }
            TokenKind::String(s, quoted) => {
                self.advance();
                Value::String { value: s.clone(), quoted: *quoted, pos: tok.pos }
            }
            TokenKind::Bool(b) => {
                self.advance();
                Value::Bool { value: *b, pos: tok.pos }
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Value::Reference { name: name.clone(), pos: tok.pos }
            }
            TokenKind::ObjectIdentifier(name) => {
                self.advance();
                let var_name = name.trim_start_matches(['+', '$', '@']).to_string();
                if name.starts_with('$') || name.starts_with('@') {
                    Value::VariableReference { name: var_name, pos: tok.pos }
                } else {
                    Value::Reference { name: name.clone(), pos: tok.pos }
                }
            }
            TokenKind::Symbol('(') => {
                self.advance();
                let inner = self.parse_value();
                if !self.eat_symbol(')') {
                    self.errors.push(ParserDiagnostic::ExpectedCloseBrace(self.pos()));
                }
                inner
            }
            TokenKind::Symbol('{') => self.parse_array(),
            other => {
                self.errors
                    .push(ParserDiagnostic::UnexpectedToken(tok.pos, format!("{other:?}")));
                // Don't consume EOF to avoid infinite loop; otherwise skip the bad token.
                if !matches!(other, TokenKind::Eof) {
                    self.advance();
                }
                Value::Reference { name: String::new(), pos: tok.pos }
            }
        }
    }

    fn parse_array(&mut self) -> Value {
        let pos = self.pos();
        self.advance(); // '{'
        let mut elements = Vec::new();
        loop {
            // skip separators and trivia
            loop {
                if self.eat_symbol(',') {
                    continue;
                }
                match self.peek_kind() {
                    TokenKind::Comment(_) | TokenKind::Docstring(_) | TokenKind::Pragma(_) => {
                        self.advance();
                    }
                    _ => break,
                }
            }
            if self.is_symbol('}') || self.at_eof() {
                break;
            }
            elements.push(self.parse_value());
        }
        if !self.eat_symbol('}') {
            self.errors.push(ParserDiagnostic::ExpectedCloseBrace(self.pos()));
        }
        Value::Array { elements, pos }
    }
}

fn token_text(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Identifier(s) => s.clone(),
        TokenKind::ObjectIdentifier(s) => s.clone(),
        TokenKind::Int(_, raw) | TokenKind::Float(_, raw) => raw.clone(),
        TokenKind::String(s, _) => s.clone(),
        TokenKind::Bool(b) => b.to_string(),
        TokenKind::Symbol(c) => c.to_string(),
        TokenKind::Operator(s) => s.clone(),
        TokenKind::Directive(s) => format!("#{s}"),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_node_with_field() {
        let (config, _, _, errors) = parse("+Node = { Class = IOGAM }");
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(config.definitions.len(), 1);
        match &config.definitions[0] {
            Definition::ObjectNode { name, subnode, .. } => {
                assert_eq!(name, "+Node");
                assert_eq!(subnode.len(), 1);
            }
            other => panic!("expected object node, got {other:?}"),
        }
    }

    #[test]
    fn disambiguates_array_field_from_subnode() {
        let (config, _, _, errors) = parse("Values = { 1 2 3 }");
        assert!(errors.is_empty(), "{errors:?}");
        match &config.definitions[0] {
            Definition::Field { value: Value::Array { elements, .. }, .. } => assert_eq!(elements.len(), 3),
            other => panic!("expected array field, got {other:?}"),
        }
    }

    #[test]
    fn parses_package_directive() {
        let (config, _, _, _) = parse("#package a.b.c\nField = 1");
        assert_eq!(config.package.as_deref(), Some("a.b.c"));
    }

    #[test]
    fn parses_if_foreach_template_use() {
        let src = "#if @x > 0\nA = 1\n#else\nA = 2\n#end\n#foreach v in { 1 2 }\nB = @v\n#end\n#template T(p: int = 1)\nC = @p\n#end\n#use T \"+I1\"(p=2)\n";
        let (config, _, _, errors) = parse(src);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(config.definitions.len(), 4);
    }

    #[test]
    fn at_sigil_parses_as_variable_reference() {
        let (config, _, _, errors) = parse("F = @Period");
        assert!(errors.is_empty(), "{errors:?}");
        match &config.definitions[0] {
            Definition::Field { value: Value::VariableReference { name, .. }, .. } => assert_eq!(name, "Period"),
            other => panic!("expected variable reference, got {other:?}"),
        }
    }

    #[test]
    fn recovers_from_missing_equals() {
        let (config, _, _, errors) = parse("Bad\nGood = 1");
        assert!(!errors.is_empty());
        assert_eq!(config.definitions.len(), 1);
        match &config.definitions[0] {
            Definition::Field { name, .. } => assert_eq!(name, "Good"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn operator_precedence_groups_mul_over_add() {
        let (config, _, _, _) = parse("F = 1 + 2 * 3");
        match &config.definitions[0] {
            Definition::Field { value: Value::Binary { op: BinOp::Add, rhs, .. }, .. } => {
                assert!(matches!(**rhs, Value::Binary { op: BinOp::Mul, .. }));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn attaches_contiguous_doc_lines_and_breaks_on_blank_line() {
        let src = "//# first\n//# second\nA = 1\n\n//# orphan\n\nB = 2\n";
        let (config, docs, _, _) = parse(src);
        let a_pos = config.definitions[0].pos();
        assert_eq!(docs.doc_for(a_pos), Some("first\nsecond"));
        let b_pos = config.definitions[1].pos();
        assert_eq!(docs.doc_for(b_pos), None);
    }
}
