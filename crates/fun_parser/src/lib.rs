use fun_ast::*;
use fun_lexer::{FileId, Lexer, Span, Token, TokenKind};
use thiserror::Error;
use tracing::trace;

/// Default limit on statement/value nesting
pub const DEFAULT_MAX_DEPTH: usize = 256;

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    file: FileId,
    depth: usize,
    max_depth: usize,
    last_span: Span,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message} on line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    pub file: FileId,
    pub span: Span,
    pub line: u32,
    pub column: u32,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Lex and parse a whole source text.
pub fn parse_source(source: &str, file: FileId) -> ParseResult<Vec<Node>> {
    parse_source_with_depth(source, file, DEFAULT_MAX_DEPTH)
}

pub fn parse_source_with_depth(source: &str, file: FileId, max_depth: usize) -> ParseResult<Vec<Node>> {
    let tokens = Lexer::tokenize(source, file).map_err(|e| ParseError {
        message: e.to_string(),
        file: e.file,
        span: e.span,
        line: e.line,
        column: e.column,
    })?;
    Parser::new(tokens, file).with_max_depth(max_depth).parse_program()
}

impl Parser {
    pub fn new(tokens: Vec<Token>, file: FileId) -> Self {
        Self {
            tokens,
            pos: 0,
            file,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            last_span: Span::default(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn parse(tokens: Vec<Token>, file: FileId) -> ParseResult<Vec<Node>> {
        Parser::new(tokens, file).parse_program()
    }

    // === Token Access ===

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, steps: usize) -> Option<&Token> {
        self.tokens.get(self.pos + steps)
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, kind: TokenKind, value: &str) -> bool {
        self.peek().is_some_and(|t| t.is(kind, value))
    }

    fn check_kind(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|t| t.kind == kind)
    }

    fn check_symbol(&self, symbol: &str) -> bool {
        self.check(TokenKind::Symbol, symbol)
    }

    fn advance(&mut self) -> ParseResult<Token> {
        match self.tokens.get(self.pos) {
            Some(token) => {
                let token = token.clone();
                self.pos += 1;
                self.last_span = token.span;
                Ok(token)
            }
            None => Err(self.error_at_end("unexpected end of file")),
        }
    }

    /// Consume a token of `kind` (and `value`, when given); `context` names
    /// the construct for the error message.
    fn expect(&mut self, kind: TokenKind, value: Option<&str>, context: &str) -> ParseResult<Token> {
        let matches = match (self.peek(), value) {
            (Some(t), Some(v)) => t.is(kind, v),
            (Some(t), None) => t.kind == kind,
            (None, _) => false,
        };
        if matches {
            return self.advance();
        }

        let wanted = match value {
            Some(v) => format!("a {} '{}'", kind, v),
            None => format!("a {}", kind),
        };
        match self.peek() {
            Some(found) => Err(self.error(
                format!(
                    "expected {} for the {} but found a {} '{}'",
                    wanted, context, found.kind, found.value
                ),
                found,
            )),
            None => Err(self.error_at_end(&format!(
                "expected {} for the {} but reached the end of file",
                wanted, context
            ))),
        }
    }

    fn expect_symbol(&mut self, symbol: &str, context: &str) -> ParseResult<Token> {
        self.expect(TokenKind::Symbol, Some(symbol), context)
    }

    fn expect_name(&mut self, context: &str) -> ParseResult<String> {
        Ok(self.expect(TokenKind::Name, None, context)?.value)
    }

    fn error(&self, message: String, token: &Token) -> ParseError {
        ParseError {
            message,
            file: self.file,
            span: token.span,
            line: token.line,
            column: token.column,
        }
    }

    fn error_at_end(&self, message: &str) -> ParseError {
        match self.tokens.last() {
            Some(last) => self.error(message.to_string(), last),
            None => ParseError {
                message: message.to_string(),
                file: self.file,
                span: Span::default(),
                line: 1,
                column: 1,
            },
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        match self.peek() {
            Some(token) => self.error(
                format!("expected {} but found a {} '{}'", what, token.kind, token.value),
                token,
            ),
            None => self.error_at_end(&format!("expected {} but reached the end of file", what)),
        }
    }

    /// Location of the next token, the start of whatever is parsed next
    fn start(&self) -> ParseResult<Loc> {
        match self.peek() {
            Some(token) => Ok(Loc::of(token, self.file)),
            None => Err(self.error_at_end("unexpected end of file")),
        }
    }

    fn finish(&self, start: Loc, kind: NodeKind) -> Node {
        Node::new(kind, start.to(self.last_span))
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= self.max_depth {
            return Err(self.unexpected_depth());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn unexpected_depth(&self) -> ParseError {
        let message = format!("nesting is deeper than the limit of {}", self.max_depth);
        match self.peek() {
            Some(token) => self.error(message, token),
            None => self.error_at_end(&message),
        }
    }

    // === Statements ===

    pub fn parse_program(&mut self) -> ParseResult<Vec<Node>> {
        let mut nodes = Vec::new();
        while !self.is_at_end() {
            nodes.push(self.parse_statement()?);
        }
        Ok(nodes)
    }

    fn parse_statement(&mut self) -> ParseResult<Node> {
        self.nested(|p| p.parse_statement_inner())
    }

    fn parse_statement_inner(&mut self) -> ParseResult<Node> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_at_end("unexpected end of file"));
        };

        match token.kind {
            TokenKind::String | TokenKind::Number => self.parse_literal(),
            TokenKind::Symbol if token.value == "<" => self.parse_xml(),
            TokenKind::Symbol => Err(self.unexpected("a statement")),
            TokenKind::Name => self.parse_alias_statement(),
            TokenKind::Keyword => match token.value.as_str() {
                "let" => self.parse_declaration(),
                "for" => self.parse_for_loop(),
                "if" => self.parse_if_statement(),
                "template" => self.parse_template(),
                "handler" => self.parse_handler(),
                "import" => self.parse_import(),
                _ => Err(self.error(
                    format!("unexpected keyword '{}' at the beginning of a statement", token.value),
                    &token,
                )),
            },
        }
    }

    fn parse_block(&mut self, context: &str) -> ParseResult<Vec<Node>> {
        self.expect_symbol("{", &format!("beginning of the {}'s block", context))?;
        let mut block = Vec::new();
        while !self.check_symbol("}") {
            if self.is_at_end() {
                return Err(self.error_at_end(&format!(
                    "unexpected end of file inside the {}'s block",
                    context
                )));
            }
            block.push(self.parse_statement()?);
        }
        self.expect_symbol("}", &format!("end of the {}'s block", context))?;
        Ok(block)
    }

    /// An alias, an invocation, or a mutation: `foo.bar set: 1`
    fn parse_alias_statement(&mut self) -> ParseResult<Node> {
        let start = self.start()?;
        let target = self.parse_alias_or_invocation()?;

        let is_mutation = matches!(target.kind, NodeKind::Alias { .. })
            && self.check_kind(TokenKind::Name)
            && self.peek_at(1).is_some_and(|t| t.is(TokenKind::Symbol, ":"));
        if !is_mutation {
            return Ok(target);
        }

        trace!("parse_mutation");
        let method = self.expect_name("mutation method")?;
        self.expect_symbol(":", "mutation method")?;
        let mut args = vec![self.parse_value_or_alias()?];
        while self.check_symbol(",") {
            self.advance()?;
            args.push(self.parse_value_or_alias()?);
        }

        Ok(self.finish(start, NodeKind::Mutation { target: Box::new(target), method, args }))
    }

    fn parse_declaration(&mut self) -> ParseResult<Node> {
        trace!("parse_declaration");
        let start = self.start()?;
        self.expect(TokenKind::Keyword, Some("let"), "declaration")?;
        let name = self.expect_name("declaration")?;
        self.expect_symbol("=", "declaration")?;
        let value = self.parse_value_or_alias()?;
        Ok(self.finish(start, NodeKind::Declaration { namespace: vec![name], value: Box::new(value) }))
    }

    fn parse_import(&mut self) -> ParseResult<Node> {
        trace!("parse_import");
        let start = self.start()?;
        self.expect(TokenKind::Keyword, Some("import"), "import")?;

        if self.check_kind(TokenKind::String) {
            let path = self.advance()?.value;
            return Ok(self.finish(start, NodeKind::ImportFile { path }));
        }

        // Module names may be nested: `import ui/lists`
        let mut segments = vec![self.expect_name("imported module name")?];
        while self.check_symbol("/") {
            self.advance()?;
            segments.push(self.expect_name("imported module name")?);
        }
        Ok(self.finish(start, NodeKind::ImportModule { name: segments.join("/") }))
    }

    // === Aliases and values ===

    fn parse_value_or_alias(&mut self) -> ParseResult<Node> {
        self.nested(|p| p.parse_value_or_alias_inner())
    }

    fn parse_value_or_alias_inner(&mut self) -> ParseResult<Node> {
        trace!("parse_value_or_alias");
        let Some(token) = self.peek().cloned() else {
            return Err(self.error_at_end("expected a value but reached the end of file"));
        };

        match token.kind {
            TokenKind::Name => self.parse_alias_or_invocation(),
            TokenKind::String | TokenKind::Number => self.parse_literal(),
            TokenKind::Symbol => match token.value.as_str() {
                "<" => self.parse_xml(),
                "{" => self.parse_object(),
                "[" => self.parse_list(),
                other => Err(self.error(
                    format!("unexpected symbol '{}', expected XML or JSON", other),
                    &token,
                )),
            },
            TokenKind::Keyword => match token.value.as_str() {
                "template" => self.parse_template(),
                "handler" => self.parse_handler(),
                other => Err(self.error(
                    format!("expected keyword 'template' or 'handler' but found '{}'", other),
                    &token,
                )),
            },
        }
    }

    fn parse_alias_or_invocation(&mut self) -> ParseResult<Node> {
        trace!("parse_alias_or_invocation");
        let start = self.start()?;
        let mut namespace = vec![self.expect_name("alias")?];
        while self.check_symbol(".") {
            self.advance()?;
            namespace.push(self.expect_name("alias property")?);
        }

        if self.check_symbol("(") {
            self.advance()?;
            let args = self.parse_value_list(")", "invocation argument list")?;
            self.expect_symbol(")", "end of the invocation argument list")?;
            return Ok(self.finish(start, NodeKind::Invocation { namespace, args, target: None }));
        }

        Ok(self.finish(start, NodeKind::Alias { namespace }))
    }

    fn parse_literal(&mut self) -> ParseResult<Node> {
        let start = self.start()?;
        let token = self.advance()?;
        let kind = match token.kind {
            TokenKind::String => LiteralKind::String,
            TokenKind::Number => LiteralKind::Number,
            _ => return Err(self.error(format!("expected a literal but found '{}'", token.value), &token)),
        };
        Ok(self.finish(start, NodeKind::Literal { kind, value: token.value, ty: None }))
    }

    /// Comma separated values up to (not including) `close`. No trailing comma.
    fn parse_value_list(&mut self, close: &str, context: &str) -> ParseResult<Vec<Node>> {
        let mut list = Vec::new();
        if self.check_symbol(close) {
            return Ok(list);
        }
        loop {
            if self.check_symbol(close) {
                return Err(self.unexpected(&format!("a value after ',' in the {}", context)));
            }
            list.push(self.parse_value_or_alias()?);
            if !self.check_symbol(",") {
                break;
            }
            self.advance()?;
        }
        Ok(list)
    }

    // === JSON ===

    fn parse_object(&mut self) -> ParseResult<Node> {
        trace!("parse_object");
        let start = self.start()?;
        self.expect_symbol("{", "JSON object")?;

        let mut content = Vec::new();
        if !self.check_symbol("}") {
            loop {
                let is_key = self
                    .peek()
                    .is_some_and(|t| matches!(t.kind, TokenKind::Name | TokenKind::String));
                if !is_key {
                    return Err(self.unexpected("a property name in the JSON object"));
                }
                let name = self.advance()?.value;
                self.expect_symbol(":", "JSON object property")?;
                let value = self.parse_value_or_alias()?;
                content.push(Property { name, value });
                if !self.check_symbol(",") {
                    break;
                }
                self.advance()?;
            }
        }

        self.expect_symbol("}", "right curly at the end of the JSON object")?;
        Ok(self.finish(start, NodeKind::NestedAlias { content }))
    }

    fn parse_list(&mut self) -> ParseResult<Node> {
        trace!("parse_list");
        let start = self.start()?;
        self.expect_symbol("[", "JSON array")?;
        let content = self.parse_value_list("]", "JSON array")?;
        self.expect_symbol("]", "right bracket at the end of the JSON array")?;
        Ok(self.finish(start, NodeKind::List { content }))
    }

    // === XML ===

    fn parse_xml(&mut self) -> ParseResult<Node> {
        trace!("parse_xml");
        let start = self.start()?;
        self.expect_symbol("<", "XML tag")?;
        let tag = self.expect_name("XML tag")?;
        let mut attributes = self.parse_xml_attributes()?;

        if self.check_symbol("/") {
            self.advance()?;
            self.expect_symbol(">", "self-closing XML tag")?;
            return Ok(self.finish(
                start,
                NodeKind::Xml { tag, attributes, content: Vec::new(), self_closing: true },
            ));
        }
        self.expect_symbol(">", "end of XML tag")?;

        let mut content = Vec::new();
        loop {
            let closing = self.check_symbol("<")
                && self.peek_at(1).is_some_and(|t| t.is(TokenKind::Symbol, "/"));
            if closing {
                break;
            }
            if self.is_at_end() {
                return Err(self.error_at_end(&format!("unexpected end of file inside <{}>", tag)));
            }
            content.push(self.parse_statement()?);
        }

        self.expect_symbol("<", "closing XML tag")?;
        self.expect_symbol("/", "closing XML tag")?;
        match self.peek().cloned() {
            Some(t) if t.kind == TokenKind::Name && t.value == tag => {
                self.advance()?;
            }
            Some(t) => {
                return Err(self.error(
                    format!("expected closing tag </{}> but found </{}>", tag, t.value),
                    &t,
                ));
            }
            None => {
                return Err(self.error_at_end(&format!("expected closing tag </{}>", tag)));
            }
        }
        // Attributes may also trail the closing tag: </button onClick=handler() { ... }>
        attributes.extend(self.parse_xml_attributes()?);
        self.expect_symbol(">", "end of the closing XML tag")?;

        Ok(self.finish(start, NodeKind::Xml { tag, attributes, content, self_closing: false }))
    }

    fn parse_xml_attributes(&mut self) -> ParseResult<Vec<Attribute>> {
        let mut attributes = Vec::new();
        loop {
            if self.check_kind(TokenKind::Name) {
                let name = self.expect_name("XML attribute")?;
                self.expect_symbol("=", "XML attribute")?;
                let value = self.parse_value_or_alias()?;
                attributes.push(Attribute::Assign { name, value });
            } else if self.check_symbol("#") {
                trace!("parse_hash_expand");
                self.advance()?;
                if !self.check_symbol("{") {
                    return Err(self.unexpected("a JSON object after '#'"));
                }
                let value = self.parse_object()?;
                attributes.push(Attribute::Expand { value });
            } else {
                return Ok(attributes);
            }
        }
    }

    // === Control flow ===

    fn parse_for_loop(&mut self) -> ParseResult<Node> {
        trace!("parse_for_loop");
        let start = self.start()?;
        self.expect(TokenKind::Keyword, Some("for"), "for loop")?;
        self.expect_symbol("(", "beginning of the for loop's iterator statement")?;
        let iterator = self.expect_name("for loop's iterator")?;
        self.expect(TokenKind::Keyword, Some("in"), "for loop's 'in' keyword")?;
        let iterable_loc = self.start()?;
        let iterable = self.expect_name("for loop's iterable value")?;
        let iterable = Node::new(NodeKind::Alias { namespace: vec![iterable] }, iterable_loc);
        self.expect_symbol(")", "end of the for loop's iterator statement")?;

        let block = self.parse_block("for loop")?;
        Ok(self.finish(start, NodeKind::ForLoop { iterator, iterable: Box::new(iterable), block }))
    }

    fn parse_if_statement(&mut self) -> ParseResult<Node> {
        trace!("parse_if_statement");
        let start = self.start()?;
        self.expect(TokenKind::Keyword, Some("if"), "if statement")?;
        self.expect_symbol("(", "beginning of the if statement's conditional")?;
        let condition = self.parse_condition()?;
        self.expect_symbol(")", "end of the if statement's conditional")?;

        let if_block = self.parse_block("if statement")?;
        let else_block = if self.check(TokenKind::Keyword, "else") {
            self.advance()?;
            Some(self.parse_block("else statement")?)
        } else {
            None
        };

        Ok(self.finish(start, NodeKind::IfStatement { condition, if_block, else_block }))
    }

    fn parse_condition(&mut self) -> ParseResult<Condition> {
        let left = self.parse_operand()?;

        let comparator = self
            .peek()
            .filter(|t| t.kind == TokenKind::Symbol)
            .and_then(|t| Comparator::from_symbol(&t.value));
        let comparison = match comparator {
            Some(comparator) => {
                self.advance()?;
                let right = self.parse_operand()?;
                Some(Comparison { comparator, right: Box::new(right) })
            }
            None => None,
        };

        Ok(Condition { left: Box::new(left), comparison })
    }

    /// Only strings, numbers and aliases may be compared
    fn parse_operand(&mut self) -> ParseResult<Node> {
        match self.peek().map(|t| t.kind) {
            Some(TokenKind::String | TokenKind::Number) => self.parse_literal(),
            Some(TokenKind::Name) => self.parse_alias_or_invocation(),
            _ => Err(self.unexpected("a string, number or name in the condition")),
        }
    }

    // === Templates & Handlers ===

    fn parse_template(&mut self) -> ParseResult<Node> {
        trace!("parse_template");
        let start = self.start()?;
        let (args, block) = self.parse_callable("template")?;
        Ok(self.finish(start, NodeKind::Template { args, block, decl: None }))
    }

    fn parse_handler(&mut self) -> ParseResult<Node> {
        trace!("parse_handler");
        let start = self.start()?;
        let (args, block) = self.parse_callable("handler")?;
        Ok(self.finish(start, NodeKind::Handler { args, block, decl: None }))
    }

    fn parse_callable(&mut self, keyword: &str) -> ParseResult<(Vec<String>, Vec<Node>)> {
        self.expect(TokenKind::Keyword, Some(keyword), keyword)?;
        self.expect_symbol("(", &format!("{}'s argument list", keyword))?;

        let mut args = Vec::new();
        if !self.check_symbol(")") {
            loop {
                args.push(self.expect_name(&format!("{}'s argument list", keyword))?);
                if !self.check_symbol(",") {
                    break;
                }
                self.advance()?;
            }
        }
        self.expect_symbol(")", &format!("end of the {}'s argument list", keyword))?;

        let block = self.parse_block(keyword)?;
        Ok((args, block))
    }
}
