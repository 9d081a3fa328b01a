//! Formula parser
//!
//! Converts a sequence of tokens into an Abstract Syntax Tree (AST).
//! Uses recursive descent parsing with operator precedence.

use super::tokenizer::Token;

/// Abstract Syntax Tree node for formula expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A numeric literal
    Number(f64),
    /// A field reference: {field_id}
    FieldRef(String),
    /// Function call: name(arg1, arg2, ...)
    FunctionCall { name: String, args: Vec<Expr> },
    /// Binary operation: left op right
    BinaryOp {
        op: char,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary negation: -expr
    Negate(Box<Expr>),
}

impl Expr {
    /// Visit every function call in the expression tree
    pub fn walk_functions<'a>(&'a self, visit: &mut impl FnMut(&'a str)) {
        match self {
            Expr::FunctionCall { name, args } => {
                visit(name);
                for arg in args {
                    arg.walk_functions(visit);
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                left.walk_functions(visit);
                right.walk_functions(visit);
            }
            Expr::Negate(operand) => operand.walk_functions(visit),
            Expr::Number(_) | Expr::FieldRef(_) => {}
        }
    }
}

/// Error during parsing
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Parse error at token {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Parser for formula tokens.
///
/// Precedence low to high: `+ -`, then `* / %`, then unary `-`, then `^`
/// (right-associative), then primary. Note unary minus binds *looser* than
/// `^`, so `-2 ^ 2` is `-(2 ^ 2)`.
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// Parse the tokens into an AST
    pub fn parse(mut self) -> Result<Expr, ParseError> {
        if self.tokens.is_empty() {
            return Err(ParseError::new("Empty expression", 0));
        }
        let expr = self.expression()?;

        if !self.is_at_end() {
            return Err(ParseError::new(
                format!("Unexpected token after expression: {:?}", self.peek()),
                self.position,
            ));
        }

        Ok(expr)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<&Token> {
        if !self.is_at_end() {
            self.position += 1;
        }
        self.tokens.get(self.position - 1)
    }

    fn match_token(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Check if current token is any of the given operators and consume it
    fn match_any_operator(&mut self, ops: &[char]) -> Option<char> {
        if let Some(Token::Operator(c)) = self.peek() {
            if ops.contains(c) {
                let op = *c;
                self.advance();
                return Some(op);
            }
        }
        None
    }

    /// Expression: term (( "+" | "-" ) term)*
    fn expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.term()?;

        while let Some(op) = self.match_any_operator(&['+', '-']) {
            let right = self.term()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Term: unary (( "*" | "/" | "%" ) unary)*
    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;

        while let Some(op) = self.match_any_operator(&['*', '/', '%']) {
            let right = self.unary()?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    /// Unary: "-" unary | power
    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.match_any_operator(&['-']).is_some() {
            let operand = self.unary()?;
            Ok(Expr::Negate(Box::new(operand)))
        } else {
            self.power()
        }
    }

    /// Power: primary ( "^" unary )?   (right-associative)
    fn power(&mut self) -> Result<Expr, ParseError> {
        let left = self.primary()?;

        if self.match_any_operator(&['^']).is_some() {
            // Recursing through `unary` keeps `^` right-associative and
            // allows a negated exponent: 2 ^ -3
            let right = self.unary()?;
            Ok(Expr::BinaryOp {
                op: '^',
                left: Box::new(left),
                right: Box::new(right),
            })
        } else {
            Ok(left)
        }
    }

    /// Primary: NUMBER | FIELD_REF | IDENTIFIER "(" arguments ")" | "(" expression ")"
    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().cloned();

        match token {
            Some(Token::Number(n)) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Some(Token::FieldRef(id)) => {
                self.advance();
                Ok(Expr::FieldRef(id))
            }
            Some(Token::Identifier(name)) => {
                self.advance();
                if !self.match_token(&Token::OpenParen) {
                    return Err(ParseError::new(
                        format!("Expected '(' after function name '{}'", name),
                        self.position,
                    ));
                }
                let args = self.arguments()?;
                if !self.match_token(&Token::CloseParen) {
                    return Err(ParseError::new(
                        "Expected ')' after function arguments",
                        self.position,
                    ));
                }
                Ok(Expr::FunctionCall { name, args })
            }
            Some(Token::OpenParen) => {
                self.advance();
                let expr = self.expression()?;
                if !self.match_token(&Token::CloseParen) {
                    return Err(ParseError::new(
                        "Expected ')' after expression",
                        self.position,
                    ));
                }
                Ok(expr)
            }
            Some(token) => Err(ParseError::new(
                format!("Unexpected token: {:?}", token),
                self.position,
            )),
            None => Err(ParseError::new(
                "Unexpected end of expression",
                self.position,
            )),
        }
    }

    /// Arguments: ( expr ( "," expr )* )?
    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();

        if let Some(Token::CloseParen) = self.peek() {
            return Ok(args);
        }

        args.push(self.expression()?);

        while self.match_token(&Token::Comma) {
            args.push(self.expression()?);
        }

        Ok(args)
    }
}

/// Convenience function to parse tokens into an AST
pub fn parse(tokens: Vec<Token>) -> Result<Expr, ParseError> {
    Parser::new(tokens).parse()
}
