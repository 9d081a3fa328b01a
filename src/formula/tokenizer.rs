//! Formula tokenizer
//!
//! Converts formula strings like "{Drum_Inches} * {Conversion_Rate}" into a
//! sequence of tokens that can be parsed into an AST.

use std::iter::Peekable;
use std::str::Chars;

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, 1.5e10)
    Number(f64),
    /// A field reference, brace-delimited in the source: {field_id}
    FieldRef(String),
    /// An identifier - a function name
    Identifier(String),
    /// Arithmetic operators: + - * / % ^
    Operator(char),
    /// Opening parenthesis
    OpenParen,
    /// Closing parenthesis
    CloseParen,
    /// Comma separator for function arguments
    Comma,
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tokenize error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TokenizeError {}

/// Tokenizer for formula expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(formula: &'a str) -> Self {
        Self {
            chars: formula.chars().peekable(),
            position: 0,
        }
    }

    /// Tokenize the entire formula into a vector of tokens
    pub fn tokenize(mut self) -> Result<Vec<Token>, TokenizeError> {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    /// Get the next token, or None if at end of input
    fn next_token(&mut self) -> Result<Option<Token>, TokenizeError> {
        self.skip_whitespace();

        match self.peek() {
            None => Ok(None),
            Some(c) => {
                let token = match c {
                    '{' => self.read_field_ref()?,

                    '(' => {
                        self.advance();
                        Token::OpenParen
                    }
                    ')' => {
                        self.advance();
                        Token::CloseParen
                    }
                    ',' => {
                        self.advance();
                        Token::Comma
                    }

                    '+' | '-' | '*' | '/' | '%' | '^' => {
                        let op = self.advance().unwrap();
                        Token::Operator(op)
                    }

                    c if c.is_ascii_digit() || c == '.' => self.read_number()?,

                    c if c.is_alphabetic() || c == '_' => self.read_identifier()?,

                    c => {
                        return Err(TokenizeError::new(
                            format!("Unexpected character: '{}'", c),
                            self.position,
                        ));
                    }
                };
                Ok(Some(token))
            }
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Read a field reference: everything between '{' and '}'.
    ///
    /// An unterminated '{' is a syntax error, never silently dropped.
    fn read_field_ref(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        self.advance(); // consume '{'
        let mut id = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(TokenizeError::new(
                        "Unterminated field reference: missing '}'",
                        start_pos,
                    ));
                }
                Some('{') => {
                    return Err(TokenizeError::new(
                        "Nested '{' inside field reference",
                        self.position - 1,
                    ));
                }
                Some('}') => break,
                Some(c) => id.push(c),
            }
        }

        if id.trim().is_empty() {
            return Err(TokenizeError::new("Empty field reference", start_pos));
        }

        Ok(Token::FieldRef(id))
    }

    /// Read a number (integer, decimal, or scientific notation)
    fn read_number(&mut self) -> Result<Token, TokenizeError> {
        let start_pos = self.position;
        let mut num_str = String::new();

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                num_str.push(self.advance().unwrap());
            } else {
                break;
            }
        }

        if self.peek() == Some('.') {
            num_str.push(self.advance().unwrap());
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    num_str.push(self.advance().unwrap());
                } else {
                    break;
                }
            }
        }

        // Exponent part (e.g., 1.5e10, 2E-5)
        if let Some(c) = self.peek() {
            if c == 'e' || c == 'E' {
                num_str.push(self.advance().unwrap());
                if let Some(sign) = self.peek() {
                    if sign == '+' || sign == '-' {
                        num_str.push(self.advance().unwrap());
                    }
                }
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        num_str.push(self.advance().unwrap());
                    } else {
                        break;
                    }
                }
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| TokenizeError::new(format!("Invalid number: {}", num_str), start_pos))
    }

    /// Read an identifier (function name)
    fn read_identifier(&mut self) -> Result<Token, TokenizeError> {
        let mut ident = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(self.advance().unwrap());
            } else {
                break;
            }
        }

        Ok(Token::Identifier(ident))
    }
}

/// Convenience function to tokenize a formula string
pub fn tokenize(formula: &str) -> Result<Vec<Token>, TokenizeError> {
    Tokenizer::new(formula).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple_number() {
        let tokens = tokenize("42").unwrap();
        assert_eq!(tokens, vec![Token::Number(42.0)]);
    }

    #[test]
    fn test_tokenize_decimal_number() {
        let tokens = tokenize("3.567").unwrap();
        assert_eq!(tokens, vec![Token::Number(3.567)]);
    }

    #[test]
    fn test_tokenize_leading_dot_decimal() {
        let tokens = tokenize(".5").unwrap();
        assert_eq!(tokens, vec![Token::Number(0.5)]);
    }

    #[test]
    fn test_tokenize_scientific_notation() {
        let tokens = tokenize("1.5e10").unwrap();
        assert_eq!(tokens, vec![Token::Number(1.5e10)]);

        let tokens = tokenize("2E-5").unwrap();
        assert_eq!(tokens, vec![Token::Number(2e-5)]);
    }

    #[test]
    fn test_tokenize_field_reference() {
        let tokens = tokenize("{Drum_Inches}").unwrap();
        assert_eq!(tokens, vec![Token::FieldRef("Drum_Inches".to_string())]);
    }

    #[test]
    fn test_tokenize_mapped_field_reference() {
        let tokens = tokenize("{mapped.conversion_rate}").unwrap();
        assert_eq!(
            tokens,
            vec![Token::FieldRef("mapped.conversion_rate".to_string())]
        );
    }

    #[test]
    fn test_tokenize_all_operators() {
        let tokens = tokenize("+ - * / % ^").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Operator('+'),
                Token::Operator('-'),
                Token::Operator('*'),
                Token::Operator('/'),
                Token::Operator('%'),
                Token::Operator('^'),
            ]
        );
    }

    #[test]
    fn test_tokenize_function_call() {
        let tokens = tokenize("round({x}, 2)").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Identifier("round".to_string()),
                Token::OpenParen,
                Token::FieldRef("x".to_string()),
                Token::Comma,
                Token::Number(2.0),
                Token::CloseParen,
            ]
        );
    }

    #[test]
    fn test_tokenize_formula_with_fields() {
        let tokens = tokenize("{a} * {b} + 1").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::FieldRef("a".to_string()),
                Token::Operator('*'),
                Token::FieldRef("b".to_string()),
                Token::Operator('+'),
                Token::Number(1.0),
            ]
        );
    }

    #[test]
    fn test_tokenize_empty_string() {
        let tokens = tokenize("").unwrap();
        assert_eq!(tokens, vec![]);
    }

    #[test]
    fn test_tokenize_error_unterminated_field_ref() {
        let result = tokenize("{unfinished");
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("Unterminated"));
    }

    #[test]
    fn test_tokenize_error_empty_field_ref() {
        let result = tokenize("{}");
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("Empty"));
    }

    #[test]
    fn test_tokenize_error_nested_brace() {
        let result = tokenize("{a{b}}");
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("Nested"));
    }

    #[test]
    fn test_tokenize_error_unexpected_char() {
        let result = tokenize("@invalid");
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("Unexpected"));
    }
}
