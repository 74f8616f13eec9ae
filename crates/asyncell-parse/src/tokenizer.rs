use std::error::Error;
use std::fmt::{self, Display};

use asyncell_common::ExcelErrorKind;
use smallvec::SmallVec;

const TOKEN_ENDERS: &str = ",;}) +-*/^&=><%";

const fn build_token_enders() -> [bool; 256] {
    let mut tbl = [false; 256];
    let bytes = TOKEN_ENDERS.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        tbl[bytes[i] as usize] = true;
        i += 1;
    }
    tbl
}
static TOKEN_ENDERS_TABLE: [bool; 256] = build_token_enders();

#[inline(always)]
fn is_token_ender(c: u8) -> bool {
    TOKEN_ENDERS_TABLE[c as usize]
}

/// Tokenizer failure with the byte offset it was detected at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerError {
    pub message: String,
    pub pos: usize,
}

impl TokenizerError {
    fn at(pos: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for TokenizerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenizerError: {} (at {})", self.message, self.pos)
    }
}

impl Error for TokenizerError {}

/// The type of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Literal,
    Operand,
    Func,
    Array,
    Paren,
    Sep,
    OpPrefix,
    OpInfix,
    OpPostfix,
    Whitespace,
}

impl Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The subtype of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenSubType {
    None,
    Text,
    Number,
    Logical,
    Error,
    Range,
    Open,
    Close,
    Arg,
    Row,
}

impl Display for TokenSubType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A token in an Excel formula, with its byte span in the source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub value: String,
    pub token_type: TokenType,
    pub subtype: TokenSubType,
    pub start: usize,
    pub end: usize,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} subtype: {:?} value: {}>",
            self.token_type, self.subtype, self.value
        )
    }
}

impl Token {
    fn from_slice(
        source: &str,
        token_type: TokenType,
        subtype: TokenSubType,
        start: usize,
        end: usize,
    ) -> Self {
        Token {
            value: source[start..end].to_string(),
            token_type,
            subtype,
            start,
            end,
        }
    }

    /// Operand whose subtype is inferred from its text.
    fn operand(source: &str, start: usize, end: usize) -> Self {
        let text = &source[start..end];
        let subtype = if text.starts_with('"') {
            TokenSubType::Text
        } else if text.starts_with('#') {
            TokenSubType::Error
        } else if text.eq_ignore_ascii_case("TRUE") || text.eq_ignore_ascii_case("FALSE") {
            TokenSubType::Logical
        } else if text.parse::<f64>().is_ok() {
            TokenSubType::Number
        } else {
            TokenSubType::Range
        };
        Token::from_slice(source, TokenType::Operand, subtype, start, end)
    }

    /// Opener token for `(`/`{`; `func` forces the Func type.
    fn opener(source: &str, func: bool, start: usize, end: usize) -> Self {
        let token_type = if func {
            TokenType::Func
        } else if source.as_bytes()[end - 1] == b'{' {
            TokenType::Array
        } else {
            TokenType::Paren
        };
        Token::from_slice(source, token_type, TokenSubType::Open, start, end)
    }

    pub fn is_range(&self) -> bool {
        self.token_type == TokenType::Operand && self.subtype == TokenSubType::Range
    }

    pub fn is_function_start(&self) -> bool {
        self.token_type == TokenType::Func && self.subtype == TokenSubType::Open
    }

    /// Function name of a function-start token (`SUM(` → `SUM`).
    pub fn function_name(&self) -> Option<&str> {
        self.is_function_start()
            .then(|| self.value.trim_end_matches('('))
    }
}

/// A tokenizer for Excel worksheet formulas.
pub struct Tokenizer {
    formula: String,
    pub items: Vec<Token>,
    token_stack: SmallVec<[TokenType; 8]>,
    offset: usize,
    token_start: usize,
    token_end: usize,
}

impl Tokenizer {
    /// Create a new tokenizer and immediately tokenize the formula.
    pub fn new(formula: &str) -> Result<Self, TokenizerError> {
        let mut tokenizer = Tokenizer {
            formula: formula.to_string(),
            items: Vec::with_capacity(formula.len() / 2),
            token_stack: SmallVec::new(),
            offset: 0,
            token_start: 0,
            token_end: 0,
        };
        tokenizer.parse()?;
        Ok(tokenizer)
    }

    /// Operand tokens that denote a cell or range (names included, the
    /// tokenizer cannot tell them apart from A1 text).
    pub fn ranges(&self) -> impl Iterator<Item = &Token> {
        self.items.iter().filter(|t| t.is_range())
    }

    /// Name of the first function-start token.
    pub fn first_function(&self) -> Option<&str> {
        self.items.iter().find_map(Token::function_name)
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.formula.as_bytes()
    }

    #[inline]
    fn has_token(&self) -> bool {
        self.token_end > self.token_start
    }

    #[inline]
    fn start_token(&mut self) {
        self.token_start = self.offset;
        self.token_end = self.offset;
    }

    #[inline]
    fn extend_token(&mut self) {
        self.token_end = self.offset;
    }

    fn parse(&mut self) -> Result<(), TokenizerError> {
        if self.formula.is_empty() {
            return Ok(());
        }

        // Anything not starting with '=' is a literal cell value.
        if self.bytes()[0] != b'=' {
            self.items.push(Token::from_slice(
                &self.formula,
                TokenType::Literal,
                TokenSubType::None,
                0,
                self.formula.len(),
            ));
            return Ok(());
        }

        self.offset = 1;
        self.start_token();

        while self.offset < self.formula.len() {
            if self.check_scientific_notation() {
                continue;
            }

            let curr = self.bytes()[self.offset];

            if is_token_ender(curr) && self.has_token() {
                self.save_token();
                self.start_token();
            }

            match curr {
                b'"' | b'\'' => self.parse_string()?,
                b'[' => self.parse_brackets()?,
                b'#' => self.parse_error()?,
                b' ' | b'\n' => self.parse_whitespace(),
                b'+' | b'-' | b'*' | b'/' | b'^' | b'&' | b'=' | b'>' | b'<' | b'%' => {
                    self.parse_operator()
                }
                b'{' | b'(' => self.parse_opener(),
                b')' | b'}' => self.parse_closer()?,
                b';' | b',' => self.parse_separator(),
                _ => {
                    if !self.has_token() {
                        self.start_token();
                    }
                    self.offset += 1;
                    self.extend_token();
                }
            }
        }

        if self.has_token() {
            self.save_token();
        }

        if !self.token_stack.is_empty() {
            return Err(TokenizerError::at(
                self.offset,
                "Unmatched opening parenthesis or bracket",
            ));
        }

        Ok(())
    }

    /// Consume the sign of an exponent (`1.5E+3`) as part of the number.
    fn check_scientific_notation(&mut self) -> bool {
        let Some(&curr) = self.bytes().get(self.offset) else {
            return false;
        };
        if (curr == b'+' || curr == b'-') && self.is_scientific_notation_base() {
            self.offset += 1;
            self.extend_token();
            return true;
        }
        false
    }

    fn is_scientific_notation_base(&self) -> bool {
        if !self.has_token() {
            return false;
        }
        let slice = &self.bytes()[self.token_start..self.token_end];
        let [first, middle @ .., last] = slice else {
            return false;
        };
        if !(*last == b'E' || *last == b'e') || !first.is_ascii_digit() {
            return false;
        }
        let mut dot_seen = false;
        for &ch in middle {
            match ch {
                b'0'..=b'9' => {}
                b'.' if !dot_seen => dot_seen = true,
                _ => return false,
            }
        }
        true
    }

    fn save_token(&mut self) {
        if self.has_token() {
            let token = Token::operand(&self.formula, self.token_start, self.token_end);
            self.items.push(token);
        }
    }

    /// A `"text"` literal becomes its own operand; a `'quoted sheet'` name
    /// stays part of the operand being accumulated.
    fn parse_string(&mut self) -> Result<(), TokenizerError> {
        let delim = self.bytes()[self.offset];

        let is_dollar_ref = delim == b'\''
            && self.token_end - self.token_start == 1
            && self.bytes()[self.token_start] == b'$';

        if !is_dollar_ref && self.has_token() && self.bytes()[self.token_end - 1] != b':' {
            self.save_token();
            self.start_token();
        }

        let string_start = if is_dollar_ref || (delim == b'\'' && self.has_token()) {
            self.token_start
        } else {
            self.offset
        };
        self.offset += 1;

        while self.offset < self.formula.len() {
            if self.bytes()[self.offset] != delim {
                self.offset += 1;
                continue;
            }
            self.offset += 1;
            if self.bytes().get(self.offset) == Some(&delim) {
                // doubled delimiter is an escaped quote
                self.offset += 1;
                continue;
            }
            if delim == b'"' {
                let token = Token::operand(&self.formula, string_start, self.offset);
                self.items.push(token);
                self.start_token();
            } else {
                self.token_start = string_start;
                self.token_end = self.offset;
            }
            return Ok(());
        }

        Err(TokenizerError::at(
            self.offset,
            "Reached end of formula while parsing string",
        ))
    }

    fn parse_brackets(&mut self) -> Result<(), TokenizerError> {
        if !self.has_token() {
            self.start_token();
        }

        let mut open_count = 1;
        self.offset += 1;

        while self.offset < self.formula.len() {
            match self.bytes()[self.offset] {
                b'[' => open_count += 1,
                b']' => {
                    open_count -= 1;
                    if open_count == 0 {
                        self.offset += 1;
                        self.extend_token();
                        return Ok(());
                    }
                }
                _ => {}
            }
            self.offset += 1;
        }

        Err(TokenizerError::at(self.offset, "Encountered unmatched '['"))
    }

    /// Error literal, possibly sheet-qualified (`Sheet1!#REF!`).
    fn parse_error(&mut self) -> Result<(), TokenizerError> {
        if self.has_token() && self.bytes()[self.token_end - 1] != b'!' {
            self.save_token();
            self.start_token();
        }

        let error_start = if self.has_token() {
            self.token_start
        } else {
            self.offset
        };

        for kind in ExcelErrorKind::ALL {
            let code = kind.as_str().as_bytes();
            let end = self.offset + code.len();
            if self.bytes().get(self.offset..end) == Some(code) {
                let token = Token::operand(&self.formula, error_start, end);
                self.items.push(token);
                self.offset = end;
                self.start_token();
                return Ok(());
            }
        }

        Err(TokenizerError::at(
            self.offset,
            format!("Invalid error code at position {}", self.offset),
        ))
    }

    fn parse_whitespace(&mut self) {
        self.save_token();

        let ws_start = self.offset;
        while let Some(b' ' | b'\n') = self.bytes().get(self.offset) {
            self.offset += 1;
        }

        self.items.push(Token::from_slice(
            &self.formula,
            TokenType::Whitespace,
            TokenSubType::None,
            ws_start,
            self.offset,
        ));
        self.start_token();
    }

    fn parse_operator(&mut self) {
        self.save_token();

        if let Some(b">=" | b"<=" | b"<>") = self.bytes().get(self.offset..self.offset + 2) {
            self.push_span(TokenType::OpInfix, TokenSubType::None, 2);
            return;
        }

        let token_type = match self.bytes()[self.offset] {
            b'%' => TokenType::OpPostfix,
            b'+' | b'-' => {
                let prev = self
                    .items
                    .iter()
                    .rev()
                    .find(|t| t.token_type != TokenType::Whitespace);
                match prev {
                    Some(p)
                        if p.subtype == TokenSubType::Close
                            || p.token_type == TokenType::OpPostfix
                            || p.token_type == TokenType::Operand =>
                    {
                        TokenType::OpInfix
                    }
                    _ => TokenType::OpPrefix,
                }
            }
            _ => TokenType::OpInfix,
        };

        self.push_span(token_type, TokenSubType::None, 1);
    }

    fn push_span(&mut self, token_type: TokenType, subtype: TokenSubType, len: usize) {
        self.items.push(Token::from_slice(
            &self.formula,
            token_type,
            subtype,
            self.offset,
            self.offset + len,
        ));
        self.offset += len;
        self.start_token();
    }

    /// `(` right after accumulated text opens a function call.
    fn parse_opener(&mut self) {
        let curr = self.bytes()[self.offset];

        let token = if curr == b'{' {
            self.save_token();
            Token::opener(&self.formula, false, self.offset, self.offset + 1)
        } else if self.has_token() {
            Token::opener(&self.formula, true, self.token_start, self.offset + 1)
        } else {
            Token::opener(&self.formula, false, self.offset, self.offset + 1)
        };

        self.token_stack.push(token.token_type);
        self.items.push(token);
        self.offset += 1;
        self.start_token();
    }

    fn parse_closer(&mut self) -> Result<(), TokenizerError> {
        self.save_token();

        let curr = self.bytes()[self.offset];
        let Some(open_type) = self.token_stack.pop() else {
            return Err(TokenizerError::at(
                self.offset,
                format!("No matching opener for closer at position {}", self.offset),
            ));
        };

        let expected = if open_type == TokenType::Array { b'}' } else { b')' };
        if curr != expected {
            return Err(TokenizerError::at(self.offset, "Mismatched ( and { pair"));
        }

        self.push_span(open_type, TokenSubType::Close, 1);
        Ok(())
    }

    /// `,` separates arguments inside a call or array, elsewhere it is the
    /// union operator.
    fn parse_separator(&mut self) {
        self.save_token();

        let curr = self.bytes()[self.offset];
        let (token_type, subtype) = if curr == b';' {
            (TokenType::Sep, TokenSubType::Row)
        } else {
            match self.token_stack.last() {
                Some(TokenType::Func | TokenType::Array) => (TokenType::Sep, TokenSubType::Arg),
                _ => (TokenType::OpInfix, TokenSubType::None),
            }
        };

        self.push_span(token_type, subtype, 1);
    }

    /// Reconstruct the formula from the tokens.
    pub fn render(&self) -> String {
        match self.items.first() {
            None => String::new(),
            Some(t) if t.token_type == TokenType::Literal => t.value.clone(),
            Some(_) => {
                let body: String = self.items.iter().map(|t| t.value.as_str()).collect();
                format!("={body}")
            }
        }
    }
}

impl TryFrom<&str> for Tokenizer {
    type Error = TokenizerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Tokenizer::new(value)
    }
}
