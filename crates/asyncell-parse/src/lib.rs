pub mod a1;
pub mod tokenizer;

pub use a1::RangeOperand;
pub use tokenizer::{Token, TokenSubType, TokenType, Tokenizer, TokenizerError};
