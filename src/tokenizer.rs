//! Split layout script text into declaration tokens using PEST.

use crate::bitstream::Endianness;
use crate::error::{Error, Position, Result};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
pub(crate) struct ScriptParser;

/// Parameter after `:` in a type name, e.g. `bit:3` or `bit:(n*2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExtra {
    Number(u32),
    Expression(String),
}

/// Content of an array bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArraySize {
    /// `[_]`: read until the stream is exhausted.
    Unbounded,
    /// Expression text, passed through for the expression parser.
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// One field declaration: `<int:3 [n] name;`
    Field {
        byte_order: Option<Endianness>,
        type_name: String,
        extra: Option<TypeExtra>,
        array: Option<ArraySize>,
        name: Option<String>,
    },
    /// `name [n] {`
    StructStart {
        name: Option<String>,
        array: Option<ArraySize>,
    },
    /// `}`
    StructEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Raw source text of the token.
    pub text: String,
    pub position: Position,
}

pub(crate) fn position_of(pair: &Pair<Rule>) -> Position {
    let span = pair.as_span();
    let (line, column) = span.start_pos().line_col();
    Position::new(span.start(), line, column)
}

fn position_of_pest_error(e: &pest::error::Error<Rule>) -> Position {
    let offset = match e.location {
        pest::error::InputLocation::Pos(p) => p,
        pest::error::InputLocation::Span((s, _)) => s,
    };
    let (line, column) = match e.line_col {
        pest::error::LineColLocation::Pos(lc) => lc,
        pest::error::LineColLocation::Span(lc, _) => lc,
    };
    Position::new(offset, line, column)
}

pub(crate) fn syntax_error_from_pest(e: pest::error::Error<Rule>) -> Error {
    let position = position_of_pest_error(&e);
    let message = match &e.variant {
        pest::error::ErrorVariant::ParsingError { positives, .. } if !positives.is_empty() => {
            let expected: Vec<String> = positives.iter().map(|r| format!("{:?}", r)).collect();
            format!("unexpected input, expected {}", expected.join(" or "))
        }
        pest::error::ErrorVariant::CustomError { message } => message.clone(),
        _ => "unexpected input".to_string(),
    };
    Error::syntax(message, position)
}

/// Tokenize a whole script. Fails on the first malformed token.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let pairs = ScriptParser::parse(Rule::script, source).map_err(syntax_error_from_pest)?;
    let script = pairs
        .into_iter()
        .next()
        .ok_or_else(|| Error::syntax("empty parse", Position::default()))?;
    let mut tokens = Vec::new();
    for pair in script.into_inner() {
        match pair.as_rule() {
            Rule::field_decl => tokens.push(build_field(pair)?),
            Rule::struct_start => tokens.push(build_struct_start(pair)),
            Rule::struct_end => tokens.push(Token {
                kind: TokenKind::StructEnd,
                text: pair.as_str().to_string(),
                position: position_of(&pair),
            }),
            _ => {}
        }
    }
    Ok(tokens)
}

fn build_field(pair: Pair<Rule>) -> Result<Token> {
    let position = position_of(&pair);
    let text = pair.as_str().to_string();
    let mut byte_order = None;
    let mut type_name = String::new();
    let mut extra = None;
    let mut array = None;
    let mut name = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::byte_order => {
                byte_order = Some(if inner.as_str() == "<" {
                    Endianness::Little
                } else {
                    Endianness::Big
                })
            }
            Rule::type_name => type_name = inner.as_str().to_string(),
            Rule::type_extra => extra = Some(build_extra(inner)?),
            Rule::array_size => array = Some(build_array_size(inner)),
            Rule::field_name => name = Some(inner.as_str().to_string()),
            _ => {}
        }
    }
    Ok(Token {
        kind: TokenKind::Field {
            byte_order,
            type_name,
            extra,
            array,
            name,
        },
        text,
        position,
    })
}

fn build_extra(pair: Pair<Rule>) -> Result<TypeExtra> {
    let position = position_of(&pair);
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| Error::syntax("missing type parameter", position))?;
    match inner.as_rule() {
        Rule::extra_number => inner
            .as_str()
            .parse::<u32>()
            .map(TypeExtra::Number)
            .map_err(|_| Error::syntax(format!("invalid number '{}'", inner.as_str()), position)),
        _ => {
            let body = inner.as_str();
            Ok(TypeExtra::Expression(body[1..body.len() - 1].trim().to_string()))
        }
    }
}

fn build_array_size(pair: Pair<Rule>) -> ArraySize {
    match pair.into_inner().next() {
        Some(p) if p.as_rule() == Rule::size_text => ArraySize::Expression(p.as_str().trim().to_string()),
        _ => ArraySize::Unbounded,
    }
}

fn build_struct_start(pair: Pair<Rule>) -> Token {
    let position = position_of(&pair);
    let text = pair.as_str().to_string();
    let mut name = None;
    let mut array = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::field_name => name = Some(inner.as_str().to_string()),
            Rule::array_size => array = Some(build_array_size(inner)),
            _ => {}
        }
    }
    Token {
        kind: TokenKind::StructStart { name, array },
        text,
        position,
    }
}

/// Resettable token sequence over a script.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    tokens: Vec<Token>,
    next: usize,
}

impl Tokenizer {
    pub fn new(source: &str) -> Result<Self> {
        Ok(Tokenizer {
            tokens: tokenize(source)?,
            next: 0,
        })
    }

    /// Rewind to the first token.
    pub fn reset(&mut self) {
        self.next = 0;
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

impl Iterator for Tokenizer {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.next).cloned();
        if t.is_some() {
            self.next += 1;
        }
        t
    }
}
