//! # binlayout: compact DSL for binary layouts
//!
//! A layout script describes the bit/byte structure of a binary record. It is
//! compiled once into an immutable [`CompiledBlock`]; a [`Codec`] then runs that
//! block against any number of input streams (producing a [`Field`] tree) or
//! output streams (consuming a tree or a flat sequence of values).
//!
//! ## Script
//!
//! - Types: `bool`, `byte`, `ubyte`, `short`, `ushort`, `int`, `uint`, `long`,
//!   `floatj`, `doublej`, `stringj`, `bit:n` (1..=8, or `bit:(expr)`), plus any
//!   type registered through [`CompileOptions::with_custom_type`]
//! - Byte order prefix: `<` little endian, `>` big endian (default big, see [`CompileOptions`])
//! - Arrays: `byte [4] a;`, `byte [n * 2] a;`, `byte [_] rest;` (read to end, last field only)
//! - Structures: `hdr { ... }`, `items [count] { ... }`, anonymous `{ ... }`
//! - Directives: `align:n;`, `skip:n;`, `reset$$;`, `val:(expr) name;`
//! - Expressions: `+ - * / % << >> & ^ | ~`, parentheses, field names (dotted
//!   paths or unique short names), `$` for the stream byte counter, and names
//!   not declared in the script as external values supplied at run time
//!
//! ## Example
//!
//! ```text
//! byte n;
//! <ushort flags;
//! entry [n] {
//!   bit:3 kind;
//!   bit:5 size;
//!   byte [size] data;
//! }
//! byte [_] trailer;
//! ```
//!
//! ```ignore
//! let codec = binlayout::Codec::new(binlayout::compile("byte n; byte [n] items;")?);
//! let tree = codec.decode(&[3, 0x10, 0x20, 0x30])?;
//! assert_eq!(codec.encode(&tree)?, [3, 0x10, 0x20, 0x30]);
//! ```

pub mod bitstream;
pub mod block;
pub mod codec;
pub mod compiler;
pub mod config;
pub mod custom;
pub mod dump;
pub mod error;
pub mod expr;
pub mod field_map;
pub mod tokenizer;
pub mod value;

pub use bitstream::{BitOrder, BitReader, BitWriter, Endianness};
pub use block::{ArrayLen, CompiledBlock, CustomDecl, Descriptor, FieldKind, NamedFieldInfo, Param};
pub use codec::{Codec, Packer};
pub use compiler::{compile, compile_with};
pub use config::{CodecOptions, CompileOptions, ExternalFields};
pub use custom::{BitInput, BitOutput, CustomField, CustomFieldType, CustomTypes};
pub use error::{Error, Position, Result};
pub use expr::{BinaryOp, Evaluator, ExpressionVisitor, Special, UnaryOp};
pub use field_map::{ExternalValueResolver, NamedNumericFieldMap};
pub use tokenizer::{tokenize, Token, TokenKind, Tokenizer};
pub use value::{Field, Value};
