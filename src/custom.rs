//! User-defined field types.
//!
//! A [`CustomFieldType`] registered through [`crate::CompileOptions::with_custom_type`]
//! makes extra type names legal in scripts. The compiled block keeps the
//! handler, and every codec pass built on that block calls it to read or
//! write the field. Handlers see the stream through [`BitInput`] /
//! [`BitOutput`], which already apply the codec's bit order.

use crate::bitstream::{BitOrder, BitReader, BitWriter, Endianness};
use crate::block::NamedFieldInfo;
use crate::error::Result;
use crate::value::Value;
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

/// Read side of the stream as seen by a custom type.
pub trait BitInput {
    /// Read `width` (1..=64) bits, first bit read is the least significant.
    fn read_bits(&mut self, width: u32) -> Result<u64>;
    fn read_byte(&mut self) -> Result<u8>;
    /// No bits are buffered and the source has no further byte.
    fn is_exhausted(&mut self) -> Result<bool>;
}

/// Write side of the stream as seen by a custom type.
pub trait BitOutput {
    fn write_bits(&mut self, value: u64, width: u32) -> Result<()>;
    fn write_byte(&mut self, b: u8) -> Result<()>;
}

/// The declaration a custom type is asked to process.
#[derive(Debug, Clone, Copy)]
pub struct CustomField<'a> {
    pub type_name: &'a str,
    pub info: Option<&'a NamedFieldInfo>,
    /// Evaluated `:n` / `:(expr)` parameter, if the declaration has one.
    pub extra: Option<i64>,
    pub byte_order: Endianness,
}

pub trait CustomFieldType: Send + Sync {
    /// Type names this handler accepts in scripts.
    fn type_names(&self) -> &[&str];

    /// Compile-time check of one declaration.
    fn is_allowed(&self, _type_name: &str, _has_extra: bool, _is_array: bool) -> bool {
        true
    }

    /// Read one value (one element, for arrays).
    fn read(&self, input: &mut dyn BitInput, field: &CustomField<'_>) -> Result<Value>;

    fn write(&self, output: &mut dyn BitOutput, field: &CustomField<'_>, value: &Value) -> Result<()>;
}

/// Handlers registered for one compilation.
#[derive(Clone, Default)]
pub struct CustomTypes(Vec<Arc<dyn CustomFieldType>>);

impl CustomTypes {
    pub fn push(&mut self, handler: Arc<dyn CustomFieldType>) {
        self.0.push(handler);
    }

    /// Index of the first handler accepting `type_name`.
    pub fn find(&self, type_name: &str) -> Option<usize> {
        self.0.iter().position(|h| h.type_names().iter().any(|n| *n == type_name))
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn CustomFieldType>> {
        self.0.get(index)
    }
}

impl fmt::Debug for CustomTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter().map(|h| h.type_names().join("|"))).finish()
    }
}

impl PartialEq for CustomTypes {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

impl Eq for CustomTypes {}

/// A [`BitReader`] bound to one bit order.
pub(crate) struct OrderedReader<'r, R> {
    pub(crate) reader: &'r mut BitReader<R>,
    pub(crate) order: BitOrder,
}

impl<R: Read> BitInput for OrderedReader<'_, R> {
    fn read_bits(&mut self, width: u32) -> Result<u64> {
        self.reader.read_bits(width, self.order)
    }

    fn read_byte(&mut self) -> Result<u8> {
        self.reader.read_byte(self.order)
    }

    fn is_exhausted(&mut self) -> Result<bool> {
        self.reader.is_exhausted()
    }
}

pub(crate) struct OrderedWriter<'w, W> {
    pub(crate) writer: &'w mut BitWriter<W>,
    pub(crate) order: BitOrder,
}

impl<W: Write> BitOutput for OrderedWriter<'_, W> {
    fn write_bits(&mut self, value: u64, width: u32) -> Result<()> {
        self.writer.write_bits(value, width, self.order)
    }

    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.writer.write_byte(b, self.order)
    }
}
