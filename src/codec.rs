//! Decode/encode binary data against a compiled layout.
//!
//! A read pass walks the descriptors of a [`CompiledBlock`] in order, pulling
//! bits from a [`BitReader`], building the Field Tree and recording every named
//! numeric scalar so later array lengths, bit widths and `val` expressions can
//! use it. A write pass walks the same descriptors, taking values from a tree
//! (or a flat value sequence) and evaluating expressions against the values
//! being written, so `encode(decode(bytes)) == bytes`.

use crate::bitstream::{BitReader, BitWriter, Endianness};
use crate::block::{ArrayLen, CompiledBlock, CustomDecl, Descriptor, FieldKind, NamedFieldInfo, Param};
use crate::config::CodecOptions;
use crate::custom::{CustomField, CustomFieldType, OrderedReader, OrderedWriter};
use crate::error::{Error, Result};
use crate::field_map::{ExternalValueResolver, NamedNumericFieldMap};
use crate::value::{Field, Value};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

/// Runs a compiled layout in read or write mode. Holds no per-pass state, so
/// one codec can serve any number of concurrent passes.
#[derive(Debug, Clone)]
pub struct Codec {
    block: CompiledBlock,
    options: CodecOptions,
}

impl Codec {
    pub fn new(block: CompiledBlock) -> Self {
        Codec::with_options(block, CodecOptions::default())
    }

    pub fn with_options(block: CompiledBlock, options: CodecOptions) -> Self {
        Codec { block, options }
    }

    pub fn block(&self) -> &CompiledBlock {
        &self.block
    }

    pub fn options(&self) -> CodecOptions {
        self.options
    }

    // ==================== Read ====================

    /// Decode `bytes` into a Field Tree rooted at an unnamed structure.
    pub fn decode(&self, bytes: &[u8]) -> Result<Field> {
        self.decode_from(bytes, None)
    }

    pub fn decode_from<R: Read>(&self, reader: R, resolver: Option<&dyn ExternalValueResolver>) -> Result<Field> {
        self.run_read(reader, resolver).map(|(tree, _)| tree)
    }

    /// Decode and also report how many bytes of `bytes` the layout consumed.
    pub fn decode_with_extent(
        &self,
        bytes: &[u8],
        resolver: Option<&dyn ExternalValueResolver>,
    ) -> Result<(Field, usize)> {
        let (tree, consumed) = self.run_read(bytes, resolver)?;
        Ok((tree, consumed as usize))
    }

    fn run_read<R: Read>(&self, reader: R, resolver: Option<&dyn ExternalValueResolver>) -> Result<(Field, u64)> {
        let mut pass = ReadPass {
            block: &self.block,
            options: self.options,
            reader: BitReader::new(reader),
            fields: NamedNumericFieldMap::new(&self.block, resolver),
        };
        let mut children = Vec::new();
        pass.read_range(0, self.block.descriptors().len(), &mut children)?;
        let consumed = pass.reader.fetched_bytes();
        log::debug!(
            "decoded {} bytes ({} bits) into {} top-level fields",
            consumed,
            pass.reader.bit_counter(),
            children.len()
        );
        Ok((Field::unnamed(Value::Struct(children)), consumed))
    }

    // ==================== Write ====================

    /// Encode a Field Tree shaped like the result of [`Codec::decode`].
    pub fn encode(&self, tree: &Field) -> Result<Vec<u8>> {
        self.encode_to(tree, Vec::new(), None)
    }

    pub fn encode_with(&self, tree: &Field, resolver: Option<&dyn ExternalValueResolver>) -> Result<Vec<u8>> {
        self.encode_to(tree, Vec::new(), resolver)
    }

    /// Encode into any sink; the sink is flushed and handed back.
    pub fn encode_to<W: Write>(
        &self,
        tree: &Field,
        writer: W,
        resolver: Option<&dyn ExternalValueResolver>,
    ) -> Result<W> {
        let root = tree
            .value
            .as_struct()
            .ok_or_else(|| Error::Structural("tree root must be a structure".to_string()))?;
        let mut items = VecDeque::new();
        flatten(&self.block, 0, self.block.descriptors().len(), root, &mut items)?;
        self.run_write(items, writer, resolver)
    }

    /// Encode a flat sequence of values in declaration order. Structure fields
    /// contribute their members; `val` fields and directives take no value.
    pub fn encode_values(&self, values: &[Value], resolver: Option<&dyn ExternalValueResolver>) -> Result<Vec<u8>> {
        let items = values.iter().map(Item::Value).collect();
        self.run_write(items, Vec::new(), resolver)
    }

    /// Start a fluent value sequence for this layout.
    pub fn packer(&self) -> Packer<'_> {
        Packer {
            codec: self,
            values: Vec::new(),
        }
    }

    fn run_write<W: Write>(
        &self,
        items: VecDeque<Item<'_>>,
        writer: W,
        resolver: Option<&dyn ExternalValueResolver>,
    ) -> Result<W> {
        let mut pass = WritePass {
            block: &self.block,
            options: self.options,
            writer: BitWriter::new(writer),
            fields: NamedNumericFieldMap::new(&self.block, resolver),
            items,
        };
        pass.write_range(0, self.block.descriptors().len())?;
        if !pass.items.is_empty() {
            return Err(Error::Structural(format!(
                "{} values left over after the last field",
                pass.items.len()
            )));
        }
        log::debug!("encoded {} bits", pass.writer.bit_counter());
        pass.writer.finish()
    }
}

/// Fluent writer: push values in declaration order, then [`Packer::finish`].
pub struct Packer<'c> {
    codec: &'c Codec,
    values: Vec<Value>,
}

impl<'c> Packer<'c> {
    pub fn value(mut self, value: Value) -> Self {
        self.values.push(value);
        self
    }

    pub fn bool(self, v: bool) -> Self {
        self.value(Value::Bool(v))
    }

    pub fn byte(self, v: i8) -> Self {
        self.value(Value::Byte(v))
    }

    pub fn ubyte(self, v: u8) -> Self {
        self.value(Value::UByte(v))
    }

    pub fn short(self, v: i16) -> Self {
        self.value(Value::Short(v))
    }

    pub fn ushort(self, v: u16) -> Self {
        self.value(Value::UShort(v))
    }

    pub fn int(self, v: i32) -> Self {
        self.value(Value::Int(v))
    }

    pub fn uint(self, v: u32) -> Self {
        self.value(Value::UInt(v))
    }

    pub fn long(self, v: i64) -> Self {
        self.value(Value::Long(v))
    }

    pub fn float(self, v: f32) -> Self {
        self.value(Value::Float(v))
    }

    pub fn double(self, v: f64) -> Self {
        self.value(Value::Double(v))
    }

    pub fn bits(self, v: u8) -> Self {
        self.value(Value::Bit(v))
    }

    /// A `stringj` value; `None` writes the null marker.
    pub fn string(self, v: Option<&str>) -> Self {
        self.value(Value::Str(v.map(str::to_string)))
    }

    /// A whole `byte` / `ubyte` array.
    pub fn bytes(self, v: &[u8]) -> Self {
        self.value(Value::Bytes(v.to_vec()))
    }

    /// A whole array of any other element type.
    pub fn list(self, v: Vec<Value>) -> Self {
        self.value(Value::List(v))
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        self.codec.encode_values(&self.values, None)
    }

    pub fn finish_with(self, resolver: &dyn ExternalValueResolver) -> Result<Vec<u8>> {
        self.codec.encode_values(&self.values, Some(resolver))
    }
}

// ==================== Shared pass logic ====================

enum Flow {
    Continue,
    /// Input ran out at a field boundary and the caller asked to stop there.
    Stop,
}

trait Pass {
    fn block(&self) -> &CompiledBlock;
    fn options(&self) -> CodecOptions;
    fn fields(&self) -> &NamedNumericFieldMap<'_>;
    /// Value of the `$` pseudo-variable.
    fn stream_counter(&self) -> u64;

    fn eval(&self, index: usize) -> Result<i64> {
        let block = self.block();
        block.evaluator(index).eval(block, self.fields(), self.stream_counter())
    }

    fn param(&self, param: Param) -> Result<i64> {
        match param {
            Param::None => Ok(0),
            Param::Constant(n) => Ok(n as i64),
            Param::Expr(i) => self.eval(i),
        }
    }

    fn non_negative(&self, value: i64, what: &str) -> Result<u64> {
        if value >= 0 {
            Ok(value as u64)
        } else if self.options().negative_expression_result_as_zero {
            Ok(0)
        } else {
            Err(Error::Arithmetic(format!("{} evaluated to {}", what, value)))
        }
    }

    /// `None` for unbounded arrays.
    fn array_count(&self, len: ArrayLen) -> Result<Option<u64>> {
        match len {
            ArrayLen::Constant(n) => Ok(Some(n as u64)),
            ArrayLen::Expr(i) => self.non_negative(self.eval(i)?, "array length").map(Some),
            ArrayLen::Unbounded => Ok(None),
        }
    }

    fn bit_width(&self, d: &Descriptor) -> Result<u32> {
        if d.kind != FieldKind::Bit {
            return Ok(0);
        }
        let width = self.param(d.param)?;
        if (1..=8).contains(&width) {
            Ok(width as u32)
        } else {
            Err(Error::Structural(format!("bit width {} out of range 1..=8", width)))
        }
    }

    /// Evaluated parameter of a custom type declaration.
    fn extra(&self, d: &Descriptor) -> Result<Option<i64>> {
        match d.param {
            Param::None => Ok(None),
            param => self.param(param).map(Some),
        }
    }

    fn alignment(&self, d: &Descriptor) -> Result<u64> {
        let n = self.param(d.param)?;
        if n < 1 {
            return Err(Error::Arithmetic(format!("alignment evaluated to {}", n)));
        }
        Ok(n as u64)
    }

    fn describe(&self, index: usize) -> String {
        let block = self.block();
        let d = &block.descriptors()[index];
        match block.named_info(d) {
            Some(info) => info.path.clone(),
            None => format!("{} #{}", block.type_name(d), index),
        }
    }
}

fn closing_index(d: &Descriptor) -> Result<usize> {
    d.pair
        .ok_or_else(|| Error::Structural("structure start without matching end".to_string()))
}

fn custom_handler(block: &CompiledBlock, index: usize) -> Result<(&CustomDecl, &dyn CustomFieldType)> {
    block
        .custom_field(index)
        .ok_or_else(|| Error::Structural(format!("custom type #{} has no handler", index)))
}

/// The declaration at `index` takes a value: a value-holding field, or a
/// structure with one inside.
fn holds_value(block: &CompiledBlock, index: usize) -> bool {
    let descriptors = block.descriptors();
    let d = &descriptors[index];
    match (d.kind, d.pair) {
        (FieldKind::StructStart, Some(close)) => descriptors[index + 1..close].iter().any(|d| d.kind.holds_value()),
        (kind, _) => kind.holds_value(),
    }
}

/// Bits one element of an unbounded array needs at least.
fn element_bits(kind: FieldKind, width: u32) -> u32 {
    match kind {
        FieldKind::Bit => width,
        FieldKind::Str => 8,
        kind => kind.fixed_bits().unwrap_or(1),
    }
}

/// Fewest bits `start..end` can consume, counting only constant widths,
/// lengths and skips.
fn min_bits(block: &CompiledBlock, start: usize, end: usize) -> u64 {
    let descriptors = block.descriptors();
    let mut bits = 0u64;
    let mut i = start;
    while i < end {
        let d = &descriptors[i];
        let count = match d.array {
            None => 1,
            Some(ArrayLen::Constant(n)) => n as u64,
            Some(_) => 0,
        };
        let one = match (d.kind, d.param) {
            (FieldKind::StructStart, _) => {
                let close = d.pair.unwrap_or(end);
                bits = bits.saturating_add(count.saturating_mul(min_bits(block, i + 1, close)));
                i = close + 1;
                continue;
            }
            (FieldKind::Skip, Param::Constant(n)) => 8 * n as u64,
            (FieldKind::Bit, Param::Constant(w)) => w as u64,
            (FieldKind::Bit, _) => 1,
            (FieldKind::Str, _) => 8,
            (kind, _) => kind.fixed_bits().unwrap_or(0) as u64,
        };
        bits = bits.saturating_add(count.saturating_mul(one));
        i += 1;
    }
    bits
}

/// Register a scalar numeric value for later expressions.
fn register(fields: &mut NamedNumericFieldMap<'_>, info: Option<&Arc<NamedFieldInfo>>, value: &Value) {
    if let (Some(info), Some(n)) = (info, value.as_i64()) {
        fields.put(info, n);
    }
}

// ==================== Read pass ====================

struct ReadPass<'a, R> {
    block: &'a CompiledBlock,
    options: CodecOptions,
    reader: BitReader<R>,
    fields: NamedNumericFieldMap<'a>,
}

impl<R: Read> Pass for ReadPass<'_, R> {
    fn block(&self) -> &CompiledBlock {
        self.block
    }

    fn options(&self) -> CodecOptions {
        self.options
    }

    fn fields(&self) -> &NamedNumericFieldMap<'_> {
        &self.fields
    }

    fn stream_counter(&self) -> u64 {
        self.reader.byte_counter()
    }
}

impl<'a, R: Read> ReadPass<'a, R> {
    fn read_range(&mut self, start: usize, end: usize, out: &mut Vec<Field>) -> Result<Flow> {
        let block = self.block;
        let descriptors = block.descriptors();
        let mut i = start;
        while i < end {
            let d = &descriptors[i];
            if self.options.skip_remaining_fields_if_eof && holds_value(block, i) && self.reader.is_exhausted()? {
                log::trace!("stream exhausted before {}, stopping", self.describe(i));
                return Ok(Flow::Stop);
            }
            let info = block.named_info(d);
            match d.kind {
                FieldKind::StructStart => {
                    let close = closing_index(d)?;
                    let (value, flow) = self.read_struct(i, close)?;
                    out.push(Field::new(info.cloned(), value));
                    if let Flow::Stop = flow {
                        return Ok(Flow::Stop);
                    }
                    i = close + 1;
                    continue;
                }
                FieldKind::StructEnd => {}
                FieldKind::Align => {
                    let n = self.alignment(d)?;
                    self.reader.align(n)?;
                }
                FieldKind::Skip => {
                    let n = self.param(d.param)?;
                    let n = self.non_negative(n, "skip count")?;
                    self.reader.skip_bytes(n)?;
                }
                FieldKind::ResetCounter => self.reader.reset_counter(),
                FieldKind::Val => {
                    let value = Value::Long(self.param(d.param)?);
                    register(&mut self.fields, info, &value);
                    out.push(Field::new(info.cloned(), value));
                }
                _ => {
                    let value = self.read_field(d)?;
                    log::trace!("read {} = {:?}", self.describe(i), value);
                    if d.array.is_none() {
                        register(&mut self.fields, info, &value);
                    }
                    out.push(Field::new(info.cloned(), value));
                }
            }
            i += 1;
        }
        Ok(Flow::Continue)
    }

    fn read_struct(&mut self, start: usize, close: usize) -> Result<(Value, Flow)> {
        let block = self.block;
        let d = &block.descriptors()[start];
        let Some(len) = d.array else {
            let mut children = Vec::new();
            let flow = self.read_range(start + 1, close, &mut children)?;
            return Ok((Value::Struct(children), flow));
        };
        let count = self.array_count(len)?;
        let order = self.options.bit_order;
        let least = min_bits(block, start + 1, close).clamp(1, u32::MAX as u64) as u32;
        let mut elements = Vec::new();
        loop {
            match count {
                Some(n) if elements.len() as u64 >= n => break,
                None if self.reader.at_end_for(least, order)? => break,
                _ => {}
            }
            let mark = (self.reader.fetched_bytes(), self.reader.buffered_bits());
            let mut children = Vec::new();
            let flow = self.read_range(start + 1, close, &mut children)?;
            if let Flow::Stop = flow {
                if !children.is_empty() {
                    elements.push(Value::Struct(children));
                }
                return Ok((Value::List(elements), Flow::Stop));
            }
            elements.push(Value::Struct(children));
            if count.is_none() && mark == (self.reader.fetched_bytes(), self.reader.buffered_bits()) {
                return Err(Error::Structural(format!(
                    "element of unbounded array {} consumes no data",
                    self.describe(start)
                )));
            }
        }
        Ok((Value::List(elements), Flow::Continue))
    }

    fn read_field(&mut self, d: &Descriptor) -> Result<Value> {
        let width = self.bit_width(d)?;
        let Some(len) = d.array else {
            return self.read_scalar(d, width);
        };
        let count = self.array_count(len)?;
        let order = self.options.bit_order;
        match (d.kind, count) {
            (FieldKind::Byte | FieldKind::UByte, Some(n)) => Ok(Value::Bytes(self.reader.read_bytes(n as usize, order)?)),
            (FieldKind::Byte | FieldKind::UByte, None) => {
                let mut bytes = Vec::new();
                while !self.reader.at_end_for(8, order)? {
                    bytes.push(self.reader.read_byte(order)?);
                }
                Ok(Value::Bytes(bytes))
            }
            (_, Some(n)) => {
                let mut items = Vec::with_capacity((n as usize).min(4096));
                for _ in 0..n {
                    items.push(self.read_scalar(d, width)?);
                }
                Ok(Value::List(items))
            }
            (kind, None) => {
                let least = element_bits(kind, width);
                let mut items = Vec::new();
                while !self.reader.at_end_for(least, order)? {
                    let mark = (self.reader.fetched_bytes(), self.reader.buffered_bits());
                    items.push(self.read_scalar(d, width)?);
                    if mark == (self.reader.fetched_bytes(), self.reader.buffered_bits()) {
                        return Err(Error::Structural(format!(
                            "element of unbounded {} array consumes no data",
                            self.block.type_name(d)
                        )));
                    }
                }
                Ok(Value::List(items))
            }
        }
    }

    fn read_custom(&mut self, d: &Descriptor, index: usize) -> Result<Value> {
        let block = self.block;
        let (decl, handler) = custom_handler(block, index)?;
        let field = CustomField {
            type_name: &decl.type_name,
            info: block.named_info(d).map(|i| &**i),
            extra: self.extra(d)?,
            byte_order: d.byte_order,
        };
        let mut input = OrderedReader {
            reader: &mut self.reader,
            order: self.options.bit_order,
        };
        handler.read(&mut input, &field)
    }

    fn read_scalar(&mut self, d: &Descriptor, width: u32) -> Result<Value> {
        if let FieldKind::Custom(index) = d.kind {
            return self.read_custom(d, index);
        }
        let endianness = d.byte_order;
        let order = self.options.bit_order;
        let r = &mut self.reader;
        Ok(match d.kind {
            FieldKind::Bool => match r.read_byte(order)? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => {
                    return Err(Error::Structural(format!("bool byte {:#04x} is neither 0 nor 1", other)));
                }
            },
            FieldKind::Byte => Value::Byte(r.read_byte(order)? as i8),
            FieldKind::UByte => Value::UByte(r.read_byte(order)?),
            FieldKind::Short => Value::Short(r.read_u16(endianness, order)? as i16),
            FieldKind::UShort => Value::UShort(r.read_u16(endianness, order)?),
            FieldKind::Int => Value::Int(r.read_u32(endianness, order)? as i32),
            FieldKind::UInt => Value::UInt(r.read_u32(endianness, order)?),
            FieldKind::Long => Value::Long(r.read_u64(endianness, order)? as i64),
            FieldKind::Float => Value::Float(r.read_f32(endianness, order)?),
            FieldKind::Double => Value::Double(r.read_f64(endianness, order)?),
            FieldKind::Bit => Value::Bit(r.read_bits(width, order)? as u8),
            FieldKind::Str => Value::Str(r.read_string(order)?),
            other => {
                return Err(Error::Structural(format!("'{}' does not hold a value", other.type_name())));
            }
        })
    }
}

// ==================== Write pass ====================

#[derive(Debug, Clone, Copy)]
enum Item<'v> {
    Value(&'v Value),
    /// Element count of the structure array that follows; only trees carry it.
    Elements(usize),
}

/// Lay out a tree's values in descriptor order. Returns `false` if the tree
/// ends early (a decode stopped at end of input).
fn flatten<'v>(
    block: &CompiledBlock,
    start: usize,
    end: usize,
    fields: &'v [Field],
    out: &mut VecDeque<Item<'v>>,
) -> Result<bool> {
    let descriptors = block.descriptors();
    let mut children = fields.iter();
    let mut i = start;
    while i < end {
        let d = &descriptors[i];
        if d.kind.is_directive() || d.kind == FieldKind::StructEnd {
            i += 1;
            continue;
        }
        let Some(child) = children.next() else {
            return Ok(false);
        };
        if let Some(info) = &child.info {
            if info.offset != i {
                return Err(Error::Structural(format!(
                    "tree field '{}' found where declaration #{} was expected",
                    info.path, i
                )));
            }
        }
        let mismatch = || {
            Error::Structural(format!(
                "tree node for declaration #{} ({}) has the wrong shape",
                i,
                d.kind.type_name()
            ))
        };
        match d.kind {
            FieldKind::StructStart => {
                let close = closing_index(d)?;
                match (d.array, &child.value) {
                    (None, Value::Struct(inner)) => {
                        if !flatten(block, i + 1, close, inner, out)? {
                            return Ok(false);
                        }
                    }
                    (Some(_), Value::List(elements)) => {
                        out.push_back(Item::Elements(elements.len()));
                        for element in elements {
                            let inner = element.as_struct().ok_or_else(mismatch)?;
                            if !flatten(block, i + 1, close, inner, out)? {
                                return Ok(false);
                            }
                        }
                    }
                    _ => return Err(mismatch()),
                }
                i = close + 1;
                continue;
            }
            FieldKind::Val => {}
            _ => out.push_back(Item::Value(&child.value)),
        }
        i += 1;
    }
    if let Some(extra) = children.next() {
        return Err(Error::Structural(format!(
            "unexpected extra tree field {}",
            extra.path().unwrap_or("<unnamed>")
        )));
    }
    Ok(true)
}

struct WritePass<'a, 'v, W: Write> {
    block: &'a CompiledBlock,
    options: CodecOptions,
    writer: BitWriter<W>,
    fields: NamedNumericFieldMap<'a>,
    items: VecDeque<Item<'v>>,
}

impl<W: Write> Pass for WritePass<'_, '_, W> {
    fn block(&self) -> &CompiledBlock {
        self.block
    }

    fn options(&self) -> CodecOptions {
        self.options
    }

    fn fields(&self) -> &NamedNumericFieldMap<'_> {
        &self.fields
    }

    fn stream_counter(&self) -> u64 {
        self.writer.stream_counter()
    }
}

impl<'a, 'v, W: Write> WritePass<'a, 'v, W> {
    fn write_range(&mut self, start: usize, end: usize) -> Result<Flow> {
        let block = self.block;
        let descriptors = block.descriptors();
        let mut i = start;
        while i < end {
            let d = &descriptors[i];
            if self.options.skip_remaining_fields_if_eof && self.items.is_empty() && holds_value(block, i) {
                log::trace!("values exhausted before {}, stopping", self.describe(i));
                return Ok(Flow::Stop);
            }
            let info = block.named_info(d);
            match d.kind {
                FieldKind::StructStart => {
                    let close = closing_index(d)?;
                    if let Flow::Stop = self.write_struct(i, close)? {
                        return Ok(Flow::Stop);
                    }
                    i = close + 1;
                    continue;
                }
                FieldKind::StructEnd => {}
                FieldKind::Align => {
                    let n = self.alignment(d)?;
                    self.writer.align(n)?;
                }
                FieldKind::Skip => {
                    let n = self.param(d.param)?;
                    let n = self.non_negative(n, "skip count")?;
                    self.writer.skip_bytes(n)?;
                }
                FieldKind::ResetCounter => self.writer.reset_counter()?,
                FieldKind::Val => {
                    let value = Value::Long(self.param(d.param)?);
                    register(&mut self.fields, info, &value);
                }
                _ => {
                    let value = self.next_value(i)?;
                    log::trace!("write {} = {:?}", self.describe(i), value);
                    self.write_field(i, d, value)?;
                }
            }
            i += 1;
        }
        Ok(Flow::Continue)
    }

    fn next_value(&mut self, index: usize) -> Result<&'v Value> {
        match self.items.pop_front() {
            Some(Item::Value(v)) => Ok(v),
            Some(Item::Elements(_)) => Err(Error::Structural(format!(
                "expected a value for {}, found a structure array",
                self.describe(index)
            ))),
            None => Err(Error::Structural(format!("no value supplied for {}", self.describe(index)))),
        }
    }

    fn write_struct(&mut self, start: usize, close: usize) -> Result<Flow> {
        let block = self.block;
        let d = &block.descriptors()[start];
        let Some(len) = d.array else {
            return self.write_range(start + 1, close);
        };
        let count = self.array_count(len)?;
        let supplied = match self.items.front() {
            Some(Item::Elements(n)) => {
                let n = *n as u64;
                self.items.pop_front();
                Some(n)
            }
            _ => None,
        };
        let mut cut_short = false;
        let total = match (count, supplied) {
            (Some(expected), Some(got)) if expected != got => {
                // a lenient decode stops inside the array when the input ends
                if !(self.options.skip_remaining_fields_if_eof && got < expected) {
                    return Err(Error::Structural(format!(
                        "{} expects {} elements, got {}",
                        self.describe(start),
                        expected,
                        got
                    )));
                }
                cut_short = true;
                Some(got)
            }
            (count, supplied) => count.or(supplied),
        };
        let mut done = 0u64;
        loop {
            match total {
                Some(n) if done >= n => break,
                None if self.items.is_empty() => break,
                _ => {}
            }
            let before = self.items.len();
            if let Flow::Stop = self.write_range(start + 1, close)? {
                return Ok(Flow::Stop);
            }
            if total.is_none() && before == self.items.len() {
                return Err(Error::Structural(format!(
                    "element of unbounded array {} takes no values",
                    self.describe(start)
                )));
            }
            done += 1;
        }
        Ok(if cut_short { Flow::Stop } else { Flow::Continue })
    }

    fn write_field(&mut self, index: usize, d: &Descriptor, value: &Value) -> Result<()> {
        let width = self.bit_width(d)?;
        let Some(len) = d.array else {
            if let Some(normalized) = self.write_element(index, d, width, value)? {
                let block = self.block;
                register(&mut self.fields, block.named_info(d), &normalized);
            }
            return Ok(());
        };
        let count = self.array_count(len)?;
        let check_len = |pass: &Self, actual: usize| match count {
            Some(n) if n != actual as u64 => Err(Error::Structural(format!(
                "{} expects {} elements, got {}",
                pass.describe(index),
                n,
                actual
            ))),
            _ => Ok(()),
        };
        match (d.kind, value) {
            (FieldKind::Byte | FieldKind::UByte, Value::Bytes(bytes)) => {
                check_len(&*self, bytes.len())?;
                self.writer.write_bytes(bytes, self.options.bit_order)
            }
            (_, Value::List(items)) => {
                check_len(&*self, items.len())?;
                for item in items {
                    self.write_element(index, d, width, item)?;
                }
                Ok(())
            }
            _ => Err(self.mismatch(index, format!("array value, got {:?}", value))),
        }
    }

    /// Write one scalar or array element. Returns the value as a read would
    /// produce it; custom types return nothing.
    fn write_element(&mut self, index: usize, d: &Descriptor, width: u32, value: &Value) -> Result<Option<Value>> {
        if let FieldKind::Custom(custom) = d.kind {
            self.write_custom(d, custom, value)?;
            return Ok(None);
        }
        let normalized = normalize(d.kind, width, value).map_err(|e| self.mismatch(index, e))?;
        self.emit(d.byte_order, width, &normalized)?;
        Ok(Some(normalized))
    }

    fn write_custom(&mut self, d: &Descriptor, index: usize, value: &Value) -> Result<()> {
        let block = self.block;
        let (decl, handler) = custom_handler(block, index)?;
        let field = CustomField {
            type_name: &decl.type_name,
            info: block.named_info(d).map(|i| &**i),
            extra: self.extra(d)?,
            byte_order: d.byte_order,
        };
        let mut output = OrderedWriter {
            writer: &mut self.writer,
            order: self.options.bit_order,
        };
        handler.write(&mut output, &field, value)
    }

    fn mismatch(&self, index: usize, detail: String) -> Error {
        Error::Structural(format!("{} expects {}", self.describe(index), detail))
    }

    fn emit(&mut self, endianness: Endianness, width: u32, value: &Value) -> Result<()> {
        let order = self.options.bit_order;
        let w = &mut self.writer;
        match *value {
            Value::Bool(b) => w.write_byte(b as u8, order),
            Value::Byte(x) => w.write_byte(x as u8, order),
            Value::UByte(x) => w.write_byte(x, order),
            Value::Short(x) => w.write_u16(x as u16, endianness, order),
            Value::UShort(x) => w.write_u16(x, endianness, order),
            Value::Int(x) => w.write_u32(x as u32, endianness, order),
            Value::UInt(x) => w.write_u32(x, endianness, order),
            Value::Long(x) => w.write_u64(x as u64, endianness, order),
            Value::Float(x) => w.write_f32(x, endianness, order),
            Value::Double(x) => w.write_f64(x, endianness, order),
            Value::Bit(x) => w.write_bits(x as u64, width, order),
            Value::Str(ref text) => w.write_string(text.as_deref(), order),
            _ => Err(Error::Structural(format!("{:?} is not a scalar", value))),
        }
    }
}

/// Convert a supplied value to exactly what a read of `kind` would produce.
/// Integers are truncated to the field width.
fn normalize(kind: FieldKind, width: u32, value: &Value) -> std::result::Result<Value, String> {
    let expected = || format!("a {} value, got {:?}", kind.type_name(), value);
    Ok(match kind {
        FieldKind::Float => Value::Float(value.as_f64().ok_or_else(expected)? as f32),
        FieldKind::Double => Value::Double(value.as_f64().ok_or_else(expected)?),
        FieldKind::Bool => Value::Bool(value.as_bool().ok_or_else(expected)?),
        FieldKind::Str => match value {
            Value::Str(text) => Value::Str(text.clone()),
            _ => return Err(expected()),
        },
        _ => {
            let n = value.as_i64().ok_or_else(expected)?;
            match kind {
                FieldKind::Byte => Value::Byte(n as i8),
                FieldKind::UByte => Value::UByte(n as u8),
                FieldKind::Short => Value::Short(n as i16),
                FieldKind::UShort => Value::UShort(n as u16),
                FieldKind::Int => Value::Int(n as i32),
                FieldKind::UInt => Value::UInt(n as u32),
                FieldKind::Long => Value::Long(n),
                FieldKind::Bit => Value::Bit((n as u64 & ((1u64 << width) - 1)) as u8),
                _ => return Err(expected()),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn codec(script: &str) -> Codec {
        Codec::new(compile(script).expect("compile"))
    }

    #[test]
    fn normalize_truncates_to_field_width() {
        assert_eq!(normalize(FieldKind::UByte, 0, &Value::Long(0x1ff)), Ok(Value::UByte(0xff)));
        assert_eq!(normalize(FieldKind::Bit, 3, &Value::Int(0b1101)), Ok(Value::Bit(0b101)));
        assert_eq!(normalize(FieldKind::Bool, 0, &Value::UByte(2)), Ok(Value::Bool(true)));
        assert_eq!(normalize(FieldKind::Double, 0, &Value::Float(0.5)), Ok(Value::Double(0.5)));
        assert!(normalize(FieldKind::Int, 0, &Value::Bytes(vec![1])).is_err());
        assert!(normalize(FieldKind::Int, 0, &Value::Double(1.0)).is_err());
    }

    #[test]
    fn flatten_skips_val_fields_and_counts_structure_elements() {
        let c = codec("byte n; val:(n*2) twice; s [n] { bit:4 a; bit:4 b; }");
        let tree = c.decode(&[2, 0x21, 0x43]).unwrap();
        let root = tree.value.as_struct().unwrap();
        let mut items = VecDeque::new();
        assert!(flatten(c.block(), 0, c.block().descriptors().len(), root, &mut items).unwrap());
        // n, Elements(2), a, b, a, b
        assert_eq!(items.len(), 6);
        assert!(matches!(items[1], Item::Elements(2)));
    }

    #[test]
    fn flatten_rejects_misplaced_fields() {
        let c = codec("byte a; byte b;");
        let tree = c.decode(&[1, 2]).unwrap();
        let mut swapped = tree.value.as_struct().unwrap().to_vec();
        swapped.swap(0, 1);
        let err = c.encode(&Field::unnamed(Value::Struct(swapped))).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn negative_lengths_fail_unless_clamped() {
        let script = "byte n; byte [n - 5] data;";
        let err = codec(script).decode(&[1]).unwrap_err();
        assert!(matches!(err, Error::Arithmetic(_)));

        let block = compile(script).unwrap();
        let clamped = Codec::with_options(block, CodecOptions::default().negative_expression_result_as_zero(true));
        let tree = clamped.decode(&[1]).unwrap();
        assert_eq!(tree.find("data").map(|f| &f.value), Some(&Value::Bytes(vec![])));
    }

    #[test]
    fn runtime_bit_width_is_checked() {
        let err = codec("byte w; bit:(w) x;").decode(&[9, 0]).unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn leftover_values_are_rejected() {
        let c = codec("byte a;");
        let err = c.packer().ubyte(1).ubyte(2).finish().unwrap_err();
        assert!(matches!(err, Error::Structural(_)));
    }

    #[test]
    fn minimum_element_size_counts_constant_parts_only() {
        let block = compile("byte n; s [_] { bit:3 a; byte [2] b; byte [n] c; t [2] { bit:(n) d; } skip:1; align:4; }").unwrap();
        let descriptors = block.descriptors();
        let close = descriptors[1].pair.unwrap();
        // 3 + 16 + 0 + 2 * 1 + 8
        assert_eq!(min_bits(&block, 2, close), 29);
    }

    #[test]
    fn only_fields_and_structures_with_fields_hold_values() {
        let block = compile("align:2; byte a; s { skip:1; } t { bit:1 b; } val:(a) v;").unwrap();
        let holding: Vec<bool> = (0..block.descriptors().len()).map(|i| holds_value(&block, i)).collect();
        assert_eq!(holding, [false, true, false, false, false, true, true, false, false]);
    }

    #[test]
    fn non_canonical_bool_is_rejected() {
        let c = codec("bool f;");
        assert!(matches!(c.decode(&[2]).unwrap_err(), Error::Structural(_)));
        for byte in [0u8, 1] {
            let tree = c.decode(&[byte]).unwrap();
            assert_eq!(c.encode(&tree).unwrap(), [byte]);
        }
    }
}
