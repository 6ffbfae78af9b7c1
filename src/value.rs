//! Field Tree: values produced by a read pass and consumed by a write pass.

use crate::block::NamedFieldInfo;
use std::any::Any;
use std::sync::Arc;

/// A single decoded value (scalar, array or structure).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Byte(i8),
    UByte(u8),
    Short(i16),
    UShort(u16),
    Int(i32),
    UInt(u32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// `bit:n` value, low `n` bits significant.
    Bit(u8),
    /// `stringj` text; `None` is the null string.
    Str(Option<String>),
    /// `byte` / `ubyte` arrays.
    Bytes(Vec<u8>),
    /// Arrays of every other element type, structure arrays included.
    List(Vec<Value>),
    Struct(Vec<Field>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(x) => Some(*x as i64),
            Value::Byte(x) => Some(*x as i64),
            Value::UByte(x) => Some(*x as i64),
            Value::Short(x) => Some(*x as i64),
            Value::UShort(x) => Some(*x as i64),
            Value::Int(x) => Some(*x as i64),
            Value::UInt(x) => Some(*x as i64),
            Value::Long(x) => Some(*x),
            Value::Bit(x) => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().map(|v| v as u64)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => self.as_i64().map(|v| v != 0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => s.as_deref(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[Field]> {
        match self {
            Value::Struct(f) => Some(f),
            _ => None,
        }
    }

    /// Elements of an array value, or `None` for scalars and structures.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Bytes(b) => Some(b.len()),
            Value::List(v) => Some(v.len()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

/// One node of the Field Tree.
#[derive(Debug, Clone)]
pub struct Field {
    /// `None` for the root and for unnamed declarations.
    pub info: Option<Arc<NamedFieldInfo>>,
    pub value: Value,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl PartialEq for Field {
    // The payload slot belongs to the caller and does not take part in equality.
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info && self.value == other.value
    }
}

impl Field {
    pub fn new(info: Option<Arc<NamedFieldInfo>>, value: Value) -> Self {
        Field {
            info,
            value,
            payload: None,
        }
    }

    /// An unnamed node, typically the root structure.
    pub fn unnamed(value: Value) -> Self {
        Field::new(None, value)
    }

    pub fn name(&self) -> Option<&str> {
        self.info.as_deref().map(|i| i.name.as_str())
    }

    pub fn path(&self) -> Option<&str> {
        self.info.as_deref().map(|i| i.path.as_str())
    }

    pub fn children(&self) -> &[Field] {
        self.value.as_struct().unwrap_or(&[])
    }

    pub fn set_payload<T: Any + Send + Sync>(&mut self, payload: T) {
        self.payload = Some(Arc::new(payload));
    }

    pub fn payload<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    /// First field (depth first, structure arrays included) with the given dotted path.
    pub fn find(&self, path: &str) -> Option<&Field> {
        self.find_where(&|f: &Field| f.path() == Some(path))
    }

    /// First field with the given short name.
    pub fn find_by_name(&self, name: &str) -> Option<&Field> {
        self.find_where(&|f: &Field| f.name() == Some(name))
    }

    fn find_where(&self, pred: &dyn Fn(&Field) -> bool) -> Option<&Field> {
        for child in nested_fields(&self.value) {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find_where(pred) {
                return Some(found);
            }
        }
        None
    }

    /// Visit every named field in declaration order with its path and value.
    pub fn walk<F: FnMut(&str, &Value)>(&self, mut visit: F) {
        self.walk_inner(&mut visit);
    }

    fn walk_inner(&self, visit: &mut dyn FnMut(&str, &Value)) {
        for child in nested_fields(&self.value) {
            if let Some(path) = child.path() {
                visit(path, &child.value);
            }
            child.walk_inner(visit);
        }
    }
}

/// Fields directly inside a structure value or inside each element of a structure array.
fn nested_fields(value: &Value) -> Box<dyn Iterator<Item = &Field> + '_> {
    match value {
        Value::Struct(fields) => Box::new(fields.iter()),
        Value::List(items) => Box::new(items.iter().flat_map(|v| v.as_struct().unwrap_or(&[]).iter())),
        _ => Box::new(std::iter::empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(path: &str, offset: usize, value: Value) -> Field {
        let name = path.rsplit('.').next().unwrap_or(path);
        Field::new(Some(Arc::new(NamedFieldInfo::new(path, name, offset))), value)
    }

    fn sample() -> Field {
        Field::unnamed(Value::Struct(vec![
            named("n", 0, Value::UByte(2)),
            named(
                "items",
                1,
                Value::List(vec![
                    Value::Struct(vec![named("items.x", 2, Value::Bit(1))]),
                    Value::Struct(vec![named("items.x", 2, Value::Bit(3))]),
                ]),
            ),
            named("tail", 4, Value::Bytes(vec![9, 8])),
        ]))
    }

    #[test]
    fn numeric_accessors() {
        assert_eq!(Value::Byte(-1).as_i64(), Some(-1));
        assert_eq!(Value::UInt(u32::MAX).as_i64(), Some(u32::MAX as i64));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Float(1.5).as_i64(), None);
        assert_eq!(Value::Bytes(vec![1, 2]).len(), Some(2));
        assert!(Value::List(vec![]).is_empty());
        assert_eq!(Value::Str(Some("ok".into())).as_str(), Some("ok"));
        assert_eq!(Value::Str(None).as_str(), None);
        assert_eq!(Value::Str(None).as_i64(), None);
    }

    #[test]
    fn find_descends_into_structure_arrays() {
        let tree = sample();
        assert_eq!(tree.find("n").map(|f| &f.value), Some(&Value::UByte(2)));
        assert_eq!(tree.find("items.x").map(|f| &f.value), Some(&Value::Bit(1)));
        assert_eq!(tree.find_by_name("tail").and_then(|f| f.value.as_bytes()), Some(&[9u8, 8][..]));
        assert!(tree.find("missing").is_none());
    }

    #[test]
    fn walk_visits_named_fields_in_order() {
        let mut seen = Vec::new();
        sample().walk(|path, _| seen.push(path.to_string()));
        assert_eq!(seen, ["n", "items", "items.x", "items.x", "tail"]);
    }

    #[test]
    fn payload_is_ignored_by_equality() {
        let mut a = sample();
        let b = sample();
        a.set_payload(42u32);
        assert_eq!(a.payload::<u32>(), Some(&42));
        assert_eq!(a.payload::<String>(), None);
        assert_eq!(a, b);
    }
}
