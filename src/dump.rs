//! Format a Field Tree as indented text.

use crate::value::{Field, Value};

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Raw scalar string, or `None` for arrays and structures.
pub fn format_scalar(v: &Value) -> Option<String> {
    Some(match v {
        Value::Bool(x) => format!("{}", x),
        Value::Byte(x) => format!("{}", x),
        Value::UByte(x) => format!("{}", x),
        Value::Short(x) => format!("{}", x),
        Value::UShort(x) => format!("{}", x),
        Value::Int(x) => format!("{}", x),
        Value::UInt(x) => format!("{}", x),
        Value::Long(x) => format!("{}", x),
        Value::Float(x) => format!("{}", x),
        Value::Double(x) => format!("{}", x),
        Value::Bit(x) => format!("{:#b}", x),
        Value::Str(Some(text)) => format!("{:?}", text),
        Value::Str(None) => "null".to_string(),
        Value::Bytes(_) | Value::List(_) | Value::Struct(_) => return None,
    })
}

/// Multi-line dump of a whole tree; the root's own name is not printed.
pub fn dump(tree: &Field) -> String {
    let mut lines = Vec::new();
    match &tree.value {
        Value::Struct(children) => {
            for child in children {
                field_lines(child, 0, &mut lines);
            }
        }
        other => value_lines("", other, 0, &mut lines),
    }
    lines.join("\n")
}

fn field_lines(field: &Field, indent: usize, lines: &mut Vec<String>) {
    let label = field.name().unwrap_or("_");
    value_lines(label, &field.value, indent, lines);
}

fn value_lines(label: &str, v: &Value, indent: usize, lines: &mut Vec<String>) {
    let pad = "  ".repeat(indent);
    let prefix = if label.is_empty() {
        pad.clone()
    } else {
        format!("{}{}: ", pad, label)
    };
    match v {
        Value::Bytes(b) => lines.push(format!("{}hex({})", prefix, hex_string(b))),
        Value::Struct(children) => {
            lines.push(format!("{}{{", prefix));
            for child in children {
                field_lines(child, indent + 1, lines);
            }
            lines.push(format!("{}}}", pad));
        }
        Value::List(items) if items.iter().all(|i| format_scalar(i).is_some()) => {
            let parts: Vec<String> = items.iter().filter_map(format_scalar).collect();
            lines.push(format!("{}[{}]", prefix, parts.join(", ")));
        }
        Value::List(items) => {
            lines.push(format!("{}[", prefix));
            for (i, item) in items.iter().enumerate() {
                value_lines(&format!("[{}]", i), item, indent + 1, lines);
            }
            lines.push(format!("{}]", pad));
        }
        scalar => {
            let text = format_scalar(scalar).unwrap_or_default();
            lines.push(format!("{}{}", prefix, text));
        }
    }
}
