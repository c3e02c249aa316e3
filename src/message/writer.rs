use std::fmt::{self, Write};

use super::value::{Message, MessageArray, MessageError, MessageObject, MessageValue};

fn write_quoted<W: Write>(out: &mut W, s: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '\\' => out.write_str("\\\\")?,
            '"' => out.write_str("\\\"")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

fn write_value<W: Write>(out: &mut W, value: &MessageValue) -> fmt::Result {
    match value {
        MessageValue::Null => out.write_str("null"),
        MessageValue::Boolean(b) => write!(out, "{b}"),
        MessageValue::Integer(i) => write!(out, "{i}"),
        // `{:?}` always keeps a '.' or an exponent, so the value reads back as a double.
        MessageValue::Float(f) => write!(out, "{f:?}"),
        MessageValue::String(s) => write_quoted(out, s),
        MessageValue::Object(o) => write_object(out, o),
        MessageValue::Array(a) => write_array(out, a),
    }
}

fn write_object<W: Write>(out: &mut W, object: &MessageObject) -> fmt::Result {
    if let Some(name) = object.name() {
        out.write_str(name)?;
    }
    out.write_char('{')?;
    for (i, (key, value)) in object.iter().enumerate() {
        if i > 0 {
            out.write_char(',')?;
        }
        out.write_str(key)?;
        out.write_char('=')?;
        write_value(out, value)?;
    }
    out.write_char('}')
}

fn write_array<W: Write>(out: &mut W, array: &MessageArray) -> fmt::Result {
    if let Some(name) = array.name() {
        out.write_str(name)?;
    }
    out.write_char('[')?;
    for (i, value) in array.iter().enumerate() {
        if i > 0 {
            out.write_char(',')?;
        }
        write_value(out, value)?;
    }
    out.write_char(']')
}

fn check_finite(value: &MessageValue) -> Result<(), MessageError> {
    match value {
        MessageValue::Float(f) if !f.is_finite() => Err(MessageError::NonFiniteFloat(*f)),
        MessageValue::Object(o) => o.iter().try_for_each(|(_, v)| check_finite(v)),
        MessageValue::Array(a) => a.iter().try_for_each(check_finite),
        _ => Ok(()),
    }
}

impl Message {
    /// Serializes the message in wire form.
    ///
    /// Fails only for NaN or infinite floats, which the grammar cannot express.
    pub fn to_wire(&self) -> Result<String, MessageError> {
        self.check_encodable()?;
        Ok(self.to_string())
    }

    /// Fails if any nested float is NaN or infinite.
    pub fn check_encodable(&self) -> Result<(), MessageError> {
        match self {
            Message::Object(o) => o.iter().try_for_each(|(_, v)| check_finite(v)),
            Message::Array(a) => a.iter().try_for_each(check_finite),
        }
    }
}

impl fmt::Display for MessageValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self)
    }
}

impl fmt::Display for MessageObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_object(f, self)
    }
}

impl fmt::Display for MessageArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_array(f, self)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Object(o) => write_object(f, o),
            Message::Array(a) => write_array(f, a),
        }
    }
}
