use std::{fmt::Display, str::FromStr};

use indexmap::IndexMap;
use thiserror::Error;

/// Errors raised while building or inspecting message values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MessageError {
    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),

    #[error("attribute '{name}' is missing or not of type {expected}")]
    MissingOrWrongType {
        name: String,
        expected: &'static str,
    },

    #[error("a {0} value cannot be sent as a top-level message")]
    NotAMessage(&'static str),

    #[error("cannot serialize non-finite float {0}")]
    NonFiniteFloat(f64),
}

/// Returns true if `s` matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if is_identifier_start(b) => bytes.all(is_identifier_part),
        _ => false,
    }
}

pub(crate) fn is_identifier_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

pub(crate) fn is_identifier_part(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn identifier(s: &str) -> Result<String, MessageError> {
    if is_identifier(s) {
        Ok(s.to_string())
    } else {
        Err(MessageError::InvalidIdentifier(s.to_string()))
    }
}

/// Any value that may appear inside a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Object(MessageObject),
    Array(MessageArray),
}

impl MessageValue {
    /// Human readable kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageValue::Null => "null",
            MessageValue::Boolean(_) => "boolean",
            MessageValue::Integer(_) => "integer",
            MessageValue::Float(_) => "float",
            MessageValue::String(_) => "string",
            MessageValue::Object(_) => "object",
            MessageValue::Array(_) => "array",
        }
    }

    /// Wraps an enum as its name string.
    pub fn from_enum<E: Display>(value: &E) -> Self {
        MessageValue::String(value.to_string())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, MessageValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MessageValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MessageValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Integers widen to floats; nothing else converts.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            MessageValue::Float(f) => Some(*f),
            MessageValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MessageValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&MessageObject> {
        match self {
            MessageValue::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&MessageArray> {
        match self {
            MessageValue::Array(a) => Some(a),
            _ => None,
        }
    }

    fn as_enum<E: FromStr>(&self) -> Option<E> {
        self.as_str().and_then(|s| s.parse().ok())
    }
}

macro_rules! from_integer {
    ($($t:ty),*) => {
        $(
            impl From<$t> for MessageValue {
                fn from(value: $t) -> Self {
                    MessageValue::Integer(i64::from(value))
                }
            }
        )*
    };
}

from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for MessageValue {
    fn from(value: bool) -> Self {
        MessageValue::Boolean(value)
    }
}

impl From<f32> for MessageValue {
    fn from(value: f32) -> Self {
        MessageValue::Float(f64::from(value))
    }
}

impl From<f64> for MessageValue {
    fn from(value: f64) -> Self {
        MessageValue::Float(value)
    }
}

impl From<char> for MessageValue {
    fn from(value: char) -> Self {
        MessageValue::String(value.to_string())
    }
}

impl From<&str> for MessageValue {
    fn from(value: &str) -> Self {
        MessageValue::String(value.to_string())
    }
}

impl From<String> for MessageValue {
    fn from(value: String) -> Self {
        MessageValue::String(value)
    }
}

impl From<MessageObject> for MessageValue {
    fn from(value: MessageObject) -> Self {
        MessageValue::Object(value)
    }
}

impl From<MessageArray> for MessageValue {
    fn from(value: MessageArray) -> Self {
        MessageValue::Array(value)
    }
}

impl From<Message> for MessageValue {
    fn from(value: Message) -> Self {
        match value {
            Message::Object(o) => MessageValue::Object(o),
            Message::Array(a) => MessageValue::Array(a),
        }
    }
}

impl<T: Into<MessageValue>> From<Option<T>> for MessageValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(MessageValue::Null, Into::into)
    }
}

impl<T: Into<MessageValue>> From<Vec<T>> for MessageValue {
    fn from(value: Vec<T>) -> Self {
        MessageValue::Array(MessageArray::wrap(value))
    }
}

impl<T: Clone + Into<MessageValue>> From<&[T]> for MessageValue {
    fn from(value: &[T]) -> Self {
        MessageValue::Array(MessageArray::wrap(value.iter().cloned()))
    }
}

/// A named or anonymous set of attributes, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MessageObject {
    name: Option<String>,
    attributes: IndexMap<String, MessageValue>,
}

impl MessageObject {
    pub fn new(name: &str) -> Result<Self, MessageError> {
        Ok(Self {
            name: Some(identifier(name)?),
            attributes: IndexMap::new(),
        })
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Identifiers coming out of the tokenizer are already valid.
    pub(crate) fn from_token(name: Option<String>) -> Self {
        Self {
            name,
            attributes: IndexMap::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is(&self, name: &str) -> bool {
        self.name() == Some(name)
    }

    /// Builder form of [`MessageObject::set`].
    pub fn with(mut self, key: &str, value: impl Into<MessageValue>) -> Result<Self, MessageError> {
        self.set(key, value)?;
        Ok(self)
    }

    /// Sets an attribute, returning the previous value. A replaced attribute
    /// keeps its original position.
    pub fn set(
        &mut self,
        key: &str,
        value: impl Into<MessageValue>,
    ) -> Result<Option<MessageValue>, MessageError> {
        let key = identifier(key)?;
        Ok(self.attributes.insert(key, value.into()))
    }

    pub(crate) fn insert_parsed(&mut self, key: String, value: MessageValue) {
        self.attributes.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<MessageValue> {
        self.attributes.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&MessageValue> {
        self.attributes.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MessageValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, MessageError> {
        self.typed(key, "boolean", MessageValue::as_bool)
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, MessageError> {
        self.typed_or(key, "boolean", default, MessageValue::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Result<i64, MessageError> {
        self.typed(key, "integer", MessageValue::as_int)
    }

    pub fn get_int_or(&self, key: &str, default: i64) -> Result<i64, MessageError> {
        self.typed_or(key, "integer", default, MessageValue::as_int)
    }

    pub fn get_float(&self, key: &str) -> Result<f64, MessageError> {
        self.typed(key, "float", MessageValue::as_float)
    }

    pub fn get_float_or(&self, key: &str, default: f64) -> Result<f64, MessageError> {
        self.typed_or(key, "float", default, MessageValue::as_float)
    }

    pub fn get_string(&self, key: &str) -> Result<&str, MessageError> {
        self.typed(key, "string", MessageValue::as_str)
    }

    pub fn get_string_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, MessageError> {
        self.typed_or(key, "string", default, MessageValue::as_str)
    }

    /// Reads a string attribute and parses it as `E`.
    pub fn get_enum<E: FromStr>(&self, key: &str) -> Result<E, MessageError> {
        self.typed(key, "enum", MessageValue::as_enum)
    }

    pub fn get_enum_or<E: FromStr>(&self, key: &str, default: E) -> Result<E, MessageError> {
        self.typed_or(key, "enum", default, MessageValue::as_enum)
    }

    pub fn get_object(&self, key: &str) -> Result<&MessageObject, MessageError> {
        self.typed(key, "object", MessageValue::as_object)
    }

    pub fn get_array(&self, key: &str) -> Result<&MessageArray, MessageError> {
        self.typed(key, "array", MessageValue::as_array)
    }

    fn typed<'a, T>(
        &'a self,
        key: &str,
        expected: &'static str,
        convert: impl FnOnce(&'a MessageValue) -> Option<T>,
    ) -> Result<T, MessageError> {
        self.get(key)
            .and_then(convert)
            .ok_or_else(|| MessageError::MissingOrWrongType {
                name: key.to_string(),
                expected,
            })
    }

    /// Only absence falls back to `default`; an explicit null is a wrong type.
    fn typed_or<'a, T>(
        &'a self,
        key: &str,
        expected: &'static str,
        default: T,
        convert: impl FnOnce(&'a MessageValue) -> Option<T>,
    ) -> Result<T, MessageError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => convert(value).ok_or_else(|| MessageError::MissingOrWrongType {
                name: key.to_string(),
                expected,
            }),
        }
    }
}

// Attribute order is part of a message's identity.
impl PartialEq for MessageObject {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.attributes.len() == other.attributes.len()
            && self.attributes.iter().eq(other.attributes.iter())
    }
}

/// A named or anonymous positional list of values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageArray {
    name: Option<String>,
    elements: Vec<MessageValue>,
}

impl MessageArray {
    pub fn new(name: &str) -> Result<Self, MessageError> {
        Ok(Self {
            name: Some(identifier(name)?),
            elements: Vec::new(),
        })
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub(crate) fn from_token(name: Option<String>) -> Self {
        Self {
            name,
            elements: Vec::new(),
        }
    }

    /// Converts any sequence of wrappable native values into an anonymous array.
    pub fn wrap<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<MessageValue>,
    {
        Self {
            name: None,
            elements: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Like [`MessageArray::wrap`] but with a message name.
    pub fn named<I, T>(name: &str, values: I) -> Result<Self, MessageError>
    where
        I: IntoIterator<Item = T>,
        T: Into<MessageValue>,
    {
        let mut array = Self::wrap(values);
        array.name = Some(identifier(name)?);
        Ok(array)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is(&self, name: &str) -> bool {
        self.name() == Some(name)
    }

    pub fn push(&mut self, value: impl Into<MessageValue>) {
        self.elements.push(value.into());
    }

    pub fn get(&self, index: usize) -> Option<&MessageValue> {
        self.elements.get(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MessageValue> {
        self.elements.iter()
    }

    pub fn get_int(&self, index: usize) -> Result<i64, MessageError> {
        self.typed(index, "integer", MessageValue::as_int)
    }

    pub fn get_float(&self, index: usize) -> Result<f64, MessageError> {
        self.typed(index, "float", MessageValue::as_float)
    }

    pub fn get_bool(&self, index: usize) -> Result<bool, MessageError> {
        self.typed(index, "boolean", MessageValue::as_bool)
    }

    pub fn get_string(&self, index: usize) -> Result<&str, MessageError> {
        self.typed(index, "string", MessageValue::as_str)
    }

    pub fn get_object(&self, index: usize) -> Result<&MessageObject, MessageError> {
        self.typed(index, "object", MessageValue::as_object)
    }

    fn typed<'a, T>(
        &'a self,
        index: usize,
        expected: &'static str,
        convert: impl FnOnce(&'a MessageValue) -> Option<T>,
    ) -> Result<T, MessageError> {
        self.get(index)
            .and_then(convert)
            .ok_or_else(|| MessageError::MissingOrWrongType {
                name: format!("[{index}]"),
                expected,
            })
    }
}

impl IntoIterator for MessageArray {
    type Item = MessageValue;
    type IntoIter = std::vec::IntoIter<MessageValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'a> IntoIterator for &'a MessageArray {
    type Item = &'a MessageValue;
    type IntoIter = std::slice::Iter<'a, MessageValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

/// One top-level unit on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Object(MessageObject),
    Array(MessageArray),
}

impl Message {
    pub fn name(&self) -> Option<&str> {
        match self {
            Message::Object(o) => o.name(),
            Message::Array(a) => a.name(),
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name() == Some(name)
    }

    pub fn as_object(&self) -> Option<&MessageObject> {
        match self {
            Message::Object(o) => Some(o),
            Message::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&MessageArray> {
        match self {
            Message::Array(a) => Some(a),
            Message::Object(_) => None,
        }
    }
}

impl From<MessageObject> for Message {
    fn from(value: MessageObject) -> Self {
        Message::Object(value)
    }
}

impl From<MessageArray> for Message {
    fn from(value: MessageArray) -> Self {
        Message::Array(value)
    }
}

impl TryFrom<MessageValue> for Message {
    type Error = MessageError;

    fn try_from(value: MessageValue) -> Result<Self, Self::Error> {
        match value {
            MessageValue::Object(o) => Ok(Message::Object(o)),
            MessageValue::Array(a) => Ok(Message::Array(a)),
            other => Err(MessageError::NotAMessage(other.kind())),
        }
    }
}
