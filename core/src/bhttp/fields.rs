// Header and trailer field sections

use super::varint::{write_length_prefixed, write_varint, Reader};
use super::BhttpError;

/// A single field line. Names are stored lower-cased; values are raw
/// octets since obs-text (0x80-0xFF) is legal in field values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub value: Vec<u8>,
}

impl Field {
    /// Value as text, when it is valid UTF-8
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

/// Ordered field lines; duplicates are kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields {
    fields: Vec<Field>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append, lower-casing the name.
    pub fn with(mut self, name: &str, value: impl AsRef<[u8]>) -> Self {
        self.append(name, value);
        self
    }

    pub fn append(&mut self, name: &str, value: impl AsRef<[u8]>) {
        self.fields.push(Field {
            name: name.to_ascii_lowercase(),
            value: value.as_ref().to_vec(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        let name = name.to_ascii_lowercase();
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_slice())
    }

    /// First value for `name` as text; `None` when absent or not UTF-8.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    fn encode_lines(&self, buf: &mut Vec<u8>) -> Result<(), BhttpError> {
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(BhttpError::EmptyFieldName);
            }
            write_length_prefixed(buf, field.name.as_bytes())?;
            write_length_prefixed(buf, &field.value)?;
        }
        Ok(())
    }

    /// Length-prefixed section.
    pub(crate) fn encode_known_length(&self, buf: &mut Vec<u8>) -> Result<(), BhttpError> {
        let mut section = Vec::new();
        self.encode_lines(&mut section)?;
        write_length_prefixed(buf, &section)
    }

    /// Field lines followed by a zero-length name terminator.
    pub(crate) fn encode_indeterminate_length(&self, buf: &mut Vec<u8>) -> Result<(), BhttpError> {
        self.encode_lines(buf)?;
        write_varint(buf, 0)
    }

    pub(crate) fn decode_known_length(reader: &mut Reader<'_>) -> Result<Self, BhttpError> {
        let section = reader.read_length_prefixed()?;
        let mut inner = Reader::new(section);
        let mut fields = Fields::new();
        while !inner.is_empty() {
            let name = read_string(&mut inner).map_err(section_error)?;
            let value = inner.read_length_prefixed().map_err(section_error)?;
            fields.append(&name, &value);
        }
        Ok(fields)
    }

    pub(crate) fn decode_indeterminate_length(reader: &mut Reader<'_>) -> Result<Self, BhttpError> {
        let mut fields = Fields::new();
        loop {
            let name = read_string(reader)?;
            if name.is_empty() {
                return Ok(fields);
            }
            let value = reader.read_length_prefixed()?;
            fields.append(&name, value);
        }
    }
}

impl<'a> IntoIterator for &'a Fields {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

pub(crate) fn read_string(reader: &mut Reader<'_>) -> Result<String, BhttpError> {
    let bytes = reader.read_length_prefixed()?;
    String::from_utf8(bytes.to_vec()).map_err(|_| BhttpError::InvalidUtf8)
}

// A field line running past its section boundary is a length mismatch, not truncation
fn section_error(err: BhttpError) -> BhttpError {
    match err {
        BhttpError::Truncated { .. } => BhttpError::FieldSectionLength,
        other => other,
    }
}
