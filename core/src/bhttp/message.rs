// Binary HTTP message — encode/decode of complete requests and responses

use super::control::{RequestControlData, ResponseControlData};
use super::fields::Fields;
use super::varint::{write_length_prefixed, write_varint, Reader};
use super::{BhttpError, FramingIndicator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlData {
    Request(RequestControlData),
    Response(ResponseControlData),
}

/// A request or response in binary HTTP form.
///
/// Equality ignores padding: two messages that differ only in trailing
/// zero bytes compare equal.
#[derive(Debug, Clone)]
pub struct BinaryHttpMessage {
    framing: FramingIndicator,
    control: ControlData,
    header_fields: Fields,
    content: Vec<u8>,
    trailer_fields: Fields,
    padding_length: usize,
}

impl BinaryHttpMessage {
    fn new(framing: FramingIndicator, control: ControlData) -> Self {
        Self {
            framing,
            control,
            header_fields: Fields::new(),
            content: Vec::new(),
            trailer_fields: Fields::new(),
            padding_length: 0,
        }
    }

    pub fn known_length_request(control: RequestControlData) -> Self {
        Self::new(
            FramingIndicator::KnownLengthRequest,
            ControlData::Request(control),
        )
    }

    pub fn known_length_response(control: ResponseControlData) -> Self {
        Self::new(
            FramingIndicator::KnownLengthResponse,
            ControlData::Response(control),
        )
    }

    pub fn indeterminate_length_request(control: RequestControlData) -> Self {
        Self::new(
            FramingIndicator::IndeterminateLengthRequest,
            ControlData::Request(control),
        )
    }

    pub fn indeterminate_length_response(control: ResponseControlData) -> Self {
        Self::new(
            FramingIndicator::IndeterminateLengthResponse,
            ControlData::Response(control),
        )
    }

    pub fn with_header_fields(mut self, fields: Fields) -> Self {
        self.header_fields = fields;
        self
    }

    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_trailer_fields(mut self, fields: Fields) -> Self {
        self.trailer_fields = fields;
        self
    }

    pub fn with_padding(mut self, padding_length: usize) -> Self {
        self.padding_length = padding_length;
        self
    }

    pub fn framing_indicator(&self) -> FramingIndicator {
        self.framing
    }

    pub fn control_data(&self) -> &ControlData {
        &self.control
    }

    pub fn request_control(&self) -> Option<&RequestControlData> {
        match &self.control {
            ControlData::Request(control) => Some(control),
            ControlData::Response(_) => None,
        }
    }

    pub fn response_control(&self) -> Option<&ResponseControlData> {
        match &self.control {
            ControlData::Response(control) => Some(control),
            ControlData::Request(_) => None,
        }
    }

    pub fn header_fields(&self) -> &Fields {
        &self.header_fields
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn trailer_fields(&self) -> &Fields {
        &self.trailer_fields
    }

    pub fn padding_length(&self) -> usize {
        self.padding_length
    }

    /// Encode every section, followed by `padding_length` zero bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, BhttpError> {
        let known_length = self.framing.is_known_length();
        let mut buf = Vec::with_capacity(64 + self.content.len() + self.padding_length);

        write_varint(&mut buf, self.framing.value())?;
        match (&self.control, self.framing.is_request()) {
            (ControlData::Request(control), true) => control.encode(&mut buf)?,
            (ControlData::Response(control), false) => control.encode(&mut buf, known_length)?,
            _ => return Err(BhttpError::ControlDataMismatch),
        }

        if known_length {
            self.header_fields.encode_known_length(&mut buf)?;
            write_length_prefixed(&mut buf, &self.content)?;
            self.trailer_fields.encode_known_length(&mut buf)?;
        } else {
            self.header_fields.encode_indeterminate_length(&mut buf)?;
            if !self.content.is_empty() {
                write_length_prefixed(&mut buf, &self.content)?;
            }
            write_varint(&mut buf, 0)?;
            self.trailer_fields.encode_indeterminate_length(&mut buf)?;
        }

        buf.resize(buf.len() + self.padding_length, 0);
        Ok(buf)
    }

    /// Decode a message. Content and trailers missing from a truncated
    /// message decode as empty.
    pub fn deserialize(data: &[u8]) -> Result<Self, BhttpError> {
        let mut reader = Reader::new(data);
        let framing = FramingIndicator::from_value(reader.read_varint()?)?;
        let known_length = framing.is_known_length();

        let control = if framing.is_request() {
            ControlData::Request(RequestControlData::decode(&mut reader)?)
        } else {
            ControlData::Response(ResponseControlData::decode(&mut reader, known_length)?)
        };
        let mut message = Self::new(framing, control);

        message.header_fields = read_fields(&mut reader, known_length)?;
        if reader.is_empty() {
            return Ok(message);
        }

        message.content = if known_length {
            reader.read_length_prefixed()?.to_vec()
        } else {
            read_chunks(&mut reader)?
        };
        if reader.is_empty() {
            return Ok(message);
        }

        message.trailer_fields = read_fields(&mut reader, known_length)?;

        let padding = reader.remaining();
        if let Some(index) = padding.iter().position(|b| *b != 0) {
            return Err(BhttpError::NonZeroPadding(reader.position() + index));
        }
        message.padding_length = padding.len();
        Ok(message)
    }
}

impl PartialEq for BinaryHttpMessage {
    fn eq(&self, other: &Self) -> bool {
        self.framing == other.framing
            && self.control == other.control
            && self.header_fields == other.header_fields
            && self.content == other.content
            && self.trailer_fields == other.trailer_fields
    }
}

impl Eq for BinaryHttpMessage {}

fn read_fields(reader: &mut Reader<'_>, known_length: bool) -> Result<Fields, BhttpError> {
    if known_length {
        Fields::decode_known_length(reader)
    } else {
        Fields::decode_indeterminate_length(reader)
    }
}

fn read_chunks(reader: &mut Reader<'_>) -> Result<Vec<u8>, BhttpError> {
    let mut content = Vec::new();
    loop {
        let chunk = reader.read_length_prefixed()?;
        if chunk.is_empty() {
            return Ok(content);
        }
        content.extend_from_slice(chunk);
    }
}
