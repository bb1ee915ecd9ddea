// Control data for requests (method, scheme, authority, path) and responses (status codes)

use super::fields::{read_string, Fields};
use super::varint::{write_length_prefixed, write_varint, Reader};
use super::BhttpError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestControlData {
    pub method: String,
    pub scheme: String,
    pub authority: String,
    pub path: String,
}

impl RequestControlData {
    pub fn new(method: &str, scheme: &str, authority: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
        }
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>) -> Result<(), BhttpError> {
        write_length_prefixed(buf, self.method.as_bytes())?;
        write_length_prefixed(buf, self.scheme.as_bytes())?;
        write_length_prefixed(buf, self.authority.as_bytes())?;
        write_length_prefixed(buf, self.path.as_bytes())
    }

    pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self, BhttpError> {
        Ok(Self {
            method: read_string(reader)?,
            scheme: read_string(reader)?,
            authority: read_string(reader)?,
            path: read_string(reader)?,
        })
    }
}

/// A 1xx response preceding the final one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformativeResponse {
    pub status_code: u16,
    pub header_fields: Fields,
}

impl InformativeResponse {
    pub fn new(status_code: u16, header_fields: Fields) -> Result<Self, BhttpError> {
        if !is_informational(u64::from(status_code)) {
            return Err(BhttpError::InvalidInformationalStatus(u64::from(status_code)));
        }
        Ok(Self {
            status_code,
            header_fields,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseControlData {
    pub informative_responses: Vec<InformativeResponse>,
    pub final_status_code: u16,
}

impl ResponseControlData {
    pub fn new(final_status_code: u16) -> Result<Self, BhttpError> {
        if !is_final(u64::from(final_status_code)) {
            return Err(BhttpError::InvalidFinalStatus(u64::from(final_status_code)));
        }
        Ok(Self {
            informative_responses: Vec::new(),
            final_status_code,
        })
    }

    pub fn with_informative(mut self, response: InformativeResponse) -> Self {
        self.informative_responses.push(response);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.final_status_code)
    }

    pub(crate) fn encode(&self, buf: &mut Vec<u8>, known_length: bool) -> Result<(), BhttpError> {
        for informative in &self.informative_responses {
            write_varint(buf, u64::from(informative.status_code))?;
            if known_length {
                informative.header_fields.encode_known_length(buf)?;
            } else {
                informative.header_fields.encode_indeterminate_length(buf)?;
            }
        }
        write_varint(buf, u64::from(self.final_status_code))
    }

    pub(crate) fn decode(reader: &mut Reader<'_>, known_length: bool) -> Result<Self, BhttpError> {
        let mut informative_responses = Vec::new();
        loop {
            let status = reader.read_varint()?;
            if is_final(status) {
                return Ok(Self {
                    informative_responses,
                    final_status_code: status as u16,
                });
            }
            if !is_informational(status) {
                return Err(BhttpError::InvalidFinalStatus(status));
            }
            let header_fields = if known_length {
                Fields::decode_known_length(reader)?
            } else {
                Fields::decode_indeterminate_length(reader)?
            };
            informative_responses.push(InformativeResponse {
                status_code: status as u16,
                header_fields,
            });
        }
    }
}

fn is_informational(status: u64) -> bool {
    (100..200).contains(&status)
}

fn is_final(status: u64) -> bool {
    (200..600).contains(&status)
}
