//! Minimal RFC 2865/2866 packet framing.
//!
//! Only what the adapter needs: parsing requests, PAP password recovery,
//! and building authenticated responses. Anything beyond that belongs to
//! the NAS side of the conversation.

use thiserror::Error;

pub const ACCESS_REQUEST: u8 = 1;
pub const ACCESS_ACCEPT: u8 = 2;
pub const ACCESS_REJECT: u8 = 3;
pub const ACCOUNTING_REQUEST: u8 = 4;
pub const ACCOUNTING_RESPONSE: u8 = 5;

/// Attribute types used by the adapter.
pub mod attr {
    pub const USER_NAME: u8 = 1;
    pub const USER_PASSWORD: u8 = 2;
    pub const NAS_IP_ADDRESS: u8 = 4;
    pub const REPLY_MESSAGE: u8 = 18;
    pub const NAS_IDENTIFIER: u8 = 32;
    pub const ACCT_STATUS_TYPE: u8 = 40;
    pub const ACCT_SESSION_ID: u8 = 44;
}

const HEADER_LEN: usize = 20;
const MAX_PACKET_LEN: usize = 4096;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("packet too short: {0} bytes")]
    TooShort(usize),

    #[error("declared length {declared} out of bounds (received {received})")]
    BadLength { declared: usize, received: usize },

    #[error("malformed attribute at offset {0}")]
    BadAttribute(usize),
}

/// One RADIUS packet, request or response.
#[derive(Debug, Clone)]
pub struct Packet {
    pub code: u8,
    pub identifier: u8,
    pub authenticator: [u8; 16],
    pub attributes: Vec<(u8, Vec<u8>)>,
}

impl Packet {
    /// Parse a datagram. The declared length must fit inside the received
    /// buffer; trailing bytes beyond it are ignored per the RFC.
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TooShort(buf.len()));
        }

        let declared = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
        if declared < HEADER_LEN || declared > buf.len() || declared > MAX_PACKET_LEN {
            return Err(PacketError::BadLength {
                declared,
                received: buf.len(),
            });
        }

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&buf[4..20]);

        let mut attributes = Vec::new();
        let mut offset = HEADER_LEN;
        while offset < declared {
            if declared - offset < 2 {
                return Err(PacketError::BadAttribute(offset));
            }
            let attr_type = buf[offset];
            let attr_len = usize::from(buf[offset + 1]);
            if attr_len < 2 || offset + attr_len > declared {
                return Err(PacketError::BadAttribute(offset));
            }
            attributes.push((attr_type, buf[offset + 2..offset + attr_len].to_vec()));
            offset += attr_len;
        }

        Ok(Self {
            code: buf[0],
            identifier: buf[1],
            authenticator,
            attributes,
        })
    }

    /// Start a response to this request with the given code.
    pub fn response(&self, code: u8) -> Self {
        Self {
            code,
            identifier: self.identifier,
            authenticator: [0u8; 16],
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attr_type: u8, value: &[u8]) {
        // Attribute length is one byte and includes the two header octets.
        let value = &value[..value.len().min(253)];
        self.attributes.push((attr_type, value.to_vec()));
    }

    /// First value of the given attribute type.
    pub fn attribute(&self, attr_type: u8) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|(t, _)| *t == attr_type)
            .map(|(_, v)| v.as_slice())
    }

    pub fn attribute_string(&self, attr_type: u8) -> Option<String> {
        self.attribute(attr_type)
            .and_then(|v| String::from_utf8(v.to_vec()).ok())
    }

    /// Recover a PAP User-Password using the shared secret and this
    /// request's authenticator (RFC 2865 §5.2).
    pub fn decrypt_pap_password(&self, secret: &str) -> Option<String> {
        let encrypted = self.attribute(attr::USER_PASSWORD)?;
        if encrypted.is_empty() || encrypted.len() % 16 != 0 {
            return None;
        }

        let mut plain = Vec::with_capacity(encrypted.len());
        let mut prev: [u8; 16] = self.authenticator;

        for chunk in encrypted.chunks(16) {
            let digest = md5::compute([secret.as_bytes(), prev.as_slice()].concat());
            for (i, &c) in chunk.iter().enumerate() {
                plain.push(c ^ digest[i]);
            }
            prev.copy_from_slice(chunk);
        }

        while plain.last() == Some(&0) {
            plain.pop();
        }

        String::from_utf8(plain).ok()
    }

    /// Serialize a response, computing the Response Authenticator over the
    /// originating request's authenticator and the shared secret.
    pub fn encode_response(&self, request_authenticator: &[u8; 16], secret: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.push(self.code);
        out.push(self.identifier);
        out.extend_from_slice(&[0, 0]); // length, patched below
        out.extend_from_slice(request_authenticator);

        for (attr_type, value) in &self.attributes {
            out.push(*attr_type);
            out.push((value.len() + 2) as u8);
            out.extend_from_slice(value);
        }

        let length = (out.len() as u16).to_be_bytes();
        out[2] = length[0];
        out[3] = length[1];

        let digest = md5::compute([out.as_slice(), secret.as_bytes()].concat());
        out[4..20].copy_from_slice(&digest.0);
        out
    }

    /// Check an Accounting-Request authenticator: MD5 over the packet with
    /// a zeroed authenticator field, followed by the secret (RFC 2866 §3).
    /// Only the declared length is hashed; trailing datagram bytes are
    /// ignored, as in parsing.
    pub fn verify_accounting_authenticator(raw: &[u8], secret: &str) -> bool {
        if raw.len() < HEADER_LEN {
            return false;
        }
        let declared = usize::from(u16::from_be_bytes([raw[2], raw[3]]));
        if declared < HEADER_LEN || declared > raw.len() {
            return false;
        }

        let mut zeroed = raw[..declared].to_vec();
        zeroed[4..20].fill(0);

        let digest = md5::compute([zeroed.as_slice(), secret.as_bytes()].concat());
        digest.0 == raw[4..20]
    }
}
