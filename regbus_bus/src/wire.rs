//! Modbus TCP framing and PDU codec
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────────────┬─────────────┬────────┬─────────┬─────────────────┐
//! │ transaction  │ protocol=0  │ length │ unit id │ PDU             │
//! │ u16 BE       │ u16 BE      │ u16 BE │ u8      │ fc + data       │
//! └──────────────┴─────────────┴────────┴─────────┴─────────────────┘
//! ```
//!
//! `length` counts the unit id plus the PDU. Only the register function
//! codes are supported: read holding (0x03), read input (0x04), write single
//! (0x06) and write multiple (0x10).

use crate::error::{BusError, BusResult};
use regbus::consts::{MAX_READ_QUANTITY, MAX_WRITE_QUANTITY};

/// MBAP header size in bytes
pub const MBAP_HEADER_LEN: usize = 7;

/// Protocol identifier for Modbus
pub const PROTOCOL_ID: u16 = 0;

/// Largest PDU allowed by the protocol
pub const MAX_PDU_LEN: usize = 253;

/// Bit set on the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Supported function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read holding registers
    ReadHolding = 0x03,
    /// Read input registers
    ReadInput = 0x04,
    /// Write single register
    WriteSingle = 0x06,
    /// Write multiple registers
    WriteMultiple = 0x10,
}

impl FunctionCode {
    /// Decode a raw function code
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x03 => Some(Self::ReadHolding),
            0x04 => Some(Self::ReadInput),
            0x06 => Some(Self::WriteSingle),
            0x10 => Some(Self::WriteMultiple),
            _ => None,
        }
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Function code not supported
    IllegalFunction = 0x01,
    /// Address range outside the register array
    IllegalDataAddress = 0x02,
    /// Malformed request or value
    IllegalDataValue = 0x03,
    /// Unrecoverable server error
    ServerDeviceFailure = 0x04,
    /// Request addressed to a unit id this server does not answer
    GatewayTargetFailed = 0x0B,
}

impl ExceptionCode {
    /// Decode a raw exception code, mapping unknown values to device failure
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x0B => Self::GatewayTargetFailed,
            _ => Self::ServerDeviceFailure,
        }
    }
}

/// MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Echoed by the server to match responses to requests
    pub transaction_id: u16,
    /// Always 0 for Modbus
    pub protocol_id: u16,
    /// Unit id plus PDU length
    pub length: u16,
    /// Addressed unit (slave) id
    pub unit_id: u8,
}

impl MbapHeader {
    /// Header for a PDU of `pdu_len` bytes
    pub fn for_pdu(transaction_id: u16, unit_id: u8, pdu_len: usize) -> Self {
        Self {
            transaction_id,
            protocol_id: PROTOCOL_ID,
            length: (pdu_len + 1) as u16,
            unit_id,
        }
    }

    /// Decode the first seven bytes of a frame
    pub fn decode(bytes: &[u8; MBAP_HEADER_LEN]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([bytes[0], bytes[1]]),
            protocol_id: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            unit_id: bytes[6],
        }
    }

    /// Append the encoded header
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.extend_from_slice(&self.protocol_id.to_be_bytes());
        out.extend_from_slice(&self.length.to_be_bytes());
        out.push(self.unit_id);
    }

    /// PDU length announced by the header
    pub fn pdu_len(&self) -> usize {
        usize::from(self.length).saturating_sub(1)
    }
}

/// Build a complete frame around an encoded PDU
pub fn encode_frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    MbapHeader::for_pdu(transaction_id, unit_id, pdu.len()).encode(&mut out);
    out.extend_from_slice(pdu);
    out
}

fn be_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

// ─── Requests ───────────────────────────────────────────────────────

/// Client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Read `count` holding registers starting at `address`
    ReadHolding {
        /// First register
        address: u16,
        /// Register count (1-125)
        count: u16,
    },
    /// Read `count` input registers starting at `address`
    ReadInput {
        /// First register
        address: u16,
        /// Register count (1-125)
        count: u16,
    },
    /// Write one register
    WriteSingle {
        /// Target register
        address: u16,
        /// New value
        value: u16,
    },
    /// Write consecutive registers
    WriteMultiple {
        /// First register
        address: u16,
        /// Values (1-123)
        values: Vec<u16>,
    },
}

impl Request {
    /// Function code of this request
    pub fn function(&self) -> FunctionCode {
        match self {
            Self::ReadHolding { .. } => FunctionCode::ReadHolding,
            Self::ReadInput { .. } => FunctionCode::ReadInput,
            Self::WriteSingle { .. } => FunctionCode::WriteSingle,
            Self::WriteMultiple { .. } => FunctionCode::WriteMultiple,
        }
    }

    /// Check protocol quantity limits before sending
    pub fn validate(&self) -> BusResult<()> {
        let (count, max) = match self {
            Self::ReadHolding { count, .. } | Self::ReadInput { count, .. } => {
                (usize::from(*count), MAX_READ_QUANTITY)
            }
            Self::WriteMultiple { values, .. } => (values.len(), MAX_WRITE_QUANTITY),
            Self::WriteSingle { .. } => return Ok(()),
        };
        if count == 0 || count > usize::from(max) {
            return Err(BusError::InvalidQuantity {
                count,
                max: usize::from(max),
            });
        }
        Ok(())
    }

    /// Encode the PDU
    pub fn encode_pdu(&self) -> Vec<u8> {
        let mut out = vec![self.function() as u8];
        match self {
            Self::ReadHolding { address, count } | Self::ReadInput { address, count } => {
                out.extend_from_slice(&address.to_be_bytes());
                out.extend_from_slice(&count.to_be_bytes());
            }
            Self::WriteSingle { address, value } => {
                out.extend_from_slice(&address.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
            }
            Self::WriteMultiple { address, values } => {
                out.extend_from_slice(&address.to_be_bytes());
                out.extend_from_slice(&(values.len() as u16).to_be_bytes());
                out.push((values.len() * 2) as u8);
                for value in values {
                    out.extend_from_slice(&value.to_be_bytes());
                }
            }
        }
        out
    }

    /// Decode a request PDU
    ///
    /// Failures map directly to the exception code returned to the peer.
    pub fn decode_pdu(pdu: &[u8]) -> Result<Self, ExceptionCode> {
        let Some(&raw_function) = pdu.first() else {
            return Err(ExceptionCode::IllegalDataValue);
        };
        let function = FunctionCode::from_u8(raw_function).ok_or(ExceptionCode::IllegalFunction)?;
        if pdu.len() < 5 {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let address = be_u16(pdu, 1);
        let word = be_u16(pdu, 3);
        match function {
            FunctionCode::ReadHolding | FunctionCode::ReadInput => {
                if pdu.len() != 5 || word == 0 || word > MAX_READ_QUANTITY {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                Ok(if function == FunctionCode::ReadHolding {
                    Self::ReadHolding {
                        address,
                        count: word,
                    }
                } else {
                    Self::ReadInput {
                        address,
                        count: word,
                    }
                })
            }
            FunctionCode::WriteSingle => {
                if pdu.len() != 5 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                Ok(Self::WriteSingle {
                    address,
                    value: word,
                })
            }
            FunctionCode::WriteMultiple => {
                let quantity = usize::from(word);
                if quantity == 0 || word > MAX_WRITE_QUANTITY || pdu.len() < 6 {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                let byte_count = usize::from(pdu[5]);
                if byte_count != quantity * 2 || pdu.len() != 6 + byte_count {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                let values = pdu[6..]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(Self::WriteMultiple { address, values })
            }
        }
    }
}

// ─── Responses ──────────────────────────────────────────────────────

/// Server response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Register values for a read holding/input request
    Registers {
        /// Function code being answered
        function: FunctionCode,
        /// Register values
        values: Vec<u16>,
    },
    /// Echo of a single write
    WriteSingle {
        /// Written register
        address: u16,
        /// Written value
        value: u16,
    },
    /// Acknowledgement of a multiple write
    WriteMultiple {
        /// First written register
        address: u16,
        /// Number of registers written
        quantity: u16,
    },
    /// Exception response
    Exception {
        /// Raw function code of the failed request (without the 0x80 flag)
        function: u8,
        /// Exception code
        code: ExceptionCode,
    },
}

impl Response {
    /// Encode the PDU
    pub fn encode_pdu(&self) -> Vec<u8> {
        match self {
            Self::Registers { function, values } => {
                let mut out = Vec::with_capacity(2 + values.len() * 2);
                out.push(*function as u8);
                out.push((values.len() * 2) as u8);
                for value in values {
                    out.extend_from_slice(&value.to_be_bytes());
                }
                out
            }
            Self::WriteSingle { address, value } => {
                let mut out = vec![FunctionCode::WriteSingle as u8];
                out.extend_from_slice(&address.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
                out
            }
            Self::WriteMultiple { address, quantity } => {
                let mut out = vec![FunctionCode::WriteMultiple as u8];
                out.extend_from_slice(&address.to_be_bytes());
                out.extend_from_slice(&quantity.to_be_bytes());
                out
            }
            Self::Exception { function, code } => vec![function | EXCEPTION_FLAG, *code as u8],
        }
    }

    /// Decode a response PDU for a request with function code `expected`
    pub fn decode_pdu(pdu: &[u8], expected: FunctionCode) -> BusResult<Self> {
        let Some(&raw_function) = pdu.first() else {
            return Err(BusError::protocol("empty response PDU"));
        };
        if raw_function == (expected as u8 | EXCEPTION_FLAG) {
            let code = pdu
                .get(1)
                .copied()
                .ok_or_else(|| BusError::protocol("truncated exception response"))?;
            return Ok(Self::Exception {
                function: expected as u8,
                code: ExceptionCode::from_u8(code),
            });
        }
        if raw_function != expected as u8 {
            return Err(BusError::protocol(format!(
                "function code mismatch: expected {:#04x}, got {raw_function:#04x}",
                expected as u8
            )));
        }
        match expected {
            FunctionCode::ReadHolding | FunctionCode::ReadInput => {
                let byte_count = usize::from(*pdu.get(1).unwrap_or(&0));
                if pdu.len() != 2 + byte_count || byte_count % 2 != 0 {
                    return Err(BusError::protocol("malformed read response"));
                }
                let values = pdu[2..]
                    .chunks_exact(2)
                    .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                    .collect();
                Ok(Self::Registers {
                    function: expected,
                    values,
                })
            }
            FunctionCode::WriteSingle | FunctionCode::WriteMultiple => {
                if pdu.len() != 5 {
                    return Err(BusError::protocol("malformed write response"));
                }
                let address = be_u16(pdu, 1);
                let word = be_u16(pdu, 3);
                Ok(if expected == FunctionCode::WriteSingle {
                    Self::WriteSingle {
                        address,
                        value: word,
                    }
                } else {
                    Self::WriteMultiple {
                        address,
                        quantity: word,
                    }
                })
            }
        }
    }
}

// ─── Stream reassembly ──────────────────────────────────────────────

/// Accumulates bytes from a stream and yields complete frames
///
/// Socket reads may split or merge frames; bytes are buffered until a whole
/// frame is present.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of their frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Pop the next complete frame, if any
    ///
    /// A header with a foreign protocol id or an impossible length is a
    /// protocol error; the stream cannot be resynchronized after it.
    pub fn next_frame(&mut self) -> BusResult<Option<(MbapHeader, Vec<u8>)>> {
        if self.buf.len() < MBAP_HEADER_LEN {
            return Ok(None);
        }
        let mut raw = [0u8; MBAP_HEADER_LEN];
        raw.copy_from_slice(&self.buf[..MBAP_HEADER_LEN]);
        let header = MbapHeader::decode(&raw);
        if header.protocol_id != PROTOCOL_ID {
            return Err(BusError::protocol(format!(
                "unexpected protocol id {}",
                header.protocol_id
            )));
        }
        let pdu_len = header.pdu_len();
        if pdu_len == 0 || pdu_len > MAX_PDU_LEN {
            return Err(BusError::protocol(format!(
                "invalid frame length {}",
                header.length
            )));
        }
        let total = MBAP_HEADER_LEN + pdu_len;
        if self.buf.len() < total {
            return Ok(None);
        }
        let pdu = self.buf[MBAP_HEADER_LEN..total].to_vec();
        self.buf.drain(..total);
        Ok(Some((header, pdu)))
    }
}
