//! Decoding of request messages into [`Request`].
//!
//! Decoding only checks framing: lengths, sub-functions, format identifiers. Session state,
//! transfer state and address ranges are checked by the server.
use super::constants::{
    DataIdentifier, ResetType, RoutineControlType, ServiceIdentifier, SessionType, DATA_FORMAT_RAW,
    ROUTINE_ERASE_MEMORY,
};
use super::nrc::NegativeResponseCode;

const ROUTINE_ERASE_LEN: usize = 12;
const READ_DATA_LEN: usize = 3;

#[derive(Debug, PartialEq, Eq)]
pub enum Request<'a> {
    SessionControl { session: SessionType },
    Reset { reset_type: ResetType },
    RoutineErase { addr: u32, size: u32 },
    RequestDownload { addr: u32, size: u32 },
    TransferData { seq: u8, data: &'a [u8] },
    TransferExit,
    ReadData { id: DataIdentifier },
}

fn be_u32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0, |acc, &x| (acc << 8) | x as u32)
}

impl<'a> Request<'a> {
    /// Decode `data`, whose first byte is `sid`.
    pub fn decode(sid: ServiceIdentifier, data: &'a [u8]) -> Result<Self, NegativeResponseCode> {
        use NegativeResponseCode::*;

        match sid {
            ServiceIdentifier::DiagnosticSessionControl => {
                if data.len() < 2 {
                    return Err(IncorrectMessageLengthOrInvalidFormat);
                }
                let session = SessionType::from_repr(data[1]).ok_or(SubFunctionNotSupported)?;
                Ok(Request::SessionControl { session })
            }
            ServiceIdentifier::EcuReset => {
                if data.len() < 2 {
                    return Err(IncorrectMessageLengthOrInvalidFormat);
                }
                let reset_type = ResetType::from_repr(data[1]).ok_or(SubFunctionNotSupported)?;
                Ok(Request::Reset { reset_type })
            }
            ServiceIdentifier::RoutineControl => {
                if data.len() != ROUTINE_ERASE_LEN {
                    return Err(IncorrectMessageLengthOrInvalidFormat);
                }
                if data[1] != RoutineControlType::Start as u8 {
                    return Err(SubFunctionNotSupported);
                }
                if u16::from_be_bytes([data[2], data[3]]) != ROUTINE_ERASE_MEMORY {
                    return Err(RequestOutOfRange);
                }
                Ok(Request::RoutineErase {
                    addr: be_u32(&data[4..8]),
                    size: be_u32(&data[8..12]),
                })
            }
            ServiceIdentifier::RequestDownload => {
                if data.len() < 3 {
                    return Err(IncorrectMessageLengthOrInvalidFormat);
                }
                if data[1] != DATA_FORMAT_RAW {
                    return Err(RequestOutOfRange);
                }

                let size_len = (data[2] >> 4) as usize;
                let addr_len = (data[2] & 0xf) as usize;
                if !(1..=4).contains(&size_len) || !(1..=4).contains(&addr_len) {
                    return Err(RequestOutOfRange);
                }
                if data.len() != 3 + addr_len + size_len {
                    return Err(IncorrectMessageLengthOrInvalidFormat);
                }

                let addr = be_u32(&data[3..3 + addr_len]);
                let size = be_u32(&data[3 + addr_len..]);
                Ok(Request::RequestDownload { addr, size })
            }
            ServiceIdentifier::TransferData => {
                if data.len() < 2 {
                    return Err(IncorrectMessageLengthOrInvalidFormat);
                }
                Ok(Request::TransferData {
                    seq: data[1],
                    data: &data[2..],
                })
            }
            ServiceIdentifier::RequestTransferExit => Ok(Request::TransferExit),
            ServiceIdentifier::ReadDataByIdentifier => {
                if data.len() < READ_DATA_LEN {
                    return Err(IncorrectMessageLengthOrInvalidFormat);
                }
                if data.len() > READ_DATA_LEN {
                    return Err(ResponseTooLong);
                }
                let id = DataIdentifier::from_repr(u16::from_be_bytes([data[1], data[2]]))
                    .ok_or(RequestOutOfRange)?;
                Ok(Request::ReadData { id })
            }
        }
    }
}
