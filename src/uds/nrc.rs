use strum_macros::{Display, FromRepr};

/// Negative Response Codes sent by this server, as defined in ISO 14229
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, FromRepr)]
#[repr(u8)]
pub enum NegativeResponseCode {
    GeneralReject = 0x10,
    ServiceNotSupported = 0x11,
    SubFunctionNotSupported = 0x12,
    IncorrectMessageLengthOrInvalidFormat = 0x13,
    ResponseTooLong = 0x14,
    ConditionsNotCorrect = 0x22,
    RequestSequenceError = 0x24,
    RequestOutOfRange = 0x31,
    UploadDownloadNotAccepted = 0x70,
}

impl From<NegativeResponseCode> for u8 {
    fn from(val: NegativeResponseCode) -> u8 {
        val as u8
    }
}
