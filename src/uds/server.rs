//! The service state machine.
//!
//! State is the diagnostic session plus an optional open download. Each request passes three
//! stages: session and transfer gating, framing ([`Request::decode`]), then execution. Any stage
//! can answer with a negative response.
use tracing::{debug, info, warn};

use super::constants::{
    DataIdentifier, ServiceIdentifier, SessionType, NEGATIVE_RESPONSE, POSITIVE_RESPONSE,
    ROUTINE_ERASE_MEMORY,
};
use super::nrc::NegativeResponseCode;
use super::request::Request;
use super::types::{DownloadTransfer, SessionParameterRecord};
use super::UdsConfig;
use crate::flash::{FlashController, FlashLoader};
use crate::time::time_passed;

/// lengthFormatIdentifier of the RequestDownload response: two bytes of maxNumberOfBlockLength
const LENGTH_FORMAT_2_BYTES: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
    /// Reset the ECU once the response is out
    pub reset: bool,
}

impl Response {
    fn positive(sid: ServiceIdentifier, body: &[u8]) -> Self {
        let mut data = vec![sid as u8 | POSITIVE_RESPONSE];
        data.extend(body);
        Self { data, reset: false }
    }

    fn negative(sid: u8, code: NegativeResponseCode) -> Self {
        Self {
            data: vec![NEGATIVE_RESPONSE, sid, code.into()],
            reset: false,
        }
    }
}

pub struct UdsServer {
    config: UdsConfig,
    session: SessionType,
    last_activity: u32,
    transfer: Option<DownloadTransfer>,
}

impl UdsServer {
    pub fn new(config: UdsConfig) -> Self {
        Self {
            config,
            session: SessionType::Default,
            last_activity: 0,
            transfer: None,
        }
    }

    pub fn config(&self) -> &UdsConfig {
        &self.config
    }

    pub fn session(&self) -> SessionType {
        self.session
    }

    pub fn transfer(&self) -> Option<&DownloadTransfer> {
        self.transfer.as_ref()
    }

    /// Fall back to the default session if a programming session saw no service call for longer
    /// than S3. Returns true if the session was reset. No response is sent for this.
    pub fn check_timeout(&mut self, now: u32) -> bool {
        let s3 = self.config.s3_timeout.as_millis() as u32;
        if self.session != SessionType::Programming || time_passed(now, self.last_activity) <= s3 {
            return false;
        }

        info!("S3 timeout, returning to default session");
        self.session = SessionType::Default;
        if let Some(transfer) = self.transfer.take() {
            warn!(
                "Download 0x{:08x}..0x{:08x} abandoned at 0x{:08x}",
                transfer.start,
                transfer.end(),
                transfer.cursor
            );
        }
        true
    }

    /// Handle one request message. Returns `None` only for an empty message, which has no SID to
    /// answer to.
    pub fn handle<F: FlashController>(
        &mut self,
        request: &[u8],
        loader: &mut FlashLoader<F>,
        now: u32,
    ) -> Option<Response> {
        let sid = *request.first()?;
        debug!("UDS request {}", hex::encode(request));

        let response = self.process(request, loader, now).unwrap_or_else(|code| {
            debug!("Negative response to 0x{:02x}: {}", sid, code);
            Response::negative(sid, code)
        });
        Some(response)
    }

    fn process<F: FlashController>(
        &mut self,
        request: &[u8],
        loader: &mut FlashLoader<F>,
        now: u32,
    ) -> Result<Response, NegativeResponseCode> {
        let sid = ServiceIdentifier::from_repr(request[0])
            .ok_or(NegativeResponseCode::ServiceNotSupported)?;

        if let Err(code) = self.check_preconditions(sid) {
            // A well-formed call out of sequence still counts as programming activity
            if self.session == SessionType::Programming
                && sid.is_programming_service()
                && Request::decode(sid, request).is_ok()
            {
                self.last_activity = now;
            }
            return Err(code);
        }
        let req = Request::decode(sid, request)?;

        if sid.is_programming_service() {
            self.last_activity = now;
        }

        self.execute(sid, req, loader, now)
    }

    fn check_preconditions(&self, sid: ServiceIdentifier) -> Result<(), NegativeResponseCode> {
        let programming = self.session == SessionType::Programming;
        match sid {
            // Erasing under an open download would pull the flash out from under the loader
            ServiceIdentifier::RoutineControl if !programming || self.transfer.is_some() => {
                Err(NegativeResponseCode::ConditionsNotCorrect)
            }
            ServiceIdentifier::RequestDownload if !programming => {
                Err(NegativeResponseCode::UploadDownloadNotAccepted)
            }
            ServiceIdentifier::TransferData | ServiceIdentifier::RequestTransferExit
                if !programming || self.transfer.is_none() =>
            {
                Err(NegativeResponseCode::RequestSequenceError)
            }
            _ => Ok(()),
        }
    }

    /// `[addr, addr + size)` inside the download region. A range ending exactly at the region end
    /// is rejected.
    fn check_range(&self, addr: u32, size: u32) -> Result<(), NegativeResponseCode> {
        let region = self.config.download_region;
        let end = addr.checked_add(size).ok_or(NegativeResponseCode::RequestOutOfRange)?;
        if addr < region.begin || end >= region.end {
            return Err(NegativeResponseCode::RequestOutOfRange);
        }
        Ok(())
    }

    fn execute<F: FlashController>(
        &mut self,
        sid: ServiceIdentifier,
        req: Request<'_>,
        loader: &mut FlashLoader<F>,
        now: u32,
    ) -> Result<Response, NegativeResponseCode> {
        match req {
            Request::SessionControl { session } => Ok(self.session_control(session, now)),
            Request::Reset { reset_type } => {
                info!("ECU reset requested");
                let mut response = Response::positive(sid, &[reset_type as u8]);
                response.reset = true;
                Ok(response)
            }
            Request::RoutineErase { addr, size } => {
                self.check_range(addr, size)?;
                loader.erase_range(addr, size).map_err(|e| {
                    warn!("Erase failed: {}", e);
                    NegativeResponseCode::GeneralReject
                })?;

                let rid = ROUTINE_ERASE_MEMORY.to_be_bytes();
                Ok(Response::positive(sid, &[0x01, rid[0], rid[1]]))
            }
            Request::RequestDownload { addr, size } => {
                self.request_download(sid, addr, size, loader)
            }
            Request::TransferData { seq, data } => self.transfer_data(sid, seq, data, loader),
            Request::TransferExit => {
                let transfer = self
                    .transfer
                    .take()
                    .ok_or(NegativeResponseCode::RequestSequenceError)?;
                loader.finalize().map_err(|e| {
                    warn!("Finalizing download failed: {}", e);
                    NegativeResponseCode::GeneralReject
                })?;

                info!(
                    "Download 0x{:08x}..0x{:08x} complete, {} bytes written",
                    transfer.start,
                    transfer.end(),
                    transfer.cursor - transfer.start
                );
                Ok(Response::positive(sid, &[]))
            }
            Request::ReadData { id } => {
                let value = match id {
                    DataIdentifier::VehicleManufacturerEcuHardwareNumber => {
                        &self.config.hardware_id
                    }
                    DataIdentifier::EcuSerialNumber => &self.config.serial_number,
                };

                let mut body = (id as u16).to_be_bytes().to_vec();
                body.extend(value.as_bytes());
                Ok(Response::positive(sid, &body))
            }
        }
    }

    fn session_control(&mut self, session: SessionType, now: u32) -> Response {
        if session == SessionType::Default {
            if let Some(transfer) = self.transfer.take() {
                warn!("Download at 0x{:08x} closed by session change", transfer.start);
            }
        }
        if session != self.session {
            info!("Entering {} session", session);
        }
        self.session = session;
        self.last_activity = now;

        let record = SessionParameterRecord {
            p2_server_max: self.config.p2_server_max,
            p2_star_server_max: self.config.p2_star_server_max,
        };
        let mut body = vec![session as u8];
        body.extend(record.to_bytes());
        Response::positive(ServiceIdentifier::DiagnosticSessionControl, &body)
    }

    fn request_download<F: FlashController>(
        &mut self,
        sid: ServiceIdentifier,
        addr: u32,
        size: u32,
        loader: &mut FlashLoader<F>,
    ) -> Result<Response, NegativeResponseCode> {
        if self.transfer.is_some() {
            warn!("RequestDownload rejected, transfer already open");
            return Err(NegativeResponseCode::UploadDownloadNotAccepted);
        }
        self.check_range(addr, size)?;

        loader.prepare(addr, size).map_err(|e| {
            warn!("Preparing download failed: {}", e);
            NegativeResponseCode::GeneralReject
        })?;

        info!("Download 0x{:08x}..0x{:08x} opened", addr, addr + size);
        self.transfer = Some(DownloadTransfer::new(addr, size));

        let max = self.config.max_block_length.to_be_bytes();
        Ok(Response::positive(sid, &[LENGTH_FORMAT_2_BYTES, max[0], max[1]]))
    }

    fn transfer_data<F: FlashController>(
        &mut self,
        sid: ServiceIdentifier,
        seq: u8,
        data: &[u8],
        loader: &mut FlashLoader<F>,
    ) -> Result<Response, NegativeResponseCode> {
        let max_data = (self.config.max_block_length as usize).saturating_sub(2);
        let transfer = self.transfer.as_mut().ok_or(NegativeResponseCode::RequestSequenceError)?;

        if seq == transfer.last_seq {
            debug!("Repeated block {}, acknowledging without writing", seq);
            return Ok(Response::positive(sid, &[seq]));
        }
        if seq != transfer.last_seq.wrapping_add(1) {
            warn!("Block {} out of sequence, expected {}", seq, transfer.last_seq.wrapping_add(1));
            return Err(NegativeResponseCode::RequestSequenceError);
        }
        if data.len() > max_data {
            return Err(NegativeResponseCode::IncorrectMessageLengthOrInvalidFormat);
        }
        if data.len() as u64 > transfer.remaining() as u64 {
            return Err(NegativeResponseCode::RequestOutOfRange);
        }

        if let Err(e) = loader.write(data) {
            warn!("Writing block {} failed: {}", seq, e);
            self.transfer = None;
            return Err(NegativeResponseCode::GeneralReject);
        }

        transfer.cursor += data.len() as u32;
        transfer.last_seq = seq;
        Ok(Response::positive(sid, &[seq]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{Fault, FlashDriver, FlashRegion, SimulatedFlash};
    use NegativeResponseCode::*;

    const BEGIN: u32 = 0x0001_0000;
    const END: u32 = 0x0002_0000;

    struct Fixture {
        server: UdsServer,
        loader: FlashLoader<SimulatedFlash>,
    }

    impl Fixture {
        fn new() -> Self {
            let region = FlashRegion::new(BEGIN, END);
            let config = UdsConfig {
                download_region: region,
                ..UdsConfig::default()
            };
            Self {
                server: UdsServer::new(config),
                loader: FlashLoader::new(FlashDriver::new(SimulatedFlash::new(region), region)),
            }
        }

        fn request(&mut self, data: &[u8], now: u32) -> Vec<u8> {
            self.server.handle(data, &mut self.loader, now).unwrap().data
        }

        fn programming(mut self) -> Self {
            assert_eq!(self.request(&[0x10, 0x02], 0)[..2], [0x50, 0x02]);
            self
        }

        fn download(mut self, addr: u32, size: u32) -> Self {
            let mut req = vec![0x34, 0x00, 0x44];
            req.extend(addr.to_be_bytes());
            req.extend(size.to_be_bytes());
            assert_eq!(self.request(&req, 0), vec![0x74, 0x20, 0x04, 0x02]);
            self
        }

        fn program_count(&self) -> usize {
            self.loader.driver().controller().program_count()
        }
    }

    fn nrc(sid: u8, code: NegativeResponseCode) -> Vec<u8> {
        vec![0x7f, sid, code as u8]
    }

    fn erase(addr: u32, size: u32) -> Vec<u8> {
        let mut req = vec![0x31, 0x01, 0xff, 0x00];
        req.extend(addr.to_be_bytes());
        req.extend(size.to_be_bytes());
        req
    }

    #[test]
    fn unsupported_service() {
        let mut f = Fixture::new();
        assert_eq!(f.request(&[0x3e, 0x00], 0), nrc(0x3e, ServiceNotSupported));
        assert_eq!(f.request(&[0x7f], 0), nrc(0x7f, ServiceNotSupported));
        assert!(f.server.handle(&[], &mut f.loader, 0).is_none());
    }

    #[test]
    fn session_control_response() {
        let mut f = Fixture::new();
        assert_eq!(f.request(&[0x10, 0x02], 0), vec![0x50, 0x02, 0x00, 0x32, 0x01, 0xf4]);
        assert_eq!(f.server.session(), SessionType::Programming);
        assert_eq!(f.request(&[0x10, 0x04], 0), nrc(0x10, SubFunctionNotSupported));
        assert_eq!(f.server.session(), SessionType::Programming);
    }

    #[test]
    fn ecu_reset() {
        let mut f = Fixture::new();
        let response = f.server.handle(&[0x11, 0x01], &mut f.loader, 0).unwrap();
        assert_eq!(response, Response { data: vec![0x51, 0x01], reset: true });
        let response = f.server.handle(&[0x11, 0x02], &mut f.loader, 0).unwrap();
        assert_eq!(response.data, nrc(0x11, SubFunctionNotSupported));
        assert!(!response.reset);
    }

    #[test]
    fn programming_services_need_programming_session() {
        let mut f = Fixture::new();
        assert_eq!(f.request(&erase(BEGIN, 0x200), 0), nrc(0x31, ConditionsNotCorrect));
        assert_eq!(
            f.request(&[0x34, 0x00, 0x44, 0, 1, 0, 0, 0, 0, 1, 0], 0),
            nrc(0x34, UploadDownloadNotAccepted)
        );
        assert_eq!(f.request(&[0x36, 0x01, 0xaa], 0), nrc(0x36, RequestSequenceError));
        assert_eq!(f.request(&[0x37], 0), nrc(0x37, RequestSequenceError));
        assert_eq!(f.loader.driver().controller().erase_count(), 0);
    }

    #[test]
    fn session_checked_before_length() {
        let mut f = Fixture::new();
        assert_eq!(f.request(&[0x31, 0x01], 0), nrc(0x31, ConditionsNotCorrect));
        let mut f = f.programming();
        assert_eq!(f.request(&[0x31, 0x01], 0), nrc(0x31, IncorrectMessageLengthOrInvalidFormat));
    }

    #[test]
    fn erase_routine() {
        let mut f = Fixture::new().programming();
        assert_eq!(f.request(&erase(BEGIN, 0x400), 0), vec![0x71, 0x01, 0xff, 0x00]);
        assert_eq!(f.loader.driver().controller().erase_count(), 2);

        assert_eq!(f.request(&erase(BEGIN - 0x200, 0x400), 0), nrc(0x31, RequestOutOfRange));
        assert_eq!(f.request(&erase(END - 0x200, 0x200), 0), nrc(0x31, RequestOutOfRange));
        assert_eq!(f.request(&erase(BEGIN, u32::MAX), 0), nrc(0x31, RequestOutOfRange));
        assert_eq!(f.loader.driver().controller().erase_count(), 2);
    }

    #[test]
    fn erase_rejected_while_download_open() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x400);
        assert_eq!(f.request(&[0x36, 0x01, 0xaa, 0xbb], 0), vec![0x76, 0x01]);
        let transfer = *f.server.transfer().unwrap();

        assert_eq!(f.request(&erase(BEGIN, 0x400), 0), nrc(0x31, ConditionsNotCorrect));
        assert_eq!(*f.server.transfer().unwrap(), transfer);
        assert_eq!(f.loader.driver().controller().erase_count(), 0);

        assert_eq!(f.request(&[0x36, 0x02, 0xcc, 0xdd], 0), vec![0x76, 0x02]);
        assert_eq!(f.request(&[0x37], 0), vec![0x77]);
        assert_eq!(f.request(&erase(BEGIN, 0x400), 0), vec![0x71, 0x01, 0xff, 0x00]);
    }

    #[test]
    fn erase_failure_is_general_reject() {
        let mut f = Fixture::new().programming();
        f.loader.driver_mut().controller_mut().fail_next_erase(Fault::ProgramEraseViolation);
        assert_eq!(f.request(&erase(BEGIN, 0x200), 0), nrc(0x31, GeneralReject));
    }

    #[test]
    fn download_bounds() {
        let mut f = Fixture::new().programming();
        // Wraps past u32::MAX
        assert_eq!(
            f.request(&[0x34, 0x00, 0x44, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x01, 0x00], 0),
            nrc(0x34, RequestOutOfRange)
        );
        // Ends exactly at the region end
        let mut req = vec![0x34, 0x00, 0x44];
        req.extend((END - 0x100).to_be_bytes());
        req.extend(0x100u32.to_be_bytes());
        assert_eq!(f.request(&req, 0), nrc(0x34, RequestOutOfRange));
        // Starts in front of the region
        assert_eq!(
            f.request(&[0x34, 0x00, 0x22, 0x10, 0x00, 0x00, 0x10], 0),
            nrc(0x34, RequestOutOfRange)
        );
        assert!(f.server.transfer().is_none());
        assert_eq!(f.loader.state(), crate::flash::LoaderState::Idle);
    }

    #[test]
    fn download_and_transfer() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x10);
        assert_eq!(f.request(&[0x36, 0x01, 1, 2, 3, 4, 5, 6, 7, 8], 0), vec![0x76, 0x01]);
        assert_eq!(f.request(&[0x36, 0x02, 9, 10, 11, 12, 13, 14, 15, 16], 0), vec![0x76, 0x02]);
        assert_eq!(f.request(&[0x37], 0), vec![0x77]);
        assert!(f.server.transfer().is_none());

        let mem = f.loader.driver().controller().contents();
        assert_eq!(&mem[..16], &(1..=16).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn overlapping_download_rejected() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x10);
        assert_eq!(
            f.request(&[0x34, 0x00, 0x44, 0, 1, 0, 0, 0, 0, 0, 0x10], 0),
            nrc(0x34, UploadDownloadNotAccepted)
        );
        assert_eq!(f.server.transfer().unwrap().start, BEGIN);
    }

    #[test]
    fn duplicate_block_acknowledged_once() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x400);
        assert_eq!(f.request(&[0x36, 0x01, 0xaa, 0xbb], 0), vec![0x76, 0x01]);
        let cursor = f.server.transfer().unwrap().cursor;
        let programs = f.program_count();

        assert_eq!(f.request(&[0x36, 0x01, 0xaa, 0xbb], 0), vec![0x76, 0x01]);
        assert_eq!(f.server.transfer().unwrap().cursor, cursor);
        assert_eq!(f.program_count(), programs);
    }

    #[test]
    fn out_of_order_block_rejected() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x400);
        f.request(&[0x36, 0x01, 0xaa], 0);
        let before = *f.server.transfer().unwrap();

        assert_eq!(f.request(&[0x36, 0x03, 0xbb], 0), nrc(0x36, RequestSequenceError));
        assert_eq!(*f.server.transfer().unwrap(), before);
        // The correct block is still accepted
        assert_eq!(f.request(&[0x36, 0x02, 0xbb], 0), vec![0x76, 0x02]);
    }

    #[test]
    fn sequence_counter_wraps() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x400);
        for seq in 1..=300u32 {
            let seq = seq as u8;
            assert_eq!(f.request(&[0x36, seq, 0x00], 0), vec![0x76, seq]);
        }
        assert_eq!(f.server.transfer().unwrap().cursor, BEGIN + 300);
    }

    #[test]
    fn transfer_past_end_rejected() {
        let mut f = Fixture::new().programming().download(BEGIN, 4);
        assert_eq!(f.request(&[0x36, 0x01, 1, 2, 3, 4, 5], 0), nrc(0x36, RequestOutOfRange));
        assert_eq!(f.server.transfer().unwrap().cursor, BEGIN);
    }

    #[test]
    fn oversized_block_rejected() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x2000);
        let mut req = vec![0x36, 0x01];
        req.extend(vec![0u8; 0x401]);
        assert_eq!(f.request(&req, 0), nrc(0x36, IncorrectMessageLengthOrInvalidFormat));
    }

    #[test]
    fn write_failure_closes_transfer() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x400);
        f.loader.driver_mut().controller_mut().fail_next_program(Fault::ProtocolError);
        let mut req = vec![0x36, 0x01];
        req.extend(vec![0u8; 0x200]);
        assert_eq!(f.request(&req, 0), nrc(0x36, GeneralReject));
        assert!(f.server.transfer().is_none());
        assert_eq!(f.request(&[0x37], 0), nrc(0x37, RequestSequenceError));
    }

    #[test]
    fn default_session_closes_transfer() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x400);
        f.request(&[0x10, 0x01], 0);
        assert!(f.server.transfer().is_none());
        assert_eq!(f.request(&[0x36, 0x01, 0xaa], 0), nrc(0x36, RequestSequenceError));
    }

    #[test]
    fn s3_timeout() {
        let mut f = Fixture::new().programming().download(BEGIN, 0x400);
        f.request(&[0x36, 0x01, 0xaa], 1000);
        assert!(!f.server.check_timeout(61_000));
        assert!(f.server.check_timeout(61_001));
        assert_eq!(f.server.session(), SessionType::Default);
        assert!(f.server.transfer().is_none());
        assert!(!f.server.check_timeout(200_000));
    }

    #[test]
    fn failed_programming_service_refreshes_activity() {
        let mut f = Fixture::new().programming();
        assert_eq!(f.request(&erase(0, 0x200), 50_000), nrc(0x31, RequestOutOfRange));
        assert!(!f.server.check_timeout(100_000));
        assert!(f.server.check_timeout(110_001));
    }

    #[test]
    fn transfer_without_download_refreshes_activity() {
        let mut f = Fixture::new().programming();
        assert_eq!(f.request(&[0x36, 0x01, 0xaa], 50_000), nrc(0x36, RequestSequenceError));
        assert!(!f.server.check_timeout(100_000));
        assert_eq!(f.request(&[0x37], 100_000), nrc(0x37, RequestSequenceError));
        assert!(!f.server.check_timeout(150_000));
        assert!(f.server.check_timeout(160_001));
    }

    #[test]
    fn gated_request_outside_programming_is_not_activity() {
        let mut f = Fixture::new();
        assert_eq!(f.request(&[0x36, 0x01, 0xaa], 50_000), nrc(0x36, RequestSequenceError));
        assert_eq!(f.server.last_activity, 0);
    }

    #[test]
    fn read_data_by_identifier() {
        let mut f = Fixture::new();
        let mut expected = vec![0x62, 0xf1, 0x91];
        expected.extend(b"UDSBOOT-HW-01");
        assert_eq!(f.request(&[0x22, 0xf1, 0x91], 0), expected);

        let mut expected = vec![0x62, 0xf1, 0x8c];
        expected.extend(b"0000000001");
        assert_eq!(f.request(&[0x22, 0xf1, 0x8c], 0), expected);

        assert_eq!(f.request(&[0x22, 0xf1, 0x90], 0), nrc(0x22, RequestOutOfRange));
    }

    #[test]
    fn every_identifier_readable() {
        use strum::IntoEnumIterator;

        let mut f = Fixture::new();
        for id in DataIdentifier::iter() {
            let did = (id as u16).to_be_bytes();
            let response = f.request(&[0x22, did[0], did[1]], 0);
            assert_eq!(response[..3], [0x62, did[0], did[1]], "{}", id);
        }
    }
}
