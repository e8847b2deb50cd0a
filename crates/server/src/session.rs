//! Per-connection protocol state machine.
//!
//! A [`Session`] performs no I/O. Every input (an inbound PDU, a decode
//! failure, a store notification, a timer tick) returns the [`Action`]s the
//! connection task has to carry out, in order.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use cache::{Diff, Payload, SerialStore, SerialUnknown, StoreView};
use rtr::{
    CacheReset, CacheResponse, DecodeError, EndOfData, ErrorCode, ErrorReport, Flag, Ipv4Prefix,
    Ipv6Prefix, Pdu, ProtocolVersion, RouterKey, Serial, SerialNotify, SerialQuery, Timing,
    encode,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    ExpectResetOrSerial,
    Synchronizing,
    Established,
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Write these PDUs as one batch.
    Send(Vec<Pdu>),
    /// Shut the connection down after any preceding sends.
    Close { reason: String },
}

pub struct Session {
    store: Arc<SerialStore>,
    timing: Timing,
    state: SessionState,
    version: Option<ProtocolVersion>,
    session_id: Option<u16>,
    client_serial: Option<Serial>,
    last_notified: Option<(u16, Serial)>,
    notify_pending: bool,
    last_query: Instant,
}

impl Session {
    pub fn new(store: Arc<SerialStore>, timing: Timing, now: Instant) -> Self {
        Self {
            store,
            timing,
            state: SessionState::ExpectResetOrSerial,
            version: None,
            session_id: None,
            client_serial: None,
            last_notified: None,
            notify_pending: false,
            last_query: now,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    /// Session id the client last synchronized under.
    pub fn session_id(&self) -> Option<u16> {
        self.session_id
    }

    /// Serial the client acknowledged with its last completed response.
    pub fn client_serial(&self) -> Option<Serial> {
        self.client_serial
    }

    /// Deadline after which a client that stopped querying is dropped.
    pub fn expires_at(&self) -> Instant {
        self.last_query + Duration::from_secs(u64::from(self.timing.expire))
    }

    pub fn handle_pdu(&mut self, pdu: &Pdu, now: Instant) -> Vec<Action> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        if let Pdu::ErrorReport(report) = pdu {
            warn!(code = ?report.code, text = %report.text, "router sent error report");
            return self.close("router reported an error");
        }

        let version = pdu.version();
        match self.version {
            None => {
                debug!(%version, "negotiated protocol version");
                self.version = Some(version);
            }
            Some(negotiated) if negotiated != version => {
                return self.report_error(
                    ErrorCode::UnexpectedProtocolVersion,
                    encode(pdu).to_vec(),
                    format!("session negotiated {negotiated}, received {version}"),
                );
            }
            Some(_) => {}
        }

        if !pdu.is_client_pdu() {
            return self.report_error(
                ErrorCode::InvalidRequest,
                encode(pdu).to_vec(),
                format!("{} is not a router request", pdu.pdu_type()),
            );
        }

        self.last_query = now;
        let view = self.store.view();
        if !view.is_ready() {
            debug!("query before first publication");
            return self.report_error(
                ErrorCode::NoDataAvailable,
                encode(pdu).to_vec(),
                "no data available yet".to_string(),
            );
        }
        match pdu {
            Pdu::SerialQuery(query) => self.serial_query(query, &view),
            // only reset queries are left
            _ => self.full_sync(&view),
        }
    }

    /// Bytes that could not be decoded. Always fatal.
    pub fn handle_decode_error(&mut self, error: &DecodeError, raw: &[u8]) -> Vec<Action> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        if self.version.is_none() {
            self.version = raw
                .first()
                .and_then(|byte| ProtocolVersion::try_from(*byte).ok());
        }
        self.report_error(error.error_code(), raw.to_vec(), error.to_string())
    }

    /// The store published a new serial or reset its session.
    pub fn serial_advanced(&mut self) -> Vec<Action> {
        match self.state {
            SessionState::Established => self.notify_if_behind(),
            SessionState::Synchronizing => {
                self.notify_pending = true;
                Vec::new()
            }
            SessionState::ExpectResetOrSerial | SessionState::Closed => Vec::new(),
        }
    }

    /// The last batch of `Send` actions reached the transport.
    pub fn flushed(&mut self) -> Vec<Action> {
        if self.state != SessionState::Synchronizing {
            return Vec::new();
        }
        self.state = SessionState::Established;
        if std::mem::take(&mut self.notify_pending) {
            self.notify_if_behind()
        } else {
            Vec::new()
        }
    }

    pub fn tick(&mut self, now: Instant) -> Vec<Action> {
        if self.state != SessionState::Closed && now >= self.expires_at() {
            info!("expire interval elapsed without a query");
            return self.close("expire interval elapsed");
        }
        Vec::new()
    }

    /// Transport went away.
    pub fn close(&mut self, reason: &str) -> Vec<Action> {
        if self.state == SessionState::Closed {
            return Vec::new();
        }
        self.state = SessionState::Closed;
        vec![Action::Close {
            reason: reason.to_string(),
        }]
    }

    fn negotiated(&self) -> ProtocolVersion {
        self.version.unwrap_or(ProtocolVersion::LATEST)
    }

    fn serial_query(&mut self, query: &SerialQuery, view: &StoreView) -> Vec<Action> {
        if query.session_id != view.session_id() {
            debug!(
                client_session = query.session_id,
                session_id = view.session_id(),
                "session mismatch"
            );
            return self.cache_reset();
        }
        if query.serial == view.serial() {
            return self.respond(view.session_id(), Diff::empty(view.serial()));
        }
        match view.diff_from(query.serial) {
            Ok(diff) => self.respond(view.session_id(), diff),
            Err(SerialUnknown(serial)) => {
                debug!(%serial, current = %view.serial(), "serial not in history");
                self.cache_reset()
            }
        }
    }

    fn full_sync(&mut self, view: &StoreView) -> Vec<Action> {
        let version = self.negotiated();
        let session_id = view.session_id();
        let mut pdus = vec![Pdu::CacheResponse(CacheResponse {
            version,
            session_id,
        })];
        pdus.extend(
            view.snapshot()
                .iter()
                .filter_map(|payload| payload_pdu(payload, Flag::Announce, version)),
        );
        pdus.push(self.end_of_data(session_id, view.serial()));
        debug!(
            session_id,
            serial = %view.serial(),
            payloads = pdus.len() - 2,
            "full synchronization"
        );
        self.synchronized(session_id, view.serial());
        vec![Action::Send(pdus)]
    }

    fn respond(&mut self, session_id: u16, diff: Diff) -> Vec<Action> {
        let version = self.negotiated();
        let mut pdus = vec![Pdu::CacheResponse(CacheResponse {
            version,
            session_id,
        })];
        pdus.extend(
            diff.withdrawn
                .iter()
                .filter_map(|payload| payload_pdu(payload, Flag::Withdraw, version)),
        );
        pdus.extend(
            diff.announced
                .iter()
                .filter_map(|payload| payload_pdu(payload, Flag::Announce, version)),
        );
        pdus.push(self.end_of_data(session_id, diff.to_serial));
        debug!(
            session_id,
            serial = %diff.to_serial,
            announced = diff.announced.len(),
            withdrawn = diff.withdrawn.len(),
            "incremental update"
        );
        self.synchronized(session_id, diff.to_serial);
        vec![Action::Send(pdus)]
    }

    fn synchronized(&mut self, session_id: u16, serial: Serial) {
        self.session_id = Some(session_id);
        self.client_serial = Some(serial);
        self.state = SessionState::Synchronizing;
    }

    fn end_of_data(&self, session_id: u16, serial: Serial) -> Pdu {
        Pdu::EndOfData(EndOfData::new(
            self.negotiated(),
            session_id,
            serial,
            self.timing,
        ))
    }

    fn cache_reset(&mut self) -> Vec<Action> {
        self.state = SessionState::ExpectResetOrSerial;
        self.client_serial = None;
        self.notify_pending = false;
        vec![Action::Send(vec![Pdu::CacheReset(CacheReset {
            version: self.negotiated(),
        })])]
    }

    /// Send an Error Report, closing the session unless the code allows the
    /// router to retry.
    fn report_error(&mut self, code: ErrorCode, pdu: Vec<u8>, text: String) -> Vec<Action> {
        let fatal = code.is_fatal();
        if fatal {
            warn!(?code, %text, "closing session with error report");
        }
        let report = Pdu::ErrorReport(ErrorReport {
            version: self.negotiated(),
            code,
            pdu,
            text,
        });
        let mut actions = vec![Action::Send(vec![report])];
        if fatal {
            actions.extend(self.close("protocol error"));
        }
        actions
    }

    fn notify_if_behind(&mut self) -> Vec<Action> {
        let view = self.store.view();
        if !view.is_ready() {
            return Vec::new();
        }
        let current = (view.session_id(), view.serial());
        if self.session_id == Some(current.0) && self.client_serial == Some(current.1) {
            return Vec::new();
        }
        if self.last_notified == Some(current) {
            return Vec::new();
        }
        self.last_notified = Some(current);
        vec![Action::Send(vec![Pdu::SerialNotify(SerialNotify {
            version: self.negotiated(),
            session_id: current.0,
            serial: current.1,
        })])]
    }
}

/// Wire form of one announcement. Router keys have no encoding before
/// version 1 and are skipped.
fn payload_pdu(payload: &Payload, flag: Flag, version: ProtocolVersion) -> Option<Pdu> {
    match payload {
        Payload::RouteOrigin(origin) => {
            let prefix_len = origin.prefix.length();
            let max_len = origin.max_len;
            let asn = origin.asn.0;
            Some(match origin.prefix.addr() {
                IpAddr::V4(prefix) => Pdu::Ipv4Prefix(Ipv4Prefix {
                    version,
                    flag,
                    prefix,
                    prefix_len,
                    max_len,
                    asn,
                }),
                IpAddr::V6(prefix) => Pdu::Ipv6Prefix(Ipv6Prefix {
                    version,
                    flag,
                    prefix,
                    prefix_len,
                    max_len,
                    asn,
                }),
            })
        }
        Payload::RouterKey(key) if version.supports_router_keys() => {
            Some(Pdu::RouterKey(RouterKey {
                version,
                flag,
                ski: key.ski,
                asn: key.asn.0,
                spki: key.spki.clone(),
            }))
        }
        Payload::RouterKey(_) => None,
    }
}
