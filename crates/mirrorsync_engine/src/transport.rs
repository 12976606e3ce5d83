//! Remote transport for the sync protocol.
//!
//! [`RemotePeer`] turns every [`SyncPeer`] call into a CBOR-encoded
//! [`SyncMessage`] posted to `{base_url}/sync/{operation}`. On the other end
//! a [`PeerServer`] decodes the message and dispatches it to any peer. The
//! actual HTTP client is abstracted behind [`HttpClient`], so any library
//! (or the in-process [`LoopbackClient`]) can carry the bytes.
//!
//! Filters and converters are peer-local and never cross the wire.

use crate::error::{SyncError, SyncResult};
use crate::peer::SyncPeer;
use mirrorsync_protocol::{
    ProtocolError, ServiceRequest, ServiceResult, SyncClientOptions, SyncIssue, SyncMessage,
    SyncObject, SyncOptions, SyncRequest, SyncSession,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// A peer on the far side of an [`HttpClient`].
pub struct RemotePeer<C: HttpClient> {
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> RemotePeer<C> {
    /// Creates a remote peer.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns true if the peer is open and the client is healthy.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    /// Closes the peer. Every later call fails with [`SyncError::NotConnected`].
    pub fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn url_for(&self, operation: &str) -> String {
        format!("{}/sync/{}", self.base_url.trim_end_matches('/'), operation)
    }

    fn call(&self, request: SyncMessage) -> SyncResult<SyncMessage> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let url = self.url_for(request.operation());
        let body = request.encode()?;
        let response = self.client.post(&url, body).map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::transport_retryable(e)
        })?;
        *self.last_error.write() = None;

        Ok(SyncMessage::decode(&response)?.into_ok()?)
    }

    fn call_ack(&self, request: SyncMessage) -> SyncResult<()> {
        match self.call(request)? {
            SyncMessage::Ack => Ok(()),
            other => Err(other.unexpected("ack").into()),
        }
    }

    fn call_objects(&self, request: SyncMessage) -> SyncResult<ServiceResult<SyncObject>> {
        match self.call(request)? {
            SyncMessage::Objects(result) => Ok(result),
            other => Err(other.unexpected("objects").into()),
        }
    }

    fn call_issues(&self, request: SyncMessage) -> SyncResult<ServiceResult<SyncIssue>> {
        match self.call(request)? {
            SyncMessage::Issues(result) => Ok(result),
            other => Err(other.unexpected("issues").into()),
        }
    }
}

impl<C: HttpClient> SyncPeer for RemotePeer<C> {
    fn begin_sync(&self, session_id: Uuid, options: &SyncOptions) -> SyncResult<SyncSession> {
        let response = self.call(SyncMessage::BeginSync {
            session_id,
            options: options.clone(),
        })?;
        match response {
            SyncMessage::Session(session) if session.session_id == session_id => Ok(session),
            SyncMessage::Session(session) => Err(ProtocolError::violation(format!(
                "opened session {} instead of {session_id}",
                session.session_id
            ))
            .into()),
            other => Err(other.unexpected("session").into()),
        }
    }

    fn get_changes(
        &self,
        session_id: Uuid,
        request: SyncRequest,
    ) -> SyncResult<ServiceResult<SyncObject>> {
        self.call_objects(SyncMessage::GetChanges {
            session_id,
            request,
        })
    }

    fn apply_changes(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncObject>,
    ) -> SyncResult<ServiceResult<SyncIssue>> {
        self.call_issues(SyncMessage::ApplyChanges {
            session_id,
            request,
        })
    }

    fn get_corrections(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncIssue>,
    ) -> SyncResult<ServiceResult<SyncObject>> {
        self.call_objects(SyncMessage::GetCorrections {
            session_id,
            request,
        })
    }

    fn apply_corrections(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncObject>,
    ) -> SyncResult<ServiceResult<SyncIssue>> {
        self.call_issues(SyncMessage::ApplyCorrections {
            session_id,
            request,
        })
    }

    fn end_sync(&self, session: &SyncSession) -> SyncResult<()> {
        self.call_ack(SyncMessage::EndSync(*session))
    }

    fn update_options(&self, session_id: Uuid, options: &SyncClientOptions) -> SyncResult<()> {
        self.call_ack(SyncMessage::UpdateOptions {
            session_id,
            options: options.clone(),
        })
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// Serves the sync protocol for a peer.
pub struct PeerServer<P: SyncPeer> {
    peer: P,
}

impl<P: SyncPeer> PeerServer<P> {
    /// Wraps a peer.
    pub fn new(peer: P) -> Self {
        Self { peer }
    }

    /// The served peer.
    pub fn peer(&self) -> &P {
        &self.peer
    }

    /// Handles one decoded request. Failures become [`SyncMessage::Error`].
    pub fn handle_message(&self, message: SyncMessage) -> SyncMessage {
        let operation = message.operation();
        match self.dispatch(message) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(operation, error = %e, "sync request failed");
                SyncMessage::error(e.to_string())
            }
        }
    }

    fn dispatch(&self, message: SyncMessage) -> SyncResult<SyncMessage> {
        let response = match message {
            SyncMessage::BeginSync {
                session_id,
                options,
            } => SyncMessage::Session(self.peer.begin_sync(session_id, &options)?),
            SyncMessage::GetChanges {
                session_id,
                request,
            } => SyncMessage::Objects(self.peer.get_changes(session_id, request)?),
            SyncMessage::ApplyChanges {
                session_id,
                request,
            } => SyncMessage::Issues(self.peer.apply_changes(session_id, request)?),
            SyncMessage::GetCorrections {
                session_id,
                request,
            } => SyncMessage::Objects(self.peer.get_corrections(session_id, request)?),
            SyncMessage::ApplyCorrections {
                session_id,
                request,
            } => SyncMessage::Issues(self.peer.apply_corrections(session_id, request)?),
            SyncMessage::EndSync(session) => {
                self.peer.end_sync(&session)?;
                SyncMessage::Ack
            }
            SyncMessage::UpdateOptions {
                session_id,
                options,
            } => {
                self.peer.update_options(session_id, &options)?;
                SyncMessage::Ack
            }
            other => {
                return Err(ProtocolError::violation(format!(
                    "{} is not a request",
                    other.operation()
                ))
                .into())
            }
        };
        Ok(response)
    }
}

impl<P: SyncPeer> LoopbackServer for PeerServer<P> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let response = match SyncMessage::decode(body) {
            Ok(message) if path.strip_prefix("/sync/") == Some(message.operation()) => {
                self.handle_message(message)
            }
            Ok(message) => {
                SyncMessage::error(format!("{} posted to {path}", message.operation()))
            }
            Err(e) => SyncMessage::error(e.to_string()),
        };
        response.encode().map_err(|e| e.to_string())
    }
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// The server behind this client.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
