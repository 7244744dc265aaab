//! Ties together accepted clients, their pending-request ownership, and the
//! zombies left behind when a client disconnects with requests still in
//! flight. This is the home of Components F (dispatch), G (client lifecycle
//! glue), H (zombie), and I (network) from the design.

mod client;
mod client_io;
mod listener;
mod writer;
mod ws;
mod zombie;

pub use client::{Client, ReadOutcome};
pub use client_io::ClientIo;
pub use listener::{PlainListener, WsListener};
pub use writer::{DrainOutcome, WriteOutcome};
pub use zombie::Zombie;

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::time::Duration;

use bd_container::Arena;
use bd_protocol::{function_id, ErrorCode, Header, Packet, EnumerationType, HEADER_LEN, HMAC_DIGEST_LEN};
use bd_reactor::{Reactor, TimerId};
use tracing::{debug, warn};

use crate::auth::{handle_authenticate, handle_get_nonce, AuthOutcome, AuthState};
use crate::config::BrickdConfig;
use crate::hardware::RequestRouter;
use crate::pending::{ClientId, Owner, PendingRequestId, PendingRequestTable, ZombieId, PENDING_REQUEST_CAP};

/// How long a zombie is given to drain before it is reaped unconditionally.
pub const ZOMBIE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Which listener kind accepted a given connection, so a caller that only
/// knows a `RawFd` readiness event can route it to the right accept path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Plain(usize),
    Ws(usize),
}

pub struct Network {
    clients: Arena<Client>,
    zombies: Arena<Zombie>,
    pending: PendingRequestTable,
    plain_listeners: Vec<PlainListener>,
    ws_listeners: Vec<WsListener>,
    secret: Option<Vec<u8>>,
}

impl Network {
    pub fn new(config: &BrickdConfig) -> io::Result<Network> {
        Ok(Network {
            clients: Arena::new(),
            zombies: Arena::new(),
            pending: PendingRequestTable::new(),
            plain_listeners: PlainListener::bind_all(&config.listen)?,
            ws_listeners: WsListener::bind_all(&config.listen)?,
            secret: config.authentication.secret.clone().map(String::into_bytes),
        })
    }

    pub fn listener_fds(&self) -> Vec<(RawFd, ListenerKind)> {
        let plain = self.plain_listeners.iter().enumerate().map(|(i, l)| (l.raw_fd(), ListenerKind::Plain(i)));
        let ws = self.ws_listeners.iter().enumerate().map(|(i, l)| (l.raw_fd(), ListenerKind::Ws(i)));
        plain.chain(ws).collect()
    }

    pub fn accept(&mut self, kind: ListenerKind) -> io::Result<Option<(ClientId, SocketAddr)>> {
        let accepted = match kind {
            ListenerKind::Plain(index) => self.plain_listeners[index].accept()?,
            ListenerKind::Ws(index) => self.ws_listeners[index].accept()?,
        };
        Ok(accepted.map(|(io, addr)| (self.new_client(io, addr), addr)))
    }

    fn new_client(&mut self, io: Box<dyn ClientIo>, addr: SocketAddr) -> ClientId {
        let server_nonce: u32 = rand::random();
        let auth_state = AuthState::initial(self.secret.is_some());
        let client = Client::new(addr.to_string(), io, auth_state, server_nonce);
        self.clients.insert(client)
    }

    pub fn client(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut Client> {
        self.clients.get_mut(id)
    }

    /// Reads whatever is available from `id` and returns the fully framed
    /// requests extracted, in arrival order. Empty once the client has been
    /// marked disconnected; the caller observes that via [`Client::disconnected`]
    /// through [`Self::client`].
    pub fn read_client(&mut self, id: ClientId) -> Vec<Packet> {
        match self.clients.get_mut(id) {
            Some(client) => match client.read_available() {
                ReadOutcome::Packets(packets) => packets,
                ReadOutcome::Disconnected => Vec::new(),
            },
            None => Vec::new(),
        }
    }

    /// Drains as much of `id`'s outbound backlog as the socket accepts right
    /// now. Marks the client disconnected on a fatal write error.
    pub fn drain_client(&mut self, id: ClientId) -> Option<DrainOutcome> {
        let client = self.clients.get_mut(id)?;
        let outcome = client.writer.drain(client.io_mut());
        if outcome == DrainOutcome::FatalError {
            client.disconnected = true;
        }
        Some(outcome)
    }

    /// Component F/G: routes one parsed request from `id`. Requests
    /// addressed to the daemon itself (`uid == 1`) are answered directly;
    /// everything else is forwarded through `router` when the client's auth
    /// state allows it.
    pub fn handle_client_request(&mut self, id: ClientId, request: Packet, router: &mut dyn RequestRouter) {
        if request.header.uid == bd_protocol::UID_DAEMON {
            self.handle_daemon_request(id, request);
            return;
        }
        let forwarding_allowed = self.clients.get(id).is_some_and(|c| c.auth_state.forwarding_allowed());
        if !forwarding_allowed {
            return;
        }
        if request.header.response_expected {
            self.expect_response(id, request.header);
        }
        router.dispatch(&request);
    }

    fn handle_daemon_request(&mut self, id: ClientId, request: Packet) {
        let Some(client) = self.clients.get_mut(id) else { return };
        match request.header.function_id {
            function_id::GET_AUTHENTICATION_NONCE => {
                if !request.payload.is_empty() {
                    client.disconnected = true;
                    return;
                }
                match handle_get_nonce(&mut client.auth_state, client.server_nonce) {
                    AuthOutcome::SendNonce(nonce) => {
                        let response = nonce_response(&request.header, nonce);
                        client.writer.write(client.io_mut(), &response.to_bytes());
                    }
                    AuthOutcome::Disconnect => client.disconnected = true,
                    AuthOutcome::Authenticated { .. } => unreachable!("get-nonce never authenticates directly"),
                }
            }
            function_id::AUTHENTICATE => {
                let Some((client_nonce, digest)) = parse_authenticate_payload(&request.payload) else {
                    client.disconnected = true;
                    return;
                };
                let Some(secret) = self.secret.as_deref() else {
                    client.disconnected = true;
                    return;
                };
                let outcome = handle_authenticate(
                    &mut client.auth_state,
                    secret,
                    client.server_nonce,
                    client_nonce,
                    &digest,
                    request.header.response_expected,
                );
                match outcome {
                    AuthOutcome::Authenticated { respond } => {
                        if respond {
                            let response = ack_response(&request.header);
                            client.writer.write(client.io_mut(), &response.to_bytes());
                        }
                    }
                    AuthOutcome::Disconnect => client.disconnected = true,
                    AuthOutcome::SendNonce(_) => unreachable!("authenticate never re-sends a nonce"),
                }
            }
            function_id::DISCONNECT_PROBE => {}
            _ => {
                let response = error_response(&request.header, ErrorCode::FunctionNotSupported);
                client.writer.write(client.io_mut(), &response.to_bytes());
            }
        }
    }

    /// Component F's `network_client_expects_response`: enforces the
    /// per-client pending-request quota, then links a new record into both
    /// the global list and `id`'s own list.
    fn expect_response(&mut self, id: ClientId, header: Header) {
        let Some(client) = self.clients.get_mut(id) else { return };
        while client.pending_count >= PENDING_REQUEST_CAP {
            let Some(oldest) = client.pending.pop_front(self.pending.arena_mut()) else { break };
            self.pending.remove_global(oldest);
            self.pending.deallocate(oldest);
            client.pending_count -= 1;
            client.dropped_pending_requests += 1;
        }
        let new_id = self.pending.allocate(header, Owner::Client(id));
        client.pending.push_back(self.pending.arena_mut(), new_id);
        client.pending_count += 1;
    }

    /// Component F's `network_dispatch_response`.
    pub fn dispatch_response(&mut self, response: &Packet) {
        if response.header.is_callback() {
            if response.header.function_id == function_id::ENUMERATE && is_enumerate_state_change(response) {
                self.drop_stale_pending(response.header.uid);
            }
            self.broadcast(response);
            return;
        }
        match self.pending.find_matching(&response.header) {
            Some(pending_id) => self.deliver_to_owner(pending_id, response),
            None => {
                warn!(uid = response.header.uid, function_id = response.header.function_id, "unmatched response, broadcasting as fallback");
                self.broadcast(response);
            }
        }
    }

    fn drop_stale_pending(&mut self, uid: u32) {
        let ids = self.pending.ids_with_uid(uid);
        let count = ids.len();
        for id in ids {
            self.unlink_from_owner(id);
            self.pending.remove_global(id);
            self.pending.deallocate(id);
        }
        if count > 0 {
            debug!(uid, count, "dropped stale pending requests on enumerate state change");
        }
    }

    fn unlink_from_owner(&mut self, id: PendingRequestId) {
        let Some(owner) = self.pending.owner(id) else { return };
        match owner {
            Owner::Client(client_id) => {
                if let Some(client) = self.clients.get_mut(client_id) {
                    client.pending.remove(self.pending.arena_mut(), id);
                    client.pending_count = client.pending_count.saturating_sub(1);
                }
            }
            Owner::Zombie(zombie_id) => {
                if let Some(zombie) = self.zombies.get_mut(zombie_id) {
                    zombie.pending.remove(self.pending.arena_mut(), id);
                    zombie.pending_count = zombie.pending_count.saturating_sub(1);
                    if zombie.pending_count == 0 {
                        zombie.finished = true;
                    }
                }
            }
        }
    }

    fn deliver_to_owner(&mut self, id: PendingRequestId, response: &Packet) {
        let owner = self.pending.owner(id);
        self.pending.remove_global(id);
        let bytes = response.to_bytes();
        if let Some(owner) = owner {
            match owner {
                Owner::Client(client_id) => {
                    if let Some(client) = self.clients.get_mut(client_id) {
                        client.pending.remove(self.pending.arena_mut(), id);
                        client.pending_count = client.pending_count.saturating_sub(1);
                        let outcome = client.writer.write(client.io_mut(), &bytes);
                        if outcome == WriteOutcome::FatalError {
                            client.disconnected = true;
                        }
                    }
                }
                Owner::Zombie(zombie_id) => {
                    if let Some(zombie) = self.zombies.get_mut(zombie_id) {
                        zombie.pending.remove(self.pending.arena_mut(), id);
                        zombie.pending_count = zombie.pending_count.saturating_sub(1);
                        if zombie.pending_count == 0 {
                            zombie.finished = true;
                        }
                    }
                }
            }
        }
        self.pending.deallocate(id);
    }

    fn broadcast(&mut self, response: &Packet) {
        let bytes = response.to_bytes();
        for (_, client) in self.clients.iter_mut() {
            let outcome = client.writer.write(client.io_mut(), &bytes);
            if outcome == WriteOutcome::FatalError {
                client.disconnected = true;
            }
        }
    }

    /// Component H: called once a client's `disconnected` flag has been
    /// observed. If it still owns pending requests, those are handed to a
    /// freshly created zombie with its own 1-second drain timer; otherwise
    /// there is nothing left to preserve. Either way `id` is then removed.
    pub fn retire_client(&mut self, id: ClientId, reactor: &mut Reactor) {
        let Some(client) = self.clients.remove(id) else { return };
        if client.pending_count == 0 {
            return;
        }
        self.spawn_zombie(client, reactor);
    }

    fn spawn_zombie(&mut self, mut client: Client, reactor: &mut Reactor) {
        let timer = reactor.schedule_timer_after(ZOMBIE_DRAIN_TIMEOUT);
        let zombie_id = self.zombies.insert(Zombie::new(timer));
        let zombie = self.zombies.get_mut(zombie_id).expect("just inserted");
        // O(1) reparent: the list only stores head/tail handles, so moving
        // the whole value relinks nothing. Each node's `owner` field still
        // points at the old client and must be fixed up individually.
        zombie.pending = std::mem::replace(&mut client.pending, crate::pending::OwnerList::new());
        zombie.pending_count = std::mem::take(&mut client.pending_count);
        let ids: Vec<PendingRequestId> = zombie.pending.iter(self.pending.arena()).collect();
        for pending_id in ids {
            self.pending.set_owner(pending_id, Owner::Zombie(zombie_id));
        }
    }

    /// A zombie's drain timer fired; it is reaped unconditionally regardless
    /// of how many requests it is still carrying.
    pub fn zombie_timer_fired(&mut self, timer_id: TimerId) {
        for (_, zombie) in self.zombies.iter_mut() {
            if zombie.drain_timer == timer_id {
                zombie.finished = true;
                return;
            }
        }
    }

    /// Reactor's between-iterations sweep: drops every client whose
    /// `disconnected` flag is set (transitioning its pending requests to a
    /// zombie first) and every zombie that has finished draining.
    pub fn on_iteration_cleanup(&mut self, reactor: &mut Reactor) {
        self.retire_disconnected_clients(reactor);
        self.reap_finished_zombies(reactor);
    }

    /// Every client currently marked disconnected but not yet removed from
    /// the arena. A caller that owns its own fd-to-client bookkeeping (the
    /// daemon's reactor source table) needs this list *before* the client is
    /// actually dropped, since dropping it closes the socket.
    pub fn disconnected_clients(&self) -> Vec<ClientId> {
        self.clients.iter().filter(|(_, c)| c.disconnected).map(|(id, _)| id).collect()
    }

    /// The client-retirement half of [`Self::on_iteration_cleanup`], split
    /// out so a caller that also tracks reactor sources per client can
    /// deregister them first.
    pub fn retire_disconnected_clients(&mut self, reactor: &mut Reactor) {
        for id in self.disconnected_clients() {
            self.retire_client(id, reactor);
        }
    }

    /// The zombie-reaping half of [`Self::on_iteration_cleanup`].
    pub fn reap_finished_zombies(&mut self, reactor: &mut Reactor) {
        let finished: Vec<ZombieId> = self.zombies.iter().filter(|(_, z)| z.finished).map(|(id, _)| id).collect();
        for id in finished {
            if let Some(zombie) = self.zombies.remove(id) {
                reactor.cancel_timer(zombie.drain_timer);
            }
        }
    }
}

fn is_enumerate_state_change(response: &Packet) -> bool {
    matches!(
        response.payload.last(),
        Some(&ty) if ty == EnumerationType::Connected as u8 || ty == EnumerationType::Disconnected as u8
    )
}

fn response_header(request: &Header, payload_len: usize) -> Header {
    Header {
        uid: request.uid,
        length: (HEADER_LEN + payload_len) as u8,
        function_id: request.function_id,
        sequence_number: request.sequence_number,
        response_expected: false,
        error_code_bits: 0,
    }
}

fn nonce_response(request: &Header, nonce: u32) -> Packet {
    let payload = nonce.to_le_bytes().to_vec();
    let header = response_header(request, payload.len());
    Packet { header, payload }
}

fn ack_response(request: &Header) -> Packet {
    Packet { header: response_header(request, 0), payload: Vec::new() }
}

fn error_response(request: &Header, error: ErrorCode) -> Packet {
    let mut header = response_header(request, 0);
    header.error_code_bits = error as u8;
    Packet { header, payload: Vec::new() }
}

fn parse_authenticate_payload(payload: &[u8]) -> Option<(u32, [u8; HMAC_DIGEST_LEN])> {
    if payload.len() != 4 + HMAC_DIGEST_LEN {
        return None;
    }
    let client_nonce = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let mut digest = [0u8; HMAC_DIGEST_LEN];
    digest.copy_from_slice(&payload[4..4 + HMAC_DIGEST_LEN]);
    Some((client_nonce, digest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::client_io::NullClientIo;
    use bd_protocol::HEADER_LEN as HL;

    fn request_header(uid: u32, function_id: u8, seq: u8, response_expected: bool) -> Header {
        Header { uid, length: HL as u8, function_id, sequence_number: seq, response_expected, error_code_bits: 0 }
    }

    fn network_with_secret(secret: Option<&str>) -> Network {
        Network {
            clients: Arena::new(),
            zombies: Arena::new(),
            pending: PendingRequestTable::new(),
            plain_listeners: Vec::new(),
            ws_listeners: Vec::new(),
            secret: secret.map(|s| s.as_bytes().to_vec()),
        }
    }

    fn insert_client(network: &mut Network, secret_configured: bool) -> ClientId {
        let client = Client::new(
            "test".to_owned(),
            Box::new(NullClientIo),
            AuthState::initial(secret_configured),
            0x4142_4344,
        );
        network.clients.insert(client)
    }

    struct NullRouter;
    impl RequestRouter for NullRouter {
        fn dispatch(&mut self, _request: &Packet) {}
    }

    #[test]
    fn unauthenticated_get_nonce_sends_nonce_and_advances_state() {
        let mut network = network_with_secret(Some("secret"));
        let id = insert_client(&mut network, true);
        let request = Packet { header: request_header(1, function_id::GET_AUTHENTICATION_NONCE, 1, true), payload: Vec::new() };
        network.handle_client_request(id, request, &mut NullRouter);
        assert_eq!(network.client(id).unwrap().auth_state, AuthState::NonceSent);
    }

    #[test]
    fn full_handshake_reaches_done_and_allows_forwarding() {
        let mut network = network_with_secret(Some("secret"));
        let id = insert_client(&mut network, true);
        let server_nonce = network.client(id).unwrap().server_nonce;
        let nonce_req = Packet { header: request_header(1, function_id::GET_AUTHENTICATION_NONCE, 1, true), payload: Vec::new() };
        network.handle_client_request(id, nonce_req, &mut NullRouter);

        let client_nonce = 7u32;
        let digest = crate::auth::expected_digest(b"secret", server_nonce, client_nonce);
        let mut payload = client_nonce.to_le_bytes().to_vec();
        payload.extend_from_slice(&digest);
        let auth_req = Packet { header: request_header(1, function_id::AUTHENTICATE, 2, true), payload };
        network.handle_client_request(id, auth_req, &mut NullRouter);

        assert_eq!(network.client(id).unwrap().auth_state, AuthState::Done);
        assert!(network.client(id).unwrap().auth_state.forwarding_allowed());
    }

    #[test]
    fn authenticate_before_nonce_disconnects() {
        let mut network = network_with_secret(Some("secret"));
        let id = insert_client(&mut network, true);
        let mut payload = 0u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0u8; HMAC_DIGEST_LEN]);
        let req = Packet { header: request_header(1, function_id::AUTHENTICATE, 1, false), payload };
        network.handle_client_request(id, req, &mut NullRouter);
        assert!(network.client(id).unwrap().disconnected);
    }

    #[test]
    fn unknown_daemon_function_gets_function_not_supported() {
        let mut network = network_with_secret(None);
        let id = insert_client(&mut network, false);
        let req = Packet { header: request_header(1, 200, 1, true), payload: Vec::new() };
        network.handle_client_request(id, req, &mut NullRouter);
        // Drained via the test NullClientIo's infinite write-acceptance; we
        // only assert the client survives (no disconnect on an error reply).
        assert!(!network.client(id).unwrap().disconnected);
    }

    #[test]
    fn forwarding_blocked_before_authentication_done() {
        let mut network = network_with_secret(Some("secret"));
        let id = insert_client(&mut network, true);
        let mut dispatched = false;
        struct Recording<'a>(&'a mut bool);
        impl RequestRouter for Recording<'_> {
            fn dispatch(&mut self, _request: &Packet) {
                *self.0 = true;
            }
        }
        let req = Packet { header: request_header(2, 1, 1, true), payload: Vec::new() };
        network.handle_client_request(id, req, &mut Recording(&mut dispatched));
        assert!(!dispatched);
    }

    #[test]
    fn enumerate_request_is_forwarded_when_unauthenticated_not_required() {
        let mut network = network_with_secret(None);
        let id = insert_client(&mut network, false);
        let mut dispatched = false;
        struct Recording<'a>(&'a mut bool);
        impl RequestRouter for Recording<'_> {
            fn dispatch(&mut self, _request: &Packet) {
                *self.0 = true;
            }
        }
        let req = Packet { header: request_header(0, function_id::ENUMERATE, 1, false), payload: Vec::new() };
        network.handle_client_request(id, req, &mut Recording(&mut dispatched));
        assert!(dispatched);
    }

    #[test]
    fn pending_cap_drops_oldest_and_counts_it() {
        let mut network = network_with_secret(None);
        let id = insert_client(&mut network, false);
        {
            let client = network.client_mut(id).unwrap();
            client.pending_count = PENDING_REQUEST_CAP;
        }
        let oldest = network.pending.allocate(request_header(5, 1, 1, true), Owner::Client(id));
        {
            let client = network.client_mut(id).unwrap();
            client.pending.push_back(network.pending.arena_mut(), oldest);
        }
        network.expect_response(id, request_header(5, 1, 2, true));
        let client = network.client(id).unwrap();
        assert_eq!(client.pending_count, PENDING_REQUEST_CAP);
        assert_eq!(client.dropped_pending_requests, 1);
        assert!(network.pending.header(oldest).is_none());
    }

    #[test]
    fn solicited_response_delivers_and_unlinks() {
        let mut network = network_with_secret(None);
        let id = insert_client(&mut network, false);
        let req_header = request_header(9, 3, 4, true);
        network.expect_response(id, req_header);
        let response = Packet { header: Header { sequence_number: 4, response_expected: false, ..req_header }, payload: vec![1] };
        network.dispatch_response(&response);
        assert_eq!(network.client(id).unwrap().pending_count, 0);
        assert_eq!(network.pending.global_len(), 0);
    }

    #[test]
    fn unmatched_response_broadcasts_without_panicking() {
        let mut network = network_with_secret(None);
        let _id = insert_client(&mut network, false);
        let response = Packet { header: request_header(9, 3, 4, false), payload: Vec::new() };
        network.dispatch_response(&response);
    }

    #[test]
    fn disconnect_with_pending_requests_spawns_a_zombie() {
        let mut reactor = Reactor::new().unwrap();
        let mut network = network_with_secret(None);
        let id = insert_client(&mut network, false);
        network.expect_response(id, request_header(1, 1, 1, true));
        network.client_mut(id).unwrap().disconnected = true;
        network.on_iteration_cleanup(&mut reactor);
        assert!(network.client(id).is_none());
        assert_eq!(network.zombies.len(), 1);
    }

    #[test]
    fn disconnect_without_pending_requests_creates_no_zombie() {
        let mut reactor = Reactor::new().unwrap();
        let mut network = network_with_secret(None);
        let id = insert_client(&mut network, false);
        network.client_mut(id).unwrap().disconnected = true;
        network.on_iteration_cleanup(&mut reactor);
        assert!(network.client(id).is_none());
        assert_eq!(network.zombies.len(), 0);
    }

    #[test]
    fn zombie_timer_firing_marks_finished_regardless_of_count() {
        let mut reactor = Reactor::new().unwrap();
        let mut network = network_with_secret(None);
        let id = insert_client(&mut network, false);
        network.expect_response(id, request_header(1, 1, 1, true));
        network.client_mut(id).unwrap().disconnected = true;
        network.on_iteration_cleanup(&mut reactor);
        let timer = network.zombies.iter().next().unwrap().1.drain_timer;
        network.zombie_timer_fired(timer);
        network.on_iteration_cleanup(&mut reactor);
        assert_eq!(network.zombies.len(), 0);
    }

    #[test]
    fn enumerate_connected_callback_drops_stale_pending_for_uid() {
        let mut network = network_with_secret(None);
        let id = insert_client(&mut network, false);
        network.expect_response(id, request_header(42, 1, 1, true));
        let payload = {
            let mut p = vec![0u8; 25];
            p.push(EnumerationType::Connected as u8);
            p
        };
        let callback = Packet {
            header: Header { uid: 42, length: (HL + payload.len()) as u8, function_id: function_id::ENUMERATE, sequence_number: 0, response_expected: false, error_code_bits: 0 },
            payload,
        };
        network.dispatch_response(&callback);
        assert_eq!(network.client(id).unwrap().pending_count, 0);
    }
}
