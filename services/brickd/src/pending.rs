//! The pending-request table: one global list of outstanding requests plus,
//! per owner (client or zombie), a second list over the same nodes. Each
//! node belongs to exactly one global list and exactly one owner list at
//! once, matching the spec's invariant for `PendingRequest`.

use bd_container::{Arena, Handle, HasLinks, IntrusiveList, Links};
use bd_protocol::Header;

use crate::network::client::Client;
use crate::network::zombie::Zombie;

pub type ClientId = Handle<Client>;
pub type ZombieId = Handle<Zombie>;
pub type PendingRequestId = Handle<PendingRequest>;

/// The node's current owner. Exactly one of these at a time — enforced by
/// construction, never both a client and a zombie simultaneously.
#[derive(Debug, Clone, Copy)]
pub enum Owner {
    Client(ClientId),
    Zombie(ZombieId),
}

/// Tag selecting the global-list link field on a [`PendingRequest`].
pub struct GlobalTag;
/// Tag selecting the owner-list link field. The same tag is reused by every
/// client's and every zombie's own `IntrusiveList` — what distinguishes one
/// owner's list from another is which `Client`/`Zombie` holds it, not the
/// tag type.
pub struct OwnerTag;

pub struct PendingRequest {
    pub header: Header,
    pub owner: Owner,
    global: Links<PendingRequest>,
    owner_links: Links<PendingRequest>,
}

impl HasLinks<GlobalTag> for PendingRequest {
    fn links(&self) -> &Links<Self> {
        &self.global
    }
    fn links_mut(&mut self) -> &mut Links<Self> {
        &mut self.global
    }
}

impl HasLinks<OwnerTag> for PendingRequest {
    fn links(&self) -> &Links<Self> {
        &self.owner_links
    }
    fn links_mut(&mut self) -> &mut Links<Self> {
        &mut self.owner_links
    }
}

pub type OwnerList = IntrusiveList<PendingRequest, OwnerTag>;

/// Per-request cap enforced per client (not per zombie — a zombie only ever
/// shrinks).
pub const PENDING_REQUEST_CAP: usize = 32768;

pub struct PendingRequestTable {
    arena: Arena<PendingRequest>,
    global: IntrusiveList<PendingRequest, GlobalTag>,
}

impl PendingRequestTable {
    pub fn new() -> PendingRequestTable {
        PendingRequestTable { arena: Arena::new(), global: IntrusiveList::new() }
    }

    pub fn global_len(&self) -> usize {
        self.global.len()
    }

    /// Allocates a new pending-request record and links it into the global
    /// list. The caller is responsible for also linking `id` into the
    /// owner's own list, via [`Self::arena_mut`].
    pub fn allocate(&mut self, header: Header, owner: Owner) -> PendingRequestId {
        let id = self.arena.insert(PendingRequest {
            header,
            owner,
            global: Links::default(),
            owner_links: Links::default(),
        });
        self.global.push_back(&mut self.arena, id);
        id
    }

    pub fn arena(&self) -> &Arena<PendingRequest> {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena<PendingRequest> {
        &mut self.arena
    }

    pub fn header(&self, id: PendingRequestId) -> Option<Header> {
        self.arena.get(id).map(|p| p.header)
    }

    pub fn owner(&self, id: PendingRequestId) -> Option<Owner> {
        self.arena.get(id).map(|p| p.owner)
    }

    pub fn set_owner(&mut self, id: PendingRequestId, owner: Owner) {
        if let Some(node) = self.arena.get_mut(id) {
            node.owner = owner;
        }
    }

    /// First entry (front-to-back) whose saved header matches `response`.
    pub fn find_matching(&self, response: &Header) -> Option<PendingRequestId> {
        self.global
            .iter(&self.arena)
            .find(|&id| self.arena.get(id).is_some_and(|p| response.is_matching_response(&p.header)))
    }

    /// Every pending id whose saved header carries `uid`, without removing
    /// them — callers remove via their own owner list plus
    /// [`Self::remove_global`].
    pub fn ids_with_uid(&self, uid: u32) -> Vec<PendingRequestId> {
        self.global.iter(&self.arena).filter(|&id| self.arena.get(id).is_some_and(|p| p.header.uid == uid)).collect()
    }

    /// Unlinks `id` from the global list. Does not touch the owner list or
    /// deallocate — see [`Self::deallocate`].
    pub fn remove_global(&mut self, id: PendingRequestId) {
        self.global.remove(&mut self.arena, id);
    }

    pub fn deallocate(&mut self, id: PendingRequestId) {
        self.arena.remove(id);
    }
}

impl Default for PendingRequestTable {
    fn default() -> Self {
        PendingRequestTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::client::test_client;

    fn header(uid: u32, function_id: u8, seq: u8) -> Header {
        Header { uid, length: 8, function_id, sequence_number: seq, response_expected: true, error_code_bits: 0 }
    }

    /// A real `ClientId`, obtained the only way one can exist: inserted into
    /// an actual `Arena<Client>`.
    fn fake_client_owner() -> Owner {
        let mut clients = Arena::new();
        let id = clients.insert(test_client("owner"));
        Owner::Client(id)
    }

    #[test]
    fn find_matching_requires_all_three_fields() {
        let mut table = PendingRequestTable::new();
        let id = table.allocate(header(1, 5, 2), fake_client_owner());
        let matching = header(1, 5, 2);
        let mismatched = header(1, 6, 2);
        assert_eq!(table.find_matching(&matching), Some(id));
        assert_eq!(table.find_matching(&mismatched), None);
    }

    #[test]
    fn ids_with_uid_filters_correctly() {
        let mut table = PendingRequestTable::new();
        let owner = fake_client_owner();
        let a = table.allocate(header(1, 1, 1), owner);
        let _b = table.allocate(header(2, 1, 1), owner);
        let c = table.allocate(header(1, 2, 3), owner);
        let mut ids = table.ids_with_uid(1);
        ids.sort_by_key(|id| id.slot_index());
        let mut expected = vec![a, c];
        expected.sort_by_key(|id| id.slot_index());
        assert_eq!(ids, expected);
    }

    #[test]
    fn remove_global_and_deallocate_drop_the_entry() {
        let mut table = PendingRequestTable::new();
        let owner = fake_client_owner();
        let id = table.allocate(header(1, 1, 1), owner);
        assert_eq!(table.global_len(), 1);
        table.remove_global(id);
        table.deallocate(id);
        assert_eq!(table.global_len(), 0);
        assert!(table.header(id).is_none());
    }
}
