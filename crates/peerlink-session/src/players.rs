//! The player table: every peer this process holds a link to.
//!
//! Records are never erased while something might be iterating over them.
//! A failing receive loop or send marks its record as removed (a
//! tombstone); [`PlayerTable::compact`] drops all tombstones in one pass.
//! Callers do that at the start of every flush and every accept.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use peerlink_protocol::NetId;

use crate::SessionError;

/// Default limit on concurrently tracked players, host included.
pub const MAX_PLAYERS: usize = 16;

/// One peer's entry in the table.
///
/// On the host, record 0 is the host itself (no connection) and every other
/// record is an accepted client. On a client, record 0 is the link to the
/// host.
pub struct PlayerRecord<C> {
    /// The peer's network ID.
    pub id: NetId,
    /// The peer's remote address (the local address for the host's own record).
    pub addr: SocketAddr,
    /// The TCP link to this peer, `None` for the host's own record.
    pub conn: Option<Arc<C>>,
    /// Tombstone: set when the link failed, cleared by compaction.
    pub removed: bool,
}

impl<C> PlayerRecord<C> {
    /// A record that still counts as connected.
    pub fn is_live(&self) -> bool {
        !self.removed
    }
}

impl<C> Clone for PlayerRecord<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            addr: self.addr,
            conn: self.conn.clone(),
            removed: self.removed,
        }
    }
}

impl<C> fmt::Debug for PlayerRecord<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerRecord")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("connected", &self.conn.is_some())
            .field("removed", &self.removed)
            .finish()
    }
}

/// All player records, ordered by ID.
///
/// Generic over the connection type so it can be tested without sockets.
/// Not synchronized: the owner wraps it in a mutex.
pub struct PlayerTable<C> {
    records: BTreeMap<NetId, PlayerRecord<C>>,
    capacity: usize,
}

impl<C> PlayerTable<C> {
    /// Creates an empty table holding at most `capacity` live records.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records that are not tombstoned.
    pub fn live_count(&self) -> usize {
        self.records.values().filter(|r| r.is_live()).count()
    }

    /// Number of records, tombstones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns `true` if no further record can be inserted.
    pub fn is_full(&self) -> bool {
        self.live_count() >= self.capacity
    }

    /// Adds a record under the lowest ID not present in the table.
    ///
    /// Tombstoned records still occupy their ID until compacted, so call
    /// [`compact`](Self::compact) first to make their IDs reusable.
    ///
    /// # Errors
    /// [`SessionError::CapacityExceeded`] if the table is full. The table
    /// is left untouched.
    pub fn insert(
        &mut self,
        addr: SocketAddr,
        conn: Option<Arc<C>>,
    ) -> Result<NetId, SessionError> {
        if self.is_full() {
            return Err(SessionError::CapacityExceeded(self.capacity));
        }

        let id = self.lowest_free_id();
        self.records.insert(
            id,
            PlayerRecord {
                id,
                addr,
                conn,
                removed: false,
            },
        );
        tracing::debug!(net_id = %id, %addr, "player record added");
        Ok(id)
    }

    fn lowest_free_id(&self) -> NetId {
        // Keys iterate in ascending order, so the first gap is the answer.
        let mut next = 0;
        for id in self.records.keys() {
            if id.0 != next {
                break;
            }
            next += 1;
        }
        NetId(next)
    }

    pub fn get(&self, id: NetId) -> Option<&PlayerRecord<C>> {
        self.records.get(&id)
    }

    /// Marks a record as removed. Returns `false` if it was unknown or
    /// already tombstoned.
    pub fn tombstone(&mut self, id: NetId) -> bool {
        match self.records.get_mut(&id) {
            Some(record) if !record.removed => {
                record.removed = true;
                tracing::debug!(net_id = %id, "player record tombstoned");
                true
            }
            _ => false,
        }
    }

    /// Drops a record immediately, tombstoned or not.
    pub fn remove(&mut self, id: NetId) -> Option<PlayerRecord<C>> {
        self.records.remove(&id)
    }

    /// Drops every tombstoned record and returns them.
    pub fn compact(&mut self) -> Vec<PlayerRecord<C>> {
        let dead: Vec<NetId> = self
            .records
            .values()
            .filter(|r| r.removed)
            .map(|r| r.id)
            .collect();

        dead.into_iter()
            .filter_map(|id| self.records.remove(&id))
            .collect()
    }

    /// Live records that have a connection, excluding `self_id`.
    ///
    /// Returns owned handles so the caller can release the lock before
    /// doing any I/O.
    pub fn recipients(&self, self_id: Option<NetId>) -> Vec<(NetId, Arc<C>)> {
        self.records
            .values()
            .filter(|r| r.is_live() && Some(r.id) != self_id)
            .filter_map(|r| r.conn.as_ref().map(|c| (r.id, Arc::clone(c))))
            .collect()
    }

    /// ID and address of every live record except `self_id`, ascending.
    pub fn live_peers(&self, self_id: Option<NetId>) -> Vec<(NetId, SocketAddr)> {
        self.records
            .values()
            .filter(|r| r.is_live() && Some(r.id) != self_id)
            .map(|r| (r.id, r.addr))
            .collect()
    }

    /// IDs of every live record, ascending.
    pub fn live_ids(&self) -> Vec<NetId> {
        self.records
            .values()
            .filter(|r| r.is_live())
            .map(|r| r.id)
            .collect()
    }

    /// Removes every record and returns them.
    pub fn clear(&mut self) -> Vec<PlayerRecord<C>> {
        std::mem::take(&mut self.records).into_values().collect()
    }
}

impl<C> Default for PlayerTable<C> {
    fn default() -> Self {
        Self::new(MAX_PLAYERS)
    }
}

impl<C> fmt::Debug for PlayerTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerTable")
            .field("capacity", &self.capacity)
            .field("records", &self.records.values().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in for a connection handle.
    #[derive(Debug)]
    struct FakeConn;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn host_table() -> PlayerTable<FakeConn> {
        let mut table = PlayerTable::new(MAX_PLAYERS);
        table.insert(addr(9999), None).unwrap();
        table
    }

    #[test]
    fn test_ids_are_assigned_in_order() {
        let mut table = host_table();
        let a = table.insert(addr(1), Some(Arc::new(FakeConn))).unwrap();
        let b = table.insert(addr(2), Some(Arc::new(FakeConn))).unwrap();

        assert_eq!(table.get(NetId::HOST).unwrap().addr, addr(9999));
        assert_eq!(a, NetId(1));
        assert_eq!(b, NetId(2));
        assert_eq!(table.live_count(), 3);
    }

    #[test]
    fn test_lowest_free_id_is_reused_after_compaction() {
        let mut table = host_table();
        for port in 1..=3 {
            table.insert(addr(port), Some(Arc::new(FakeConn))).unwrap();
        }

        assert!(table.tombstone(NetId(2)));
        // Still occupied until compaction.
        assert_eq!(table.insert(addr(4), None).unwrap(), NetId(4));

        let removed = table.compact();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, NetId(2));

        assert_eq!(table.insert(addr(5), None).unwrap(), NetId(2));
    }

    #[test]
    fn test_capacity_counts_host_and_leaves_table_untouched() {
        let mut table = host_table();
        for port in 1..16 {
            table.insert(addr(port), Some(Arc::new(FakeConn))).unwrap();
        }
        assert_eq!(table.live_count(), 16);

        let result = table.insert(addr(100), Some(Arc::new(FakeConn)));
        assert_eq!(result, Err(SessionError::CapacityExceeded(16)));
        assert_eq!(table.len(), 16);
        assert!(table.get(NetId(16)).is_none());
    }

    #[test]
    fn test_tombstone_frees_capacity() {
        let mut table: PlayerTable<FakeConn> = PlayerTable::new(2);
        table.insert(addr(1), None).unwrap();
        table.insert(addr(2), None).unwrap();
        assert!(table.is_full());

        table.tombstone(NetId(1));
        assert!(!table.is_full());
    }

    #[test]
    fn test_tombstoned_record_is_not_a_recipient() {
        let mut table = host_table();
        table.insert(addr(1), Some(Arc::new(FakeConn))).unwrap();
        table.insert(addr(2), Some(Arc::new(FakeConn))).unwrap();
        table.tombstone(NetId(1));

        let ids: Vec<NetId> = table
            .recipients(Some(NetId::HOST))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![NetId(2)]);
    }

    #[test]
    fn test_recipients_exclude_self() {
        let mut table: PlayerTable<FakeConn> = PlayerTable::new(MAX_PLAYERS);
        table.insert(addr(1), Some(Arc::new(FakeConn))).unwrap();
        table.insert(addr(2), Some(Arc::new(FakeConn))).unwrap();

        let ids: Vec<NetId> = table
            .recipients(Some(NetId(0)))
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![NetId(1)]);
    }

    #[test]
    fn test_live_peers_skip_self_and_tombstones() {
        let mut table = host_table();
        table.insert(addr(1), None).unwrap();
        table.insert(addr(2), None).unwrap();
        table.tombstone(NetId(1));

        assert_eq!(
            table.live_peers(Some(NetId::HOST)),
            vec![(NetId(2), addr(2))]
        );
    }

    #[test]
    fn test_tombstone_unknown_or_twice() {
        let mut table = host_table();
        assert!(!table.tombstone(NetId(7)));
        table.insert(addr(1), None).unwrap();
        assert!(table.tombstone(NetId(1)));
        assert!(!table.tombstone(NetId(1)));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut table = host_table();
        table.insert(addr(1), None).unwrap();

        let removed = table.remove(NetId(1)).unwrap();
        assert_eq!(removed.addr, addr(1));
        assert_eq!(table.live_ids(), vec![NetId::HOST]);

        let all = table.clear();
        assert_eq!(all.len(), 1);
        assert!(table.is_empty());
    }
}
