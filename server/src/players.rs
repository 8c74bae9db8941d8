//! Account to player id registry
//!
//! Accounts are created on first login and keep their player id for the
//! lifetime of the process. The registry also remembers which room a player
//! was last placed in so that a dropped connection can be walked back out of it.

use log::info;
use parking_lot::Mutex;
use shared::{PlayerId, RoomId};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub player_id: PlayerId,
    pub account: String,
    pub online: bool,
    pub room_id: Option<RoomId>,
}

#[derive(Debug)]
struct Players {
    by_account: HashMap<String, PlayerId>,
    records: HashMap<PlayerId, PlayerRecord>,
    next_player_id: PlayerId,
}

#[derive(Debug)]
pub struct PlayerRegistry {
    inner: Mutex<Players>,
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Players {
                by_account: HashMap::new(),
                records: HashMap::new(),
                next_player_id: 1,
            }),
        }
    }

    /// Looks up or creates the account and marks it online
    pub fn login(&self, account: &str) -> PlayerRecord {
        let mut players = self.inner.lock();

        let next_id = players.next_player_id;
        let player_id = *players
            .by_account
            .entry(account.to_string())
            .or_insert(next_id);
        if player_id == next_id {
            players.next_player_id += 1;
            info!("Created player {} for account '{}'", player_id, account);
        }

        let record = players
            .records
            .entry(player_id)
            .or_insert_with(|| PlayerRecord {
                player_id,
                account: account.to_string(),
                online: false,
                room_id: None,
            });
        record.online = true;
        record.clone()
    }

    /// Marks the player offline and hands back the room they still occupy
    pub fn logout(&self, player_id: PlayerId) -> Option<RoomId> {
        let mut players = self.inner.lock();
        let record = players.records.get_mut(&player_id)?;
        record.online = false;
        record.room_id.take()
    }

    pub fn set_room(&self, player_id: PlayerId, room_id: Option<RoomId>) -> bool {
        match self.inner.lock().records.get_mut(&player_id) {
            Some(record) => {
                record.room_id = room_id;
                true
            }
            None => false,
        }
    }

    pub fn room_of(&self, player_id: PlayerId) -> Option<RoomId> {
        self.inner
            .lock()
            .records
            .get(&player_id)
            .and_then(|record| record.room_id)
    }

    pub fn get(&self, player_id: PlayerId) -> Option<PlayerRecord> {
        self.inner.lock().records.get(&player_id).cloned()
    }

    pub fn is_online(&self, player_id: PlayerId) -> bool {
        self.inner
            .lock()
            .records
            .get(&player_id)
            .map_or(false, |record| record.online)
    }

    pub fn online_count(&self) -> usize {
        self.inner
            .lock()
            .records
            .values()
            .filter(|record| record.online)
            .count()
    }
}
