use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::command::Response;

/// Client-chosen identifier making retries of a command idempotent.
///
/// Ids order by wall time first, so the cache can drop old ones in bulk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientCmdId {
    /// Client wall time when the command was first issued.
    pub wall_time: i64,
    /// Random component.
    pub random: i64,
}

impl ClientCmdId {
    /// Builds an identifier.
    pub fn new(wall_time: i64, random: i64) -> Self {
        Self { wall_time, random }
    }

    /// The zero identifier marks commands that opted out of replay protection.
    pub fn is_empty(&self) -> bool {
        self.wall_time == 0 && self.random == 0
    }
}

/// Responses of successful read-write commands by client command id.
#[derive(Debug, Default)]
pub struct ResponseCache {
    responses: BTreeMap<ClientCmdId, Response>,
}

impl ResponseCache {
    /// The response previously produced for `id`.
    pub fn get(&self, id: &ClientCmdId) -> Option<Response> {
        if id.is_empty() {
            return None;
        }
        self.responses.get(id).cloned()
    }

    /// Remembers `resp` as the outcome of `id`.
    pub fn put(&mut self, id: ClientCmdId, resp: &Response) {
        if !id.is_empty() {
            self.responses.insert(id, resp.clone());
        }
    }

    /// Forgets every response whose id was issued before `min_wall_time` and
    /// returns how many were dropped.
    pub fn gc(&mut self, min_wall_time: i64) -> usize {
        match self.responses.first_key_value() {
            Some((oldest, _)) if oldest.wall_time < min_wall_time => {}
            _ => return 0,
        }
        let kept = self.responses.split_off(&ClientCmdId::new(min_wall_time, i64::MIN));
        std::mem::replace(&mut self.responses, kept).len()
    }

    /// Number of cached responses.
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// True if no response is cached.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}
