//! Remote participant counting.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::client::MeetingClient;

/// Best-effort count of remote participants.
///
/// A failed probe returns the last good observation so one flaky query
/// cannot flip the session between recording and paused.
pub struct ParticipantMonitor {
    client: Arc<dyn MeetingClient>,
    local_tile_ids: HashSet<String>,
    last_count: Option<usize>,
}

impl ParticipantMonitor {
    pub fn new(client: Arc<dyn MeetingClient>, local_tile_ids: &[String]) -> Self {
        Self {
            client,
            local_tile_ids: local_tile_ids.iter().cloned().collect(),
            last_count: None,
        }
    }

    pub async fn count(&mut self) -> usize {
        match self.client.visible_tiles().await {
            Ok(tiles) => {
                let remote = tiles
                    .iter()
                    .filter(|tile| !tile.local && !self.local_tile_ids.contains(&tile.id))
                    .count();
                if self.last_count != Some(remote) {
                    debug!("Remote participants: {} ({} tiles visible)", remote, tiles.len());
                }
                self.last_count = Some(remote);
                remote
            }
            Err(e) => {
                let fallback = self.last_count.unwrap_or(0);
                warn!(
                    "Participant probe failed, keeping last count {}: {:#}",
                    fallback, e
                );
                fallback
            }
        }
    }

    pub fn last_count(&self) -> Option<usize> {
        self.last_count
    }
}
