//! State assembly
//!
//! Gathers every manager's context and the session history into a state.
//! Work happens on a staged copy that replaces the caller's state only once
//! everything succeeded.

use std::collections::HashSet;

use sdk::errors::{EngineError, Phase};
use sdk::state::State;
use sdk::types::Fragment;
use tracing::debug;

use super::Engine;

impl Engine {
    /// Collect manager context and history into `state`
    ///
    /// Managers are asked for context in registration order; a later manager's
    /// value for a key replaces an earlier one. History lists are replaced, not
    /// extended, so assembling the same state twice yields the same result.
    ///
    /// On error `state` is left exactly as it was.
    pub async fn update_state(&self, state: &mut State) -> Result<(), EngineError> {
        let mut staged = state.clone();

        for manager in self.managers() {
            let data = manager
                .context(&staged)
                .await
                .map_err(|e| EngineError::manager_failed(manager.id(), Phase::Context, e))?;
            staged.add_manager_data(data);
        }

        let session_id = staged.input.session_id;
        let history = self.history();

        let recent = if history.recent_limit > 0 {
            self.interactions
                .get_by_session(session_id, history.recent_limit)
                .await?
        } else {
            Vec::new()
        };

        let similar = match &staged.input.embedding {
            Some(embedding) if history.relevant_limit > 0 => {
                self.interactions
                    .search_similar(embedding, session_id, history.relevant_limit)
                    .await?
            }
            _ => Vec::new(),
        };

        let actor = self.resolve_actor(staged.input.actor_id).await?;

        debug!(
            session = %session_id,
            recent = recent.len(),
            similar = similar.len(),
            "Assembled history"
        );

        staged.relevant_interactions = merge_relevant(similar, &recent);
        staged.recent_interactions = recent;
        staged.actor = Some(actor);

        *state = staged;
        Ok(())
    }
}

/// Similar fragments first, then recent ones not already present
///
/// Ids are unique in the result; a fragment in both lists keeps its
/// similarity position.
pub(crate) fn merge_relevant(similar: Vec<Fragment>, recent: &[Fragment]) -> Vec<Fragment> {
    let mut seen = HashSet::with_capacity(similar.len() + recent.len());
    let mut merged = Vec::with_capacity(similar.len() + recent.len());

    for fragment in similar.into_iter().chain(recent.iter().cloned()) {
        if seen.insert(fragment.id) {
            merged.push(fragment);
        }
    }
    merged
}
