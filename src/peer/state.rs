use crate::peer::negotiation::NegotiationEngine;
use crate::peer::types::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct Slot {
    engine: Arc<NegotiationEngine>,
    started: bool,
}

/// Live negotiation sessions keyed by id. Everything asynchronous that comes
/// back from a peer connection is checked against this before it touches
/// state, so invalidating an id is the whole cancellation story.
#[derive(Default)]
pub struct SessionArena {
    slots: HashMap<SessionId, Slot>,
    current: Option<SessionId>,
}

impl SessionArena {
    /// Makes `engine` current. The previous current engine, if any, is
    /// invalidated and returned so the caller can close it.
    pub fn install(&mut self, engine: Arc<NegotiationEngine>) -> Option<Arc<NegotiationEngine>> {
        let previous = self.invalidate_current();
        let id = engine.id().clone();
        self.slots.insert(
            id.clone(),
            Slot {
                engine,
                started: false,
            },
        );
        self.current = Some(id);
        previous
    }

    pub fn invalidate_current(&mut self) -> Option<Arc<NegotiationEngine>> {
        let id = self.current.take()?;
        debug!("Invalidating negotiation session {}", id);
        self.slots.remove(&id).map(|slot| slot.engine)
    }

    pub fn is_current(&self, id: &SessionId) -> bool {
        self.current.as_ref() == Some(id)
    }

    pub fn current(&self) -> Option<Arc<NegotiationEngine>> {
        let id = self.current.as_ref()?;
        self.slots.get(id).map(|slot| slot.engine.clone())
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<NegotiationEngine>> {
        self.slots.get(id).map(|slot| slot.engine.clone())
    }

    /// Flags the current session as started. False if it already was.
    pub fn mark_started(&mut self) -> bool {
        let Some(id) = self.current.as_ref() else {
            return false;
        };
        match self.slots.get_mut(id) {
            Some(slot) if !slot.started => {
                slot.started = true;
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
