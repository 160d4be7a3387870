//! Per-signature replay cursors for one loaded cassette.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::format::Interaction;
use super::matcher::Signature;
use crate::error::{VcrError, VcrResult};

/// Recorded interactions for one signature plus how many were handed out.
#[derive(Debug, Default)]
struct Queue {
    ordinals: Vec<usize>,
    cursor: usize,
}

#[derive(Debug, Default)]
struct IndexState {
    interactions: Vec<Arc<Interaction>>,
    consumed: Vec<bool>,
    queues: HashMap<Signature, Queue>,
}

impl IndexState {
    fn register(&mut self, interaction: Arc<Interaction>, consumed: bool) {
        let ordinal = self.interactions.len();
        let signature = Signature::of_interaction(&interaction);
        let queue = self.queues.entry(signature).or_default();
        queue.ordinals.push(ordinal);
        if consumed {
            queue.cursor = queue.ordinals.len();
        }
        self.interactions.push(interaction);
        self.consumed.push(consumed);
    }
}

/// Hands out recorded interactions per signature, in recorded order, at
/// most once each.
///
/// All cursors live behind one lock, so concurrent invocations of the same
/// command never receive the same interaction.
#[derive(Debug, Default)]
pub struct SessionIndex {
    state: Mutex<IndexState>,
}

impl SessionIndex {
    /// Builds an index over the interactions of a loaded cassette.
    #[must_use]
    pub fn new(interactions: &[Arc<Interaction>]) -> Self {
        let mut state = IndexState::default();
        for interaction in interactions {
            state.register(Arc::clone(interaction), false);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Returns the next unconsumed interaction recorded under `signature`.
    ///
    /// # Errors
    ///
    /// Returns [`VcrError::NoMatchingInteraction`] when the signature was
    /// never recorded or every recorded occurrence has been replayed.
    pub fn next(
        &self,
        signature: &Signature,
        attempted: &[String],
    ) -> VcrResult<Arc<Interaction>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let next_ordinal = state.queues.get_mut(signature).and_then(|queue| {
            let ordinal = queue.ordinals.get(queue.cursor).copied()?;
            queue.cursor += 1;
            Some(ordinal)
        });

        match next_ordinal {
            Some(ordinal) => {
                state.consumed[ordinal] = true;
                Ok(Arc::clone(&state.interactions[ordinal]))
            }
            None => Err(VcrError::NoMatchingInteraction {
                attempted: attempted.to_vec(),
                unused: unused_args(&state),
            }),
        }
    }

    /// Registers an interaction recorded during this session as consumed.
    pub fn push_consumed(&self, interaction: Arc<Interaction>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.register(interaction, true);
    }

    /// Interactions not handed out yet, in recorded order.
    #[must_use]
    pub fn unused(&self) -> Vec<Arc<Interaction>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .interactions
            .iter()
            .zip(&state.consumed)
            .filter(|(_, consumed)| !**consumed)
            .map(|(interaction, _)| Arc::clone(interaction))
            .collect()
    }

    /// How many more times `signature` can be replayed.
    #[must_use]
    pub fn remaining(&self, signature: &Signature) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .queues
            .get(signature)
            .map_or(0, |queue| queue.ordinals.len() - queue.cursor)
    }
}

fn unused_args(state: &IndexState) -> Vec<Vec<String>> {
    state
        .interactions
        .iter()
        .zip(&state.consumed)
        .filter(|(_, consumed)| !**consumed)
        .map(|(interaction, _)| interaction.args.clone())
        .collect()
}
