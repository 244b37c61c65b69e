//! Explicit bidirectional association between model ids and player handles.
//!
//! Binding one side clears any prior partner on *both* sides, so the table
//! is always a partial one-to-one mapping.

use std::{collections::HashMap, hash::Hash};

#[derive(Debug)]
pub struct BindingTable<M, P> {
    forward: HashMap<M, P>,
    reverse: HashMap<P, M>,
}

impl<M, P> BindingTable<M, P>
where
    M: Eq + Hash + Clone,
    P: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Associate `model` with `player`, dissolving any binding either side
    /// previously had.
    pub fn bind(&mut self, model: M, player: P) {
        self.unbind_model(&model);
        self.unbind_player(&player);
        self.forward.insert(model.clone(), player.clone());
        self.reverse.insert(player, model);
    }

    pub fn unbind_model(&mut self, model: &M) {
        if let Some(player) = self.forward.remove(model) {
            self.reverse.remove(&player);
        }
    }

    pub fn unbind_player(&mut self, player: &P) {
        if let Some(model) = self.reverse.remove(player) {
            self.forward.remove(&model);
        }
    }

    pub fn player_of(&self, model: &M) -> Option<&P> {
        self.forward.get(model)
    }

    pub fn model_of(&self, player: &P) -> Option<&M> {
        self.reverse.get(player)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

impl<M, P> Default for BindingTable<M, P>
where
    M: Eq + Hash + Clone,
    P: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
