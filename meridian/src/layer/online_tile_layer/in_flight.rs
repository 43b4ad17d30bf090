use std::collections::HashMap;

use meridian_types::TileCoordinate;
use tokio::task::AbortHandle;

/// Identifies one registration of a coordinate in the [`InFlightTable`].
///
/// A task only acts on its result if its generation is still registered, so a late completion
/// of a cancelled request can never touch a newer request for the same tile.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) struct Generation(u64);

struct InFlightEntry {
    generation: Generation,
    task: AbortHandle,
}

/// Tasks loading tiles, at most one per coordinate.
#[derive(Default)]
pub(super) struct InFlightTable {
    entries: HashMap<TileCoordinate, InFlightEntry, ahash::RandomState>,
    last_generation: u64,
}

impl InFlightTable {
    pub fn contains(&self, coordinate: &TileCoordinate) -> bool {
        self.entries.contains_key(coordinate)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn coordinates(&self) -> Vec<TileCoordinate> {
        let mut coordinates: Vec<_> = self.entries.keys().copied().collect();
        coordinates.sort_unstable();
        coordinates
    }

    /// Starts a task for the coordinate unless one is already registered.
    ///
    /// `spawn` receives the generation of the new entry and must return the handle of the
    /// spawned task. It is called with the table borrowed, so the task cannot observe the
    /// table before it is registered.
    pub fn try_start(
        &mut self,
        coordinate: TileCoordinate,
        spawn: impl FnOnce(Generation) -> AbortHandle,
    ) -> Option<Generation> {
        if self.contains(&coordinate) {
            return None;
        }

        self.last_generation += 1;
        let generation = Generation(self.last_generation);
        let task = spawn(generation);
        self.entries
            .insert(coordinate, InFlightEntry { generation, task });

        Some(generation)
    }

    /// Returns true if the entry of the coordinate still belongs to `generation`.
    pub fn is_current(&self, coordinate: TileCoordinate, generation: Generation) -> bool {
        matches!(self.entries.get(&coordinate), Some(entry) if entry.generation == generation)
    }

    /// Removes the entry if it still belongs to `generation`. Returns false if the request was
    /// cancelled in the meantime.
    pub fn finish(&mut self, coordinate: TileCoordinate, generation: Generation) -> bool {
        if !self.is_current(coordinate, generation) {
            return false;
        }

        self.entries.remove(&coordinate);
        true
    }

    /// Removes the entry and aborts its task. Returns false if nothing was in flight.
    pub fn cancel(&mut self, coordinate: TileCoordinate) -> bool {
        match self.entries.remove(&coordinate) {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    /// Aborts every registered task. Returns the number of cancelled requests.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            entry.task.abort();
        }

        count
    }
}
