//! Periodic maintenance of the neighbor tables.
//!
//! Five long-lived tasks cooperate to keep the topology convergent under
//! churn: refresh of the successor and predecessor lists, discovery of
//! closer predecessors, refresh of populated finger slots, and discovery of
//! nodes for empty finger slots. Every task sleeps a jittered interval
//! between rounds, polls the stop flag at each boundary, and treats any
//! single failure as log-and-continue. None of them writes a table
//! directly: they only open connections, and the lifecycle callbacks do the
//! inserting.

use std::cmp::Ordering;
use std::sync::Arc;

use futures_timer::Delay;

use super::chord::Chord;
use crate::dht::id::next_id;
use crate::dht::neighbor::NeighborList;
use crate::error::Result;
use crate::utils::rand_duration;

impl Chord {
    /// Launch the five maintenance tasks. Called once by the join hook.
    pub(crate) fn start_stabilization(self: &Arc<Self>) {
        tracing::info!("{} starts stabilization", self.local.id);

        let chord = self.clone();
        tokio::spawn(async move { chord.update_successors().await });
        let chord = self.clone();
        tokio::spawn(async move { chord.update_predecessors().await });
        let chord = self.clone();
        tokio::spawn(async move { chord.find_new_predecessors().await });
        let chord = self.clone();
        tokio::spawn(async move { chord.update_finger().await });
        let chord = self.clone();
        tokio::spawn(async move { chord.find_new_finger().await });
    }

    /// Refresh a neighbor list from the tables of its closest live entry.
    /// New nodes are connected to, never inserted directly; the ready
    /// callback does the insertion.
    async fn update_neighbor_list(&self, list: &Arc<NeighborList>) -> Result<()> {
        let Some(first) = list.first_live() else {
            return Ok(());
        };

        let want = list.cap() as u32;
        let (successors, predecessors) = self.get_succ_and_pred(&first, want, want).await?;

        for candidate in successors.iter().chain(predecessors.iter()) {
            if candidate.id == self.local.id {
                continue;
            }
            if !list.is_id_in_range(&candidate.id) || list.exists(&candidate.id) {
                continue;
            }
            if self.neighbors.exists(&candidate.id) {
                // Already connected; table membership is settled elsewhere.
                continue;
            }
            if let Err(err) = self
                .transport
                .connect(&candidate.addr, Some(candidate.id.clone()))
                .await
            {
                tracing::error!("connect to {} error: {}", candidate.id, err);
            }
        }

        Ok(())
    }

    async fn update_successors(self: Arc<Self>) {
        loop {
            if self.is_stopped() {
                return;
            }
            Delay::new(rand_duration(self.base_stabilize_interval)).await;
            if let Err(err) = self.update_neighbor_list(&self.successors).await {
                tracing::error!("update successors error: {}", err);
            }
        }
    }

    async fn update_predecessors(self: Arc<Self>) {
        loop {
            if self.is_stopped() {
                return;
            }
            Delay::new(rand_duration(self.base_stabilize_interval) * 3).await;
            if let Err(err) = self.update_neighbor_list(&self.predecessors).await {
                tracing::error!("update predecessors error: {}", err);
            }
        }
    }

    /// Probe for a predecessor strictly closer than the current first one.
    async fn find_new_predecessors(self: Arc<Self>) {
        loop {
            if self.is_stopped() {
                return;
            }
            Delay::new(rand_duration(self.base_stabilize_interval) * 3).await;

            let key = self.predecessors.start_id();
            let candidates = match self.find_predecessors(&key, 1).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    tracing::error!("find predecessors error: {}", err);
                    continue;
                }
            };

            for candidate in candidates {
                if !self.predecessors.is_id_in_range(&candidate.id)
                    || self.predecessors.exists(&candidate.id)
                {
                    continue;
                }
                let closer = match self.predecessors.get_first() {
                    None => true,
                    Some(first) => {
                        self.predecessors.cmp(&candidate.id, first.id()) == Ordering::Less
                    }
                };
                if closer {
                    if let Err(err) = self
                        .transport
                        .connect(&candidate.addr, Some(candidate.id.clone()))
                        .await
                    {
                        tracing::error!("connect to new predecessor error: {}", err);
                    }
                }
            }
        }
    }

    /// Walk the populated finger slots and refresh each in turn.
    async fn update_finger(self: Arc<Self>) {
        loop {
            for finger in &self.finger_table {
                if finger.is_empty() {
                    continue;
                }
                if self.is_stopped() {
                    return;
                }
                Delay::new(rand_duration(self.base_stabilize_interval)).await;
                if let Err(err) = self.update_neighbor_list(finger).await {
                    tracing::error!("update finger table error: {}", err);
                }
            }

            // An all-empty table would otherwise spin through the walk.
            if self.is_stopped() {
                return;
            }
            Delay::new(rand_duration(self.base_stabilize_interval)).await;
        }
    }

    /// Probe each finger slot for a node to fill it with. A single probe may
    /// satisfy several consecutive slots: the scan advances until the arc
    /// owning the found id comes up, then moves past it.
    async fn find_new_finger(self: Arc<Self>) {
        loop {
            let mut i = 0;
            while i < self.finger_table.len() {
                if self.is_stopped() {
                    return;
                }
                Delay::new(rand_duration(self.base_stabilize_interval)).await;

                // The first identifier actually covered by slot i.
                let key = next_id(&self.finger_table[i].start_id());
                let found = match self.find_successors(&key, 1).await {
                    Ok(succs) => succs.into_iter().next(),
                    Err(err) => {
                        tracing::error!("find successor for finger table error: {}", err);
                        i += 1;
                        continue;
                    }
                };
                let Some(found) = found else {
                    i += 1;
                    continue;
                };

                while i < self.finger_table.len() {
                    let slot = &self.finger_table[i];
                    if slot.is_id_in_range(&found.id) && !slot.exists(&found.id) {
                        let closer = match slot.get_first() {
                            None => true,
                            Some(first) => slot.cmp(&found.id, first.id()) == Ordering::Less,
                        };
                        if closer {
                            if let Err(err) = self
                                .transport
                                .connect(&found.addr, Some(found.id.clone()))
                                .await
                            {
                                tracing::error!("connect to new finger error: {}", err);
                            }
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
        }
    }
}
