// Event sink that renders simulation events through the log facade

use cg_rust::cg_interface::{Event, EventSink, Step};
use log::{debug, trace};

/// Per-kind tallies, printed with the scenario summary
#[derive(Debug, Default)]
pub struct EventTypeCounts {
    pub mined: usize,
    pub adopted: usize,
    pub suppressed: usize,
    pub dropped: usize,
    pub died: usize,
    pub joined: usize,
    pub empty: usize,
}

#[derive(Default)]
pub struct LoggingEventSink {
    pub counts: EventTypeCounts,
}

impl EventSink for LoggingEventSink {
    fn log(&mut self, step: Step, event: Event) {
        match event {
            Event::BlockMined {
                block_id,
                miner,
                parent,
            } => {
                self.counts.mined += 1;
                debug!("[{step}] MINED block {block_id} by {miner} on {parent}");
            }
            Event::BlockAdopted {
                block_id,
                node,
                from,
            } => {
                self.counts.adopted += 1;
                trace!("[{step}] ADOPT {node} <- {from}: block {block_id}");
            }
            Event::HopSuppressed { sender, receiver } => {
                self.counts.suppressed += 1;
                trace!("[{step}] SUPPRESS {sender} -> {receiver}");
            }
            Event::HopDropped { hop, reason } => {
                self.counts.dropped += 1;
                debug!(
                    "[{step}] DROP {} -> {} ({reason:?})",
                    hop.sender, hop.receiver
                );
            }
            Event::MinerDied { node, money } => {
                self.counts.died += 1;
                debug!("[{step}] DIED miner {node} with {money} left");
            }
            Event::MinerJoined { node, anchor } => {
                self.counts.joined += 1;
                debug!("[{step}] JOINED miner {node} via {anchor}");
            }
            Event::EmptyPopulation { population } => {
                self.counts.empty += 1;
                debug!("[{step}] EMPTY {population:?}");
            }
        }
    }
}
