// Periodic Simulation Driver

use std::collections::BTreeMap;

use log::{info, warn};

use crate::cg_config::SimConfig;
use crate::cg_interface::{BlockId, NodeId, Protocol, SimulationEvent, Step, Tick};
use crate::cg_simulation::{SimError, Simulation};
use crate::cg_stats::{MinerFilter, MonthlySeries, SimCounters};

// ============================================================================
// Periodic Trigger
// ============================================================================

/// Fires every `period` ticks until cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicTrigger {
    period: Tick,
    next_due: Tick,
    cancelled: bool,
}

impl PeriodicTrigger {
    /// First firing at tick `period`
    pub fn every(period: Tick) -> Self {
        let period = period.max(1);
        Self {
            period,
            next_due: period,
            cancelled: false,
        }
    }

    /// Whether the trigger fires at `now`. Missed firings collapse into one.
    pub fn poll(&mut self, now: Tick) -> bool {
        if self.cancelled || now < self.next_due {
            return false;
        }
        while self.next_due <= now {
            self.next_due += self.period;
        }
        true
    }

    /// Stop firing, including a firing already due
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn period(&self) -> Tick {
        self.period
    }

    pub fn next_due(&self) -> Tick {
        self.next_due
    }
}

// ============================================================================
// Run Result
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub seed_used: [u8; 32],
    pub protocol: Protocol,
    pub ticks: Tick,
    pub steps: Step,
    pub counters: SimCounters,
    pub final_nodes: usize,
    pub final_miners: usize,
    /// Events still queued when the run stopped
    pub pending_events: usize,
    /// Head block of each node that has one, by node id
    pub heads: BTreeMap<NodeId, BlockId>,
    pub miner_counts: MonthlySeries,
    pub mean_money: MonthlySeries,
}

impl RunResult {
    /// Share of nodes with a head that agree on the most common one
    pub fn head_agreement(&self) -> f64 {
        if self.heads.is_empty() {
            return 0.0;
        }
        let mut votes: BTreeMap<BlockId, usize> = BTreeMap::new();
        for head in self.heads.values() {
            *votes.entry(*head).or_insert(0) += 1;
        }
        let best = votes.values().copied().max().unwrap_or(0);
        best as f64 / self.heads.len() as f64
    }

    pub fn log_summary(&self) {
        info!(
            "run finished: {} ticks, {} steps, protocol {:?}",
            self.ticks, self.steps, self.protocol
        );
        info!(
            "  blocks mined {}, adoptions {}, hops sent {} (suppressed {}, dropped {})",
            self.counters.blocks_mined,
            self.counters.adoptions,
            self.counters.hops_sent,
            self.counters.hops_suppressed,
            self.counters.hops_dropped
        );
        info!(
            "  miners: {} at the end, {} died, {} joined",
            self.final_miners, self.counters.miners_died, self.counters.miners_joined
        );
        info!(
            "  head agreement {:.1}% over {} nodes",
            self.head_agreement() * 100.0,
            self.heads.len()
        );
    }
}

// ============================================================================
// Simulation Runner
// ============================================================================

/// Drives a [Simulation] from periodic triggers: mining, chain updates,
/// payments, miner growth and monthly chart sampling.
pub struct SimRunner {
    sim: Simulation,
    tick: Tick,
    blocks: PeriodicTrigger,
    updates: PeriodicTrigger,
    payments: PeriodicTrigger,
    months: PeriodicTrigger,
    growth: Option<PeriodicTrigger>,
    chart_filter: MinerFilter,
    miner_counts: MonthlySeries,
    mean_money: MonthlySeries,
}

impl SimRunner {
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        Ok(Self::from_simulation(Simulation::new(config)?))
    }

    pub fn from_simulation(sim: Simulation) -> Self {
        let schedule = sim.config().schedule.clone();
        let growth = sim
            .config()
            .growth
            .period(schedule.ticks_per_month)
            .map(PeriodicTrigger::every);

        Self {
            blocks: PeriodicTrigger::every(schedule.block_interval),
            updates: PeriodicTrigger::every(schedule.update_interval),
            payments: PeriodicTrigger::every(schedule.payment_interval),
            months: PeriodicTrigger::every(schedule.ticks_per_month),
            growth,
            tick: 0,
            chart_filter: MinerFilter::MinersOnly,
            miner_counts: MonthlySeries::default(),
            mean_money: MonthlySeries::default(),
            sim,
        }
    }

    pub fn sim(&self) -> &Simulation {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut Simulation {
        &mut self.sim
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Which nodes the monthly charts count as miners
    pub fn set_chart_filter(&mut self, filter: MinerFilter) {
        self.chart_filter = filter;
    }

    pub fn is_growing(&self) -> bool {
        self.growth.as_ref().map_or(false, |g| !g.is_cancelled())
    }

    /// Cancel the growth trigger; a pending firing never happens
    pub fn stop_growth(&mut self) {
        if let Some(growth) = self.growth.as_mut() {
            growth.cancel();
            info!("miner growth stopped at tick {}", self.tick);
        }
    }

    /// Run the whole configured schedule
    pub fn run(mut self) -> Result<RunResult, SimError> {
        self.start()?;
        let ticks = self.sim.config().schedule.ticks;
        while self.tick < ticks {
            self.advance()?;
        }
        Ok(self.finish())
    }

    /// Build the graph and take the month 0 sample
    pub fn start(&mut self) -> Result<(), SimError> {
        self.sim.submit(SimulationEvent::Initialization);
        self.drain()?;
        self.sample_month(0);
        Ok(())
    }

    /// Move one tick forward
    pub fn advance(&mut self) -> Result<(), SimError> {
        self.tick += 1;
        let now = self.tick;

        if self.blocks.poll(now) {
            self.sim.submit(SimulationEvent::BlockMined);
        }
        if self.updates.poll(now) {
            self.sim.submit(SimulationEvent::BlockchainUpdate);
        }
        self.drain()?;

        if self.payments.poll(now) {
            self.sim.settle_payments();
        }
        if self.growth.as_mut().map_or(false, |g| g.poll(now)) {
            if let Err(err) = self.sim.add_random_miner() {
                warn!("tick {now}: no miner added: {err}");
            }
        }
        if self.months.poll(now) {
            let month = now / self.months.period();
            self.sample_month(month);
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<usize, SimError> {
        let limit = self.sim.config().gossip.max_events_per_tick;
        self.sim.run_until_idle(limit)
    }

    fn sample_month(&mut self, month: u64) {
        self.miner_counts
            .record(month, self.sim.collect_amount_data(self.chart_filter));
        self.mean_money
            .record(month, self.sim.collect_mean_money(self.chart_filter));
    }

    pub fn miner_counts(&self) -> &MonthlySeries {
        &self.miner_counts
    }

    pub fn mean_money(&self) -> &MonthlySeries {
        &self.mean_money
    }

    pub fn finish(self) -> RunResult {
        let protocol = self.sim.protocol();
        let graph = self.sim.graph();
        let heads = graph
            .nodes()
            .filter_map(|node| node.last_id(protocol).map(|head| (node.id(), head)))
            .collect();

        RunResult {
            seed_used: self.sim.seed(),
            protocol,
            ticks: self.tick,
            steps: self.sim.current_step(),
            counters: self.sim.counters().clone(),
            final_nodes: graph.len(),
            final_miners: graph.miners().count(),
            pending_events: self.sim.pending(),
            heads,
            miner_counts: self.miner_counts,
            mean_money: self.mean_money,
        }
    }
}
