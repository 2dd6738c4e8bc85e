use std::error::Error;

use log::info;
use rand::Rng;
use simple_logger::SimpleLogger;

use cg_rust::{Protocol, SimConfig, SimRunner};

fn main() -> Result<(), Box<dyn Error>> {
    SimpleLogger::new().init()?;

    info!("starting");

    let mut seed = [0u8; 32];
    rand::thread_rng().fill(&mut seed);

    // same network under both fork-choice rules
    for protocol in [Protocol::LongestChain, Protocol::Ghost] {
        let mut config = SimConfig {
            seed: Some(seed),
            protocol,
            ..SimConfig::default()
        };
        config.growth.enabled = true;

        let result = SimRunner::new(config)?.run()?;
        result.log_summary();
    }

    info!("let seed = {:?};", seed);
    Ok(())
}
