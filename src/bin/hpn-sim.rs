use std::fs;

use anyhow::{Context, Result};
use hybrid_pn::config::SimulationConfig;
use hybrid_pn::engine::{Simulation, mean_final_marking, run_replicates};
use hybrid_pn::net::io::read_net;
use hybrid_pn::notify::LogObserver;
use hybrid_pn::options::Options;

fn main() -> Result<()> {
    if std::env::var("HPN_LOG").is_ok() {
        let e = env_logger::Env::new()
            .filter("HPN_LOG")
            .write_style("HPN_LOG_STYLE");
        env_logger::init_from_env(e);
    }

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let env_flags = std::env::var("HPN_FLAGS").unwrap_or_default();
    let options = match Options::parse_with_env(&env_flags, &args) {
        Ok(options) => options,
        Err(err) => match err.downcast::<clap::Error>() {
            Ok(clap_err) => clap_err.exit(),
            Err(err) => return Err(err),
        },
    };
    log::debug!("hpn-sim options: {:?}", options);

    let net = read_net(&options.model)
        .with_context(|| format!("Failed to load model: {:?}", options.model))?;
    net.log_diagnostics();

    let mut config = match &options.config {
        Some(path) => SimulationConfig::load_from_file(path)?,
        None => SimulationConfig::default(),
    };
    options.apply(&mut config);
    config.validate()?;

    let json = match options.replicates.filter(|n| *n > 1) {
        Some(count) => {
            if let Some(path) = &options.dot {
                net.write_dot(path, None)
                    .with_context(|| format!("Failed to write DOT file: {:?}", path))?;
            }
            let seeds = (0..count as u64)
                .map(|i| config.seed.wrapping_add(i))
                .collect::<Vec<_>>();
            let summaries = run_replicates(&net, &config, &seeds)?;
            serde_json::to_string_pretty(&serde_json::json!({
                "replicates": summaries,
                "mean_final_marking": mean_final_marking(&summaries),
            }))?
        }
        None => {
            let mut simulation = Simulation::new(net, config)?;
            simulation.subscribe(LogObserver::default());
            let summary = simulation.run();
            log::info!(
                "finished after {} steps at t={} ({:?})",
                summary.steps,
                summary.final_time,
                summary.status
            );
            if let Some(path) = &options.dot {
                simulation
                    .net()
                    .write_dot(path, Some(simulation.marking()))
                    .with_context(|| format!("Failed to write DOT file: {:?}", path))?;
            }
            serde_json::to_string_pretty(&summary)?
        }
    };

    match &options.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write summary: {:?}", path))?
        }
        None => println!("{}", json),
    }
    Ok(())
}
