//! Parsing Options.
//! `hpn-sim MODEL [-c config.toml] [-n steps] [-s seed] [--dt dt] [-t end] [-p policy]`.
//! Flags from `HPN_FLAGS` are read first; command-line flags override them.

use anyhow::{Context, Result, anyhow};
use clap::{Arg, Command, value_parser};

use crate::config::{PolicyName, SimulationConfig};

fn make_options_parser() -> clap::Command {
    Command::new("hpn-sim")
        .no_binary_name(true)
        .version(env!("CARGO_PKG_VERSION"))
        .about("Steps a hybrid Petri net and prints the run summary as JSON")
        .args_override_self(true)
        .arg(
            Arg::new("model")
                .value_name("MODEL")
                .required(true)
                .help("Net document (.json, .ron, .yaml)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML simulation config; defaults apply when missing"),
        )
        .arg(
            Arg::new("steps")
                .short('n')
                .long("steps")
                .value_parser(value_parser!(u64))
                .help("Maximum number of steps"),
        )
        .arg(
            Arg::new("seed")
                .short('s')
                .long("seed")
                .value_parser(value_parser!(u64)),
        )
        .arg(Arg::new("dt").long("dt").value_parser(value_parser!(f64)))
        .arg(
            Arg::new("end-time")
                .short('t')
                .long("end-time")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("policy")
                .short('p')
                .long("policy")
                .value_parser(["identifier", "priority"])
                .help("Conflict tie-break order"),
        )
        .arg(
            Arg::new("replicates")
                .short('r')
                .long("replicates")
                .value_parser(value_parser!(usize))
                .help("Run this many seeds (seed, seed+1, ...) in parallel"),
        )
        .arg(
            Arg::new("dot")
                .long("dot")
                .value_name("FILE")
                .help("Write the net with its final marking as Graphviz DOT"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the JSON summary here instead of stdout"),
        )
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    pub model: String,
    pub config: Option<String>,
    pub steps: Option<u64>,
    pub seed: Option<u64>,
    pub dt: Option<f64>,
    pub end_time: Option<f64>,
    pub policy: Option<PolicyName>,
    pub replicates: Option<usize>,
    pub dot: Option<String>,
    pub output: Option<String>,
}

impl Options {
    pub fn parse_from_str(s: &str) -> Result<Self> {
        let flags = shellwords::split(s).context("Failed to split flag string")?;
        Self::parse_from_args(&flags)
    }

    /// `env_flags` (typically `HPN_FLAGS`) come first so that `args` win.
    pub fn parse_with_env(env_flags: &str, args: &[String]) -> Result<Self> {
        let mut flags = shellwords::split(env_flags).context("Failed to split HPN_FLAGS")?;
        flags.extend(args.iter().cloned());
        Self::parse_from_args(&flags)
    }

    pub fn parse_from_args(flags: &[String]) -> Result<Self> {
        let app = make_options_parser();
        let matches = app.try_get_matches_from(flags.iter())?;

        let policy = match matches.get_one::<String>("policy").map(String::as_str) {
            Some("identifier") => Some(PolicyName::Identifier),
            Some("priority") => Some(PolicyName::Priority),
            Some(other) => return Err(anyhow!("unsupported conflict policy `{}`", other)),
            None => None,
        };
        let model = matches
            .get_one::<String>("model")
            .cloned()
            .ok_or_else(|| anyhow!("missing model path"))?;

        Ok(Options {
            model,
            config: matches.get_one::<String>("config").cloned(),
            steps: matches.get_one::<u64>("steps").copied(),
            seed: matches.get_one::<u64>("seed").copied(),
            dt: matches.get_one::<f64>("dt").copied(),
            end_time: matches.get_one::<f64>("end-time").copied(),
            policy,
            replicates: matches.get_one::<usize>("replicates").copied(),
            dot: matches.get_one::<String>("dot").cloned(),
            output: matches.get_one::<String>("output").cloned(),
        })
    }

    /// Command-line values take precedence over the config file.
    pub fn apply(&self, config: &mut SimulationConfig) {
        if let Some(steps) = self.steps {
            config.max_steps = Some(steps);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(dt) = self.dt {
            config.dt = dt;
        }
        if let Some(end_time) = self.end_time {
            config.end_time = Some(end_time);
        }
        if let Some(policy) = self.policy {
            config.conflict_policy = policy;
        }
    }
}
