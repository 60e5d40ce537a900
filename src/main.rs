use clap::Parser;
use rotalign::config::parse_translation_weights;
use rotalign::logging::{self, SearchSpan};
use rotalign::minc::MincToolkit;
use rotalign::*;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "rotalign")]
#[command(about = "Rotational registration search: runs minctracc from a grid of starting rotations and keeps the best")]
#[command(version)]
struct Cli {
    /// Source volume (moved onto the target)
    #[arg(value_name = "source.mnc", required_unless_present = "dump_config")]
    source: Option<PathBuf>,

    /// Target volume
    #[arg(value_name = "target.mnc", required_unless_present = "dump_config")]
    target: Option<PathBuf>,

    /// Output transform
    #[arg(value_name = "output.xfm", required_unless_present = "dump_config")]
    output_xfm: Option<PathBuf>,

    /// Output source volume resampled onto the target
    #[arg(value_name = "output.mnc", required_unless_present = "dump_config")]
    output_mnc: Option<PathBuf>,

    /// Target mask used for the optimizer and for computing xcorr
    #[arg(short, long)]
    mask: Option<PathBuf>,

    /// Source mask handed to the optimizer
    #[arg(long)]
    source_mask: Option<PathBuf>,

    /// Resample volumes to this stepsize before searching (0 disables)
    #[arg(short = 's', long = "stepsize-resample")]
    resample_step: Option<f64>,

    /// Stepsize used in the minctracc registration
    #[arg(short = 'g', long = "stepsize-registration")]
    registration_step: Option<f64>,

    /// Temporary directory to use
    #[arg(short, long)]
    tmpdir: Option<PathBuf>,

    /// Range of rotations (degrees) to search across
    #[arg(short, long)]
    range: Option<f64>,

    /// Interval (degrees) to search across the range
    #[arg(short, long)]
    interval: Option<f64>,

    /// Comma separated optimization weights of the x, y, z translations
    #[arg(short, long)]
    wtranslations: Option<String>,

    /// Simplex radius for minctracc
    #[arg(long)]
    simplex: Option<f64>,

    /// Also seed from distance-transform and blurred-image peaks
    #[arg(long, overrides_with = "no_multi_seed")]
    multi_seed: bool,

    /// Seed from the centres of gravity only
    #[arg(long)]
    no_multi_seed: bool,

    /// Maximum number of seed pairs to run the rotation search from
    #[arg(long)]
    max_seeds: Option<usize>,

    /// Allow a uniform scale in addition to the rigid parameters (lsq7)
    #[arg(long)]
    uniform_scale: bool,

    /// Worker threads for evaluating grid points
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Configuration file (TOML or JSON); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write a JSON summary of the run
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    dump_config: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        let search = &mut config.search;
        if let Some(step) = self.resample_step {
            search.resample_step = (step > 0.0).then_some(step);
        }
        if let Some(step) = self.registration_step {
            search.registration_step = step;
        }
        if let Some(ref tmpdir) = self.tmpdir {
            search.tmpdir = Some(tmpdir.clone());
        }
        if let Some(range) = self.range {
            search.angle_range = range;
        }
        if let Some(interval) = self.interval {
            search.angle_interval = interval;
        }
        if let Some(ref weights) = self.wtranslations {
            search.translation_weights = parse_translation_weights(weights)?;
        }
        if let Some(simplex) = self.simplex {
            search.simplex_radius = simplex;
        }
        if self.multi_seed {
            search.multi_seed = true;
        }
        if self.no_multi_seed {
            search.multi_seed = false;
        }
        if let Some(max_seeds) = self.max_seeds {
            search.max_seeds = max_seeds;
        }
        if self.uniform_scale {
            search.mode = AlignmentMode::RigidUniformScale;
        }
        if let Some(jobs) = self.jobs {
            search.jobs = jobs;
        }
        config.logging = config.logging.clone().with_verbosity(self.verbose);
        Ok(())
    }

    fn request(&self) -> anyhow::Result<SearchRequest> {
        let required = |value: &Option<PathBuf>, name: &str| {
            value
                .clone()
                .ok_or_else(|| anyhow::anyhow!("missing required argument {}", name))
        };
        Ok(SearchRequest {
            source: required(&self.source, "source.mnc")?,
            target: required(&self.target, "target.mnc")?,
            source_mask: self.source_mask.clone(),
            target_mask: self.mask.clone(),
            output_transform: required(&self.output_xfm, "output.xfm")?,
            output_volume: required(&self.output_mnc, "output.mnc")?,
        })
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let align_error = e.downcast_ref::<AlignError>();
            let code = align_error.map_or(1, AlignError::exit_code);
            if align_error.is_some_and(AlignError::is_cancelled) {
                eprintln!("terminated: cancelled by signal, temporary files removed");
            } else {
                eprintln!("ERROR: {:#}", e);
            }
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match cli.config {
        Some(ref path) => Config::load_from_file(path)?,
        None => Config::default(),
    };
    cli.apply(&mut config)?;

    if cli.dump_config {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }
    config.ensure_valid()?;

    let _log_guard = logging::init_logging(&config.logging)?;
    let request = cli.request()?;

    let cancel = CancelToken::new();
    cancel.install_signal_handlers()?;

    let scratch = ScratchDir::create(config.search.tmpdir.as_deref())?;
    tracing::info!(tmp = %scratch.path().display(), "scratch directory");

    let span = SearchSpan::new(
        uuid::Uuid::new_v4(),
        &request.source.to_string_lossy(),
        &request.target.to_string_lossy(),
    );
    let outcome = {
        let toolkit = MincToolkit::new(&scratch, cancel.clone())?;
        RotationalSearch::new(&toolkit, &config.search, cancel.clone()).run(&request, &span)?
    };

    if let Some(ref path) = cli.report {
        let report = RunReport {
            run_id: span.run_id(),
            finished_at: chrono::Utc::now(),
            source: request.source.clone(),
            target: request.target.clone(),
            output_transform: request.output_transform.clone(),
            output_volume: request.output_volume.clone(),
            score: outcome.score,
            angles: outcome.angles,
            seed: outcome.seed,
            seeds_evaluated: outcome.seeds_evaluated,
            candidates_evaluated: outcome.candidates_evaluated,
            elapsed_ms: span.elapsed().as_millis() as u64,
        };
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        tracing::info!(report = %path.display(), "run report saved");
    }

    scratch.close()?;

    println!(
        "best rotation {} from seed {} -> {} :: xcorr {:.5} ({} candidates)",
        outcome.angles,
        outcome.seed.source,
        outcome.seed.target,
        outcome.score,
        outcome.candidates_evaluated
    );
    Ok(())
}
