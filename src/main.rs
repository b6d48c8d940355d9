use clap::Parser;
use log::{error, info};
use miraligner::commands::realign::{run_realign, RealignOptions};
use miraligner::commands::stats::run_stats;
use miraligner::realign::RealignConfig;
use rayon::ThreadPoolBuilder;
use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;

/// Common options shared between all commands
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Precursor hairpin sequences (miRBase hairpin.fa).
    #[clap(short = 'r', long, value_parser)]
    reference: PathBuf,

    /// Species prefix used to filter precursors (e.g. hsa). All precursors are kept if omitted.
    #[clap(short = 's', long, value_parser)]
    species: Option<String>,

    /// miRBase GFF3 annotation with mature miRNA coordinates.
    #[clap(short = 'g', long, value_parser)]
    mature_gff: Option<PathBuf>,

    /// Force the regeneration of the precursor cache, even if it already exists.
    #[clap(short = 'I', long, action)]
    force_reindex: bool,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

/// Realign small RNA reads from SAM/BAM files to miRBase precursors and annotate isomiRs.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Realign reads and write isomiR annotations
    Realign {
        #[clap(flatten)]
        common: CommonOpts,

        /// SAM/BAM files to realign
        #[clap(required = true, value_parser)]
        files: Vec<PathBuf>,

        /// miRBase release of the reference, recorded in the report
        #[clap(long, value_parser, default_value = "22")]
        mirbase_version: String,

        /// Directory for sorted BAMs and reports (default: next to each input)
        #[clap(short = 'o', long, value_parser)]
        output_dir: Option<PathBuf>,

        /// BGZF-compress the annotation reports
        #[clap(short = 'z', long, action)]
        compress: bool,

        /// Number of threads for parallel processing.
        #[clap(short = 't', long, value_parser, default_value_t = NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN))]
        num_threads: NonZeroUsize,

        /// Reads realigned in parallel per batch
        #[clap(long, value_parser, default_value_t = 10000)]
        batch_size: usize,

        /// Maximum internal mismatches per read
        #[clap(short = 'm', long, value_parser, default_value_t = 1)]
        max_mismatches: usize,

        /// Maximum non-templated bases trimmed from the 5' end
        #[clap(long, value_parser, default_value_t = 0)]
        max_trim_5p: usize,

        /// Maximum non-templated bases trimmed from the 3' end
        #[clap(long, value_parser, default_value_t = 3)]
        max_trim_3p: usize,

        /// Minimum alignment score
        #[clap(long, value_parser, default_value_t = 8)]
        min_score: i32,
    },
    /// Print precursor reference statistics
    Stats {
        #[clap(flatten)]
        common: CommonOpts,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args {
        Args::Realign {
            common,
            files,
            mirbase_version,
            output_dir,
            compress,
            num_threads,
            batch_size,
            max_mismatches,
            max_trim_5p,
            max_trim_3p,
            min_score,
        } => {
            initialize_logger(common.verbose);

            ThreadPoolBuilder::new()
                .num_threads(num_threads.into())
                .build_global()
                .map_err(io::Error::other)?;

            if let Some(dir) = &output_dir {
                std::fs::create_dir_all(dir)?;
            }

            let opts = RealignOptions {
                files,
                reference: common.reference,
                species: common.species,
                mirbase_version,
                mature_gff: common.mature_gff,
                output_dir,
                compress,
                force_reindex: common.force_reindex,
                batch_size,
                config: RealignConfig {
                    max_mismatches,
                    max_trim_5p,
                    max_trim_3p,
                    min_score,
                    ..RealignConfig::default()
                },
            };
            let run = run_realign(&opts)?;
            info!(
                "Processed {} files, {} failed",
                run.summaries.len() + run.failures.len(),
                run.failures.len()
            );
            for (file, e) in &run.failures {
                error!("Failed: {}: {}", file.display(), e);
            }
            run.into_result()?;
        }
        Args::Stats { common } => {
            initialize_logger(common.verbose);
            run_stats(
                &common.reference,
                common.species.as_deref(),
                common.mature_gff.as_deref(),
                common.force_reindex,
            )?;
        }
    }

    Ok(())
}

fn initialize_logger(verbose: u8) {
    env_logger::Builder::new()
        .filter_level(match verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();
}
