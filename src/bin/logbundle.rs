//! Command-line utility for building and merging log bundles.
//!
//! `logbundle` packs files into `.tar.gz` archives, merges per-node archives into a single
//! bundle, removes staging directories, and runs the whole gather flow for a cluster.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use logbundle::{
    bundle::{gather_bundle, BundleRequest},
    gather::GatherRegistry,
    MergeMapping, MergeOptions, MergeReport, SourceFileSet, SourceOutcome,
};

/// logbundle
#[derive(Debug, Parser)]
#[clap(name = "logbundle", version)]
pub struct App {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pack files into a new .tar.gz, each stored under the path given
    Create {
        /// the archive to write
        archive: PathBuf,
        /// files to pack, in order
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },
    /// Merge archives into one bundle below a directory named after it
    Merge {
        /// the bundle to write
        archive: PathBuf,
        /// source archives, optionally as 'path=subdir' to place their entries in a sub-directory
        #[clap(required = true, value_parser = parse_source)]
        sources: Vec<(PathBuf, String)>,
        /// Don't delete the source archives after merging them
        #[clap(long)]
        keep_sources: bool,
    },
    /// Recursively delete a staging directory
    Clean {
        /// the directory to delete; '/' and paths starting with '.' are refused
        dir: PathBuf,
    },
    /// Run the platform gatherer for a cluster and merge what it collected
    Gather {
        /// directory containing metadata.json
        #[clap(long)]
        metadata_dir: PathBuf,
        /// directory the gatherer stages per-node archives in
        #[clap(long)]
        staging_dir: PathBuf,
        /// the bundle to write
        #[clap(long)]
        output: PathBuf,
        /// Keep the staging directory after the bundle is written
        #[clap(long)]
        keep_staging: bool,
    },
}

fn parse_source(arg: &str) -> Result<(PathBuf, String), String> {
    match arg.split_once('=') {
        Some(("", _)) => Err(format!("missing archive path in {arg:?}")),
        Some((path, sub_directory)) => Ok((PathBuf::from(path), sub_directory.to_string())),
        None => Ok((PathBuf::from(arg), String::new())),
    }
}

fn print_report(report: &MergeReport) {
    for (source, outcome) in &report.sources {
        match outcome {
            SourceOutcome::Merged {
                entries,
                skipped,
                removed,
            } => {
                print!("merged {} ({entries} entries", source.display());
                if *skipped > 0 {
                    print!(", {skipped} skipped");
                }
                if !removed {
                    print!(", kept");
                }
                println!(")");
            }
            SourceOutcome::Missing => println!("missing {}", source.display()),
        }
    }
    println!("{}", report.archive.display());
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();

    match args.cmd {
        Command::Create { archive, files } => {
            let files: SourceFileSet = files.into_iter().collect();
            logbundle::create_archive(&files, &archive)?;
            println!("{}", archive.display());
        }
        Command::Merge {
            archive,
            sources,
            keep_sources,
        } => {
            let mapping: MergeMapping = sources.into_iter().collect();
            let options = MergeOptions {
                remove_sources: !keep_sources,
                ..Default::default()
            };
            let report = logbundle::combine_archives_async(archive, mapping, options).await?;
            print_report(&report);
        }
        Command::Clean { dir } => {
            logbundle::delete_archive_directory(&dir)?;
        }
        Command::Gather {
            metadata_dir,
            staging_dir,
            output,
            keep_staging,
        } => {
            // the cleaner refuses relative paths starting with '.'
            let staging_dir = std::path::absolute(&staging_dir)
                .with_context(|| format!("resolving {staging_dir:?}"))?;
            let request = BundleRequest {
                metadata_dir,
                staging_dir,
                output,
                cleanup: !keep_staging,
                merge: MergeOptions::default(),
            };
            let report = tokio::task::spawn_blocking(move || {
                gather_bundle(&request, &GatherRegistry::with_defaults())
            })
            .await??;
            print_report(&report);
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_source() {
        assert_eq!(
            parse_source("node1.tar.gz").unwrap(),
            (PathBuf::from("node1.tar.gz"), String::new())
        );
        assert_eq!(
            parse_source("/tmp/node1.tar.gz=masters").unwrap(),
            (PathBuf::from("/tmp/node1.tar.gz"), "masters".to_string())
        );
        assert!(parse_source("=masters").is_err());
    }

    #[test]
    fn test_cli() {
        use clap::CommandFactory;
        App::command().debug_assert();
    }
}
