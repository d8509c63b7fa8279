use std::{fs, path::PathBuf, process};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use skelc::emit::decode_animation;
use skelc::logging::init_logging;
use skelc::pipeline::{BuildOptions, BuildReport, build_asset, check_asset};
use skelc::project::{BuildScript, save_build_script};

#[derive(Parser)]
#[command(name = "skelc")]
#[command(about = "Skeletal asset compiler")]
#[command(version)]
struct Cli {
    /// Debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an asset and write its collision and animation files
    Build {
        /// Build script (JSON)
        script: PathBuf,

        /// Output directory (overrides the script)
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Write the build report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Downgrade an over-budget collision model to a warning
        #[arg(long)]
        allow_costly: bool,

        /// Drop 2-D collision pieces instead of failing
        #[arg(long = "remove-2d")]
        remove_2d: bool,
    },

    /// Run every stage without writing anything
    Check {
        /// Build script (JSON)
        script: PathBuf,

        #[arg(long)]
        allow_costly: bool,

        #[arg(long = "remove-2d")]
        remove_2d: bool,
    },

    /// Print the contents of a compiled animation file
    Inspect {
        /// Compiled .skan file
        file: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default build script
    Init {
        /// Path of the new script
        script: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    init_logging(level);

    if let Err(err) = run(cli.command) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Build {
            script,
            out_dir,
            report,
            allow_costly,
            remove_2d,
        } => {
            let options = BuildOptions {
                out_dir,
                allow_costly,
                remove_2d,
            };
            let summary = build_asset(&script, &options)?;
            print_summary(&summary);
            for output in &summary.outputs {
                println!("Wrote {}", output.display());
            }
            if let Some(path) = report {
                let json = serde_json::to_string_pretty(&summary)
                    .context("failed to serialize build report")?;
                fs::write(&path, json)
                    .with_context(|| format!("failed to write report: {}", path.display()))?;
            }
        }
        Commands::Check {
            script,
            allow_costly,
            remove_2d,
        } => {
            let options = BuildOptions {
                out_dir: None,
                allow_costly,
                remove_2d,
            };
            let summary = check_asset(&script, &options)?;
            print_summary(&summary);
            println!("OK");
        }
        Commands::Inspect { file, json } => {
            let bytes = fs::read(&file)
                .with_context(|| format!("failed to read input file: {}", file.display()))?;
            let decoded = decode_animation(&bytes)
                .with_context(|| format!("failed to decode: {}", file.display()))?;
            if json {
                let text = serde_json::to_string_pretty(&decoded)
                    .context("failed to serialize animation file")?;
                println!("{text}");
                return Ok(());
            }
            println!("Version {}, checksum {:#010x}", decoded.version, decoded.checksum);
            println!("Bones: {}", decoded.bones.len());
            for (index, bone) in decoded.bones.iter().enumerate() {
                let parent = bone
                    .parent
                    .map_or_else(|| "-".to_string(), |parent| parent.to_string());
                println!("  [{index}] {} (parent {parent}, flags {:#x})", bone.name, bone.flags);
            }
            println!("Clips: {}", decoded.clips.len());
            for clip in &decoded.clips {
                println!(
                    "  {}: {} frames at {} fps{}{}, {} tracks",
                    clip.name,
                    clip.frame_count,
                    clip.fps,
                    if clip.looping { ", looping" } else { "" },
                    if clip.delta { ", delta" } else { "" },
                    clip.tracks.len()
                );
            }
        }
        Commands::Init { script, force } => {
            if script.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", script.display());
            }
            save_build_script(&script, &BuildScript::default())?;
            println!("Wrote {}", script.display());
        }
    }
    Ok(())
}

fn print_summary(report: &BuildReport) {
    println!("Asset: {}", report.asset);
    println!("Joints: {}, Clips: {}", report.joint_count, report.clip_count);
    println!(
        "Solids: {}, Convex pieces: {}, Constraints: {}",
        report.solid_count, report.convex_pieces, report.constraint_count
    );
    println!("Checksum: {:#010x}", report.checksum);
    for issue in &report.issues {
        println!("[{}] {}", issue.severity.as_str(), issue.message);
    }
}
