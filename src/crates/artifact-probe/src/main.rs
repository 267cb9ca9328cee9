use anyhow::Result;
use artifact_probe::{probe, Format};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "artifact-probe")]
#[command(about = "Check generated MIDI, WAV, MP3 and PNG files", long_about = None)]
struct Args {
    /// Files to check. The format is taken from the extension.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Print one JSON object per file instead of a summary line
    #[arg(long)]
    json: bool,

    /// Suppress output for valid files (only report failures)
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut failures = 0;

    for path in &args.files {
        let Some(format) = Format::from_path(path) else {
            eprintln!("{}: unknown file type", path.display());
            failures += 1;
            continue;
        };

        match probe(path, format) {
            Ok(summary) => {
                if args.quiet {
                    continue;
                }
                if args.json {
                    let line = serde_json::json!({
                        "path": path,
                        "valid": true,
                        "summary": summary,
                    });
                    println!("{}", line);
                } else {
                    println!("{}: {}", path.display(), summary);
                }
            }
            Err(e) => {
                failures += 1;
                if args.json {
                    let line = serde_json::json!({
                        "path": path,
                        "valid": false,
                        "error": format!("{:#}", e),
                    });
                    println!("{}", line);
                } else {
                    eprintln!("{}: {:#}", path.display(), e);
                }
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} file(s) failed the check", failures, args.files.len());
    }

    Ok(())
}
