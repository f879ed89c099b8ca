use std::process;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use topograph::cli::{
    format_manifest_summary, format_validation_failure, format_validation_result,
    format_violations, load_manifest, synthesize, validate_file, write_output, Cli, CommandError,
    Commands,
};

fn main() {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for rendered documents
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    if let Err(e) = run(cli.command) {
        let violations = e.violations();
        if violations.is_empty() {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("Error: validation failed");
            eprint!("{}", format_violations(violations));
        }
        process::exit(e.exit_code());
    }
}

fn run(command: Commands) -> Result<(), CommandError> {
    match command {
        Commands::Synth(args) => {
            let manifest = load_manifest(&args.file)?;
            let rendered = synthesize(&manifest, args.format, args.output)?;
            match write_output(&rendered, args.out.as_deref())? {
                Some(path) => eprintln!("Wrote {}", path.display()),
                None => println!("{}", rendered.trim_end()),
            }
        }
        Commands::Validate(args) => {
            let path = args.file.display().to_string();
            match validate_file(&args.file) {
                Ok(result) => {
                    print!(
                        "{}",
                        format_validation_result(&path, &result.manifest, &result.report)
                    );
                }
                Err(e) if !e.violations().is_empty() => {
                    eprint!("{}", format_validation_failure(&path, e.violations()));
                    process::exit(e.exit_code());
                }
                Err(e) => return Err(e),
            }
        }
        Commands::Show(args) => {
            let manifest = load_manifest(&args.file)?;
            let fingerprint = manifest.fingerprint()?;
            print!("{}", format_manifest_summary(&manifest, Some(&fingerprint)));
        }
    }
    Ok(())
}
