//! kintrail command-line runner
//!
//! Runs one trail against a JSON fixture gateway and prints the report.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kintrail::{InMemoryGateway, TrailConfig, TrailFollower, TrailRequest};

/// Parsed command line.
struct Args {
    fixtures: PathBuf,
    config: Option<PathBuf>,
    request: TrailRequest,
}

fn usage() {
    println!("kintrail - follow relationship trails over person lookup results");
    println!();
    println!("USAGE:");
    println!("    kintrail --fixtures <FILE> --name <NAME> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -f, --fixtures <FILE>     JSON fixture responses for the gateway");
    println!("    -n, --name <NAME>         Seed name");
    println!("        --phone <PHONE>       Seed phone");
    println!("        --address <ADDRESS>   Seed address");
    println!("        --state <STATE>       Seed state");
    println!("        --depth <N>           Max depth, 1-3 [default: 2]");
    println!("        --associates <N>      Max associates per level, 5-20 [default: 10]");
    println!("    -c, --config <FILE>       TOML configuration");
    println!("    -h, --help                Print help information");
    println!();
    println!("Logging is controlled with RUST_LOG (default: kintrail=info).");
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut fixtures = None;
    let mut config = None;
    let mut request = TrailRequest::new("");

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        if matches!(flag, "--help" | "-h") {
            usage();
            std::process::exit(0);
        }
        let Some(value) = args.get(i + 1).cloned() else {
            fail(&format!("{flag} requires a value"));
        };
        match flag {
            "--fixtures" | "-f" => fixtures = Some(PathBuf::from(value)),
            "--config" | "-c" => config = Some(PathBuf::from(value)),
            "--name" | "-n" => request.seed.name = Some(value),
            "--phone" => request = request.phone(value),
            "--address" => request = request.address(value),
            "--state" => request = request.state(value),
            "--depth" => {
                let depth = value
                    .parse()
                    .unwrap_or_else(|_| fail(&format!("invalid depth: {value}")));
                request = request.max_depth(depth);
            }
            "--associates" => {
                let associates = value
                    .parse()
                    .unwrap_or_else(|_| fail(&format!("invalid associates count: {value}")));
                request = request.max_associates(associates);
            }
            other => fail(&format!("unknown argument: {other}")),
        }
        i += 2;
    }

    let Some(fixtures) = fixtures else {
        fail("--fixtures is required");
    };
    Args {
        fixtures,
        config,
        request,
    }
}

fn run(args: &Args) -> Result<String, String> {
    let config = match &args.config {
        Some(path) => TrailConfig::load(path).map_err(|e| e.to_string())?,
        None => TrailConfig::default(),
    };
    let json = std::fs::read_to_string(&args.fixtures)
        .map_err(|e| format!("failed to read fixtures '{}': {e}", args.fixtures.display()))?;
    let gateway = InMemoryGateway::from_json(&json).map_err(|e| format!("invalid fixtures: {e}"))?;

    let follower = TrailFollower::new(Arc::new(gateway), config).map_err(|e| e.to_string())?;
    let report = follower.run(&args.request).map_err(|e| e.to_string())?;
    info!(
        persons = report.search_summary.unique_persons,
        searches = report.search_summary.total_searches,
        termination = %report.termination,
        "done"
    );
    report.to_json_pretty().map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kintrail=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = parse_args();
    match run(&args) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            error!("{message}");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
