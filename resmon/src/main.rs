use clap::Parser;
use resmon::{Application, Config, RunOutcome, telemetry};
use std::process::ExitCode;

async fn run(config: Config, args: &resmon::Args) -> anyhow::Result<RunOutcome> {
    let filter = Application::filter_from_args(args);
    let outcome = Application::new(config, filter).await?.run().await?;
    Ok(outcome)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Install rustls crypto provider before anything else that might build a TLS client
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // --help and --version exit here with status 0
    let args = resmon::Args::parse();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.validate {
        println!("Configuration is valid.");
        return ExitCode::SUCCESS;
    }

    if let Err(e) = telemetry::init_telemetry(config.color) {
        eprintln!("Error: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(config, &args).await {
        Ok(RunOutcome::NothingToReport) => ExitCode::SUCCESS,
        Ok(RunOutcome::Completed(metrics)) => {
            tracing::info!(
                active = metrics.total_active,
                expired = metrics.total_expired,
                expiring = metrics.expiring_within_180_days,
                "Reservation report complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            // Debug formatting prints the cause chain, and a backtrace when RUST_BACKTRACE is set
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}
