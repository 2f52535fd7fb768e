use std::process;

use clap::Parser;

use gitmirror::config::Config;
use gitmirror::git::GitDriver;
use gitmirror::sync::Orchestrator;

mod cli;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    // Configure logging based on --verbose flag or RUST_LOG env var
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    )
    .format(|buf, record| {
        use std::io::Write;
        writeln!(buf, "[{}] {}", record.level(), record.args())
    })
    .init();

    #[cfg(unix)]
    install_sigint_handler();

    if let Err(e) = check_dependencies() {
        log::error!("{e:#}");
        process::exit(1);
    }

    log::info!("Loading configuration from '{}'...", cli.config.display());
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Synchronization failed: {e:#}");
            process::exit(1);
        }
    };
    log::info!(
        "Configuration loaded successfully. Found {} repositories.",
        config.repositories.len()
    );

    let driver = GitDriver::new(cli.verbose);
    let report = Orchestrator::new(&config, driver, cli.force_full).run();
    report.print_summary();

    if report.all_success() {
        log::info!("All repositories synchronized successfully!");
    } else {
        log::error!("Some repositories failed to synchronize. Check the report above.");
        process::exit(1);
    }
}

fn check_dependencies() -> anyhow::Result<()> {
    log::info!("Checking dependencies...");
    which::which("git")
        .map_err(|_| anyhow::anyhow!("Required tool 'git' not found. Please install it."))?;
    log::info!("All dependencies satisfied.");
    Ok(())
}

/// Exit 130 on SIGINT, leaving any in-flight git operation to the OS. The
/// next run recovers the workspace (hard reset + clean before branch prep).
#[cfg(unix)]
fn install_sigint_handler() {
    use signal_hook::consts::SIGINT;
    use signal_hook::iterator::Signals;

    match Signals::new([SIGINT]) {
        Ok(mut signals) => {
            std::thread::spawn(move || {
                if signals.forever().next().is_some() {
                    eprintln!("\nSynchronization interrupted by user.");
                    process::exit(130);
                }
            });
        }
        Err(e) => log::warn!("Failed to install SIGINT handler: {e}"),
    }
}
