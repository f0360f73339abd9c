//! cistash binary

// The binary reports results on stdout and diagnostics on stderr
#![allow(clippy::print_stdout, clippy::print_stderr)]

use cistash::cli;
use cistash::tracing::{TracingConfig, init_tracing};
use cistash::{EXIT_FAILURE, EXIT_OK, exit_code_for, shutdown};
use tokio_util::sync::CancellationToken;

fn main() {
    // NOTE: tracing may be unusable during a panic, so write straight to stderr.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();

    if let Err(e) = init_tracing(TracingConfig {
        format: cli.log_format,
        level: cli.level.into(),
        filter: None,
    }) {
        eprintln!("{e:?}");
        std::process::exit(EXIT_FAILURE);
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Fatal error: Failed to create tokio runtime: {e}");
            std::process::exit(EXIT_FAILURE);
        }
    };

    let exit_code = rt.block_on(async {
        let cancel = CancellationToken::new();
        shutdown::install_signal_handlers(cancel.clone());

        let mut stdout = std::io::stdout().lock();
        match cistash::commands::run(cli, cancel, &mut stdout).await {
            Ok(()) => EXIT_OK,
            Err(e) => {
                let code = exit_code_for(&e);
                eprintln!("{:?}", miette::Report::new(e));
                code
            }
        }
    });

    // Runtime shutdown waits for blocking archive work, which removes its
    // temporary files on completion.
    drop(rt);
    std::process::exit(exit_code);
}
