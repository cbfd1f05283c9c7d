use std::process::ExitCode;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod bake;
mod environment;
mod importer;
mod inspect;
mod settings;

use settings::{Arguments, Command, USAGE};

fn run(arguments: Arguments) -> anyhow::Result<()> {
    match arguments.command {
        Command::Bake(settings) => {
            let report = bake::bake(&settings)?;
            tracing::info!(
                "Baked {} into {}: {} textures ({} mipmapped), {} environments",
                settings.scene.display(),
                settings.output.display(),
                report.textures,
                report.mipmapped,
                report.environments
            );
            Ok(())
        }
        Command::Inspect(path) => inspect::inspect(&path, arguments.verbose),
    }
}

fn main() -> ExitCode {
    let arguments = match Arguments::parse(std::env::args().skip(1)) {
        Ok(arguments) => arguments,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            return ExitCode::FAILURE;
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if arguments.verbose {
            Level::TRACE
        } else {
            Level::INFO
        })
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install the log subscriber: {}", e);
    }

    match run(arguments) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
