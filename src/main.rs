use clap::Parser as _;
use kospel_tools::commands;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    Devices(commands::devices::Args),
    Status(commands::status::Args),
    Variables(commands::variables::Args),
    Decode(commands::decode::Args),
}

fn end<E: std::error::Error>(r: Result<(), E>) {
    std::process::exit(match r {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}

fn main() {
    let filter_description =
        std::env::var("KOSPEL_TOOLS_LOG").unwrap_or_else(|_| "warn".to_string());
    let filter = match filter_description.parse::<tracing_subscriber::filter::targets::Targets>() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("error: KOSPEL_TOOLS_LOG is not a valid filter: {e}");
            std::process::exit(2);
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    match Commands::parse() {
        Commands::Devices(args) => end(commands::devices::run(args)),
        Commands::Status(args) => end(commands::status::run(args)),
        Commands::Variables(args) => end(commands::variables::run(args)),
        Commands::Decode(args) => end(commands::decode::run(args)),
    }
}
