use std::fs::File;
use std::process;

use clap::Parser as _;
use env_logger::Target;

use tfvc2git::tfvc::RestClient;

mod cli;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if cli.verbose { "debug" } else { "info" }),
    );
    if let Some(path) = &cli.log_file {
        match File::create(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(err) => {
                eprintln!("error: cannot open log file {}: {err}", path.display());
                process::exit(1);
            }
        }
    }
    builder.init();

    let result = (|| -> anyhow::Result<()> {
        let (config, auth) = cli.into_parts()?;
        let client = RestClient::connect(&config.endpoint, auth)?;
        tfvc2git::run(config, Box::new(client))
    })();

    if let Err(err) = result {
        log::error!("{err:#}");
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}
