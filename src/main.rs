use anyhow::Result;
use clap::Parser as ClapParser;
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

use cli::captions::cmd_captions;
use cli::command::{Cli, Commands, LogFormat};
use cli::dump::cmd_dump;
use cli::info::cmd_info;

mod byteorder;
mod cli;
mod index;
mod input;
pub(crate) mod timestamp;
mod wav;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let base_level = cli.loglevel.to_level_filter();

    let multi = MultiProgress::new();

    let mut env_builder = env_logger::Builder::from_default_env();
    env_builder.filter_level(base_level);
    match cli.log_format {
        LogFormat::Plain => {
            env_builder.format_timestamp_secs();
        }
        LogFormat::Json => {
            env_builder.format(|buf, record| {
                use std::io::Write;
                writeln!(
                    buf,
                    "{{\"ts\":{},\"lvl\":\"{}\",\"msg\":\"{}\"}}",
                    buf.timestamp(),
                    record.level(),
                    record.args()
                )
            });
        }
    }

    let pb = if cli.progress {
        let logger = env_builder.build();
        LogWrapper::new(multi.clone(), logger).try_init()?;
        Some(&multi)
    } else {
        env_builder.try_init()?;
        None
    };

    log::debug!(
        "{} {} (demux {}, built {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("DEMUX_VERSION"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Commands::Info(ref args) => cmd_info(args, &cli, pb)?,
        Commands::Dump(ref args) => cmd_dump(args, &cli, pb)?,
        Commands::Captions(ref args) => cmd_captions(args, &cli)?,
    }

    Ok(())
}
