pub mod captions;
pub mod command;
pub mod dump;
pub mod info;

use demux::extractor::ExtractorConfig;

use command::Cli;

/// Extractor options shared by every subcommand.
pub fn extractor_config(cli: &Cli) -> ExtractorConfig {
    ExtractorConfig {
        fail_level: cli.fail_level(),
        ..ExtractorConfig::default()
    }
}
