use pointvr::{LoggingConfig, cli, init_logging};

fn main() -> anyhow::Result<()> {
    let cli = cli::parse();
    init_logging(LoggingConfig {
        env_filter: cli.log.clone(),
        ..LoggingConfig::default()
    });

    let config = cli.into_config()?;
    pointvr::run(config)
}
