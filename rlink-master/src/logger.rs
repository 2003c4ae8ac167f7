use std::str::FromStr;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const CONSOLE_APPENDER: &str = "console";

/// init log4rs with a stdout appender
/// level value: ["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"], ignore ascii case
pub fn init_log(level: &str) -> anyhow::Result<()> {
    let config = build_config(level)?;
    log4rs::init_config(config).map_err(|e| anyhow!("init log4rs error: {}", e))?;
    Ok(())
}

fn build_config(level: &str) -> anyhow::Result<Config> {
    let default_level =
        LevelFilter::from_str(level).map_err(|_e| anyhow!("can not parse log level `{}`", level))?;

    let encoder =
        PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} {level} [{thread}] {target} - {m}{n}");
    let stdout = ConsoleAppender::builder()
        .target(Target::Stdout)
        .encoder(Box::new(encoder))
        .build();

    Config::builder()
        .appender(Appender::builder().build(CONSOLE_APPENDER, Box::new(stdout)))
        .build(Root::builder().appender(CONSOLE_APPENDER).build(default_level))
        .map_err(|e| anyhow!("log4rs config error: {}", e))
}
