//! vizbridge - Raspberry Pi audio visualiser bridge
//!
//! Streams spectrum frames, media metadata and rotary-encoder input to a
//! microcontroller-driven display over I2C, optionally mirroring the
//! spectrum on two local SPI OLED panels.

use std::process::ExitCode;

mod app;
mod config;
mod control;
mod dispatch;
mod encoder;
mod error;
mod format;
mod gpio;
mod idle;
mod media;
mod oled;
mod protocol;
mod spectrum;
mod transport;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting vizbridge {}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load();
    if let Err(e) = config.validate() {
        log::error!("{e}");
        return ExitCode::FAILURE;
    }

    match app::App::start(config) {
        Ok(app) => {
            app.run();
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("Fatal: {e}");
            ExitCode::FAILURE
        }
    }
}
