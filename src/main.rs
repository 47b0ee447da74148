mod actions;
mod cli;
mod coalescer;
mod config;
mod gestures;
mod input;
mod ipc;
mod logging;
mod mode;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
