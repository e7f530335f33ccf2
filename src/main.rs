mod app;
mod applier;
mod cache;
mod catalog;
mod cli;
mod config;
mod download;
mod extract;
mod matcher;
mod steam;
mod sync;
mod worker;

use env_logger::Env;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    cli::run()
}
