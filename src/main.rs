use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info};

mod app;
mod args;
mod auth;
mod backend;
mod feedback;
mod form;
mod routes;
mod user;
mod view;

use app::Feedbacker;
use args::Args;
use auth::Hasher;
use backend::Backend;

fn init_logging() {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());

    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filters)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args = Args::parse();
    let addr = match args.addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid address: {e}");
            return ExitCode::FAILURE;
        }
    };

    let Ok(backend) = Backend::new(args.data_dir(), args.reset()).await else {
        error!("couldn't open database in {}", args.data_dir().display());
        return ExitCode::FAILURE;
    };

    let app = Arc::new(Feedbacker::new(backend, Hasher::new(), args.secure()));

    info!("listening on {addr}");
    warp::serve(routes::routes(app)).run(addr).await;

    ExitCode::SUCCESS
}
