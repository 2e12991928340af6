use anyhow::Result;
use clap::Parser;
use codenav::config::Config;
use codenav::{cli, rpc};
use tracing_subscriber::EnvFilter;

fn serve_options(data: &cli::DataArgs) -> rpc::ServeOptions {
    rpc::ServeOptions {
        store_path: data.store.clone(),
        bundle_dir: data.bundles.clone(),
        repositories: data.repositories(),
    }
}

fn main() -> Result<()> {
    // stdout carries RPC responses, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let config = Config::get();

    match args.command {
        cli::Command::Serve { data } => rpc::serve(&serve_options(&data), config),
        cli::Command::Request {
            data,
            method,
            params,
            params_file,
            id,
        } => {
            let params_raw = if let Some(path) = params_file {
                std::fs::read_to_string(&path)?
            } else {
                params
            };
            let response = rpc::call(&serve_options(&data), config, method, &params_raw, &id)?;
            println!("{response}");
            Ok(())
        }
    }
}
