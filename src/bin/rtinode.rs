//! `rtinode`: the Cadence federation server.
//!
//! Exit codes: 0 on success, 1 on any federation error, 2 on bad invocation
//! (clap's usage-error code).

use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "rtinode", about = "Serve Cadence federation executions")]
struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value = "127.0.0.1:14321")]
    bind: SocketAddr,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let listener = cadence_rti::create_listener(args.bind).await?;
    cadence_rti::serve(listener).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber_init();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("rtinode: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn tracing_subscriber_init() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
