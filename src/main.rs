// src/main.rs

use taskwarden::engine::RunOutcome;
use taskwarden::{cli, logging, run};

#[tokio::main]
async fn main() {
    let code = match run_main().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("taskwarden error: {err:?}");
            1
        }
    };
    std::process::exit(code);
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    let Some(result) = run(args).await? else {
        return Ok(0);
    };

    print!("{result}");
    Ok(match result.outcome {
        RunOutcome::Success => 0,
        RunOutcome::PartialFailure { .. } | RunOutcome::Cancelled { .. } => 2,
    })
}
