use std::io::{BufRead, IsTerminal, Write};

use anyhow::Context;
use recon_guard::config::Config;
use recon_guard::guard::ChallengePrompt;
use recon_guard::{CaptchaSubmission, ReconOrchestrator, ReconRequest, ReconResponse};
use tokio_util::sync::CancellationToken;

use crate::cli::{Cli, RequestArgs};

const CLI_USER_AGENT: &str = concat!("recon_guard/", env!("CARGO_PKG_VERSION"));

pub async fn run_from_cli(cli: Cli) -> anyhow::Result<()> {
    // Keep reqwest/hyper at INFO so debug mode stays readable.
    use tracing_subscriber::EnvFilter;
    let crate_level = if cli.debug { "debug" } else if cli.verbose { "info" } else { "warn" };
    let filter_str = format!(
        "recon_guard={crate},reqwest=info,hyper=info,h2=info,hickory_proto=warn",
        crate = crate_level
    );
    let env_filter = EnvFilter::try_new(&filter_str).unwrap_or_else(|_| EnvFilter::new(crate_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(true)
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let orchestrator = ReconOrchestrator::from_config(&config)?;
    let shutdown = CancellationToken::new();
    let sweepers = orchestrator.spawn_maintenance(shutdown.clone());

    let operation = cli.command.operation();
    let args = cli.command.args().clone();
    let result = run_requests(&orchestrator, operation, &args).await;

    shutdown.cancel();
    for handle in sweepers {
        let _ = handle.await;
    }
    result?;

    if let Some(path) = &args.log_out {
        let written = orchestrator
            .services()
            .logger
            .export_jsonl(path)
            .with_context(|| format!("exporting result log to {}", path.display()))?;
        println!("📝 Wrote {} log entries to {}", written, path.display());
    }

    let stats = orchestrator.cache_stats();
    tracing::info!(size = stats.size, hit_rate = stats.hit_rate, "cache stats");
    Ok(())
}

async fn run_requests(
    orchestrator: &ReconOrchestrator,
    operation: recon_guard::Operation,
    args: &RequestArgs,
) -> anyhow::Result<()> {
    let interactive = std::io::stdin().is_terminal();

    for attempt in 1..=args.repeat.max(1) {
        let request = ReconRequest::new(operation, &args.target, &args.client)
            .user_agent(CLI_USER_AGENT)
            .bypass(args.bypass);
        let response = orchestrator.execute(request).await;
        print_response(attempt, &response)?;

        if let ReconResponse::ChallengeRequired { challenge, .. } = &response {
            if !interactive {
                continue;
            }
            let answer = prompt_answer(challenge)?;
            let submission = CaptchaSubmission { challenge_id: challenge.id.clone(), answer };
            let verdict = orchestrator.verify_captcha(&args.client, &submission);
            if verdict.success {
                println!("✅ Captcha solved, requests allowed again");
            } else {
                println!("❌ Wrong answer or expired challenge");
            }
        }
    }
    Ok(())
}

fn print_response(attempt: u32, response: &ReconResponse) -> anyhow::Result<()> {
    println!("── request #{} → HTTP {}", attempt, response.status_code());
    for (name, value) in response.rate_limit_headers() {
        println!("{name}: {value}");
    }
    if let ReconResponse::Success { cached: true, .. } = response {
        println!("(served from cache)");
    }
    println!("{}", serde_json::to_string_pretty(&response.body())?);
    Ok(())
}

fn prompt_answer(challenge: &ChallengePrompt) -> anyhow::Result<String> {
    print!("🔒 {} ", challenge.question);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading captcha answer")?;
    Ok(line.trim().to_string())
}
