use anyhow::{bail, Context, Result};
use logplay::core::PlayerPresence;
use logplay::{
    CsvLogSource, IterablePlayer, NoopMetricsCollector, PlayerOptions, SubscribePayload,
};
use std::sync::Arc;

/// Play a recorded CSV log to stdout.
///
/// Usage: player <log.csv> [topic ...] [--speed N] [--json]
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().context("usage: player <log.csv> [topic ...] [--speed N] [--json]")?;
    let mut topics: Vec<String> = Vec::new();
    let mut speed = 1.0;
    let mut json = false;
    while let Some(arg) = args.next() {
        if arg == "--speed" {
            speed = args
                .next()
                .context("--speed needs a value")?
                .parse()
                .context("--speed must be a number")?;
        } else if arg == "--json" {
            json = true;
        } else {
            topics.push(arg);
        }
    }

    let source = CsvLogSource::new(&path);
    let options = PlayerOptions { name: Some(path.clone()), speed, ..Default::default() };
    let player = IterablePlayer::new(Box::new(source), Arc::new(NoopMetricsCollector), options);
    let mut states = player.subscribe_state();

    // wait for the source to open so we know the topic list
    let init_state = loop {
        let state = states.recv().await.context("player stopped during initialize")?;
        match state.presence {
            PlayerPresence::Idle => break state,
            PlayerPresence::Error => {
                for problem in &state.problems {
                    eprintln!("problem: {}", problem.message);
                }
                bail!("failed to open {path}");
            }
            _ => {}
        }
    };

    let active = init_state.active_data.context("no active data after initialize")?;
    if topics.is_empty() {
        topics = active.topics.iter().map(|t| t.name.clone()).collect();
    }
    println!(
        "{}: {} topics, [{} .. {}]",
        path,
        active.topics.len(),
        active.start_time,
        active.end_time
    );

    player.set_subscriptions(topics.iter().map(|t| SubscribePayload::topic(t)).collect());
    player.play();

    let mut reported_problems = Vec::new();
    while let Some(state) = states.recv().await {
        for problem in &state.problems {
            if !reported_problems.contains(&problem.message) {
                eprintln!("problem: {}", problem.message);
                reported_problems.push(problem.message.clone());
            }
        }
        if let Some(active) = &state.active_data {
            for message in &active.messages {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "time": message.receive_time,
                            "topic": message.topic,
                            "schema": message.schema_name,
                            "size": message.size_in_bytes,
                        })
                    );
                } else {
                    println!(
                        "{} {} ({}, {} bytes)",
                        message.receive_time,
                        message.topic,
                        message.schema_name,
                        message.size_in_bytes
                    );
                }
            }
            if state.presence == PlayerPresence::Idle && active.current_time == active.end_time {
                break;
            }
        }
    }

    player.close();
    Ok(())
}
