use std::path::Path;

use reagent_core::agent::AgentState;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::runtime::{Runtime, load_config, spawn_printer};

pub async fn run(
    config_path: Option<&Path>,
    query: String,
    mode: Option<String>,
    chat: Option<String>,
    max_step: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::new(load_config(config_path)?)?;
    let (sink, printer) = spawn_printer();
    let mut agent = runtime.react_agent(max_step, sink)?;
    if let Some(id) = chat {
        agent.load_chat(&id).await?;
    }
    if let Some(mode) = mode {
        agent.change_mode(&mode);
    }

    let ctrl_c = runtime.watch_ctrl_c();
    let alerts = runtime.watch_alerts();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut query = query;

    loop {
        runtime.stop.reset();
        let outcome = agent.call_react(&query).await;

        if outcome.state != AgentState::Pause {
            println!("\n{}", outcome.answer());
            break;
        }

        // Paused: ask the user and feed the reply back as the next query
        println!("\n{}", outcome.question.as_deref().unwrap_or_else(|| outcome.output.as_str()));
        for (i, option) in outcome.options.iter().enumerate() {
            println!("  {}. {option}", i + 1);
        }
        let Some(line) = stdin.next_line().await? else {
            break;
        };
        let reply = line.trim();
        if reply.is_empty() {
            break;
        }
        query = match reply.parse::<usize>() {
            Ok(n) if (1..=outcome.options.len()).contains(&n) => outcome.options[n - 1].clone(),
            _ => reply.to_string(),
        };
    }

    println!("\nChat: {}", agent.chat().id);
    ctrl_c.abort();
    alerts.abort();
    drop(agent);
    let _ = printer.await;
    runtime.close().await;
    Ok(())
}
