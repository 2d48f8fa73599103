use std::path::Path;

use crate::runtime::{Runtime, load_config, spawn_printer};

pub async fn run(
    config_path: Option<&Path>,
    query: String,
    chat: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Runtime::new(load_config(config_path)?)?;
    if runtime.config.chain_call.is_empty() {
        return Err("No chain_call steps are configured".into());
    }

    let (sink, printer) = spawn_printer();
    let mut chain = runtime.chain(sink);
    if let Some(id) = chat {
        chain.load_chat(&id).await?;
    }

    let ctrl_c = runtime.watch_ctrl_c();
    let alerts = runtime.watch_alerts();
    let outcome = chain.call_chain(&query).await;
    println!("\n{}", outcome.answer);
    println!("\nChat: {}", chain.chat().id);

    ctrl_c.abort();
    alerts.abort();
    drop(chain);
    let _ = printer.await;
    Ok(())
}
