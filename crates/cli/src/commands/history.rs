use std::path::Path;

use reagent_core::store::ChatStore;
use reagent_memory::FileChatStore;

use crate::runtime::load_config;

pub async fn run(
    config_path: Option<&Path>,
    delete: Option<String>,
    rename: Option<Vec<String>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;
    let store = FileChatStore::new(config.history_path.clone());

    if let Some(id) = delete {
        if store.delete(&id).await? {
            println!("Deleted chat {id}");
        } else {
            println!("No chat {id}");
        }
        return Ok(());
    }

    if let Some([id, name]) = rename.as_deref() {
        store.rename(id, name).await?;
        println!("Renamed chat {id} to {name}");
        return Ok(());
    }

    let chats = store.list().await?;
    if chats.is_empty() {
        println!("No chats in {}", store.root().display());
        return Ok(());
    }
    for chat in chats {
        println!(
            "{}  {:<6} {:>7} tokens  {}",
            chat.id,
            chat.mode.key(),
            chat.tokens,
            chat.name.as_deref().unwrap_or("(unnamed)")
        );
    }
    Ok(())
}
