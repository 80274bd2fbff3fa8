//! lua.ia terminal client: a REPL over the chat controller. Four modes,
//! streamed answers, regeneration, and a file editor driven by slash
//! commands.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::Result;
use chat_host::controller::ChatController;
use chat_host::ingest;
use chat_host::persistence::MessageStore;
use providers::gemini::GeminiClient;
use shared::chat::{AppMode, ChatMessage, ChatRole};

const HELP: &str = "commands:
  /mode <lua|image|file|general>   switch conversation mode
  /load <path>                     upload a file (editor content or image attachment)
  /regen                           regenerate the last AI answer
  /code                            show the current file editor content
  /clear                           clear this mode's history
  /quit                            exit";

fn parse_mode(name: &str) -> Option<AppMode> {
    match name {
        "lua" | "lua_chat" => Some(AppMode::LuaChat),
        "image" | "image_gen" => Some(AppMode::ImageGen),
        "file" | "file_editor" => Some(AppMode::FileEditor),
        "general" | "general_chat" => Some(AppMode::GeneralChat),
        _ => None,
    }
}

fn print_message(msg: &ChatMessage) {
    let tag = match msg.role {
        ChatRole::User => "you",
        ChatRole::Ai => "lua.ia",
        ChatRole::System => "*",
    };
    println!("[{}] {}", tag, msg.text);
    if let Some(code) = &msg.code {
        println!("--- code ---\n{}\n------------", code);
    }
    if let Some(url) = &msg.image_url {
        let shown: String = url.chars().take(64).collect();
        println!("  image: {}{}", shown, if url.len() > 64 { "…" } else { "" });
    }
    if let Some(sources) = &msg.sources {
        for source in sources {
            println!(
                "  source: {} ({})",
                source.title.as_deref().unwrap_or("untitled"),
                source.uri.as_deref().unwrap_or("no uri")
            );
        }
    }
}

/// Print everything past `shown` and advance it.
fn print_new(controller: &ChatController<GeminiClient>, shown: &mut usize) {
    let messages = controller.messages();
    for msg in messages.iter().skip(*shown) {
        print_message(msg);
    }
    *shown = messages.len();
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let gateway = GeminiClient::new()?;
    let store = MessageStore::open();
    let mut controller = ChatController::new(gateway, store);

    println!("lua.ia — {}", controller.mode().display_name());
    println!("{}", HELP);
    let mut shown = 0;
    print_new(&controller, &mut shown);

    // The last uploaded image waits here until the next prompt uses it.
    let mut pending_image = None;

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = stdin.lock().lines().next() else {
            break;
        };
        let line = line?;
        let input = line.trim();

        if let Some(rest) = input.strip_prefix('/') {
            let mut parts = rest.splitn(2, ' ');
            let command = parts.next().unwrap_or_default();
            let arg = parts.next().unwrap_or_default().trim();
            match command {
                "quit" | "exit" => break,
                "help" => println!("{}", HELP),
                "mode" => match parse_mode(arg) {
                    Some(mode) => {
                        controller.set_mode(mode);
                        println!("-- {} --", mode.display_name());
                        shown = 0;
                        print_new(&controller, &mut shown);
                    }
                    None => println!("unknown mode: {:?} (lua|image|file|general)", arg),
                },
                "clear" => {
                    controller.clear();
                    shown = 0;
                    print_new(&controller, &mut shown);
                }
                "code" => match controller.file_editor().name.as_deref() {
                    Some(name) => {
                        println!("--- {} ---\n{}", name, controller.file_editor().content)
                    }
                    None => println!("no file loaded"),
                },
                "load" => match ingest::read_file(Path::new(arg)) {
                    Ok(file) if file.is_image() => {
                        println!("attached image {} to the next prompt", file.name);
                        pending_image = Some(file);
                    }
                    Ok(file) => {
                        if let Err(e) = controller.upload_file(file) {
                            tracing::warn!(error = %e, "upload rejected");
                        }
                        print_new(&controller, &mut shown);
                    }
                    Err(e) => println!("could not read {}: {:#}", arg, e),
                },
                "regen" => {
                    let last_ai = controller
                        .messages()
                        .iter()
                        .rev()
                        .find(|m| m.role == ChatRole::Ai)
                        .map(|m| m.id.clone());
                    match last_ai {
                        Some(id) => {
                            // Regeneration rewrites the tail of the list.
                            if let Err(e) = controller.regenerate(&id).await {
                                println!("{}", e);
                            }
                            shown = 0;
                            println!("----");
                            print_new(&controller, &mut shown);
                        }
                        None => println!("nothing to regenerate"),
                    }
                }
                other => println!("unknown command: /{}", other),
            }
            continue;
        }

        if input.is_empty() && pending_image.is_none() {
            continue;
        }
        if let Err(e) = controller.send(input, pending_image.take()).await {
            println!("{}", e);
        }
        print_new(&controller, &mut shown);
    }

    Ok(())
}
