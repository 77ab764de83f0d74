use std::error::Error;
use std::sync::Arc;

use todosync::push::InMemoryPlatform;
use todosync::{MemoryStore, Page, PushManager, SyncWorkerBuilder};

/// Interactive demo: each line becomes a task. `text +30` schedules a
/// reminder 30 seconds out (fired by the worker's next scan, so expect it
/// up to a minute late). An empty line exits.
#[tokio::main]
pub async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let (worker, handle) = SyncWorkerBuilder::new().build();
    worker.start();

    let store = Arc::new(MemoryStore::new());
    let push = PushManager::new(Arc::new(InMemoryPlatform::granted()));
    let page = Page::connect(store, handle.clone(), Some(push)).await;

    println!("todosync demo. `<text> [+seconds]` adds a task; empty line exits.");

    loop {
        let mut input = String::new();
        match std::io::stdin().read_line(&mut input) {
            Ok(_) => {
                let trimmed = input.trim();
                if trimmed.is_empty() {
                    break;
                }

                let (text, scheduled_for) = match trimmed.rsplit_once(" +") {
                    Some((text, secs)) => match secs.parse::<i64>() {
                        Ok(secs) => (text, Some(todosync::task::unix_ms() + secs * 1_000)),
                        Err(_) => (trimmed, None),
                    },
                    None => (trimmed, None),
                };

                match page.add_task(text, scheduled_for).await {
                    Ok(_) => {
                        for task in page.sorted_tasks() {
                            let when = match task.scheduled_for {
                                Some(at) => format!(" (reminder at {at})"),
                                None => String::new(),
                            };
                            println!("  [{}] {}{when}", if task.completed { "x" } else { " " }, task.text);
                        }
                    }
                    Err(error) => {
                        println!("error: {}", error);
                    }
                }

                for banner in page.take_banners() {
                    log::info!("{:?}: {}", banner.kind, banner.text);
                }
            }
            Err(error) => {
                println!("error: {}", error);
            }
        }
    }

    Ok(())
}
