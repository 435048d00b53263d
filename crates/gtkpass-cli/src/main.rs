use std::convert::Infallible;
use std::thread;
use std::time::Duration;

use gtkpass_core::observability::init_tracing;
use gtkpass_core::{PasswordEntry, RunnerConfig, TaskRunner};
use tracing::info;

/// Stand-in for a slow store operation (decrypting an entry, reading a file).
fn long_running_task((task_id, duration): (u64, Duration)) -> Result<String, Infallible> {
    info!(task_id, ?duration, "task starting");
    thread::sleep(duration);
    Ok(format!(
        "Task {task_id}: completed after {:.1}s",
        duration.as_secs_f64()
    ))
}

/// Placeholder list data, the same the list view shows today.
fn load_entries() -> Vec<PasswordEntry> {
    vec![
        PasswordEntry::new("GitHub", "github.gpg").with_subtitle("user@example.com"),
        PasswordEntry::new("Mail", "mail/personal.gpg").with_subtitle("imap.example.com"),
        PasswordEntry::new("Router", "home/router.gpg"),
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // (A) runner を用意（GTKPASS_* で上書き可能）
    let config = RunnerConfig::default().with_max_workers(3).merge_env()?;
    let runner = TaskRunner::from_config(config)?;

    // (B) scope に入る = ワーカー起動
    let armed = runner.enter()?;
    println!("Runner armed with {} workers\n", armed.capacity());

    // (C) 仕事を投入（submit はすぐ返る）
    let entries = armed.submit_infallible(load_entries)?;
    let handles = (1..=5u64)
        .map(|i| armed.submit_with(long_running_task, (i, Duration::from_millis(500 * i))))
        .collect::<Result<Vec<_>, _>>()?;
    println!("Submitted {} tasks; they run on background threads", handles.len() + 1);

    // (D) 結果を受け取る。UI なら await してから UI スレッドに戻す
    println!("\nEntries:");
    for entry in entries.join_async().await? {
        println!("  - {entry}");
    }

    println!("\nWaiting for all tasks to complete...");
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.join_async().await?);
    }
    for result in &results {
        println!("  - {result}");
    }
    println!("\ncounts: {}", serde_json::to_string(&armed.counts())?);

    // (E) scope を抜ける = drain してワーカー解放（drop でも同じ）
    tokio::task::block_in_place(|| armed.exit())?;
    println!("Runner disarmed");
    Ok(())
}
