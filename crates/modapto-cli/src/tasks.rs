//! Offline listing of stored scheduled tasks.

use modapto_storage::{ModaptoStorage, TaskStore};

pub async fn run_tasks(task_type: String, page: u32, size: u32) -> anyhow::Result<()> {
    let config = modapto_config::load_config()?;
    let storage = ModaptoStorage::open(&config.database_path()?)?;
    let store = storage.task_store();

    let size = size.max(1);
    let total = store.count_by_type(&task_type).await?;
    let tasks = store
        .find_by_type(&task_type, u64::from(page) * u64::from(size), size)
        .await?;

    println!("{task_type}: {total} task(s), page {page}");
    if tasks.is_empty() {
        println!("  (none)");
        return Ok(());
    }
    for task in tasks {
        println!(
            "  {}  every {:<12} module={} service={} next={}",
            task.id.as_deref().unwrap_or("-"),
            task.frequency.to_string(),
            task.module_id,
            task.smart_service_id,
            task.next_execution_time.to_rfc3339(),
        );
    }
    Ok(())
}
