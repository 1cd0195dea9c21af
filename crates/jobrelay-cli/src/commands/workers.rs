//! Worker inspection commands.

use anyhow::Result;

use crate::client::ApiClient;

pub async fn list(client: &ApiClient) -> Result<()> {
    let body = client.list_workers().await?;
    let workers = body["workers"].as_array().cloned().unwrap_or_default();
    if workers.is_empty() {
        println!("No workers registered");
        return Ok(());
    }

    println!("{:<38} {:<24} {:<8} LAST HEARTBEAT", "ID", "HOSTNAME", "STATUS");
    for worker in workers {
        println!(
            "{:<38} {:<24} {:<8} {}",
            worker["id"].as_str().unwrap_or("-"),
            worker["hostname"].as_str().unwrap_or("-"),
            worker["status"].as_str().unwrap_or("-"),
            worker["last_heartbeat"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}
