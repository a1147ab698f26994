//! Provision a GuerrillaMail address (random, or a chosen alias) and poll it.
//!
//! Usage: `cargo run --example poll -- [alias] [max_attempts] [interval_secs] [stop_domain]`
//!
//! Set `RUST_LOG=guerrillamail_poller=debug` to see every request.

use guerrillamail_poller::{Client, PollPolicy, Poller, StopReason};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let alias = args.next().filter(|a| a != "-");
    let max_attempts: u32 = args.next().map(|a| a.parse()).transpose()?.unwrap_or(12);
    let interval: u64 = args.next().map(|a| a.parse()).transpose()?.unwrap_or(10);
    let stop_domain = args.next();

    let mut client = Client::new()?;
    let address = match alias {
        Some(alias) => {
            client.acquire_session(&alias).await?;
            client.session().address().map(str::to_string)
        }
        None => client.new_random_address().await?,
    };
    let Some(address) = address else {
        eprintln!("The service did not assign an address");
        return Ok(());
    };
    println!("📬 Send an email to: {address}");

    let mut policy = PollPolicy::builder()
        .start_delay(Duration::from_secs(1))
        .max_attempts(max_attempts)
        .interval(Duration::from_secs(interval));
    if let Some(domain) = stop_domain {
        policy = policy.stop_domain(domain);
    }
    let policy = policy.build()?;

    let outcome = Poller::new(policy)
        .run(&mut client, |delivery| {
            println!("\n{}", "-".repeat(50));
            println!("Message ID:  {}", delivery.summary.id);
            println!("From:        {}", delivery.summary.from);
            println!("Subject:     {}", delivery.summary.subject);
            match &delivery.body {
                Ok(body) => {
                    for attachment in &body.attachments {
                        println!("Attachment:  {} ({})", attachment.file_name, attachment.download_url);
                    }
                    println!("\n{}", body.plain_text);
                }
                Err(e) => eprintln!("❌ Failed to fetch body: {e}"),
            }
        })
        .await;

    println!("\n{}", "=".repeat(50));
    match outcome.reason {
        StopReason::Matched { from, .. } => println!("✅ Mail from {from} received"),
        StopReason::Exhausted { attempts } => println!("⚠️  No matching mail after {attempts} attempt(s)"),
        StopReason::Error { attempt, error } => eprintln!("❌ Attempt {attempt} failed: {error}"),
    }

    Ok(())
}
