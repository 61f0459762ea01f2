//! Basic example: one registry over an in-memory store and a file store.

use cache_mux::backend::{FileBackend, FileConfig, MemoryBackend};
use cache_mux::{Error, Registry, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize, Debug)]
struct Employment {
    id: String,
    employer_name: String,
    salary: f64,
}

/// Stand-in for a slow database query.
fn load_employment(id: &str) -> Employment {
    println!("  [DB] Loading employment: {}", id);
    Employment {
        id: id.to_string(),
        employer_name: "Acme Corp".to_string(),
        salary: 75000.0,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Cache Mux - Basic Example ===\n");

    // 1. Build the registry; the first store added is the default
    println!("1. Registering memory and file stores...");
    let memory = MemoryBackend::new();
    let files = FileBackend::new(FileConfig::new(std::env::temp_dir().join("cache-mux-demo"))).await?;
    let cache: Registry = Registry::new().extend(memory.clone()).extend(files);
    println!("   ✓ Stores ready: {:?}\n", cache.names());

    // 2. Plain set/get with a ttl
    println!("2. Set and get:");
    cache
        .set("greeting", &"hello".to_string(), Duration::from_secs(60))
        .await?;
    let greeting: String = cache.get("greeting").await?;
    println!("   ✓ greeting = {}\n", greeting);

    // 3. Remember: the loader only runs on a miss
    println!("3. Remember (first call misses, second hits):");
    for _ in 0..2 {
        let emp = cache
            .remember("emp_001", Duration::from_secs(300), || {
                load_employment("emp_001")
            })
            .await?;
        println!("   ✓ {} at {} (${:.2})", emp.id, emp.employer_name, emp.salary);
    }
    println!();

    // 4. Counters keep their type and never wrap
    println!("4. Counters:");
    cache.increment("visits", 1).await?;
    cache.increment("visits", 41).await?;
    println!("   ✓ visits = {}", cache.get::<i64>("visits").await?);

    cache.set("small", &u32::MAX, Duration::ZERO).await?;
    match cache.increment("small", 1).await {
        Err(Error::Overflow) => println!("   ✓ u32::MAX + 1 rejected with Overflow\n"),
        other => println!("   ✗ unexpected result: {:?}\n", other),
    }

    // 5. Pull: read once, then gone
    println!("5. Pull:");
    cache.set("job", &"send-email".to_string(), Duration::ZERO).await?;
    let job: String = cache.pull("job").await?;
    println!("   ✓ pulled {}, still present: {}\n", job, cache.has("job").await?);

    // 6. Address the file store by name
    println!("6. Disk view:");
    let disk = cache.disk("file");
    disk.set("greeting", &"persisted".to_string(), Duration::ZERO)
        .await?;
    println!(
        "   ✓ memory says {:?}, file says {:?}",
        cache.get::<String>("greeting").await?,
        disk.get::<String>("greeting").await?
    );
    disk.clear().await?;

    match cache.disk("redis").get::<String>("greeting").await {
        Err(e) if e.is_fatal() => println!("   ✓ unknown store rejected: {}\n", e),
        other => println!("   ✗ unexpected result: {:?}\n", other),
    }

    // 7. Shut the sweep task down
    memory.log_stats().await;
    memory.close().await;
    println!("=== Done ===\n");

    Ok(())
}
