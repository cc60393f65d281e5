use std::sync::Arc;
use std::time::{Duration, Instant};

use channel_coord::channel::Channel;
use channel_coord::config::ChannelConfig;
use channel_coord::local::{LocalMerchant, LocalWorld};
use channel_coord::model::*;
use channel_coord::scheduler::Scheduler;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn channel() -> Arc<Channel> {
    Channel::start(
        ChannelKey::new(0, 1),
        ChannelConfig::default(),
        LocalWorld::new().collaborators(),
        Scheduler::new(),
    )
}

/// Many tasks churning acquire/release on the solo pool.
async fn dojo_churn(ch: Arc<Channel>, tasks: usize, rounds: usize) {
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..tasks {
        let ch = ch.clone();
        handles.push(tokio::spawn(async move {
            let mut lat = Vec::with_capacity(rounds);
            let mut exhausted = 0usize;
            for _ in 0..rounds {
                let t = Instant::now();
                match ch.dojo_acquire(Pool::Solo, None, 0).await {
                    Ok(slot) => {
                        lat.push(t.elapsed());
                        ch.dojo_release(Pool::Solo, slot, None).await;
                    }
                    Err(_) => exhausted += 1,
                }
            }
            (lat, exhausted)
        }));
    }

    let mut all = Vec::new();
    let mut exhausted = 0;
    for h in handles {
        if let Ok((lat, ex)) = h.await {
            all.extend(lat);
            exhausted += ex;
        }
    }
    let elapsed = start.elapsed();
    let ops = (tasks * rounds) as f64 / elapsed.as_secs_f64();
    println!("  {} acquires in {:.2}s = {ops:.0} ops/sec, {exhausted} exhausted", tasks * rounds, elapsed.as_secs_f64());
    print_latency("acquire", &mut all);
}

/// Queue pushes racing status reads across both venues.
async fn wedding_mix(ch: Arc<Channel>, writers: usize, per_writer: u32) {
    let start = Instant::now();
    let mut handles = Vec::new();
    for w in 0..writers as u32 {
        let ch = ch.clone();
        handles.push(tokio::spawn(async move {
            let mut lat = Vec::new();
            for i in 0..per_writer {
                let id = w * per_writer + i;
                let venue = if id % 2 == 0 { Venue::Chapel } else { Venue::Cathedral };
                let t = Instant::now();
                let _ = ch.wedding_push(venue, id, false, id, id + 1).await;
                let _ = ch.wedding_status(venue, id).await;
                lat.push(t.elapsed());
            }
            lat
        }));
    }
    let mut all = Vec::new();
    for h in handles {
        if let Ok(lat) = h.await {
            all.extend(lat);
        }
    }
    println!("  {} push+status pairs in {:.2}s", all.len(), start.elapsed().as_secs_f64());
    print_latency("push+status", &mut all);
}

/// Readers on the merchant registry while one writer churns it, then a drain.
async fn merchant_readers(ch: Arc<Channel>, readers: usize, rounds: usize) {
    let registry = ch.merchants().clone();
    for owner in 0..500 {
        registry.put(owner, LocalMerchant::new(owner)).await;
    }

    let writer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for owner in 500..1500 {
                registry.put(owner, LocalMerchant::new(owner)).await;
                registry.remove(owner - 500).await;
            }
        })
    };

    let mut handles = Vec::new();
    for r in 0..readers {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let mut lat = Vec::with_capacity(rounds);
            for i in 0..rounds {
                let t = Instant::now();
                let _ = registry.get(((r * rounds + i) % 1500) as u32).await;
                lat.push(t.elapsed());
            }
            lat
        }));
    }
    let mut all = Vec::new();
    for h in handles {
        if let Ok(lat) = h.await {
            all.extend(lat);
        }
    }
    let _ = writer.await;
    print_latency("merchant get", &mut all);

    let t = Instant::now();
    let closed = registry.drain_and_close_all().await;
    println!("  drained {closed} merchants in {:.3}ms", t.elapsed().as_secs_f64() * 1000.0);
}

#[tokio::main]
async fn main() {
    let tasks: usize = std::env::var("BENCH_TASKS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(64);

    println!("=== channel contention benchmark ===");
    println!("tasks: {tasks}\n");

    println!("[phase 1] dojo acquire/release churn");
    dojo_churn(channel(), tasks, 1_000).await;

    println!("\n[phase 2] wedding push/status mix");
    wedding_mix(channel(), tasks, 200).await;

    println!("\n[phase 3] merchant registry readers under writes");
    let ch = channel();
    merchant_readers(ch.clone(), tasks, 1_000).await;

    ch.shutdown().await;
    println!("\ndone");
}
