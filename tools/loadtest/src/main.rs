// =============================================================================
// BEACON-SENTRY — Load Test Tool
// =============================================================================
// Generates semicolon-delimited tracking envelopes (spec §4.C wire format)
// and fires them at the engine's UDP ingest port at a configurable rate.
// Adapted from the ingestion server's own load-test tool: same counters
// struct, same rate-limiting loop, swapped from signed-protobuf-over-HTTP
// to plaintext-envelope-over-UDP (the engine has no HTTP ingest surface).
// =============================================================================

use clap::Parser;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

#[derive(Parser)]
#[command(name = "beacon-sentry-loadtest")]
#[command(about = "Load test tool for the beacon-sentry ingestion engine")]
struct Args {
    /// Engine UDP ingest address
    #[arg(long, default_value = "127.0.0.1:8888")]
    target: String,

    /// Envelopes per second
    #[arg(long, default_value_t = 500)]
    rate: u32,

    /// Duration in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Number of distinct tracked MAC addresses
    #[arg(long, default_value_t = 50)]
    macs: usize,

    /// Number of distinct beacon UUIDs to report against
    #[arg(long, default_value_t = 5)]
    beacons: usize,

    /// Fraction of records sent with panic=1, 0.0-1.0
    #[arg(long, default_value_t = 0.02)]
    panic_rate: f64,
}

struct Counters {
    sent: AtomicU64,
    network_error: AtomicU64,
}

impl Counters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            network_error: AtomicU64::new(0),
        }
    }
}

fn random_mac(rng: &mut impl Rng, pool_size: usize, idx_seed: usize) -> String {
    let idx = idx_seed % pool_size;
    format!("{:012x}", idx as u64 * 0x1111 + rng.gen_range(0..16))
}

fn fixed_width_uuid(beacon_idx: usize) -> String {
    // Coordinates live at byte offsets [12,20) and [24,32), 8-digit decimal
    // millimeters each (spec §3 / §6) — vary them per beacon index so the
    // load matches several distinct fence positions.
    let x = 1000 + beacon_idx * 100;
    let y = 2000 + beacon_idx * 50;
    format!("000000000000{:08}0000{:08}00000000", x, y)
}

fn build_tracking_envelope(
    rng: &mut impl Rng,
    now_secs: i64,
    macs: usize,
    beacons: usize,
    panic_rate: f64,
    tick: u64,
) -> String {
    let beacon_idx = (tick as usize) % beacons;
    let uuid = fixed_width_uuid(beacon_idx);
    let gateway_ip = format!("10.0.{}.1", beacon_idx % 256);
    let mac = random_mac(rng, macs, tick as usize);

    let init_ts = now_secs - rng.gen_range(1..5);
    let final_ts = now_secs;
    let rssi = rng.gen_range(-95..-40);
    let panic = if rng.gen_bool(panic_rate) { 1 } else { 0 };
    let battery = rng.gen_range(2000..4200);

    format!(
        "TRACK;{uuid};{gateway_ip};1;1;{mac};{init_ts};{final_ts};{rssi};{panic};{battery};"
    )
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();

    println!("=== beacon-sentry Load Test ===");
    println!("Target:   {}", args.target);
    println!("Rate:     {} env/s", args.rate);
    println!("Duration: {}s", args.duration);
    println!("MACs:     {}", args.macs);
    println!("Beacons:  {}", args.beacons);
    println!();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(&args.target).await?;

    let counters = Arc::new(Counters::new());
    let interval = Duration::from_micros(1_000_000 / args.rate as u64);
    let deadline = Instant::now() + Duration::from_secs(args.duration);

    println!("Sending...\n");
    let start = Instant::now();
    let mut rng = rand::thread_rng();
    let mut tick = 0u64;

    while Instant::now() < deadline {
        let now_secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let envelope = build_tracking_envelope(
            &mut rng,
            now_secs,
            args.macs,
            args.beacons,
            args.panic_rate,
            tick,
        );

        counters.sent.fetch_add(1, Ordering::Relaxed);
        if socket.send(envelope.as_bytes()).await.is_err() {
            counters.network_error.fetch_add(1, Ordering::Relaxed);
        }

        tick += 1;
        if tick % 2000 == 0 {
            let elapsed = start.elapsed().as_secs_f64();
            let sent = counters.sent.load(Ordering::Relaxed);
            println!(
                "  [{:.1}s] sent={} errors={} ({:.0} env/s)",
                elapsed,
                sent,
                counters.network_error.load(Ordering::Relaxed),
                sent as f64 / elapsed,
            );
        }

        let target = Duration::from_micros(tick * interval.as_micros() as u64);
        let actual = start.elapsed();
        if actual < target {
            tokio::time::sleep(target - actual).await;
        }
    }

    let elapsed = start.elapsed();
    let sent = counters.sent.load(Ordering::Relaxed);
    println!("\n=== Results ===");
    println!("Duration:   {:.2}s", elapsed.as_secs_f64());
    println!("Total sent: {}", sent);
    println!("Net errors: {}", counters.network_error.load(Ordering::Relaxed));
    println!("Throughput: {:.1} env/s", sent as f64 / elapsed.as_secs_f64());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_uuid_has_spec_shape() {
        let uuid = fixed_width_uuid(0);
        assert_eq!(uuid.len(), 40);
        assert_eq!(&uuid[12..20], "00001000");
        assert_eq!(&uuid[24..32], "00002000");
    }

    #[test]
    fn tracking_envelope_has_expected_field_count() {
        let mut rng = rand::thread_rng();
        let env = build_tracking_envelope(&mut rng, 1_700_000_000, 10, 3, 0.0, 7);
        assert!(env.starts_with("TRACK;"));
        assert_eq!(env.matches(';').count(), 11);
    }
}
