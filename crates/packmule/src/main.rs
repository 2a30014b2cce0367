//! packmule: low-bandwidth asynchronous bundle synchronizer.
//!
//! Monitors a local bundle store and trickles its contents over a narrow,
//! lossy radio link, one ~200-byte frame per second, while reassembling what
//! neighbours are trickling at us. Small direct messages are prioritized so
//! nearby nodes converge quickly.
//!
//! All protocol state lives in [`packmule_proto::Engine`]; this binary owns
//! the serial port, the inbox directory, the HTTP store client, and the tick
//! loop that drives them.

mod inbox;
mod serial;
mod store;

use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context as _};
use clap::Parser;
use packmule_proto::{
    engine::{Engine, EngineConfig},
    id::Sid,
    store::BundleStore,
};
use rand::{rngs::SmallRng, Rng as _, SeedableRng as _};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about = "Low-bandwidth asynchronous bundle synchronizer")]
struct Args {
    /// Bundle store endpoint, e.g. `http://127.0.0.1:4110`
    store_endpoint: String,
    /// Bearer credential for the store endpoint
    credential: String,
    /// Our node identifier, 64 hex digits
    my_sid: String,
    /// Radio serial port, e.g. `/dev/ttyUSB0`
    serial_port: String,
    /// Extra modes: `monitor` (receive only), `pieces` (verbose piece logs)
    modes: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut monitor = false;
    let mut log_pieces = false;
    for mode in &args.modes {
        match mode.to_ascii_lowercase().as_str() {
            "monitor" => monitor = true,
            "pieces" => log_pieces = true,
            other => bail!("unknown mode '{other}'"),
        }
    }

    let default_filter = if log_pieces {
        "info,packmule_proto=trace"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let sid: Sid = args.my_sid.parse().context("parsing our SID")?;
    info!("my SID prefix is {}", sid.prefix());

    let mut link = serial::SerialLink::open(&args.serial_port)
        .with_context(|| format!("setting up serial port {}", args.serial_port))?;
    info!(port = %args.serial_port, "serial port open");

    let mut store = store::HttpStore::new(&args.store_endpoint, &args.credential)
        .context("setting up store client")?;

    let mut engine = Engine::new(EngineConfig::default(), sid);
    if monitor {
        info!("monitor mode: receiving only");
    }
    run(&mut engine, &mut store, &mut link, monitor)
}

/// The tick loop. Single-threaded and cooperative: everything the engine
/// owns is mutated from here and nowhere else.
fn run(
    engine: &mut Engine,
    store: &mut store::HttpStore,
    link: &mut serial::SerialLink,
    monitor: bool,
) -> anyhow::Result<()> {
    let config = engine.config().clone();
    let mut rng = SmallRng::from_entropy();
    let mut inbox = inbox::Inbox::default();

    let started = Instant::now();
    let mut next_refresh = started;
    let mut next_update = started;
    let mut last_update = started;
    let mut next_summary = started + Duration::from_secs(1);

    loop {
        let now = Instant::now();

        // refresh the local inventory, but never block long: we still need
        // to hear the radio, and peers waste frames offering us bundles we
        // could already be ACKing
        if !monitor && now >= next_refresh {
            let deadline = config
                .update_interval
                .saturating_sub(now.duration_since(last_update))
                .clamp(config.refresh_deadline_min, config.refresh_deadline_max);
            match engine.refresh_inventory(store, deadline) {
                Ok(0) => {}
                Ok(new) => info!(new, "inventory refreshed"),
                Err(err) => warn!(%err, "inventory refresh failed"),
            }
            next_refresh = now + config.refresh_interval;
        }

        match inbox.drain(Path::new(".")) {
            Ok(frames) => {
                for frame in frames {
                    apply_frame(engine, store, now, &frame);
                }
            }
            Err(err) => debug!(%err, "inbox scan failed"),
        }

        match link.poll_frame() {
            Ok(Some(frame)) => apply_frame(engine, store, now, &frame),
            Ok(None) => {}
            // transient serial faults are logged, never fatal
            Err(err) => warn!(%err, "serial read failed"),
        }

        if now >= next_update {
            if !monitor {
                if let Some(frame) = engine.next_frame(now) {
                    if let Err(err) = link.send_frame(&frame) {
                        warn!(%err, "serial write failed");
                    }
                }
            }
            last_update = now;
            // jitter the next firing so co-located radios do not lock step
            let jitter_ms = config.update_jitter.as_millis() as u64;
            let jitter = if jitter_ms == 0 {
                Duration::ZERO
            } else {
                Duration::from_millis(rng.gen_range(0..jitter_ms))
            };
            next_update = now + config.update_interval + jitter;
        }

        if now >= next_summary {
            info!("{}", engine.summary());
            next_summary = now + Duration::from_secs(1);
        }

        thread::sleep(Duration::from_millis(10));
    }
}

fn apply_frame<S: BundleStore>(engine: &mut Engine, store: &mut S, now: Instant, frame: &[u8]) {
    if let Err(err) = engine.handle_frame(now, store, frame) {
        debug!(%err, len = frame.len(), "dropping frame");
    }
}
