//! Sensor Fusion Example
//!
//! Two sensors on a "field" partition are zipped into a comfort reading,
//! shipped to a "fusion" partition, and converted by a unit behavior that an
//! operator can swap at runtime. The session is recorded and then replayed
//! into a fresh network to check that it reproduces the same output.
//!
//! Run with `RUST_LOG=tempora_hub=debug` to watch partitions and installs.

use std::error::Error;
use std::thread;
use std::time::{Duration, Instant};
use tempora_core::{
    Batch, Behavior, Catalog, Clock, Latency, ManualClock, PartitionId, Record, Shape, Value,
    Watermark,
};
use tempora_hub::{
    Network, NetworkConfig, OutputHandle, PartitionConfig, PartitionState, RunningNetwork,
};
use tempora_journal::{Auditor, Recorder, Replayer};
use tracing::{info, warn};

fn int_of(v: &Value) -> i64 {
    v.as_int().unwrap_or(0)
}

/// Conversions the operator can select by name
fn units() -> Catalog {
    Catalog::new()
        .with("celsius", Behavior::map("celsius", "int", |v: &Value| v.clone()))
        .with(
            "fahrenheit",
            Behavior::map("fahrenheit", "int", |v: &Value| Value::Int(int_of(v) * 9 / 5 + 32)),
        )
        .with(
            "kelvin",
            Behavior::map("kelvin", "int", |v: &Value| Value::Int(int_of(v) + 273)),
        )
}

fn behavior() -> Behavior {
    // (temperature, humidity) on the field, fused and shipped for conversion
    let fuse = Behavior::zip()
        .then(Behavior::map("comfort", "int", |v: &Value| {
            let (t, h) = v.as_pair().map(|(t, h)| (int_of(t), int_of(h))).unwrap_or((0, 0));
            Value::Int(t - (100 - h) / 10)
        }))
        .then(Behavior::cross("fusion"));

    Behavior::second(fuse)
        .then(Behavior::dynamic(units(), Shape::leaf("fusion", "int"), Latency::new(0, 1)))
        .then(Behavior::observe("display", |records: &[Record<Value>], stability: Watermark| {
            for record in records {
                match record.update.value() {
                    Some(v) => info!(time = record.time, %stability, "comfort {}", v),
                    None => info!(time = record.time, "no unit selected"),
                }
            }
        }))
}

fn input() -> Shape {
    Shape::product(
        Shape::leaf("fusion", "name"),
        Shape::product(Shape::leaf("field", "int"), Shape::leaf("field", "int")),
    )
}

/// Wait for the output to become final; `false` if a partition stopped first
/// or it took too long
fn settle(running: &RunningNetwork, output: &OutputHandle, partitions: &[PartitionId]) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !output.stability().is_final() {
        let stopped = partitions
            .iter()
            .any(|p| matches!(running.state(p), Ok(PartitionState::Stopped)));
        if stopped || Instant::now() > deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    true
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    println!("=== Tempora Sensor Fusion Example ===\n");

    let config = NetworkConfig::default().with_partition("fusion", PartitionConfig::with_queue_capacity(8));
    let network = Network::build(&behavior(), &input(), config.clone())?;
    let partitions: Vec<PartitionId> = network.partition_ids().cloned().collect();
    println!("Partitions: {:?}", partitions);

    let running = network.spawn()?;
    let (unit, temperature, humidity) = (running.input(0)?, running.input(1)?, running.input(2)?);
    let output = running.output(0)?;
    let clock = ManualClock::starting_at(0);
    let mut recorder = Recorder::labelled("sensor_fusion");

    recorder.push(&unit, Batch::new(vec![Record::of(0, "celsius")], Watermark::At(0)))?;
    for step in 0..12i64 {
        let now = clock.now();
        recorder.push(
            &temperature,
            Batch::new(vec![Record::of(now, 18 + step % 5)], Watermark::At(now)),
        )?;
        recorder.push(
            &humidity,
            Batch::new(vec![Record::of(now, 40 + 3 * step)], Watermark::At(now)),
        )?;
        if step == 5 {
            recorder.push(&unit, Batch::new(vec![Record::of(now, "fahrenheit")], Watermark::At(now)))?;
        } else {
            unit.heartbeat_now(&clock)?;
            recorder.record(unit.index(), &Batch::heartbeat(Watermark::At(now)));
        }
        clock.advance(10);
    }
    recorder.push(&unit, Batch::new(vec![Record::of(clock.now(), "kelvin")], Watermark::Final))?;
    recorder.push(&temperature, Batch::heartbeat(Watermark::Final))?;
    recorder.push(&humidity, Batch::heartbeat(Watermark::Final))?;

    if !settle(&running, &output, &partitions) {
        warn!(stability = %output.stability(), "output never became final");
        running.halt();
        running.join()?;
        return Err("sensor fusion did not finish".into());
    }
    println!("\nFused output:");
    for record in output.poll().records {
        match record.update.value() {
            Some(v) => println!("  t={:>4}  {}", record.time, v),
            None => println!("  t={:>4}  -", record.time),
        }
    }

    running.halt();
    running.join()?;

    let recording = recorder.finish(&[output]);
    println!("\n{}", Auditor::new(&recording).generate_report());

    let mut fresh = Network::build(&behavior(), &input(), config)?;
    let report = Replayer::new(&recording).verify(&mut fresh)?;
    println!("Replay: {}", report);
    Ok(())
}
