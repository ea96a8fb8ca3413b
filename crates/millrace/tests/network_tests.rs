//! Multi-stage network properties: conservation of flow through a
//! tandem line, the service-time lower bound on cycle time, and
//! bottleneck dominance.

use millrace::prelude::*;
use millrace::Simulation;

const STATION_IDS: [u64; 3] = [1, 2, 3];

/// Three stations in series with exponential service at the given means.
fn tandem_process(means: [f64; 3]) -> ProcessSpec {
    let mut process = ProcessSpec::new(ProcessId::new(1), "tandem", "job");
    for (id, mean) in STATION_IDS.iter().zip(means) {
        process = process.step(Step::Service {
            demands: vec![ResourceDemand::one(ResourceId::new(*id))],
            duration: Distribution::Exponential { rate: 1.0 / mean },
            routes: vec![],
        });
    }
    process
}

fn tandem_builder(means: [f64; 3], source: SourceSpec) -> ModelBuilder {
    let mut builder = ModelBuilder::new();
    for (n, id) in STATION_IDS.iter().enumerate() {
        builder = builder.resource(ResourceSpec::new(
            ResourceId::new(*id),
            format!("station{}", n + 1),
            1,
        ));
    }
    builder.process(tandem_process(means)).source(source)
}

#[test]
fn tandem_conserves_flow() {
    // 200 jobs arrive on a fixed schedule; the horizon is generous
    // enough for the line to drain, so every station must have served
    // exactly the 200 jobs that entered station 1.
    let batches: Vec<ArrivalBatch> = (0..200)
        .map(|n| ArrivalBatch {
            time: 2.0 * f64::from(n),
            quantity: 1,
        })
        .collect();
    let source = SourceSpec::new(SourceId::new(1), "job", ArrivalPattern::Schedule { batches });

    let model = tandem_builder([0.2, 1.0, 0.2], source)
        .horizon(5_000.0)
        .build()
        .expect("valid model");
    let stats = Simulation::from_raw_seed(model, 0x7A4De3).run();

    assert_eq!(stats.entities_created, 200);
    assert_eq!(stats.entities_departed, 200);
    for station in &stats.resources {
        assert_eq!(
            station.seize_count, 200,
            "{} served a different count than station 1",
            station.name
        );
    }
}

#[test]
fn cycle_time_is_bounded_below_by_total_service() {
    // Mean cycle time can never beat the sum of mean service times.
    let source = SourceSpec::new(
        SourceId::new(1),
        "job",
        ArrivalPattern::Poisson { rate: 0.8 },
    );
    let model = tandem_builder([0.2, 1.0, 0.2], source)
        .horizon(20_000.0)
        .warmup(1_000.0)
        .build()
        .expect("valid model");
    let stats = Simulation::from_raw_seed(model, 0x5EA1).run();

    let total_service = 0.2 + 1.0 + 0.2;
    assert!(
        stats.cycle_time.mean >= total_service,
        "mean cycle {} beat the service-time floor {total_service}",
        stats.cycle_time.mean
    );
}

#[test]
fn slowest_station_dominates_waiting() {
    // Service means (0.2, 1.0, 0.2) at arrival rate 0.8: the middle
    // station runs at rho = 0.8 while its neighbors idle at 0.16, so
    // its mean wait must strictly exceed both.
    let source = SourceSpec::new(
        SourceId::new(1),
        "job",
        ArrivalPattern::Poisson { rate: 0.8 },
    );
    let model = tandem_builder([0.2, 1.0, 0.2], source)
        .horizon(20_000.0)
        .warmup(1_000.0)
        .build()
        .expect("valid model");
    let stats = Simulation::from_raw_seed(model, 0xB077).run();

    let waits: Vec<f64> = stats.resources.iter().map(|r| r.wait_time.mean).collect();
    assert!(
        waits[1] > waits[0] && waits[1] > waits[2],
        "bottleneck wait {} does not dominate ({} and {})",
        waits[1],
        waits[0],
        waits[2]
    );
    // And not marginally: the load gap is enormous.
    assert!(waits[1] > 5.0 * waits[0]);
    assert!(waits[1] > 5.0 * waits[2]);
}
