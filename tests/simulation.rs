use batch_cache::prelude::*;
use batch_cache::test::init_tracing;
use batch_cache::test::simulation::ScriptWriter;
use batch_cache::test::simulation::Simulation;

#[tokio::test]
async fn simulation_several_seeds() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    for seed in [1, 42, 2024, 31337] {
        let script = ScriptWriter::builder()
            .seed(seed)
            .steps(600)
            .initial_records(30)
            .build()
            .expect("script writer")
            .create();
        let mut sim = Simulation::new(&script.initial);
        let report = sim.run(&script).await?;

        assert_eq!(report.steps, 600, "seed {seed}");
        assert!(report.saves > 0, "seed {seed}: no saves");
        assert_eq!(sim.plain().records(), sim.backend().records(), "seed {seed}");
        assert!(!sim.cache().has_changes(), "seed {seed}");
    }

    Ok(())
}

#[tokio::test]
async fn simulation_with_frequent_failures() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let script = ScriptWriter::builder()
        .seed(7)
        .steps(800)
        .failure_rate(0.9)
        .build()
        .expect("script writer")
        .create();
    let mut sim = Simulation::new(&script.initial);
    let report = sim.run(&script).await?;

    assert!(report.failed_saves > 0);
    assert_eq!(sim.plain().records(), sim.backend().records());
    for record in sim.backend().records() {
        if let Some(state) = sim.cache().state_of(&record.id) {
            assert_eq!(state, ItemState::Unchanged, "record {}", record.id);
        }
    }

    Ok(())
}
