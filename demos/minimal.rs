use nanorand::{WyRand, RNG};
use runlog::{
    backend::{FileStorage, FileStorageOptions},
    tracking::{MetricsLogger, Recorder},
    Observer, RunDescriptor, Value,
};

fn main() {
    const EXPERIMENT: &str = "my_experiment";
    let base_dir = std::env::temp_dir().join("runlog-minimal");
    let mut recorder = Recorder::new(FileStorage::new(&base_dir, FileStorageOptions::default()));

    for i in 0..3 {
        let descriptor = RunDescriptor {
            experiment: vec![("name", EXPERIMENT)].into_iter().collect(),
            command: "main".to_owned(),
            host: Value::map(),
            config: vec![("i", i), ("constant", 42)].into_iter().collect(),
            meta: Value::map(),
        };
        let id = recorder
            .started_event(&descriptor, runlog::timestamp(), None)
            .expect("Could not start the run");
        println!("Executing run {}", id);

        let mut metrics = MetricsLogger::new();
        let mut rng = WyRand::new_seed(i as u64);
        let mut last = 0.0;
        for _ in 0..10 {
            let int: f64 = rng.generate::<u16>().into();
            let max: f64 = std::u16::MAX.into();
            last = int / max;
            metrics.log_scalar("rand", last, None);
        }
        metrics
            .submit(&mut recorder)
            .expect("Could not submit the metrics");

        let result: Value = vec![("rand", last)].into_iter().collect();
        recorder
            .completed_event(runlog::timestamp(), result)
            .expect("Could not complete the run");
    }
    println!("Runs recorded under {}", base_dir.join(EXPERIMENT).display());
}
