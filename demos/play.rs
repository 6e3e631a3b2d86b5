use anyhow::Result;
use nanorand::{WyRand, RNG};
use runlog::{
    api::error::EventError,
    backend::FileStorageOptions,
    config::StorageConfig,
    tracking::{MetricsLogger, Recorder},
    Observer, RunDescriptor, Value,
};
use std::path::PathBuf;

struct Args {
    experiment: String,
    dir: Option<PathBuf>,
    database: Option<PathBuf>,
    runs: u32,
    interrupt: bool,
}

impl Args {
    pub fn from_env() -> Result<Self> {
        let mut args = pico_args::Arguments::from_env();
        Ok(Args {
            experiment: args.value_from_str(["-e", "--experiment"])?,
            dir: args.opt_value_from_str(["-d", "--dir"])?,
            database: args.opt_value_from_str("--database")?,
            runs: args.opt_value_from_str(["-r", "--runs"])?.unwrap_or(1),
            interrupt: args.contains(["-i", "--interrupt"]),
        })
    }

    fn storage(&self) -> StorageConfig {
        match (&self.dir, &self.database) {
            (Some(dir), _) => StorageConfig::File {
                base_dir: dir.clone(),
                options: FileStorageOptions::default(),
            },
            (None, database) => StorageConfig::Database {
                path: database.clone(),
            },
        }
    }
}

fn main() -> Result<()> {
    let args = Args::from_env()?;
    let mut recorder = Recorder::from_config(&args.storage())?;

    for i in 0..args.runs {
        let descriptor = RunDescriptor {
            experiment: vec![("name", args.experiment.as_str())].into_iter().collect(),
            command: "play".to_owned(),
            host: vec![("hostname", "localhost")].into_iter().collect(),
            config: vec![("i", i)].into_iter().collect(),
            meta: Value::map(),
        };
        let id = recorder.queued_event(&descriptor, runlog::timestamp(), None)?;
        recorder.started_event(&descriptor, runlog::timestamp(), None)?;
        println!("Executing run {}", id);

        let mut metrics = MetricsLogger::new();
        let mut rng = WyRand::new_seed(i.into());
        let mut out = String::new();
        for s in 0..10 {
            let int: f64 = rng.generate::<u16>().into();
            let max: f64 = std::u16::MAX.into();
            let value = int / max;
            metrics.log_scalar("rand", value, Some(s));
            out.push_str(&format!("step {} rand {:.4}\n", s, value));
            if s % 5 == 4 {
                metrics.submit(&mut recorder)?;
                let info: Value = vec![("step", s)].into_iter().collect();
                recorder.heartbeat_event(info, &out, runlog::timestamp(), Value::Null)?;
            }
        }

        if args.interrupt {
            recorder.interrupted_event(runlog::timestamp(), "INTERRUPTED")?;
            // A second interrupt is refused, the run is already final.
            match recorder.interrupted_event(runlog::timestamp(), "INTERRUPTED") {
                Err(EventError::InvalidTransition { status, .. }) => {
                    println!("Run {} already ended as {}", id, status);
                }
                other => other?,
            }
        } else {
            recorder.completed_event(runlog::timestamp(), (i as i64).into())?;
        }
    }

    Ok(())
}
