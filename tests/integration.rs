use ecolab::analysis::{RunResults, aggregate_counts};
use ecolab::environment::{Environment, Grid};
use ecolab::model::{Agent, Fish, FishParams, PathogenParams};
use ecolab::simulation::{Admission, run};
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::{env, fs, fs::File, io::BufReader, path::PathBuf, process::Command};

#[test]
fn basic_workflow() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("basic_workflow");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_path = test_dir.join("config.toml");
    let config_contents = String::new()
        + "[env]\n"
        + "width = 60\n"
        + "height = 60\n"
        + "\n"
        + "[fish]\n"
        + "speed = 2.5\n"
        + "\n"
        + "[pathogen]\n"
        + "infection_rate = 0.4\n"
        + "mortality_rate = 0.35\n"
        + "\n"
        + "[init]\n"
        + "n_fish = 65\n"
        + "n_fish_infected = 10\n"
        + "\n"
        + "[run]\n"
        + "n_iterations = 150\n"
        + "seed = 12345\n";

    fs::write(&config_path, config_contents).expect("failed to write config file");

    fn run_bin(args: &[&str]) {
        let bin = PathBuf::from(env!("CARGO_BIN_EXE_ecolab"));

        let output = Command::new(bin)
            .args(args)
            .output()
            .expect("failed to execute command");

        let stdout_str =
            std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
        let stderr_str =
            std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

        assert!(
            output.status.success(),
            "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
        );
    }

    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    run_bin(&["--sim-dir", test_dir_str, "create"]);
    run_bin(&["--sim-dir", test_dir_str, "create"]);

    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "0"]);
    run_bin(&["--sim-dir", test_dir_str, "resume", "--run-idx", "1"]);

    run_bin(&["--sim-dir", test_dir_str, "analyze"]);

    let results_file = test_dir.join("run-0000").join("results.msgpack");
    let reader = BufReader::new(File::open(&results_file).expect("failed to open results"));
    let results: RunResults = rmp_serde::from_read(reader).expect("failed to read results");
    assert!(!results.counts.is_empty());
    assert!(results.counts.len() <= 300);
    assert!(results.tally.infected >= 10);
    assert!(test_dir.join("summary.msgpack").exists());

    // Same seed, same trajectory.
    assert_eq!(
        fs::read(test_dir.join("run-0000").join("trajectory-0000.msgpack")).unwrap(),
        fs::read(test_dir.join("run-0001").join("trajectory-0000.msgpack")).unwrap()
    );

    run_bin(&["--sim-dir", test_dir_str, "clean"]);
    assert!(!test_dir.join("run-0000").exists());
    assert!(!test_dir.join("summary.msgpack").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn rejects_invalid_config() {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("rejects_invalid_config");

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    fs::write(
        test_dir.join("config.toml"),
        "[env]\nwidth = 10\nheight = 10\n[fish]\nspeed = 0.0\n[init]\nn_fish = 1\nn_fish_infected = 0\n[run]\nn_iterations = 5\n",
    )
    .expect("failed to write config file");

    let output = Command::new(env!("CARGO_BIN_EXE_ecolab"))
        .args(["--sim-dir", test_dir.to_str().unwrap(), "create"])
        .output()
        .expect("failed to execute command");
    assert!(!output.status.success());
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn library_run_records_every_iteration() {
    let grid = Grid::new(50, 50).unwrap();
    let mut rng = ChaCha12Rng::seed_from_u64(31);

    let mut agents = Vec::new();
    for _ in 0..40 {
        let pos = grid.get_random_location(&mut rng).unwrap();
        agents.push(Agent::Fish(Fish::new(pos, FishParams::default()).unwrap()));
    }
    let strain = PathogenParams::default();
    for _ in 0..10 {
        let pos = grid.get_random_location(&mut rng).unwrap();
        let fish = Fish::new_infected(pos, FishParams::default(), strain, &mut rng).unwrap();
        agents.push(Agent::Fish(fish));
    }

    let out = run(&grid, agents, 200, true, Admission::Buffered, &mut rng).unwrap();
    let counts = aggregate_counts(&out.record);
    assert_eq!(counts.len(), out.record.len());
    assert!(counts.len() <= 200);
    assert!(counts.iter().all(|c| c.fish <= 50));
    assert!(out.tally.exposed >= out.tally.dead_fish);
    assert!(out.tally.infected >= 10);
}
