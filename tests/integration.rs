#![cfg(unix)]

use anyhow::Result;
use std::time::Duration;
use steerbench::config::load_sweep_config;
use steerbench::sweep::MainRunner;
use tempfile::tempdir;

use test_utils::TestPublisher;

fn sweep_file(endpoint: &str) -> String {
    format!(
        r#"
global:
  signal:
    endpoint: {endpoint}
    topic: mintclose
  vars:
    gpu: TestGPU
  options:
    settle_delay_ms: 0
    poll_interval_ms: 0
    drain: false
    silence_output: true
sweeps:
  - name: mint-steering
    parameter_lists:
      - var: zmq
        values: [ipc, tcp]
      - var: spout
        values: [gpu, memshare]
    producer:
      command: "echo rendering --zmq={{zmq}} --spout={{spout}}"
      conditional_args:
        - when: {{ spout: memshare }}
          args: "--image-size 3840 2160"
    consumer:
      command: "echo steering --latency-file=mint_steering_{{gpu}}_{{zmq}}+{{spout}}_0ms.txt"
"#
    )
}

#[test]
fn test_sweep_against_live_publisher() -> Result<()> {
    let publisher = TestPublisher::start("mintclose", "1", Duration::from_millis(20));
    let dir = tempdir()?;
    let config_path = dir.path().join("sweep.yml");
    std::fs::write(&config_path, sweep_file(publisher.endpoint()))?;

    let config = load_sweep_config(&config_path)?;
    let out_dir = dir.path().join("results");
    let runner = MainRunner::new(config, out_dir.clone())?;
    runner.run(None)?;
    drop(publisher);

    let results: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("mint-steering.json"))?)?;
    let configurations = results["configurations"].as_array().unwrap();
    assert_eq!(configurations.len(), 4);
    assert_eq!(configurations[0]["label"], "ipc x gpu");
    assert_eq!(configurations[3]["label"], "tcp x memshare");
    assert_eq!(
        configurations[1]["producer"]["command"],
        "echo rendering --zmq=ipc --spout=memshare --image-size 3840 2160"
    );
    assert_eq!(
        configurations[2]["consumer"]["command"],
        "echo steering --latency-file=mint_steering_TestGPU_tcp+gpu_0ms.txt"
    );
    assert!(out_dir.join("sweep.yml").is_file());
    assert!(out_dir.join("system_info").is_file());
    Ok(())
}

#[test]
fn test_sweep_waits_on_its_own_endpoint() -> Result<()> {
    let publisher = TestPublisher::start("mintclose", "1", Duration::from_millis(20));
    let dir = tempdir()?;
    let config_path = dir.path().join("sweep.yml");
    // Nothing publishes on the global endpoint
    let yaml = format!(
        r#"
global:
  signal:
    endpoint: tcp://127.0.0.1:1
  options:
    settle_delay_ms: 0
    poll_interval_ms: 0
    drain: false
    silence_output: true
sweeps:
  - name: unity-steering
    parameter_lists:
      - var: render_ms
        values: ["0", "10"]
    producer:
      command: "echo rendering --render-ms={{render_ms}}"
    consumer:
      command: "echo BaseSpoutInterop"
    signal:
      endpoint: {endpoint}
"#,
        endpoint = publisher.endpoint()
    );
    std::fs::write(&config_path, yaml)?;

    let config = load_sweep_config(&config_path)?;
    let out_dir = dir.path().join("results");
    MainRunner::new(config, out_dir.clone())?.run(Some("unity-steering"))?;
    drop(publisher);

    let results: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("unity-steering.json"))?)?;
    assert_eq!(results["configurations"].as_array().unwrap().len(), 2);
    Ok(())
}

#[test]
fn test_unknown_sweep_name_fails_before_launching() -> Result<()> {
    let dir = tempdir()?;
    let config_path = dir.path().join("sweep.yml");
    std::fs::write(&config_path, sweep_file("tcp://127.0.0.1:1"))?;

    let config = load_sweep_config(&config_path)?;
    let runner = MainRunner::new(config, dir.path().join("results"))?;
    assert!(runner.run(Some("unity-steering")).is_err());
    Ok(())
}
