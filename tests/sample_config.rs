use anyhow::Result;
use std::fs::File;
use std::io::BufReader;

use traffic_ctl::{
    config::{CollisionPolicy, SimulationConfig},
    session::{run_script, ControlSession, Response},
    simulation::PlacementState,
};

/// The configuration shipped at the repository root must stay loadable.
#[test]
fn test_sample_configuration_loads() -> Result<()> {
    let config = SimulationConfig::load_from_files("network.toml", "session.toml")?;

    assert_eq!(config.network.network.name, "t-junction");
    assert_eq!(config.network.junctions.len(), 4);
    assert_eq!(config.network.edges.len(), 5);
    assert_eq!(config.session.simulation.seed, Some(42));
    assert_eq!(config.session.collision.policy, CollisionPolicy::Warn);
    Ok(())
}

#[test]
fn test_sample_script_runs_cleanly() -> Result<()> {
    let config = SimulationConfig::load_from_files("network.toml", "session.toml")?;
    let mut session = ControlSession::new(&config)?;

    let script = BufReader::new(File::open("scenarios/drift.jsonl")?);
    let mut output = Vec::new();
    let summary = run_script(&mut session, script, &mut output)?;
    assert_eq!(summary.commands, 14);
    assert_eq!(summary.errors, 0);

    let responses = String::from_utf8(output)?
        .lines()
        .map(|line| serde_json::from_str::<Response>(line))
        .collect::<Result<Vec<_>, _>>()?;

    match &responses[0] {
        Response::Placement(PlacementState::OnLane { edge_id, lane_index, .. }) => {
            assert_eq!((edge_id.as_str(), *lane_index), ("main_we", 2));
        }
        other => panic!("unexpected first response {:?}", other),
    }
    // Heading north is too far off every main street lane
    assert!(matches!(responses[6], Response::Placement(PlacementState::Free { .. })));
    assert!(matches!(responses[11], Response::Time { tick: 3, .. }));
    assert!(matches!(responses[12], Response::Snapshot(_)));
    assert_eq!(responses.last(), Some(&Response::Ok));
    assert!(session.is_closed());
    Ok(())
}
