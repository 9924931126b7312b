//! Line-oriented JSON command channel in front of a [`ControlSession`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};

use super::{ControlSession, InsertArgs, PlaceArgs, Snapshot, StepReport};
use crate::error::ControlError;
use crate::simulation::{EntityKind, PlacementState};

/// Heading value meaning "not supplied".
pub const INVALID_DOUBLE_VALUE: f64 = -1073741824.0;

fn unspecified_lane() -> i64 {
    -1
}

fn unspecified_heading() -> f64 {
    INVALID_DOUBLE_VALUE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Step,
    /// An empty `edge`, a negative `lane` or an [`INVALID_DOUBLE_VALUE`]
    /// heading mean "unspecified".
    Place {
        id: String,
        #[serde(default)]
        kind: EntityKind,
        x: f64,
        y: f64,
        #[serde(default)]
        edge: String,
        #[serde(default = "unspecified_lane")]
        lane: i64,
        #[serde(default = "unspecified_heading")]
        heading: f64,
        #[serde(default)]
        radius: Option<f64>,
        #[serde(default)]
        keep_route: bool,
    },
    Position {
        id: String,
    },
    Remove {
        id: String,
    },
    Insert {
        id: String,
        #[serde(default)]
        kind: EntityKind,
        edge: String,
        #[serde(default)]
        lane: usize,
        #[serde(default)]
        offset: f64,
        #[serde(default)]
        speed: f64,
        #[serde(default)]
        route: Vec<String>,
        #[serde(default)]
        exit_time: Option<f64>,
    },
    Time,
    Export,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Step(StepReport),
    Time { tick: u64, time: f64 },
    Placement(PlacementState),
    Position { x: f64, y: f64 },
    Ok,
    Snapshot(Snapshot),
    Error { code: String, message: String },
}

impl Response {
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

impl From<ControlError> for Response {
    fn from(err: ControlError) -> Self {
        Response::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Applies one command to `session`. Errors become [`Response::Error`].
pub fn dispatch(session: &mut ControlSession, command: Command) -> Response {
    let result = match command {
        Command::Step => session.step().map(Response::Step),
        Command::Place { id, kind, x, y, edge, lane, heading, radius, keep_route } => {
            let args = PlaceArgs {
                kind,
                x,
                y,
                edge: (!edge.is_empty()).then_some(edge),
                lane: usize::try_from(lane).ok(),
                heading: (heading != INVALID_DOUBLE_VALUE).then_some(heading),
                radius,
                keep_route,
            };
            session.place(&id, &args).map(Response::Placement)
        }
        Command::Position { id } => session.position(&id).map(|(x, y)| Response::Position { x, y }),
        Command::Remove { id } => session.remove(&id).map(|_| Response::Ok),
        Command::Insert { id, kind, edge, lane, offset, speed, route, exit_time } => {
            let args = InsertArgs { kind, edge, lane, offset, speed, route, exit_time };
            session.insert(&id, &args).map(Response::Placement)
        }
        Command::Time => {
            if session.is_closed() {
                Err(ControlError::SessionClosed)
            } else {
                Ok(Response::Time {
                    tick: session.tick(),
                    time: session.time(),
                })
            }
        }
        Command::Export => session.snapshot().map(Response::Snapshot),
        Command::Close => {
            if session.is_closed() {
                Err(ControlError::SessionClosed)
            } else {
                session.close();
                Ok(Response::Ok)
            }
        }
    };

    if let Err(err) = &result {
        log::debug!("Command failed: {}", err);
    }
    result.unwrap_or_else(Response::from)
}

pub fn decode_command(line: &str) -> Result<Command, ControlError> {
    serde_json::from_str(line).map_err(|e| ControlError::InvalidArgument(format!("malformed command: {}", e)))
}

pub fn encode_response(response: &Response) -> Result<String> {
    serde_json::to_string(response).context("encoding response")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptSummary {
    pub commands: usize,
    pub errors: usize,
}

/// Runs a command script in lock-step: one JSON command per input line,
/// one JSON response per output line. Blank lines and lines starting with
/// `#` are skipped.
pub fn run_script<R: BufRead, W: Write>(
    session: &mut ControlSession,
    input: R,
    mut output: W,
) -> Result<ScriptSummary> {
    let mut summary = ScriptSummary::default();

    for (number, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("reading command line {}", number + 1))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let response = match decode_command(line) {
            Ok(command) => dispatch(session, command),
            Err(err) => {
                log::warn!("Line {}: {}", number + 1, err);
                Response::from(err)
            }
        };

        summary.commands += 1;
        if response.is_error() {
            summary.errors += 1;
        }

        writeln!(output, "{}", encode_response(&response)?)?;
        output.flush()?;
    }

    Ok(summary)
}

/// A session handle that several threads may drive. Commands are applied
/// one at a time.
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<Mutex<ControlSession>>,
}

impl SharedSession {
    pub fn new(session: ControlSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn execute(&self, command: Command) -> Response {
        match self.inner.lock() {
            Ok(mut session) => dispatch(&mut session, command),
            Err(_) => {
                log::error!("Session lock poisoned, rejecting command");
                Response::from(ControlError::SessionClosed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::testing;

    fn session() -> ControlSession {
        ControlSession::with_index(testing::corridor_index(), &SessionConfig::default())
    }

    #[test]
    fn place_command_applies_sentinels() {
        let command = decode_command(r#"{"cmd":"place","id":"v","x":50.0,"y":-1.0}"#).unwrap();
        match &command {
            Command::Place { edge, lane, heading, radius, kind, .. } => {
                assert!(edge.is_empty());
                assert_eq!(*lane, -1);
                assert_eq!(*heading, INVALID_DOUBLE_VALUE);
                assert_eq!(*radius, None);
                assert_eq!(*kind, EntityKind::Vehicle);
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut session = session();
        match dispatch(&mut session, command) {
            Response::Placement(PlacementState::OnLane { edge_id, lane_index, .. }) => {
                assert_eq!(edge_id, "WE");
                assert_eq!(lane_index, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn errors_carry_stable_codes() {
        let mut session = session();
        let response = dispatch(&mut session, Command::Position { id: "ghost".into() });
        assert!(matches!(response, Response::Error { ref code, .. } if code == "unknown_entity"));

        let response = dispatch(
            &mut session,
            decode_command(r#"{"cmd":"place","id":"v","x":50.0,"y":0.0,"edge":"NOPE"}"#).unwrap(),
        );
        assert!(matches!(response, Response::Error { ref code, .. } if code == "invalid_hint"));

        let err = decode_command(r#"{"cmd":"fly"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn script_runs_in_lock_step() {
        let script = "\
# warm-up
{\"cmd\":\"place\",\"id\":\"v\",\"x\":20.0,\"y\":-1.6}

{\"cmd\":\"step\"}
{\"cmd\":\"time\"}
{\"cmd\":\"remove\",\"id\":\"missing\"}
{\"cmd\":\"close\"}
{\"cmd\":\"step\"}
";
        let mut session = session();
        let mut output = Vec::new();
        let summary = run_script(&mut session, script.as_bytes(), &mut output).unwrap();
        assert_eq!(summary, ScriptSummary { commands: 6, errors: 2 });

        let lines: Vec<Response> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[2], Response::Time { tick: 1, time: 1.0 });
        assert_eq!(lines[4], Response::Ok);
        assert!(matches!(&lines[5], Response::Error { code, .. } if code == "session_closed"));
    }

    #[test]
    fn shared_session_serializes_commands() {
        let shared = SharedSession::new(session());

        std::thread::scope(|scope| {
            for t in 0..4 {
                let shared = shared.clone();
                scope.spawn(move || {
                    for i in 0..5 {
                        let response = shared.execute(Command::Place {
                            id: format!("v{}_{}", t, i),
                            kind: EntityKind::Vehicle,
                            x: 20.0 + 30.0 * i as f64,
                            y: -1.6,
                            edge: String::new(),
                            lane: -1,
                            heading: INVALID_DOUBLE_VALUE,
                            radius: None,
                            keep_route: false,
                        });
                        assert!(!response.is_error());
                    }
                });
            }
        });

        match shared.execute(Command::Export) {
            Response::Snapshot(snapshot) => assert_eq!(snapshot.entities.len(), 20),
            other => panic!("unexpected {:?}", other),
        }
    }
}
