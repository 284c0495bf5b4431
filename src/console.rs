// src/console.rs

//! Line-based control input for interactive runs.
//!
//! ```text
//! stress:storm:arm gage:storm   request tasks (reduce, solve, stress,
//!                               modes, gage, fatigue)
//! kill                          abandon pending work, kill running processes
//! max 4                         change the concurrency ceiling
//! quit                          kill everything and exit
//! ```
//!
//! End of input finishes the run once everything has completed.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::RuntimeEvent;
use crate::errors::{Result, StageError};
use crate::task::{Model, TaskRequest, build_tasks};

/// Parse one console line. Blank lines and `#` comments yield `None`.
pub fn parse_command(line: &str, model: &Model) -> Result<Option<RuntimeEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    let event = match words.next() {
        Some("kill") => RuntimeEvent::KillAll,
        Some("quit") | Some("exit") => RuntimeEvent::ShutdownRequested,
        Some("max") => {
            let limit = words
                .next()
                .and_then(|n| n.parse::<usize>().ok())
                .filter(|n| *n >= 1)
                .ok_or_else(|| {
                    StageError::InvalidRequest(format!("'{line}': expected 'max <n>' with n >= 1"))
                })?;
            RuntimeEvent::SetConcurrency(limit)
        }
        _ => {
            let mut tasks = Vec::new();
            for word in line.split_whitespace() {
                let request: TaskRequest = word.parse()?;
                tasks.extend(build_tasks(&request, model)?);
            }
            RuntimeEvent::Push(tasks)
        }
    };
    Ok(Some(event))
}

/// Forward commands read from `input` to the runtime until end of input.
pub async fn read_commands<R>(input: R, model: Arc<Model>, tx: mpsc::Sender<RuntimeEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match parse_command(&line, &model) {
                Ok(Some(event)) => {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "ignoring console input"),
            },
            Ok(None) => {
                debug!("console input closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "reading console input failed");
                break;
            }
        }
    }
    let _ = tx.send(RuntimeEvent::FinishRequested).await;
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::config::{ConfigFile, RawConfigFile};

    fn model() -> Model {
        let raw: RawConfigFile = toml::from_str(
            r#"
            [part.arm]
            fe_file = "arm.ftl"

            [part.base]
            fe_file = "base.ftl"
            locked = true

            [event.storm]
            "#,
        )
        .unwrap();
        Model::from_config(&ConfigFile::try_from(raw).unwrap(), Path::new("/m"))
    }

    #[test]
    fn control_words() {
        let model = model();
        assert!(matches!(
            parse_command("kill", &model).unwrap(),
            Some(RuntimeEvent::KillAll)
        ));
        assert!(matches!(
            parse_command("  quit ", &model).unwrap(),
            Some(RuntimeEvent::ShutdownRequested)
        ));
        assert!(matches!(
            parse_command("max 3", &model).unwrap(),
            Some(RuntimeEvent::SetConcurrency(3))
        ));
        assert!(parse_command("max 0", &model).is_err());
        assert!(parse_command("# note", &model).unwrap().is_none());
    }

    #[test]
    fn requests_expand_to_unlocked_parts() {
        let model = model();
        let Some(RuntimeEvent::Push(tasks)) = parse_command("stress:storm solve", &model).unwrap()
        else {
            panic!("expected a push");
        };
        let names: Vec<String> = tasks.iter().map(|t| t.identity().to_string()).collect();
        assert_eq!(
            names,
            vec!["stress recovery [storm/arm]", "dynamic solve"]
        );
    }

    #[test]
    fn unknown_event_is_rejected() {
        let model = model();
        let err = parse_command("gage:calm", &model).unwrap_err();
        assert!(matches!(err, StageError::UnknownEvent(ref e) if e == "calm"));
    }
}
